pub mod client;
pub mod config;
pub mod identity;
pub mod message;
pub mod protocol;
pub mod relay;
pub mod selector;
pub mod signature;
pub mod signer;
pub mod submit;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::NodeClient;
pub use config::{Network, RelayConfig};
pub use identity::{Address, LocalKey, SponsorKey};
pub use message::error::{RelayError, RelayErrorCode};
pub use relay::{SponsoredRelay, SubmissionResult, TransferRequest};
pub use signer::{LocalOwnerSigner, OwnerSigner, OwnerSigningError};
