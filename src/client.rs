use crate::config::RelayConfig;
use crate::identity::Address;
use crate::message::{
    decode_response_data, RelayError, RelayErrorCode, RequestMessage, RequestMessageBuilder,
    ResponseMessage,
};
use crate::protocol::intent::IntentBytes;
use crate::protocol::{AssetId, ObjectRef, TransactionDigest};
use crate::transport::{LedgerNode, ObjectCatalog};
use async_trait::async_trait;
use minicbor::{Decode, Encode};
use reqwest::{IntoUrl, Url};
use std::collections::BTreeSet;
use std::fmt::Formatter;
use std::time::{Duration, SystemTime};

pub const OBJECTS_METHOD: &str = "ledger.objects";
pub const EXECUTE_METHOD: &str = "ledger.execute";

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Clone, Debug, Encode, Decode, Eq, PartialEq)]
#[cbor(map)]
pub struct ObjectsArgs {
    #[n(0)]
    pub owner: Address,

    #[n(1)]
    pub asset: AssetId,

    #[n(2)]
    pub cursor: Option<u64>,

    #[n(3)]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Encode, Decode, Eq, PartialEq)]
#[cbor(map)]
pub struct ObjectsReturns {
    #[n(0)]
    pub objects: Vec<ObjectRef>,

    #[n(1)]
    pub next_cursor: Option<u64>,
}

#[derive(Clone, Debug, Encode, Decode, Eq, PartialEq)]
#[cbor(map)]
pub struct ExecuteArgs {
    #[cbor(n(0), with = "minicbor::bytes")]
    pub intent: Vec<u8>,

    #[n(1)]
    pub signatures: Vec<String>,
}

#[derive(Clone, Debug, Encode, Decode, Eq, PartialEq)]
#[cbor(map)]
pub struct ExecuteReturns {
    #[n(0)]
    pub digest: TransactionDigest,
}

/// Talks to a ledger node over HTTP. Requests and responses are CBOR
/// messages posted to the node's endpoint.
#[derive(Clone)]
pub struct NodeClient {
    url: Url,
    http: reqwest::Client,
    page_size: u32,
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("url", &self.url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl NodeClient {
    pub fn new<S: IntoUrl>(url: S, timeout: Duration) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::unexpected_transport_error(e.to_string()))?;
        Ok(Self {
            url: url
                .into_url()
                .map_err(|e| RelayError::unexpected_transport_error(e.to_string()))?,
            http,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self::new(config.endpoint.as_str(), config.request_timeout)?
            .with_page_size(config.page_size))
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn send_message(
        &self,
        message: RequestMessage,
    ) -> Result<ResponseMessage, RelayError> {
        let bytes = message
            .to_bytes()
            .map_err(RelayError::serialization_failure)?;
        tracing::debug!(method = %message.method, len = bytes.len(), "request");

        let response = self
            .http
            .post(self.url.clone())
            .body(bytes)
            .send()
            .await
            .map_err(|e| RelayError::unexpected_transport_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::unexpected_transport_error(format!(
                "HTTP status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::unexpected_transport_error(e.to_string()))?;
        tracing::debug!("reply\n{}", hex::encode(&body));
        ResponseMessage::from_bytes(&body).map_err(RelayError::deserialization_error)
    }

    pub async fn call_raw<M>(
        &self,
        method: M,
        argument: &[u8],
    ) -> Result<ResponseMessage, RelayError>
    where
        M: Into<String>,
    {
        let mut nonce = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

        let message: RequestMessage = RequestMessageBuilder::default()
            .version(1)
            .method(method.into())
            .data(argument.to_vec())
            .timestamp(SystemTime::now())
            .nonce(nonce.to_vec())
            .build()
            .map_err(|e| RelayError::serialization_failure(e.to_string()))?;

        self.send_message(message).await
    }

    pub async fn call<M, I>(&self, method: M, argument: I) -> Result<ResponseMessage, RelayError>
    where
        M: Into<String>,
        I: Encode,
    {
        let bytes: Vec<u8> = minicbor::to_vec(argument)
            .map_err(|e| RelayError::serialization_failure(e.to_string()))?;

        self.call_raw(method, bytes.as_slice()).await
    }

    /// Fetch one page of `owner`'s objects of `asset`.
    pub async fn objects_page(
        &self,
        owner: &Address,
        asset: &AssetId,
        cursor: Option<u64>,
    ) -> Result<ObjectsReturns, RelayError> {
        let args = ObjectsArgs {
            owner: *owner,
            asset: asset.clone(),
            cursor,
            limit: Some(self.page_size),
        };
        decode_response_data(self.call(OBJECTS_METHOD, args).await?)
    }
}

#[async_trait]
impl ObjectCatalog for NodeClient {
    async fn objects(
        &self,
        owner: &Address,
        asset: &AssetId,
    ) -> Result<Vec<ObjectRef>, RelayError> {
        let unavailable = |e: RelayError| match e.code {
            RelayErrorCode::CatalogUnavailable => e,
            _ => RelayError::catalog_unavailable(e),
        };

        let mut objects = Vec::new();
        let mut cursor = None;
        let mut seen = BTreeSet::new();
        loop {
            let page = self
                .objects_page(owner, asset, cursor)
                .await
                .map_err(unavailable)?;
            objects.extend(page.objects);

            match page.next_cursor {
                None => break,
                Some(next) if !seen.insert(next) => {
                    return Err(RelayError::catalog_unavailable(format!(
                        "cursor {next} was already visited"
                    )));
                }
                next => cursor = next,
            }
        }
        tracing::debug!(%owner, %asset, count = objects.len(), "objects read");
        Ok(objects)
    }
}

#[async_trait]
impl LedgerNode for NodeClient {
    async fn execute(
        &self,
        intent: &IntentBytes,
        signatures: &[String],
    ) -> Result<TransactionDigest, RelayError> {
        let args = ExecuteArgs {
            intent: intent.as_slice().to_vec(),
            signatures: signatures.to_vec(),
        };
        let returns: ExecuteReturns = decode_response_data(self.call(EXECUTE_METHOD, args).await?)?;
        tracing::debug!(digest = %returns.digest, "executed");
        Ok(returns.digest)
    }
}
