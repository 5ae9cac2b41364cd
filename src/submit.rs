//! Submission with a single, classified retry.
//!
//! ```text
//! Built -> Submitted(1) -> Confirmed
//!                       -> Failed
//!                       -> Submitted(2) -> Confirmed | Failed
//! ```
//!
//! The `Submitted(1) -> Submitted(2)` edge needs the submission's only
//! [`RetryToken`] and is taken only for decode/bounds rejections. Only the
//! owner's envelope is re-encoded for the retry; the sponsor's goes out
//! unchanged both times.
use crate::message::RelayError;
use crate::protocol::intent::IntentBytes;
use crate::protocol::TransactionDigest;
use crate::signer::SignaturePair;
use crate::transport::LedgerNode;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmissionState {
    Built,
    Submitted { attempt: u8 },
    Confirmed(TransactionDigest),
    Failed(RelayError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Built,
    First,
    Retry,
    Confirmed,
    Failed,
}

const VALID_TRANSITIONS: &[(Phase, Phase)] = &[
    (Phase::Built, Phase::First),
    (Phase::First, Phase::Confirmed),
    (Phase::First, Phase::Failed),
    (Phase::First, Phase::Retry),
    (Phase::Retry, Phase::Confirmed),
    (Phase::Retry, Phase::Failed),
];

fn phase(state: &SubmissionState) -> Phase {
    match state {
        SubmissionState::Built => Phase::Built,
        SubmissionState::Submitted { attempt: 1 } => Phase::First,
        SubmissionState::Submitted { .. } => Phase::Retry,
        SubmissionState::Confirmed(_) => Phase::Confirmed,
        SubmissionState::Failed(_) => Phase::Failed,
    }
}

pub fn is_valid_transition(from: &SubmissionState, to: &SubmissionState) -> bool {
    VALID_TRANSITIONS.contains(&(phase(from), phase(to)))
}

pub fn validate_transition(
    from: &SubmissionState,
    to: &SubmissionState,
) -> Result<(), RelayError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(RelayError::unknown(format!(
            "invalid submission transition {:?} -> {:?}",
            phase(from),
            phase(to)
        )))
    }
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Confirmed(_) | SubmissionState::Failed(_))
    }
}

/// Permission to resubmit once. It cannot be cloned or rebuilt outside this
/// module, so a submission can spend at most one.
#[derive(Debug)]
pub struct RetryToken(());

/// The end of a submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmissionOutcome {
    pub state: SubmissionState,
    pub attempts: u8,
}

impl SubmissionOutcome {
    pub fn into_result(self) -> Result<TransactionDigest, RelayError> {
        match self.state {
            SubmissionState::Confirmed(digest) => Ok(digest),
            SubmissionState::Failed(error) => Err(error),
            other => Err(RelayError::unknown(format!(
                "submission stopped in state {other:?}"
            ))),
        }
    }
}

pub struct Submission<'a, N: LedgerNode + ?Sized> {
    node: &'a N,
    intent: IntentBytes,
    signatures: SignaturePair,
    state: SubmissionState,
    retry: Option<RetryToken>,
    attempts: u8,
}

impl<'a, N: LedgerNode + ?Sized> Submission<'a, N> {
    pub fn new(node: &'a N, intent: IntentBytes, signatures: SignaturePair) -> Self {
        Self {
            node,
            intent,
            signatures,
            state: SubmissionState::Built,
            retry: Some(RetryToken(())),
            attempts: 0,
        }
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub async fn run(mut self) -> SubmissionOutcome {
        let first = match self.submit().await {
            Ok(digest) => return self.finish(SubmissionState::Confirmed(digest)),
            Err(error) => error,
        };

        if !first.is_decode_or_bounds() {
            tracing::debug!(code = ?first.code, "submission failed, not retriable");
            return self.finish(SubmissionState::Failed(first));
        }
        match self.retry.take() {
            Some(token) => self.resubmit(token, first).await,
            None => self.finish(SubmissionState::Failed(first)),
        }
    }

    async fn resubmit(mut self, _token: RetryToken, first: RelayError) -> SubmissionOutcome {
        let owner = match self.signatures.owner.reencoded() {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!(code = ?e.code, "owner signature could not be re-encoded");
                return self.finish(SubmissionState::Failed(first));
            }
        };
        tracing::warn!(
            from = %self.signatures.owner.encoding(),
            to = %owner.encoding(),
            "node could not decode the submission, retrying once"
        );
        self.signatures = self.signatures.with_owner(owner);

        match self.submit().await {
            Ok(digest) => self.finish(SubmissionState::Confirmed(digest)),
            Err(retry_error) => {
                tracing::debug!(code = ?retry_error.code, "retry failed, keeping the first error");
                self.finish(SubmissionState::Failed(first))
            }
        }
    }

    async fn submit(&mut self) -> Result<TransactionDigest, RelayError> {
        self.attempts += 1;
        self.transition(SubmissionState::Submitted {
            attempt: self.attempts,
        })?;
        let wire = self.signatures.wire();
        tracing::debug!(
            attempt = self.attempts,
            signatures = wire.len(),
            intent = ?self.intent,
            "submitting"
        );
        self.node.execute(&self.intent, &wire).await
    }

    fn finish(mut self, state: SubmissionState) -> SubmissionOutcome {
        if let Err(e) = self.transition(state) {
            self.state = SubmissionState::Failed(e);
        }
        SubmissionOutcome {
            state: self.state,
            attempts: self.attempts,
        }
    }

    fn transition(&mut self, next: SubmissionState) -> Result<(), RelayError> {
        validate_transition(&self.state, &next).map_err(|e| {
            tracing::error!(%e, "submission state machine violated");
            e
        })?;
        tracing::debug!(from = ?phase(&self.state), to = ?phase(&next), "submission state");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RelayErrorCode;
    use crate::signature::{Encoding, Role, SignatureEnvelope};
    use crate::testing::MemoryLedger;

    const SIG: [u8; 4] = [1, 2, 3, 4];

    fn pair() -> SignaturePair {
        SignaturePair {
            owner: SignatureEnvelope::encode(Role::Owner, Encoding::Base64, &SIG),
            sponsor: Some(SignatureEnvelope::encode(Role::Sponsor, Encoding::Base64, &[9; 4])),
        }
    }

    fn intent() -> IntentBytes {
        IntentBytes::from_vec(vec![0xA5; 16])
    }

    fn digest(n: u8) -> TransactionDigest {
        TransactionDigest::new([n; 32])
    }

    #[tokio::test]
    async fn confirms_first_time() {
        let ledger = MemoryLedger::new();
        ledger.script_execute([Ok(digest(1))]);

        let outcome = Submission::new(&ledger, intent(), pair()).run().await;
        assert_eq!(outcome.state, SubmissionState::Confirmed(digest(1)));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ledger.execute_calls(), 1);
    }

    #[tokio::test]
    async fn decode_error_retries_once_with_reencoded_owner() {
        let ledger = MemoryLedger::new();
        ledger.script_execute([
            Err(RelayError::decode_or_bounds_error("index out of bounds")),
            Ok(digest(2)),
        ]);

        let outcome = Submission::new(&ledger, intent(), pair()).run().await;
        assert_eq!(outcome.into_result(), Ok(digest(2)));
        assert_eq!(ledger.execute_calls(), 2);

        let submitted = ledger.submitted_signatures();
        assert_eq!(submitted[0][0], base64::encode(SIG));
        assert_eq!(submitted[1][0], hex::encode(SIG));
        assert_eq!(submitted[0][1], submitted[1][1]);
    }

    #[tokio::test]
    async fn second_decode_error_surfaces_the_first() {
        let ledger = MemoryLedger::new();
        ledger.script_execute([
            Err(RelayError::decode_or_bounds_error("first")),
            Err(RelayError::decode_or_bounds_error("second")),
            Ok(digest(3)),
        ]);

        let outcome = Submission::new(&ledger, intent(), pair()).run().await;
        assert_eq!(outcome.attempts, 2);
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.arguments["details"], "first");
        assert_eq!(ledger.execute_calls(), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        for error in [
            RelayError::stale_object_version("0x01"),
            RelayError::insufficient_gas("budget exceeded"),
            RelayError::unexpected_transport_error("timed out"),
            RelayError::node_rejected("signature mismatch"),
        ] {
            let ledger = MemoryLedger::new();
            ledger.script_execute([Err(error.clone()), Ok(digest(4))]);
            let outcome = Submission::new(&ledger, intent(), pair()).run().await;
            assert_eq!(outcome.state, SubmissionState::Failed(error));
            assert_eq!(ledger.execute_calls(), 1);
        }
    }

    #[tokio::test]
    async fn rejected_text_in_the_decode_class_is_retried() {
        let ledger = MemoryLedger::new();
        ledger.script_execute([
            Err(RelayError::node_rejected("Deserialization failed: unexpected end of input")),
            Ok(digest(5)),
        ]);
        let outcome = Submission::new(&ledger, intent(), pair()).run().await;
        assert_eq!(outcome.into_result(), Ok(digest(5)));
    }

    #[tokio::test]
    async fn unencodable_owner_keeps_the_first_error() {
        let ledger = MemoryLedger::new();
        let first = RelayError::decode_or_bounds_error("bad");
        ledger.script_execute([Err(first.clone()), Ok(digest(6))]);

        let mut signatures = pair();
        signatures.owner = crate::signature::Normalizer::default()
            .normalize(Role::Owner, "%%%%=")
            .unwrap();
        let outcome = Submission::new(&ledger, intent(), signatures).run().await;
        assert_eq!(outcome.state, SubmissionState::Failed(first));
        assert_eq!(ledger.execute_calls(), 1);
    }

    #[test]
    fn transition_table() {
        let built = SubmissionState::Built;
        let first = SubmissionState::Submitted { attempt: 1 };
        let retry = SubmissionState::Submitted { attempt: 2 };
        let done = SubmissionState::Confirmed(digest(0));
        let failed = SubmissionState::Failed(RelayError::default());

        assert!(is_valid_transition(&built, &first));
        assert!(is_valid_transition(&first, &retry));
        assert!(is_valid_transition(&retry, &done));
        assert!(is_valid_transition(&first, &failed));
        assert!(!is_valid_transition(&retry, &retry));
        assert!(!is_valid_transition(&built, &done));
        assert!(!is_valid_transition(&done, &first));
        assert!(done.is_terminal() && failed.is_terminal() && !retry.is_terminal());
    }

    #[tokio::test]
    async fn invalid_edges_fail_without_reaching_the_node() {
        let ledger = MemoryLedger::new();
        ledger.script_execute([Ok(digest(7))]);

        let mut submission = Submission::new(&ledger, intent(), pair());
        submission.state = SubmissionState::Confirmed(digest(0));
        let err = submission.submit().await.unwrap_err();
        assert_eq!(err.code, RelayErrorCode::Unknown);
        assert_eq!(submission.state(), &SubmissionState::Confirmed(digest(0)));
        assert_eq!(ledger.execute_calls(), 0);

        let outcome = submission.finish(SubmissionState::Built);
        assert!(matches!(outcome.state, SubmissionState::Failed(_)));
        assert!(validate_transition(&SubmissionState::Built, &SubmissionState::Built).is_err());
    }

    #[test]
    fn unfinished_outcome_is_an_error() {
        let outcome = SubmissionOutcome {
            state: SubmissionState::Built,
            attempts: 0,
        };
        assert_eq!(outcome.into_result().unwrap_err().code, RelayErrorCode::Unknown);
    }
}
