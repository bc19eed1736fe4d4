//! Error kinds shared across the dialogue pipeline
//!
//! Every failure a worker can observe is mapped into one of these variants
//! before it reaches the session orchestrator. The orchestrator never sees
//! a raw vendor or I/O error — only a `HanasuError` it can route through
//! the policy table (retry, fallback utterance, or silent continue).

use thiserror::Error;

/// A classified failure, routed by the orchestrator per its recovery policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HanasuError {
    /// Vendor ASR RPC failed in a retryable way (timeout, out-of-range, canceled).
    #[error("ASR transient failure: {0}")]
    AsrTransient(String),

    /// ASR retries exhausted; the client is ended and the turn is treated as empty.
    #[error("ASR client exhausted retries: {0}")]
    AsrFatal(String),

    /// The synthesis engine failed to produce audio for an enqueued utterance.
    #[error("TTS synthesis failed: {0}")]
    TtsSynth(String),

    /// The carrier write for an already-synthesized envelope failed or timed out.
    #[error("TTS carrier write failed: {0}")]
    TtsWrite(String),

    /// The LLM call exceeded its deadline.
    #[error("LLM call timed out")]
    LlmTimeout,

    /// The LLM call returned no usable content.
    #[error("LLM returned an empty response")]
    LlmEmpty,

    /// The NLU pipeline could not produce a well-formed result for the transcript.
    #[error("NLU failed to parse transcript: {0}")]
    NluMalformed(String),

    /// DST routing saw an intent it cannot act on from the current state.
    #[error("unrecognized or inadmissible intent")]
    IntentUnknown,

    /// The carrier WebSocket closed (client `stop` or socket error).
    #[error("carrier connection closed")]
    CarrierClosed,

    /// The best-effort conversation log writer failed.
    #[error("conversation log write failed: {0}")]
    LoggerIo(String),
}

impl HanasuError {
    /// The fallback-message kind the NLG should use to surface this error, if any.
    ///
    /// `None` means the error is handled silently (no utterance emitted).
    pub fn fallback_kind(&self) -> Option<crate::nlg::FallbackKind> {
        use crate::nlg::FallbackKind;
        match self {
            HanasuError::AsrFatal(_) => Some(FallbackKind::ConversationError),
            HanasuError::TtsSynth(_) => Some(FallbackKind::Default),
            HanasuError::LlmTimeout | HanasuError::LlmEmpty => Some(FallbackKind::Default),
            HanasuError::NluMalformed(_) => Some(FallbackKind::Default),
            HanasuError::IntentUnknown => Some(FallbackKind::InvalidIntent),
            HanasuError::AsrTransient(_)
            | HanasuError::TtsWrite(_)
            | HanasuError::CarrierClosed
            | HanasuError::LoggerIo(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HanasuError>;
