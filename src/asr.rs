//! Streaming ASR vendor contract and retry policy (spec.md §4.3).
//!
//! Ported from `examples/original_source/src/bridge/asr_bridge.py`'s
//! `ASRBridge`: a 3-attempt retry loop with a fixed 5-second backoff on
//! transient vendor RPC failures, an `is_final`/`stability` transcript
//! shape, and a `bot_speak` flag the orchestrator sets while TTS audio is
//! playing so the ASR stream can suppress echo-triggered transcripts.

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use crate::error::HanasuError;

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// One ASR result, interim or final, with the vendor's confidence signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub stability: f32,
}

/// A streaming speech recognizer session. One instance per phone call.
#[async_trait]
pub trait AsrStream: Send {
    /// Push a chunk of 8kHz μ-law audio from the carrier.
    async fn push_audio(&mut self, ulaw_chunk: &[u8]) -> Result<(), HanasuError>;

    /// Poll for the next transcript update, if the vendor has produced one
    /// since the last call. Returns `Ok(None)` when there is nothing new yet.
    async fn next_transcript(&mut self) -> Result<Option<Transcript>, HanasuError>;

    /// Whether the bot is currently speaking; while true, the session
    /// suppresses transcripts that look like the bot's own TTS echoing
    /// back through the carrier.
    fn set_bot_speaking(&mut self, speaking: bool);
}

/// Wraps an [`AsrStream`] with the original's fixed retry-with-backoff
/// policy: up to [`MAX_RETRIES`] attempts, [`RETRY_INTERVAL`] apart, before
/// the stream is declared fatally failed.
pub struct RetryingAsr<S: AsrStream> {
    inner: S,
    attempts: u32,
    bot_speaking: bool,
}

impl<S: AsrStream> RetryingAsr<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, attempts: 0, bot_speaking: false }
    }

    pub fn set_bot_speaking(&mut self, speaking: bool) {
        self.bot_speaking = speaking;
        self.inner.set_bot_speaking(speaking);
    }

    pub async fn push_audio(&mut self, ulaw_chunk: &[u8]) -> Result<(), HanasuError> {
        loop {
            match self.inner.push_audio(ulaw_chunk).await {
                Ok(()) => return Ok(()),
                Err(HanasuError::AsrTransient(msg)) => {
                    self.attempts += 1;
                    warn!(attempt = self.attempts, error = %msg, "ASR push failed, retrying");
                    if self.attempts >= MAX_RETRIES {
                        error!("ASR retries exhausted on push_audio");
                        return Err(HanasuError::AsrFatal(msg));
                    }
                    sleep(RETRY_INTERVAL).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Poll once; transient failures are retried inline up to the attempt
    /// budget, mirroring `run_with_retries`' outer loop around `_run`.
    ///
    /// While `bot_speaking` is set, any transcript the vendor reports is
    /// discarded rather than returned (spec.md §4.3): the carrier's own TTS
    /// playback loops back through the line and would otherwise be
    /// mistranscribed as caller speech.
    pub async fn next_transcript(&mut self) -> Result<Option<Transcript>, HanasuError> {
        loop {
            match self.inner.next_transcript().await {
                Ok(result) => {
                    self.attempts = 0;
                    if self.bot_speaking {
                        if result.is_some() {
                            warn!("discarding transcript received while bot is speaking");
                        }
                        return Ok(None);
                    }
                    return Ok(result);
                }
                Err(HanasuError::AsrTransient(msg)) => {
                    self.attempts += 1;
                    warn!(attempt = self.attempts, error = %msg, "ASR stream error, retrying");
                    if self.attempts >= MAX_RETRIES {
                        error!("Maximum retry attempts reached. Terminating ASR stream.");
                        return Err(HanasuError::AsrFatal(msg));
                    }
                    sleep(RETRY_INTERVAL).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub fn is_bot_speaking(&self) -> bool {
        self.bot_speaking
    }
}

/// Placeholder [`AsrStream`] used until a real streaming ASR vendor is
/// wired in; always reports no transcript. Lets the carrier transport and
/// session orchestrator be exercised end-to-end without a live vendor
/// dependency, matching how the cache-first [`crate::tts::TtsVendor`]
/// fallback is also stubbed for the same reason.
#[derive(Debug, Default)]
pub struct NullAsr;

#[async_trait]
impl AsrStream for NullAsr {
    async fn push_audio(&mut self, _ulaw_chunk: &[u8]) -> Result<(), HanasuError> {
        Ok(())
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>, HanasuError> {
        Ok(None)
    }

    fn set_bot_speaking(&mut self, _speaking: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyAsr {
        fail_times: Arc<AtomicU32>,
        queued: Option<Transcript>,
    }

    #[async_trait]
    impl AsrStream for FlakyAsr {
        async fn push_audio(&mut self, _chunk: &[u8]) -> Result<(), HanasuError> {
            Ok(())
        }

        async fn next_transcript(&mut self) -> Result<Option<Transcript>, HanasuError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(HanasuError::AsrTransient("upstream reset".into()));
            }
            Ok(self.queued.take())
        }

        fn set_bot_speaking(&mut self, _speaking: bool) {}
    }

    #[tokio::test]
    async fn transient_failures_below_budget_eventually_succeed() {
        let fail_times = Arc::new(AtomicU32::new(2));
        let inner = FlakyAsr {
            fail_times: Arc::clone(&fail_times),
            queued: Some(Transcript { text: "こんにちは".into(), is_final: true, stability: 0.9 }),
        };
        let mut asr = RetryingAsr::new(inner);

        tokio::time::pause();
        let result = {
            let fut = asr.next_transcript();
            tokio::pin!(fut);
            for _ in 0..2 {
                tokio::time::advance(RETRY_INTERVAL).await;
            }
            fut.as_mut().await
        };

        assert_eq!(result, Ok(Some(Transcript { text: "こんにちは".into(), is_final: true, stability: 0.9 })));
        assert_eq!(fail_times.load(Ordering::SeqCst), 0);
        assert_eq!(asr.attempts, 0, "a successful poll resets the attempt counter");
    }

    #[tokio::test]
    async fn transcript_is_suppressed_while_bot_is_speaking() {
        let inner = FlakyAsr {
            fail_times: Arc::new(AtomicU32::new(0)),
            queued: Some(Transcript { text: "こんにちは".into(), is_final: true, stability: 0.9 }),
        };
        let mut asr = RetryingAsr::new(inner);
        asr.set_bot_speaking(true);
        let result = asr.next_transcript().await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_fatal_error() {
        let inner = FlakyAsr { fail_times: Arc::new(AtomicU32::new(10)), queued: None };
        let mut asr = RetryingAsr::new(inner);
        tokio::time::pause();
        let fut = asr.next_transcript();
        tokio::pin!(fut);
        for _ in 0..MAX_RETRIES {
            tokio::time::advance(RETRY_INTERVAL).await;
        }
        let result = fut.await;
        assert!(matches!(result, Err(HanasuError::AsrFatal(_))));
    }

    #[test]
    fn bot_speaking_flag_propagates_to_inner_stream() {
        let inner = FlakyAsr { fail_times: Arc::new(AtomicU32::new(0)), queued: None };
        let mut asr = RetryingAsr::new(inner);
        asr.set_bot_speaking(true);
        assert!(asr.is_bot_speaking());
    }
}
