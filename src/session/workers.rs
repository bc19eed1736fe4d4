//! Carrier audio framing for TTS playback (spec.md §4.8/§6).
//!
//! Ported from `examples/original_source/src/bridge/dialog_bridge.py`'s
//! `send_tts`: μ-law audio is sent to the carrier in fixed-size `media`
//! frames followed by a `mark` frame so the carrier can report back when
//! playback finishes, and every send is bounded by a timeout so a stalled
//! carrier socket doesn't wedge the session task forever.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::warn;

use crate::error::HanasuError;
use crate::tts::SynthesizedAudio;

/// How long one `media`/`mark` frame send may take before the carrier
/// connection is considered dead, matching the original's `asyncio.wait_for`
/// bound around each WebSocket send.
pub const FRAME_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 20ms of 8kHz μ-law audio, the carrier's own frame size.
pub const FRAME_BYTES: usize = 160;

/// One unit of carrier-bound playback the transport layer knows how to
/// encode into its wire protocol.
#[derive(Debug, Clone)]
pub enum OutboundAudioFrame {
    Media { ulaw: Vec<u8> },
    Mark { name: String },
    /// Tells the carrier to discard any buffered playback immediately, for
    /// barge-in (spec.md §4.9's `handle_barge_in`).
    Clear,
}

/// Split `audio` into fixed-size carrier frames and enqueue them followed by
/// a `continue` mark, each send bounded by [`FRAME_SEND_TIMEOUT`].
pub async fn enqueue_tts_playback(
    tx: &mpsc::Sender<OutboundAudioFrame>,
    audio: &SynthesizedAudio,
) -> Result<(), HanasuError> {
    for chunk in audio.ulaw.chunks(FRAME_BYTES) {
        send_with_timeout(tx, OutboundAudioFrame::Media { ulaw: chunk.to_vec() }).await?;
    }
    send_with_timeout(tx, OutboundAudioFrame::Mark { name: "continue".to_string() }).await
}

async fn send_with_timeout(tx: &mpsc::Sender<OutboundAudioFrame>, frame: OutboundAudioFrame) -> Result<(), HanasuError> {
    match timeout(FRAME_SEND_TIMEOUT, tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => {
            warn!("carrier frame channel closed");
            Err(HanasuError::CarrierClosed)
        }
        Err(_) => {
            warn!("carrier frame send timed out");
            Err(HanasuError::CarrierClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn playback_splits_into_frame_sized_chunks_and_ends_with_mark() {
        let (tx, mut rx) = mpsc::channel(32);
        let audio = SynthesizedAudio { text: "こんにちは".into(), ulaw: vec![0u8; FRAME_BYTES * 2 + 10] };
        enqueue_tts_playback(&tx, &audio).await.unwrap();
        drop(tx);

        let mut media_frames = 0;
        let mut saw_mark = false;
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundAudioFrame::Media { ulaw } => {
                    assert!(ulaw.len() <= FRAME_BYTES);
                    media_frames += 1;
                }
                OutboundAudioFrame::Mark { name } => {
                    assert_eq!(name, "continue");
                    saw_mark = true;
                }
                OutboundAudioFrame::Clear => {}
            }
        }
        assert_eq!(media_frames, 3);
        assert!(saw_mark);
    }

    #[tokio::test]
    async fn closed_receiver_surfaces_carrier_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let audio = SynthesizedAudio { text: "x".into(), ulaw: vec![0u8; 4] };
        let result = enqueue_tts_playback(&tx, &audio).await;
        assert!(matches!(result, Err(HanasuError::CarrierClosed)));
    }
}
