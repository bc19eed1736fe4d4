//! Carrier bidirectional WebSocket termination (spec.md §6).
//!
//! Ported from `examples/original_source/src/bridge/tts_bridge.py`'s
//! `get_twilio_media_stream`/`trans4twilio` and `dialog_bridge.py`'s
//! `handle_barge_in`: the carrier speaks a small JSON protocol over one
//! WebSocket per call (`connected`/`start`/`media`/`stop`/`mark` inbound,
//! `media`/`mark`/`clear` outbound), framed here the way the teacher's
//! `voice_ws.rs` framed its own tagged client/server message enums.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::asr::Transcript;
use crate::llm::OpenRouterClient;
use crate::persistence::MockReservationBackend;
use crate::server::ServerState;
use crate::session::workers::{enqueue_tts_playback, OutboundAudioFrame};
use crate::session::{SessionOrchestrator, TurnTakingStatus};
use crate::tts::TtsVendor;

/// One event the carrier sends over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum CarrierInbound {
    Connected,
    Start { #[serde(rename = "streamSid")] stream_sid: String },
    Media { media: InboundMedia },
    Stop,
    Mark { mark: MarkPayload },
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct MarkPayload {
    name: String,
}

/// One event sent back to the carrier.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum CarrierOutbound<'a> {
    Media { #[serde(rename = "streamSid")] stream_sid: &'a str, media: OutboundMedia },
    Mark { #[serde(rename = "streamSid")] stream_sid: &'a str, mark: OutboundMark<'a> },
    Clear { #[serde(rename = "streamSid")] stream_sid: &'a str },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMark<'a> {
    name: &'a str,
}

/// `conversation_id = hex(sha1(call_sid))`, so logs can be correlated
/// without leaking the carrier's own call identifier.
fn conversation_id(call_sid: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(call_sid.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_call(socket, state))
}

async fn run_call(socket: WebSocket, state: ServerState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundAudioFrame>(state.config.tts.queue_capacity);

    // First inbound frame pair is always connected+start; wait for start to
    // learn the streamSid before constructing the per-call orchestrator.
    let Some(stream_sid) = await_stream_start(&mut ws_rx).await else {
        warn!("carrier socket closed before start event");
        return;
    };
    info!(conversation_id = %conversation_id(&stream_sid), "call started");

    let mut orchestrator = build_orchestrator(&state, stream_sid.clone());
    let greeting = orchestrator.initial_utterance();
    orchestrator.set_bot_speaking(greeting.label.clone());
    if let Ok(audio) = orchestrator.synthesize(&greeting).await {
        let _ = enqueue_tts_playback(&frame_tx, &audio).await;
    }
    // `bot_speaking` stays set until the carrier acknowledges playback with
    // an inbound `mark=continue` event (spec.md §4.9 steps 5-6), not cleared
    // here — see the `CarrierInbound::Mark` arm below.

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let outbound = match &frame {
                OutboundAudioFrame::Media { ulaw } => {
                    CarrierOutbound::Media { stream_sid: &stream_sid, media: OutboundMedia { payload: BASE64.encode(ulaw) } }
                }
                OutboundAudioFrame::Mark { name } => {
                    CarrierOutbound::Mark { stream_sid: &stream_sid, mark: OutboundMark { name } }
                }
                OutboundAudioFrame::Clear => CarrierOutbound::Clear { stream_sid: &stream_sid },
            };
            let Ok(text) = serde_json::to_string(&outbound) else { continue };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut transcript_buffer = String::new();
    let mut awaiting_finish_ack = false;
    while let Some(Ok(message)) = ws_rx.next().await {
        let WsMessage::Text(text) = message else { continue };
        let Ok(event) = serde_json::from_str::<CarrierInbound>(&text) else { continue };

        match event {
            CarrierInbound::Media { media } => {
                let Ok(ulaw) = BASE64.decode(media.payload) else { continue };
                let vad_update = orchestrator.push_audio_for_vad(&ulaw);
                if let Err(e) = orchestrator.push_audio_to_asr(&ulaw).await {
                    error!(error = %e, "ASR push failed fatally, ending call");
                    break;
                }

                if orchestrator.should_barge_in(&vad_update) {
                    debug!("barge-in detected, clearing carrier playback");
                    let _ = frame_tx.send(OutboundAudioFrame::Clear).await;
                }

                match orchestrator.poll_transcript().await {
                    Ok(Some(transcript)) => {
                        transcript_buffer = transcript.text;
                        // spec.md §4.9 step 2: the orchestrator's own
                        // turn-taking signal decides the turn boundary, not
                        // the ASR vendor's `is_final`/`stability` flags.
                        match orchestrator.turn_taking_status(&transcript_buffer, &vad_update) {
                            TurnTakingStatus::EndOfTurn => {
                                let final_transcript = Transcript {
                                    text: std::mem::take(&mut transcript_buffer),
                                    is_final: true,
                                    stability: transcript.stability,
                                };
                                let outcome = orchestrator.process_final_transcript(&final_transcript).await;
                                for utterance in &outcome.utterances {
                                    orchestrator.set_bot_speaking(utterance.label.clone());
                                    if let Ok(audio) = orchestrator.synthesize(utterance).await {
                                        if enqueue_tts_playback(&frame_tx, &audio).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                if outcome.call_should_end {
                                    let _ = frame_tx
                                        .send(OutboundAudioFrame::Mark { name: "finish".to_string() })
                                        .await;
                                    awaiting_finish_ack = true;
                                }
                            }
                            TurnTakingStatus::Backchannel | TurnTakingStatus::Continue => {}
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "ASR stream failed fatally, ending call");
                        break;
                    }
                }
            }
            CarrierInbound::Mark { mark } => match mark.name.as_str() {
                // The carrier has finished playing the queue up to this
                // mark; the bot is no longer speaking (spec.md §4.9 step 5).
                "continue" => orchestrator.set_bot_speaking(None),
                // The carrier has finished playing the closing utterance
                // queued after a terminal dialogue state; shut the call down
                // (spec.md §4.9 step 6).
                "finish" if awaiting_finish_ack => break,
                _ => {}
            },
            CarrierInbound::Stop => break,
            CarrierInbound::Connected | CarrierInbound::Start { .. } => {}
        }
    }

    if let Ok(csv) = orchestrator.conversation_log_csv() {
        debug!(call_sid = orchestrator.call_sid(), bytes = csv.len(), "conversation log ready for export");
    }

    drop(frame_tx);
    let _ = writer.await;
}

async fn await_stream_start(ws_rx: &mut futures::stream::SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(message)) = ws_rx.next().await {
        let WsMessage::Text(text) = message else { continue };
        if let Ok(CarrierInbound::Start { stream_sid }) = serde_json::from_str::<CarrierInbound>(&text) {
            return Some(stream_sid);
        }
    }
    None
}

type CarrierOrchestrator = SessionOrchestrator<crate::asr::NullAsr, OpenRouterClient, crate::tts::NullTtsVendor, MockReservationBackend>;

fn build_orchestrator(state: &ServerState, call_sid: String) -> CarrierOrchestrator {
    SessionOrchestrator::new(
        call_sid,
        crate::asr::NullAsr::default(),
        Arc::clone(&state.llm),
        crate::tts::NullTtsVendor,
        state.config.tts.cache_dir.clone(),
        Arc::new(MockReservationBackend::default()),
        state.nlg.clone(),
        state.config.vad.clone().into(),
        Arc::clone(&state.clock),
    )
}
