//! Per-call session orchestrator (spec.md §4.9, §5).
//!
//! Owns every other component exclusively for the lifetime of one phone
//! call: the [`crate::dst::DialogueStateTracker`], [`crate::vad::VolumeVad`],
//! the ASR/LLM/TTS vendor clients, and the [`crate::persistence::ConversationLogger`].
//! No other task ever touches these; the carrier WebSocket handler only
//! ever sends audio in and receives synthesized audio out through channels
//! this module owns. Grounded on
//! `examples/original_source/src/bridge/dialog_bridge.py`'s `DialogBridge`:
//! the barge-in allow-list/speech-chunk-count gate, the implicit-then-
//! explicit confirmation sequencing, and the `awaiting_final_confirmation`
//! bookkeeping all follow that source, adapted onto this crate's DST state
//! machine instead of the original's scene stack.

pub mod workers;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::asr::{AsrStream, RetryingAsr, Transcript};
use crate::clock::Clock;
use crate::dst::{DialogueState, DialogueStateTracker, DstSnapshot, Intent, NluOutcome, Slot};
use crate::error::HanasuError;
use crate::llm::LlmClient;
use crate::nlg::{FallbackKind, TemplateNlg};
use crate::nlu::StreamingNlu;
use crate::persistence::{ConversationLogger, ReservationBackend, ReservationOutcome, Speaker};
use crate::tts::{SynthesizedAudio, TtsBridge, TtsVendor};
use crate::vad::{VadUpdate, VolumeVad};

/// TTS cache labels treated as short confirmation utterances; while one of
/// these is playing, a barge-in is honored immediately rather than waiting
/// for `slow_end` (spec.md §4.9's barge-in allow-list).
const BARGE_IN_ALLOWED_LABELS: &[&str] =
    &["DATE_1", "TIME_1", "N_PERSON_1", "NAME_1", "DATE_2", "TIME_2", "N_PERSON_2", "NAME_2"];

/// Minimum number of speech-positive VAD windows observed before a barge-in
/// is honored, matching `len(self.streaming_vad.speech_chunks) > 5`.
const BARGE_IN_SPEECH_CHUNK_THRESHOLD: u64 = 5;

/// spec.md §4.9 step 2's turn-taking signal: computed fresh from the
/// transcript-so-far and the current VAD update, not the ASR vendor's own
/// `is_final`/`stability` flags (those are a vendor stability hint, not the
/// orchestrator's turn-boundary decision).
///
/// `EndOfTurn` iff (terminal-form ∧ fast_end) ∨ (newly-filled-slot ∧
/// fast_end) ∨ (slow_end ∧ non-empty transcript); `Backchannel` iff
/// (new-entity ∧ fast_end); otherwise `Continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTakingStatus {
    Continue,
    Backchannel,
    EndOfTurn,
}

/// One utterance the orchestrator wants spoken to the caller, with the TTS
/// cache label to check first (if any).
#[derive(Debug, Clone)]
pub struct PendingUtterance {
    pub text: String,
    pub label: Option<String>,
}

impl PendingUtterance {
    fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), label: None }
    }

    fn labeled(question: &str, label: &str) -> Self {
        Self { text: question.to_string(), label: Some(label.to_string()) }
    }
}

/// Everything the session produced on one ASR-final turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub utterances: Vec<PendingUtterance>,
    pub call_should_end: bool,
}

fn intent_from_llm_label(label: &str) -> Intent {
    match label {
        "new_reservation" => Intent::NewReservation,
        "confirm_reservation" => Intent::ConfirmReservation,
        "cancel_reservation" => Intent::CancelReservation,
        "change_reservation" => Intent::ChangeReservation,
        "ask_about_store" => Intent::AskAboutStore,
        "yes" => Intent::Yes,
        "no" => Intent::No,
        _ => Intent::Other,
    }
}

/// Owns the full per-call pipeline. Generic over the vendor clients so
/// production wiring and test fakes share one orchestrator implementation.
pub struct SessionOrchestrator<A: AsrStream, L: LlmClient, V: TtsVendor, R: ReservationBackend> {
    call_sid: String,
    dst: DialogueStateTracker,
    nlu: StreamingNlu,
    nlg: TemplateNlg,
    vad: VolumeVad,
    asr: RetryingAsr<A>,
    llm: Arc<L>,
    tts: TtsBridge<V>,
    reservations: Arc<R>,
    logger: ConversationLogger,
    clock: Arc<dyn Clock>,
    awaiting_final_confirmation: bool,
    bot_speaking_label: Option<String>,
}

impl<A: AsrStream, L: LlmClient, V: TtsVendor, R: ReservationBackend> SessionOrchestrator<A, L, V, R> {
    pub fn new(
        call_sid: String,
        asr: A,
        llm: Arc<L>,
        tts_vendor: V,
        tts_cache_dir: std::path::PathBuf,
        reservations: Arc<R>,
        nlg: TemplateNlg,
        vad_config: crate::vad::VadConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            call_sid: call_sid.clone(),
            dst: DialogueStateTracker::new(),
            nlu: StreamingNlu::new(Slot::ALL.to_vec()),
            nlg,
            vad: VolumeVad::new(vad_config),
            asr: RetryingAsr::new(asr),
            llm,
            tts: TtsBridge::new(tts_cache_dir, tts_vendor),
            reservations,
            logger: ConversationLogger::new(call_sid),
            clock,
            awaiting_final_confirmation: false,
            bot_speaking_label: None,
        }
    }

    /// The greeting utterance to enqueue as soon as the carrier `start`
    /// event arrives.
    pub fn initial_utterance(&mut self) -> PendingUtterance {
        let text = self.nlg.initial_utterance().to_string();
        self.logger.log(self.now(), Speaker::Bot, text.clone(), None);
        PendingUtterance::labeled(&text, "INITIAL")
    }

    pub fn set_bot_speaking(&mut self, label: Option<String>) {
        self.bot_speaking_label = label.clone();
        self.asr.set_bot_speaking(label.is_some());
    }

    pub async fn push_audio_to_asr(&mut self, ulaw_chunk: &[u8]) -> Result<(), HanasuError> {
        self.asr.push_audio(ulaw_chunk).await
    }

    pub async fn poll_transcript(&mut self) -> Result<Option<Transcript>, HanasuError> {
        self.asr.next_transcript().await
    }

    /// Feed one chunk of carrier audio to the VAD, returning an update the
    /// carrier handler uses to decide whether to honor a barge-in.
    pub fn push_audio_for_vad(&mut self, ulaw_chunk: &[u8]) -> VadUpdate {
        self.vad.push_pcm_chunk(&crate::audio::decode(ulaw_chunk))
    }

    /// Whether the caller's current speech should interrupt bot playback,
    /// per the allow-list/speech-chunk-count gate.
    pub fn should_barge_in(&self, vad_update: &VadUpdate) -> bool {
        let Some(label) = &self.bot_speaking_label else { return false };
        if !BARGE_IN_ALLOWED_LABELS.contains(&label.as_str()) {
            return false;
        }
        vad_update.is_speech && self.vad.speech_window_count() > BARGE_IN_SPEECH_CHUNK_THRESHOLD
    }

    /// Push an interim transcript update into the streaming NLU; does not
    /// advance the DST (spec.md §4.4b runs on every interim frame, the turn
    /// boundary in §4.9 only advances on a final transcript).
    pub fn observe_interim(&mut self, transcript: &str) {
        self.nlu.process(transcript, &*self.clock);
    }

    /// spec.md §4.9 step 2: combine this chunk's VAD update with the
    /// streaming NLU's read of the transcript-so-far to decide whether the
    /// caller's turn is over. `StreamingNlu::process` re-derives its status
    /// entirely from `transcript_text` on every call, so calling it here and
    /// again inside `process_final_transcript` on the same text is
    /// idempotent, not double-counting.
    pub fn turn_taking_status(&mut self, transcript_text: &str, vad_update: &VadUpdate) -> TurnTakingStatus {
        let status = self.nlu.process(transcript_text, &*self.clock);
        let non_empty = !transcript_text.trim().is_empty();

        if (status.got_terminal_forms && vad_update.fast_end)
            || (status.is_slot_filled && vad_update.fast_end)
            || (vad_update.slow_end && non_empty)
        {
            TurnTakingStatus::EndOfTurn
        } else if status.got_entities && vad_update.fast_end {
            TurnTakingStatus::Backchannel
        } else {
            TurnTakingStatus::Continue
        }
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.today().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }

    /// Process a finalized ASR transcript: classify intent, advance the DST,
    /// and produce the utterances for this turn.
    pub async fn process_final_transcript(&mut self, transcript: &Transcript) -> TurnOutcome {
        self.logger.log(self.now(), Speaker::Customer, transcript.text.clone(), Some(&self.dst.get_current_state()));
        let nlu_status = self.nlu.process(&transcript.text, &*self.clock);

        // Explicit confirmation shortcut: once the bot has asked "よろしい
        // でしょうか？", a bare "はい" closes the call without going through
        // intent classification, matching `awaiting_final_confirmation` in
        // the original.
        if self.awaiting_final_confirmation && transcript.text.contains("はい") {
            return self.confirm_and_close().await;
        }

        let outcome = self.classify_turn(&transcript.text, &nlu_status).await;
        let previous_state = self.dst.dialogue_state();
        let new_state = self.dst.update_state(&outcome);
        info!(?new_state, "dialogue state advanced");

        if previous_state == DialogueState::WaitingConfirmation && outcome.intent == Some(Intent::No) {
            self.awaiting_final_confirmation = false;
            let intent = self.dst.current_intent();
            let text = intent
                .and_then(|i| self.nlg.get_explicit_confirmation(i, "no"))
                .unwrap_or("申し訳ございません。もう一度内容をお伺いします。")
                .to_string();
            return self.finish_turn(vec![PendingUtterance::plain(text)], false);
        }

        let snapshot = self.dst.get_current_state();
        let utterances = self.respond_to(new_state, &snapshot).await;
        let call_should_end = matches!(new_state, DialogueState::Complete | DialogueState::Cancelled);
        self.finish_turn(utterances, call_should_end)
    }

    async fn respond_to(&mut self, new_state: DialogueState, snapshot: &DstSnapshot) -> Vec<PendingUtterance> {
        let mut utterances = Vec::new();

        match new_state {
            DialogueState::IntentChanged => {
                if let Some(intent) = snapshot.intent {
                    if let Some(text) = self.nlg.get_scene_initial_response(intent) {
                        utterances.push(PendingUtterance::plain(text));
                    }
                    if intent == Intent::AskAboutStore {
                        utterances.push(self.answer_faq(snapshot).await);
                    } else if let Some((question, label)) =
                        snapshot.missing_slots.first().and_then(|slot| self.nlg.get_next_question(intent, *slot))
                    {
                        utterances.push(PendingUtterance::labeled(question, label));
                    }
                }
            }
            DialogueState::Continue => {
                if let Some(confirmation) = self.implicit_confirmation(snapshot) {
                    utterances.push(PendingUtterance::plain(confirmation));
                }
                match snapshot.intent {
                    Some(Intent::AskAboutStore) => utterances.push(self.answer_faq(snapshot).await),
                    Some(intent) => {
                        if let Some((question, label)) =
                            snapshot.missing_slots.first().and_then(|slot| self.nlg.get_next_question(intent, *slot))
                        {
                            utterances.push(PendingUtterance::labeled(question, label));
                        }
                    }
                    None => {}
                }
            }
            DialogueState::SlotsFilled => {
                if let Some(confirmation) = self.implicit_confirmation(snapshot) {
                    utterances.push(PendingUtterance::plain(confirmation));
                }
                if let Some(intent) = snapshot.intent {
                    utterances.push(self.present_outcome(intent, snapshot).await);
                    self.dst.enter_waiting_confirmation();
                    // cancel_reservation's "complete" response already asks
                    // the caller to confirm; new_reservation's does not, so
                    // only it gets the generic closing question appended.
                    if intent == Intent::NewReservation {
                        utterances.push(PendingUtterance::plain("ご予約を確定してもよろしいでしょうか？"));
                    }
                    self.awaiting_final_confirmation = true;
                }
            }
            DialogueState::Correction => {
                if let (Some(intent), Some(slot)) = (snapshot.intent, snapshot.correction_target) {
                    if let Some((question, label)) = self.nlg.get_correction_prompt(intent, slot) {
                        utterances.push(PendingUtterance::labeled(question, label));
                    }
                }
            }
            DialogueState::Complete => {
                if let Some(intent) = snapshot.intent {
                    if let Some(text) = self.nlg.get_scene_complete_response(intent) {
                        utterances.push(PendingUtterance::plain(text));
                    }
                }
            }
            DialogueState::Cancelled => {
                if let Some(intent) = snapshot.intent {
                    if let Some(text) = self.nlg.get_explicit_confirmation(intent, "no") {
                        utterances.push(PendingUtterance::plain(text));
                    }
                }
            }
            DialogueState::Error => {
                let kind = if self.dst.consecutive_unrecognized_count() >= 2 {
                    FallbackKind::InvalidIntent
                } else {
                    FallbackKind::Default
                };
                utterances.push(PendingUtterance::plain(self.nlg.get_fallback_message(kind)));
                self.dst.recover_to_waiting_confirmation();
            }
            DialogueState::WaitingConfirmation | DialogueState::Start | DialogueState::Fallback => {}
        }

        utterances
    }

    /// Close the call on an explicit "はい" while awaiting final
    /// confirmation: actually commits the reservation/cancellation and
    /// speaks the closing line.
    async fn confirm_and_close(&mut self) -> TurnOutcome {
        self.awaiting_final_confirmation = false;
        let snapshot = self.dst.get_current_state();
        let Some(intent) = snapshot.intent else {
            return self.finish_turn(vec![PendingUtterance::plain("ありがとうございました。")], true);
        };

        if intent == Intent::CancelReservation {
            let name = snapshot.slots.get(&Slot::Name).cloned().unwrap_or_default();
            let _ = self.reservations.cancel_reservation(&name).await;
        }

        self.dst.update_state(&NluOutcome { intent: Some(Intent::Confirm), slots: HashMap::new(), hearing_item: None });
        let text = self
            .nlg
            .get_explicit_confirmation(intent, "yes")
            .unwrap_or("ありがとうございました。")
            .to_string();
        self.finish_turn(vec![PendingUtterance::plain(text)], true)
    }

    /// SLOTS_FILLED response: looks up/creates the reservation and renders
    /// the scene's `complete`/`holiday`/`failed`/`not_found` template.
    async fn present_outcome(&mut self, intent: Intent, snapshot: &DstSnapshot) -> PendingUtterance {
        let response_type = match intent {
            Intent::NewReservation => {
                let date = snapshot.slots.get(&Slot::Date).cloned().unwrap_or_default();
                let time = snapshot.slots.get(&Slot::Time).cloned().unwrap_or_default();
                let name = snapshot.slots.get(&Slot::Name).cloned().unwrap_or_default();
                let n_person: u32 = snapshot
                    .slots
                    .get(&Slot::NPerson)
                    .and_then(|v| v.trim_end_matches('人').parse().ok())
                    .unwrap_or(0);
                match self.reservations.create_reservation(&name, &date, &time, n_person).await {
                    ReservationOutcome::Success { .. } => "complete",
                    ReservationOutcome::Holiday => "holiday",
                    ReservationOutcome::Full | ReservationOutcome::InvalidTime => "failed",
                    ReservationOutcome::NotFound => "failed",
                }
            }
            Intent::CancelReservation => {
                let name = snapshot.slots.get(&Slot::Name).cloned().unwrap_or_default();
                match self.reservations.find_reservation(&name).await {
                    Some(_) => "complete",
                    None => "not_found",
                }
            }
            _ => "complete",
        };

        let text = self
            .nlg
            .get_intent_response(intent, &snapshot.slots, response_type)
            .unwrap_or_else(|| self.nlg.get_fallback_message(FallbackKind::Default).to_string());
        PendingUtterance::plain(text)
    }

    async fn answer_faq(&self, snapshot: &DstSnapshot) -> PendingUtterance {
        let question = snapshot.slots.values().next().cloned().unwrap_or_default();
        match self.llm.answer_faq(&question).await {
            Ok(answer) if !answer.trim().is_empty() => PendingUtterance::plain(answer),
            _ => {
                warn!("FAQ answer was empty or failed, using invalid-intent fallback");
                PendingUtterance::plain(self.nlg.get_fallback_message(FallbackKind::InvalidIntent))
            }
        }
    }

    fn implicit_confirmation(&self, snapshot: &DstSnapshot) -> Option<String> {
        let intent = snapshot.intent?;
        if snapshot.updated_slots.is_empty() {
            return None;
        }
        let updated: HashMap<Slot, String> = snapshot
            .updated_slots
            .iter()
            .filter_map(|s| snapshot.slots.get(s).map(|v| (*s, v.clone())))
            .collect();
        self.nlg.get_implicit_confirmation(intent, &updated)
    }

    async fn classify_turn(&self, text: &str, nlu_status: &crate::nlu::NluStatus) -> NluOutcome {
        let slots = nlu_status.states.clone();

        let intent = match self.llm.classify_intent(text).await {
            Ok(classification) => Some(intent_from_llm_label(&classification.intent)),
            Err(_) => {
                warn!("intent classification failed, treating turn as slot-only");
                None
            }
        };

        let admissible_intent = intent.filter(|i| self.dst.can_transition_to(*i));
        NluOutcome { intent: admissible_intent, slots, hearing_item: nlu_status.hearing_item }
    }

    fn finish_turn(&mut self, utterances: Vec<PendingUtterance>, call_should_end: bool) -> TurnOutcome {
        for u in &utterances {
            self.logger.log(self.now(), Speaker::Bot, u.text.clone(), Some(&self.dst.get_current_state()));
        }
        TurnOutcome { utterances, call_should_end }
    }

    pub async fn synthesize(&mut self, utterance: &PendingUtterance) -> Result<SynthesizedAudio, HanasuError> {
        self.tts.synthesize(&utterance.text, utterance.label.as_deref()).await
    }

    pub fn conversation_log_csv(&self) -> anyhow::Result<String> {
        self.logger.to_csv()
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }
}
