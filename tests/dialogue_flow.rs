//! End-to-end reservation dialogue scenarios (spec.md §8), driving
//! [`hanasu::session::SessionOrchestrator`] directly against fake vendor
//! clients the way `examples/original_source`'s scripted conversation
//! fixtures exercise `DialogBridge`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hanasu::asr::{AsrStream, Transcript};
use hanasu::clock::FixedClock;
use hanasu::error::HanasuError;
use hanasu::llm::{IntentClassification, LlmClient};
use hanasu::nlg::templates::TemplateTable;
use hanasu::nlg::TemplateNlg;
use hanasu::persistence::MockReservationBackend;
use hanasu::session::SessionOrchestrator;
use hanasu::tts::TtsVendor;
use hanasu::vad::VadConfig;

struct NoopAsr;
#[async_trait]
impl AsrStream for NoopAsr {
    async fn push_audio(&mut self, _chunk: &[u8]) -> Result<(), HanasuError> {
        Ok(())
    }
    async fn next_transcript(&mut self) -> Result<Option<Transcript>, HanasuError> {
        Ok(None)
    }
    fn set_bot_speaking(&mut self, _speaking: bool) {}
}

/// Classifies every turn's intent from a fixed lookup table keyed on the
/// transcript text, standing in for a real vendor's JSON response.
struct ScriptedIntentLlm {
    by_utterance: HashMap<&'static str, &'static str>,
}

#[async_trait]
impl LlmClient for ScriptedIntentLlm {
    async fn classify_intent(&self, utterance: &str) -> Result<IntentClassification, HanasuError> {
        let intent = self.by_utterance.get(utterance).copied().unwrap_or("other");
        Ok(IntentClassification { intent: intent.to_string() })
    }

    async fn answer_faq(&self, _question: &str) -> Result<String, HanasuError> {
        Ok("ランチの営業時間は11:00から15:00です。".to_string())
    }
}

struct SilentTtsVendor;
#[async_trait]
impl TtsVendor for SilentTtsVendor {
    async fn synthesize(&self, _text: &str) -> Result<Vec<i16>, HanasuError> {
        Ok(vec![0; 160])
    }
}

fn load_nlg() -> TemplateNlg {
    let table = TemplateTable::load(std::path::Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/dialogue.json")))
        .expect("bundled templates load");
    TemplateNlg::new(Arc::new(table))
}

fn orchestrator(
    script: HashMap<&'static str, &'static str>,
) -> SessionOrchestrator<NoopAsr, ScriptedIntentLlm, SilentTtsVendor, MockReservationBackend> {
    SessionOrchestrator::new(
        "CA_INTEGRATION".to_string(),
        NoopAsr,
        Arc::new(ScriptedIntentLlm { by_utterance: script }),
        SilentTtsVendor,
        std::path::PathBuf::from("/nonexistent/tts_cache"),
        Arc::new(MockReservationBackend::default()),
        load_nlg(),
        VadConfig::default(),
        Arc::new(FixedClock::reference_today()),
    )
}

fn transcript(text: &str) -> Transcript {
    Transcript { text: text.to_string(), is_final: true, stability: 0.95 }
}

#[tokio::test]
async fn full_new_reservation_call_reaches_final_confirmation_and_closes() {
    let script = HashMap::from([("予約をお願いします", "new_reservation")]);
    let mut session = orchestrator(script);

    let _ = session.initial_utterance();

    let opening = session.process_final_transcript(&transcript("予約をお願いします")).await;
    assert!(!opening.call_should_end);
    assert!(opening.utterances.iter().any(|u| u.text.contains("ご予約ですね")));
    assert!(opening.utterances.iter().any(|u| u.label.as_deref() == Some("DATE_1")));

    let date_turn = session.process_final_transcript(&transcript("明日の朝10時に6人で山田です")).await;
    assert!(!date_turn.call_should_end);
    // All four slots land in one utterance, so the turn should land on
    // slots-filled and ask the final confirmation question.
    assert!(date_turn.utterances.iter().any(|u| u.text.contains("よろしいでしょうか")));

    let closing = session.process_final_transcript(&transcript("はい")).await;
    assert!(closing.call_should_end);
    assert!(!closing.utterances.is_empty());

    let csv = session.conversation_log_csv().expect("csv export succeeds");
    assert!(csv.contains("予約をお願いします"));
    assert!(csv.contains("はい"));
}

#[tokio::test]
async fn unrecognized_turn_while_confirming_falls_back_without_crashing() {
    let script = HashMap::from([("予約をお願いします", "new_reservation")]);
    let mut session = orchestrator(script);

    session.process_final_transcript(&transcript("予約をお願いします")).await;
    session
        .process_final_transcript(&transcript("明日の朝10時に6人で山田です"))
        .await;

    let confused = session.process_final_transcript(&transcript("えーっと")).await;
    assert!(!confused.call_should_end);
    assert!(!confused.utterances.is_empty());
}

#[tokio::test]
async fn ask_about_store_answers_immediately_without_slot_collection() {
    let script = HashMap::from([("駐車場について教えてください", "ask_about_store")]);
    let mut session = orchestrator(script);

    let outcome = session.process_final_transcript(&transcript("駐車場について教えてください")).await;
    assert!(outcome.utterances.iter().any(|u| u.text.contains("営業時間")));
}
