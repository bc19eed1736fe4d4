//! Template-driven natural language generation (spec.md §4.5).
//!
//! Ported from
//! `examples/original_source/src/modules/dialogue/new_nlg.py`'s
//! `TemplateNLG`: scene-keyed lookups into a loaded template table, with
//! `.format()`-style placeholder substitution over the (already inverse-
//! normalized) slot display values.

pub mod templates;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::dst::{Intent, Slot};
use crate::nlu::inverse;
use templates::{LabeledPrompt, TemplateTable};

/// Which canned fallback utterance to use when a [`crate::error::HanasuError`]
/// surfaces to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    Default,
    ConversationError,
    InvalidIntent,
}

impl FallbackKind {
    fn key(&self) -> &'static str {
        match self {
            FallbackKind::Default => "default",
            FallbackKind::ConversationError => "conversation_error",
            FallbackKind::InvalidIntent => "invalid_intent",
        }
    }
}

fn intent_key(intent: Intent) -> &'static str {
    match intent {
        Intent::NewReservation => "new_reservation",
        Intent::ConfirmReservation => "confirm_reservation",
        Intent::CancelReservation => "cancel_reservation",
        Intent::ChangeReservation => "change_reservation",
        Intent::AskAboutStore => "ask_about_store",
        Intent::Yes => "yes",
        Intent::No => "no",
        Intent::Change => "change",
        Intent::Cancel => "cancel",
        Intent::Confirm => "confirm",
        Intent::Other => "other",
    }
}

fn slot_key(slot: Slot) -> &'static str {
    match slot {
        Slot::Name => "name",
        Slot::Date => "date",
        Slot::Time => "time",
        Slot::NPerson => "n_person",
    }
}

/// Join slot keys into a compound lookup key, in the fixed
/// date/time/n_person/name order the template table's
/// `implicit_confirmation` tables are keyed by (spec.md §4.5b).
fn compound_slots_key(slots: &[Slot]) -> String {
    const ORDER: [Slot; 4] = [Slot::Date, Slot::Time, Slot::NPerson, Slot::Name];
    ORDER
        .into_iter()
        .filter(|s| slots.contains(s))
        .map(slot_key)
        .collect::<Vec<_>>()
        .join("+")
}

/// Render `{date}`/`{time}`/... placeholders in `template` against `state`,
/// using speech-friendly (inverse-normalized) slot values. Unknown
/// placeholders are left untouched rather than erroring, since a template
/// referencing a slot the current scene never fills is an authoring bug,
/// not a runtime one.
fn format_with_state(template: &str, state: &HashMap<Slot, String>) -> String {
    let mut result = template.to_string();
    for slot in Slot::ALL {
        let placeholder = format!("{{{}}}", slot_key(slot));
        if result.contains(&placeholder) {
            let value = state.get(&slot).map(|v| inverse::format_entity(slot, v)).unwrap_or_default();
            result = result.replace(&placeholder, &value);
        }
    }
    result
}

/// Looks up and renders templates against the loaded [`TemplateTable`].
#[derive(Clone)]
pub struct TemplateNlg {
    templates: Arc<TemplateTable>,
}

impl TemplateNlg {
    pub fn new(templates: Arc<TemplateTable>) -> Self {
        Self { templates }
    }

    pub fn initial_utterance(&self) -> &str {
        &self.templates.common.initial_utterance
    }

    pub fn get_scene_initial_response(&self, intent: Intent) -> Option<&str> {
        let response = self.templates.common.scene_initial.get(intent_key(intent)).map(String::as_str);
        if let Some(r) = response {
            debug!(?intent, response = r, "scene initial response");
        }
        response
    }

    pub fn get_scene_complete_response(&self, intent: Intent) -> Option<&str> {
        self.templates.common.scene_complete.get(intent_key(intent)).map(String::as_str)
    }

    pub fn get_next_question(&self, intent: Intent, slot: Slot) -> Option<&LabeledPrompt> {
        self.templates.scenes.get(intent_key(intent))?.prompts.get(slot_key(slot))
    }

    /// Render `response_type` ("complete", "holiday", "failed", ...) against
    /// the current slot state.
    pub fn get_intent_response(&self, intent: Intent, state: &HashMap<Slot, String>, response_type: &str) -> Option<String> {
        let scene = self.templates.scenes.get(intent_key(intent))?;
        let template = scene.responses.get(response_type)?;
        Some(format_with_state(template, state))
    }

    pub fn get_implicit_confirmation(&self, intent: Intent, updated_slots: &HashMap<Slot, String>) -> Option<String> {
        if updated_slots.is_empty() {
            return None;
        }
        let scene = self.templates.scenes.get(intent_key(intent))?;

        let slot_list: Vec<Slot> = updated_slots.keys().copied().collect();
        let compound = compound_slots_key(&slot_list);
        if let Some(template) = scene.implicit_confirmation.get(&compound) {
            return Some(format_with_state(template, updated_slots));
        }

        if slot_list.len() == 1 {
            let slot = slot_list[0];
            if let Some(template) = scene.implicit_confirmation.get(slot_key(slot)) {
                return Some(format_with_state(template, updated_slots));
            }
        }

        None
    }

    /// "yes"/"no" -> the explicit confirmation utterance for that answer.
    pub fn get_explicit_confirmation(&self, intent: Intent, user_response: &str) -> Option<&str> {
        self.templates.scenes.get(intent_key(intent))?.confirm.get(user_response).map(String::as_str)
    }

    pub fn get_correction_prompt(&self, intent: Intent, slot: Slot) -> Option<&LabeledPrompt> {
        self.templates.scenes.get(intent_key(intent))?.correction.get(slot_key(slot))
    }

    pub fn get_fallback_message(&self, kind: FallbackKind) -> &str {
        self.templates
            .common
            .fallback
            .get(kind.key())
            .or_else(|| self.templates.common.fallback.get(FallbackKind::Default.key()))
            .map(String::as_str)
            .unwrap_or_else(|| {
                error!("fallback templates missing a default entry");
                "すみません、もう一度お願いします。"
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn nlg() -> TemplateNlg {
        let table = TemplateTable::load(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/dialogue.json"))).unwrap();
        TemplateNlg::new(Arc::new(table))
    }

    #[test]
    fn scene_initial_response_for_new_reservation() {
        let nlg = nlg();
        assert_eq!(nlg.get_scene_initial_response(Intent::NewReservation), Some("ご予約ですね。"));
    }

    #[test]
    fn next_question_returns_labeled_prompt() {
        let nlg = nlg();
        let (question, label) = nlg.get_next_question(Intent::NewReservation, Slot::Date).unwrap();
        assert!(question.contains("日付"));
        assert_eq!(label, "DATE_1");
    }

    #[test]
    fn intent_response_substitutes_all_slots() {
        let nlg = nlg();
        let mut state = HashMap::new();
        state.insert(Slot::Date, "11/02".to_string());
        state.insert(Slot::Time, "19:00".to_string());
        state.insert(Slot::NPerson, "3人".to_string());
        state.insert(Slot::Name, "山田".to_string());

        let response = nlg.get_intent_response(Intent::NewReservation, &state, "complete").unwrap();
        assert!(response.contains("11月2日"));
        assert!(response.contains("19時"));
        assert!(response.contains("3人"));
        assert!(response.contains("山田"));
    }

    #[test]
    fn implicit_confirmation_picks_compound_template_over_single() {
        let nlg = nlg();
        let mut updated = HashMap::new();
        updated.insert(Slot::Date, "11/02".to_string());
        updated.insert(Slot::Time, "19:00".to_string());
        let confirmation = nlg.get_implicit_confirmation(Intent::NewReservation, &updated).unwrap();
        assert_eq!(confirmation, "11月2日の19時ですね。");
    }

    #[test]
    fn implicit_confirmation_single_slot() {
        let nlg = nlg();
        let mut updated = HashMap::new();
        updated.insert(Slot::Name, "佐藤".to_string());
        let confirmation = nlg.get_implicit_confirmation(Intent::NewReservation, &updated).unwrap();
        assert_eq!(confirmation, "佐藤様ですね。");
    }

    #[test]
    fn fallback_message_falls_back_to_default_for_unknown_kind() {
        let nlg = nlg();
        assert!(!nlg.get_fallback_message(FallbackKind::InvalidIntent).is_empty());
    }
}
