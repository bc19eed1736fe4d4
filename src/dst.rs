//! Dialogue State Tracker (C6)
//!
//! Owns `(intent, slot map, previous slot map, dialogue_state,
//! correction_target)` for one call. Mutated by exactly one caller — the
//! session orchestrator — via [`DialogueStateTracker::update_state`]; every
//! other component only ever sees an immutable [`DstSnapshot`].
//!
//! Grounded on `examples/original_source/src/modules/dialogue/{dst,new_dst}.py`:
//! the flat (non-nested) state machine, the merge-never-clear slot
//! semantics, and the WAITING_CONFIRMATION local-intent overrides all
//! follow that source. Scene nesting (`state_stack`) is deliberately not
//! carried forward — see `SPEC_FULL.md`'s Open Question decisions.

use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One of the four pieces of information a reservation scene needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Name,
    Date,
    Time,
    NPerson,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Name, Slot::Date, Slot::Time, Slot::NPerson];

    /// The Japanese slot label used in templates and NLU entity mapping.
    pub fn label_ja(&self) -> &'static str {
        match self {
            Slot::Name => "名前",
            Slot::Date => "日付",
            Slot::Time => "時間",
            Slot::NPerson => "人数",
        }
    }

    pub fn from_label_ja(label: &str) -> Option<Slot> {
        match label {
            "名前" => Some(Slot::Name),
            "日付" => Some(Slot::Date),
            "時間" => Some(Slot::Time),
            "人数" => Some(Slot::NPerson),
            _ => None,
        }
    }
}

/// The caller's goal for the current scene, or a local (confirmation-only) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    NewReservation,
    ConfirmReservation,
    CancelReservation,
    ChangeReservation,
    AskAboutStore,
    Yes,
    No,
    Change,
    Cancel,
    Confirm,
    Other,
}

impl Intent {
    /// Global intents may start (or restart) a scene from any state.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Intent::NewReservation
                | Intent::ConfirmReservation
                | Intent::CancelReservation
                | Intent::ChangeReservation
                | Intent::AskAboutStore
        )
    }

    /// Local intents are only meaningful while WAITING_CONFIRMATION.
    pub fn is_local(&self) -> bool {
        !self.is_global()
    }
}

/// The dialogue's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    Start,
    Continue,
    SlotsFilled,
    WaitingConfirmation,
    Correction,
    Complete,
    Cancelled,
    Error,
    IntentChanged,
    Fallback,
}

impl DialogueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DialogueState::Complete | DialogueState::Cancelled)
    }
}

/// What the NLU/LLM layer hands the DST on a finalized turn.
#[derive(Debug, Clone, Default)]
pub struct NluOutcome {
    pub intent: Option<Intent>,
    pub slots: HashMap<Slot, String>,
    /// The slot the caller's wording targets for correction, if any (see §4.4 `hearing_item`).
    pub hearing_item: Option<Slot>,
}

/// Immutable value-type snapshot returned by `get_current_state`. Never
/// shared by reference between turns — every turn gets its own copy.
#[derive(Debug, Clone)]
pub struct DstSnapshot {
    pub intent: Option<Intent>,
    pub slots: HashMap<Slot, String>,
    pub previous_slots: HashMap<Slot, String>,
    pub dialogue_state: DialogueState,
    pub missing_slots: Vec<Slot>,
    pub updated_slots: Vec<Slot>,
    pub required_slots: Vec<Slot>,
    pub optional_slots: Vec<Slot>,
    pub correction_target: Option<Slot>,
}

/// Required slots for each intent's scene. `ConfirmReservation` is
/// read-only lookup territory (no slot filling) per spec.md; only the
/// three scenes with a `function.response.COMPLETE` in
/// `examples/original_source/.../utils/_template.py` carry required slots.
fn required_slots(intent: Intent) -> Vec<Slot> {
    match intent {
        Intent::NewReservation => vec![Slot::Date, Slot::Time, Slot::NPerson, Slot::Name],
        Intent::CancelReservation => vec![Slot::Name],
        Intent::ConfirmReservation | Intent::AskAboutStore => Vec::new(),
        _ => Vec::new(),
    }
}

fn optional_slots(intent: Intent) -> Vec<Slot> {
    match intent {
        Intent::CancelReservation => vec![Slot::Date, Slot::NPerson],
        _ => Vec::new(),
    }
}

/// How many consecutive unrecognized intents put the DST into the
/// "repeated unrecognized" fallback per spec.md §4.9.
const REPEATED_UNRECOGNIZED_THRESHOLD: u32 = 2;

pub struct DialogueStateTracker {
    current_intent: Option<Intent>,
    state: HashMap<Slot, String>,
    previous_state: HashMap<Slot, String>,
    dialogue_state: DialogueState,
    correction_target: Option<Slot>,
    consecutive_unrecognized: u32,
}

impl Default for DialogueStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueStateTracker {
    pub fn new() -> Self {
        Self {
            current_intent: None,
            state: HashMap::new(),
            previous_state: HashMap::new(),
            dialogue_state: DialogueState::Start,
            correction_target: None,
            consecutive_unrecognized: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
        info!("DST reset");
    }

    fn missing_slots(&self) -> Vec<Slot> {
        if self.dialogue_state == DialogueState::Correction {
            if let Some(slot) = self.correction_target {
                return vec![slot];
            }
        }
        let Some(intent) = self.current_intent else { return Vec::new() };
        required_slots(intent)
            .into_iter()
            .filter(|s| !self.state.get(s).map(|v| !v.is_empty()).unwrap_or(false))
            .collect()
    }

    fn updated_slots(&self) -> Vec<Slot> {
        let mut updated: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|s| {
                let cur = self.state.get(s).map(String::as_str).unwrap_or("");
                if cur.is_empty() {
                    return false;
                }
                let prev = self.previous_state.get(s).map(String::as_str).unwrap_or("");
                cur != prev
            })
            .collect();
        updated.sort();
        updated
    }

    /// Merge non-empty slot values into state. A slot, once non-empty, may
    /// only be overwritten by a new non-empty value for the same key —
    /// never cleared implicitly (spec.md §3 invariant).
    fn merge_slots(&mut self, slots: &HashMap<Slot, String>) {
        for (slot, value) in slots {
            if !value.is_empty() {
                self.state.insert(*slot, value.clone());
                debug!(?slot, value, "slot updated");
            }
        }
    }

    /// Pure query: is `intent` admissible as the next routing target from
    /// the current dialogue state?
    pub fn can_transition_to(&self, intent: Intent) -> bool {
        if self.dialogue_state == DialogueState::WaitingConfirmation {
            return intent.is_local() || (intent.is_global() && Some(intent) != self.current_intent);
        }
        if intent.is_local() {
            return false;
        }
        true
    }

    /// Advance the dialogue state machine by one turn. See spec.md §4.6 for
    /// the full transition table.
    pub fn update_state(&mut self, outcome: &NluOutcome) -> DialogueState {
        self.previous_state = self.state.clone();
        self.merge_slots(&outcome.slots);

        // Step 3: local-intent overrides while waiting on confirmation.
        if self.dialogue_state == DialogueState::WaitingConfirmation {
            if let Some(intent) = outcome.intent {
                match intent {
                    Intent::Confirm => {
                        self.dialogue_state = DialogueState::Complete;
                        self.consecutive_unrecognized = 0;
                        return self.dialogue_state;
                    }
                    Intent::Change => {
                        self.dialogue_state = DialogueState::Correction;
                        self.consecutive_unrecognized = 0;
                        return self.dialogue_state;
                    }
                    Intent::Cancel => {
                        self.dialogue_state = DialogueState::Cancelled;
                        self.consecutive_unrecognized = 0;
                        return self.dialogue_state;
                    }
                    Intent::Yes if self.current_intent == Some(Intent::CancelReservation) => {
                        self.dialogue_state = DialogueState::Complete;
                        self.consecutive_unrecognized = 0;
                        return self.dialogue_state;
                    }
                    Intent::No => {
                        self.dialogue_state = DialogueState::WaitingConfirmation;
                        self.consecutive_unrecognized = 0;
                        return self.dialogue_state;
                    }
                    _ => {}
                }
            }

            // Tie-break: a slot-like utterance that matched no local intent
            // is interpreted as a correction.
            let changed = self.updated_slots();
            if let Some(&slot) = changed.first() {
                self.correction_target = Some(slot);
                self.dialogue_state = DialogueState::Correction;
                self.consecutive_unrecognized = 0;
                return self.dialogue_state;
            }
            if let Some(slot) = outcome.hearing_item {
                self.correction_target = Some(slot);
                self.dialogue_state = DialogueState::Correction;
                self.consecutive_unrecognized = 0;
                return self.dialogue_state;
            }

            self.consecutive_unrecognized += 1;
            if self.consecutive_unrecognized >= REPEATED_UNRECOGNIZED_THRESHOLD {
                warn!("repeated unrecognized intent while waiting on confirmation");
            }
            self.dialogue_state = DialogueState::Error;
            return self.dialogue_state;
        }

        // Global intent change from any other state.
        if let Some(intent) = outcome.intent {
            if intent.is_global() && Some(intent) != self.current_intent {
                info!(?intent, "intent changed");
                self.current_intent = Some(intent);
                self.dialogue_state = DialogueState::IntentChanged;
                self.consecutive_unrecognized = 0;
                return self.dialogue_state;
            }
        }

        // Step 4: correction in progress.
        if self.dialogue_state == DialogueState::Correction {
            if let Some(slot) = self.correction_target {
                if self.state.get(&slot).map(|v| !v.is_empty()).unwrap_or(false) {
                    self.dialogue_state = DialogueState::WaitingConfirmation;
                    self.correction_target = None;
                }
            }
            return self.dialogue_state;
        }

        // Step 5/6: recompute from required/missing slots, or error out.
        if self.current_intent.is_none() {
            if outcome.intent.is_none() {
                self.dialogue_state = DialogueState::Error;
            }
            return self.dialogue_state;
        }

        let required = required_slots(self.current_intent.unwrap());
        let missing = self.missing_slots();
        self.dialogue_state = if !required.is_empty() && missing.is_empty() {
            DialogueState::SlotsFilled
        } else {
            DialogueState::Continue
        };
        self.dialogue_state
    }

    /// Move from SLOTS_FILLED into WAITING_CONFIRMATION once NLG has issued
    /// the confirmation prompt. The orchestrator drives this transition
    /// explicitly rather than inferring it from a turn, since it happens
    /// immediately after NLG runs rather than on the next NLU result.
    pub fn enter_waiting_confirmation(&mut self) {
        if self.dialogue_state == DialogueState::SlotsFilled {
            self.dialogue_state = DialogueState::WaitingConfirmation;
        }
    }

    pub fn set_correction_target(&mut self, slot: Slot) {
        self.correction_target = Some(slot);
        self.dialogue_state = DialogueState::Correction;
    }

    /// After the orchestrator has emitted the ERROR fallback utterance via
    /// NLG, it calls this to return the tracker to WAITING_CONFIRMATION —
    /// matching the diagram's `ERROR ──▶ WAITING_CONFIRMATION (after
    /// fallback utterance)` edge. A no-op outside ERROR.
    pub fn recover_to_waiting_confirmation(&mut self) {
        if self.dialogue_state == DialogueState::Error {
            self.dialogue_state = DialogueState::WaitingConfirmation;
        }
    }

    /// How many unrecognized turns have occurred back-to-back while
    /// WAITING_CONFIRMATION. The orchestrator uses this to pick between the
    /// `INVALID_INTENT` and `DEFAULT` fallback kinds (spec.md §4.9).
    pub fn consecutive_unrecognized_count(&self) -> u32 {
        self.consecutive_unrecognized
    }

    pub fn current_intent(&self) -> Option<Intent> {
        self.current_intent
    }

    pub fn dialogue_state(&self) -> DialogueState {
        self.dialogue_state
    }

    pub fn get_current_state(&self) -> DstSnapshot {
        DstSnapshot {
            intent: self.current_intent,
            slots: self.state.clone(),
            previous_slots: self.previous_state.clone(),
            dialogue_state: self.dialogue_state,
            missing_slots: self.missing_slots(),
            updated_slots: self.updated_slots(),
            required_slots: self.current_intent.map(required_slots).unwrap_or_default(),
            optional_slots: self.current_intent.map(optional_slots).unwrap_or_default(),
            correction_target: self.correction_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(pairs: &[(Slot, &str)]) -> HashMap<Slot, String> {
        pairs.iter().map(|(s, v)| (*s, v.to_string())).collect()
    }

    #[test]
    fn new_reservation_full_happy_path() {
        let mut dst = DialogueStateTracker::new();

        let s1 = dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: HashMap::new(),
            hearing_item: None,
        });
        assert_eq!(s1, DialogueState::IntentChanged);

        let s2 = dst.update_state(&NluOutcome {
            intent: None,
            slots: slots(&[
                (Slot::Date, "11/02"),
                (Slot::Time, "19:00"),
                (Slot::NPerson, "3"),
                (Slot::Name, "山田"),
            ]),
            hearing_item: None,
        });
        assert_eq!(s2, DialogueState::SlotsFilled);

        dst.enter_waiting_confirmation();
        assert_eq!(dst.dialogue_state(), DialogueState::WaitingConfirmation);

        let s3 = dst.update_state(&NluOutcome {
            intent: Some(Intent::Confirm),
            slots: HashMap::new(),
            hearing_item: None,
        });
        assert_eq!(s3, DialogueState::Complete);
    }

    #[test]
    fn correction_then_confirm() {
        let mut dst = DialogueStateTracker::new();
        dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: HashMap::new(),
            hearing_item: None,
        });
        dst.update_state(&NluOutcome {
            intent: None,
            slots: slots(&[
                (Slot::Date, "10/24"),
                (Slot::Time, "18:00"),
                (Slot::NPerson, "2"),
                (Slot::Name, "佐藤"),
            ]),
            hearing_item: None,
        });
        dst.enter_waiting_confirmation();

        // "時間を19時に" — only the time slot changed, no local intent matched.
        let s = dst.update_state(&NluOutcome {
            intent: None,
            slots: slots(&[(Slot::Time, "19:00")]),
            hearing_item: None,
        });
        assert_eq!(s, DialogueState::Correction);
        assert_eq!(dst.get_current_state().correction_target, Some(Slot::Time));

        // "19時で" — filled again, returns to WAITING_CONFIRMATION.
        let s2 = dst.update_state(&NluOutcome {
            intent: None,
            slots: slots(&[(Slot::Time, "19:00")]),
            hearing_item: None,
        });
        assert_eq!(s2, DialogueState::WaitingConfirmation);
        assert_eq!(dst.get_current_state().correction_target, None);

        let s3 = dst.update_state(&NluOutcome {
            intent: Some(Intent::Confirm),
            slots: HashMap::new(),
            hearing_item: None,
        });
        assert_eq!(s3, DialogueState::Complete);
    }

    #[test]
    fn cancel_during_waiting_confirmation_ends_scene() {
        let mut dst = DialogueStateTracker::new();
        dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: HashMap::new(),
            hearing_item: None,
        });
        dst.update_state(&NluOutcome {
            intent: None,
            slots: slots(&[
                (Slot::Date, "10/24"),
                (Slot::Time, "18:00"),
                (Slot::NPerson, "2"),
                (Slot::Name, "佐藤"),
            ]),
            hearing_item: None,
        });
        dst.enter_waiting_confirmation();

        let s = dst.update_state(&NluOutcome {
            intent: Some(Intent::Cancel),
            slots: HashMap::new(),
            hearing_item: None,
        });
        assert_eq!(s, DialogueState::Cancelled);
        assert!(dst.dialogue_state().is_terminal());
    }

    #[test]
    fn slot_once_filled_is_never_implicitly_cleared() {
        let mut dst = DialogueStateTracker::new();
        dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: slots(&[(Slot::Date, "11/02")]),
            hearing_item: None,
        });
        let before = dst.get_current_state().slots.get(&Slot::Date).cloned();
        dst.update_state(&NluOutcome {
            intent: None,
            slots: HashMap::new(),
            hearing_item: None,
        });
        let after = dst.get_current_state().slots.get(&Slot::Date).cloned();
        assert_eq!(before, after);
        assert_eq!(after.as_deref(), Some("11/02"));
    }

    #[test]
    fn slots_filled_iff_missing_empty_and_required_nonempty() {
        let mut dst = DialogueStateTracker::new();
        dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: HashMap::new(),
            hearing_item: None,
        });
        let snap = dst.get_current_state();
        assert!(!snap.required_slots.is_empty());
        assert!(!snap.missing_slots.is_empty());
        assert_ne!(dst.dialogue_state(), DialogueState::SlotsFilled);
    }

    #[test]
    fn can_transition_to_respects_waiting_confirmation_window() {
        let mut dst = DialogueStateTracker::new();
        dst.update_state(&NluOutcome {
            intent: Some(Intent::NewReservation),
            slots: slots(&[
                (Slot::Date, "11/02"),
                (Slot::Time, "19:00"),
                (Slot::NPerson, "3"),
                (Slot::Name, "山田"),
            ]),
            hearing_item: None,
        });
        dst.enter_waiting_confirmation();
        assert!(dst.can_transition_to(Intent::Confirm));
        assert!(dst.can_transition_to(Intent::Change));
        assert!(dst.can_transition_to(Intent::Cancel));
    }

    #[test]
    fn local_intents_are_inadmissible_outside_waiting_confirmation() {
        let dst = DialogueStateTracker::new();
        assert!(!dst.can_transition_to(Intent::Confirm));
        assert!(!dst.can_transition_to(Intent::Change));
        assert!(dst.can_transition_to(Intent::NewReservation));
    }

    #[test]
    fn unrecognized_intent_with_no_current_intent_errors() {
        let mut dst = DialogueStateTracker::new();
        let s = dst.update_state(&NluOutcome {
            intent: None,
            slots: HashMap::new(),
            hearing_item: None,
        });
        assert_eq!(s, DialogueState::Error);
    }
}
