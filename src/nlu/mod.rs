//! Incremental slot/entity extraction over a growing ASR transcript
//! (spec.md §4.4b).
//!
//! Ported from `examples/original_source/src/modules/nlu/streaming_nlu.py`'s
//! `StreamingNLUModule`. The original leans on `spacy`/`ja_ginza` for named
//! entity recognition and morphological analysis; neither has a Rust
//! ecosystem equivalent the teacher or pack reach for, so entity extraction
//! here runs on the same regex tables [`normalize`] already exposes for
//! date/time/person-count, plus a name-pattern matcher, and terminal-form
//! detection runs on a particle-boundary heuristic rather than a dependency
//! parse. The state machine this module drives (post-terminal token budget,
//! 接続助詞 suppression, entity/slot bookkeeping) is unchanged from the
//! original.

pub mod inverse;
pub mod normalize;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::clock::Clock;
use crate::dst::Slot;

/// How many tokens after a terminal-form candidate must elapse before it is
/// confirmed, matching `StreamingNLUModule.MAX_TOKENS_POST_TERMINAL`.
const MAX_TOKENS_POST_TERMINAL: usize = 2;

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<name>[\p{Han}\p{Hiragana}\p{Katakana}ー]{1,10})(?:です|と申します|といいます|で(?:す)?ございます)")
        .expect("name regex compiles")
});

/// Sentence-final forms treated as 終止形 candidates: verb/copula endings
/// that plausibly close a clause.
static TERMINAL_ENDING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(ます|ました|ません|です|でした|だ|である|ください|お願いします|お願いいたします|たいです)$")
        .expect("terminal ending regex compiles")
});

/// 接続助詞 (connective particle) endings: a clause ending in one of these
/// continues rather than closes, and must suppress a terminal-form hit seen
/// on the immediately preceding token.
static CONNECTIVE_PARTICLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(て|で|ので|けど|けれど|が|し|たら|なら|と|ば)$").expect("connective particle regex compiles"));

/// Japanese slot-name words checked by substring match against the
/// transcript to detect `hearing_item` (spec.md §4.4/§4.4a): which slot the
/// caller's wording targets when correcting a prior answer. Checked in this
/// order so the first (not necessarily only) slot name mentioned wins,
/// matching the DATE/TIME/N_PERSON/NAME priority the rest of this module
/// uses elsewhere.
const SLOT_LABEL_WORDS: &[(Slot, &[&str])] = &[
    (Slot::Date, &["日付"]),
    (Slot::Time, &["時間"]),
    (Slot::NPerson, &["人数"]),
    (Slot::Name, &["お名前", "名前"]),
];

fn detect_hearing_item(text: &str) -> Option<Slot> {
    SLOT_LABEL_WORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(slot, _)| *slot)
}

/// Crude clause tokenizer: splits on the readings-independent punctuation
/// and particle boundaries the original's dependency parser would otherwise
/// supply token boundaries for.
static CLAUSE_SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[、。,.\s]+").expect("clause split regex compiles"));

/// Snapshot of what the streaming NLU observed on the latest `process()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NluStatus {
    pub got_entities: bool,
    pub got_terminal_forms: bool,
    pub is_slot_filled: bool,
    pub states: HashMap<Slot, String>,
    /// Which slot the caller's wording targets for correction, if any
    /// (spec.md §4.4a's `hearing_item`).
    pub hearing_item: Option<Slot>,
}

/// Incremental entity/terminal-form extractor over one growing transcript.
///
/// Mirrors `StreamingNLUModule`: `process()` is called with the full
/// transcript-so-far on every ASR interim update, not just the newest
/// fragment, and state from the previous call informs suppression of
/// stale terminal-form detections.
pub struct StreamingNlu {
    slot_keys: Vec<Slot>,
    status: NluStatus,
    cur_states: HashMap<Slot, String>,
    terminal_forms: Vec<String>,
    num_tokens_post_terminal: usize,
    num_entity_non_empty: usize,
    entities: HashMap<Slot, Vec<String>>,
}

impl StreamingNlu {
    pub fn new(slot_keys: Vec<Slot>) -> Self {
        let mut nlu = Self {
            slot_keys,
            status: NluStatus::default(),
            cur_states: HashMap::new(),
            terminal_forms: Vec::new(),
            num_tokens_post_terminal: 0,
            num_entity_non_empty: 0,
            entities: HashMap::new(),
        };
        nlu.init_state();
        nlu
    }

    fn init_state(&mut self) {
        self.status = NluStatus::default();
        self.cur_states = self.slot_keys.iter().map(|s| (*s, String::new())).collect();
        self.num_tokens_post_terminal = 0;
        self.num_entity_non_empty = 0;
        self.entities = self.slot_keys.iter().map(|s| (*s, Vec::new())).collect();
        self.terminal_forms.clear();
    }

    fn preprocess_text(&self, text: &str, clock: &dyn Clock) -> String {
        let mut text = text.to_string();
        text = normalize::apply_normalizations(text.clone(), &normalize::process_date(&text, clock));
        text = normalize::apply_normalizations(text.clone(), &normalize::process_time(&text));
        text
    }

    fn extract_entities(&mut self, text: &str) {
        if self.slot_keys.contains(&Slot::Date) {
            if let Some(m) = date_token(text) {
                self.entities.get_mut(&Slot::Date).unwrap().push(m);
            }
        }
        if self.slot_keys.contains(&Slot::Time) {
            if let Some(m) = time_token(text) {
                self.entities.get_mut(&Slot::Time).unwrap().push(m);
            }
        }
        if self.slot_keys.contains(&Slot::NPerson) {
            let spans = normalize::process_person_count(text);
            if let Some(span) = spans.last() {
                self.entities.get_mut(&Slot::NPerson).unwrap().push(span.replacement.clone());
            }
        }
        if self.slot_keys.contains(&Slot::Name) {
            if let Some(caps) = NAME_REGEX.captures(text) {
                let name = caps.name("name").unwrap().as_str().to_string();
                self.entities.get_mut(&Slot::Name).unwrap().push(name);
            }
        }
    }

    fn extract_terminal_forms(&mut self, text: &str) {
        self.num_tokens_post_terminal = 0;
        let clauses: Vec<&str> = CLAUSE_SPLIT_REGEX.split(text).filter(|c| !c.is_empty()).collect();

        for clause in clauses {
            if !self.terminal_forms.is_empty() {
                self.num_tokens_post_terminal += 1;
            }

            if CONNECTIVE_PARTICLE_REGEX.is_match(clause) && self.num_tokens_post_terminal == 1 {
                self.status.got_terminal_forms = false;
                continue;
            }

            if TERMINAL_ENDING_REGEX.is_match(clause) {
                self.num_tokens_post_terminal = 0;
                self.terminal_forms.push(clause.to_string());
            }
        }
    }

    fn reset_terminal_forms(&mut self) {
        self.terminal_forms.clear();
        self.status.got_terminal_forms = false;
    }

    fn update_states(&mut self) {
        for (slot, values) in &self.entities {
            if let Some(last) = values.last() {
                self.cur_states.insert(*slot, last.clone());
            }
        }
    }

    fn set_status(&mut self) {
        let num_entity_non_empty = self.entities.values().filter(|v| !v.is_empty()).count();

        if !self.slot_keys.is_empty() {
            if num_entity_non_empty > self.num_entity_non_empty {
                self.status.got_entities = true;
            } else if num_entity_non_empty == self.slot_keys.len() {
                self.status.is_slot_filled = true;
            }
        }

        if !self.terminal_forms.is_empty() && self.num_tokens_post_terminal == MAX_TOKENS_POST_TERMINAL - 1 {
            self.status.got_terminal_forms = true;
        }

        if self.num_tokens_post_terminal >= MAX_TOKENS_POST_TERMINAL {
            self.reset_terminal_forms();
        }

        self.num_entity_non_empty = num_entity_non_empty;
        self.status.states = self.cur_states.clone();
    }

    /// Run one full pass over `text` (the transcript-so-far), replacing all
    /// internal state the way each new interim ASR update does in the
    /// original.
    pub fn process(&mut self, text: &str, clock: &dyn Clock) -> NluStatus {
        self.init_state();
        if text.is_empty() {
            return self.status.clone();
        }
        let normalized = self.preprocess_text(text, clock);
        self.extract_entities(&normalized);
        self.extract_terminal_forms(&normalized);
        self.update_states();
        self.set_status();
        self.status.hearing_item = detect_hearing_item(text);
        self.status.clone()
    }

    pub fn got_entity(&self) -> bool {
        self.status.got_entities
    }

    pub fn is_slot_filled(&self) -> bool {
        self.status.is_slot_filled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.got_terminal_forms
    }

    pub fn slot_states(&self) -> &HashMap<Slot, String> {
        &self.cur_states
    }
}

fn date_token(text: &str) -> Option<String> {
    static FOUND_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2}/\d{2}").expect("compiles"));
    FOUND_DATE.find(text).map(|m| m.as_str().to_string())
}

fn time_token(text: &str) -> Option<String> {
    static FOUND_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2}:\d{2}").expect("compiles"));
    FOUND_TIME.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock::reference_today()
    }

    #[test]
    fn interim_updates_accumulate_slots_incrementally() {
        let mut nlu = StreamingNlu::new(vec![Slot::Date, Slot::Time, Slot::NPerson]);

        let steps = [
            "明日",
            "明日の朝10時",
            "明日の朝10時に6人",
            "明日の朝10時に6人で予約お願いします",
        ];
        let mut last_status = NluStatus::default();
        for text in steps {
            last_status = nlu.process(text, &clock());
        }

        assert_eq!(last_status.states.get(&Slot::Date).map(|s| s.as_str()), Some("10/24"));
        assert_eq!(last_status.states.get(&Slot::Time).map(|s| s.as_str()), Some("10:00"));
        assert_eq!(last_status.states.get(&Slot::NPerson).map(|s| s.as_str()), Some("6人"));
        assert!(last_status.is_slot_filled);
    }

    #[test]
    fn empty_text_yields_empty_status() {
        let mut nlu = StreamingNlu::new(vec![Slot::Date]);
        let status = nlu.process("", &clock());
        assert!(!status.got_entities);
        assert!(!status.is_slot_filled);
    }

    #[test]
    fn terminal_form_detected_after_polite_ending() {
        let mut nlu = StreamingNlu::new(vec![]);
        nlu.process("予約をお願いします", &clock());
        let status = nlu.process("予約をお願いします。", &clock());
        assert!(status.got_terminal_forms || nlu.is_terminal());
    }

    #[test]
    fn connective_particle_suppresses_false_terminal() {
        let mut nlu = StreamingNlu::new(vec![]);
        // "ますが" ends in a connective particle, not a closing form.
        let status = nlu.process("予約したいのですが", &clock());
        assert!(!status.got_terminal_forms);
    }

    #[test]
    fn hearing_item_detected_by_slot_name_substring() {
        let mut nlu = StreamingNlu::new(vec![Slot::Date, Slot::Time]);
        let status = nlu.process("時間を間違えました", &clock());
        assert_eq!(status.hearing_item, Some(Slot::Time));
    }

    #[test]
    fn hearing_item_absent_without_a_slot_name_mention() {
        let mut nlu = StreamingNlu::new(vec![Slot::Date]);
        let status = nlu.process("やっぱり明日でお願いします", &clock());
        assert_eq!(status.hearing_item, None);
    }

    #[test]
    fn name_slot_extracted_from_self_introduction() {
        let mut nlu = StreamingNlu::new(vec![Slot::Name]);
        let status = nlu.process("山田です", &clock());
        assert_eq!(status.states.get(&Slot::Name).map(|s| s.as_str()), Some("山田"));
    }
}
