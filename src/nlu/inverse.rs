//! Inverse entity normalization: turning stored slot values back into the
//! speech-friendly Japanese the NLG layer reads aloud (spec.md §4.5c).
//!
//! Ported from
//! `examples/original_source/src/modules/dialogue/utils/inverse_entity_normalization.py`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dst::Slot;

static DATE_YYMMDD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{2})$").expect("compiles"));
static DATE_YYYYMMDD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})/(\d{2})/(\d{2})$").expect("compiles"));
static DATE_MMDD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})").expect("compiles"));
static DATE_JA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{2})月(\d{2})日").expect("compiles"));
static TIME_HHMM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("compiles"));

/// Render a stored `MM/DD` (or `YY/MM/DD`, `YYYY/MM/DD`, `MM月DD日`) value as
/// `M月D日` for speech output. Returns an empty string if nothing matches,
/// matching the original's fallback.
pub fn convert_date_format(text: &str) -> String {
    if let Some(caps) = DATE_YYMMDD.captures(text) {
        let month: u32 = caps[2].parse().unwrap_or(0);
        let day: u32 = caps[3].parse().unwrap_or(0);
        if is_valid_month_day(month, day) {
            return format!("{}月{}日", month, day);
        }
    }
    if let Some(caps) = DATE_YYYYMMDD.captures(text) {
        let month: u32 = caps[2].parse().unwrap_or(0);
        let day: u32 = caps[3].parse().unwrap_or(0);
        if is_valid_month_day(month, day) {
            return format!("{}月{}日", month, day);
        }
    }
    if let Some(caps) = DATE_MMDD.captures(text) {
        let month: u32 = caps[1].parse().unwrap_or(0);
        let day: u32 = caps[2].parse().unwrap_or(0);
        if is_valid_month_day(month, day) {
            return format!("{}月{}日", month, day);
        }
    }
    if let Some(caps) = DATE_JA.captures(text) {
        let month: u32 = caps[1].parse().unwrap_or(0);
        let day: u32 = caps[2].parse().unwrap_or(0);
        if is_valid_month_day(month, day) {
            return format!("{}月{}日", month, day);
        }
    }
    String::new()
}

fn is_valid_month_day(month: u32, day: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

/// Render a stored `HH:MM` value as `H時M分`, omitting the minutes clause
/// when they are zero (`10:00` -> `10時`, `10:30` -> `10時30分`).
pub fn convert_time_format(text: &str) -> String {
    TIME_HHMM
        .replace_all(text, |caps: &regex::Captures| {
            let hour: u32 = match caps[1].parse() {
                Ok(h) => h,
                Err(_) => return caps[0].to_string(),
            };
            let minute: u32 = match caps[2].parse() {
                Ok(m) => m,
                Err(_) => return caps[0].to_string(),
            };
            if minute == 0 {
                format!("{}時", hour)
            } else {
                format!("{}時{}分", hour, minute)
            }
        })
        .into_owned()
}

/// Apply the appropriate inverse transform per slot kind; name and
/// person-count values pass through unchanged.
pub fn format_entity(slot: Slot, value: &str) -> String {
    match slot {
        Slot::Date => convert_date_format(value),
        Slot::Time => convert_time_format(value),
        Slot::Name | Slot::NPerson => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmdd_to_speech_form() {
        assert_eq!(convert_date_format("10/24"), "10月24日");
    }

    #[test]
    fn time_without_minutes_omits_minute_clause() {
        assert_eq!(convert_time_format("10:00"), "10時");
    }

    #[test]
    fn time_with_minutes_includes_minute_clause() {
        assert_eq!(convert_time_format("19:30"), "19時30分");
    }

    #[test]
    fn invalid_date_returns_empty() {
        assert_eq!(convert_date_format("no date here"), "");
    }

    #[test]
    fn format_entity_dispatches_by_slot() {
        assert_eq!(format_entity(Slot::NPerson, "3人"), "3人");
        assert_eq!(format_entity(Slot::Date, "11/02"), "11月2日");
    }
}
