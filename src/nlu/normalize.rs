//! Entity normalization: relative dates, time expressions, and person
//! counts, rewritten to `MM/DD`, `HH:MM`, and `<n>人` respectively before
//! dependency parsing (spec.md §4.4a).
//!
//! Ported from `examples/original_source/src/modules/nlu/process_text.py`.
//! The regex alternation structure (each branch using uniquely-suffixed
//! group names so they can share one compiled pattern) is preserved
//! because Rust's `regex` crate, like Python's `re`, rejects duplicate
//! group names within a single pattern.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::clock::Clock;

fn kanji_number_map() -> &'static HashMap<&'static str, u32> {
    static MAP: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
        HashMap::from([
            ("〇", 0), ("零", 0),
            ("一", 1), ("壱", 1),
            ("二", 2), ("弐", 2),
            ("三", 3), ("参", 3),
            ("四", 4), ("五", 5), ("六", 6),
            ("七", 7), ("八", 8), ("九", 9),
            ("十", 10), ("十一", 11), ("十二", 12),
            ("十三", 13), ("十四", 14), ("十五", 15),
            ("十六", 16), ("十七", 17), ("十八", 18),
            ("十九", 19), ("二十", 20), ("二十一", 21),
            ("二十二", 22), ("二十三", 23), ("二十四", 24),
            ("二十五", 25), ("二十六", 26), ("二十七", 27),
            ("二十八", 28), ("二十九", 29), ("三十", 30),
            ("三十一", 31),
        ])
    });
    &MAP
}

/// Longest-match-first kanji-to-number lookup, mirroring `kanji_to_number`
/// in the original (it searches longest keys first so "二十一" doesn't
/// match "二" + trailing garbage).
fn kanji_to_number(text: &str) -> u32 {
    let mut keys: Vec<&&str> = kanji_number_map().keys().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));
    for kanji in keys {
        if text.contains(kanji) {
            return kanji_number_map()[kanji];
        }
    }
    0
}

fn parse_number(text: &str) -> Option<u32> {
    if let Ok(n) = text.parse::<u32>() {
        return Some(n);
    }
    let n = kanji_to_number(text);
    if n > 0 || text.chars().any(|c| c == '〇' || c == '零') {
        Some(n)
    } else {
        None
    }
}

fn day_of_week_map() -> &'static HashMap<&'static str, Weekday> {
    static MAP: Lazy<HashMap<&'static str, Weekday>> = Lazy::new(|| {
        HashMap::from([
            ("月曜日", Weekday::Mon), ("火曜日", Weekday::Tue), ("水曜日", Weekday::Wed),
            ("木曜日", Weekday::Thu), ("金曜日", Weekday::Fri), ("土曜日", Weekday::Sat),
            ("日曜日", Weekday::Sun),
            ("月曜", Weekday::Mon), ("火曜", Weekday::Tue), ("水曜", Weekday::Wed),
            ("木曜", Weekday::Thu), ("金曜", Weekday::Fri), ("土曜", Weekday::Sat),
            ("日曜", Weekday::Sun),
        ])
    });
    &MAP
}

/// `Weekday::num_days_from_monday`, matching Python's `date.weekday()`.
fn weekday_index(w: Weekday) -> i64 {
    w.num_days_from_monday() as i64
}

static DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<relative_day>一昨日|昨日|今日|明日|明後日)",
        r"|(?P<relative_week>先々週|先週|今週|来週|再来週)の?(?P<weekday>月曜日|火曜日|水曜日|木曜日|金曜日|土曜日|日曜日|月曜|火曜|水曜|木曜|金曜|土曜|日曜)?",
        r"|(?P<relative_month>先月|今月|来月|再来月)の?(?P<relative_day_number>\d{1,2})日?",
        r"|(?P<absolute_month>\d{1,2}|[一二三四五六七八九十]+)月の?(?P<absolute_day>\d{1,2}|[一二三四五六七八九十]+)日?",
        r"|(?P<weekday_only>月曜日|火曜日|水曜日|木曜日|金曜日|土曜日|日曜日|月曜|火曜|水曜|木曜|金曜|土曜|日曜)",
        r"|(?P<era>昭和|平成|令和)(?P<era_year>元|\d{1,2})年(?:の)?(?P<era_month>\d{1,2})月(?:の)?(?P<era_day>\d{1,2})日",
        r"|(?P<western_year>\d{4})年(?:の)?(?P<western_month>\d{1,2})月(?:の)?(?P<western_day>\d{1,2})日",
    ))
    .expect("date regex compiles")
});

/// `(start year, end year)` of each Japanese era, matching `era_to_western_year`.
fn era_year_range(era: &str) -> Option<(i32, i32)> {
    match era {
        "昭和" => Some((1926, 1989)),
        "平成" => Some((1989, 2019)),
        "令和" => Some((2019, 9999)),
        _ => None,
    }
}

/// `convert_era_to_western`: era year 1 ("元年") maps to the era's start
/// year; otherwise `start + year - 1`, bounds-checked against the era's end.
fn convert_era_to_western(era: &str, year: i32) -> Option<i32> {
    let (start, end) = era_year_range(era)?;
    if year == 1 {
        return Some(start);
    }
    let western = start + year - 1;
    if start <= western && western <= end {
        Some(western)
    } else {
        None
    }
}

static TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<special_time>正午|深夜零時|深夜12時|零時|〇時)",
        r"|(?P<time_of_day1>朝|午前|昼|午後|夕方|夜|深夜)(?P<hour1>\d{1,2}|[一二三四五六七八九十]+)時半",
        r"|(?P<hour2>\d{1,2}|[一二三四五六七八九十]+)時半",
        r"|(?P<time_of_day2>朝|午前|昼|午後|夕方|夜|深夜)(?P<hour3>\d{1,2}|[一二三四五六七八九十]+)時(?:(?P<minute1>\d{1,2}|[一二三四五六七八九十]+)分)?",
        r"|(?P<hour4>\d{1,2}|[一二三四五六七八九十]+)時(?:(?P<minute2>\d{1,2}|[一二三四五六七八九十]+)分)?",
    ))
    .expect("time regex compiles")
});

static PERSON_COUNT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([一二三四五六七八九十壱弐参]+|\d+)(人|名)").expect("person count regex compiles"));

static SPECIAL_PERSON_COUNTS: &[(&str, u32)] = &[
    ("ひとり", 1), ("ふたり", 2), ("一人", 1), ("二人", 2),
    ("独り", 1), ("二名", 2), ("一名", 1),
];

/// A normalized span: the original matched substring and its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSpan {
    pub original: String,
    pub replacement: String,
}

/// Extract and normalize every date expression in `text` to `MM/DD`,
/// relative to `clock.today()`.
pub fn process_date(text: &str, clock: &dyn Clock) -> Vec<NormalizedSpan> {
    let today = clock.today();
    let mut results = Vec::new();

    for caps in DATE_REGEX.captures_iter(text) {
        let original = caps.get(0).unwrap().as_str().to_string();
        let mut target: Option<NaiveDate> = None;

        if let Some(m) = caps.name("relative_day") {
            let offset = match m.as_str() {
                "今日" => Some(0),
                "明日" => Some(1),
                "明後日" => Some(2),
                "昨日" => Some(-1),
                "一昨日" => Some(-2),
                _ => None,
            };
            if let Some(off) = offset {
                target = Some(today + Duration::days(off));
            }
        } else if let Some(rel_week) = caps.name("relative_week") {
            if let Some(weekday_m) = caps.name("weekday") {
                if let Some(&target_wd) = day_of_week_map().get(weekday_m.as_str()) {
                    let cur = weekday_index(today.weekday());
                    let tgt = weekday_index(target_wd);
                    let days_to_add = match rel_week.as_str() {
                        "来週" => {
                            if tgt > cur { 7 - (cur - tgt) } else { 7 + (tgt - cur) }
                        }
                        "再来週" => {
                            if tgt > cur { 14 - (cur - tgt) } else { 14 + (tgt - cur) }
                        }
                        "先週" => ((cur - tgt - 7).rem_euclid(7)) - 7,
                        "先々週" => ((cur - tgt - 14).rem_euclid(7)) - 14,
                        _ => (tgt - cur).rem_euclid(7),
                    };
                    target = Some(today + Duration::days(days_to_add));
                }
            }
        } else if let (Some(_rel_month), Some(day_m)) =
            (caps.name("relative_month"), caps.name("relative_day_number"))
        {
            let month_offset: i32 = match caps.name("relative_month").unwrap().as_str() {
                "今月" => 0,
                "来月" => 1,
                "再来月" => 2,
                "先月" => -1,
                _ => 0,
            };
            if let Ok(day) = day_m.as_str().parse::<u32>() {
                let approx = today + Duration::days(month_offset as i64 * 30);
                target = approx.with_day(day);
            }
        } else if let (Some(month_m), Some(day_m)) =
            (caps.name("absolute_month"), caps.name("absolute_day"))
        {
            if let (Some(month), Some(day)) = (parse_number(month_m.as_str()), parse_number(day_m.as_str())) {
                if month >= 1 && month <= 12 {
                    target = today
                        .with_month(month)
                        .and_then(|d| d.with_day(day));
                }
            }
        } else if let Some(weekday_m) = caps.name("weekday_only") {
            if let Some(&target_wd) = day_of_week_map().get(weekday_m.as_str()) {
                let cur = weekday_index(today.weekday());
                let tgt = weekday_index(target_wd);
                let days_to_add = (tgt - cur).rem_euclid(7);
                target = Some(today + Duration::days(days_to_add));
            }
        } else if let (Some(era_m), Some(era_year_m), Some(month_m), Some(day_m)) = (
            caps.name("era"),
            caps.name("era_year"),
            caps.name("era_month"),
            caps.name("era_day"),
        ) {
            let era_year: Option<i32> =
                if era_year_m.as_str() == "元" { Some(1) } else { era_year_m.as_str().parse().ok() };
            if let Some(era_year) = era_year {
                if let Some(western_year) = convert_era_to_western(era_m.as_str(), era_year) {
                    if let (Ok(month), Ok(day)) =
                        (month_m.as_str().parse::<u32>(), day_m.as_str().parse::<u32>())
                    {
                        target = NaiveDate::from_ymd_opt(western_year, month, day);
                    }
                }
            }
            // Era/absolute dates carry an explicit year, so unlike the
            // relative branches above they must never roll over to next
            // year below even if they land before `today`.
            if let Some(date) = target {
                results.push(NormalizedSpan {
                    original,
                    replacement: format!("{:02}/{:02}", date.month(), date.day()),
                });
            }
            continue;
        } else if let (Some(year_m), Some(month_m), Some(day_m)) = (
            caps.name("western_year"),
            caps.name("western_month"),
            caps.name("western_day"),
        ) {
            if let (Ok(year), Ok(month), Ok(day)) = (
                year_m.as_str().parse::<i32>(),
                month_m.as_str().parse::<u32>(),
                day_m.as_str().parse::<u32>(),
            ) {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    results.push(NormalizedSpan {
                        original,
                        replacement: format!("{:02}/{:02}", date.month(), date.day()),
                    });
                }
            }
            continue;
        }

        if let Some(mut date) = target {
            // A computed date earlier than today rolls over to next year,
            // matching the original's "treat as next occurrence" rule.
            if date < today {
                if let Some(rolled) = date.with_year(date.year() + 1) {
                    date = rolled;
                }
            }
            results.push(NormalizedSpan {
                original,
                replacement: format!("{:02}/{:02}", date.month(), date.day()),
            });
        }
    }

    results
}

fn infer_actual_hour(hour: u32, time_of_day: &str) -> u32 {
    match time_of_day {
        "午後" | "夕方" | "夜" if hour < 12 => hour + 12,
        "深夜" if hour == 12 => 0,
        "朝" | "午前" if hour == 12 => 0,
        _ => hour,
    }
}

/// Extract and normalize every time expression in `text` to `HH:MM` (24h).
pub fn process_time(text: &str) -> Vec<NormalizedSpan> {
    let mut results = Vec::new();

    for caps in TIME_REGEX.captures_iter(text) {
        let original = caps.get(0).unwrap().as_str().to_string();

        if let Some(special) = caps.name("special_time") {
            let normalized = match special.as_str() {
                "正午" => "12:00",
                "深夜零時" | "深夜12時" | "零時" | "〇時" => "00:00",
                _ => continue,
            };
            results.push(NormalizedSpan { original, replacement: normalized.to_string() });
            continue;
        }

        let time_of_day = caps
            .name("time_of_day1")
            .or_else(|| caps.name("time_of_day2"))
            .map(|m| m.as_str())
            .unwrap_or("");

        let hour_match = caps
            .name("hour1")
            .or_else(|| caps.name("hour2"))
            .or_else(|| caps.name("hour3"))
            .or_else(|| caps.name("hour4"));

        let Some(hour_str) = hour_match.map(|m| m.as_str()) else { continue };
        let Some(hour) = parse_number(hour_str) else { continue };

        let has_han = original.contains('半');
        let minute = if let Some(m) = caps.name("minute1").or_else(|| caps.name("minute2")) {
            parse_number(m.as_str()).unwrap_or(0)
        } else if has_han {
            30
        } else {
            0
        };

        let hour = infer_actual_hour(hour, time_of_day);
        if hour > 23 || minute > 59 {
            continue;
        }
        results.push(NormalizedSpan {
            original,
            replacement: format!("{:02}:{:02}", hour, minute),
        });
    }

    results
}

/// Extract and normalize every person-count expression to `<n>人`.
pub fn process_person_count(text: &str) -> Vec<NormalizedSpan> {
    let mut results = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for caps in PERSON_COUNT_REGEX.captures_iter(text) {
        let original = caps.get(0).unwrap().as_str();
        let number_part = caps.get(1).unwrap().as_str();
        if let Some(num) = parse_number(number_part) {
            if num > 0 {
                results.push(NormalizedSpan {
                    original: original.to_string(),
                    replacement: format!("{}人", num),
                });
                seen.push(original);
            }
        }
    }

    for &(expr, num) in SPECIAL_PERSON_COUNTS {
        if text.contains(expr) && !seen.contains(&expr) {
            results.push(NormalizedSpan {
                original: expr.to_string(),
                replacement: format!("{}人", num),
            });
        }
    }

    results
}

/// Apply a list of normalized spans to `text`, replacing each original
/// match with `<replacement> ` (trailing space, matching the original's
/// `text.replace(k, v + ' ')` so downstream tokenization sees a boundary).
pub fn apply_normalizations(mut text: String, spans: &[NormalizedSpan]) -> String {
    for span in spans {
        text = text.replace(&span.original, &format!("{} ", span.replacement));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock::reference_today()
    }

    #[test]
    fn tomorrow_resolves_relative_to_clock() {
        let spans = process_date("明日の予約をお願いします", &clock());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].replacement, "10/24");
    }

    #[test]
    fn next_saturday_from_wednesday() {
        // 2024-10-23 is a Wednesday; 来週の土曜日 should land on 2024-11-02.
        let spans = process_date("来週の土曜日でお願いします", &clock());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].replacement, "11/02");
    }

    #[test]
    fn absolute_month_day() {
        let spans = process_date("11月2日に予約したいです", &clock());
        assert_eq!(spans[0].replacement, "11/02");
    }

    #[test]
    fn weekday_only_rolls_to_next_occurrence() {
        let spans = process_date("土曜日は空いてますか", &clock());
        assert_eq!(spans[0].replacement, "11/02");
    }

    #[test]
    fn time_afternoon_shifts_to_24h() {
        let spans = process_time("午後3時でお願いします");
        assert_eq!(spans[0].replacement, "15:00");
    }

    #[test]
    fn time_han_is_thirty_minutes() {
        let spans = process_time("10時半にお願いします");
        assert_eq!(spans[0].replacement, "10:30");
    }

    #[test]
    fn time_noon_special_case() {
        let spans = process_time("正午でお願いします");
        assert_eq!(spans[0].replacement, "12:00");
    }

    #[test]
    fn time_morning_with_minutes() {
        let spans = process_time("朝10時30分に会議があります");
        assert_eq!(spans[0].replacement, "10:30");
    }

    #[test]
    fn person_count_kanji() {
        let spans = process_person_count("三名でお願いします");
        assert_eq!(spans[0].replacement, "3人");
    }

    #[test]
    fn person_count_special_case_futari() {
        let spans = process_person_count("ふたりで伺います");
        assert_eq!(spans[0].replacement, "2人");
    }

    #[test]
    fn era_date_converts_to_western_calendar() {
        // 令和6年 = 2024, so 令和6年10月24日 is 2024-10-24.
        let spans = process_date("令和6年10月24日に予約をお願いします", &clock());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].replacement, "10/24");
    }

    #[test]
    fn era_gannen_is_the_eras_first_year() {
        // 令和元年 (令和's first year) is 2019, so 令和元年5月1日 is 2019-05-01.
        let spans = process_date("令和元年5月1日はどうでしょう", &clock());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].replacement, "05/01");
    }

    #[test]
    fn absolute_western_year_date() {
        let spans = process_date("2024年10月24日でお願いします", &clock());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].replacement, "10/24");
    }

    #[test]
    fn idempotent_on_already_normalized_text() {
        let first = process_date("来週の土曜日、19時から3名で、山田です", &clock());
        let text2 = apply_normalizations("来週の土曜日、19時から3名で、山田です".to_string(), &first);
        let second = process_date(&text2, &clock());
        assert!(second.is_empty(), "already-normalized dates should not re-match");
    }
}
