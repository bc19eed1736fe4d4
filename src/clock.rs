//! Reference "today" injection
//!
//! `examples/original_source/src/modules/nlu/process_text.py` calls
//! `datetime.now()` directly inside date normalization, which makes the
//! original's relative-date tests non-reproducible (one of its other
//! drafts hard-codes `2024-10-23` instead). SPEC_FULL.md resolves this by
//! injecting a [`Clock`] everywhere "now" is needed: production wiring
//! uses [`SystemClock`], tests use [`FixedClock`].

use chrono::NaiveDate;

/// Supplies the date normalization layer's notion of "today".
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock time, used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Utc::now().date_naive()
    }
}

/// A fixed date, used in tests so relative-date parsing is reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

impl FixedClock {
    /// The date spec.md's end-to-end scenarios are written against.
    pub fn reference_today() -> Self {
        FixedClock(NaiveDate::from_ymd_opt(2024, 10, 23).expect("valid calendar date"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_configured_date() {
        let clock = FixedClock::reference_today();
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 10, 23).unwrap());
    }
}
