//! Calendar date as it travels on the wire.
//!
//! The wire `month` is 0-based (0..=11); the database stores 1-based months.
//! Conversion happens here and nowhere else, so a round-trip
//! wire → `NaiveDate` → wire is the identity.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    pub year: i32,
    /// 0-based month, 0 = January.
    pub month: u32,
    /// Day of month, 1..=31.
    pub mday: u32,
}

impl Date {
    pub fn new(year: i32, month: u32, mday: u32) -> Self {
        Self { year, month, mday }
    }

    /// Convert a stored date to the wire representation.
    pub fn from_naive(d: NaiveDate) -> Self {
        Self {
            year: d.year(),
            month: d.month() - 1,
            mday: d.day(),
        }
    }

    /// Convert to a storable date. `None` if the fields do not name a real
    /// calendar day (month out of range, Feb 30, ...).
    pub fn to_naive(&self) -> Option<NaiveDate> {
        if self.month > 11 {
            return None;
        }
        NaiveDate::from_ymd_opt(self.year, self.month + 1, self.mday)
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month + 1, self.mday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_month_is_zero_based() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let wire = Date::from_naive(d);
        assert_eq!(wire, Date::new(2024, 2, 15));
        assert_eq!(wire.to_naive(), Some(d));
    }

    #[test]
    fn round_trip_is_identity_across_year() {
        for month in 0..12u32 {
            let wire = Date::new(2024, month, 1);
            let naive = wire.to_naive().unwrap();
            assert_eq!(Date::from_naive(naive), wire);
        }
    }

    #[test]
    fn rejects_month_out_of_range() {
        assert_eq!(Date::new(2024, 12, 1).to_naive(), None);
    }

    #[test]
    fn rejects_impossible_day() {
        // Feb 30 (wire month 1) does not exist.
        assert_eq!(Date::new(2024, 1, 30).to_naive(), None);
    }

    #[test]
    fn displays_one_based() {
        assert_eq!(Date::new(2024, 0, 9).to_string(), "2024-01-09");
    }
}
