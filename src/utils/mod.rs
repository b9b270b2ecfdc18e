use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A reporting period in `YYYY-MM` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: u16,
    month: u8,
}

impl Month {
    pub fn new(year: u16, month: u8) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("invalid month number {month}, expected 1-12"));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// Human label, e.g. `December 2025`.
    pub fn label(&self) -> String {
        match chrono::Month::try_from(self.month) {
            Ok(name) => format!("{} {}", name.name(), self.year),
            Err(_) => self.to_string(),
        }
    }

    /// The month containing `date`.
    pub fn from_date<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year().clamp(0, 9999) as u16,
            month: date.month() as u8,
        }
    }

    pub fn current_utc() -> Self {
        Self::from_date(&Utc::now())
    }
}

impl FromStr for Month {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let raw = value.trim();
        let (year_raw, month_raw) = raw
            .split_once('-')
            .ok_or_else(|| format!("invalid month '{raw}', expected YYYY-MM"))?;
        if year_raw.len() != 4
            || month_raw.len() != 2
            || !year_raw.bytes().all(|b| b.is_ascii_digit())
            || !month_raw.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("invalid month '{raw}', expected YYYY-MM"));
        }
        let year: u16 = year_raw
            .parse()
            .map_err(|_| format!("invalid year in '{raw}'"))?;
        let month: u8 = month_raw
            .parse()
            .map_err(|_| format!("invalid month in '{raw}'"))?;
        Month::new(year, month).map_err(|e| format!("invalid month '{raw}': {e}"))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn parse_non_negative_int(value: &str) -> Result<u64, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("value is empty".to_string());
    }
    raw.parse::<u64>()
        .map_err(|_| format!("'{raw}' is not a non-negative whole number"))
}

pub fn parse_non_negative_decimal(value: &str) -> Result<f64, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("value is empty".to_string());
    }
    let parsed: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if !parsed.is_finite() {
        return Err(format!("'{raw}' is not a finite number"));
    }
    if parsed < 0.0 {
        return Err(format!("'{raw}' must not be negative"));
    }
    Ok(parsed)
}

pub fn parse_header_line(value: &str) -> Result<(String, String), String> {
    let (name, val) = value
        .split_once(':')
        .ok_or_else(|| "expected 'Key: Value'".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), val.trim().to_string()))
}

/// en-US digit grouping, e.g. `1234567` -> `1,234,567`.
pub fn format_grouped(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Grouped decimal with at most two fraction digits and no trailing zeros.
pub fn format_grouped_decimal(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;
    let mut out = String::new();
    if negative && cents > 0 {
        out.push('-');
    }
    out.push_str(&format_grouped(whole));
    if frac > 0 {
        let frac = format!("{frac:02}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out
}
