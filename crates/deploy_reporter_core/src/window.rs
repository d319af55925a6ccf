use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Current,
    Create,
    Next,
    Last,
    Update,
}

impl RunMode {
    /// Parse a mode argument; anything unrecognized behaves like `current`.
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "current" => Self::Current,
            "create" => Self::Create,
            "next" => Self::Next,
            "last" => Self::Last,
            "update" => Self::Update,
            _ => Self::Current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Create => "create",
            Self::Next => "next",
            Self::Last => "last",
            Self::Update => "update",
        }
    }

    /// Weeks relative to the week containing `today`.
    fn week_offset(self) -> i64 {
        match self {
            Self::Create | Self::Next => 1,
            Self::Last => -1,
            Self::Current | Self::Update => 0,
        }
    }

    /// Modes that refresh the page even when nothing changed.
    pub fn always_publishes(self) -> bool {
        matches!(self, Self::Current | Self::Create | Self::Next)
    }

    /// Storage slot shared by modes that target the same week.
    pub fn storage_slot(self) -> &'static str {
        match self {
            Self::Current | Self::Update => "current",
            Self::Create | Self::Next => "create",
            Self::Last => "last",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

impl WeekWindow {
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

pub fn resolve(mode: RunMode, today: NaiveDate) -> WeekWindow {
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let start = monday + Duration::weeks(mode.week_offset());
    let end = start + Duration::days(6);
    WeekWindow {
        start,
        end,
        label: week_label(start, end),
    }
}

/// `"{month}월 {n}째주: (MM/DD~MM/DD)"`, numbered within `start`'s month even
/// when the week runs into the next month.
pub fn week_label(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}월 {}째주: ({}~{})",
        start.month(),
        week_of_month(start),
        start.format("%m/%d"),
        end.format("%m/%d")
    )
}

fn week_of_month(date: NaiveDate) -> u32 {
    let first = date - Duration::days(i64::from(date.day0()));
    let offset = first.weekday().num_days_from_monday();
    (date.day() + offset - 1) / 7 + 1
}
