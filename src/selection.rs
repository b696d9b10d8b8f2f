//! # Label Selection
//!
//! Constraints select positions along a labelled dimension. A dimension's
//! labels come from its coordinate variable; dimensions without one are
//! labelled by position.
//!
//! - [`Constraint::Label`]: one exact label, the dimension is dropped from the view
//! - [`Constraint::Range`]: inclusive range, bounds accepted in either order
//! - [`Constraint::List`]: a set of exact labels, stored order is kept
//!
//! Coordinates stored in descending order (latitude north to south is the
//! usual case) are detected, so `latitude = (25, 20)` and `(20, 25)` select
//! the same labels. Time coordinates with CF units (`hours since
//! 1900-01-01 00:00:00`) accept date and datetime labels; a date used as a
//! range bound covers the whole day.

use crate::error::{CatalogError, CatalogResult};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A coordinate label used in a constraint
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl From<f64> for Label {
    fn from(value: f64) -> Self {
        Label::Number(value)
    }
}

impl From<i32> for Label {
    fn from(value: i32) -> Self {
        Label::Number(value as f64)
    }
}

impl From<NaiveDate> for Label {
    fn from(value: NaiveDate) -> Self {
        Label::Date(value)
    }
}

impl From<NaiveDateTime> for Label {
    fn from(value: NaiveDateTime) -> Self {
        Label::DateTime(value)
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<f64>() {
            return Ok(Label::Number(value));
        }
        if let Some(datetime) = parse_datetime(s) {
            return Ok(Label::DateTime(datetime));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Label::Date(date));
        }
        Err(format!("'{}' is neither a number, a date nor a datetime", s))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Number(value) => write!(f, "{}", value),
            Label::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Label::DateTime(datetime) => write!(f, "{}", datetime.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// A selection along one dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Label(Label),
    Range(Label, Label),
    List(Vec<Label>),
}

impl Constraint {
    pub fn label<L: Into<Label>>(label: L) -> Self {
        Constraint::Label(label.into())
    }

    pub fn range<A: Into<Label>, B: Into<Label>>(start: A, end: B) -> Self {
        Constraint::Range(start.into(), end.into())
    }

    pub fn list<L: Into<Label>, I: IntoIterator<Item = L>>(labels: I) -> Self {
        Constraint::List(labels.into_iter().map(Into::into).collect())
    }
}

/// Parses the command-line constraint syntax: `a:b` is a range, `a,b,c` a
/// list, anything else a single label.
impl FromStr for Constraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Datetimes contain ':' themselves, so a range is split on the ':'
        // that yields two parseable labels.
        if s.contains(',') {
            let labels: Result<Vec<Label>, _> = s.split(',').map(str::parse).collect();
            return labels.map(Constraint::List);
        }
        if let Ok(label) = s.parse::<Label>() {
            return Ok(Constraint::Label(label));
        }
        for (idx, _) in s.match_indices(':') {
            let (start, end) = (&s[..idx], &s[idx + 1..]);
            if let (Ok(start), Ok(end)) = (start.parse::<Label>(), end.parse::<Label>()) {
                return Ok(Constraint::Range(start, end));
            }
        }
        Err(format!("Cannot parse constraint '{}'", s))
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim_end_matches('Z');
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn millis(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1_000.0,
            TimeUnit::Minutes => 60_000.0,
            TimeUnit::Hours => 3_600_000.0,
            TimeUnit::Days => 86_400_000.0,
        }
    }
}

/// CF time encoding: `<unit> since <epoch>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeEncoding {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl TimeEncoding {
    pub fn parse(units: &str) -> Option<Self> {
        let (unit, epoch) = units.split_once(" since ")?;
        let unit = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => TimeUnit::Seconds,
            "minutes" | "minute" | "mins" => TimeUnit::Minutes,
            "hours" | "hour" | "hrs" | "h" => TimeUnit::Hours,
            "days" | "day" | "d" => TimeUnit::Days,
            _ => return None,
        };
        let epoch = epoch.trim().trim_end_matches(" UTC");
        let epoch = parse_datetime(epoch)
            .or_else(|| {
                NaiveDate::parse_from_str(epoch, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })?;
        Some(TimeEncoding { unit, epoch })
    }

    pub fn encode(&self, datetime: NaiveDateTime) -> f64 {
        (datetime - self.epoch).num_milliseconds() as f64 / self.unit.millis()
    }

    pub fn decode(&self, value: f64) -> Option<NaiveDateTime> {
        let millis = (value * self.unit.millis()).round();
        if !millis.is_finite() {
            return None;
        }
        TimeDelta::try_milliseconds(millis as i64)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Ascending,
    Descending,
    Unordered,
}

/// Labels of one dimension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinate {
    pub name: String,
    pub values: Vec<f64>,
    pub units: Option<String>,
    pub time: Option<TimeEncoding>,
}

impl Coordinate {
    pub fn new(name: &str, values: Vec<f64>) -> Self {
        Coordinate {
            name: name.to_string(),
            values,
            units: None,
            time: None,
        }
    }

    /// Positional labels for a dimension without a coordinate variable
    pub fn positional(name: &str, len: usize) -> Self {
        Coordinate::new(name, (0..len).map(|i| i as f64).collect())
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.time = TimeEncoding::parse(units);
        self.units = Some(units.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn orientation(&self) -> Orientation {
        orientation_of(&self.values)
    }

    /// Human-readable label at a position, decoded to a timestamp for time axes.
    pub fn format_label(&self, position: usize) -> String {
        let Some(&value) = self.values.get(position) else {
            return String::new();
        };
        match self.time.as_ref().and_then(|enc| enc.decode(value)) {
            Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => value.to_string(),
        }
    }

    /// Restricts the coordinate to the given positions.
    pub fn take(&self, positions: &[usize]) -> Coordinate {
        Coordinate {
            name: self.name.clone(),
            values: positions.iter().map(|&p| self.values[p]).collect(),
            units: self.units.clone(),
            time: self.time.clone(),
        }
    }
}

/// Positions selected by a constraint, relative to the coordinate it was
/// applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    /// A single label; the dimension is squeezed out
    Point(usize),
    Positions(Vec<usize>),
}

struct Span {
    start: f64,
    end: f64,
    end_exclusive: bool,
}

impl Coordinate {
    /// Applies a constraint and returns the selected positions.
    pub fn select(&self, constraint: &Constraint) -> CatalogResult<Selected> {
        match constraint {
            // A bare date on a time axis is the whole day, as with a range.
            Constraint::Label(label @ Label::Date(_)) => {
                self.select(&Constraint::Range(label.clone(), label.clone()))
            }
            Constraint::Label(label) => {
                let target = self.span(label)?.start;
                self.find_exact(target)
                    .map(Selected::Point)
                    .ok_or_else(|| CatalogError::OutOfBounds {
                        dimension: self.name.clone(),
                        label: label.to_string(),
                    })
            }
            Constraint::Range(a, b) => {
                let (a, b) = (self.span(a)?, self.span(b)?);
                let start = a.start.min(b.start);
                let (end, end_exclusive) = if a.end >= b.end {
                    (a.end, a.end_exclusive)
                } else {
                    (b.end, b.end_exclusive)
                };
                Ok(Selected::Positions(self.find_range(start, end, end_exclusive)))
            }
            Constraint::List(labels) => {
                let mut targets = Vec::with_capacity(labels.len());
                for label in labels {
                    targets.push(self.span(label)?.start);
                }
                let tolerance = |t: f64| self.tolerance(t);
                let positions = self
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| targets.iter().any(|t| (**v - t).abs() <= tolerance(*t)))
                    .map(|(idx, _)| idx)
                    .collect();
                Ok(Selected::Positions(positions))
            }
        }
    }

    fn span(&self, label: &Label) -> CatalogResult<Span> {
        match label {
            Label::Number(value) => Ok(Span {
                start: *value,
                end: *value,
                end_exclusive: false,
            }),
            Label::DateTime(datetime) => {
                let value = self.time_encoding(label)?.encode(*datetime);
                Ok(Span {
                    start: value,
                    end: value,
                    end_exclusive: false,
                })
            }
            Label::Date(date) => {
                let encoding = self.time_encoding(label)?;
                let midnight = date.and_time(chrono::NaiveTime::MIN);
                let next = midnight + TimeDelta::days(1);
                Ok(Span {
                    start: encoding.encode(midnight),
                    end: encoding.encode(next),
                    end_exclusive: true,
                })
            }
        }
    }

    fn time_encoding(&self, label: &Label) -> CatalogResult<&TimeEncoding> {
        self.time.as_ref().ok_or_else(|| CatalogError::InvalidConstraint {
            dimension: self.name.clone(),
            message: format!("time label {} on a dimension without time units", label),
        })
    }

    fn tolerance(&self, target: f64) -> f64 {
        // Coordinates are often stored as f32 and widened to f64 on read.
        let relative = if self.time.is_some() { 1e-9 } else { f32::EPSILON as f64 };
        relative * target.abs().max(1.0)
    }

    fn find_exact(&self, target: f64) -> Option<usize> {
        let tolerance = self.tolerance(target);
        self.values.iter().position(|v| (v - target).abs() <= tolerance)
    }

    fn find_range(&self, start: f64, end: f64, end_exclusive: bool) -> Vec<usize> {
        let lo = start - self.tolerance(start);
        let hi = if end_exclusive { end } else { end + self.tolerance(end) };
        let inside = |v: f64| v >= lo && if end_exclusive { v < hi } else { v <= hi };

        match self.orientation() {
            Orientation::Ascending => {
                let first = self.values.partition_point(|&v| v < lo);
                let last = first + self.values[first..].partition_point(|&v| inside(v));
                (first..last).collect()
            }
            Orientation::Descending => {
                let first = self.values.partition_point(|&v| !inside(v) && v > lo);
                let last = first + self.values[first..].partition_point(|&v| inside(v));
                (first..last).collect()
            }
            Orientation::Unordered => self
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| inside(**v))
                .map(|(idx, _)| idx)
                .collect(),
        }
    }
}

fn orientation_of(values: &[f64]) -> Orientation {
    if values.windows(2).all(|w| w[0] <= w[1]) {
        Orientation::Ascending
    } else if values.windows(2).all(|w| w[0] >= w[1]) {
        Orientation::Descending
    } else {
        Orientation::Unordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descending_latitude() -> Coordinate {
        Coordinate::new("latitude", (10..=30).rev().map(|v| v as f64).collect())
    }

    fn hourly_time() -> Coordinate {
        // 2020-01-01T00 .. 2020-01-03T23, hours since 2020-01-01
        Coordinate::new("time", (0..72).map(|h| h as f64).collect())
            .with_units("hours since 2020-01-01 00:00:00")
    }

    #[test]
    fn test_descending_range_returns_labels_not_empty() {
        let lat = descending_latitude();
        assert_eq!(lat.orientation(), Orientation::Descending);

        let selected = lat.select(&Constraint::range(25.0, 20.0)).unwrap();
        let Selected::Positions(positions) = selected else {
            panic!("Expected positions");
        };
        let labels: Vec<f64> = positions.iter().map(|&p| lat.values[p]).collect();
        assert_eq!(labels, vec![25.0, 24.0, 23.0, 22.0, 21.0, 20.0]);

        // Bounds in ascending order select the same labels
        let reversed = lat.select(&Constraint::range(20.0, 25.0)).unwrap();
        assert_eq!(reversed, Selected::Positions(positions));
    }

    #[test]
    fn test_ascending_range_inclusive() {
        let lon = Coordinate::new("longitude", (100..=130).map(|v| v as f64).collect());
        let Selected::Positions(positions) = lon.select(&Constraint::range(118, 123)).unwrap()
        else {
            panic!("Expected positions");
        };
        assert_eq!(positions, (18..=23).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_outside_extent_is_empty() {
        let lat = descending_latitude();
        let selected = lat.select(&Constraint::range(60.0, 50.0)).unwrap();
        assert_eq!(selected, Selected::Positions(vec![]));
    }

    #[test]
    fn test_unordered_coordinate_range() {
        let coord = Coordinate::new("station", vec![5.0, 1.0, 3.0, 9.0, 2.0]);
        assert_eq!(coord.orientation(), Orientation::Unordered);
        let selected = coord.select(&Constraint::range(2.0, 5.0)).unwrap();
        assert_eq!(selected, Selected::Positions(vec![0, 2, 4]));
    }

    #[test]
    fn test_single_label_and_missing_label() {
        let level = Coordinate::new("level", vec![1000.0, 850.0, 500.0]);
        assert_eq!(level.select(&Constraint::label(850)).unwrap(), Selected::Point(1));

        let missing = level.select(&Constraint::label(700));
        assert!(matches!(missing, Err(CatalogError::OutOfBounds { .. })));
    }

    #[test]
    fn test_label_matches_f32_widened_values() {
        let lat = Coordinate::new("lat", vec![0.1f32 as f64, 0.2f32 as f64]);
        assert_eq!(lat.select(&Constraint::label(0.2)).unwrap(), Selected::Point(1));
    }

    #[test]
    fn test_list_keeps_stored_order() {
        let level = Coordinate::new("level", vec![1000.0, 850.0, 500.0, 200.0]);
        let selected = level.select(&Constraint::list([200, 1000])).unwrap();
        assert_eq!(selected, Selected::Positions(vec![0, 3]));
    }

    #[test]
    fn test_date_range_covers_whole_end_day() {
        let time = hourly_time();
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let Selected::Positions(positions) = time.select(&Constraint::range(start, end)).unwrap()
        else {
            panic!("Expected positions");
        };
        assert_eq!(positions.len(), 48);
        assert_eq!(positions.last(), Some(&47));
    }

    #[test]
    fn test_bare_date_selects_the_day() {
        let time = hourly_time();
        let day = NaiveDate::from_ymd_opt(2020, 1, 3).unwrap();
        let selected = time.select(&Constraint::label(day)).unwrap();
        assert_eq!(selected, Selected::Positions((48..72).collect()));
    }

    #[test]
    fn test_datetime_label_exact() {
        let time = hourly_time();
        let at = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(time.select(&Constraint::label(at)).unwrap(), Selected::Point(30));
        assert_eq!(time.format_label(30), "2020-01-02T06:00:00");
    }

    #[test]
    fn test_date_label_without_time_units() {
        let lat = descending_latitude();
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let result = lat.select(&Constraint::label(day));
        assert!(matches!(result, Err(CatalogError::InvalidConstraint { .. })));
    }

    #[test]
    fn test_time_encoding_parse() {
        let enc = TimeEncoding::parse("hours since 1900-01-01 00:00:00.0").unwrap();
        assert_eq!(enc.unit, TimeUnit::Hours);
        assert_eq!(enc.epoch, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());

        let enc = TimeEncoding::parse("days since 2023-01-01").unwrap();
        assert_eq!(enc.unit, TimeUnit::Days);
        assert!(TimeEncoding::parse("degrees_north").is_none());
    }

    #[test]
    fn test_constraint_from_str() {
        assert_eq!("850".parse::<Constraint>().unwrap(), Constraint::label(850));
        assert_eq!("25:20".parse::<Constraint>().unwrap(), Constraint::range(25, 20));
        assert_eq!(
            "1000,850,500".parse::<Constraint>().unwrap(),
            Constraint::list([1000, 850, 500])
        );

        let date = |d| NaiveDate::from_ymd_opt(2020, 1, d).unwrap();
        assert_eq!(
            "2020-01-01:2020-01-31".parse::<Constraint>().unwrap(),
            Constraint::range(date(1), date(31))
        );
        assert_eq!(
            "2020-01-01T06:00:2020-01-02T06:00".parse::<Constraint>().unwrap(),
            Constraint::range(
                date(1).and_hms_opt(6, 0, 0).unwrap(),
                date(2).and_hms_opt(6, 0, 0).unwrap()
            )
        );
        assert!("north:south".parse::<Constraint>().is_err());
    }
}
