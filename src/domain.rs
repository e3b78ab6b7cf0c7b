use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::GlmError;

/// Inclusive lon/lat rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Result<Self, GlmError> {
        let bbox = Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), GlmError> {
        let values = [self.lon_min, self.lon_max, self.lat_min, self.lat_max];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(GlmError::InvalidConfig(
                "bounding box values must be finite".to_string(),
            ));
        }
        if self.lon_min > self.lon_max || self.lat_min > self.lat_max {
            return Err(GlmError::InvalidConfig(format!(
                "bounding box is inverted: lon [{}, {}], lat [{}, {}]",
                self.lon_min, self.lon_max, self.lat_min, self.lat_max
            )));
        }
        if self.lon_min < -180.0 || self.lon_max > 180.0 {
            return Err(GlmError::InvalidConfig(
                "longitude must lie within [-180, 180]".to_string(),
            ));
        }
        if self.lat_min < -90.0 || self.lat_max > 90.0 {
            return Err(GlmError::InvalidConfig(
                "latitude must lie within [-90, 90]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            lon_min: -43.7,
            lon_max: -43.0,
            lat_min: -23.2,
            lat_max: -22.7,
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, GlmError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| GlmError::InvalidDate(value.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, GlmError> {
        if start > end {
            return Err(GlmError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, GlmError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), |day| day.succ_opt())
            .take_while(move |day| *day <= end)
    }

    /// Every (date, hour) bucket of the range in chronological order,
    /// restricted to `hours` when given.
    pub fn buckets(&self, hours: Option<&[u8]>) -> Vec<Bucket> {
        let mut buckets = Vec::new();
        for date in self.days() {
            for hour in 0..24u8 {
                if hours.is_some_and(|selected| !selected.contains(&hour)) {
                    continue;
                }
                buckets.push(Bucket { date, hour });
            }
        }
        buckets
    }
}

/// One listing and windowing unit: a calendar date plus an hour of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    date: NaiveDate,
    hour: u8,
}

impl Bucket {
    pub fn new(date: NaiveDate, hour: u8) -> Result<Self, GlmError> {
        if hour > 23 {
            return Err(GlmError::InvalidConfig(format!("hour out of range: {hour}")));
        }
        Ok(Self { date, hour })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn day_of_year(&self) -> u32 {
        self.date.ordinal()
    }

    /// `PRODUCT/YYYY/DDD/HH/`, the object store prefix holding this hour.
    pub fn listing_prefix(&self, product: &str) -> String {
        format!(
            "{product}/{:04}/{:03}/{:02}/",
            self.year(),
            self.day_of_year(),
            self.hour
        )
    }

    pub fn artifact_file_name(&self, sequence: usize, extension: &str) -> String {
        format!(
            "glm_agg_{}_{:02}_{:03}.{extension}",
            self.date.format("%Y%m%d"),
            self.hour,
            sequence
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{:02}", self.date, self.hour)
    }
}

impl Serialize for Bucket {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Remote identifier of one GLM file. The scan start time embedded in the
/// file name (`_sYYYYDDDHHMMSSt`) orders keys chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    key: String,
    start: NaiveDateTime,
}

impl ObjectKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl Serialize for ObjectKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl FromStr for ObjectKey {
    type Err = GlmError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_string();
        let file_name = key.rsplit('/').next().unwrap_or(&key);
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let start = stem
            .split('_')
            .find_map(parse_scan_field)
            .ok_or_else(|| GlmError::InvalidObjectKey(value.to_string()))?;
        Ok(Self { key, start })
    }
}

fn parse_scan_field(field: &str) -> Option<NaiveDateTime> {
    let digits = field.strip_prefix('s')?;
    if digits.len() != 14 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let number = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();
    let year = digits[0..4].parse::<i32>().ok()?;
    let date = NaiveDate::from_yo_opt(year, number(4..7)?)?;
    date.and_hms_milli_opt(
        number(7..9)?,
        number(9..11)?,
        number(11..13)?,
        number(13..14)? * 100,
    )
}
