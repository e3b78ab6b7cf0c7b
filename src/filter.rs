use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::codec::RecordDecoder;
use crate::config::RecordLayout;
use crate::domain::{BoundingBox, ObjectKey};
use crate::record::EventRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum DropReason {
    NoEventsInRegion,
    NoEvents,
    DecodeFailed(String),
    FetchFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Keep(EventRecord),
    Drop(DropReason),
}

/// Outcome for one fetched object. A dropped object still produces a
/// result, an empty placeholder that occupies a window slot.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub key: ObjectKey,
    pub decision: Decision,
}

impl FilterResult {
    pub fn keep(record: EventRecord) -> Self {
        Self {
            key: record.key.clone(),
            decision: Decision::Keep(record),
        }
    }

    pub fn placeholder(key: ObjectKey, reason: DropReason) -> Self {
        Self {
            key,
            decision: Decision::Drop(reason),
        }
    }

    pub fn is_kept(&self) -> bool {
        matches!(self.decision, Decision::Keep(_))
    }

    pub fn record(&self) -> Option<&EventRecord> {
        match &self.decision {
            Decision::Keep(record) => Some(record),
            Decision::Drop(_) => None,
        }
    }

    pub fn drop_reason(&self) -> Option<&DropReason> {
        match &self.decision {
            Decision::Keep(_) => None,
            Decision::Drop(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoFilter {
    bbox: BoundingBox,
    layout: RecordLayout,
}

impl GeoFilter {
    pub fn new(bbox: BoundingBox, layout: RecordLayout) -> Self {
        Self { bbox, layout }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Decodes the staged file and classifies it. Decode failures become
    /// placeholders rather than errors.
    pub fn evaluate<D>(&self, decoder: &D, key: ObjectKey, path: &Path) -> FilterResult
    where
        D: RecordDecoder + ?Sized,
    {
        match decoder.decode(path) {
            Ok(dataset) => self.classify(EventRecord::new(key, dataset)),
            Err(err) => {
                debug!(object = %key, error = %err, "decode failed, keeping placeholder");
                FilterResult::placeholder(key, DropReason::DecodeFailed(err.to_string()))
            }
        }
    }

    pub fn classify(&self, record: EventRecord) -> FilterResult {
        if record.event_count(&self.layout) == 0 {
            return FilterResult::placeholder(record.key, DropReason::NoEvents);
        }
        let matching = match self.matching_events(&record) {
            Ok(matching) => matching,
            Err(message) => {
                return FilterResult::placeholder(record.key, DropReason::DecodeFailed(message));
            }
        };
        if matching == 0 {
            debug!(object = %record.key, "no events inside region");
            return FilterResult::placeholder(record.key, DropReason::NoEventsInRegion);
        }
        debug!(object = %record.key, matching, "events inside region");
        FilterResult::keep(record)
    }

    pub fn matching_events(&self, record: &EventRecord) -> Result<usize, String> {
        let (lons, lats) = record.coordinates(&self.layout)?;
        Ok(lons
            .iter()
            .zip(lats)
            .filter(|(lon, lat)| self.bbox.contains(**lon, **lat))
            .count())
    }
}
