use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::RecordCodec;
use crate::config::ResolvedConfig;
use crate::domain::{Bucket, DateRange, ObjectKey};
use crate::error::GlmError;
use crate::filter::{DropReason, FilterResult, GeoFilter};
use crate::merge::Merger;
use crate::scheduler::FetchScheduler;
use crate::source::ObjectSource;
use crate::staging::{StagingArea, StagingDir};
use crate::window::{BatchAccumulator, CompletedWindow, WindowTrigger};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub start: String,
    pub end: String,
    pub buckets: Vec<BucketReport>,
}

impl RunReport {
    pub fn artifact_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.artifacts.len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.failures.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub bucket: Bucket,
    pub listed: usize,
    pub kept: usize,
    pub dropped: usize,
    pub empty_windows: usize,
    pub artifacts: Vec<ArtifactReport>,
    pub failures: Vec<FailureReport>,
}

impl BucketReport {
    fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            listed: 0,
            kept: 0,
            dropped: 0,
            empty_windows: 0,
            artifacts: Vec::new(),
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    pub path: String,
    pub window: usize,
    pub trigger: WindowTrigger,
    pub source_slots: usize,
    pub records: usize,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Listing,
    InvalidKey,
    Staging,
    Fetch,
    Decode,
    Merge,
    Write,
}

/// One unit that did not make it into an artifact, with enough identity to
/// reprocess it.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub bucket: Bucket,
    pub stage: FailureStage,
    pub object: Option<String>,
    pub window: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub start: String,
    pub end: String,
    pub buckets: Vec<PlannedBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedBucket {
    pub bucket: Bucket,
    pub objects: usize,
    pub windows: usize,
    pub error: Option<String>,
}

pub struct Pipeline<S: ObjectSource> {
    config: ResolvedConfig,
    source: S,
    codec: Box<dyn RecordCodec>,
    filter: GeoFilter,
    merger: Merger,
    scheduler: FetchScheduler,
    staging: StagingArea,
}

impl<S: ObjectSource> Pipeline<S> {
    pub fn new(config: ResolvedConfig, source: S, codec: Box<dyn RecordCodec>) -> Self {
        let filter = GeoFilter::new(config.bbox, config.layout.clone());
        let merger = Merger::new(config.layout.clone(), config.output_dir.clone());
        let scheduler = FetchScheduler::new(config.workers);
        let staging = StagingArea::new(config.staging_dir.clone());
        Self {
            config,
            source,
            codec,
            filter,
            merger,
            scheduler,
            staging,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Processes every bucket of the range in order. Only configuration
    /// problems (an unreachable store, an unusable staging root) abort the
    /// run; everything else lands in the report.
    pub fn run(
        &self,
        range: &DateRange,
        hours: Option<&[u8]>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, GlmError> {
        let started = Instant::now();
        self.probe(sink)?;
        let purged = self.staging.purge_stale()?;
        if purged > 0 {
            info!(purged, root = %self.staging.root(), "removed stale staging directories");
        }

        let buckets = range.buckets(hours);
        info!(
            start = %range.start(),
            end = %range.end(),
            buckets = buckets.len(),
            "starting aggregation"
        );
        let reports = buckets
            .into_iter()
            .map(|bucket| self.process_bucket(bucket, sink))
            .collect();

        let report = RunReport {
            start: range.start().to_string(),
            end: range.end().to_string(),
            buckets: reports,
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} artifacts, {} failures",
                report.artifact_count(),
                report.failure_count()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    /// Lists every bucket without fetching anything.
    pub fn plan(
        &self,
        range: &DateRange,
        hours: Option<&[u8]>,
        sink: &dyn ProgressSink,
    ) -> Result<PlanReport, GlmError> {
        self.probe(sink)?;
        let capacity = self.config.window_capacity;
        let buckets = range
            .buckets(hours)
            .into_iter()
            .map(|bucket| {
                sink.event(ProgressEvent {
                    message: format!("phase=List; {bucket}"),
                    elapsed: None,
                });
                match self.list_keys(&bucket) {
                    Ok((keys, _)) => PlannedBucket {
                        bucket,
                        objects: keys.len(),
                        windows: keys.len().div_ceil(capacity),
                        error: None,
                    },
                    Err(err) => PlannedBucket {
                        bucket,
                        objects: 0,
                        windows: 0,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect();
        Ok(PlanReport {
            start: range.start().to_string(),
            end: range.end().to_string(),
            buckets,
        })
    }

    pub fn process_bucket(&self, bucket: Bucket, sink: &dyn ProgressSink) -> BucketReport {
        let started = Instant::now();
        let mut report = BucketReport::new(bucket);
        sink.event(ProgressEvent {
            message: format!("phase=List; {bucket}"),
            elapsed: None,
        });

        let keys = match self.list_keys(&bucket) {
            Ok((keys, invalid)) => {
                report.failures.extend(invalid);
                keys
            }
            Err(err) => {
                warn!(%bucket, error = %err, "listing failed, skipping hour");
                report.failures.push(FailureReport {
                    bucket,
                    stage: FailureStage::Listing,
                    object: None,
                    window: None,
                    message: err.to_string(),
                });
                return report;
            }
        };
        report.listed = keys.len();
        if keys.is_empty() {
            info!(%bucket, "no objects for hour");
            return report;
        }

        let staging = match self.staging.acquire(&bucket) {
            Ok(staging) => staging,
            Err(err) => {
                warn!(%bucket, error = %err, "cannot stage hour");
                report.failures.push(FailureReport {
                    bucket,
                    stage: FailureStage::Staging,
                    object: None,
                    window: None,
                    message: err.to_string(),
                });
                return report;
            }
        };

        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; {bucket}: {} objects on {} workers",
                keys.len(),
                self.scheduler.workers()
            ),
            elapsed: None,
        });

        let mut accumulator = BatchAccumulator::new(bucket, self.config.window_capacity);
        let mut object_failures = Vec::new();
        let mut window_outcomes = WindowOutcomes::default();
        let mut kept = 0;
        let mut dropped = 0;
        {
            let mut emit = |window: CompletedWindow| {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Merge; {bucket} window {} ({} slots)",
                        window.sequence,
                        window.source_slots()
                    ),
                    elapsed: None,
                });
                self.emit_window(&window, &mut window_outcomes);
            };
            self.scheduler.run(
                keys,
                |_, key: ObjectKey| self.fetch_and_filter(&staging, key),
                |index, result: FilterResult| {
                    if result.is_kept() {
                        kept += 1;
                    } else {
                        dropped += 1;
                    }
                    if let Some(failure) = object_failure(&bucket, &result) {
                        object_failures.push(failure);
                    }
                    accumulator.add(index, result, &mut emit);
                },
            );
            accumulator.finish(&mut emit);
        }

        if let Err(err) = staging.clear() {
            warn!(%bucket, error = %err, "failed to clear staging directory");
        }

        report.kept = kept;
        report.dropped = dropped;
        report.empty_windows = window_outcomes.empty;
        report.artifacts = window_outcomes.artifacts;
        report.failures.extend(object_failures);
        report.failures.extend(window_outcomes.failures);
        info!(
            %bucket,
            listed = report.listed,
            kept = report.kept,
            artifacts = report.artifacts.len(),
            failures = report.failures.len(),
            "hour complete"
        );
        sink.event(ProgressEvent {
            message: format!("phase=Bucket; {bucket} done"),
            elapsed: Some(started.elapsed()),
        });
        report
    }

    fn probe(&self, sink: &dyn ProgressSink) -> Result<(), GlmError> {
        sink.event(ProgressEvent {
            message: format!("phase=Probe; {}", self.config.source.base_url),
            elapsed: None,
        });
        self.config
            .retry
            .run("probe", GlmError::is_transient, |_| self.source.probe())
            .map_err(|err| match err {
                GlmError::StoreUnreachable(_) => err,
                other => {
                    GlmError::StoreUnreachable(format!("{}: {other}", self.config.source.base_url))
                }
            })
    }

    /// Lists the bucket and orders its keys by scan start, ties by listing
    /// order. A missing hour is an empty listing. Keys that do not parse
    /// are reported and skipped.
    fn list_keys(&self, bucket: &Bucket) -> Result<(Vec<ObjectKey>, Vec<FailureReport>), GlmError> {
        let raw = match self
            .config
            .retry
            .run("list", GlmError::is_transient, |_| self.source.list(bucket))
        {
            Ok(raw) => raw,
            Err(err) if err.is_not_found() => {
                debug!(%bucket, "hour not present in store");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut keys = Vec::with_capacity(raw.len());
        let mut invalid = Vec::new();
        for key in raw {
            match key.parse::<ObjectKey>() {
                Ok(parsed) => keys.push(parsed),
                Err(err) => {
                    warn!(%bucket, object = %key, error = %err, "skipping unparseable key");
                    invalid.push(FailureReport {
                        bucket: *bucket,
                        stage: FailureStage::InvalidKey,
                        object: Some(key),
                        window: None,
                        message: err.to_string(),
                    });
                }
            }
        }
        keys.sort_by_key(ObjectKey::start_time);
        Ok((keys, invalid))
    }

    fn fetch_and_filter(&self, staging: &StagingDir, key: ObjectKey) -> FilterResult {
        let path = staging.place(&key);
        let fetched = self.config.retry.run("fetch", GlmError::is_transient, |_| {
            self.source.fetch(key.as_str(), path.as_std_path())
        });
        if let Err(err) = fetched {
            warn!(object = %key, error = %err, "fetch failed, keeping placeholder");
            staging.release(&path);
            return FilterResult::placeholder(key, DropReason::FetchFailed(err.to_string()));
        }
        let result = self
            .filter
            .evaluate(self.codec.as_ref(), key, path.as_std_path());
        staging.release(&path);
        result
    }

    fn emit_window(&self, window: &CompletedWindow, outcomes: &mut WindowOutcomes) {
        let failure = |stage: FailureStage, err: GlmError| FailureReport {
            bucket: window.bucket,
            stage,
            object: None,
            window: Some(window.sequence),
            message: err.to_string(),
        };
        let artifact = match self.merger.merge(window) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                info!(
                    bucket = %window.bucket,
                    window = window.sequence,
                    slots = window.source_slots(),
                    "window has no records inside region, nothing written"
                );
                outcomes.empty += 1;
                return;
            }
            Err(err) => {
                warn!(bucket = %window.bucket, window = window.sequence, error = %err, "merge failed");
                outcomes.failures.push(failure(FailureStage::Merge, err));
                return;
            }
        };
        match self.merger.write(&artifact, self.codec.as_ref()) {
            Ok(path) => outcomes.artifacts.push(ArtifactReport {
                path: path.to_string(),
                window: artifact.sequence,
                trigger: artifact.trigger,
                source_slots: artifact.source_slots,
                records: artifact.record_count,
                occurrences: artifact.occurrence_count,
            }),
            Err(err) => {
                warn!(bucket = %window.bucket, window = window.sequence, error = %err, "artifact write failed");
                outcomes.failures.push(failure(FailureStage::Write, err));
            }
        }
    }
}

#[derive(Default)]
struct WindowOutcomes {
    artifacts: Vec<ArtifactReport>,
    failures: Vec<FailureReport>,
    empty: usize,
}

fn object_failure(bucket: &Bucket, result: &FilterResult) -> Option<FailureReport> {
    let (stage, message) = match result.drop_reason()? {
        DropReason::FetchFailed(message) => (FailureStage::Fetch, message),
        DropReason::DecodeFailed(message) => (FailureStage::Decode, message),
        DropReason::NoEvents | DropReason::NoEventsInRegion => return None,
    };
    Some(FailureReport {
        bucket: *bucket,
        stage,
        object: Some(result.key.to_string()),
        window: None,
        message: message.clone(),
    })
}

/// Forwards progress events to the log.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}
