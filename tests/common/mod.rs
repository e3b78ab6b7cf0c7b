#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;

use glm_aggregator::codec::RecordFormat;
use glm_aggregator::config::{Config, ConfigLoader, ResolvedConfig};
use glm_aggregator::domain::{Bucket, ObjectKey};
use glm_aggregator::error::GlmError;
use glm_aggregator::pipeline::{ProgressEvent, ProgressSink};
use glm_aggregator::record::{Dataset, Variable};
use glm_aggregator::retry::RetryPolicy;
use glm_aggregator::source::ObjectSource;

pub const INSIDE: (f64, f64) = (-43.2, -22.9);
pub const OUTSIDE: (f64, f64) = (-50.0, -10.0);

pub fn bucket() -> Bucket {
    bucket_at(14)
}

pub fn bucket_at(hour: u8) -> Bucket {
    Bucket::new(NaiveDate::from_ymd_opt(2023, 11, 18).unwrap(), hour).unwrap()
}

/// Key for the `minute`-th file of 2023-11-18 (day 322), hour 14.
pub fn glm_key(minute: u32, second: u32) -> String {
    glm_key_at(14, minute, second)
}

pub fn glm_key_at(hour: u8, minute: u32, second: u32) -> String {
    format!(
        "GLM-L2-LCFA/2023/322/{hour:02}/OR_GLM-L2-LCFA_G16_s2023322{hour:02}{minute:02}{second:02}0_e2023322{hour:02}{minute:02}{second:02}0_c2023322{hour:02}{minute:02}{second:02}1.nc"
    )
}

pub fn object_key(minute: u32, second: u32) -> ObjectKey {
    glm_key(minute, second).parse().unwrap()
}

/// A GLM-shaped dataset with one flash per point, plus event and group
/// variables that the merger is expected to drop.
pub fn glm_dataset(points: &[(f64, f64)]) -> Dataset {
    let flashes = points.len();
    let mut dataset = Dataset::default();
    dataset
        .dimensions
        .insert("number_of_flashes".to_string(), flashes);
    dataset
        .dimensions
        .insert("number_of_events".to_string(), flashes * 3);
    dataset
        .dimensions
        .insert("number_of_groups".to_string(), flashes * 2);
    dataset.variables.insert(
        "flash_lon".to_string(),
        Variable::new(
            &["number_of_flashes"],
            points.iter().map(|(lon, _)| *lon).collect(),
        ),
    );
    dataset.variables.insert(
        "flash_lat".to_string(),
        Variable::new(
            &["number_of_flashes"],
            points.iter().map(|(_, lat)| *lat).collect(),
        ),
    );
    dataset.variables.insert(
        "event_energy".to_string(),
        Variable::new(&["number_of_events"], vec![1.0; flashes * 3]),
    );
    dataset.variables.insert(
        "group_lat".to_string(),
        Variable::new(&["number_of_groups"], vec![-22.9; flashes * 2]),
    );
    dataset
        .variables
        .insert("product_time".to_string(), Variable::scalar(7.0e8));
    dataset
        .attributes
        .insert("platform_ID".to_string(), "G16".into());
    dataset
}

pub fn test_config(root: &Path, capacity: usize, workers: usize) -> ResolvedConfig {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    let config = Config {
        window_capacity: Some(capacity),
        workers: Some(workers),
        output_dir: Some(root.join("out").to_string()),
        staging_dir: Some(root.join("stage").to_string()),
        format: Some(RecordFormat::Json),
        ..Config::default()
    };
    let mut resolved = ConfigLoader::resolve_config(config).unwrap();
    resolved.retry = RetryPolicy::immediate(3);
    resolved
}

/// In-memory object store. Objects are served as the bytes stored for
/// their key; fetches can be slowed down or made to fail.
#[derive(Default)]
pub struct MockSource {
    listings: HashMap<Bucket, Vec<String>>,
    objects: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    flaky: Mutex<HashMap<String, usize>>,
    fetch_delay: Duration,
    unreachable: bool,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    active: AtomicUsize,
    pub peak_active: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn add_dataset(&mut self, bucket: Bucket, key: String, dataset: &Dataset) {
        let bytes = serde_json::to_vec(dataset).unwrap();
        self.add_bytes(bucket, key, bytes);
    }

    pub fn add_bytes(&mut self, bucket: Bucket, key: String, bytes: Vec<u8>) {
        self.listings.entry(bucket).or_default().push(key.clone());
        self.objects.insert(key, bytes);
    }

    pub fn add_listing_only(&mut self, bucket: Bucket, key: String) {
        self.listings.entry(bucket).or_default().push(key);
    }

    /// Every fetch of `key` fails with a transport error.
    pub fn fail_always(&mut self, key: &str) {
        self.failing.insert(key.to_string());
    }

    /// The first `failures` fetches of `key` fail with a transport error.
    pub fn fail_first(&mut self, key: &str, failures: usize) {
        self.flaky
            .lock()
            .unwrap()
            .insert(key.to_string(), failures);
    }

    pub fn peak(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn serve(&self, key: &str, destination: &Path) -> Result<(), GlmError> {
        if self.failing.contains(key) {
            return Err(GlmError::Transport(format!("connection reset: {key}")));
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GlmError::Transport(format!("timeout: {key}")));
                }
            }
        }
        let bytes = self
            .objects
            .get(key)
            .ok_or_else(|| GlmError::NotFound(key.to_string()))?;
        fs::write(destination, bytes).map_err(|err| GlmError::Staging {
            path: destination.to_path_buf(),
            message: err.to_string(),
        })
    }
}

impl ObjectSource for MockSource {
    fn list(&self, bucket: &Bucket) -> Result<Vec<String>, GlmError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.listings
            .get(bucket)
            .cloned()
            .ok_or_else(|| GlmError::NotFound(bucket.to_string()))
    }

    fn fetch(&self, key: &str, destination: &Path) -> Result<(), GlmError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        let result = self.serve(key, destination);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn probe(&self) -> Result<(), GlmError> {
        if self.unreachable {
            return Err(GlmError::Transport("dns error".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}
