use anyhow::Result;
use rand::Rng;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::subject_detection::SubjectDetectionResult;
use crate::utils::ProcessingStats;

/// How long a cached detection stays valid
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// How often the background sweeper purges expired entries
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Opaque identifier shared by every image of one batch
///
/// Generated ids look like `batch-<unix millis>-<8 hex>`; any other string is
/// still accepted as a key, it just carries no timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let suffix: u32 = rand::rng().random();
        Self(format!("batch-{}-{:08x}", millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in a generated id
    pub fn created_at_ms(&self) -> Option<u64> {
        let rest = self.0.strip_prefix("batch-")?;
        let (millis, suffix) = rest.split_once('-')?;
        if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        millis.parse().ok()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

struct BatchSlot {
    created: Instant,
    cell: OnceLock<SubjectDetectionResult>,
}

impl BatchSlot {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            cell: OnceLock::new(),
        }
    }
}

/// Detection results shared across the images of a batch
///
/// Each batch id owns one write-once slot. The first caller to reach a slot
/// computes the value; concurrent callers for the same id block until it is
/// committed and then all observe the same result.
pub struct BatchCache {
    slots: RwLock<HashMap<String, Arc<BatchSlot>>>,
    retention: Duration,
}

impl Default for BatchCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl BatchCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Existing live slot for `id`, or a fresh one
    fn slot(&self, id: &str) -> Arc<BatchSlot> {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(id) {
                if slot.created.elapsed() < self.retention {
                    return Arc::clone(slot);
                }
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(BatchSlot::new()));
        if slot.created.elapsed() >= self.retention {
            *slot = Arc::new(BatchSlot::new());
        }
        Arc::clone(slot)
    }

    /// Committed result for `id`, if any
    pub fn get(&self, id: &str) -> Option<SubjectDetectionResult> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(id)
            .filter(|slot| slot.created.elapsed() < self.retention)
            .and_then(|slot| slot.cell.get().cloned())
    }

    /// Store `result` unless the batch already has one; returns whether it was stored
    pub fn insert_if_absent(&self, id: &str, result: SubjectDetectionResult) -> bool {
        self.slot(id).cell.set(result).is_ok()
    }

    /// Return the committed result for `id`, computing it with `compute` if absent
    ///
    /// The map lock is not held while `compute` runs.
    pub fn get_or_insert_with<F>(&self, id: &str, compute: F) -> SubjectDetectionResult
    where
        F: FnOnce() -> SubjectDetectionResult,
    {
        let slot = self.slot(id);
        slot.cell.get_or_init(compute).clone()
    }

    /// Drop entries older than the retention window; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| slot.created.elapsed() < self.retention);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a background thread purging expired entries every `interval`
    ///
    /// The thread holds only a weak reference and exits when the returned
    /// guard is dropped or the cache itself goes away.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Result<CacheSweeper> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cache: Weak<BatchCache> = Arc::downgrade(self);

        let handle = std::thread::Builder::new()
            .name("batch-cache-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match cache.upgrade() {
                        Some(cache) => {
                            let removed = cache.purge_expired();
                            if removed > 0 {
                                debug!(removed, "purged expired batch entries");
                            }
                        }
                        None => break,
                    },
                    _ => break,
                }
            })?;

        Ok(CacheSweeper {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

/// Guard that stops the sweeper thread on drop
pub struct CacheSweeper {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Batch processing statistics and progress tracking
pub struct BatchProcessor {
    pub total_files: usize,
    pub processed_count: AtomicUsize,
    pub start_time: Instant,
}

impl BatchProcessor {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            processed_count: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Increment processed count and return current count
    pub fn increment(&self) -> usize {
        self.processed_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get current progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            1.0
        } else {
            (self.processed_count.load(Ordering::Relaxed) as f64) / (self.total_files as f64)
        }
    }

    /// Get estimated time remaining
    pub fn eta(&self) -> Option<Duration> {
        let processed = self.processed_count.load(Ordering::Relaxed);
        if processed == 0 {
            return None;
        }

        let remaining = self.total_files.saturating_sub(processed);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }

        let time_per_item = self.start_time.elapsed() / processed as u32;
        Some(time_per_item * remaining as u32)
    }
}

/// Process a batch with the first file on its own, then the rest in parallel
///
/// Running the first file alone lets it seed the batch cache before any other
/// worker asks for it. Results keep the input order.
pub fn process_files_ordered<T, F, P>(
    files: &[PathBuf],
    process_fn: F,
    progress_callback: P,
) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(&Path) -> Result<T> + Send + Sync,
    P: Fn(usize, f64, Option<Duration>) + Send + Sync,
{
    let Some((first, rest)) = files.split_first() else {
        return Vec::new();
    };

    let processor = BatchProcessor::new(files.len());
    let run = |file_path: &PathBuf| {
        let result = process_fn(file_path);
        let completed = processor.increment();
        progress_callback(completed, processor.progress(), processor.eta());
        result
    };

    let mut results = Vec::with_capacity(files.len());
    results.push(run(first));
    results.extend(rest.par_iter().map(run).collect::<Vec<_>>());
    results
}

/// Summarize a finished batch
pub fn calculate_final_stats<T>(
    results: &[Result<T>],
    processing_time: Duration,
    fallbacks: usize,
) -> ProcessingStats {
    let successful = results.iter().filter(|r| r.is_ok()).count();

    ProcessingStats {
        total_files: results.len(),
        successful,
        failed: results.len() - successful,
        fallbacks,
        total_duration: processing_time,
    }
}

/// Output file names for every image of a batch
///
/// All outputs land in one directory, so inputs sharing a stem (`a.jpg` and
/// `a.png`, or the same name in two folders) get their extension and, when
/// still ambiguous, a counter appended. Paths that resolve onto a batch
/// input are refused.
#[derive(Debug, Default)]
pub struct OutputNames {
    names: HashMap<PathBuf, String>,
    inputs: HashSet<PathBuf>,
}

impl OutputNames {
    pub fn new(files: &[PathBuf]) -> Self {
        let mut stem_counts: HashMap<String, usize> = HashMap::new();
        for file in files {
            *stem_counts.entry(file_stem(file)).or_default() += 1;
        }

        let mut taken = HashSet::new();
        let mut names = HashMap::new();
        for file in files {
            let stem = file_stem(file);
            let base = match file.extension().and_then(|e| e.to_str()) {
                Some(ext) if stem_counts.get(&stem).copied().unwrap_or(0) > 1 => {
                    format!("{}_{}", stem, ext.to_lowercase())
                }
                _ => stem,
            };

            let mut name = base.clone();
            let mut counter = 2;
            while !taken.insert(name.clone()) {
                name = format!("{}_{}", base, counter);
                counter += 1;
            }
            names.insert(file.clone(), name);
        }

        Self {
            names,
            inputs: files.iter().map(|f| canonical(f)).collect(),
        }
    }

    /// `<output_dir>/<name><suffix>.<extension>` for `input`
    pub fn path(&self, output_dir: &Path, input: &Path, suffix: &str, extension: &str) -> Result<PathBuf> {
        let name = self
            .names
            .get(input)
            .cloned()
            .unwrap_or_else(|| file_stem(input));
        let path = output_dir.join(format!("{}{}.{}", name, suffix, extension));

        let resolved = match (fs::canonicalize(output_dir), path.file_name()) {
            (Ok(dir), Some(file_name)) => dir.join(file_name),
            _ => path.clone(),
        };
        if resolved == canonical(input) || self.inputs.contains(&resolved) {
            return Err(anyhow::anyhow!(
                "Refusing to overwrite input image: {}",
                resolved.display()
            ));
        }

        Ok(path)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string()
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::subject_detection::{DetectionMethod, FocalPoint};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn detection(x: u32, y: u32, score: f32) -> SubjectDetectionResult {
        SubjectDetectionResult {
            primary: FocalPoint { x, y, score },
            secondary: None,
            method: DetectionMethod::General,
        }
    }

    #[test]
    fn test_batch_id_format() {
        let id = BatchId::generate();
        assert!(id.as_str().starts_with("batch-"));
        assert!(id.created_at_ms().is_some());

        let suffix = id.as_str().rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_batch_id_parse() {
        let id = BatchId::from("batch-1700000000000-deadbeef");
        assert_eq!(id.created_at_ms(), Some(1_700_000_000_000));

        assert_eq!(BatchId::from("holiday-2024").created_at_ms(), None);
        assert_eq!(BatchId::from("batch-123-xyz").created_at_ms(), None);
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let cache = BatchCache::default();
        assert!(cache.insert_if_absent("b1", detection(10, 20, 3.0)));
        assert!(!cache.insert_if_absent("b1", detection(99, 99, 9.0)));

        assert_eq!(cache.get("b1"), Some(detection(10, 20, 3.0)));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let cache = Arc::new(BatchCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache.get_or_insert_with("shared", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        detection(i, i, 1.0)
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_expired_entries_are_purged() {
        let cache = BatchCache::new(Duration::from_millis(10));
        cache.insert_if_absent("old", detection(1, 1, 1.0));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweeper_purges_and_stops() {
        let cache = Arc::new(BatchCache::new(Duration::from_millis(5)));
        cache.insert_if_absent("a", detection(1, 1, 1.0));

        let sweeper = cache.spawn_sweeper(Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(cache.is_empty());

        drop(sweeper);
    }

    #[test]
    fn test_batch_processor_progress() {
        let processor = BatchProcessor::new(10);

        assert_eq!(processor.progress(), 0.0);
        assert!(processor.eta().is_none());

        processor.increment();
        assert!((processor.progress() - 0.1).abs() < 0.01);

        for _ in 0..9 {
            processor.increment();
        }
        assert!((processor.progress() - 1.0).abs() < 0.01);
        assert_eq!(processor.eta(), Some(Duration::ZERO));
    }

    #[test]
    fn test_process_files_ordered_keeps_order() {
        let files: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        let seen = AtomicUsize::new(0);

        let results = process_files_ordered(
            &files,
            |path| Ok(path.to_string_lossy().to_string()),
            |_, _, _| {
                seen.fetch_add(1, Ordering::Relaxed);
            },
        );

        let names: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(names, vec!["0.jpg", "1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"]);
        assert_eq!(seen.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_calculate_final_stats() {
        let results: Vec<Result<()>> = vec![Ok(()), Err(anyhow::anyhow!("error")), Ok(())];

        let stats = calculate_final_stats(&results, Duration::from_secs(10), 1);

        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.fallbacks, 1);
        assert!((stats.success_rate() - 66.67).abs() < 0.1);
    }

    #[test]
    fn test_output_names_disambiguate_shared_stems() {
        let files = vec![
            PathBuf::from("/in/a.jpg"),
            PathBuf::from("/in/a.png"),
            PathBuf::from("/in/sub/a.png"),
            PathBuf::from("/in/b.jpg"),
        ];
        let names = OutputNames::new(&files);
        let out = Path::new("/out");

        assert_eq!(names.path(out, &files[0], "_crop", "png").unwrap(), out.join("a_jpg_crop.png"));
        assert_eq!(names.path(out, &files[1], "_crop", "png").unwrap(), out.join("a_png_crop.png"));
        assert_eq!(names.path(out, &files[2], "_crop", "png").unwrap(), out.join("a_png_2_crop.png"));
        assert_eq!(names.path(out, &files[3], "_crop", "png").unwrap(), out.join("b_crop.png"));
    }

    #[test]
    fn test_output_names_refuse_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.png");
        let cropped = dir.path().join("photo_crop.png");
        fs::write(&photo, b"x").unwrap();
        fs::write(&cropped, b"y").unwrap();

        let names = OutputNames::new(&[photo.clone(), cropped.clone()]);
        // photo.png would land on photo_crop.png, which is itself an input
        assert!(names.path(dir.path(), &photo, "_crop", "png").is_err());
        assert!(names.path(dir.path(), &photo, "", "png").is_err());
        assert!(names.path(dir.path(), &cropped, "_crop", "png").is_ok());
    }
}
