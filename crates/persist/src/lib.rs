//! Levy persistence: one JSON file per record, expired by file age.
//! Used for auxiliary profile data only; the ticket cache is never persisted.

#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

const DAY: Duration = Duration::from_secs(86_400);

pub trait RecordStore<T> {
    fn put(&self, id: i64, record: &T) -> Result<()>;
    /// `Ok(None)` for missing, expired or unreadable records.
    fn get(&self, id: i64) -> Result<Option<T>>;
}

/// Directory of `{id}.json` files. Files older than the retention window are
/// deleted on read and by `prune`.
pub struct JsonFileStore<T> {
    dir: PathBuf,
    retention: Duration,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    /// Open under `LEVY_PATRON_CACHE_DIR`, or `$HOME/.levy/patron-cache`.
    pub fn open_default(retention_days: u64) -> Result<Self> {
        let dir = std::env::var_os("LEVY_PATRON_CACHE_DIR").map(PathBuf::from).unwrap_or_else(default_dir);
        Self::open(dir, retention_days)
    }

    /// Create the directory if needed and drop anything already expired.
    pub fn open(dir: impl Into<PathBuf>, retention_days: u64) -> Result<Self> {
        let started = std::time::Instant::now();
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating record dir {}", dir.display()))?;
        let me = Self { dir, retention: DAY * retention_days.max(1) as u32, _record: PhantomData };
        let pruned = me.prune()?;
        if pruned > 0 {
            info!(dir = %me.dir.display(), pruned, "persist: pruned expired records");
        }
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, id: i64) -> PathBuf { self.dir.join(format!("{}.json", id)) }

    fn is_expired(&self, path: &Path, now: SystemTime) -> Result<bool> {
        let modified = std::fs::metadata(path)?.modified()?;
        // future mtimes count as fresh
        Ok(now.duration_since(modified).map(|age| age > self.retention).unwrap_or(false))
    }

    /// Delete every expired `.json` file; returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0usize;
        let entries = std::fs::read_dir(&self.dir).with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.is_expired(&path, now) {
                Ok(true) => {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "persist: remove failed");
                    } else {
                        removed += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "persist: stat failed"),
            }
        }
        counter!("persist_pruned_total", removed as u64);
        Ok(removed)
    }
}

impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn put(&self, id: i64, record: &T) -> Result<()> {
        let started = std::time::Instant::now();
        let path = self.path_for(id);
        let body = serde_json::to_vec_pretty(record).context("encoding record")?;
        std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<T>> {
        let started = std::time::Instant::now();
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        if self.is_expired(&path, SystemTime::now())? {
            debug!(id, "persist: record expired");
            std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            return Ok(None);
        }
        let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let out = match serde_json::from_slice::<T>(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(id, error = %e, "persist: unreadable record ignored");
                None
            }
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

fn default_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".levy");
        p.push("patron-cache");
        return p;
    }
    PathBuf::from("patron-cache")
}
