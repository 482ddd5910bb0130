//! Patron lookup: file cache first, then the remote source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use levy_core::PatronRecord;
use levy_persist::{JsonFileStore, RecordStore};
use tracing::{info, warn};

use crate::{LevyApi, LevyResult};

pub const NO_INFO_TEXT: &str = "No information available";
pub const ERROR_TEXT: &str = "Error loading information";

pub struct PatronService {
    api: Arc<dyn LevyApi>,
    store: Option<JsonFileStore<PatronRecord>>,
}

impl PatronService {
    /// Opening the store prunes expired records.
    pub fn open(api: Arc<dyn LevyApi>, dir: Option<PathBuf>, retention_days: u64) -> anyhow::Result<Self> {
        let store = match dir {
            Some(d) => JsonFileStore::open(d, retention_days)?,
            None => JsonFileStore::open_default(retention_days)?,
        };
        Ok(Self { api, store: Some(store) })
    }

    pub fn without_cache(api: Arc<dyn LevyApi>) -> Self { Self { api, store: None } }

    /// Cached or fetched record. Fetched records with an id above zero are cached.
    pub async fn get(&self, patron_id: i64) -> LevyResult<Option<PatronRecord>> {
        if let Some(store) = &self.store {
            match store.get(patron_id) {
                Ok(Some(rec)) => {
                    metrics::counter!("patron_cache_hits_total", 1u64);
                    info!(patron_id, "patron: loaded from cache");
                    return Ok(Some(rec));
                }
                Ok(None) => {}
                Err(e) => warn!(patron_id, error = %e, "patron: cache read failed"),
            }
        }
        let t0 = Instant::now();
        let fetched = self.api.fetch_patron(patron_id).await?;
        let rec = match fetched {
            Some(mut rec) if rec.patron_id > 0 => {
                rec.normalize_gender();
                if let Some(store) = &self.store {
                    if let Err(e) = store.put(rec.patron_id, &rec) {
                        warn!(patron_id, error = %e, "patron: cache write failed");
                    }
                }
                Some(rec)
            }
            _ => None,
        };
        info!(patron_id, found = rec.is_some(), took_ms = %t0.elapsed().as_millis(), "patron: fetched");
        Ok(rec)
    }

    /// Never fails: missing records and errors become placeholder records.
    pub async fn lookup(&self, patron_id: i64) -> PatronRecord {
        match self.get(patron_id).await {
            Ok(Some(mut rec)) => {
                rec.normalize_gender();
                rec
            }
            Ok(None) => PatronRecord::placeholder(patron_id, NO_INFO_TEXT),
            Err(e) => {
                warn!(patron_id, error = %e, "patron: lookup failed");
                PatronRecord::placeholder(patron_id, ERROR_TEXT)
            }
        }
    }
}
