#![forbid(unsafe_code)]

use std::time::Instant;

use tracing::{info, warn};

use crate::model::MonitorMsg;
use crate::LevyMonitor;

impl LevyMonitor {
    /// Resolve `Version: <v>` from the deployment manifest, falling back to the configured version.
    pub(crate) fn start_version_lookup(&self) {
        let api = self.api.clone();
        let tx = self.tx.clone();
        let code = self.cfg.app_code.clone();
        let fallback = self.cfg.fallback_version_text();
        tokio::spawn(async move {
            let t0 = Instant::now();
            let text = match api.fetch_manifest(&code).await {
                Ok(Some(m)) if !m.version.trim().is_empty() => format!("Version: {}", m.version.trim()),
                Ok(_) => {
                    info!(app_code = %code, "version: no manifest, using fallback");
                    fallback
                }
                Err(e) => {
                    warn!(app_code = %code, error = %e, took_ms = %t0.elapsed().as_millis(), "version: manifest fetch failed");
                    fallback
                }
            };
            let _ = tx.send(MonitorMsg::Version(text));
        });
    }
}
