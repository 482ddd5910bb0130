#![forbid(unsafe_code)]

use std::time::Instant;

use levy_api::{LevyError, LevyResult};
use levy_core::TicketPage;
use levy_view::FilterType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::{MonitorEvent, MonitorMsg, ReloadOrigin};
use crate::LevyMonitor;

impl LevyMonitor {
    /// Fetch everything and replace the cache. A newer request cancels the one in flight.
    pub(crate) fn start_reload(&mut self, origin: ReloadOrigin) {
        if let Some(tok) = self.reload.cancel.take() {
            info!(generation = self.reload.generation, "reload: superseded");
            tok.cancel();
        } else {
            self.reload.supervised = false;
        }
        self.reload.supervised |= origin == ReloadOrigin::Supervisor;
        self.reload.generation += 1;
        let generation = self.reload.generation;
        let token = CancellationToken::new();
        self.reload.cancel = Some(token.clone());
        if origin == ReloadOrigin::User {
            self.is_loading = true;
            self.publish(Some(MonitorEvent::PageChanged));
        }

        let api = self.api.clone();
        let tx = self.tx.clone();
        let page_size = self.cfg.reload_page_size;
        info!(generation, ?origin, "reload: start");
        tokio::spawn(async move {
            let t0 = Instant::now();
            let outcome: LevyResult<TicketPage> = tokio::select! {
                biased;
                _ = token.cancelled() => Err(LevyError::Cancelled),
                r = api.fetch_tickets(1, page_size, FilterType::All.as_wire()) => r,
            };
            match &outcome {
                Ok(p) => info!(generation, items = p.items.len(), took_ms = %t0.elapsed().as_millis(), "reload: fetched"),
                Err(e) => debug!(generation, error = %e, took_ms = %t0.elapsed().as_millis(), "reload: fetch ended"),
            }
            let _ = tx.send(MonitorMsg::ReloadDone { generation, origin, outcome });
        });
    }

    pub(crate) fn on_reload_done(&mut self, generation: u64, origin: ReloadOrigin, outcome: LevyResult<TicketPage>) {
        if generation != self.reload.generation {
            debug!(generation, current = self.reload.generation, "reload: stale result dropped");
            return;
        }
        self.reload.cancel = None;
        let supervised = std::mem::take(&mut self.reload.supervised);
        self.is_loading = false;

        match outcome {
            Ok(page) => {
                metrics::counter!("reload_ok_total", 1u64);
                if page.items.is_empty() {
                    warn!(?origin, "reload: no data returned, keeping cached tickets");
                } else {
                    // restart against the fresh baseline so no ticket is counted twice
                    self.stop_countdown();
                    let n = self.cache.replace(page.items);
                    self.start_countdown();
                    info!(?origin, tickets = n, "reload: cache replaced");
                }
                if supervised {
                    let action = self.supervisor.reload_succeeded();
                    self.apply_supervisor(action);
                }
                self.start_pipeline();
                self.publish(Some(MonitorEvent::StatusChanged));
            }
            Err(e) if e.is_cancelled() => {
                debug!(?origin, "reload: cancelled");
                self.publish(None);
            }
            Err(e) => {
                metrics::counter!("reload_failed_total", 1u64);
                warn!(?origin, error = %e, "reload: failed");
                if origin == ReloadOrigin::User {
                    self.publish(Some(MonitorEvent::LoadFailed(e.to_string())));
                }
                if supervised {
                    let action = self.supervisor.reload_failed();
                    self.apply_supervisor(action);
                }
                self.publish(Some(MonitorEvent::StatusChanged));
            }
        }
    }

    /// Refresh scheduler tick: reload when the cache is stale and we are online.
    pub(crate) fn on_refresh_tick(&mut self) {
        if !self.supervisor.is_connected() {
            debug!(state = ?self.supervisor.state(), "refresh: skipped while offline");
            return;
        }
        if self.reload.in_flight() {
            debug!("refresh: reload already in flight");
            return;
        }
        let expiry = chrono::Duration::from_std(self.cfg.cache_expiry).unwrap_or_else(|_| chrono::Duration::seconds(30));
        if self.cache.is_stale(chrono::Utc::now(), expiry) {
            self.start_reload(ReloadOrigin::Scheduler);
        }
    }
}
