#![forbid(unsafe_code)]

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connectivity::SupervisorAction;
use crate::model::{MonitorEvent, MonitorMsg};
use crate::LevyMonitor;

impl LevyMonitor {
    /// Refresh scheduler and network poll. Both stop with the shutdown token.
    pub(crate) fn start_timers(&mut self) {
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        let every = self.cfg.refresh_interval;
        self.timers.push(tokio::spawn(async move {
            let mut iv = ticker(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = iv.tick() => {
                        if tx.send(MonitorMsg::RefreshTick).is_err() { break; }
                    }
                }
            }
        }));

        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        let api = self.api.clone();
        let every = self.cfg.network_poll;
        self.timers.push(tokio::spawn(async move {
            let mut iv = ticker(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = iv.tick() => {
                        let up = api.probe_network().await;
                        if tx.send(MonitorMsg::NetworkChanged(up)).is_err() { break; }
                    }
                }
            }
        }));
    }

    pub(crate) fn on_network_changed(&mut self, up: bool) {
        let before = (self.supervisor.state(), self.supervisor.attempt());
        let action = if up { self.supervisor.network_restored() } else { self.supervisor.network_lost() };
        if before != (self.supervisor.state(), self.supervisor.attempt()) {
            info!(up, state = ?self.supervisor.state(), message = %self.supervisor.message(), "connectivity: changed");
        }
        self.apply_supervisor(action);
        if before != (self.supervisor.state(), self.supervisor.attempt()) {
            self.publish(Some(MonitorEvent::StatusChanged));
        }
    }

    pub(crate) fn on_retry_due(&mut self, episode: u64) {
        let action = self.supervisor.retry_due(episode);
        if action == SupervisorAction::None {
            debug!(episode, "connectivity: stale retry ignored");
            return;
        }
        self.apply_supervisor(action);
        self.publish(Some(MonitorEvent::StatusChanged));
    }

    pub(crate) fn apply_supervisor(&mut self, action: SupervisorAction) {
        match action {
            SupervisorAction::None => {}
            SupervisorAction::Reload => {
                metrics::counter!("reconnect_attempts_total", 1u64);
                info!(attempt = self.supervisor.attempt(), "connectivity: reconnect attempt");
                self.start_reload(crate::model::ReloadOrigin::Supervisor);
            }
            SupervisorAction::RetryAfter { delay, episode } => {
                let tx = self.tx.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(MonitorMsg::RetryDue { episode });
                        }
                    }
                });
            }
            SupervisorAction::GaveUp => {
                metrics::counter!("reconnect_gave_up_total", 1u64);
                warn!(message = %self.supervisor.message(), "connectivity: retries exhausted");
            }
        }
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let every = every.max(Duration::from_millis(1));
    let mut iv = interval_at(Instant::now() + every, every);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    iv
}
