#![forbid(unsafe_code)]

use std::time::Instant;

use levy_api::LevyError;
use levy_core::{LinkEvent, LinkState, PushEvent, PushMessage};
use levy_store::UpsertOutcome;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::{MonitorEvent, MonitorMsg, PushStatus, ReloadOrigin};
use crate::LevyMonitor;

impl LevyMonitor {
    pub(crate) fn start_push(&mut self) {
        if !self.cfg.push_enabled {
            self.push.status = PushStatus::Disabled;
            return;
        }
        self.open_push();
    }

    /// Subscribe under a new generation and forward messages into the loop until
    /// the stream ends or the generation is cancelled.
    fn open_push(&mut self) {
        if let Some(tok) = self.push.cancel.take() {
            tok.cancel();
        }
        self.push.generation += 1;
        let generation = self.push.generation;
        let token = CancellationToken::new();
        self.push.cancel = Some(token.clone());
        if self.push.attempts == 0 {
            self.push.status = PushStatus::Connecting;
        }
        let api = self.api.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let t0 = Instant::now();
            let mut stream = match api.subscribe_push().await {
                Ok(s) => s,
                Err(error) => {
                    let _ = tx.send(MonitorMsg::PushFailed { generation, error });
                    return;
                }
            };
            info!(generation, took_ms = %t0.elapsed().as_millis(), "push: subscribed");
            let _ = tx.send(MonitorMsg::PushOpened { generation });
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        stream.cancel.cancel();
                        return;
                    }
                    m = stream.rx.recv() => match m {
                        Some(msg) => {
                            if tx.send(MonitorMsg::Push { generation, msg }).is_err() {
                                stream.cancel.cancel();
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
            let _ = tx.send(MonitorMsg::PushEnded { generation });
        });
        self.publish(Some(MonitorEvent::StatusChanged));
    }

    pub(crate) fn on_push_opened(&mut self, generation: u64) {
        if generation != self.push.generation {
            return;
        }
        let recovered = self.push.attempts > 0;
        self.push.attempts = 0;
        self.push.ever_opened = true;
        self.push.status = PushStatus::Connected;
        if self.supervisor.link_restored() {
            info!(generation, "connectivity: push link restored");
        }
        if recovered {
            info!(generation, "push: reconnected, reloading to recover missed events");
            self.start_reload(ReloadOrigin::PushReconnect);
        }
        self.publish(Some(MonitorEvent::StatusChanged));
    }

    pub(crate) fn on_push_failed(&mut self, generation: u64, err: LevyError) {
        if generation != self.push.generation {
            return;
        }
        self.push.cancel = None;
        match err {
            LevyError::Capability(reason) => {
                info!(%reason, "push: not configured");
                self.push.status = PushStatus::Disabled;
            }
            e if !self.push.ever_opened => {
                // initialization failure leaves the feature off
                error!(error = %e, "push: subscribe failed");
                self.push.status = PushStatus::Failed;
            }
            e => {
                warn!(attempt = self.push.attempts, error = %e, "push: reconnect failed");
                self.schedule_push_retry();
            }
        }
        self.publish(Some(MonitorEvent::StatusChanged));
    }

    pub(crate) fn on_push(&mut self, generation: u64, msg: PushMessage) {
        if generation != self.push.generation {
            return;
        }
        match msg {
            PushMessage::Ticket(ev) => self.apply_push_event(ev),
            PushMessage::Link(LinkEvent::StateChanged { from, to }) => {
                debug!(%from, %to, "push: state changed");
                self.push.status = match to {
                    LinkState::Connecting => PushStatus::Connecting,
                    LinkState::Connected => PushStatus::Connected,
                    LinkState::Reconnecting => PushStatus::Reconnecting,
                    LinkState::Disconnected => PushStatus::Disconnected,
                };
                self.publish(Some(MonitorEvent::StatusChanged));
            }
            PushMessage::Link(LinkEvent::Reconnecting) => {
                self.push.status = PushStatus::Reconnecting;
                self.publish(Some(MonitorEvent::StatusChanged));
            }
            PushMessage::Link(LinkEvent::Reconnected) => {
                self.push.status = PushStatus::Connected;
                self.publish(Some(MonitorEvent::StatusChanged));
            }
            PushMessage::Link(LinkEvent::Closed) => {
                // the forwarder reports the end of stream next
                self.push.status = PushStatus::Disconnected;
                self.publish(Some(MonitorEvent::StatusChanged));
            }
        }
    }

    fn apply_push_event(&mut self, ev: PushEvent) {
        let key = ev.key().to_string();
        match ev {
            PushEvent::Added(t) | PushEvent::Updated(t) => {
                let outcome = self.cache.upsert(t);
                metrics::counter!("push_upserts_total", 1u64);
                debug!(key = %key, ?outcome, "push: upsert");
                if outcome == UpsertOutcome::Inserted && !self.countdown.running() {
                    self.start_countdown();
                }
            }
            PushEvent::Removed(_) => {
                let removed = self.cache.remove(&key);
                metrics::counter!("push_removes_total", 1u64);
                debug!(key = %key, removed, "push: remove");
            }
        }
        self.start_pipeline();
    }

    /// Unexpected end of stream: reconnect with the supervisor's bound and delay.
    pub(crate) fn on_push_ended(&mut self, generation: u64) {
        if generation != self.push.generation || self.shutdown.is_cancelled() {
            return;
        }
        self.push.cancel = None;
        warn!(generation, "push: stream closed");
        self.schedule_push_retry();
        self.publish(Some(MonitorEvent::StatusChanged));
    }

    /// Bounded by `max_reconnect_attempts`; the connectivity banner follows the link
    /// unless a network episode already owns it.
    fn schedule_push_retry(&mut self) {
        if self.push.attempts >= self.cfg.max_reconnect_attempts {
            error!(attempts = self.push.attempts, "push: reconnect attempts exhausted");
            self.push.status = PushStatus::Failed;
            if self.supervisor.link_gave_up() {
                metrics::counter!("reconnect_gave_up_total", 1u64);
            }
            return;
        }
        self.push.attempts += 1;
        self.push.status = PushStatus::Reconnecting;
        self.supervisor.link_reconnecting(self.push.attempts);
        metrics::counter!("push_reconnect_attempts_total", 1u64);
        let generation = self.push.generation;
        let delay = self.cfg.reconnect_delay;
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        info!(attempt = self.push.attempts, delay_ms = %delay.as_millis(), "push: reconnect scheduled");
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(MonitorMsg::PushRetryDue { generation });
                }
            }
        });
    }

    pub(crate) fn on_push_retry_due(&mut self, generation: u64) {
        if generation != self.push.generation || self.shutdown.is_cancelled() {
            return;
        }
        self.open_push();
    }

    /// Manual retry after the link gave up starts a fresh attempt budget.
    pub(crate) fn restart_push(&mut self) {
        if !self.cfg.push_enabled || self.push.status != PushStatus::Failed || !self.push.ever_opened {
            return;
        }
        info!("push: restarting after manual retry");
        self.push.attempts = 0;
        self.open_push();
    }
}
