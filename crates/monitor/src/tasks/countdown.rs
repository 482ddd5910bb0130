#![forbid(unsafe_code)]

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::model::{MonitorEvent, MonitorMsg};
use crate::LevyMonitor;

impl LevyMonitor {
    /// Ticks carry the generation they were started with; stopping bumps it, so a tick
    /// already queued from the old timer is ignored.
    pub(crate) fn start_countdown(&mut self) {
        self.stop_countdown();
        let generation = self.countdown.generation;
        let period = self.cfg.countdown_period;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut iv = interval_at(Instant::now() + period, period);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                iv.tick().await;
                if tx.send(MonitorMsg::CountdownTick { generation }).is_err() {
                    break;
                }
            }
        });
        self.countdown.task = Some(task);
        debug!(generation, "countdown: started");
    }

    pub(crate) fn stop_countdown(&mut self) {
        if let Some(t) = self.countdown.task.take() {
            t.abort();
            debug!(generation = self.countdown.generation, "countdown: stopped");
        }
        self.countdown.generation += 1;
    }

    pub(crate) fn on_countdown_tick(&mut self, generation: u64) {
        if generation != self.countdown.generation || !self.countdown.running() {
            trace!(generation, "countdown: stale tick");
            return;
        }
        let sweep = self.cache.advance_countdown();
        if sweep.ticked == 0 {
            return;
        }
        metrics::counter!("countdown_ticks_total", 1u64);
        if sweep.overstayed > 0 {
            metrics::counter!("countdown_overstayed_total", sweep.overstayed as u64);
            debug!(overstayed = sweep.overstayed, "countdown: tickets overstayed");
        }
        let visible_changed = !sweep.changed.is_empty()
            && self
                .cursor
                .slice(&self.pipeline.full_rows)
                .iter()
                .any(|t| sweep.changed.iter().any(|k| *k == t.transaction_no));
        // counters moved on every row; membership did not
        self.publish(visible_changed.then_some(MonitorEvent::Redraw));
    }
}
