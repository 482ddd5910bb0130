#![forbid(unsafe_code)]

use levy_view::ViewResult;
use tracing::{debug, warn};

use crate::model::{MonitorEvent, MonitorMsg};
use crate::LevyMonitor;

impl LevyMonitor {
    /// Query edits (search, filter type, buckets) go back to page 1 after the debounce.
    pub(crate) fn schedule_pipeline(&mut self) {
        self.pipeline.reset_page = true;
        self.pipeline.debounce_deadline = Some(tokio::time::Instant::now() + self.cfg.debounce);
        // show the edited query right away; rows follow when the run lands
        self.publish(None);
    }

    /// Snapshot the cache and compute on the blocking pool. Only the latest run publishes.
    pub(crate) fn start_pipeline(&mut self) {
        self.pipeline.debounce_deadline = None;
        self.pipeline.started_seq += 1;
        let seq = self.pipeline.started_seq;
        let snapshot = self.cache.snapshot();
        let query = self.query.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || levy_view::compute(snapshot.tickets, &query)).await {
                Ok(result) => {
                    let _ = tx.send(MonitorMsg::PipelineDone { seq, result });
                }
                Err(e) => warn!(seq, error = %e, "pipeline: worker failed"),
            }
        });
    }

    pub(crate) fn on_pipeline_done(&mut self, seq: u64, result: ViewResult) {
        if seq != self.pipeline.started_seq {
            metrics::counter!("pipeline_discarded_total", 1u64);
            debug!(seq, latest = self.pipeline.started_seq, "pipeline: superseded result dropped");
            return;
        }
        let e = &result.explain;
        debug!(
            total = e.total,
            after_search = e.after_search,
            after_filter_type = e.after_filter_type,
            after_buckets = e.after_buckets,
            slot = result.total_slot,
            table = result.total_table,
            "pipeline: published"
        );
        // a pending debounced edit will publish again and reset then
        if self.pipeline.debounce_deadline.is_none() && std::mem::take(&mut self.pipeline.reset_page) {
            self.cursor.reset();
        }
        self.cursor.resize(result.total_count());
        self.pipeline.total_slot = result.total_slot;
        self.pipeline.total_table = result.total_table;
        self.pipeline.explain = result.explain;
        self.pipeline.full_rows = result.rows;
        self.publish(Some(MonitorEvent::PageChanged));
    }
}
