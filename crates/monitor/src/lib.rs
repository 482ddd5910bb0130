//! Levy live monitor: the composition root and interactive event loop.
//!
//! One task owns all view state and consumes a single message queue. Timers, the
//! push channel, reload fetches and pipeline workers only post messages; the loop
//! applies them and publishes an immutable `PageView` for the presentation side.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use levy_api::LevyApi;
use levy_store::TicketCache;
use levy_view::{PageCursor, ViewQuery};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod connectivity;
mod handle;
mod model;
mod tasks;
mod updates;

pub use connectivity::{Connectivity, Supervisor, SupervisorAction};
pub use handle::MonitorHandle;
pub use model::{Command, MonitorConfig, MonitorEvent, PageView, PushStatus, ReloadOrigin};

use model::{CountdownState, MonitorMsg, PipelineState, PushState, ReloadState};

const EVENT_CAPACITY: usize = 256;

pub struct LevyMonitor {
    api: Arc<dyn LevyApi>,
    cfg: MonitorConfig,
    cache: Arc<TicketCache>,
    query: ViewQuery,
    cursor: PageCursor,
    supervisor: Supervisor,
    reload: ReloadState,
    pipeline: PipelineState,
    push: PushState,
    countdown: CountdownState,
    timers: Vec<JoinHandle<()>>,
    is_loading: bool,
    version_text: String,
    tx: mpsc::UnboundedSender<MonitorMsg>,
    page: Arc<ArcSwap<PageView>>,
    events: broadcast::Sender<MonitorEvent>,
    shutdown: CancellationToken,
}

/// Build the monitor, start its event loop and return the handle used to drive it.
/// The loop performs the initial load on its own.
pub fn spawn(api: Arc<dyn LevyApi>, cfg: MonitorConfig) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let page = Arc::new(ArcSwap::from_pointee(PageView::empty(cfg.page_size, cfg.fallback_version_text())));
    let monitor = LevyMonitor {
        api,
        cache: Arc::new(TicketCache::new()),
        query: ViewQuery::default(),
        cursor: PageCursor::new(cfg.page_size),
        supervisor: Supervisor::new(cfg.max_reconnect_attempts, cfg.reconnect_delay),
        reload: ReloadState::default(),
        pipeline: PipelineState::default(),
        push: PushState::default(),
        countdown: CountdownState::default(),
        timers: Vec::new(),
        is_loading: false,
        version_text: cfg.fallback_version_text(),
        tx: tx.clone(),
        page: page.clone(),
        events: events.clone(),
        shutdown: CancellationToken::new(),
        cfg,
    };
    let handle = MonitorHandle::new(tx, page, events);
    let task = tokio::spawn(monitor.run(rx));
    (handle, task)
}

impl LevyMonitor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MonitorMsg>) {
        let t0 = Instant::now();
        info!(page_size = self.cfg.page_size, refresh_s = self.cfg.refresh_interval.as_secs(), "monitor: starting");
        self.start_timers();
        self.start_version_lookup();
        self.start_push();
        self.on_command(model::Command::Load);
        loop {
            let deadline = self.pipeline.debounce_deadline;
            tokio::select! {
                msg = rx.recv() => match msg {
                    None | Some(MonitorMsg::Shutdown) => break,
                    Some(m) => self.handle(m),
                },
                _ = debounce_elapsed(deadline) => {
                    debug!("pipeline: debounce elapsed");
                    self.start_pipeline();
                }
            }
        }
        self.teardown();
        info!(took_ms = %t0.elapsed().as_millis(), "monitor: stopped");
    }

    fn teardown(&mut self) {
        self.shutdown.cancel();
        for t in self.timers.drain(..) {
            t.abort();
        }
        self.stop_countdown();
        if let Some(tok) = self.reload.cancel.take() {
            tok.cancel();
        }
        if let Some(tok) = self.push.cancel.take() {
            tok.cancel();
        }
    }

    /// Post a message to our own queue from a spawned task or timer.
    fn post(&self, msg: MonitorMsg) {
        let _ = self.tx.send(msg);
    }

    fn current_view(&self) -> PageView {
        let keys = self.cursor.slice(&self.pipeline.full_rows);
        let rows = self.cache.get_many(keys.iter().map(|t| t.transaction_no.as_str()));
        PageView {
            rows,
            page_index: self.cursor.page_index,
            page_size: self.cursor.page_size,
            total_pages: self.cursor.total_pages,
            total_count: self.cursor.total_count,
            total_slot: self.pipeline.total_slot,
            total_table: self.pipeline.total_table,
            explain: self.pipeline.explain.clone(),
            query: self.query.clone(),
            is_loading: self.is_loading,
            connectivity: self.supervisor.state(),
            is_network_disconnected: self.supervisor.is_disconnected(),
            is_reconnecting: self.supervisor.is_reconnecting(),
            network_message: self.supervisor.message().to_string(),
            push_status: self.push.status,
            version_text: self.version_text.clone(),
            last_refresh: self.cache.last_replace_time(),
        }
    }

    /// Install a fresh `PageView` and optionally notify subscribers.
    fn publish(&self, event: Option<MonitorEvent>) {
        self.page.store(Arc::new(self.current_view()));
        if let Some(e) = event {
            // no subscribers is fine
            let _ = self.events.send(e);
        }
    }
}

async fn debounce_elapsed(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}
