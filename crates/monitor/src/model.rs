#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use levy_api::{LevyError, LevyResult};
use levy_core::{PushMessage, Ticket, TicketPage};
use levy_view::{FilterExplain, FilterType, SortDirection, SortField, TimeBucket, ViewQuery, ViewResult};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connectivity;

/// Operator commands accepted by the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Initial load: resets the coarse filter to `All`, then reloads.
    Load,
    Refresh,
    ApplyFilter(FilterType),
    SetSearch(String),
    ClearSearch,
    SetBucket(TimeBucket, bool),
    ToggleBucket(TimeBucket),
    /// `None` direction toggles like a header click.
    Sort(SortField, Option<SortDirection>),
    ClearSort,
    NextPage,
    PrevPage,
    RetryConnection,
}

/// Who asked for a full reload; decides the failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReloadOrigin {
    User,
    Scheduler,
    Supervisor,
    PushReconnect,
}

/// Everything posted to the event loop: commands, timer ticks and task results.
#[derive(Debug)]
pub enum MonitorMsg {
    Command(Command),
    /// OS-level or probe reachability signal.
    NetworkChanged(bool),
    RefreshTick,
    CountdownTick { generation: u64 },
    ReloadDone { generation: u64, origin: ReloadOrigin, outcome: LevyResult<TicketPage> },
    PipelineDone { seq: u64, result: ViewResult },
    RetryDue { episode: u64 },
    PushOpened { generation: u64 },
    PushFailed { generation: u64, error: LevyError },
    Push { generation: u64, msg: PushMessage },
    PushEnded { generation: u64 },
    PushRetryDue { generation: u64 },
    Version(String),
    Shutdown,
}

/// Notifications for the presentation boundary. Read `MonitorHandle::page` for the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Page membership, totals or flags changed.
    PageChanged,
    /// A visible row changed sign or status during the countdown.
    Redraw,
    /// A user-initiated reload failed.
    LoadFailed(String),
    StatusChanged,
    VersionResolved(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushStatus {
    Disabled,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushStatus::Disabled => "Disabled",
            PushStatus::Connecting => "Connecting",
            PushStatus::Connected => "Connected",
            PushStatus::Reconnecting => "Reconnecting",
            PushStatus::Disconnected => "Disconnected",
            PushStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Published view state: the current page plus everything the presentation needs
/// to render flags and enable commands.
#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    pub rows: Vec<Ticket>,
    pub page_index: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub total_slot: usize,
    pub total_table: usize,
    pub explain: FilterExplain,
    pub query: ViewQuery,
    pub is_loading: bool,
    pub connectivity: Connectivity,
    pub is_network_disconnected: bool,
    pub is_reconnecting: bool,
    pub network_message: String,
    pub push_status: PushStatus,
    pub version_text: String,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl PageView {
    pub fn empty(page_size: usize, version_text: String) -> Self {
        Self {
            rows: Vec::new(),
            page_index: 1,
            page_size,
            total_pages: 0,
            total_count: 0,
            total_slot: 0,
            total_table: 0,
            explain: FilterExplain::default(),
            query: ViewQuery::default(),
            is_loading: false,
            connectivity: Connectivity::Connected,
            is_network_disconnected: false,
            is_reconnecting: false,
            network_message: crate::connectivity::MSG_CONNECTED.to_string(),
            push_status: PushStatus::Disabled,
            version_text,
            last_refresh: None,
        }
    }

    pub fn can_next(&self) -> bool { self.page_index < self.total_pages && !self.is_loading }
    pub fn can_prev(&self) -> bool { self.page_index > 1 && !self.is_loading }
    pub fn can_refresh(&self) -> bool { !self.is_loading }
    pub fn can_apply_filter(&self) -> bool { !self.is_loading }
    pub fn can_clear_search(&self) -> bool { !self.query.search.is_empty() }
    pub fn can_retry(&self) -> bool { self.is_network_disconnected && !self.is_reconnecting }
}

/// Monitor settings. Durations are configurable so tests can run them fast.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cache_expiry: Duration,
    pub refresh_interval: Duration,
    pub network_poll: Duration,
    pub countdown_period: Duration,
    pub debounce: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub page_size: usize,
    /// Full reload request: page 1, this size, filter `All`.
    pub reload_page_size: i64,
    pub app_code: String,
    pub fallback_version: String,
    pub push_enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cache_expiry: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(30),
            network_poll: Duration::from_secs(5),
            countdown_period: Duration::from_secs(1),
            debounce: Duration::from_millis(300),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(10_000),
            page_size: levy_view::DEFAULT_PAGE_SIZE,
            reload_page_size: 50_000,
            app_code: "PatronGamingMonitor".to_string(),
            fallback_version: "1.1.0".to_string(),
            push_enabled: true,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Some(s) = std::env::var("LEVY_CACHE_EXPIRY_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            c.cache_expiry = Duration::from_secs(s.max(1));
            c.refresh_interval = c.cache_expiry;
        }
        if let Some(n) = std::env::var("LEVY_MAX_RECONNECT_ATTEMPTS").ok().and_then(|s| s.parse::<u32>().ok()) {
            c.max_reconnect_attempts = n;
        }
        if let Some(ms) = std::env::var("LEVY_RECONNECT_DELAY_MS").ok().and_then(|s| s.parse::<u64>().ok()) {
            c.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(n) = std::env::var("LEVY_PAGE_SIZE").ok().and_then(|s| s.parse::<usize>().ok()) {
            c.page_size = n.max(1);
        }
        if let Ok(code) = std::env::var("LEVY_APP_CODE") {
            if !code.trim().is_empty() {
                c.app_code = code.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("LEVY_APP_VERSION") {
            if !v.trim().is_empty() {
                c.fallback_version = v.trim().to_string();
            }
        }
        c
    }

    pub fn fallback_version_text(&self) -> String { format!("Version: {}", self.fallback_version) }
}

// ----------------- Loop-owned task state -----------------

#[derive(Default)]
pub(crate) struct ReloadState {
    pub generation: u64,
    pub cancel: Option<CancellationToken>,
    /// The in-flight reload (or one it superseded) answers a supervisor attempt.
    pub supervised: bool,
}

impl ReloadState {
    pub fn in_flight(&self) -> bool { self.cancel.is_some() }
}

#[derive(Default)]
pub(crate) struct PipelineState {
    /// Sequence of the most recently started run; only its result is published.
    pub started_seq: u64,
    pub debounce_deadline: Option<tokio::time::Instant>,
    /// A query change asked for page 1; applied when the latest run lands.
    pub reset_page: bool,
    pub full_rows: Vec<Ticket>,
    pub total_slot: usize,
    pub total_table: usize,
    pub explain: FilterExplain,
}

pub(crate) struct PushState {
    pub status: PushStatus,
    pub generation: u64,
    pub cancel: Option<CancellationToken>,
    /// Reconnect attempts since the last successful open.
    pub attempts: u32,
    pub ever_opened: bool,
}

impl Default for PushState {
    fn default() -> Self {
        Self { status: PushStatus::Disabled, generation: 0, cancel: None, attempts: 0, ever_opened: false }
    }
}

#[derive(Default)]
pub(crate) struct CountdownState {
    pub generation: u64,
    pub task: Option<tokio::task::JoinHandle<()>>,
}

impl CountdownState {
    pub fn running(&self) -> bool { self.task.is_some() }
}
