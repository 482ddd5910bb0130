#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use levy_view::{FilterType, SortDirection, SortField, TimeBucket};
use tokio::sync::{broadcast, mpsc};

use crate::model::{Command, MonitorEvent, MonitorMsg, PageView};

/// Cheap, cloneable entry point for the presentation side.
/// Commands are queued; the loop checks enablement when it applies them.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorMsg>,
    page: Arc<ArcSwap<PageView>>,
    events: broadcast::Sender<MonitorEvent>,
}

impl MonitorHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<MonitorMsg>,
        page: Arc<ArcSwap<PageView>>,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self { tx, page, events }
    }

    /// False once the loop has stopped.
    pub fn send(&self, cmd: Command) -> bool { self.tx.send(MonitorMsg::Command(cmd)).is_ok() }

    pub fn load(&self) -> bool { self.send(Command::Load) }
    pub fn refresh(&self) -> bool { self.send(Command::Refresh) }
    pub fn apply_filter(&self, f: FilterType) -> bool { self.send(Command::ApplyFilter(f)) }
    pub fn set_search(&self, text: impl Into<String>) -> bool { self.send(Command::SetSearch(text.into())) }
    pub fn clear_search(&self) -> bool { self.send(Command::ClearSearch) }
    pub fn set_bucket(&self, b: TimeBucket, on: bool) -> bool { self.send(Command::SetBucket(b, on)) }
    pub fn toggle_bucket(&self, b: TimeBucket) -> bool { self.send(Command::ToggleBucket(b)) }
    pub fn sort(&self, field: SortField, direction: Option<SortDirection>) -> bool {
        self.send(Command::Sort(field, direction))
    }
    pub fn clear_sort(&self) -> bool { self.send(Command::ClearSort) }
    pub fn next_page(&self) -> bool { self.send(Command::NextPage) }
    pub fn prev_page(&self) -> bool { self.send(Command::PrevPage) }
    pub fn retry_connection(&self) -> bool { self.send(Command::RetryConnection) }

    /// OS-level reachability notification; funnels into the same transitions as the poll.
    pub fn network_changed(&self, up: bool) -> bool { self.tx.send(MonitorMsg::NetworkChanged(up)).is_ok() }

    pub fn shutdown(&self) { let _ = self.tx.send(MonitorMsg::Shutdown); }

    /// Latest published view state.
    pub fn page(&self) -> Arc<PageView> { self.page.load_full() }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> { self.events.subscribe() }

    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}
