#![forbid(unsafe_code)]

//! Message dispatch and operator commands.

use levy_view::SortSpec;
use tracing::{debug, info};

use crate::model::{Command, MonitorEvent, MonitorMsg, ReloadOrigin};
use crate::LevyMonitor;

impl LevyMonitor {
    pub(crate) fn handle(&mut self, msg: MonitorMsg) {
        match msg {
            MonitorMsg::Command(cmd) => self.on_command(cmd),
            MonitorMsg::NetworkChanged(up) => self.on_network_changed(up),
            MonitorMsg::RefreshTick => self.on_refresh_tick(),
            MonitorMsg::CountdownTick { generation } => self.on_countdown_tick(generation),
            MonitorMsg::ReloadDone { generation, origin, outcome } => self.on_reload_done(generation, origin, outcome),
            MonitorMsg::PipelineDone { seq, result } => self.on_pipeline_done(seq, result),
            MonitorMsg::RetryDue { episode } => self.on_retry_due(episode),
            MonitorMsg::PushOpened { generation } => self.on_push_opened(generation),
            MonitorMsg::PushFailed { generation, error } => self.on_push_failed(generation, error),
            MonitorMsg::Push { generation, msg } => self.on_push(generation, msg),
            MonitorMsg::PushEnded { generation } => self.on_push_ended(generation),
            MonitorMsg::PushRetryDue { generation } => self.on_push_retry_due(generation),
            MonitorMsg::Version(text) => {
                info!(version = %text, "version: resolved");
                self.version_text = text.clone();
                self.publish(Some(MonitorEvent::VersionResolved(text)));
            }
            // handled by the loop
            MonitorMsg::Shutdown => {}
        }
    }

    pub(crate) fn on_command(&mut self, cmd: Command) {
        debug!(?cmd, "command");
        match cmd {
            Command::Load => {
                self.query.filter_type = levy_view::FilterType::All;
                self.start_reload(ReloadOrigin::User);
            }
            Command::Refresh => {
                if self.is_loading {
                    debug!("refresh: ignored while loading");
                    return;
                }
                self.start_reload(ReloadOrigin::User);
            }
            Command::ApplyFilter(f) => {
                if self.is_loading {
                    debug!("apply_filter: ignored while loading");
                    return;
                }
                self.query.filter_type = f;
                self.schedule_pipeline();
            }
            Command::SetSearch(text) => {
                if text == self.query.search {
                    return;
                }
                self.query.search = text;
                self.schedule_pipeline();
            }
            Command::ClearSearch => {
                if self.query.search.is_empty() {
                    return;
                }
                self.query.search.clear();
                self.schedule_pipeline();
            }
            Command::SetBucket(b, on) => {
                if self.query.buckets.is_on(b) == on {
                    return;
                }
                self.query.buckets.set(b, on);
                self.schedule_pipeline();
            }
            Command::ToggleBucket(b) => {
                self.query.buckets.toggle(b);
                self.schedule_pipeline();
            }
            Command::Sort(field, direction) => {
                let spec = match direction {
                    Some(d) => SortSpec::new(field, d),
                    None => SortSpec::toggled(self.query.sort, field),
                };
                self.query.sort = Some(spec);
                self.start_pipeline();
            }
            Command::ClearSort => {
                if self.query.sort.take().is_some() {
                    self.start_pipeline();
                }
            }
            Command::NextPage => {
                if !self.is_loading && self.cursor.next() {
                    self.publish(Some(MonitorEvent::PageChanged));
                }
            }
            Command::PrevPage => {
                if !self.is_loading && self.cursor.prev() {
                    self.publish(Some(MonitorEvent::PageChanged));
                }
            }
            Command::RetryConnection => {
                let action = self.supervisor.manual_retry();
                info!(?action, "connectivity: manual retry");
                self.apply_supervisor(action);
                self.restart_push();
            }
        }
    }
}
