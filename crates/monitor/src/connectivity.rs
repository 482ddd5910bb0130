#![forbid(unsafe_code)]

//! Connectivity supervisor. Pure transitions; the event loop executes the returned actions.

use std::time::Duration;

use serde::Serialize;

pub const MSG_CONNECTED: &str = "Connected";
pub const MSG_LOST: &str = "Network Disconnected - Connection Lost";
pub const MSG_GAVE_UP: &str = "Reconnection failed - Please check your network";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Reconnecting,
}

/// What the event loop should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    /// Start a supervisor-origin full reload.
    Reload,
    /// Post a retry for `episode` after `delay`.
    RetryAfter { delay: Duration, episode: u64 },
    /// Retries exhausted; nothing more until a manual retry.
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    state: Connectivity,
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
    exhausted: bool,
    /// Bumped whenever pending retries must be ignored.
    episode: u64,
    /// The current Reconnecting/GaveUp state came from the push link, not the network.
    link_owned: bool,
    message: String,
}

fn reconnecting_message(attempt: u32, max: u32) -> String {
    format!("Reconnecting... (Attempt {}/{})", attempt, max)
}

impl Supervisor {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: Connectivity::Connected,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            delay,
            exhausted: false,
            episode: 0,
            link_owned: false,
            message: MSG_CONNECTED.to_string(),
        }
    }

    pub fn state(&self) -> Connectivity { self.state }
    pub fn attempt(&self) -> u32 { self.attempt }
    pub fn message(&self) -> &str { &self.message }
    pub fn exhausted(&self) -> bool { self.exhausted }
    pub fn is_connected(&self) -> bool { self.state == Connectivity::Connected }
    pub fn is_disconnected(&self) -> bool { self.state == Connectivity::Disconnected }
    pub fn is_reconnecting(&self) -> bool { self.state == Connectivity::Reconnecting }

    /// Manual retry is offered while disconnected and not already reconnecting.
    pub fn can_retry(&self) -> bool { self.is_disconnected() }

    fn begin_attempt(&mut self) -> SupervisorAction {
        self.state = Connectivity::Reconnecting;
        self.attempt += 1;
        self.message = reconnecting_message(self.attempt, self.max_attempts);
        SupervisorAction::Reload
    }

    /// Duplicate signals while already disconnected are no-ops.
    pub fn network_lost(&mut self) -> SupervisorAction {
        if self.state == Connectivity::Disconnected {
            return SupervisorAction::None;
        }
        self.state = Connectivity::Disconnected;
        self.attempt = 0;
        self.exhausted = false;
        self.link_owned = false;
        self.episode += 1;
        self.message = MSG_LOST.to_string();
        SupervisorAction::None
    }

    /// Ignored unless disconnected with retries left in this episode.
    pub fn network_restored(&mut self) -> SupervisorAction {
        if self.state != Connectivity::Disconnected || self.exhausted {
            return SupervisorAction::None;
        }
        self.begin_attempt()
    }

    pub fn reload_succeeded(&mut self) -> SupervisorAction {
        if self.state != Connectivity::Reconnecting || self.link_owned {
            return SupervisorAction::None;
        }
        self.state = Connectivity::Connected;
        self.attempt = 0;
        self.exhausted = false;
        self.episode += 1;
        self.message = MSG_CONNECTED.to_string();
        SupervisorAction::None
    }

    pub fn reload_failed(&mut self) -> SupervisorAction {
        if self.state != Connectivity::Reconnecting || self.link_owned {
            return SupervisorAction::None;
        }
        if self.attempt >= self.max_attempts {
            self.state = Connectivity::Disconnected;
            self.exhausted = true;
            self.episode += 1;
            self.message = MSG_GAVE_UP.to_string();
            return SupervisorAction::GaveUp;
        }
        SupervisorAction::RetryAfter { delay: self.delay, episode: self.episode }
    }

    /// A scheduled retry fired; stale episodes are dropped.
    pub fn retry_due(&mut self, episode: u64) -> SupervisorAction {
        if episode != self.episode || self.state != Connectivity::Reconnecting || self.link_owned {
            return SupervisorAction::None;
        }
        self.begin_attempt()
    }

    /// Operator retry: restart the episode with the counter reset.
    pub fn manual_retry(&mut self) -> SupervisorAction {
        if !self.can_retry() {
            return SupervisorAction::None;
        }
        self.attempt = 0;
        self.exhausted = false;
        self.link_owned = false;
        self.episode += 1;
        self.begin_attempt()
    }

    /// The push link dropped while the network is up. Shows the push retry count;
    /// ignored while a network episode owns the state. Returns whether anything changed.
    pub fn link_reconnecting(&mut self, attempt: u32) -> bool {
        if !self.is_connected() && !self.link_owned {
            return false;
        }
        self.state = Connectivity::Reconnecting;
        self.link_owned = true;
        self.message = reconnecting_message(attempt, self.max_attempts);
        true
    }

    pub fn link_restored(&mut self) -> bool {
        if !self.link_owned {
            return false;
        }
        self.link_owned = false;
        self.state = Connectivity::Connected;
        self.message = MSG_CONNECTED.to_string();
        true
    }

    /// Push retries exhausted: same terminal state as a failed network episode.
    pub fn link_gave_up(&mut self) -> bool {
        if !self.link_owned {
            return false;
        }
        self.link_owned = false;
        self.state = Connectivity::Disconnected;
        self.exhausted = true;
        self.episode += 1;
        self.message = MSG_GAVE_UP.to_string();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sup() -> Supervisor { Supervisor::new(5, Duration::from_millis(10)) }

    fn retry(s: &mut Supervisor) -> SupervisorAction {
        match s.reload_failed() {
            SupervisorAction::RetryAfter { episode, .. } => s.retry_due(episode),
            other => other,
        }
    }

    #[test]
    fn recovers_on_third_attempt() {
        let mut s = sup();
        s.network_lost();
        assert_eq!(s.network_restored(), SupervisorAction::Reload);
        assert_eq!(s.message(), "Reconnecting... (Attempt 1/5)");
        assert_eq!(retry(&mut s), SupervisorAction::Reload);
        assert_eq!(retry(&mut s), SupervisorAction::Reload);
        assert_eq!(s.attempt(), 3);
        s.reload_succeeded();
        assert_eq!(s.state(), Connectivity::Connected);
        assert_eq!(s.attempt(), 0);
    }

    #[test]
    fn gives_up_after_max_and_waits_for_manual_retry() {
        let mut s = sup();
        s.network_lost();
        s.network_restored();
        for _ in 0..4 {
            assert_eq!(retry(&mut s), SupervisorAction::Reload);
        }
        assert_eq!(s.reload_failed(), SupervisorAction::GaveUp);
        assert_eq!(s.state(), Connectivity::Disconnected);
        assert_eq!(s.message(), MSG_GAVE_UP);
        // no automatic attempt from further signals
        assert_eq!(s.network_restored(), SupervisorAction::None);
        assert_eq!(s.network_lost(), SupervisorAction::None);
        assert!(s.can_retry());
        assert_eq!(s.manual_retry(), SupervisorAction::Reload);
        assert_eq!(s.attempt(), 1);
        assert!(s.is_reconnecting());
    }

    #[test]
    fn duplicate_signals_are_idempotent() {
        let mut s = sup();
        assert_eq!(s.network_restored(), SupervisorAction::None);
        s.network_lost();
        let episode = s.episode;
        s.network_lost();
        assert_eq!(s.episode, episode);
        assert_eq!(s.network_restored(), SupervisorAction::Reload);
        assert_eq!(s.network_restored(), SupervisorAction::None);
        assert_eq!(s.attempt(), 1);
    }

    #[test]
    fn loss_during_retry_invalidates_pending_timer() {
        let mut s = sup();
        s.network_lost();
        s.network_restored();
        let SupervisorAction::RetryAfter { episode, .. } = s.reload_failed() else { panic!("expected retry") };
        s.network_lost();
        assert_eq!(s.retry_due(episode), SupervisorAction::None);
        assert_eq!(s.message(), MSG_LOST);
        assert!(s.can_retry());
    }

    #[test]
    fn manual_retry_ignored_while_connected() {
        let mut s = sup();
        assert!(!s.can_retry());
        assert_eq!(s.manual_retry(), SupervisorAction::None);
    }

    #[test]
    fn push_link_drives_banner_until_network_takes_over() {
        let mut s = sup();
        assert!(s.link_reconnecting(1));
        assert!(s.is_reconnecting());
        assert_eq!(s.message(), "Reconnecting... (Attempt 1/5)");
        // network signals do not interfere with a link episode
        assert_eq!(s.network_restored(), SupervisorAction::None);
        assert_eq!(s.reload_failed(), SupervisorAction::None);
        assert!(s.link_reconnecting(2));
        assert!(s.link_restored());
        assert_eq!(s.state(), Connectivity::Connected);

        s.link_reconnecting(1);
        s.network_lost();
        assert_eq!(s.message(), MSG_LOST);
        assert!(!s.link_restored());
        assert!(!s.link_gave_up());
        assert!(!s.link_reconnecting(2));
    }

    #[test]
    fn push_link_exhaustion_waits_for_manual_retry() {
        let mut s = sup();
        s.link_reconnecting(5);
        assert!(s.link_gave_up());
        assert_eq!(s.message(), MSG_GAVE_UP);
        assert!(s.can_retry());
        assert_eq!(s.network_restored(), SupervisorAction::None);
        assert_eq!(s.manual_retry(), SupervisorAction::Reload);
        assert_eq!(s.reload_succeeded(), SupervisorAction::None);
        assert!(s.is_connected());
    }
}
