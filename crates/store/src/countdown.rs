//! One-second countdown step applied to every cached ticket.

use levy_core::{Ticket, TxnKey, UsedStatus};

/// Result of one sweep over the cache.
#[derive(Debug, Default, Clone)]
pub struct CountdownSweep {
    pub ticked: usize,
    /// Tickets newly flagged overstayed during this sweep.
    pub overstayed: usize,
    /// Keys whose status or sign region changed; rows worth re-rendering beyond the counter.
    pub changed: Vec<TxnKey>,
}

/// Increment the counter and flag the ticket overstayed while it is at or below zero.
/// Returns true when the status flipped or the counter crossed zero.
pub fn tick_ticket(t: &mut Ticket) -> bool {
    let was_non_positive = t.playing_time <= 0;
    t.playing_time = t.playing_time.saturating_add(1);
    let non_positive = t.playing_time <= 0;
    let mut changed = was_non_positive != non_positive;
    if non_positive && t.used_status != UsedStatus::Overstayed {
        t.used_status = UsedStatus::Overstayed;
        changed = true;
    }
    changed
}
