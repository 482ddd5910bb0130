//! Levy store: the authoritative in-RAM ticket cache.
//!
//! One mutex guards every read-modify-write. Snapshots are full copies, so callers
//! can filter and sort them without holding the lock.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use levy_core::{CacheSnapshot, Ticket, TxnKey};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

mod countdown;

pub use countdown::{tick_ticket, CountdownSweep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

struct Entry {
    ticket: Ticket,
    /// Position in unsorted views; pushed inserts take a lower value so they list first.
    order: i64,
}

#[derive(Default)]
struct Inner {
    map: FxHashMap<TxnKey, Entry>,
    front: i64,
    epoch: u64,
    last_replace: Option<DateTime<Utc>>,
}

impl Inner {
    fn bump(&mut self) { self.epoch = self.epoch.saturating_add(1); }
}

/// Ticket cache keyed by transaction number; at most one entry per key.
#[derive(Default)]
pub struct TicketCache {
    inner: Mutex<Inner>,
}

impl TicketCache {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the guard cannot leave the map half-written
        // (every mutation is a single insert/remove/assign), so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap the whole store for `tickets` and stamp the replace time.
    /// Duplicate keys collapse to the last occurrence, kept at the first position.
    pub fn replace(&self, tickets: Vec<Ticket>) -> usize {
        let mut map: FxHashMap<TxnKey, Entry> = FxHashMap::default();
        map.reserve(tickets.len());
        for (i, t) in tickets.into_iter().enumerate() {
            match map.get_mut(&t.transaction_no) {
                Some(e) => e.ticket = t,
                None => {
                    map.insert(t.transaction_no.clone(), Entry { ticket: t, order: i as i64 });
                }
            }
        }
        let n = map.len();
        let now = Utc::now();
        let mut g = self.lock();
        g.map = map;
        g.front = 0;
        g.last_replace = Some(now);
        g.bump();
        drop(g);
        counter!("cache_replace_total", 1u64);
        info!(count = n, at = %now, "cache: replaced");
        n
    }

    /// Insert when absent (flagged new), else refresh the mutable fields of the
    /// existing entry (remaining time and status, flagged updated).
    pub fn upsert(&self, mut ticket: Ticket) -> UpsertOutcome {
        let mut g = self.lock();
        let outcome = match g.map.get_mut(&ticket.transaction_no) {
            Some(e) => {
                e.ticket.remaining_time = ticket.remaining_time;
                e.ticket.used_status = ticket.used_status;
                e.ticket.is_updated = true;
                UpsertOutcome::Updated
            }
            None => {
                g.front -= 1;
                let order = g.front;
                ticket.is_new = true;
                ticket.is_updated = false;
                g.map.insert(ticket.transaction_no.clone(), Entry { ticket, order });
                UpsertOutcome::Inserted
            }
        };
        g.bump();
        drop(g);
        match outcome {
            UpsertOutcome::Inserted => counter!("cache_insert_total", 1u64),
            UpsertOutcome::Updated => counter!("cache_update_total", 1u64),
        }
        outcome
    }

    /// Remove by key; absent keys are a no-op returning `false`.
    pub fn remove(&self, key: &str) -> bool {
        let mut g = self.lock();
        let removed = g.map.remove(key).is_some();
        if removed {
            g.bump();
            counter!("cache_remove_total", 1u64);
        } else {
            debug!(key, "cache: remove of unknown key ignored");
        }
        removed
    }

    /// Defensive copy of all entries in view order.
    pub fn snapshot(&self) -> CacheSnapshot {
        let g = self.lock();
        let mut rows: Vec<(i64, Ticket)> = g.map.values().map(|e| (e.order, e.ticket.clone())).collect();
        let epoch = g.epoch;
        drop(g);
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.transaction_no.cmp(&b.1.transaction_no)));
        CacheSnapshot { epoch, taken_at: Utc::now(), tickets: rows.into_iter().map(|(_, t)| t).collect() }
    }

    pub fn get(&self, key: &str) -> Option<Ticket> { self.lock().map.get(key).map(|e| e.ticket.clone()) }

    /// Current copies for `keys`, in the same order; missing keys are skipped.
    pub fn get_many<'a, I>(&self, keys: I) -> Vec<Ticket>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let g = self.lock();
        keys.into_iter().filter_map(|k| g.map.get(k).map(|e| e.ticket.clone())).collect()
    }

    pub fn len(&self) -> usize { self.lock().map.len() }

    pub fn is_empty(&self) -> bool { self.lock().map.is_empty() }

    pub fn epoch(&self) -> u64 { self.lock().epoch }

    /// Time of the most recent `replace`; `None` until the first one.
    pub fn last_replace_time(&self) -> Option<DateTime<Utc>> { self.lock().last_replace }

    /// True when no replace happened yet or the last one is at least `expiry` old.
    pub fn is_stale(&self, now: DateTime<Utc>, expiry: chrono::Duration) -> bool {
        match self.last_replace_time() {
            Some(at) => now - at >= expiry,
            None => true,
        }
    }

    /// Advance every ticket's counter by one second, in place.
    pub fn advance_countdown(&self) -> CountdownSweep {
        let mut g = self.lock();
        let mut sweep = CountdownSweep::default();
        for e in g.map.values_mut() {
            let was_overstayed = e.ticket.used_status == levy_core::UsedStatus::Overstayed;
            if tick_ticket(&mut e.ticket) {
                sweep.changed.push(e.ticket.transaction_no.clone());
            }
            if !was_overstayed && e.ticket.used_status == levy_core::UsedStatus::Overstayed {
                sweep.overstayed += 1;
            }
            sweep.ticked += 1;
        }
        if sweep.ticked > 0 {
            g.bump();
        }
        sweep
    }
}
