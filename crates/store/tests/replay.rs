#![forbid(unsafe_code)]

use std::sync::Arc;

use levy_core::{PushEvent, Ticket, UsedStatus};
use levy_store::{TicketCache, UpsertOutcome};

fn ticket(key: &str, playing: i64) -> Ticket {
    Ticket { transaction_no: key.into(), playing_time: playing, used_status: UsedStatus::Active, ..Default::default() }
}

fn apply(cache: &TicketCache, ev: PushEvent) {
    match ev {
        PushEvent::Added(t) | PushEvent::Updated(t) => {
            cache.upsert(t);
        }
        PushEvent::Removed(k) => {
            cache.remove(&k);
        }
    }
}

#[test]
fn replay_push_sequence() {
    let cache = TicketCache::new();
    cache.replace(vec![ticket("A", 100), ticket("B", 200)]);

    let events = vec![
        PushEvent::Added(ticket("C", 5)),
        // added for an existing key behaves as an update
        PushEvent::Added(ticket("A", 0)),
        PushEvent::Updated(ticket("B", 0)),
        PushEvent::Removed("missing".into()),
        PushEvent::Removed("C".into()),
        PushEvent::Updated(ticket("D", 7)),
    ];
    for ev in events {
        apply(&cache, ev);
    }

    let snap = cache.snapshot();
    let keys: Vec<_> = snap.tickets.iter().map(|t| t.transaction_no.as_str()).collect();
    assert_eq!(keys, vec!["D", "A", "B"]);
    let a = &snap.tickets[1];
    assert_eq!(a.playing_time, 100);
    assert!(a.is_updated);
    assert!(snap.tickets[0].is_new);
}

#[test]
fn replace_supersedes_and_dedups() {
    let cache = TicketCache::new();
    cache.upsert(ticket("X", 1));
    let n = cache.replace(vec![ticket("A", 1), ticket("B", 2), ticket("A", 3)]);
    assert_eq!(n, 2);
    let snap = cache.snapshot();
    assert_eq!(snap.tickets.len(), 2);
    assert_eq!(snap.tickets[0].transaction_no, "A");
    assert_eq!(snap.tickets[0].playing_time, 3);
    assert!(cache.get("X").is_none());
    assert!(cache.last_replace_time().is_some());
}

#[test]
fn countdown_sweep_reports_flips() {
    let cache = TicketCache::new();
    cache.replace(vec![ticket("neg", -1), ticket("zero", 0), ticket("pos", 10)]);
    let sweep = cache.advance_countdown();
    assert_eq!(sweep.ticked, 3);
    // "neg" reaches 0 and flips; "zero" crosses to 1 without flipping
    assert_eq!(sweep.overstayed, 1);
    let mut changed = sweep.changed.clone();
    changed.sort();
    assert_eq!(changed, vec!["neg".to_string(), "zero".to_string()]);
    assert_eq!(cache.get("neg").unwrap().used_status, UsedStatus::Overstayed);
    assert_eq!(cache.get("pos").unwrap().playing_time, 11);
}

#[test]
fn concurrent_origins_keep_one_entry_per_key() {
    let cache = Arc::new(TicketCache::new());
    cache.replace((0..50).map(|i| ticket(&format!("T{i}"), -10)).collect());

    let mut handles = Vec::new();
    for w in 0..4 {
        let c = cache.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..50 {
                if w % 2 == 0 {
                    let outcome = c.upsert(ticket(&format!("T{i}"), 0));
                    assert_eq!(outcome, UpsertOutcome::Updated);
                } else {
                    c.advance_countdown();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let snap = cache.snapshot();
    assert_eq!(snap.tickets.len(), 50);
    // two countdown workers, 50 sweeps each; upserts never touch the counter
    assert!(snap.tickets.iter().all(|t| t.playing_time == 90));
}
