//! Scripted in-memory implementation for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use levy_core::{AppManifest, PatronRecord, PushMessage, Ticket, TicketPage};
use tokio::sync::mpsc;

use crate::{CancelHandle, LevyApi, LevyError, LevyResult, StreamHandle};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// Fetches pop scripted outcomes in order; once the script runs dry every fetch
/// returns the fallback (an empty successful page unless replaced).
pub struct MockApi {
    script: Mutex<VecDeque<LevyResult<TicketPage>>>,
    fallback: Mutex<LevyResult<TicketPage>>,
    delay: Mutex<Option<Duration>>,
    reachable: AtomicBool,
    fetch_calls: AtomicUsize,
    filters: Mutex<Vec<String>>,
    patrons: Mutex<HashMap<i64, LevyResult<Option<PatronRecord>>>>,
    patron_calls: AtomicUsize,
    manifest: Mutex<LevyResult<Option<AppManifest>>>,
    push: Mutex<VecDeque<mpsc::Receiver<PushMessage>>>,
    subscribe_calls: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(Self::page(Vec::new()))),
            delay: Mutex::new(None),
            reachable: AtomicBool::new(true),
            fetch_calls: AtomicUsize::new(0),
            filters: Mutex::new(Vec::new()),
            patrons: Mutex::new(HashMap::new()),
            patron_calls: AtomicUsize::new(0),
            manifest: Mutex::new(Ok(None)),
            push: Mutex::new(VecDeque::new()),
            subscribe_calls: AtomicUsize::new(0),
        }
    }
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    /// Successful single-page envelope holding `tickets`.
    pub fn page(tickets: Vec<Ticket>) -> TicketPage {
        let n = tickets.len() as i64;
        TicketPage { items: tickets, total_count: n, total_pages: i64::from(n > 0), page_index: 1, success: true, ..Default::default() }
    }

    pub fn push_outcome(&self, outcome: LevyResult<TicketPage>) { lock(&self.script).push_back(outcome); }

    pub fn push_tickets(&self, tickets: Vec<Ticket>) { self.push_outcome(Ok(Self::page(tickets))); }

    pub fn push_failure(&self, err: LevyError) { self.push_outcome(Err(err)); }

    pub fn set_fallback(&self, outcome: LevyResult<TicketPage>) { *lock(&self.fallback) = outcome; }

    /// Every fetch sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) { *lock(&self.delay) = delay; }

    pub fn set_reachable(&self, up: bool) { self.reachable.store(up, Ordering::SeqCst); }

    pub fn set_patron(&self, id: i64, outcome: LevyResult<Option<PatronRecord>>) { lock(&self.patrons).insert(id, outcome); }

    pub fn set_manifest(&self, outcome: LevyResult<Option<AppManifest>>) { *lock(&self.manifest) = outcome; }

    /// Queue one push subscription; the returned sender feeds it.
    pub fn push_channel(&self) -> mpsc::Sender<PushMessage> {
        let (tx, rx) = mpsc::channel(256);
        lock(&self.push).push_back(rx);
        tx
    }

    pub fn fetch_calls(&self) -> usize { self.fetch_calls.load(Ordering::SeqCst) }

    pub fn patron_calls(&self) -> usize { self.patron_calls.load(Ordering::SeqCst) }

    pub fn subscribe_calls(&self) -> usize { self.subscribe_calls.load(Ordering::SeqCst) }

    /// Filter argument of every fetch so far.
    pub fn filters(&self) -> Vec<String> { lock(&self.filters).clone() }
}

#[async_trait::async_trait]
impl LevyApi for MockApi {
    async fn fetch_tickets(&self, _page_index: i64, _page_size: i64, filter_type: &str) -> LevyResult<TicketPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.filters).push(filter_type.to_string());
        let outcome = lock(&self.script).pop_front().unwrap_or_else(|| lock(&self.fallback).clone());
        let delay = *lock(&self.delay);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        outcome
    }

    async fn fetch_patron(&self, patron_id: i64) -> LevyResult<Option<PatronRecord>> {
        self.patron_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.patrons).get(&patron_id).cloned().unwrap_or(Ok(None))
    }

    async fn fetch_manifest(&self, _app_code: &str) -> LevyResult<Option<AppManifest>> { lock(&self.manifest).clone() }

    async fn probe_network(&self) -> bool { self.reachable.load(Ordering::SeqCst) }

    async fn subscribe_push(&self) -> LevyResult<StreamHandle<PushMessage>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let rx = lock(&self.push).pop_front().ok_or_else(|| LevyError::Transport("push hub unavailable".into()))?;
        Ok(StreamHandle { rx, cancel: CancelHandle::noop() })
    }
}
