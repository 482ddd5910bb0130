#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use levy_api::{LevyError, MockApi};
use levy_core::{AppManifest, LinkEvent, PushEvent, PushMessage, Ticket, TicketType, UsedStatus};
use levy_api::{ApiConfig, HttpApi};
use levy_monitor::connectivity::{MSG_CONNECTED, MSG_GAVE_UP, MSG_LOST};
use levy_monitor::{Connectivity, MonitorConfig, MonitorEvent, MonitorHandle, PageView, PushStatus};
use levy_view::{FilterType, SortDirection, SortField, TimeBucket};

fn fast_cfg() -> MonitorConfig {
    MonitorConfig {
        cache_expiry: Duration::from_secs(3600),
        refresh_interval: Duration::from_secs(3600),
        network_poll: Duration::from_secs(3600),
        countdown_period: Duration::from_secs(3600),
        debounce: Duration::from_millis(20),
        reconnect_delay: Duration::from_millis(20),
        push_enabled: false,
        ..MonitorConfig::default()
    }
}

fn ticket(key: &str, playing: i64) -> Ticket {
    Ticket {
        transaction_no: key.into(),
        playing_time: playing,
        used_status: UsedStatus::Active,
        ticket_type: TicketType::Slot,
        ..Default::default()
    }
}

fn tickets(n: usize) -> Vec<Ticket> { (0..n).map(|i| ticket(&format!("T{:03}", i), 100 + i as i64)).collect() }

async fn wait_for(h: &MonitorHandle, what: &str, pred: impl Fn(&PageView) -> bool) -> Arc<PageView> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let p = h.page();
        if pred(&p) {
            return p;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {}: {:?}", what, p);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_calls(what: &str, f: impl Fn() -> usize, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while f() < n {
        if Instant::now() > deadline {
            panic!("timed out waiting for {} >= {}", what, n);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn initial_load_resets_filter_and_pages() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(20));
    let (h, task) = levy_monitor::spawn(mock.clone(), fast_cfg());

    let p = wait_for(&h, "first page", |p| p.total_count == 20 && !p.is_loading).await;
    assert_eq!(p.query.filter_type, FilterType::All);
    assert_eq!(mock.filters(), vec!["All"]);
    assert_eq!((p.page_index, p.total_pages, p.rows.len()), (1, 2, 15));
    assert_eq!(p.total_slot, 20);
    assert!(p.can_next() && !p.can_prev());

    h.next_page();
    let p = wait_for(&h, "second page", |p| p.page_index == 2).await;
    assert_eq!(p.rows.len(), 5);
    assert!(!p.can_next() && p.can_prev());
    // bounded at the last page
    h.next_page();
    h.prev_page();
    let p = wait_for(&h, "back to first", |p| p.page_index == 1).await;
    assert_eq!(p.rows[0].transaction_no, "T000");

    h.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn empty_reload_keeps_cached_tickets() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(3));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 3 && !p.is_loading).await;

    h.refresh();
    wait_calls("fetches", || mock.fetch_calls(), 2).await;
    let p = wait_for(&h, "refresh done", |p| !p.is_loading).await;
    assert_eq!(p.total_count, 3);
    h.shutdown();
}

#[tokio::test]
async fn user_load_failure_is_reported_once() {
    let mock = Arc::new(MockApi::new());
    mock.set_delay(Some(Duration::from_millis(50)));
    mock.push_failure(LevyError::Status { code: 500, body: "boom".into() });
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    let mut events = h.subscribe();

    let got = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(MonitorEvent::LoadFailed(msg)) = events.recv().await {
                return msg;
            }
        }
    })
    .await
    .expect("load failure event");
    assert!(got.contains("500"));
    let p = wait_for(&h, "not loading", |p| !p.is_loading).await;
    assert_eq!(p.total_count, 0);
    assert_eq!(p.connectivity, Connectivity::Connected);
    h.shutdown();
}

#[tokio::test]
async fn supervisor_recovers_after_two_failed_attempts() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(2));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 2).await;

    h.network_changed(false);
    let p = wait_for(&h, "disconnected", |p| p.is_network_disconnected).await;
    assert_eq!(p.network_message, MSG_LOST);
    assert!(p.can_retry());

    mock.push_failure(LevyError::Transport("refused".into()));
    mock.push_failure(LevyError::Timeout("30s".into()));
    mock.push_tickets(tickets(3));
    h.network_changed(true);

    let p = wait_for(&h, "reconnected", |p| p.connectivity == Connectivity::Connected && p.total_count == 3).await;
    assert_eq!(p.network_message, "Connected");
    assert!(!p.is_reconnecting);
    assert_eq!(mock.fetch_calls(), 4);
    h.shutdown();
}

#[tokio::test]
async fn supervisor_gives_up_until_manual_retry() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(1));
    let cfg = MonitorConfig { max_reconnect_attempts: 2, ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    wait_for(&h, "loaded", |p| p.total_count == 1).await;

    mock.set_fallback(Err(LevyError::Transport("down".into())));
    h.network_changed(false);
    wait_for(&h, "disconnected", |p| p.is_network_disconnected).await;
    h.network_changed(true);

    let p = wait_for(&h, "gave up", |p| p.network_message == MSG_GAVE_UP).await;
    assert!(p.is_network_disconnected && p.can_retry());
    assert_eq!(mock.fetch_calls(), 3);

    // further signals do not restart the episode
    h.network_changed(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.fetch_calls(), 3);
    // stale cache still shown
    assert_eq!(h.page().total_count, 1);

    mock.set_fallback(Ok(MockApi::page(tickets(4))));
    h.retry_connection();
    let p = wait_for(&h, "recovered", |p| p.connectivity == Connectivity::Connected && p.total_count == 4).await;
    assert!(!p.can_retry());
    h.shutdown();
}

#[tokio::test]
async fn scheduler_reloads_stale_cache_only_while_connected() {
    let mock = Arc::new(MockApi::new());
    mock.set_fallback(Ok(MockApi::page(tickets(2))));
    let cfg = MonitorConfig {
        cache_expiry: Duration::from_millis(30),
        refresh_interval: Duration::from_millis(30),
        ..fast_cfg()
    };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    wait_calls("scheduled reloads", || mock.fetch_calls(), 3).await;

    h.network_changed(false);
    wait_for(&h, "disconnected", |p| p.is_network_disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = mock.fetch_calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.fetch_calls(), settled);
    h.shutdown();
}

#[tokio::test]
async fn query_edits_are_debounced_and_reset_the_page() {
    let mock = Arc::new(MockApi::new());
    let mut list = tickets(30);
    for t in list.iter_mut().take(4) {
        t.full_name = Some("John Table".into());
    }
    mock.push_tickets(list);
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 30).await;
    h.next_page();
    wait_for(&h, "page 2", |p| p.page_index == 2).await;

    h.set_search("j");
    h.set_search("jo");
    h.set_search("  JOHN ");
    let p = wait_for(&h, "search applied", |p| p.total_count == 4).await;
    assert_eq!(p.page_index, 1);
    assert_eq!(p.explain.after_search, 4);
    assert!(p.can_clear_search());

    h.clear_search();
    let p = wait_for(&h, "search cleared", |p| p.total_count == 30).await;
    assert!(!p.can_clear_search());
    h.shutdown();
}

#[tokio::test]
async fn alerted_filter_and_bucket_narrow_the_view() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(vec![ticket("a", 10_000), ticket("b", 50_000), ticket("c", 90_000), ticket("d", 200_000)]);
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 4).await;

    h.apply_filter(FilterType::Alerted);
    wait_for(&h, "alerted", |p| p.total_count == 3).await;
    h.set_bucket(TimeBucket::H24, true);
    let p = wait_for(&h, "24h bucket", |p| p.total_count == 1).await;
    assert_eq!(p.rows[0].transaction_no, "c");
    assert_eq!(p.total_pages, 1);
    h.shutdown();
}

#[tokio::test]
async fn sort_applies_immediately() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(vec![ticket("a", 5), ticket("b", 500), ticket("c", 50)]);
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 3).await;

    h.sort(SortField::PlayingTime, Some(SortDirection::Descending));
    let p = wait_for(&h, "sorted desc", |p| p.rows.first().map(|t| t.transaction_no.as_str()) == Some("b")).await;
    assert_eq!(p.rows.iter().map(|t| t.playing_time).collect::<Vec<_>>(), vec![500, 50, 5]);

    // header click on the same column flips
    h.sort(SortField::PlayingTime, None);
    wait_for(&h, "sorted asc", |p| p.rows.first().map(|t| t.transaction_no.as_str()) == Some("a")).await;
    h.shutdown();
}

#[tokio::test]
async fn countdown_advances_and_flags_overstay() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(vec![ticket("late", -2)]);
    let cfg = MonitorConfig { countdown_period: Duration::from_millis(20), ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);

    let p = wait_for(&h, "counter past zero", |p| p.rows.first().map(|t| t.playing_time >= 1).unwrap_or(false)).await;
    assert_eq!(p.rows[0].used_status, UsedStatus::Overstayed);
    h.shutdown();
}

#[tokio::test]
async fn push_events_reconcile_into_the_page() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(vec![ticket("A", 10), ticket("B", 20)]);
    let push = mock.push_channel();
    let cfg = MonitorConfig { push_enabled: true, ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    wait_for(&h, "loaded and subscribed", |p| p.total_count == 2 && p.push_status == PushStatus::Connected).await;

    push.send(PushMessage::Ticket(PushEvent::Added(ticket("C", 1)))).await.unwrap();
    let p = wait_for(&h, "added", |p| p.total_count == 3).await;
    assert_eq!(p.rows[0].transaction_no, "C");
    assert!(p.rows[0].is_new);

    push.send(PushMessage::Ticket(PushEvent::Removed("A".into()))).await.unwrap();
    let mut update = ticket("B", 999);
    update.remaining_time = 42;
    update.used_status = UsedStatus::InUse;
    push.send(PushMessage::Ticket(PushEvent::Updated(update))).await.unwrap();
    let p = wait_for(&h, "removed and updated", |p| {
        p.total_count == 2 && p.rows.iter().any(|t| t.transaction_no == "B" && t.is_updated)
    })
    .await;
    assert!(p.rows.iter().all(|t| t.transaction_no != "A"));
    let b = p.rows.iter().find(|t| t.transaction_no == "B").unwrap();
    // updates carry remaining time and status only
    assert_eq!((b.remaining_time, &b.used_status), (42, &UsedStatus::InUse));
    assert_eq!(b.playing_time, 20);

    push.send(PushMessage::Link(LinkEvent::Reconnecting)).await.unwrap();
    wait_for(&h, "link reconnecting", |p| p.push_status == PushStatus::Reconnecting).await;
    push.send(PushMessage::Link(LinkEvent::Reconnected)).await.unwrap();
    wait_for(&h, "link back", |p| p.push_status == PushStatus::Connected).await;
    h.shutdown();
}

#[tokio::test]
async fn push_close_reconnects_and_reloads_once() {
    let mock = Arc::new(MockApi::new());
    mock.set_fallback(Ok(MockApi::page(tickets(2))));
    let first = mock.push_channel();
    let _second = mock.push_channel();
    let cfg = MonitorConfig { push_enabled: true, ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    wait_for(&h, "subscribed", |p| p.push_status == PushStatus::Connected && p.total_count == 2).await;
    assert_eq!(mock.fetch_calls(), 1);

    drop(first);
    wait_calls("resubscribe", || mock.subscribe_calls(), 2).await;
    wait_calls("recovery reload", || mock.fetch_calls(), 2).await;
    wait_for(&h, "connected again", |p| p.push_status == PushStatus::Connected).await;
    h.shutdown();
}

#[tokio::test]
async fn push_subscribe_failure_leaves_monitor_running() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(1));
    let cfg = MonitorConfig { push_enabled: true, ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    let p = wait_for(&h, "push failed", |p| p.push_status == PushStatus::Failed && p.total_count == 1).await;
    assert_eq!(p.connectivity, Connectivity::Connected);
    assert_eq!(mock.subscribe_calls(), 1);
    h.shutdown();
}

#[tokio::test]
async fn version_text_comes_from_manifest() {
    let mock = Arc::new(MockApi::new());
    mock.set_manifest(Ok(Some(AppManifest { version: "2.3.4".into(), ..Default::default() })));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "version", |p| p.version_text == "Version: 2.3.4").await;
    h.shutdown();

    let mock = Arc::new(MockApi::new());
    mock.set_manifest(Err(LevyError::Transport("offline".into())));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| !p.is_loading && p.last_refresh.is_none()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.page().version_text, "Version: 1.1.0");
    h.shutdown();
}

#[tokio::test]
async fn superseded_reload_result_is_dropped() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(1));
    mock.push_tickets(tickets(5));
    mock.set_delay(Some(Duration::from_millis(300)));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_calls("first fetch", || mock.fetch_calls(), 1).await;

    // the second load answers first; the slow one must never land
    mock.set_delay(None);
    h.load();
    wait_for(&h, "second load", |p| p.total_count == 5 && !p.is_loading).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    let p = h.page();
    assert_eq!(p.total_count, 5);
    assert!(!p.is_loading);
    assert_eq!(mock.fetch_calls(), 2);
    h.shutdown();
}

#[tokio::test]
async fn latest_started_pipeline_wins() {
    let mock = Arc::new(MockApi::new());
    mock.push_tickets(tickets(200));
    let (h, _task) = levy_monitor::spawn(mock.clone(), fast_cfg());
    wait_for(&h, "loaded", |p| p.total_count == 200).await;

    for i in 0..25 {
        let dir = if i % 2 == 0 { SortDirection::Descending } else { SortDirection::Ascending };
        h.sort(SortField::PlayingTime, Some(dir));
    }
    h.sort(SortField::PlayingTime, Some(SortDirection::Descending));
    let p = wait_for(&h, "last sort", |p| p.rows.first().map(|t| t.transaction_no.as_str()) == Some("T199")).await;
    assert_eq!(p.query.sort.map(|s| s.direction), Some(SortDirection::Descending));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.page().rows[0].transaction_no, "T199");
    h.shutdown();
}

#[tokio::test]
async fn push_reconnects_are_bounded_and_surface_in_connectivity() {
    let mock = Arc::new(MockApi::new());
    mock.set_fallback(Ok(MockApi::page(tickets(2))));
    // one good subscription; every later subscribe fails
    let first = mock.push_channel();
    let cfg = MonitorConfig { push_enabled: true, max_reconnect_attempts: 2, reconnect_delay: Duration::from_millis(40), ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(mock.clone(), cfg);
    wait_for(&h, "subscribed", |p| p.push_status == PushStatus::Connected && p.total_count == 2).await;

    drop(first);
    let p = wait_for(&h, "link reconnecting", |p| p.is_reconnecting).await;
    assert_eq!(p.connectivity, Connectivity::Reconnecting);
    assert!(p.network_message.starts_with("Reconnecting... (Attempt"));

    let p = wait_for(&h, "link gave up", |p| p.push_status == PushStatus::Failed).await;
    assert_eq!(p.network_message, MSG_GAVE_UP);
    assert!(p.is_network_disconnected && p.can_retry());
    assert_eq!(mock.subscribe_calls(), 3);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.subscribe_calls(), 3);
    assert_eq!(h.page().total_count, 2);

    // manual retry reloads and reopens the link
    let _again = mock.push_channel();
    h.retry_connection();
    let p = wait_for(&h, "recovered", |p| p.push_status == PushStatus::Connected && p.connectivity == Connectivity::Connected).await;
    assert_eq!(p.network_message, MSG_CONNECTED);
    assert_eq!(mock.subscribe_calls(), 4);
    h.shutdown();
}

#[tokio::test]
async fn unreachable_push_hub_fails_once() {
    let n = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let data = std::env::temp_dir().join(format!("levy-monitor-push-{}.json", n));
    std::fs::write(&data, r#"{"Tickets":[{"transactionNo":"A"}],"TotalCount":1}"#).unwrap();
    let mut api_cfg = ApiConfig::new("http://127.0.0.1", "");
    api_cfg.test_data = Some(data.clone());
    api_cfg.push_url = Some("http://127.0.0.1:9/hub".into());
    let api = Arc::new(HttpApi::new(api_cfg).unwrap());

    let cfg = MonitorConfig { push_enabled: true, max_reconnect_attempts: 2, ..fast_cfg() };
    let (h, _task) = levy_monitor::spawn(api, cfg);
    let p = wait_for(&h, "push failed", |p| p.push_status == PushStatus::Failed && p.total_count == 1).await;
    assert_eq!(p.connectivity, Connectivity::Connected);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let p = h.page();
    assert_eq!(p.push_status, PushStatus::Failed);
    assert_eq!(p.connectivity, Connectivity::Connected);
    h.shutdown();
    let _ = std::fs::remove_file(data);
}
