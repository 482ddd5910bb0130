//! Levy view: the filter/sort pipeline run over cache snapshots.
//! Stages run in a fixed order (text, filter type, buckets, counts, sort) so the
//! explain counts and aggregates always describe the same set.

#![forbid(unsafe_code)]

use levy_core::{Ticket, TicketType};
use serde::Serialize;

mod paging;
mod query;

pub use paging::{clamp_index, total_pages, PageCursor, DEFAULT_PAGE_SIZE};
pub use query::{
    BucketToggles, FilterType, QueryParseError, SortDirection, SortField, SortSpec, TimeBucket, ViewQuery,
};

/// Survivors after each stage, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterExplain {
    pub total: usize,
    pub after_search: usize,
    pub after_filter_type: usize,
    pub after_buckets: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewResult {
    pub rows: Vec<Ticket>,
    pub total_slot: usize,
    pub total_table: usize,
    pub explain: FilterExplain,
}

impl ViewResult {
    pub fn total_count(&self) -> usize { self.rows.len() }
}

fn field_contains(t: &Ticket, needle: &str) -> bool {
    if t.player_id.to_string().contains(needle) {
        return true;
    }
    let fields = [
        t.full_name.as_deref(),
        t.location.as_deref(),
        Some(t.ticket_type.as_str()),
        t.area.as_deref(),
        t.local_status.as_deref(),
        Some(t.used_status.as_str()),
        t.pit_name.as_deref(),
    ];
    fields.into_iter().flatten().any(|f| f.to_lowercase().contains(needle))
}

/// True when any searchable field contains `needle` (already trimmed and lower-cased).
/// A multi-word needle also matches when every word is found in some field, so
/// `"7 table"` hits player 7 named "John Table".
pub fn matches_text(t: &Ticket, needle: &str) -> bool {
    if field_contains(t, needle) {
        return true;
    }
    let words: Vec<&str> = needle.split_whitespace().collect();
    words.len() > 1 && words.iter().all(|w| field_contains(t, w))
}

/// Run the pipeline over `tickets` (a snapshot copy) and return the full filtered list.
pub fn compute(tickets: Vec<Ticket>, q: &ViewQuery) -> ViewResult {
    let started = std::time::Instant::now();
    let total = tickets.len();

    let mut rows: Vec<Ticket> = match q.needle() {
        Some(n) => tickets.into_iter().filter(|t| matches_text(t, &n)).collect(),
        None => tickets,
    };
    let after_search = rows.len();

    rows.retain(|t| q.filter_type.retains(t));
    let after_filter_type = rows.len();

    rows.retain(|t| q.buckets.retains(t));
    let after_buckets = rows.len();

    let mut total_slot = 0usize;
    let mut total_table = 0usize;
    for t in rows.iter() {
        match t.ticket_type {
            TicketType::Slot => total_slot += 1,
            TicketType::Table => total_table += 1,
            TicketType::Other(_) => {}
        }
    }

    if let Some(spec) = q.sort {
        // stable: equal keys keep cache order
        rows.sort_by(|a, b| spec.compare(a, b));
    }

    metrics::histogram!("view_rows", rows.len() as f64);
    metrics::histogram!("view_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
    tracing::trace!(total, after_search, after_filter_type, after_buckets, "view: computed");

    ViewResult {
        rows,
        total_slot,
        total_table,
        explain: FilterExplain { total, after_search, after_filter_type, after_buckets },
    }
}
