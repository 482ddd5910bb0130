//! Levy core types: tickets, snapshots and the wire envelopes shared by every crate.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub mod envelope;
pub mod push;

pub use envelope::{ApiEnvelope, AppManifest, PatronRecord, TicketPage};
pub use push::{LinkEvent, LinkState, PushEvent, PushMessage};

/// Stable identity of a ticket inside the cache.
pub type TxnKey = String;

/// Playing-time thresholds (seconds) shared by the alert tiers and the bucket filters.
pub const TWELVE_HOURS: i64 = 43_200;
pub const TWENTY_FOUR_HOURS: i64 = 86_400;
pub const FORTY_EIGHT_HOURS: i64 = 172_800;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketType {
    Table,
    Slot,
    Other(String),
}

impl TicketType {
    pub fn as_str(&self) -> &str {
        match self {
            TicketType::Table => "Table",
            TicketType::Slot => "Slot",
            TicketType::Other(s) => s.as_str(),
        }
    }
}

impl Default for TicketType {
    fn default() -> Self { TicketType::Other(String::new()) }
}

impl From<String> for TicketType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => TicketType::Table,
            "slot" => TicketType::Slot,
            _ => TicketType::Other(s),
        }
    }
}

impl From<TicketType> for String {
    fn from(t: TicketType) -> Self { t.as_str().to_string() }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UsedStatus {
    Active,
    InUse,
    Used,
    Expired,
    Overstayed,
    Other(String),
}

impl UsedStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UsedStatus::Active => "Active",
            UsedStatus::InUse => "InUse",
            UsedStatus::Used => "Used",
            UsedStatus::Expired => "Expired",
            UsedStatus::Overstayed => "Overstayed",
            UsedStatus::Other(s) => s.as_str(),
        }
    }
}

impl Default for UsedStatus {
    fn default() -> Self { UsedStatus::Other(String::new()) }
}

impl From<String> for UsedStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => UsedStatus::Active,
            "inuse" | "in use" => UsedStatus::InUse,
            "used" => UsedStatus::Used,
            "expired" => UsedStatus::Expired,
            "overstayed" => UsedStatus::Overstayed,
            _ => UsedStatus::Other(s),
        }
    }
}

impl From<UsedStatus> for String {
    fn from(s: UsedStatus) -> Self { s.as_str().to_string() }
}

impl fmt::Display for UsedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Severity tier derived from playing time; drives row highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl AlertLevel {
    pub fn for_playing_time(secs: i64) -> Self {
        if secs >= FORTY_EIGHT_HOURS {
            AlertLevel::Critical
        } else if secs >= TWENTY_FOUR_HOURS {
            AlertLevel::High
        } else if secs >= TWELVE_HOURS {
            AlertLevel::Elevated
        } else {
            AlertLevel::Normal
        }
    }
}

/// One levy ticket (time-limited access grant) as tracked by the monitor.
///
/// `is_new` / `is_updated` are cosmetic hints for the presentation layer and are
/// ignored by `PartialEq`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub transaction_no: TxnKey,
    #[serde(rename = "playerID", alias = "playerId", default)]
    pub player_id: i64,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub seat: Option<String>,
    #[serde(default)]
    pub row: Option<String>,
    #[serde(default)]
    pub pit_name: Option<String>,
    #[serde(rename = "type", default)]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub levy_type: Option<String>,
    #[serde(default)]
    pub used_status: UsedStatus,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub local_status: Option<String>,
    #[serde(default)]
    pub remaining_time: i64,
    /// Seconds; counts up once per second and goes negative while a ticket is overstayed.
    #[serde(default)]
    pub playing_time: i64,
    #[serde(skip)]
    pub is_new: bool,
    #[serde(skip)]
    pub is_updated: bool,
}

impl PartialEq for Ticket {
    fn eq(&self, o: &Self) -> bool {
        self.transaction_no == o.transaction_no
            && self.player_id == o.player_id
            && self.full_name == o.full_name
            && self.location == o.location
            && self.start_time == o.start_time
            && self.seat == o.seat
            && self.row == o.row
            && self.pit_name == o.pit_name
            && self.ticket_type == o.ticket_type
            && self.levy_type == o.levy_type
            && self.used_status == o.used_status
            && self.area == o.area
            && self.local_status == o.local_status
            && self.remaining_time == o.remaining_time
            && self.playing_time == o.playing_time
    }
}

impl Eq for Ticket {}

impl Ticket {
    pub fn alert_level(&self) -> AlertLevel { AlertLevel::for_playing_time(self.playing_time) }

    /// `HH:MM:SS`, or `D day HH:MM:SS` past one day; negative values get a leading `-`.
    pub fn formatted_playing_time(&self) -> String {
        let sign = if self.playing_time < 0 { "-" } else { "" };
        let abs = self.playing_time.unsigned_abs();
        let days = abs / 86_400;
        let h = (abs % 86_400) / 3_600;
        let m = (abs % 3_600) / 60;
        let s = abs % 60;
        if days > 0 {
            format!("{}{} day {:02}:{:02}:{:02}", sign, days, h, m, s)
        } else {
            format!("{}{:02}:{:02}:{:02}", sign, h, m, s)
        }
    }
}

/// Accepts naive ISO timestamps (`2024-05-01T10:00:00[.fff]`) and RFC 3339; anything else is `None`.
fn lenient_datetime<'de, D>(de: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

/// Immutable copy of every cached ticket at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub epoch: u64,
    pub taken_at: DateTime<Utc>,
    pub tickets: Vec<Ticket>,
}

impl Default for CacheSnapshot {
    fn default() -> Self { Self { epoch: 0, taken_at: Utc::now(), tickets: Vec::new() } }
}

pub mod prelude {
    pub use super::{
        AlertLevel, CacheSnapshot, LinkEvent, LinkState, PushEvent, PushMessage, Ticket, TicketPage,
        TicketType, TxnKey, UsedStatus,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_playing_time() {
        let mut t = Ticket { playing_time: 3_725, ..Default::default() };
        assert_eq!(t.formatted_playing_time(), "01:02:05");
        t.playing_time = -59;
        assert_eq!(t.formatted_playing_time(), "-00:00:59");
        t.playing_time = 90_061;
        assert_eq!(t.formatted_playing_time(), "1 day 01:01:01");
    }

    #[test]
    fn alert_tiers_follow_thresholds() {
        assert_eq!(AlertLevel::for_playing_time(43_199), AlertLevel::Normal);
        assert_eq!(AlertLevel::for_playing_time(43_200), AlertLevel::Elevated);
        assert_eq!(AlertLevel::for_playing_time(86_400), AlertLevel::High);
        assert_eq!(AlertLevel::for_playing_time(172_800), AlertLevel::Critical);
    }

    #[test]
    fn decodes_wire_ticket() {
        let raw = serde_json::json!({
            "transactionNo": "TX-1",
            "playerID": 7,
            "fullName": "John Table",
            "startTime": "2024-05-01T10:00:00.123",
            "type": "slot",
            "usedStatus": "InUse",
            "playingTime": -5
        });
        let t: Ticket = serde_json::from_value(raw).unwrap();
        assert_eq!(t.transaction_no, "TX-1");
        assert_eq!(t.player_id, 7);
        assert_eq!(t.ticket_type, TicketType::Slot);
        assert_eq!(t.used_status, UsedStatus::InUse);
        assert!(t.start_time.is_some());
        assert_eq!(t.playing_time, -5);
        assert!(!t.is_new);
    }

    #[test]
    fn equality_ignores_ui_hints() {
        let a = Ticket { transaction_no: "A".into(), ..Default::default() };
        let mut b = a.clone();
        b.is_new = true;
        b.is_updated = true;
        assert_eq!(a, b);
    }

    #[test]
    fn bad_timestamp_is_none() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert!(parse_timestamp("2024-05-01T10:00:00Z").is_some());
    }
}
