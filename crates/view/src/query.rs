//! Query inputs for the view pipeline.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDateTime;
use levy_core::{Ticket, FORTY_EIGHT_HOURS, TWELVE_HOURS, TWENTY_FOUR_HOURS};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("unknown filter type: {0}")]
    FilterType(String),
    #[error("unknown sort column: {0}")]
    Column(String),
    #[error("unknown sort direction: {0}")]
    Direction(String),
    #[error("unknown time bucket: {0}")]
    Bucket(String),
}

/// Coarse selector applied after the text filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    All,
    /// Playing time strictly above twelve hours.
    #[default]
    Alerted,
}

impl FilterType {
    pub fn retains(self, t: &Ticket) -> bool {
        match self {
            FilterType::All => true,
            FilterType::Alerted => t.playing_time > TWELVE_HOURS,
        }
    }

    /// Wire value sent to the remote source.
    pub fn as_wire(self) -> &'static str {
        match self {
            FilterType::All => "All",
            FilterType::Alerted => "<30",
        }
    }
}

impl FromStr for FilterType {
    type Err = QueryParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(FilterType::All),
            "alerted" | "alert" | "<30" => Ok(FilterType::Alerted),
            other => Err(QueryParseError::FilterType(other.to_string())),
        }
    }
}

/// Half-open playing-time ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeBucket {
    H12,
    H24,
    H48,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 3] = [TimeBucket::H12, TimeBucket::H24, TimeBucket::H48];

    pub fn contains(self, playing_time: i64) -> bool {
        match self {
            TimeBucket::H12 => (TWELVE_HOURS..TWENTY_FOUR_HOURS).contains(&playing_time),
            TimeBucket::H24 => (TWENTY_FOUR_HOURS..FORTY_EIGHT_HOURS).contains(&playing_time),
            TimeBucket::H48 => playing_time >= FORTY_EIGHT_HOURS,
        }
    }
}

impl FromStr for TimeBucket {
    type Err = QueryParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches(['h', 'H']) {
            "12" => Ok(TimeBucket::H12),
            "24" => Ok(TimeBucket::H24),
            "48" => Ok(TimeBucket::H48),
            _ => Err(QueryParseError::Bucket(s.to_string())),
        }
    }
}

/// Set of active bucket toggles. Empty means the bucket stage passes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketToggles(SmallVec<[TimeBucket; 3]>);

impl BucketToggles {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn is_on(&self, b: TimeBucket) -> bool { self.0.contains(&b) }

    pub fn set(&mut self, b: TimeBucket, on: bool) {
        let present = self.is_on(b);
        if on && !present {
            self.0.push(b);
        } else if !on && present {
            self.0.retain(|x| *x != b);
        }
    }

    /// Flip one toggle; returns its new state.
    pub fn toggle(&mut self, b: TimeBucket) -> bool {
        let on = !self.is_on(b);
        self.set(b, on);
        on
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeBucket> + '_ { self.0.iter().copied() }

    pub fn retains(&self, t: &Ticket) -> bool {
        self.0.is_empty() || self.0.iter().any(|b| b.contains(t.playing_time))
    }
}

impl FromIterator<TimeBucket> for BucketToggles {
    fn from_iter<I: IntoIterator<Item = TimeBucket>>(iter: I) -> Self {
        let mut out = BucketToggles::default();
        for b in iter {
            out.set(b, true);
        }
        out
    }
}

/// Sortable columns. Each compares by its own field; absent values compare as the zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    TransactionNo,
    PlayerId,
    FullName,
    Location,
    StartTime,
    Seat,
    Row,
    PitName,
    Type,
    LevyType,
    UsedStatus,
    Area,
    LocalStatus,
    RemainingTime,
    PlayingTime,
}

fn opt_str(s: &Option<String>) -> &str { s.as_deref().unwrap_or("") }

/// Case-insensitive, with byte order breaking ties so the comparison stays total.
fn text_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}

fn opt_time(t: &Option<NaiveDateTime>) -> NaiveDateTime { t.unwrap_or(NaiveDateTime::MIN) }

impl SortField {
    pub fn compare(self, a: &Ticket, b: &Ticket) -> Ordering {
        match self {
            SortField::TransactionNo => text_cmp(&a.transaction_no, &b.transaction_no),
            SortField::PlayerId => a.player_id.cmp(&b.player_id),
            SortField::FullName => text_cmp(opt_str(&a.full_name), opt_str(&b.full_name)),
            SortField::Location => text_cmp(opt_str(&a.location), opt_str(&b.location)),
            SortField::StartTime => opt_time(&a.start_time).cmp(&opt_time(&b.start_time)),
            SortField::Seat => text_cmp(opt_str(&a.seat), opt_str(&b.seat)),
            SortField::Row => text_cmp(opt_str(&a.row), opt_str(&b.row)),
            SortField::PitName => text_cmp(opt_str(&a.pit_name), opt_str(&b.pit_name)),
            SortField::Type => text_cmp(a.ticket_type.as_str(), b.ticket_type.as_str()),
            SortField::LevyType => text_cmp(opt_str(&a.levy_type), opt_str(&b.levy_type)),
            SortField::UsedStatus => text_cmp(a.used_status.as_str(), b.used_status.as_str()),
            SortField::Area => text_cmp(opt_str(&a.area), opt_str(&b.area)),
            SortField::LocalStatus => text_cmp(opt_str(&a.local_status), opt_str(&b.local_status)),
            SortField::RemainingTime => a.remaining_time.cmp(&b.remaining_time),
            SortField::PlayingTime => a.playing_time.cmp(&b.playing_time),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SortField::TransactionNo => "TransactionNo",
            SortField::PlayerId => "PlayerID",
            SortField::FullName => "FullName",
            SortField::Location => "Location",
            SortField::StartTime => "StartTime",
            SortField::Seat => "Seat",
            SortField::Row => "Row",
            SortField::PitName => "PitName",
            SortField::Type => "Type",
            SortField::LevyType => "LevyType",
            SortField::UsedStatus => "UsedStatus",
            SortField::Area => "Area",
            SortField::LocalStatus => "LocalStatus",
            SortField::RemainingTime => "RemainingTime",
            SortField::PlayingTime => "PlayingTime",
        }
    }
}

impl FromStr for SortField {
    type Err = QueryParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_ascii_lowercase();
        let f = match norm.as_str() {
            "transactionno" | "txn" | "transaction" => SortField::TransactionNo,
            "playerid" | "player" => SortField::PlayerId,
            "fullname" | "name" => SortField::FullName,
            "location" => SortField::Location,
            "starttime" | "start" => SortField::StartTime,
            "seat" => SortField::Seat,
            "row" => SortField::Row,
            "pitname" | "pit" => SortField::PitName,
            "type" => SortField::Type,
            "levytype" | "levy" => SortField::LevyType,
            "usedstatus" | "status" => SortField::UsedStatus,
            "area" => SortField::Area,
            "localstatus" => SortField::LocalStatus,
            "remainingtime" | "remaining" => SortField::RemainingTime,
            "playingtime" | "playing" | "time" => SortField::PlayingTime,
            _ => return Err(QueryParseError::Column(s.to_string())),
        };
        Ok(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(QueryParseError::Direction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self { Self { field, direction } }

    /// Header-click semantics: same column flips direction, a new column starts ascending.
    pub fn toggled(prev: Option<SortSpec>, field: SortField) -> SortSpec {
        match prev {
            Some(p) if p.field == field => SortSpec::new(field, p.direction.flipped()),
            _ => SortSpec::new(field, SortDirection::Ascending),
        }
    }

    pub fn compare(&self, a: &Ticket, b: &Ticket) -> Ordering {
        let o = self.field.compare(a, b);
        match self.direction {
            SortDirection::Ascending => o,
            SortDirection::Descending => o.reverse(),
        }
    }
}

/// Everything the pipeline needs besides the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    pub search: String,
    pub filter_type: FilterType,
    pub buckets: BucketToggles,
    pub sort: Option<SortSpec>,
}

impl ViewQuery {
    /// Trimmed, lower-cased search needle; `None` when blank.
    pub fn needle(&self) -> Option<String> {
        let t = self.search.trim();
        if t.is_empty() { None } else { Some(t.to_lowercase()) }
    }
}
