//! Frame grouping engine.
//!
//! Frames are first clustered by exact equality of their projection onto
//! a chosen attribute subset, then each cluster is split by observation
//! date:
//!
//! - `day_window == 0`: one group per distinct date (absent dates form
//!   their own group).
//! - `day_window > 0`: greedy forward-chaining window. Members are sorted
//!   by date (absent sorts as 1970-01-01) and a frame joins the current
//!   group while it is at most `day_window` days after the *previously
//!   absorbed* frame. A group can therefore span more than `day_window`
//!   days end to end.
//!
//! Every input frame lands in exactly one group.

use std::collections::BTreeMap;
use std::fmt;

use crate::frame::{Attribute, FrameRecord};
use crate::types::{display_date, epoch_date, ObservationDate};

/// Attributes raw flats are stacked by.
pub const FLAT_GROUP_ATTRIBUTES: &[Attribute] = &[
    Attribute::Filter,
    Attribute::Exposure,
    Attribute::Gain,
    Attribute::Offset,
    Attribute::Rotation,
];

/// Attributes raw darks are stacked by.
pub const DARK_GROUP_ATTRIBUTES: &[Attribute] = &[
    Attribute::Exposure,
    Attribute::Gain,
    Attribute::Offset,
    Attribute::Temperature,
];

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// First and last observation date covered by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateSpan {
    pub first: Option<ObservationDate>,
    pub last: Option<ObservationDate>,
}

impl DateSpan {
    pub fn single(date: Option<ObservationDate>) -> Self {
        Self {
            first: date,
            last: date,
        }
    }

    pub fn is_single(&self) -> bool {
        self.first == self.last
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            f.write_str(&display_date(self.first))
        } else {
            write!(
                f,
                "{}_to_{}",
                display_date(self.first),
                display_date(self.last)
            )
        }
    }
}

/// Identifies one output group.
///
/// `fields` holds the rendered projection in the order the attributes were
/// requested; two frames share a base cluster iff their `fields` are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub fields: Vec<(Attribute, String)>,
    pub dates: DateSpan,
}

impl GroupKey {
    /// Pipe-joined projection, e.g. `Ha|100|8|12.5`.
    pub fn base(&self) -> String {
        self.fields
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.base(), self.dates)
    }
}

fn project(frame: &FrameRecord, attributes: &[Attribute]) -> Vec<(Attribute, String)> {
    attributes
        .iter()
        .map(|a| (*a, frame.attribute(*a).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Partition `frames` into groups. See the module docs for the rules.
///
/// Within a group, exact-date groups are ordered by path and windowed
/// groups by date (then path).
pub fn group_frames(
    frames: Vec<FrameRecord>,
    attributes: &[Attribute],
    day_window: u32,
) -> BTreeMap<GroupKey, Vec<FrameRecord>> {
    let mut clusters: BTreeMap<Vec<(Attribute, String)>, Vec<FrameRecord>> = BTreeMap::new();
    for frame in frames {
        clusters
            .entry(project(&frame, attributes))
            .or_default()
            .push(frame);
    }

    let mut groups = BTreeMap::new();
    for (fields, members) in clusters {
        let batches = if day_window == 0 {
            split_by_exact_date(members)
        } else {
            split_by_window(members, day_window)
        };
        for (dates, batch) in batches {
            let key = GroupKey {
                fields: fields.clone(),
                dates,
            };
            tracing::debug!(group = %key, count = batch.len(), "Formed frame group");
            groups.insert(key, batch);
        }
    }
    groups
}

fn split_by_exact_date(members: Vec<FrameRecord>) -> Vec<(DateSpan, Vec<FrameRecord>)> {
    let mut by_date: BTreeMap<Option<ObservationDate>, Vec<FrameRecord>> = BTreeMap::new();
    for member in members {
        by_date
            .entry(member.observation_date)
            .or_default()
            .push(member);
    }
    by_date
        .into_iter()
        .map(|(date, mut batch)| {
            batch.sort_by(|a, b| a.path.cmp(&b.path));
            (DateSpan::single(date), batch)
        })
        .collect()
}

fn split_by_window(
    mut members: Vec<FrameRecord>,
    day_window: u32,
) -> Vec<(DateSpan, Vec<FrameRecord>)> {
    let date_of = |f: &FrameRecord| f.observation_date.unwrap_or_else(epoch_date);
    members.sort_by(|a, b| date_of(a).cmp(&date_of(b)).then_with(|| a.path.cmp(&b.path)));

    let mut out = Vec::new();
    let mut current: Vec<FrameRecord> = Vec::new();
    for member in members {
        if let Some(prev) = current.last() {
            let gap = (date_of(&member) - date_of(prev)).num_days().abs();
            if gap > i64::from(day_window) {
                out.push(close_batch(std::mem::take(&mut current)));
            }
        }
        current.push(member);
    }
    if !current.is_empty() {
        out.push(close_batch(current));
    }
    out
}

fn close_batch(batch: Vec<FrameRecord>) -> (DateSpan, Vec<FrameRecord>) {
    let span = DateSpan {
        first: batch.first().and_then(|f| f.observation_date),
        last: batch.last().and_then(|f| f.observation_date),
    };
    (span, batch)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
