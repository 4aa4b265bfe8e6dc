//! Tour types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::DEFAULT_DWELL_MINUTES;

/// Where a stop's arrival time comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStatus {
    /// Derived from routing provider data
    #[default]
    Computed,
    /// Typed in by the user
    Manual,
    /// Straight-line estimate the caller explicitly asked for
    Estimated,
    /// Downstream of a failed recalculation, not verified
    Stale,
}

/// One occurrence of a site within a tour.
///
/// `instance_id` identifies the occurrence, `stop_ref` the site. The same site
/// can appear several times, so the two must never be used interchangeably.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStop {
    pub instance_id: Uuid,
    pub stop_ref: Uuid,
    /// 1-based, dense
    pub order: u32,
    pub arrival_time: DateTime<Utc>,
    pub dwell_minutes: u32,
    #[serde(default)]
    pub time_status: TimeStatus,
}

impl TourStop {
    pub fn new(stop_ref: Uuid, arrival_time: DateTime<Utc>, dwell_minutes: u32) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            stop_ref,
            order: 0,
            arrival_time,
            dwell_minutes,
            time_status: TimeStatus::Computed,
        }
    }

    /// Arrival plus dwell
    pub fn departure_time(&self) -> DateTime<Utc> {
        self.arrival_time + chrono::Duration::minutes(i64::from(self.dwell_minutes))
    }
}

/// Normalize a user-supplied dwell value: unset or negative falls back to the default
pub fn normalize_dwell(minutes: Option<i64>) -> u32 {
    normalize_dwell_with(minutes, DEFAULT_DWELL_MINUTES)
}

/// Same as [`normalize_dwell`] with a configured default
pub fn normalize_dwell_with(minutes: Option<i64>, default: u32) -> u32 {
    match minutes {
        Some(m) if m >= 0 => u32::try_from(m).unwrap_or(u32::MAX),
        _ => default,
    }
}

/// Tour entity (an ordered sequence of stops for one vehicle)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    /// Organizational grouping, opaque here
    #[serde(default)]
    pub pole: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stops: Vec<TourStop>,
    /// Bumped on every change to the stop list
    #[serde(default)]
    pub revision: u64,
}

impl Tour {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pole: None,
            start_time,
            end_time: None,
            stops: Vec::new(),
            revision: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Lookup of a specific occurrence
    pub fn stop(&self, instance_id: Uuid) -> Option<&TourStop> {
        self.stops.iter().find(|s| s.instance_id == instance_id)
    }

    pub fn position_of(&self, instance_id: Uuid) -> Option<usize> {
        self.stops.iter().position(|s| s.instance_id == instance_id)
    }

    /// All occurrences of a site in this tour
    pub fn occurrences_of(&self, site_id: Uuid) -> Vec<&TourStop> {
        self.stops.iter().filter(|s| s.stop_ref == site_id).collect()
    }

    pub fn contains_site(&self, site_id: Uuid) -> bool {
        self.stops.iter().any(|s| s.stop_ref == site_id)
    }

    /// Re-establish dense 1-based ordering after an insert/remove/reorder
    pub fn renumber(&mut self) {
        for (i, stop) in self.stops.iter_mut().enumerate() {
            stop.order = i as u32 + 1;
        }
    }

    /// Keep start/end time in line with the first/last stop
    pub fn refresh_bounds(&mut self) {
        match (self.stops.first(), self.stops.last()) {
            (Some(first), Some(last)) => {
                self.start_time = first.arrival_time;
                self.end_time = Some(last.arrival_time);
            }
            _ => self.end_time = None,
        }
    }

    /// Record a change to the stop list
    pub fn touch(&mut self) {
        self.renumber();
        self.refresh_bounds();
        self.revision += 1;
    }
}
