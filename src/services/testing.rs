//! Scripted route provider and fixtures for service tests

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::services::routing::{LegMetrics, RouteGeometry, RouteProvider, RouteResult};
use crate::types::{Coordinates, Site};

type PointKey = (u64, u64);

fn key(c: &Coordinates) -> PointKey {
    (c.lat.to_bits(), c.lng.to_bits())
}

/// One recorded provider request
#[derive(Debug, Clone, Copy)]
pub struct RecordedCall {
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub departure: Option<DateTime<Utc>>,
}

/// Provider answering from a fixed script.
///
/// Every leg takes `default_seconds` unless overridden. Distance is reported
/// as 10 m per second of travel.
pub struct ScriptedProvider {
    default_seconds: u64,
    overrides: HashMap<(PointKey, PointKey), u64>,
    failing: HashSet<(PointKey, PointKey)>,
    fail_traffic_requests: bool,
    fail_everything: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn uniform(default_seconds: u64) -> Self {
        Self {
            default_seconds,
            overrides: HashMap::new(),
            failing: HashSet::new(),
            fail_traffic_requests: false,
            fail_everything: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Override the duration of one directed leg
    pub fn with_leg(mut self, from: &Site, to: &Site, seconds: u64) -> Self {
        self.overrides.insert(site_pair(from, to), seconds);
        self
    }

    /// Override both directions
    pub fn with_symmetric_leg(self, a: &Site, b: &Site, seconds: u64) -> Self {
        self.with_leg(a, b, seconds).with_leg(b, a, seconds)
    }

    /// Every request for this directed leg fails
    pub fn failing_leg(mut self, from: &Site, to: &Site) -> Self {
        self.failing.insert(site_pair(from, to));
        self
    }

    /// Requests carrying a departure time fail, simplified ones succeed
    pub fn failing_traffic(mut self) -> Self {
        self.fail_traffic_requests = true;
        self
    }

    pub fn failing_everything(mut self) -> Self {
        self.fail_everything = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn answer(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics> {
        self.calls.lock().push(RecordedCall { origin, destination, departure });

        let pair = (key(&origin), key(&destination));
        if self.fail_everything || self.failing.contains(&pair) {
            anyhow::bail!("scripted failure");
        }
        if self.fail_traffic_requests && departure.is_some() {
            anyhow::bail!("scripted traffic failure");
        }

        let seconds = if pair.0 == pair.1 {
            0
        } else {
            self.overrides.get(&pair).copied().unwrap_or(self.default_seconds)
        };
        Ok(LegMetrics {
            distance_meters: seconds * 10,
            duration_seconds: seconds,
            duration_in_traffic_seconds: departure.map(|_| seconds),
        })
    }
}

fn site_pair(from: &Site, to: &Site) -> (PointKey, PointKey) {
    let from = from.coordinates.expect("scripted site needs coordinates");
    let to = to.coordinates.expect("scripted site needs coordinates");
    (key(&from), key(&to))
}

#[async_trait]
impl RouteProvider for ScriptedProvider {
    async fn distance_and_duration(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics> {
        self.answer(origin, destination, departure)
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<RouteResult> {
        let leg = self.answer(origin, destination, departure)?;
        Ok(RouteResult {
            geometry: RouteGeometry::from_coordinates(&[origin, destination]),
            legs: vec![leg],
        })
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

/// Site with distinct coordinates; `n` spreads sites along a meridian
pub fn site(name: &str, n: u32) -> Site {
    Site::new(name, Some(Coordinates::new(45.0 + f64::from(n) * 0.01, 5.0)))
}

/// 2024-03-04 at the given hour/minute, UTC
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
}
