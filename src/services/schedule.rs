//! Arrival time recalculation for an ordered tour.
//!
//! Walks the stops once, from the first stop whose time depends on changed
//! input, and recomputes each arrival from the previous departure plus the
//! travel time. It does NOT reorder anything. Stop 0 is the anchor and is
//! never recomputed.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PartialFailure, RoutingError};
use crate::services::travel::{TravelEstimator, TravelLeg};
use crate::types::{Site, TimeStatus, TourStop};

/// Resolved sites by id
pub type SiteMap = HashMap<Uuid, Site>;

/// What to do with a leg the provider cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Stop at the failing leg and report it
    #[default]
    Fail,
    /// Use the straight-line estimate and flag the time as estimated
    StraightLine,
}

pub struct ScheduleRecalculator {
    estimator: TravelEstimator,
}

impl ScheduleRecalculator {
    pub fn new(estimator: TravelEstimator) -> Self {
        Self { estimator }
    }

    /// Recompute arrivals for `stops[from_index..]` (`from_index` is at least 1).
    ///
    /// On a failing leg the pass stops there: earlier stops keep their fresh
    /// times, the failing stop and everything after it keep the old times,
    /// marked [`TimeStatus::Stale`], inside the returned [`PartialFailure`].
    pub async fn recalculate(
        &self,
        stops: &[TourStop],
        sites: &SiteMap,
        from_index: usize,
        policy: FallbackPolicy,
    ) -> Result<Vec<TourStop>, PartialFailure> {
        let mut computed = stops.to_vec();
        let start = from_index.max(1);

        for i in start..computed.len() {
            let departure = computed[i - 1].departure_time();
            let (from_ref, to_ref) = (computed[i - 1].stop_ref, computed[i].stop_ref);

            let leg = match self.leg(sites, from_ref, to_ref, departure, policy).await {
                Ok(leg) => leg,
                Err(error) => {
                    warn!(
                        "Recalculation stopped at stop {} of {}: {}. Downstream times are stale.",
                        i + 1,
                        computed.len(),
                        error
                    );
                    for stop in &mut computed[i..] {
                        stop.time_status = TimeStatus::Stale;
                    }
                    return Err(PartialFailure {
                        failed_index: i,
                        error,
                        computed,
                    });
                }
            };

            let stop = &mut computed[i];
            stop.arrival_time = departure + leg.duration();
            stop.time_status = if leg.is_estimate() {
                TimeStatus::Estimated
            } else {
                TimeStatus::Computed
            };
        }

        debug!("Recalculated {} stops from index {}", computed.len().saturating_sub(start), start);
        Ok(computed)
    }

    async fn leg(
        &self,
        sites: &SiteMap,
        from_ref: Uuid,
        to_ref: Uuid,
        departure: chrono::DateTime<chrono::Utc>,
        policy: FallbackPolicy,
    ) -> Result<TravelLeg, RoutingError> {
        let from = sites
            .get(&from_ref)
            .ok_or(RoutingError::InvalidCoordinates { site_id: from_ref })?;
        let to = sites
            .get(&to_ref)
            .ok_or(RoutingError::InvalidCoordinates { site_id: to_ref })?;

        match self.estimator.travel_time(from, to, departure).await {
            Err(e) if e.is_transient() && policy == FallbackPolicy::StraightLine => {
                warn!("Using straight-line estimate for {} -> {}: {}", from.name, to.name, e);
                self.estimator.straight_line_leg(from, to)
            }
            other => other,
        }
    }
}

/// `arrival[i+1] >= arrival[i] + dwell[i]` for every consecutive pair
pub fn is_monotonic(stops: &[TourStop]) -> bool {
    stops
        .windows(2)
        .all(|pair| pair[1].arrival_time >= pair[0].departure_time())
}
