//! Tour mutations: add/remove/move stops, edit dwell and arrival times,
//! optimize. Every mutation keeps `order` dense and re-propagates arrival
//! times downstream of the change.
//!
//! Identity rules: "this occurrence" operations take an `instance_id`,
//! "this site" questions go through `stop_ref`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::defaults::DEFAULT_DWELL_MINUTES;
use crate::error::{OptimizationError, RoutingError, ScheduleError, TourError};
use crate::services::in_flight::InFlightRegistry;
use crate::services::optimizer::{
    OptimizationStop, OptimizedResult, ResultQuality, TourOrderOptimizer,
};
use crate::services::schedule::{FallbackPolicy, ScheduleRecalculator, SiteMap};
use crate::services::sites::SiteDirectory;
use crate::services::travel::TravelEstimator;
use crate::types::{normalize_dwell_with, TimeStatus, Tour, TourStop};

/// Outcome of the recalculation that follows a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalcStatus {
    /// Nothing downstream of the change
    NotNeeded,
    Completed,
    /// Times from `from_index` onward are stale
    Stale { from_index: usize, reason: String },
}

/// Result of a mutation. The mutation itself is always applied.
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub instance_id: Uuid,
    pub recalculation: RecalcStatus,
}

/// Optimization computed against a specific tour revision
#[derive(Debug, Clone)]
pub struct PendingOptimization {
    pub tour_id: Uuid,
    pub revision: u64,
    pub result: OptimizedResult,
}

pub struct TourMutationController {
    sites: Arc<dyn SiteDirectory>,
    optimizer: TourOrderOptimizer,
    recalculator: ScheduleRecalculator,
    in_flight: InFlightRegistry,
    default_dwell_minutes: u32,
    fallback: FallbackPolicy,
}

impl TourMutationController {
    pub fn new(sites: Arc<dyn SiteDirectory>, estimator: TravelEstimator) -> Self {
        Self {
            sites,
            optimizer: TourOrderOptimizer::new(estimator.clone()),
            recalculator: ScheduleRecalculator::new(estimator),
            in_flight: InFlightRegistry::default(),
            default_dwell_minutes: DEFAULT_DWELL_MINUTES,
            fallback: FallbackPolicy::Fail,
        }
    }

    pub fn with_default_dwell(mut self, minutes: u32) -> Self {
        self.default_dwell_minutes = minutes;
        self
    }

    /// Policy for recalculations triggered by mutations and explicit recalculation
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = policy;
        self
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Append an occurrence of `site_id`. The first stop arrives at the
    /// tour's start time; later ones one leg after the previous departure.
    pub async fn add_stop(
        &self,
        tour: &mut Tour,
        site_id: Uuid,
        dwell_minutes: Option<i64>,
    ) -> Result<MutationReport, TourError> {
        self.sites
            .resolve_stop(site_id)
            .await
            .map_err(|e| TourError::Lookup(e.to_string()))?
            .ok_or(TourError::SiteNotFound(site_id))?;

        let dwell = normalize_dwell_with(dwell_minutes, self.default_dwell_minutes);
        let arrival = tour
            .stops
            .last()
            .map(TourStop::departure_time)
            .unwrap_or(tour.start_time);

        let stop = TourStop::new(site_id, arrival, dwell);
        let instance_id = stop.instance_id;
        tour.stops.push(stop);
        tour.touch();

        let index = tour.len() - 1;
        let recalculation = self.propagate(tour, index).await;

        info!("Added site {} as stop {} of tour {}", site_id, index + 1, tour.id);
        Ok(MutationReport { instance_id, recalculation })
    }

    /// Remove one occurrence. Successors are rescheduled from the removal point.
    pub async fn remove_stop(
        &self,
        tour: &mut Tour,
        instance_id: Uuid,
    ) -> Result<MutationReport, TourError> {
        let index = tour.position_of(instance_id).ok_or(TourError::StopNotFound(instance_id))?;
        let anchor = tour.stops[0].arrival_time;

        tour.stops.remove(index);
        restore_anchor(tour, anchor);
        tour.touch();

        let recalculation = if index < tour.len() {
            self.propagate(tour, index).await
        } else {
            RecalcStatus::NotNeeded
        };

        info!("Removed stop {} from tour {}", index + 1, tour.id);
        Ok(MutationReport { instance_id, recalculation })
    }

    /// Move one occurrence to `new_index` (0-based) and reschedule the whole tour
    pub async fn move_stop(
        &self,
        tour: &mut Tour,
        instance_id: Uuid,
        new_index: usize,
    ) -> Result<MutationReport, TourError> {
        let index = tour.position_of(instance_id).ok_or(TourError::StopNotFound(instance_id))?;
        if new_index >= tour.len() {
            return Err(TourError::InvalidPosition {
                index: new_index,
                len: tour.len(),
            });
        }
        if new_index == index {
            return Ok(MutationReport {
                instance_id,
                recalculation: RecalcStatus::NotNeeded,
            });
        }

        let anchor = tour.stops[0].arrival_time;
        let stop = tour.stops.remove(index);
        tour.stops.insert(new_index, stop);
        restore_anchor(tour, anchor);
        tour.touch();

        let recalculation = self.propagate(tour, 1).await;
        Ok(MutationReport { instance_id, recalculation })
    }

    /// Change the dwell time of one occurrence; successors are rescheduled
    pub async fn edit_dwell(
        &self,
        tour: &mut Tour,
        instance_id: Uuid,
        dwell_minutes: Option<i64>,
    ) -> Result<MutationReport, TourError> {
        let index = tour.position_of(instance_id).ok_or(TourError::StopNotFound(instance_id))?;

        tour.stops[index].dwell_minutes =
            normalize_dwell_with(dwell_minutes, self.default_dwell_minutes);
        tour.touch();

        let recalculation = self.propagate(tour, index + 1).await;
        Ok(MutationReport { instance_id, recalculation })
    }

    /// Overwrite the arrival time of one occurrence; successors are rescheduled.
    /// Editing the first stop moves the tour start.
    pub async fn edit_arrival(
        &self,
        tour: &mut Tour,
        instance_id: Uuid,
        arrival: DateTime<Utc>,
    ) -> Result<MutationReport, TourError> {
        let index = tour.position_of(instance_id).ok_or(TourError::StopNotFound(instance_id))?;

        let stop = &mut tour.stops[index];
        stop.arrival_time = arrival;
        stop.time_status = TimeStatus::Manual;
        tour.touch();

        let recalculation = self.propagate(tour, index + 1).await;
        Ok(MutationReport { instance_id, recalculation })
    }

    // ---------------------------------------------------------------------
    // Recalculation
    // ---------------------------------------------------------------------

    /// Explicit recalculation from `from_index`. On failure the tour is left
    /// untouched and the partial result is returned in the error.
    pub async fn recalculate(
        &self,
        tour: &mut Tour,
        from_index: usize,
    ) -> Result<(), ScheduleError> {
        let sites = self.site_map(tour).await?;
        let stops = self
            .recalculator
            .recalculate(&tour.stops, &sites, from_index, self.fallback)
            .await?;

        tour.stops = stops;
        tour.touch();
        Ok(())
    }

    /// Recalculate after a mutation that has already been applied.
    /// Failures only flag times, they never undo the mutation.
    async fn propagate(&self, tour: &mut Tour, from_index: usize) -> RecalcStatus {
        let from_index = from_index.max(1);
        if from_index >= tour.len() {
            return RecalcStatus::NotNeeded;
        }

        let sites = match self.site_map(tour).await {
            Ok(sites) => sites,
            Err(e) => {
                warn!("Cannot reschedule tour {}: {}", tour.id, e);
                for stop in &mut tour.stops[from_index..] {
                    stop.time_status = TimeStatus::Stale;
                }
                return RecalcStatus::Stale {
                    from_index,
                    reason: e.to_string(),
                };
            }
        };

        let status = match self
            .recalculator
            .recalculate(&tour.stops, &sites, from_index, self.fallback)
            .await
        {
            Ok(stops) => {
                tour.stops = stops;
                RecalcStatus::Completed
            }
            Err(failure) => {
                let reason = failure.error.to_string();
                let failed_index = failure.failed_index;
                tour.stops = failure.computed;
                RecalcStatus::Stale {
                    from_index: failed_index,
                    reason,
                }
            }
        };
        tour.refresh_bounds();
        status
    }

    // ---------------------------------------------------------------------
    // Optimization
    // ---------------------------------------------------------------------

    /// Optimize with provider data. The result is tied to the tour revision
    /// it was computed from; apply it with [`Self::apply_optimization`].
    pub async fn optimize(&self, tour: &Tour) -> Result<PendingOptimization, OptimizationError> {
        self.run_optimization(tour, false).await
    }

    /// Degraded optimization on straight-line estimates, only on request
    pub async fn optimize_with_fallback(
        &self,
        tour: &Tour,
    ) -> Result<PendingOptimization, OptimizationError> {
        self.run_optimization(tour, true).await
    }

    async fn run_optimization(
        &self,
        tour: &Tour,
        straight_line: bool,
    ) -> Result<PendingOptimization, OptimizationError> {
        let _guard = self
            .in_flight
            .register(tour.id)
            .ok_or(OptimizationError::AlreadyRunning(tour.id))?;

        let revision = tour.revision;
        let sites = self.site_map(tour).await?;
        let stops = optimization_stops(tour, &sites)?;
        let departure = tour.stops.first().map_or(tour.start_time, |s| s.arrival_time);

        let result = if straight_line {
            warn!("Optimizing tour {} on straight-line estimates", tour.id);
            self.optimizer.optimize_straight_line(&stops, departure).await?
        } else {
            self.optimizer.optimize(&stops, departure).await?
        };

        Ok(PendingOptimization {
            tour_id: tour.id,
            revision,
            result,
        })
    }

    /// Reorder the tour to an optimization result and take its arrival times
    /// as they are. Rejected when the tour changed since the optimization
    /// started.
    pub fn apply_optimization(
        &self,
        tour: &mut Tour,
        pending: PendingOptimization,
    ) -> Result<(), OptimizationError> {
        if pending.tour_id != tour.id || pending.revision != tour.revision {
            warn!(
                "Discarding optimization for tour {} computed at revision {} (now {})",
                tour.id, pending.revision, tour.revision
            );
            return Err(OptimizationError::Superseded {
                tour_id: tour.id,
                expected: pending.revision,
                actual: tour.revision,
            });
        }

        let result = pending.result;
        if result.order.len() != tour.len() {
            return Err(inconsistent(format!(
                "result has {} stops, tour has {}",
                result.order.len(),
                tour.len()
            )));
        }

        let mut by_id: HashMap<Uuid, TourStop> =
            tour.stops.iter().map(|s| (s.instance_id, s.clone())).collect();
        let status = match result.quality {
            ResultQuality::Provider => TimeStatus::Computed,
            ResultQuality::Estimated => TimeStatus::Estimated,
        };

        let mut reordered = Vec::with_capacity(result.order.len());
        for (position, id) in result.order.iter().enumerate() {
            let (Some(mut stop), Some(&arrival)) = (by_id.remove(id), result.arrival_times.get(id))
            else {
                return Err(inconsistent(format!("stop {} missing from tour or result", id)));
            };
            if position > 0 {
                stop.arrival_time = arrival;
                stop.time_status = status;
            }
            reordered.push(stop);
        }

        tour.stops = reordered;
        tour.touch();
        info!("Applied optimized order to tour {} ({} stops)", tour.id, tour.len());
        Ok(())
    }

    /// Optimize and apply in one go
    pub async fn optimize_tour(
        &self,
        tour: &mut Tour,
        straight_line: bool,
    ) -> Result<(), OptimizationError> {
        let pending = self.run_optimization(tour, straight_line).await?;
        self.apply_optimization(tour, pending)
    }

    pub fn is_optimizing(&self, tour_id: &Uuid) -> bool {
        self.in_flight.is_running(tour_id)
    }

    async fn site_map(&self, tour: &Tour) -> Result<SiteMap, TourError> {
        let ids: Vec<Uuid> = tour.stops.iter().map(|s| s.stop_ref).collect();
        self.sites
            .resolve_many(&ids)
            .await
            .map_err(|e| TourError::Lookup(e.to_string()))
    }
}

fn inconsistent(message: String) -> OptimizationError {
    error!("Optimization result rejected: {}", message);
    OptimizationError::ConsistencyViolation(message)
}

/// The first stop always carries the tour's start anchor
fn restore_anchor(tour: &mut Tour, anchor: DateTime<Utc>) {
    if let Some(first) = tour.stops.first_mut() {
        first.arrival_time = anchor;
    }
}

fn optimization_stops(
    tour: &Tour,
    sites: &SiteMap,
) -> Result<Vec<OptimizationStop>, OptimizationError> {
    tour.stops
        .iter()
        .map(|stop| {
            let site = sites.get(&stop.stop_ref).cloned().ok_or(
                OptimizationError::OptimizationUnavailable(RoutingError::InvalidCoordinates {
                    site_id: stop.stop_ref,
                }),
            )?;
            Ok(OptimizationStop {
                instance_id: stop.instance_id,
                stop_ref: stop.stop_ref,
                site,
                dwell_minutes: stop.dwell_minutes,
            })
        })
        .collect()
}
