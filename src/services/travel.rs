//! Travel time/distance between two sites.
//!
//! Single source of truth for "how long from A to B departing at T". Provider
//! failures get one simplified retry (no departure time, free-flow data) and
//! are then reported; the straight-line estimate is a separate call the
//! caller has to make on purpose.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::defaults::DEFAULT_AVERAGE_SPEED_KMH;
use crate::error::RoutingError;
use crate::services::geo;
use crate::services::routing::{LegMetrics, RouteProvider, RouteResult};
use crate::types::{Coordinates, Site};

/// Quality of a leg estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSource {
    /// Provider duration with traffic at the requested departure
    Traffic,
    /// Provider duration without traffic (simplified retry)
    FreeFlow,
    /// Haversine estimate
    StraightLine,
}

/// One estimated leg
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelLeg {
    pub duration_seconds: u64,
    pub distance_km: f64,
    pub source: LegSource,
}

impl TravelLeg {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.duration_seconds).unwrap_or(i64::MAX / 1000))
    }

    pub fn is_estimate(&self) -> bool {
        self.source == LegSource::StraightLine
    }
}

#[derive(Clone)]
pub struct TravelEstimator {
    provider: Arc<dyn RouteProvider>,
    fallback_speed_kmh: f64,
}

impl TravelEstimator {
    pub fn new(provider: Arc<dyn RouteProvider>) -> Self {
        Self {
            provider,
            fallback_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }

    /// Speed used by [`TravelEstimator::straight_line_leg`]
    pub fn with_fallback_speed(mut self, speed_kmh: f64) -> Self {
        self.fallback_speed_kmh = speed_kmh;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Traffic-aware travel time from `from` to `to` leaving at `departure`
    pub async fn travel_time(
        &self,
        from: &Site,
        to: &Site,
        departure: DateTime<Utc>,
    ) -> Result<TravelLeg, RoutingError> {
        let (origin, destination) = endpoints(from, to)?;
        let metrics = self.query(origin, destination, Some(departure)).await?;
        let leg = self.to_leg(&metrics);

        debug!(
            "Leg {} -> {} at {}: {} s ({:?})",
            from.name, to.name, departure, leg.duration_seconds, leg.source
        );
        Ok(leg)
    }

    /// Driving distance in kilometers
    pub async fn distance(&self, from: &Site, to: &Site) -> Result<f64, RoutingError> {
        let (origin, destination) = endpoints(from, to)?;
        let metrics = self.query(origin, destination, None).await?;
        Ok(metrics.distance_meters as f64 / 1000.0)
    }

    /// Route geometry and leg metrics for display
    pub async fn route(
        &self,
        from: &Site,
        to: &Site,
        departure: DateTime<Utc>,
    ) -> Result<RouteResult, RoutingError> {
        let (origin, destination) = endpoints(from, to)?;
        self.provider
            .route(origin, destination, Some(departure))
            .await
            .map_err(|e| RoutingError::provider_unavailable(self.provider.name(), e))
    }

    /// Straight-line estimate. Degraded data, only for explicit fallbacks.
    pub fn straight_line_leg(&self, from: &Site, to: &Site) -> Result<TravelLeg, RoutingError> {
        let (origin, destination) = endpoints(from, to)?;
        let road_km = geo::road_distance(&origin, &destination);
        let seconds = geo::time_from_distance(road_km, self.fallback_speed_kmh);
        Ok(TravelLeg {
            duration_seconds: seconds.round() as u64,
            distance_km: road_km,
            source: LegSource::StraightLine,
        })
    }

    /// Request with one simplified retry
    async fn query(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics, RoutingError> {
        match self.provider.distance_and_duration(origin, destination, departure).await {
            Ok(metrics) => Ok(metrics),
            Err(first) => {
                warn!(
                    "{} failed for leg ({}, {}) -> ({}, {}): {}. Retrying without departure time.",
                    self.provider.name(),
                    origin.lat,
                    origin.lng,
                    destination.lat,
                    destination.lng,
                    first
                );
                self.provider
                    .distance_and_duration(origin, destination, None)
                    .await
                    .map_err(|e| RoutingError::provider_unavailable(self.provider.name(), e))
            }
        }
    }

    fn to_leg(&self, metrics: &LegMetrics) -> TravelLeg {
        let source = if self.provider.is_estimate() {
            LegSource::StraightLine
        } else if metrics.duration_in_traffic_seconds.is_some() {
            LegSource::Traffic
        } else {
            LegSource::FreeFlow
        };
        TravelLeg {
            duration_seconds: metrics.effective_duration_seconds(),
            distance_km: metrics.distance_meters as f64 / 1000.0,
            source,
        }
    }
}

fn endpoints(from: &Site, to: &Site) -> Result<(Coordinates, Coordinates), RoutingError> {
    let origin = from
        .valid_coordinates()
        .ok_or(RoutingError::InvalidCoordinates { site_id: from.id })?;
    let destination = to
        .valid_coordinates()
        .ok_or(RoutingError::InvalidCoordinates { site_id: to.id })?;
    Ok((origin, destination))
}
