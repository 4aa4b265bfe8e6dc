//! Routing providers for leg distance/duration and geometry
//!
//! Uses Valhalla for production, straight-line estimates when no routing
//! engine is configured.

mod polyline;
mod valhalla;

pub use polyline::decode_polyline;
pub use valhalla::{ValhallaClient, ValhallaConfig};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::defaults::{DEFAULT_AVERAGE_SPEED_KMH, ROAD_COEFFICIENT};
use crate::services::geo::haversine_distance;
use crate::types::Coordinates;

/// Distance and duration of a single origin → destination leg
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegMetrics {
    pub distance_meters: u64,
    /// Free-flow duration
    pub duration_seconds: u64,
    /// Duration with traffic at the requested departure time.
    /// `None` when the request carried no departure time.
    pub duration_in_traffic_seconds: Option<u64>,
}

impl LegMetrics {
    /// Best available duration: traffic-aware when present
    pub fn effective_duration_seconds(&self) -> u64 {
        self.duration_in_traffic_seconds.unwrap_or(self.duration_seconds)
    }
}

/// Route geometry as GeoJSON coordinates
/// Coordinates are in [longitude, latitude] order (GeoJSON standard)
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteGeometry {
    /// Array of [lng, lat] coordinates forming the route polyline
    pub coordinates: Vec<[f64; 2]>,
}

impl RouteGeometry {
    /// Create geometry from a list of coordinates (straight lines)
    pub fn from_coordinates(coords: &[Coordinates]) -> Self {
        Self {
            coordinates: coords.iter().map(|c| [c.lng, c.lat]).collect(),
        }
    }
}

/// Polyline plus per-leg metrics
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub geometry: RouteGeometry,
    pub legs: Vec<LegMetrics>,
}

/// Routing provider trait for abstraction (Valhalla, straight line, test stubs)
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Driving distance and duration for one leg. With a departure time the
    /// provider evaluates traffic at that moment; without one it answers with
    /// free-flow data (the simplified request).
    async fn distance_and_duration(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics>;

    /// Route geometry and leg metrics between two points
    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<RouteResult>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// True when results are straight-line estimates rather than road data
    fn is_estimate(&self) -> bool {
        false
    }
}

/// Straight-line routing provider
/// Uses Haversine distance × coefficient for estimation
pub struct StraightLineProvider {
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 50)
    average_speed_kmh: f64,
}

impl Default for StraightLineProvider {
    fn default() -> Self {
        Self {
            road_coefficient: ROAD_COEFFICIENT,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }
}

impl StraightLineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
        }
    }

    fn leg(&self, origin: &Coordinates, destination: &Coordinates) -> LegMetrics {
        let road_km = haversine_distance(origin, destination) * self.road_coefficient;
        let seconds = crate::services::geo::time_from_distance(road_km, self.average_speed_kmh);
        LegMetrics {
            distance_meters: (road_km * 1000.0).round() as u64,
            duration_seconds: seconds.round() as u64,
            duration_in_traffic_seconds: None,
        }
    }
}

#[async_trait]
impl RouteProvider for StraightLineProvider {
    async fn distance_and_duration(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        _departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics> {
        Ok(self.leg(&origin, &destination))
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        _departure: Option<DateTime<Utc>>,
    ) -> Result<RouteResult> {
        Ok(RouteResult {
            geometry: RouteGeometry::from_coordinates(&[origin, destination]),
            legs: vec![self.leg(&origin, &destination)],
        })
    }

    fn name(&self) -> &str {
        "StraightLine"
    }

    fn is_estimate(&self) -> bool {
        true
    }
}

/// Create the route provider from configuration.
///
/// Valhalla when a URL is configured (an unhealthy server is reported but
/// still used, so its failures surface), straight-line estimates otherwise.
pub async fn create_route_provider(config: &Config) -> Box<dyn RouteProvider> {
    match &config.valhalla_url {
        Some(url) => {
            let valhalla_config = ValhallaConfig {
                base_url: url.clone(),
                timeout_seconds: config.routing_timeout_seconds,
                timezone: config.routing_timezone,
            };
            match ValhallaClient::new(valhalla_config) {
                Ok(client) => {
                    match client.check_health().await {
                        Ok(()) => info!("Valhalla routing service available at {}", url),
                        Err(e) => warn!("Valhalla at {} failed health check: {}", url, e),
                    }
                    Box::new(client)
                }
                Err(e) => {
                    warn!(
                        "Cannot build Valhalla client for {}: {}. Using straight-line estimates.",
                        url, e
                    );
                    Box::new(StraightLineProvider::with_params(
                        ROAD_COEFFICIENT,
                        config.fallback_speed_kmh,
                    ))
                }
            }
        }
        None => {
            warn!("VALHALLA_URL not configured, travel times are straight-line estimates");
            Box::new(StraightLineProvider::with_params(
                ROAD_COEFFICIENT,
                config.fallback_speed_kmh,
            ))
        }
    }
}
