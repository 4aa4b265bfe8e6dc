//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{decode_polyline, LegMetrics, RouteGeometry, RouteProvider, RouteResult};
use crate::defaults::DEFAULT_ROUTING_TIMEOUT_SECONDS;
use crate::types::Coordinates;

/// Polyline precision used by Valhalla
const SHAPE_PRECISION: u32 = 6;

/// Valhalla `date_time.type` for "depart at"
const DEPART_AT: u8 = 1;

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Zone of the routed region, for `date_time` values
    pub timezone: Tz,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: DEFAULT_ROUTING_TIMEOUT_SECONDS,
            timezone: Tz::UTC,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}

/// Valhalla routing client
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Build the route request. A departure time turns on Valhalla's
    /// time-dependent (traffic) costing.
    fn build_route_request(
        &self,
        origin: &Coordinates,
        destination: &Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> RouteRequest {
        let locations = [origin, destination]
            .iter()
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // 500 m radius for geocoded coordinates
                // slightly off-road (building centroid vs road edge)
                radius: Some(500),
            })
            .collect();

        RouteRequest {
            locations,
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            directions_type: "none".to_string(),
            date_time: departure.map(|t| ValhallaDateTime {
                kind: DEPART_AT,
                value: t
                    .with_timezone(&self.config.timezone)
                    .format("%Y-%m-%dT%H:%M")
                    .to_string(),
            }),
        }
    }

    async fn request_route(&self, request: &RouteRequest) -> Result<RouteResponse> {
        let url = format!("{}/route", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send route request to Valhalla")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla route returned error {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse Valhalla route response")
    }

    /// Check if Valhalla is healthy by making a simple status request
    pub async fn check_health(&self) -> Result<()> {
        let url = format!("{}/status", self.config.base_url);
        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("Valhalla returned status {}", response.status())
        }
    }
}

fn leg_metrics(summary: &Summary, with_traffic: bool) -> LegMetrics {
    let seconds = summary.time.max(0.0).round() as u64;
    LegMetrics {
        distance_meters: (summary.length.max(0.0) * 1000.0).round() as u64,
        duration_seconds: seconds,
        duration_in_traffic_seconds: with_traffic.then_some(seconds),
    }
}

#[async_trait]
impl RouteProvider for ValhallaClient {
    async fn distance_and_duration(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<LegMetrics> {
        let request = self.build_route_request(&origin, &destination, departure);
        let response = self.request_route(&request).await?;
        let metrics = leg_metrics(&response.trip.summary, departure.is_some());

        debug!(
            "Valhalla leg: {} m, {} s (traffic: {})",
            metrics.distance_meters,
            metrics.duration_seconds,
            departure.is_some()
        );

        Ok(metrics)
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        departure: Option<DateTime<Utc>>,
    ) -> Result<RouteResult> {
        let request = self.build_route_request(&origin, &destination, departure);
        let response = self.request_route(&request).await?;

        // Concatenate geometry from all legs
        let mut coordinates: Vec<[f64; 2]> = Vec::new();
        let mut legs = Vec::with_capacity(response.trip.legs.len());
        for (i, leg) in response.trip.legs.iter().enumerate() {
            let leg_coords = decode_polyline(&leg.shape, SHAPE_PRECISION)?;

            // Skip the first point of subsequent legs (it's the same as last point of previous leg)
            if i == 0 {
                coordinates.extend(leg_coords);
            } else {
                coordinates.extend(leg_coords.into_iter().skip(1));
            }
            legs.push(leg_metrics(&leg.summary, departure.is_some()));
        }

        debug!(
            "Received route geometry with {} points from {} legs",
            coordinates.len(),
            legs.len()
        );

        Ok(RouteResult {
            geometry: RouteGeometry { coordinates },
            legs,
        })
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct RouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    directions_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<ValhallaDateTime>,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ValhallaDateTime {
    #[serde(rename = "type")]
    kind: u8,
    /// Local time at the origin, "YYYY-MM-DDTHH:MM"
    value: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    summary: Summary,
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    /// Encoded polyline shape
    shape: String,
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Summary {
    /// Kilometers (units = "kilometers")
    length: f64,
    /// Seconds
    time: f64,
}
