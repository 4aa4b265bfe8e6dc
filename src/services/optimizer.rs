//! Visit order optimization with fixed first and last stop.
//!
//! Nearest-neighbor over real travel times. Each row of the travel matrix is
//! requested at the tentative departure from that position, so the greedy
//! walk sees time-of-day traffic. Small tours only (tens of stops): the
//! matrix costs O(N²) provider queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{OptimizationError, RoutingError};
use crate::services::travel::{LegSource, TravelEstimator, TravelLeg};
use crate::types::Site;

/// A stop handed to the optimizer
#[derive(Debug, Clone)]
pub struct OptimizationStop {
    pub instance_id: Uuid,
    pub stop_ref: Uuid,
    pub site: Site,
    pub dwell_minutes: u32,
}

impl OptimizationStop {
    fn dwell(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.dwell_minutes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultQuality {
    /// Every leg comes from the routing provider
    Provider,
    /// Straight-line estimates, explicitly requested or from an estimating provider
    Estimated,
}

/// Result of an optimization, keyed by instance id
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedResult {
    pub order: Vec<Uuid>,
    pub arrival_times: HashMap<Uuid, DateTime<Utc>>,
    pub total_distance_km: f64,
    /// From departure at the first stop to arrival at the last one
    pub total_duration_seconds: i64,
    pub total_travel_seconds: u64,
    pub quality: ResultQuality,
    /// Legs answered by the simplified (no traffic) retry
    pub free_flow_legs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Provider,
    StraightLine,
}

/// Travel legs keyed by (from, to), remembering the departure they were
/// evaluated at
struct TravelMatrix {
    cells: Vec<Vec<Option<(DateTime<Utc>, TravelLeg)>>>,
}

impl TravelMatrix {
    fn new(size: usize) -> Self {
        Self {
            cells: vec![vec![None; size]; size],
        }
    }

    fn set(&mut self, from: usize, to: usize, departure: DateTime<Utc>, leg: TravelLeg) {
        self.cells[from][to] = Some((departure, leg));
    }

    fn leg(&self, from: usize, to: usize) -> Option<TravelLeg> {
        self.cells[from][to].map(|(_, leg)| leg)
    }

    /// Leg evaluated at exactly this departure
    fn cached(&self, from: usize, to: usize, departure: DateTime<Utc>) -> Option<TravelLeg> {
        match self.cells[from][to] {
            Some((at, leg)) if at == departure => Some(leg),
            _ => None,
        }
    }
}

pub struct TourOrderOptimizer {
    estimator: TravelEstimator,
}

impl TourOrderOptimizer {
    pub fn new(estimator: TravelEstimator) -> Self {
        Self { estimator }
    }

    /// Optimize with routing provider data. Any leg failure fails the whole
    /// optimization with `OptimizationUnavailable`.
    pub async fn optimize(
        &self,
        stops: &[OptimizationStop],
        departure: DateTime<Utc>,
    ) -> Result<OptimizedResult, OptimizationError> {
        self.run(stops, departure, Mode::Provider).await
    }

    /// Degraded optimization on straight-line distances only
    pub async fn optimize_straight_line(
        &self,
        stops: &[OptimizationStop],
        departure: DateTime<Utc>,
    ) -> Result<OptimizedResult, OptimizationError> {
        self.run(stops, departure, Mode::StraightLine).await
    }

    async fn run(
        &self,
        stops: &[OptimizationStop],
        departure: DateTime<Utc>,
        mode: Mode,
    ) -> Result<OptimizedResult, OptimizationError> {
        let n = stops.len();
        let mut matrix = TravelMatrix::new(n);

        let order = if n <= 2 {
            (0..n).collect()
        } else {
            self.nearest_neighbor(stops, departure, mode, &mut matrix).await?
        };

        verify_order(stops, &order)?;

        let result = self.walk(stops, &order, departure, mode, &matrix).await?;

        info!(
            "Optimized {} stops ({:?}): {:.1} km, {} s travel",
            n, result.quality, result.total_distance_km, result.total_travel_seconds
        );
        Ok(result)
    }

    /// Greedy interior ordering, start and end fixed. Ties go to the
    /// candidate that comes first in the input.
    async fn nearest_neighbor(
        &self,
        stops: &[OptimizationStop],
        departure: DateTime<Utc>,
        mode: Mode,
        matrix: &mut TravelMatrix,
    ) -> Result<Vec<usize>, OptimizationError> {
        let n = stops.len();
        let end = n - 1;
        let mut visited = vec![false; n];
        visited[0] = true;
        visited[end] = true;

        let mut order = Vec::with_capacity(n);
        order.push(0);
        let mut current = 0;
        let mut arrival = departure;

        while order.len() < end {
            let leave = arrival + stops[current].dwell();
            let candidates: Vec<usize> = (1..end).filter(|&i| !visited[i]).collect();

            self.fill_row(stops, current, &candidates, leave, mode, matrix).await?;

            let mut best: Option<(usize, TravelLeg)> = None;
            for &candidate in &candidates {
                let Some(leg) = matrix.leg(current, candidate) else {
                    continue;
                };
                if best.map_or(true, |(_, b)| leg.duration_seconds < b.duration_seconds) {
                    best = Some((candidate, leg));
                }
            }

            let Some((next, leg)) = best else {
                let message = format!(
                    "no reachable candidate after {} of {} stops",
                    order.len(),
                    n
                );
                error!("Optimization consistency check failed: {}", message);
                return Err(OptimizationError::ConsistencyViolation(message));
            };

            debug!(
                "Nearest from {} is {} ({} s)",
                stops[current].site.name, stops[next].site.name, leg.duration_seconds
            );
            visited[next] = true;
            order.push(next);
            arrival = leave + leg.duration();
            current = next;
        }

        order.push(end);
        Ok(order)
    }

    /// Query `from → each target` leaving at `departure`, concurrently
    async fn fill_row(
        &self,
        stops: &[OptimizationStop],
        from: usize,
        targets: &[usize],
        departure: DateTime<Utc>,
        mode: Mode,
        matrix: &mut TravelMatrix,
    ) -> Result<(), OptimizationError> {
        let legs = try_join_all(
            targets
                .iter()
                .map(|&to| self.leg(&stops[from], &stops[to], departure, mode)),
        )
        .await
        .map_err(OptimizationError::OptimizationUnavailable)?;

        for (&to, leg) in targets.iter().zip(legs) {
            matrix.set(from, to, departure, leg);
        }
        Ok(())
    }

    async fn leg(
        &self,
        from: &OptimizationStop,
        to: &OptimizationStop,
        departure: DateTime<Utc>,
        mode: Mode,
    ) -> Result<TravelLeg, RoutingError> {
        match mode {
            Mode::Provider => self.estimator.travel_time(&from.site, &to.site, departure).await,
            Mode::StraightLine => self.estimator.straight_line_leg(&from.site, &to.site),
        }
    }

    /// Forward pass over the final order computing cumulative arrivals
    async fn walk(
        &self,
        stops: &[OptimizationStop],
        order: &[usize],
        departure: DateTime<Utc>,
        mode: Mode,
        matrix: &TravelMatrix,
    ) -> Result<OptimizedResult, OptimizationError> {
        let mut arrival_times = HashMap::with_capacity(order.len());
        let mut total_distance_km = 0.0;
        let mut total_travel_seconds = 0u64;
        let mut free_flow_legs = 0;
        let mut estimated = mode == Mode::StraightLine;

        let mut arrival = departure;
        if let Some(&first) = order.first() {
            arrival_times.insert(stops[first].instance_id, departure);
        }

        for pair in order.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let leave = arrival + stops[from].dwell();
            let leg = match matrix.cached(from, to, leave) {
                Some(leg) => leg,
                None => self
                    .leg(&stops[from], &stops[to], leave, mode)
                    .await
                    .map_err(OptimizationError::OptimizationUnavailable)?,
            };

            match leg.source {
                LegSource::FreeFlow => free_flow_legs += 1,
                LegSource::StraightLine => estimated = true,
                LegSource::Traffic => {}
            }

            arrival = leave + leg.duration();
            total_distance_km += leg.distance_km;
            total_travel_seconds += leg.duration_seconds;
            arrival_times.insert(stops[to].instance_id, arrival);
        }

        Ok(OptimizedResult {
            order: order.iter().map(|&i| stops[i].instance_id).collect(),
            arrival_times,
            total_distance_km,
            total_duration_seconds: (arrival - departure).num_seconds(),
            total_travel_seconds,
            quality: if estimated { ResultQuality::Estimated } else { ResultQuality::Provider },
            free_flow_legs,
        })
    }
}

/// Every stop exactly once, endpoints unchanged, stop references preserved
fn verify_order(stops: &[OptimizationStop], order: &[usize]) -> Result<(), OptimizationError> {
    let n = stops.len();
    let violation = |message: String| {
        error!("Optimization consistency check failed: {}", message);
        Err(OptimizationError::ConsistencyViolation(message))
    };

    if order.len() != n {
        return violation(format!("expected {} stops, got {}", n, order.len()));
    }
    if n >= 2 && (order[0] != 0 || order[n - 1] != n - 1) {
        return violation("first or last stop moved".to_string());
    }

    let mut seen = vec![false; n];
    for &i in order {
        if i >= n || seen[i] {
            return violation(format!("stop index {} missing or repeated", i));
        }
        seen[i] = true;
    }

    let mut refs: HashMap<Uuid, i64> = HashMap::new();
    for stop in stops {
        *refs.entry(stop.stop_ref).or_default() += 1;
    }
    for &i in order {
        *refs.entry(stops[i].stop_ref).or_default() -= 1;
    }
    if refs.values().any(|&count| count != 0) {
        return violation("stop references changed".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::services::testing::{at, site, ScriptedProvider};

    fn stop(site: &Site) -> OptimizationStop {
        OptimizationStop {
            instance_id: Uuid::new_v4(),
            stop_ref: site.id,
            site: site.clone(),
            dwell_minutes: 5,
        }
    }

    fn optimizer(provider: Arc<ScriptedProvider>) -> TourOrderOptimizer {
        TourOrderOptimizer::new(TravelEstimator::new(provider))
    }

    #[tokio::test]
    async fn test_empty_and_single() {
        let opt = optimizer(Arc::new(ScriptedProvider::uniform(600)));

        let empty = opt.optimize(&[], at(8, 0)).await.unwrap();
        assert!(empty.order.is_empty());
        assert_eq!(empty.total_travel_seconds, 0);

        let only = stop(&site("S1", 0));
        let single = opt.optimize(std::slice::from_ref(&only), at(8, 0)).await.unwrap();
        assert_eq!(single.order, vec![only.instance_id]);
        assert_eq!(single.arrival_times[&only.instance_id], at(8, 0));
    }

    #[tokio::test]
    async fn test_two_stops_single_leg() {
        let provider = Arc::new(ScriptedProvider::uniform(600));
        let opt = optimizer(provider.clone());
        let stops = vec![stop(&site("S1", 0)), stop(&site("S2", 1))];

        let result = opt.optimize(&stops, at(8, 0)).await.unwrap();

        assert_eq!(result.order, vec![stops[0].instance_id, stops[1].instance_id]);
        assert_eq!(result.arrival_times[&stops[1].instance_id], at(8, 15));
        assert_eq!(result.total_travel_seconds, 600);
        assert_eq!(result.total_duration_seconds, 15 * 60);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_nearest_neighbor_scenario() {
        let (s1, s2, s3, s4) = (site("S1", 0), site("S2", 1), site("S3", 2), site("S4", 3));
        let provider = Arc::new(
            ScriptedProvider::uniform(600)
                .with_symmetric_leg(&s1, &s2, 300)
                .with_symmetric_leg(&s1, &s3, 900)
                .with_symmetric_leg(&s2, &s3, 300),
        );
        let opt = optimizer(provider);
        // Input deliberately lists S3 before S2
        let stops = vec![stop(&s1), stop(&s3), stop(&s2), stop(&s4)];

        let result = opt.optimize(&stops, at(8, 0)).await.unwrap();

        let expected = vec![
            stops[0].instance_id,
            stops[2].instance_id,
            stops[1].instance_id,
            stops[3].instance_id,
        ];
        assert_eq!(result.order, expected);
        assert_eq!(result.arrival_times[&stops[2].instance_id], at(8, 10));
        assert_eq!(result.arrival_times[&stops[1].instance_id], at(8, 20));
        assert_eq!(result.arrival_times[&stops[3].instance_id], at(8, 35));
        assert_eq!(result.quality, ResultQuality::Provider);
    }

    #[tokio::test]
    async fn test_ties_keep_input_order() {
        let opt = optimizer(Arc::new(ScriptedProvider::uniform(600)));
        let stops: Vec<OptimizationStop> = (0..5).map(|i| stop(&site("S", i))).collect();

        let result = opt.optimize(&stops, at(8, 0)).await.unwrap();

        let input: Vec<Uuid> = stops.iter().map(|s| s.instance_id).collect();
        assert_eq!(result.order, input);
    }

    #[tokio::test]
    async fn test_rows_use_advancing_departure_and_walk_reuses_matrix() {
        let provider = Arc::new(ScriptedProvider::uniform(600));
        let opt = optimizer(provider.clone());
        let stops: Vec<OptimizationStop> = (0..4).map(|i| stop(&site("S", i))).collect();

        opt.optimize(&stops, at(8, 0)).await.unwrap();

        let calls = provider.calls();
        // Row from start: 2 candidates, row from second stop: 1, walk: final leg only
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].departure, Some(at(8, 5)));
        assert_eq!(calls[1].departure, Some(at(8, 5)));
        // Arrive 08:15 at the second stop, leave at 08:20
        assert_eq!(calls[2].departure, Some(at(8, 20)));
        assert_eq!(calls[3].departure, Some(at(8, 35)));
    }

    #[tokio::test]
    async fn test_endpoints_and_multiset_preserved_with_duplicates() {
        let (depot, a, b) = (site("Depot", 0), site("A", 5), site("B", 1));
        let provider = Arc::new(ScriptedProvider::uniform(600).with_symmetric_leg(&depot, &b, 60));
        let opt = optimizer(provider);
        // Depot appears at both ends, A twice in the middle
        let stops = vec![stop(&depot), stop(&a), stop(&b), stop(&a), stop(&depot)];

        let result = opt.optimize(&stops, at(8, 0)).await.unwrap();

        assert_eq!(result.order.len(), 5);
        assert_eq!(result.order[0], stops[0].instance_id);
        assert_eq!(result.order[4], stops[4].instance_id);
        assert_eq!(result.order[1], stops[2].instance_id);

        let by_id: HashMap<Uuid, Uuid> =
            stops.iter().map(|s| (s.instance_id, s.stop_ref)).collect();
        let mut before: Vec<Uuid> = stops.iter().map(|s| s.stop_ref).collect();
        let mut after: Vec<Uuid> = result.order.iter().map(|id| by_id[id]).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_provider_failure_makes_optimization_unavailable() {
        let (s1, s2, s3) = (site("S1", 0), site("S2", 1), site("S3", 2));
        let provider = Arc::new(ScriptedProvider::uniform(600).failing_leg(&s1, &s2));
        let opt = optimizer(provider);
        let stops = vec![stop(&s1), stop(&s2), stop(&s3), stop(&site("S4", 3))];

        let err = opt.optimize(&stops, at(8, 0)).await.unwrap_err();

        assert!(matches!(
            err,
            OptimizationError::OptimizationUnavailable(RoutingError::ProviderUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_fail_optimization() {
        let opt = optimizer(Arc::new(ScriptedProvider::uniform(600)));
        let broken = Site::new("Broken", None);
        let stops = vec![stop(&site("S1", 0)), stop(&broken), stop(&site("S3", 2))];

        let err = opt.optimize(&stops, at(8, 0)).await.unwrap_err();

        assert_eq!(
            err,
            OptimizationError::OptimizationUnavailable(RoutingError::InvalidCoordinates {
                site_id: broken.id,
            })
        );
    }

    #[tokio::test]
    async fn test_straight_line_fallback_uses_no_provider() {
        let provider = Arc::new(ScriptedProvider::uniform(600).failing_everything());
        let opt = optimizer(provider.clone());
        // S2 is geographically closer to S1 than S3
        let stops = vec![
            stop(&site("S1", 0)),
            stop(&site("S3", 9)),
            stop(&site("S2", 2)),
            stop(&site("S4", 10)),
        ];

        let result = opt.optimize_straight_line(&stops, at(8, 0)).await.unwrap();

        assert_eq!(result.quality, ResultQuality::Estimated);
        assert_eq!(result.order[1], stops[2].instance_id);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_verify_order_rejects_bad_orders() {
        let stops: Vec<OptimizationStop> = (0..4).map(|i| stop(&site("S", i))).collect();

        assert!(verify_order(&stops, &[0, 1, 2, 3]).is_ok());
        assert!(matches!(
            verify_order(&stops, &[0, 1, 3]),
            Err(OptimizationError::ConsistencyViolation(_))
        ));
        assert!(matches!(
            verify_order(&stops, &[1, 0, 2, 3]),
            Err(OptimizationError::ConsistencyViolation(_))
        ));
        assert!(matches!(
            verify_order(&stops, &[0, 1, 1, 3]),
            Err(OptimizationError::ConsistencyViolation(_))
        ));
    }
}
