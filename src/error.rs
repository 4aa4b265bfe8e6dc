//! Error types shared by the routing, optimization and scheduling services

use thiserror::Error;
use uuid::Uuid;

use crate::types::TourStop;

/// Failure to estimate a single leg
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The site has no usable lat/lng. Not retried.
    #[error("site {site_id} has no valid coordinates")]
    InvalidCoordinates { site_id: Uuid },

    /// Transient provider failure, after the simplified retry
    #[error("routing provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },
}

impl RoutingError {
    pub fn provider_unavailable(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RoutingError::ProviderUnavailable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizationError {
    /// No complete, consistent result could be built from provider data
    #[error("optimization unavailable: {0}")]
    OptimizationUnavailable(#[source] RoutingError),

    /// Post-optimization invariant check failed
    #[error("optimization produced an inconsistent result: {0}")]
    ConsistencyViolation(String),

    #[error("an optimization is already running for tour {0}")]
    AlreadyRunning(Uuid),

    /// The tour changed while the optimization was running
    #[error("tour {tour_id} changed since optimization started (revision {expected} -> {actual})")]
    Superseded {
        tour_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Tour(#[from] TourError),
}

/// Recalculation stopped at a failing leg.
///
/// `computed` holds the full stop list: stops before `failed_index` carry
/// fresh times, stops from `failed_index` onward keep their previous times and
/// are marked stale.
#[derive(Debug, Clone, Error)]
#[error("schedule recalculation stopped at stop {failed_index}: {error}")]
pub struct PartialFailure {
    pub failed_index: usize,
    #[source]
    pub error: RoutingError,
    pub computed: Vec<TourStop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TourError {
    #[error("site {0} not found")]
    SiteNotFound(Uuid),

    #[error("stop {0} is not part of this tour")]
    StopNotFound(Uuid),

    #[error("position {index} is out of range for a tour of {len} stops")]
    InvalidPosition { index: usize, len: usize },

    #[error("site lookup failed: {0}")]
    Lookup(String),
}

/// Failure of an explicitly requested recalculation
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Partial(#[from] PartialFailure),

    #[error(transparent)]
    Tour(#[from] TourError),
}
