//! In-flight registry for tour optimizations
//!
//! At most one optimization per tour runs at a time. `register` hands out an
//! RAII `OptimizationGuard` that frees the slot when dropped.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// RAII guard that removes the tour from the registry when dropped.
/// Must be kept alive for the duration of the optimization.
pub struct OptimizationGuard {
    tour_id: Uuid,
    registry: InFlightRegistry,
}

impl OptimizationGuard {
    pub fn tour_id(&self) -> Uuid {
        self.tour_id
    }
}

impl Drop for OptimizationGuard {
    fn drop(&mut self) {
        self.registry.tours.lock().remove(&self.tour_id);
    }
}

/// Registry of tours with an optimization outstanding
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    tours: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightRegistry {
    /// `None` when an optimization for this tour is already running
    pub fn register(&self, tour_id: Uuid) -> Option<OptimizationGuard> {
        if !self.tours.lock().insert(tour_id) {
            return None;
        }
        Some(OptimizationGuard {
            tour_id,
            registry: self.clone(),
        })
    }

    pub fn is_running(&self, tour_id: &Uuid) -> bool {
        self.tours.lock().contains(tour_id)
    }
}
