//! Tournée planner: visit order optimization and arrival time scheduling
//! for vehicle tours.

pub mod config;
pub mod defaults;
pub mod error;
pub mod services;
pub mod types;

pub use error::{OptimizationError, PartialFailure, RoutingError, ScheduleError, TourError};
pub use services::tour_controller::{
    MutationReport, PendingOptimization, RecalcStatus, TourMutationController,
};
