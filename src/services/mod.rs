//! Business logic services

pub mod geo;
pub mod in_flight;
pub mod optimizer;
pub mod routing;
pub mod schedule;
pub mod sites;
#[cfg(test)]
pub mod testing;
pub mod tour_controller;
pub mod travel;
