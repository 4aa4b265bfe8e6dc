/// Minutes spent at a stop when nothing else is configured
pub const DEFAULT_DWELL_MINUTES: u32 = 5;

/// Speed used by the straight-line travel time estimate
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 50.0;

/// Straight line to road distance
pub const ROAD_COEFFICIENT: f64 = 1.3;

pub const DEFAULT_SITE_CACHE_TTL_SECONDS: u64 = 300;

pub const DEFAULT_ROUTING_TIMEOUT_SECONDS: u64 = 30;
