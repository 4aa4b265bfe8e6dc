//! Plan files consumed by the CLI

use serde::{Deserialize, Serialize};

use super::{Site, Tour};

/// A tour together with the sites it references
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourPlan {
    pub sites: Vec<Site>,
    pub tour: Tour,
}
