//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Admitron,
//! allowing users to import them with a single `use admitron::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{ThroughputControlConfig, ThroughputGroupConfig};
pub use crate::container_controller::ThroughputContainerController;
pub use crate::dispatcher::{ControllerDispatcher, GLOBAL_DISPATCHER};
pub use crate::error::AdmissionError;
pub use crate::request::{ChargedResponse, RequestChargeReport, RequestContext};

// Collaborator traits implemented by the embedding client
pub use crate::capacity::{CapacityResolver, PartitionRangeSource};

// Feature-gated exports
#[cfg(feature = "global-control")]
pub use crate::group_controller::{ClientLoadSnapshot, GlobalThroughputController};
