//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Admitron - Client-Side Throughput Admission Control
//!
//! Caps the request-unit consumption of one client process against a
//! provisioned container, splitting the container budget across named
//! throughput groups.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use admitron::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`ThroughputContainerController`] - Per-container admission controller
//! - [`ThroughputControlConfig`] - Configuration for the control layer
//! - [`RequestContext`] - Per-request routing information
//! - [`AdmissionError`] - Error types
//!
//! ## Collaborators
//!
//! [`CapacityResolver`] and [`PartitionRangeSource`] are the seams the
//! embedding client implements against its own transport; everything else
//! stays inside the crate.
//!
//! ## Extensions (feature-gated)
//!
//! - Global (server-fed) group strategy (requires `global-control` feature)
//!
//! # Examples
//!
//! ```rust
//! use admitron::prelude::*;
//! use admitron::capacity::{MockCapacityResolver, StaticPartitionRanges};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let yaml = r#"
//! container_name: orders
//! groups:
//!   - group_name: oltp
//!     strategy:
//!       type: Local
//!     share:
//!       type: Absolute
//!       request_units: 100
//!     use_by_default: true
//! "#;
//!     let config = ThroughputControlConfig::from_yaml_str(yaml).unwrap();
//!
//!     let controller = Arc::new(
//!         ThroughputContainerController::new(
//!             config,
//!             Arc::new(MockCapacityResolver::new("rid-col", "rid-db")),
//!             Arc::new(StaticPartitionRanges::single()),
//!         )
//!         .unwrap(),
//!     );
//!     controller.init().await.unwrap();
//!
//!     let request = RequestContext::new();
//!     let response: Result<ChargedResponse<&str>, AdmissionError> = controller
//!         .process_request(&request, || async { Ok(ChargedResponse::new("ok", 2.5)) })
//!         .await;
//!     assert_eq!(response.unwrap().payload, "ok");
//!
//!     controller.close().await;
//! }
//! ```
//!
//! # Features
//!
//! - **Group budgets**: Absolute request-unit budgets or fractions of the container ceiling
//! - **Optimistic admission**: Admit while budget remains, settle with the actual charge afterwards
//! - **Capacity tracking**: Container/database scope fallback with a periodic refresh loop
//! - **Fail-open routing**: Requests outside every group pass through untouched
//! - **Global strategy**: Fair-share split from server-fed per-client load snapshots

pub mod prelude;

pub mod capacity;
pub mod config;
pub mod constants;
pub mod container_controller;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod group_controller;
pub mod registry;
pub mod request;
pub mod throttler;

// 重新导出常用类型
pub use capacity::{
    CapacityResolver, MaxContainerThroughput, MockCapacityResolver, OfferScript,
    PartitionRangeSource, ResolvedIdentity, StaticPartitionRanges, ThroughputOffer,
    ThroughputResolveLevel,
};
pub use config::{
    generate_host_id, ControlStrategy, ThroughputControlConfig, ThroughputGroupConfig,
    ThroughputShare,
};
pub use container_controller::{ControllerSnapshot, ThroughputContainerController};
pub use dispatcher::{ControllerDispatcher, GLOBAL_DISPATCHER};
pub use error::AdmissionError;
pub use factory::GroupControllerFactory;
#[cfg(feature = "global-control")]
pub use group_controller::{ClientLoadSnapshot, GlobalThroughputController};
pub use group_controller::{LocalThroughputController, ThroughputGroupController};
pub use registry::GroupControllerRegistry;
pub use request::{
    ChargedResponse, PermitGrant, RequestChargeReport, RequestContext, RequestOutcome,
};
pub use throttler::RequestThrottler;
