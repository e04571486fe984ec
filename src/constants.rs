//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for Admitron.
//!
//! This module provides well-documented constants used throughout the library.
//! All magic numbers are defined here with their purpose and usage context.

// ============================================================================
// Capacity Refresh Constants
// ============================================================================

/// Default interval between provisioned-capacity refresh cycles (60 seconds).
///
/// The container controller re-reads the remote offer on this cadence and
/// broadcasts the new ceiling to every group controller. Tunable through
/// [`ThroughputControlConfig`](crate::config::ThroughputControlConfig).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Minimum accepted refresh interval (1 second).
///
/// Shorter intervals would hammer the offer endpoint without improving
/// admission accuracy.
pub const MIN_REFRESH_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Usage Cycle Constants
// ============================================================================

/// Length of one throughput usage cycle (1 second).
///
/// A group's scheduled throughput is spent inside one cycle; overdraft from
/// optimistic admission carries into the next cycle as debt.
pub const THROUGHPUT_USAGE_CYCLE_MS: u64 = 1_000;

/// Largest request-unit charge a single response may report.
///
/// Charges above this bound indicate a corrupted response and are clamped
/// before accounting.
pub const MAX_REQUEST_CHARGE: f64 = 1_000_000.0;

// ============================================================================
// Share Validation Constants
// ============================================================================

/// Smallest accepted fractional share of the container ceiling.
///
/// Fractions below this leave a group with less than one request unit per
/// cycle for any realistic container and are treated as configuration errors.
pub const MIN_THROUGHPUT_FRACTION: f64 = 0.001;

/// Largest accepted fractional share of the container ceiling (100%).
pub const MAX_THROUGHPUT_FRACTION: f64 = 1.0;

/// Smallest accepted absolute request-unit ceiling for a group.
pub const MIN_ABSOLUTE_THROUGHPUT: u64 = 1;

/// Maximum length of a throughput group name (256 characters).
pub const MAX_GROUP_NAME_LENGTH: usize = 256;

// ============================================================================
// Global Strategy Constants
// ============================================================================

/// Default time-to-live for a client load snapshot (11 seconds).
///
/// Snapshots older than this are excluded from the fair-share computation and
/// pruned on the next ceiling refresh.
pub const DEFAULT_LOAD_SNAPSHOT_TTL_SECS: u64 = 11;

/// Load factor assumed for this process before any snapshot has been
/// ingested.
pub const DEFAULT_INITIAL_LOAD_FACTOR: f64 = 1.0;

// ============================================================================
// Admission Delay Constants
// ============================================================================

/// Suggested value for a group's admission-delay bound (5 seconds).
///
/// A group whose config carries `max_admission_delay_ms` rejects a request
/// once the computed wait exceeds the bound; a group without one always
/// waits for the next usage cycle.
pub const MAX_ADMISSION_DELAY_MS: u64 = 5_000;
