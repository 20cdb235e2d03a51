//! Metrics export.
//!
//! Verdicts can be pushed to a Prometheus Push Gateway so that an external
//! system handles alerting and history.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
