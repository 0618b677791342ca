//! # Hypervisor Configuration
//!
//! Centralized configuration management for the hypervisor runtime.
//!
//! ## Features
//!
//! - **Scheduler Settings**: worker budget for concurrently executing messages
//! - **Actor Settings**: hop limit, per-message tick budget, inline code size
//! - **Logging Settings**: level and output format for the tracing subscriber
//!
//! ## Usage
//!
//! ```rust
//! use hypervisor_config::HypervisorConfig;
//!
//! let config = HypervisorConfig::from_toml_str(r#"
//! [scheduler]
//! workers = 8
//! "#).unwrap();
//!
//! assert_eq!(config.scheduler.workers, 8);
//! assert_eq!(config.actors.max_hops, 64);
//! ```

pub mod hypervisor_config;
pub mod logging;

pub use hypervisor_config::{ActorSettings, HypervisorConfig, LoggingSettings, SchedulerSettings};
pub use logging::init_tracing;
