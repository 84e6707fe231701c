//! # envport - Environment Port Registry
//!
//! Allocates and persists TCP port assignments for a multi-environment
//! development platform. Each environment type (`release`, `test`, `theme`,
//! `demo`, `epic`) owns a fixed band of ports; every environment gets a
//! portal port from its band plus room for service ports above it.
//!
//! ## Core Principle
//!
//! **The registry file is the only source of truth**: any number of
//! processes may allocate against the same file. Every commit re-reads and
//! rewrites the file under a cross-process lock, so a port is never handed
//! out twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  PortAllocator (policy)      │  bands, scan, retry on conflict
//! └──────────────┬───────────────┘
//!                │ register / claim / remove
//! ┌──────────────▼───────────────┐
//! │  PortRegistry (storage)      │  JSON snapshot + <path>.lock
//! └──────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod errors;
pub mod port;

pub use config::{LockSettings, Settings};
pub use context::PortContext;
pub use errors::EnvPortError;
pub use port::{
    BandUsage, EnvironmentPorts, EnvironmentType, PortAllocation, PortAllocator, PortBand,
    PortBands, PortRange, PortRegistry, ServicePort, PORTAL_SERVICE,
};
