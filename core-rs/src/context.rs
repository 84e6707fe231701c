//! Explicit owner of one registry and its allocator
//!
//! Callers build a `PortContext` once and pass it around instead of
//! reaching for process-wide singletons.

use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::errors::Result;
use crate::port::{PortAllocator, PortBands, PortRegistry};

#[derive(Debug, Clone)]
pub struct PortContext {
    settings: Settings,
    registry: Arc<PortRegistry>,
    allocator: PortAllocator,
}

impl PortContext {
    /// Build registry and allocator from settings and initialize the
    /// backing file
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let bands: PortBands = settings.port_bands()?;
        let registry_path = settings.resolve_registry_path()?;

        let registry = Arc::new(PortRegistry::new(registry_path, settings.lock, bands.clone()));
        registry.initialize()?;

        tracing::debug!(path = %registry.path().display(), "port registry ready");

        let allocator = PortAllocator::new(Arc::clone(&registry), bands);
        Ok(PortContext {
            settings,
            registry,
            allocator,
        })
    }

    /// Load settings from `config_path` (defaults if absent) and build
    pub fn open<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        Self::new(Settings::load_or_default(config_path)?)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }
}
