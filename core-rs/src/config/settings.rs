/**
 * settings.rs
 * Parser for .envport.yaml settings files
 *
 * Format:
 * ```yaml
 * registryPath: /var/lib/envport/port-registry.json
 * lock:
 *   maxAttempts: 50
 *   baseDelayMs: 10
 *   maxJitterMs: 40
 * bands:
 *   epic:
 *     basePort: 3500
 *     rangeStart: 3500
 *     rangeEnd: 3599
 * ```
 *
 * Every field is optional. Missing bands fall back to the built-in table.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{EnvPortError, Result};
use crate::port::band::{EnvironmentType, PortBand, PortBands};

/// Environment variable that overrides the registry location
pub const REGISTRY_PATH_ENV: &str = "ENVPORT_REGISTRY";

/// Default settings file name
pub const SETTINGS_FILE_NAME: &str = ".envport.yaml";

/// Lock acquisition policy for the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockSettings {
    /// Attempts before giving up with a lock timeout
    pub max_attempts: u32,
    /// Fixed part of the delay between attempts
    pub base_delay_ms: u64,
    /// Upper bound of the random part of the delay
    pub max_jitter_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            max_attempts: 50,
            base_delay_ms: 10,
            max_jitter_ms: 40,
        }
    }
}

/// .envport.yaml file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
    pub lock: LockSettings,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bands: BTreeMap<EnvironmentType, PortBand>,
}

impl Settings {
    /// Load settings from the specified path
    ///
    /// # Errors
    /// `FileNotFound` if the file is missing, `ValidationError` if its
    /// content is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(EnvPortError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            EnvPortError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let settings: Settings = serde_yaml::from_str(&content).map_err(|e| {
            EnvPortError::ValidationError(format!("Invalid settings YAML: {}", e))
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(path) {
            Err(EnvPortError::FileNotFound(_)) => Ok(Settings::default()),
            other => other,
        }
    }

    /// Save settings to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;

        fs::write(path.as_ref(), yaml).map_err(|e| {
            EnvPortError::IoError(format!("Failed to write settings: {}", e))
        })?;

        Ok(())
    }

    /// Ensures the lock policy is usable and the band table is consistent
    pub fn validate(&self) -> Result<()> {
        if self.lock.max_attempts == 0 {
            return Err(EnvPortError::ValidationError(
                "lock.maxAttempts must be at least 1".to_string(),
            ));
        }

        self.port_bands()?;

        Ok(())
    }

    /// Band table with this file's overrides applied
    pub fn port_bands(&self) -> Result<PortBands> {
        PortBands::with_overrides(&self.bands)
    }

    /// Resolve where the registry file lives
    ///
    /// Order: `registryPath`, then `$ENVPORT_REGISTRY`, then
    /// `$HOME/.config/envport/port-registry.json`.
    pub fn resolve_registry_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.registry_path {
            return Ok(path.clone());
        }

        if let Ok(path) = env::var(REGISTRY_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        Self::default_registry_path()
    }

    pub fn default_registry_path() -> Result<PathBuf> {
        let home_dir = env::var("HOME").map_err(|_| {
            EnvPortError::ValidationError("HOME environment variable not set".to_string())
        })?;

        Ok(PathBuf::from(home_dir)
            .join(".config")
            .join("envport")
            .join("port-registry.json"))
    }
}
