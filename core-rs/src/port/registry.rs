/**
 * registry.rs
 * Durable (environment, service) -> port store
 *
 * File format (JSON):
 * ```json
 * {
 *   "environments": {
 *     "theme-1": {
 *       "type": "theme",
 *       "basePort": 3200,
 *       "services": { "portal": 3200, "api": 3201 }
 *     }
 *   },
 *   "lastUpdated": "2025-01-25T10:00:00Z"
 * }
 * ```
 *
 * Every mutation runs under the registry lock: re-read the whole snapshot,
 * apply one change, write the whole snapshot back (temp file + rename).
 * Reads take no lock. A file that cannot be parsed is replaced by an empty
 * snapshot instead of surfacing an error.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::LockSettings;
use crate::errors::{EnvPortError, Result};
use crate::port::band::{EnvironmentType, PortBands};
use crate::port::lock::RegistryLock;

/// Conventional service name of an environment's base port
pub const PORTAL_SERVICE: &str = "portal";

/// Allocations owned by one environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub env_type: Option<EnvironmentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,
    #[serde(default)]
    pub services: BTreeMap<String, u16>,
}

/// Full durable state, the unit of read-modify-write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentRecord>,
    pub last_updated: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        RegistrySnapshot {
            environments: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Owner of `port` as (environment, service)
    pub fn owner_of(&self, port: u16) -> Option<(&str, &str)> {
        self.environments.iter().find_map(|(env, record)| {
            record
                .services
                .iter()
                .find(|(_, p)| **p == port)
                .map(|(service, _)| (env.as_str(), service.as_str()))
        })
    }

    /// Every allocation record, ordered by port
    pub fn allocations(&self) -> Vec<PortAllocation> {
        let mut allocations: Vec<PortAllocation> = self
            .environments
            .iter()
            .flat_map(|(env, record)| {
                record.services.iter().map(move |(service, &port)| PortAllocation {
                    port,
                    environment: env.clone(),
                    service: service.clone(),
                })
            })
            .collect();
        allocations.sort_by_key(|a| a.port);
        allocations
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// One allocation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub port: u16,
    pub environment: String,
    pub service: String,
}

/// Port held by a service inside one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub service: String,
}

/// Outcome of reading the backing file
enum LoadState {
    Loaded(RegistrySnapshot),
    Missing,
    Corrupt(String),
}

/// Port Registry - file-backed, lock-guarded allocation store
#[derive(Debug, Clone)]
pub struct PortRegistry {
    path: PathBuf,
    lock: RegistryLock,
    bands: PortBands,
}

impl PortRegistry {
    /// Create a registry handle for `path`
    ///
    /// Nothing touches the disk until the first operation.
    pub fn new<P: AsRef<Path>>(path: P, lock_settings: LockSettings, bands: PortBands) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock = RegistryLock::new(&path, lock_settings);
        PortRegistry { path, lock, bands }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Ensure the backing file exists
    ///
    /// Creates the parent directory and an empty snapshot if needed. Safe to
    /// call repeatedly; a corrupt file is reset here as well.
    pub fn initialize(&self) -> Result<()> {
        self.ensure_parent_dir()?;
        match self.load()? {
            LoadState::Loaded(_) => Ok(()),
            LoadState::Missing | LoadState::Corrupt(_) => self.recover().map(|_| ()),
        }
    }

    /// Current snapshot, read without locking
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        match self.load()? {
            LoadState::Loaded(snapshot) => Ok(snapshot),
            LoadState::Missing | LoadState::Corrupt(_) => self.recover(),
        }
    }

    /// All allocation records, ordered by port
    pub fn get_used_ports(&self) -> Result<Vec<PortAllocation>> {
        Ok(self.snapshot()?.allocations())
    }

    /// Ports of one environment, ordered by port. Unknown environment gives
    /// an empty list.
    pub fn get_environment_ports(&self, environment: &str) -> Result<Vec<ServicePort>> {
        let snapshot = self.snapshot()?;
        let mut ports: Vec<ServicePort> = snapshot
            .environments
            .get(environment)
            .map(|record| {
                record
                    .services
                    .iter()
                    .map(|(service, &port)| ServicePort {
                        port,
                        service: service.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        ports.sort_by_key(|p| p.port);
        Ok(ports)
    }

    pub fn get_service_port(&self, environment: &str, service: &str) -> Result<Option<u16>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .environments
            .get(environment)
            .and_then(|record| record.services.get(service).copied()))
    }

    pub fn list_environments(&self) -> Result<BTreeMap<String, EnvironmentRecord>> {
        Ok(self.snapshot()?.environments)
    }

    /// Record `port` for (environment, service), replacing that pair's
    /// previous port
    ///
    /// # Errors
    /// `PortConflict` if a different (environment, service) already holds
    /// the port; nothing is written in that case.
    pub fn register_allocation(&self, environment: &str, service: &str, port: u16) -> Result<()> {
        self.commit(environment, service, port, true)
    }

    /// Record `port` only if no record holds it at all
    ///
    /// Same as `register_allocation` except that the pair already owning
    /// `port` is also rejected.
    pub fn claim_allocation(&self, environment: &str, service: &str, port: u16) -> Result<()> {
        self.commit(environment, service, port, false)
    }

    /// Remove an environment and every port it holds
    ///
    /// # Returns
    /// true if the environment existed
    pub fn remove_environment_allocations(&self, environment: &str) -> Result<bool> {
        let removed = self.transact(|snapshot| {
            let removed = snapshot.environments.remove(environment).is_some();
            if removed {
                snapshot.touch();
            }
            Ok((removed, removed))
        })?;

        if removed {
            tracing::debug!(environment, "removed environment allocations");
        }
        Ok(removed)
    }

    /// Remove a single (environment, service) record
    ///
    /// The environment entry is dropped once its last service is gone.
    ///
    /// # Returns
    /// The port that was released, if any
    pub fn remove_allocation(&self, environment: &str, service: &str) -> Result<Option<u16>> {
        self.remove_matching(environment, service, None)
    }

    /// Remove (environment, service) only while it still holds `port`
    ///
    /// # Returns
    /// false if the pair is gone or now holds a different port; nothing is
    /// written in that case.
    pub fn remove_allocation_if(&self, environment: &str, service: &str, port: u16) -> Result<bool> {
        Ok(self.remove_matching(environment, service, Some(port))?.is_some())
    }

    /// Record `port` for (environment, service) unless the pair already
    /// holds a port
    ///
    /// # Returns
    /// The port the pair holds after the call: the existing one if present,
    /// otherwise `port`.
    ///
    /// # Errors
    /// `PortConflict` if the pair has no port yet and another pair holds
    /// `port`.
    pub fn register_if_absent(&self, environment: &str, service: &str, port: u16) -> Result<u16> {
        let bands = &self.bands;
        let held = self.transact(|snapshot| {
            let existing = snapshot
                .environments
                .get(environment)
                .and_then(|record| record.services.get(service).copied());
            if let Some(existing) = existing {
                return Ok((existing, false));
            }

            Self::insert(snapshot, bands, environment, service, port, true)?;
            Ok((port, true))
        })?;

        if held == port {
            tracing::debug!(environment, service, port, "committed allocation");
        }
        Ok(held)
    }

    fn remove_matching(
        &self,
        environment: &str,
        service: &str,
        expected: Option<u16>,
    ) -> Result<Option<u16>> {
        let released = self.transact(|snapshot| {
            let Some(record) = snapshot.environments.get_mut(environment) else {
                return Ok((None, false));
            };
            match record.services.get(service) {
                None => return Ok((None, false)),
                Some(&held) if expected.is_some_and(|p| p != held) => return Ok((None, false)),
                Some(_) => {}
            }
            let Some(port) = record.services.remove(service) else {
                return Ok((None, false));
            };

            if service == PORTAL_SERVICE {
                record.base_port = None;
            }
            if record.services.is_empty() {
                snapshot.environments.remove(environment);
            }
            snapshot.touch();
            Ok((Some(port), true))
        })?;

        if let Some(port) = released {
            tracing::debug!(environment, service, port, "removed allocation");
        }
        Ok(released)
    }

    fn commit(&self, environment: &str, service: &str, port: u16, allow_same_owner: bool) -> Result<()> {
        let bands = &self.bands;
        self.transact(|snapshot| {
            Self::insert(snapshot, bands, environment, service, port, allow_same_owner)?;
            Ok(((), true))
        })?;

        tracing::debug!(environment, service, port, "committed allocation");
        Ok(())
    }

    fn insert(
        snapshot: &mut RegistrySnapshot,
        bands: &PortBands,
        environment: &str,
        service: &str,
        port: u16,
        allow_same_owner: bool,
    ) -> Result<()> {
        if let Some((owner_env, owner_service)) = snapshot.owner_of(port) {
            let same_owner = owner_env == environment && owner_service == service;
            if !same_owner || !allow_same_owner {
                return Err(EnvPortError::PortConflict {
                    port,
                    environment: owner_env.to_string(),
                    service: owner_service.to_string(),
                });
            }
        }

        let record = snapshot
            .environments
            .entry(environment.to_string())
            .or_default();
        record.services.insert(service.to_string(), port);
        if service == PORTAL_SERVICE {
            record.base_port = Some(port);
            record.env_type = bands.type_for_port(port);
        }
        snapshot.touch();
        Ok(())
    }

    /// Locked read-modify-write cycle
    ///
    /// `mutate` returns its value and whether the snapshot changed. The
    /// snapshot is written when it changed or was recovered from a missing
    /// or corrupt file. An error from `mutate` aborts without writing.
    fn transact<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut RegistrySnapshot) -> Result<(T, bool)>,
    {
        self.ensure_parent_dir()?;
        let _guard = self.lock.acquire()?;

        let (mut snapshot, recovered) = match self.load()? {
            LoadState::Loaded(snapshot) => (snapshot, false),
            LoadState::Missing => (RegistrySnapshot::empty(), true),
            LoadState::Corrupt(reason) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %reason,
                    "port registry is corrupt, resetting to an empty snapshot"
                );
                (RegistrySnapshot::empty(), true)
            }
        };

        let (value, changed) = mutate(&mut snapshot)?;
        if changed || recovered {
            self.write(&snapshot)?;
        }

        Ok(value)
    }

    /// Replace a missing or corrupt file with an empty snapshot
    fn recover(&self) -> Result<RegistrySnapshot> {
        self.transact(|snapshot| Ok((snapshot.clone(), false)))
    }

    fn load(&self) -> Result<LoadState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadState::Missing),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Ok(LoadState::Corrupt(e.to_string()))
            }
            Err(e) => {
                return Err(EnvPortError::IoError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_str::<RegistrySnapshot>(&content) {
            Ok(snapshot) => Ok(LoadState::Loaded(snapshot)),
            Err(e) => Ok(LoadState::Corrupt(e.to_string())),
        }
    }

    /// Atomic write: temp file, fsync, rename
    fn write(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;

        let mut temp_name = self.path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(|e| {
            EnvPortError::IoError(format!("Failed to create {}: {}", temp_path.display(), e))
        })?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| {
            EnvPortError::IoError(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    EnvPortError::IoError(format!("Failed to create registry directory: {}", e))
                })?;
            }
        }
        Ok(())
    }
}
