/**
 * allocator.rs
 * Port allocation policy on top of the registry
 *
 * Allocation strategy:
 * - Portal port: first free port of the type's band, scanning upwards
 * - Service range: every port above the portal up to the band's end
 * - Service ports: first free port above the portal
 * - Release: the single base port, or an error if it is taken
 *
 * Candidates are checked against the registry without the lock and then
 * committed through it. A conflict at commit time means another allocator
 * got there first; the scan simply moves on to the next candidate.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{EnvPortError, Result};
use crate::port::band::{EnvironmentType, PortBand, PortBands, PortRange};
use crate::port::registry::{PortRegistry, ServicePort, PORTAL_SERVICE};

/// Ports handed to a newly created environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentPorts {
    pub portal: u16,
    pub services: PortRange,
}

/// Usage of one band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandUsage {
    pub total: u32,
    pub used: u32,
    pub available: u32,
}

/// Port Allocator - turns environment-type policy into committed ports
#[derive(Debug, Clone)]
pub struct PortAllocator {
    registry: Arc<PortRegistry>,
    bands: PortBands,
}

impl PortAllocator {
    pub fn new(registry: Arc<PortRegistry>, bands: PortBands) -> Self {
        PortAllocator { registry, bands }
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn bands(&self) -> &PortBands {
        &self.bands
    }

    /// Band configured for an environment type
    pub fn get_port_config_for_type(&self, env_type: EnvironmentType) -> PortBand {
        self.bands.get(env_type)
    }

    /// Whether `port` lies inside the band of `env_type`
    pub fn validate_port_for_environment(&self, port: u16, env_type: EnvironmentType) -> bool {
        self.bands.get(env_type).contains(port)
    }

    /// Allocate the portal port and service range for a new environment
    ///
    /// # Errors
    /// - `PortAlreadyAllocated` if the release port is taken
    /// - `NoAvailablePorts` if every port of the band is taken
    /// - `LockTimeout` / I/O errors from the registry
    pub fn allocate_ports_for_environment(
        &self,
        environment: &str,
        env_type: EnvironmentType,
    ) -> Result<EnvironmentPorts> {
        let band = self.get_port_config_for_type(env_type);

        if env_type == EnvironmentType::Release {
            return self.allocate_release(environment, band);
        }

        for candidate in band.range().ports() {
            if !self.is_port_available(candidate)? {
                continue;
            }

            match self
                .registry
                .register_allocation(environment, PORTAL_SERVICE, candidate)
            {
                Ok(()) => {
                    let services = PortRange {
                        start: candidate.saturating_add(1),
                        end: band.range_end,
                    };
                    tracing::info!(environment, %env_type, portal = candidate, %services, "allocated environment ports");
                    return Ok(EnvironmentPorts {
                        portal: candidate,
                        services,
                    });
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(environment, candidate, error = %e, "lost race for portal port, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(EnvPortError::NoAvailablePorts {
            start: band.range_start,
            end: band.range_end,
            environment: environment.to_string(),
        })
    }

    fn allocate_release(&self, environment: &str, band: PortBand) -> Result<EnvironmentPorts> {
        let port = band.base_port;

        if !self.is_port_available(port)? {
            return Err(EnvPortError::PortAlreadyAllocated(port));
        }

        self.registry
            .claim_allocation(environment, PORTAL_SERVICE, port)
            .map_err(|e| {
                if e.is_conflict() {
                    EnvPortError::PortAlreadyAllocated(port)
                } else {
                    e
                }
            })?;

        tracing::info!(environment, portal = port, "allocated release port");
        Ok(EnvironmentPorts {
            portal: port,
            services: PortRange {
                start: port.saturating_add(1),
                end: band.range_end,
            },
        })
    }

    /// Allocate a port for a named service inside an existing environment
    ///
    /// Returns the existing port if the service already has one. That check
    /// is repeated at commit time, so concurrent callers for the same
    /// service all get the same port.
    ///
    /// # Errors
    /// - `EnvironmentNotFound` if the environment has no portal record
    /// - `PortOutOfRange` if the portal lies outside every band
    /// - `NoAvailablePorts` if nothing is free above the portal
    pub fn allocate_service_port(&self, environment: &str, service: &str) -> Result<u16> {
        let portal = self
            .registry
            .get_service_port(environment, PORTAL_SERVICE)?
            .ok_or_else(|| EnvPortError::EnvironmentNotFound(environment.to_string()))?;

        if let Some(existing) = self.registry.get_service_port(environment, service)? {
            return Ok(existing);
        }

        let env_type = self
            .bands
            .type_for_port(portal)
            .ok_or(EnvPortError::PortOutOfRange(portal))?;
        let band = self.bands.get(env_type);

        let search = PortRange {
            start: portal.saturating_add(1),
            end: band.range_end,
        };
        // Portal at u16::MAX leaves nothing above it
        if portal < u16::MAX {
            for candidate in search.ports() {
                if !self.is_port_available(candidate)? {
                    continue;
                }

                match self.registry.register_if_absent(environment, service, candidate) {
                    Ok(port) => {
                        if port == candidate {
                            tracing::info!(environment, service, port, "allocated service port");
                        }
                        return Ok(port);
                    }
                    Err(e) if e.is_conflict() => {
                        tracing::debug!(environment, service, candidate, "lost race for service port, trying next");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(EnvPortError::NoAvailablePorts {
            start: search.start,
            end: search.end,
            environment: environment.to_string(),
        })
    }

    /// Release every port of an environment. Always true, even if the
    /// environment held nothing.
    pub fn release_environment_ports(&self, environment: &str) -> Result<bool> {
        if self.registry.remove_environment_allocations(environment)? {
            tracing::info!(environment, "released environment ports");
        }
        Ok(true)
    }

    /// Release one port, keeping the rest of its environment intact
    ///
    /// # Returns
    /// true if released, false if the port was not allocated
    pub fn release_port(&self, port: u16) -> Result<bool> {
        let owner = self
            .registry
            .get_used_ports()?
            .into_iter()
            .find(|a| a.port == port);

        let Some(owner) = owner else {
            return Ok(false);
        };

        // Only delete while the pair still holds this port
        let released = self
            .registry
            .remove_allocation_if(&owner.environment, &owner.service, port)?;
        if released {
            tracing::info!(port, environment = %owner.environment, service = %owner.service, "released port");
        }
        Ok(released)
    }

    pub fn is_port_available(&self, port: u16) -> Result<bool> {
        Ok(!self
            .registry
            .get_used_ports()?
            .iter()
            .any(|a| a.port == port))
    }

    /// Lowest unallocated port in `range`
    pub fn get_next_available_port(&self, range: PortRange) -> Result<Option<u16>> {
        let used: std::collections::HashSet<u16> = self
            .registry
            .get_used_ports()?
            .into_iter()
            .map(|a| a.port)
            .collect();

        Ok(range.ports().find(|p| !used.contains(p)))
    }

    /// Manually allocate a specific port
    ///
    /// # Returns
    /// true if reserved, false if the port is already in use
    ///
    /// # Errors
    /// `PortOutOfRange` if the port lies outside every band
    pub fn reserve_port(&self, port: u16, environment: &str, service: &str) -> Result<bool> {
        if self.bands.type_for_port(port).is_none() {
            return Err(EnvPortError::PortOutOfRange(port));
        }

        if !self.is_port_available(port)? {
            return Ok(false);
        }

        match self.registry.claim_allocation(environment, service, port) {
            Ok(()) => {
                tracing::info!(port, environment, service, "reserved port");
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_environment_ports(&self, environment: &str) -> Result<Vec<ServicePort>> {
        self.registry.get_environment_ports(environment)
    }

    pub fn get_service_port(&self, environment: &str, service: &str) -> Result<Option<u16>> {
        self.registry.get_service_port(environment, service)
    }

    /// Total/used/available per environment type
    pub fn get_port_usage_summary(&self) -> Result<BTreeMap<EnvironmentType, BandUsage>> {
        let used_ports = self.registry.get_used_ports()?;

        Ok(self
            .bands
            .iter()
            .map(|(env_type, band)| {
                let total = band.total();
                let used = used_ports.iter().filter(|a| band.contains(a.port)).count() as u32;
                (
                    env_type,
                    BandUsage {
                        total,
                        used,
                        available: total.saturating_sub(used),
                    },
                )
            })
            .collect())
    }
}
