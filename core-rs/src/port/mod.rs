/**
 * port module
 * Port bands, durable registry and allocation policy
 */

pub mod allocator;
pub mod band;
pub mod lock;
pub mod registry;

pub use allocator::{BandUsage, EnvironmentPorts, PortAllocator};
pub use band::{EnvironmentType, PortBand, PortBands, PortRange};
pub use lock::{LockGuard, RegistryLock};
pub use registry::{
    EnvironmentRecord, PortAllocation, PortRegistry, RegistrySnapshot, ServicePort, PORTAL_SERVICE,
};
