//! Sunthalpy Bridge Library
//!
//! This library mirrors a Sunthalpy solar/thermal installation into
//! home-automation entities: an authenticated polling client, a shared
//! update coordinator, a sensor registry and derived cumulative energy
//! counters for the host's energy dashboard.

pub mod derived_values;
pub mod energy_integrator;
pub mod entity;
pub mod sensor_catalog;
pub mod sensor_registry;
pub mod snapshot;
pub mod state_store;
pub mod sunthalpy_client;
pub mod update_coordinator;

// Re-export commonly used types for easier access
pub use energy_integrator::{DerivationState, EnergyIntegrator, EnergySensorSpec};
pub use entity::{DeviceClass, EntityUpdate, SensorValue, StateClass};
pub use sensor_registry::{ConfigError, SensorDescriptor, SensorRegistry, Transform};
pub use snapshot::{DeviceGroup, FieldRef, RawPayload, Snapshot};
pub use state_store::{FileStateStore, MemoryStateStore, StateStore};
pub use sunthalpy_client::{ApiError, Credentials, SunthalpyClient};
pub use update_coordinator::{
    CoordinatorHandle, Health, SnapshotConsumer, StatusSource, UpdateCoordinator,
};
