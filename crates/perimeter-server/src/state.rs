//! Application state shared across handlers.

use std::sync::Arc;

use perimeter_core::{Clock, Engine, EngineConfig, EngineHandle, EngineRuntime};
use tokio::task::JoinHandle;
use tracing::info;

use crate::inventory::BeaconInventory;

/// State handed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
///
/// The engine itself lives in its runtime task; handlers only hold the
/// cloneable [`EngineHandle`].
#[derive(Debug)]
pub struct AppState {
    engine: EngineHandle,
    config: EngineConfig,
}

impl AppState {
    /// Wrap an already running engine.
    #[must_use]
    pub const fn new(engine: EngineHandle, config: EngineConfig) -> Self {
        Self { engine, config }
    }

    /// Build an engine from `config`, spawn its runtime and wrap the handle.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn start(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<(SharedState, JoinHandle<Engine>)> {
        Self::start_with_inventory(config, clock, &BeaconInventory::default())
    }

    /// Like [`Self::start`], but registers every beacon in `inventory` and
    /// re-synchronizes region membership from it before the runtime starts.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn start_with_inventory(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        inventory: &BeaconInventory,
    ) -> anyhow::Result<(SharedState, JoinHandle<Engine>)> {
        let mut engine = Engine::new(config.clone(), clock)?;
        for entry in &inventory.beacons {
            engine.register_beacon(entry.beacon, entry.device.clone());
        }
        info!(beacons = inventory.len(), "Registered inventory beacons");

        let (handle, task) = EngineRuntime::spawn_with_region_source(engine, inventory);
        Ok((Arc::new(Self::new(handle, config)), task))
    }

    /// Handle to the engine runtime.
    #[must_use]
    pub const fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Configuration the engine was started with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }
}
