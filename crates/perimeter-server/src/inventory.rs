//! Beacons known to the host before the first request arrives.
//!
//! The sensor bridge writes its device list, together with the region
//! membership it last observed, to a JSON file. On startup every listed
//! beacon is registered and the recorded membership is replayed through the
//! engine's region re-synchronization.

use std::path::Path;

use anyhow::Context;
use perimeter_core::{BeaconDevice, BeaconIdentity, RegionState, RegionStateSource};
use serde::{Deserialize, Serialize};

/// Environment variable pointing at the inventory file.
pub const INVENTORY_PATH_ENV: &str = "PERIMETER_BEACONS";

/// One beacon in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub beacon: BeaconIdentity,
    pub device: BeaconDevice,
    /// Region membership as last reported by the sensor bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionState>,
}

/// Startup beacon list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconInventory {
    #[serde(default)]
    pub beacons: Vec<InventoryEntry>,
}

impl BeaconInventory {
    /// Parse an inventory document.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` is not a valid inventory.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("invalid beacon inventory")
    }

    /// Read the inventory at `path`; a missing file is an empty inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_empty(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Number of listed beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Whether no beacons are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }
}

impl RegionStateSource for BeaconInventory {
    fn current_region_states(&self) -> Vec<(BeaconIdentity, RegionState)> {
        self.beacons
            .iter()
            .filter_map(|entry| entry.region.map(|region| (entry.beacon, region)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"{
        "beacons": [
            {
                "beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 7},
                "device": {"name": "Desk"},
                "region": "inside"
            },
            {
                "beacon": {"uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e", "major": 100, "minor": 8},
                "device": {"name": "Door", "placement": "Hallway"}
            }
        ]
    }"#;

    #[test]
    fn test_only_reported_regions_are_replayed() {
        let inventory = BeaconInventory::from_json(INVENTORY).unwrap();
        assert_eq!(inventory.len(), 2);

        let states = inventory.current_region_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0.minor, 7);
        assert_eq!(states[0].1, RegionState::Inside);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = std::env::temp_dir().join("perimeter-inventory-missing");
        let inventory = BeaconInventory::load_or_empty(&dir.join("beacons.json")).unwrap();
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_malformed_inventory_is_rejected() {
        assert!(BeaconInventory::from_json(r#"{"beacons": [{"device": {}}]}"#).is_err());
    }
}
