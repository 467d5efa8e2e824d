//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use perimeter_core::{
    BeaconBehavior, BeaconDevice, BeaconIdentity, BeaconRegistry, FineLocationRule, Rule,
};
use uuid::Uuid;

/// Fixed epoch used by every test: 2023-11-14 22:13:20 UTC.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn beacon(minor: u16) -> BeaconIdentity {
    BeaconIdentity::new(
        Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
        100,
        minor,
    )
}

pub fn registry_with(beacons: &[BeaconIdentity]) -> BeaconRegistry {
    let mut registry = BeaconRegistry::default();
    for b in beacons {
        registry.register(*b, BeaconDevice::named(format!("beacon-{}", b.minor)), at(0));
    }
    registry
}

pub fn unconditional_rule(id: u128, resource: &str) -> Rule {
    Rule {
        id: Uuid::from_u128(id),
        name: format!("rule {id}"),
        is_active: true,
        gps_location: None,
        time_rules: Vec::new(),
        fine_location_rules: Vec::new(),
        blocked_resource_ids: vec![resource.to_string()],
    }
}

pub fn beacon_rule(id: u128, beacon: BeaconIdentity, behavior: BeaconBehavior) -> Rule {
    let mut rule = unconditional_rule(id, "com.example.blocked");
    rule.fine_location_rules.push(FineLocationRule {
        id: Uuid::from_u128(id + 1000),
        beacon,
        behavior,
        is_active: true,
    });
    rule
}
