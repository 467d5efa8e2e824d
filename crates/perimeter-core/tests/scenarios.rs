//! End-to-end decision scenarios.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use perimeter_core::{
    BeaconBehavior, BeaconEvent, ConditionOutcome, GpsLocation, Recurrence, RegionStrategy,
    RssiStrategy, RuleProcessingStrategy, TimeOfDay, TimeRule,
};
use perimeter_core::strategy::{RegionStrategyConfig, RssiStrategyConfig};
use uuid::Uuid;

use common::{at, beacon, beacon_rule, registry_with, unconditional_rule};

#[test]
fn test_blocked_in_never_detected_does_not_block() {
    let registry = registry_with(&[beacon(1)]);
    let rule = beacon_rule(1, beacon(1), BeaconBehavior::BlockedIn);
    let mut strategy = RssiStrategy::default();

    for secs in [0, 5, 60] {
        let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, at(secs));
        assert!(!result.is_rule_blocking(&rule.id));
        assert!(result.blocked_resource_ids.is_empty());
    }
}

#[test]
fn test_allowed_in_with_steady_signal_allows() {
    let mut registry = registry_with(&[beacon(1)]);
    let rule = beacon_rule(1, beacon(1), BeaconBehavior::AllowedIn);
    let mut strategy = RssiStrategy::new(RssiStrategyConfig {
        minimum_stability_duration: Duration::ZERO,
        ..RssiStrategyConfig::default()
    });

    for secs in 0..=5 {
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -55,
            },
            at(secs),
        );
    }

    let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, at(5));
    assert!(!result.is_rule_blocking(&rule.id));
    let detail = result.detailed_results[&rule.id]
        .beacon_details
        .as_ref()
        .unwrap();
    assert!(detail.reliable);
    assert!(detail.beacon_present);
}

#[test]
fn test_weekday_schedule_on_saturday_does_not_block() {
    let registry = registry_with(&[]);
    let saturday_10am = Utc.with_ymd_and_hms(2025, 1, 18, 10, 0, 0).unwrap();
    let mut rule = unconditional_rule(1, "com.example.work");
    rule.time_rules.push(TimeRule {
        id: Uuid::from_u128(2),
        is_active: true,
        start_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        end_date: None,
        start_time: TimeOfDay::new(9, 0).unwrap(),
        end_time: TimeOfDay::new(17, 0).unwrap(),
        recurrence: Recurrence::Weekly {
            days_of_week: vec![2, 3, 4, 5, 6],
        },
    });

    let mut strategy = RssiStrategy::default();
    let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, saturday_10am);
    assert!(!result.is_rule_blocking(&rule.id));
    assert_eq!(
        result.detailed_results[&rule.id].time,
        ConditionOutcome::NotMet
    );

    let friday_10am = Utc.with_ymd_and_hms(2025, 1, 17, 10, 0, 0).unwrap();
    let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, friday_10am);
    assert!(result.is_rule_blocking(&rule.id));
}

#[test]
fn test_missing_beacon_is_distinct_from_lost() {
    let mut registry = registry_with(&[beacon(1)]);
    registry.process_event(
        BeaconEvent::Detected {
            beacon: beacon(1),
            rssi: -60,
        },
        at(1),
    );
    registry.process_event(BeaconEvent::MissingBeacon { beacon: beacon(1) }, at(2));

    let status = registry.status(&beacon(1)).unwrap();
    assert_eq!(status.current_rssi(), None);
    let kinds: Vec<&str> = status
        .recent_events()
        .iter()
        .map(|entry| entry.event.kind())
        .collect();
    assert_eq!(kinds, vec!["detected", "missing_beacon"]);

    registry.process_event(BeaconEvent::Lost { beacon: beacon(1) }, at(3));
    let last = registry
        .status(&beacon(1))
        .unwrap()
        .recent_events()
        .back()
        .map(|entry| entry.event.clone());
    assert_eq!(last, Some(BeaconEvent::Lost { beacon: beacon(1) }));
}

#[test]
fn test_region_entry_needs_stability() {
    let mut registry = registry_with(&[beacon(1)]);
    let rule = beacon_rule(1, beacon(1), BeaconBehavior::BlockedIn);
    let mut strategy = RegionStrategy::new(RegionStrategyConfig {
        minimum_region_stability_duration: Duration::from_secs(5),
        ..RegionStrategyConfig::default()
    });

    registry.process_event(BeaconEvent::RegionEntered { beacon: beacon(1) }, at(10));
    assert!(!strategy.is_beacon_region_reliable(&beacon(1), &registry, at(10)));

    let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, at(10));
    assert!(!result.is_rule_blocking(&rule.id));
    let detail = result.detailed_results[&rule.id]
        .beacon_details
        .as_ref()
        .unwrap();
    assert!(detail.is_in_region);
    assert!(!detail.beacon_present);

    let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, at(15));
    assert!(result.is_rule_blocking(&rule.id));
}

#[test]
fn test_missing_location_never_blocks_geofenced_rule() {
    let registry = registry_with(&[]);
    let mut rule = unconditional_rule(1, "com.example.maps");
    rule.gps_location = Some(GpsLocation {
        latitude: 37.7749,
        longitude: -122.4194,
        radius_meters: 50_000.0,
        is_active: true,
    });

    let mut rssi = RssiStrategy::default();
    let mut region = RegionStrategy::default();
    for secs in 0..10 {
        for strategy in [
            &mut rssi as &mut dyn RuleProcessingStrategy,
            &mut region as &mut dyn RuleProcessingStrategy,
        ] {
            let result = strategy.evaluate(std::slice::from_ref(&rule), None, &registry, at(secs));
            assert!(result.blocked_resource_ids.is_empty());
        }
    }
}

#[test]
fn test_union_of_blocked_resources() {
    let registry = registry_with(&[]);
    let mut first = unconditional_rule(1, "com.example.a");
    first.blocked_resource_ids.push("com.example.shared".into());
    let mut second = unconditional_rule(2, "com.example.b");
    second.blocked_resource_ids.push("com.example.shared".into());
    let mut inactive = unconditional_rule(3, "com.example.c");
    inactive.is_active = false;

    let mut strategy = RssiStrategy::default();
    let result = strategy.evaluate(&[first, second, inactive], None, &registry, at(0));
    let blocked: Vec<&str> = result
        .blocked_resource_ids
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(
        blocked,
        vec!["com.example.a", "com.example.b", "com.example.shared"]
    );
    assert_eq!(result.blocking_rule_count(), 2);
}

#[test]
fn test_evaluation_is_deterministic() {
    let mut registry = registry_with(&[beacon(1), beacon(2)]);
    for secs in 0..8 {
        registry.process_event(
            BeaconEvent::Detected {
                beacon: beacon(1),
                rssi: -58 - i32::try_from(secs % 3).unwrap(),
            },
            at(secs),
        );
    }
    let rules = vec![
        beacon_rule(1, beacon(1), BeaconBehavior::AllowedIn),
        beacon_rule(2, beacon(2), BeaconBehavior::BlockedIn),
    ];

    let mut a = RssiStrategy::default();
    let mut b = RssiStrategy::default();
    for secs in 0..12 {
        let ra = a.evaluate(&rules, None, &registry, at(secs));
        let rb = b.evaluate(&rules, None, &registry, at(secs));
        assert_eq!(ra, rb);
    }
}
