//! RSSI classification: proximity levels, signal quality and calibration.
//!
//! RSSI values are negative dBm; a less negative value is a stronger signal.
//! An RSSI of exactly `0` is the sensor layer's "invalid reading" sentinel and
//! never reaches [`ProximityLevel::classify`]: it is turned into a
//! `MissingBeacon` event before it gets that far.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Coarse proximity derived from RSSI.
///
/// Ordered `Unknown < Far < Near < Immediate`, so a stronger signal always
/// compares greater or equal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProximityLevel {
    /// No usable signal.
    Unknown,
    /// Detectable but distant.
    Far,
    /// Within a few meters.
    Near,
    /// Practically touching.
    Immediate,
}

impl ProximityLevel {
    /// Classify an RSSI reading against the given calibration.
    ///
    /// Total, deterministic and monotonic step function.
    #[must_use]
    pub const fn classify(rssi: i32, calibration: &ProximityCalibration) -> Self {
        if rssi >= calibration.immediate_threshold {
            Self::Immediate
        } else if rssi >= calibration.near_threshold {
            Self::Near
        } else if rssi >= calibration.far_threshold {
            Self::Far
        } else {
            Self::Unknown
        }
    }

    /// Lower-case name used in logs and diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Far => "far",
            Self::Near => "near",
            Self::Immediate => "immediate",
        }
    }
}

impl From<i32> for ProximityLevel {
    /// Classify with the reference calibration.
    fn from(rssi: i32) -> Self {
        Self::classify(rssi, &ProximityCalibration::default())
    }
}

impl std::fmt::Display for ProximityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality of a beacon's signal, from its smoothed strength and jitter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    /// Weak or erratic.
    Poor,
    /// Usable with care.
    Fair,
    /// Reliable.
    Good,
    /// Strong and steady.
    Excellent,
}

impl SignalQuality {
    /// Derive quality from the latest RSSI and its exponential moving average.
    ///
    /// | smoothed | deviation | quality |
    /// |---|---|---|
    /// | >= -60 | <= 5 | Excellent |
    /// | >= -70 | <= 8 | Good |
    /// | >= -80 | <= 12 | Fair |
    /// | otherwise | | Poor |
    #[must_use]
    pub fn from_readings(instant_rssi: i32, smoothed_rssi: f64) -> Self {
        let deviation = (f64::from(instant_rssi) - smoothed_rssi).abs();

        if smoothed_rssi >= -60.0 && deviation <= 5.0 {
            Self::Excellent
        } else if smoothed_rssi >= -70.0 && deviation <= 8.0 {
            Self::Good
        } else if smoothed_rssi >= -80.0 && deviation <= 12.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// RSSI thresholds and smoothing used to interpret raw readings.
///
/// Loaded from the `[proximity]` configuration section. All thresholds must be
/// negative and strictly descending (`immediate > near > far`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ProximityCalibration {
    /// RSSI at or above which a beacon is `Immediate`.
    #[schema(example = -50)]
    pub immediate_threshold: i32,

    /// RSSI at or above which a beacon is `Near`.
    #[schema(example = -70)]
    pub near_threshold: i32,

    /// RSSI at or above which a beacon is `Far`; weaker is `Unknown`.
    #[schema(example = -99)]
    pub far_threshold: i32,

    /// A `Far` beacon still counts as in range when at least this strong.
    #[schema(example = -85)]
    pub far_in_range_threshold: i32,

    /// Weight of the newest sample in the RSSI moving average, in `(0, 1]`.
    #[schema(example = 0.2)]
    pub rssi_smoothing_factor: f64,
}

impl Default for ProximityCalibration {
    fn default() -> Self {
        Self {
            immediate_threshold: -50,
            near_threshold: -70,
            far_threshold: -99,
            far_in_range_threshold: -85,
            rssi_smoothing_factor: 0.2,
        }
    }
}

impl ProximityCalibration {
    /// Whether a beacon at this proximity and RSSI is in range.
    ///
    /// `Immediate`/`Near` always are, `Unknown` never is, and `Far` only when
    /// the current RSSI clears `far_in_range_threshold`.
    #[must_use]
    pub fn is_in_range(&self, proximity: ProximityLevel, rssi: Option<i32>) -> bool {
        match proximity {
            ProximityLevel::Immediate | ProximityLevel::Near => true,
            ProximityLevel::Far => rssi.is_some_and(|rssi| rssi >= self.far_in_range_threshold),
            ProximityLevel::Unknown => false,
        }
    }

    /// Whether a beacon at this proximity is in near range.
    #[must_use]
    pub const fn is_near_range(proximity: ProximityLevel) -> bool {
        matches!(proximity, ProximityLevel::Immediate | ProximityLevel::Near)
    }

    /// Fold a new sample into the moving average.
    #[must_use]
    pub fn smooth(&self, previous: Option<f64>, rssi: i32) -> f64 {
        let sample = f64::from(rssi);
        previous.map_or(sample, |avg| {
            self.rssi_smoothing_factor
                .mul_add(sample, (1.0 - self.rssi_smoothing_factor) * avg)
        })
    }

    /// Returns a list of problems with these values, empty when valid.
    #[must_use]
    pub fn problems(&self) -> Vec<(&'static str, String)> {
        let mut problems = Vec::new();

        for (field, value) in [
            ("proximity.immediate_threshold", self.immediate_threshold),
            ("proximity.near_threshold", self.near_threshold),
            ("proximity.far_threshold", self.far_threshold),
            ("proximity.far_in_range_threshold", self.far_in_range_threshold),
        ] {
            if value >= 0 {
                problems.push((field, format!("must be negative dBm (got {value})")));
            }
        }

        if !(self.immediate_threshold > self.near_threshold
            && self.near_threshold > self.far_threshold)
        {
            problems.push((
                "proximity",
                "thresholds must be strictly descending: immediate > near > far".to_string(),
            ));
        }

        if self.far_in_range_threshold < self.far_threshold
            || self.far_in_range_threshold >= self.near_threshold
        {
            problems.push((
                "proximity.far_in_range_threshold",
                "must lie within the far band (far <= value < near)".to_string(),
            ));
        }

        if !(self.rssi_smoothing_factor > 0.0 && self.rssi_smoothing_factor <= 1.0) {
            problems.push((
                "proximity.rssi_smoothing_factor",
                format!("must be in (0, 1] (got {})", self.rssi_smoothing_factor),
            ));
        }

        problems
    }
}

/// Point-in-time readout of a beacon's signal, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProximitySample {
    /// Current proximity classification.
    pub proximity: ProximityLevel,

    /// Latest raw RSSI, absent after loss or an invalid reading.
    pub rssi: Option<i32>,

    /// Exponential moving average of RSSI.
    pub smoothed_rssi: Option<f64>,

    /// Quality derived from `rssi` and `smoothed_rssi`.
    pub quality: SignalQuality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_thresholds() {
        assert_eq!(ProximityLevel::from(-30), ProximityLevel::Immediate);
        assert_eq!(ProximityLevel::from(-50), ProximityLevel::Immediate);
        assert_eq!(ProximityLevel::from(-51), ProximityLevel::Near);
        assert_eq!(ProximityLevel::from(-70), ProximityLevel::Near);
        assert_eq!(ProximityLevel::from(-71), ProximityLevel::Far);
        assert_eq!(ProximityLevel::from(-99), ProximityLevel::Far);
        assert_eq!(ProximityLevel::from(-100), ProximityLevel::Unknown);
    }

    #[test]
    fn test_proximity_ordering() {
        assert!(ProximityLevel::Unknown < ProximityLevel::Far);
        assert!(ProximityLevel::Far < ProximityLevel::Near);
        assert!(ProximityLevel::Near < ProximityLevel::Immediate);
    }

    #[test]
    fn test_signal_quality_table() {
        assert_eq!(SignalQuality::from_readings(-55, -56.0), SignalQuality::Excellent);
        // Strong but jittery drops to the first row whose jitter bound holds.
        assert_eq!(SignalQuality::from_readings(-48, -55.0), SignalQuality::Good);
        assert_eq!(SignalQuality::from_readings(-75, -72.0), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_readings(-90, -88.0), SignalQuality::Poor);
        assert_eq!(SignalQuality::from_readings(-40, -60.0), SignalQuality::Poor);
        assert!(SignalQuality::Poor < SignalQuality::Excellent);
    }

    #[test]
    fn test_in_range_rules() {
        let cal = ProximityCalibration::default();
        assert!(cal.is_in_range(ProximityLevel::Near, None));
        assert!(cal.is_in_range(ProximityLevel::Far, Some(-80)));
        assert!(!cal.is_in_range(ProximityLevel::Far, Some(-90)));
        assert!(!cal.is_in_range(ProximityLevel::Far, None));
        assert!(!cal.is_in_range(ProximityLevel::Unknown, Some(-40)));
    }

    #[test]
    fn test_smoothing() {
        let cal = ProximityCalibration::default();
        assert!((cal.smooth(None, -60) - -60.0).abs() < f64::EPSILON);
        let avg = cal.smooth(Some(-60.0), -70);
        assert!((avg - -62.0).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_validation() {
        assert!(ProximityCalibration::default().problems().is_empty());

        let bad = ProximityCalibration {
            immediate_threshold: 5,
            near_threshold: -80,
            far_threshold: -70,
            far_in_range_threshold: -75,
            rssi_smoothing_factor: 0.0,
        };
        let problems = bad.problems();
        assert!(problems
            .iter()
            .any(|(field, _)| *field == "proximity.immediate_threshold"));
        assert!(problems.iter().any(|(field, _)| *field == "proximity"));
        assert!(problems
            .iter()
            .any(|(field, _)| *field == "proximity.rssi_smoothing_factor"));
    }
}
