//! Confidence routing
//!
//! Fuses the pattern, semantic and model signals into one decision. The
//! misclassification guard runs on every decision and self-validation is
//! offered for decisions inside the configured confidence band.

pub mod guard;
pub mod router;

pub use guard::{phrasing, MisclassificationGuard, Phrasing};
pub use router::{clarification_question, Band, ConfidenceRouter, SuggestedCorrection};

use crate::config::ConfigError;
use crate::types::Confidence;
use serde::{Deserialize, Serialize};

/// Thresholds and policies for `ConfidenceRouter`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Model answers at or above this are trusted outright
    pub high_threshold: f32,
    /// Lower edge of the band where the pattern breaks ties
    pub medium_threshold: f32,
    /// Added to the confidence when independent signals agree
    pub agreement_boost: f32,
    /// A low-band model answer below this is ignored
    pub clarification_floor: f32,
    pub guard_enabled: bool,
    pub validation: ValidationPolicy,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            medium_threshold: 0.6,
            agreement_boost: 0.1,
            clarification_floor: 0.4,
            guard_enabled: true,
            validation: ValidationPolicy::default(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("high_threshold", self.high_threshold),
            ("medium_threshold", self.medium_threshold),
            ("clarification_floor", self.clarification_floor),
            ("agreement_boost", self.agreement_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidConfig(format!(
                    "routing.{name} must be between 0 and 1, got {value}"
                )));
            }
        }

        if self.medium_threshold >= self.high_threshold {
            return Err(ConfigError::InvalidConfig(format!(
                "routing.medium_threshold ({}) must be below routing.high_threshold ({})",
                self.medium_threshold, self.high_threshold
            )));
        }

        if self.clarification_floor > self.medium_threshold {
            return Err(ConfigError::InvalidConfig(
                "routing.clarification_floor must not exceed routing.medium_threshold".to_string(),
            ));
        }

        self.validation.validate()
    }
}

/// When to ask the model to critique its own classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub enabled: bool,
    /// Inclusive lower edge
    pub band_low: f32,
    /// Exclusive upper edge
    pub band_high: f32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            band_low: 0.6,
            band_high: 0.85,
        }
    }
}

impl ValidationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn covers(&self, confidence: Confidence) -> bool {
        let value = confidence.value();
        self.enabled && value >= self.band_low && value < self.band_high
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.band_low)
            || !(0.0..=1.0).contains(&self.band_high)
            || self.band_low >= self.band_high
        {
            return Err(ConfigError::InvalidConfig(format!(
                "routing.validation band [{}, {}) is not a valid range within [0, 1]",
                self.band_low, self.band_high
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RoutingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = RoutingConfig {
            high_threshold: 1.2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_validation_band_rejected() {
        let config = RoutingConfig {
            validation: ValidationPolicy {
                enabled: true,
                band_low: 0.7,
                band_high: 0.7,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_band_edges() {
        let policy = ValidationPolicy::default();
        assert!(policy.covers(Confidence::new(0.6)));
        assert!(!policy.covers(Confidence::new(0.85)));
        assert!(!ValidationPolicy::disabled().covers(Confidence::new(0.7)));
    }
}
