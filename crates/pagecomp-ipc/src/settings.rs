// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Compressor settings value object and its validation rules.
//!
//! Settings arrive from the panel and from the durable document as loose JSON.
//! [`CompressorSettings::from_raw`] is the only way to turn that into a typed
//! value: missing or mistyped fields fall back to their default, numeric
//! fields outside their range are clamped. Validation never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive range and default for a numeric compressor parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParamRange {
    const fn new(min: f32, max: f32, default: f32) -> Self {
        Self { min, max, default }
    }

    /// Clamp into range; NaN becomes the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    /// Validate an untyped field.
    fn sanitize(&self, value: Option<&Value>) -> f32 {
        match value.and_then(Value::as_f64) {
            Some(v) if v.is_finite() => self.clamp(v as f32),
            _ => self.default,
        }
    }
}

/// Threshold in dB.
pub const THRESHOLD_DB: ParamRange = ParamRange::new(-100.0, 0.0, -24.0);
/// Compression ratio (n:1).
pub const RATIO: ParamRange = ParamRange::new(1.0, 20.0, 12.0);
/// Attack time in milliseconds.
pub const ATTACK_MS: ParamRange = ParamRange::new(0.0, 100.0, 3.0);
/// Release time in milliseconds.
pub const RELEASE_MS: ParamRange = ParamRange::new(0.0, 1000.0, 250.0);
/// Makeup gain in dB.
pub const OUTPUT_GAIN_DB: ParamRange = ParamRange::new(-20.0, 20.0, 0.0);

/// Compression is off until a user turns it on for a site.
pub const DEFAULT_ENABLED: bool = false;

/// Compression parameters for one site.
///
/// Field names carry their unit. On the wire and on disk the names are the
/// short ones (`threshold`, `attack`, ...) and times are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    pub enabled: bool,
    #[serde(rename = "threshold")]
    pub threshold_db: f32,
    pub ratio: f32,
    #[serde(rename = "attack")]
    pub attack_ms: f32,
    #[serde(rename = "release")]
    pub release_ms: f32,
    #[serde(rename = "outputGain")]
    pub output_gain_db: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED,
            threshold_db: THRESHOLD_DB.default,
            ratio: RATIO.default,
            attack_ms: ATTACK_MS.default,
            release_ms: RELEASE_MS.default,
            output_gain_db: OUTPUT_GAIN_DB.default,
        }
    }
}

impl CompressorSettings {
    /// Validate an untyped settings object, merging it over the defaults.
    pub fn from_raw(raw: &Value) -> Self {
        let Some(fields) = raw.as_object() else {
            return Self::default();
        };

        Self {
            enabled: fields
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(DEFAULT_ENABLED),
            threshold_db: THRESHOLD_DB.sanitize(fields.get("threshold")),
            ratio: RATIO.sanitize(fields.get("ratio")),
            attack_ms: ATTACK_MS.sanitize(fields.get("attack")),
            release_ms: RELEASE_MS.sanitize(fields.get("release")),
            output_gain_db: OUTPUT_GAIN_DB.sanitize(fields.get("outputGain")),
        }
    }

    /// Return a copy with every numeric field clamped into its range.
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            threshold_db: THRESHOLD_DB.clamp(self.threshold_db),
            ratio: RATIO.clamp(self.ratio),
            attack_ms: ATTACK_MS.clamp(self.attack_ms),
            release_ms: RELEASE_MS.clamp(self.release_ms),
            output_gain_db: OUTPUT_GAIN_DB.clamp(self.output_gain_db),
        }
    }

    /// Attack time in seconds, the unit the platform compressor expects.
    pub fn attack_secs(&self) -> f32 {
        self.attack_ms / 1000.0
    }

    /// Release time in seconds, the unit the platform compressor expects.
    pub fn release_secs(&self) -> f32 {
        self.release_ms / 1000.0
    }

    /// Linear gain factor for the output gain stage.
    pub fn output_gain_linear(&self) -> f32 {
        db_to_linear(self.output_gain_db)
    }

    /// Serialize to the untyped wire/disk form.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "enabled": self.enabled,
            "threshold": self.threshold_db,
            "ratio": self.ratio,
            "attack": self.attack_ms,
            "release": self.release_ms,
            "outputGain": self.output_gain_db,
        })
    }
}

/// Unvalidated settings payload as received from a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSettings(pub Value);

impl RawSettings {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Validate into typed settings.
    pub fn validate(&self) -> CompressorSettings {
        CompressorSettings::from_raw(&self.0)
    }
}

impl From<CompressorSettings> for RawSettings {
    fn from(settings: CompressorSettings) -> Self {
        Self(settings.to_value())
    }
}

impl From<Value> for RawSettings {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Convert decibels to a linear gain factor.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
