// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Level and gain-reduction math for the page meter.

/// Lowest level reported, in dB.
pub const METER_FLOOR_DB: f32 = -60.0;

/// RMS below this is treated as silence (20·log10(0.001) = -60 dB).
const RMS_FLOOR: f32 = 0.001;

/// Page-level meter reading: the loudest playing element and the deepest
/// reduction, not a per-element breakdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageMetrics {
    pub peak_level_db: f32,
    pub max_reduction_db: f32,
}

impl PageMetrics {
    /// Combine two readings, keeping the maximum of each.
    pub fn max(self, other: Self) -> Self {
        Self {
            peak_level_db: self.peak_level_db.max(other.peak_level_db),
            max_reduction_db: self.max_reduction_db.max(other.max_reduction_db),
        }
    }
}

/// RMS of unsigned 8-bit samples centred at 128, rescaled to ±1.0.
pub fn rms_from_bytes(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f32 = samples
        .iter()
        .map(|&b| {
            let s = (b as f32 - 128.0) / 128.0;
            s * s
        })
        .sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Convert an RMS value to dB, floored at [`METER_FLOOR_DB`].
pub fn level_db(rms: f32) -> f32 {
    (20.0 * rms.max(RMS_FLOOR).log10()).max(METER_FLOOR_DB)
}

/// Gain reduction as a positive dB amount.
pub fn reduction_db(native: f32) -> f32 {
    if native.is_finite() {
        native.abs()
    } else {
        0.0
    }
}
