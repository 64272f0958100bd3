// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolution of requested capacity ranges to a concrete volume size.

use std::{error::Error, fmt};

use crate::driver::types::CapacityRange;

pub const KIB: i64 = 1 << 10;
pub const MIB: i64 = 1 << 20;
pub const GIB: i64 = 1 << 30;
pub const TIB: i64 = 1 << 40;

pub const DEFAULT_MIN_VOLUME_BYTES: i64 = 5 * GIB;
pub const DEFAULT_VOLUME_BYTES: i64 = 10 * GIB;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    LimitBelowRequired { required: i64, limit: i64 },
    RequiredBelowMinimum { required: i64, minimum: i64 },
    NoWholeGib { required: i64, limit: i64 },
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CapacityError::LimitBelowRequired { required, limit } => write!(
                f,
                "limit ({}) cannot be less then required ({}) size",
                format_bytes(limit),
                format_bytes(required)
            ),
            CapacityError::RequiredBelowMinimum { required, minimum } => write!(
                f,
                "required ({}) can not be less than minimum supported volume size ({})",
                format_bytes(required),
                format_bytes(minimum)
            ),
            CapacityError::NoWholeGib { required, limit } => write!(
                f,
                "no whole GiB size lies between required ({}) and limit ({})",
                format_bytes(required),
                format_bytes(limit)
            ),
        }
    }
}

impl Error for CapacityError {}

/// Bounds applied to every requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
    pub minimum_bytes: i64,
    pub default_bytes: i64,
}

impl Default for CapacityPolicy {
    fn default() -> CapacityPolicy {
        CapacityPolicy {
            minimum_bytes: DEFAULT_MIN_VOLUME_BYTES,
            default_bytes: DEFAULT_VOLUME_BYTES,
        }
    }
}

impl CapacityPolicy {
    /// Pick a size for the range. A missing or empty range gets the default
    /// size. Only a bare `required_bytes` is checked against the minimum.
    pub fn resolve(&self, range: Option<&CapacityRange>) -> Result<i64, CapacityError> {
        let (required, limit) = match range {
            None => return Ok(self.default_bytes),
            Some(range) => (range.required_bytes, range.limit_bytes),
        };

        if required > 0 && limit > 0 && limit < required {
            return Err(CapacityError::LimitBelowRequired { required, limit });
        }

        match (required > 0, limit > 0) {
            (true, true) => Ok(required),
            (true, false) if required < self.minimum_bytes => {
                Err(CapacityError::RequiredBelowMinimum {
                    required,
                    minimum: self.minimum_bytes,
                })
            }
            (true, false) => Ok(required),
            (false, true) => Ok(limit),
            (false, false) => Ok(self.default_bytes),
        }
    }

    /// Pick a size for the range in whole GiB. The size is rounded up unless
    /// that would pass a positive limit, in which case it is rounded down.
    pub fn resolve_gib(&self, range: Option<&CapacityRange>) -> Result<i64, CapacityError> {
        let size = self.resolve(range)?;
        let gib = to_gib_ceil(size);
        let (required, limit) = range.map_or((0, 0), |r| (r.required_bytes, r.limit_bytes));
        if limit <= 0 || gib * GIB <= limit {
            return Ok(gib);
        }

        let floor = limit / GIB;
        if floor > 0 && floor * GIB >= required {
            Ok(floor)
        } else {
            Err(CapacityError::NoWholeGib { required, limit })
        }
    }
}

/// Whole GiB needed to hold `bytes`.
pub fn to_gib_ceil(bytes: i64) -> i64 {
    if bytes <= 0 {
        0
    } else {
        (bytes - 1) / GIB + 1
    }
}

/// Render a byte count with a binary unit suffix and at most one decimal,
/// e.g. "1.5Ki" or "10Gi".
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: i64) -> String {
    let (value, unit) = match bytes {
        b if b >= TIB => (bytes as f64 / TIB as f64, "Ti"),
        b if b >= GIB => (bytes as f64 / GIB as f64, "Gi"),
        b if b >= MIB => (bytes as f64 / MIB as f64, "Mi"),
        b if b >= KIB => (bytes as f64 / KIB as f64, "Ki"),
        _ => (bytes as f64, ""),
    };
    let number = format!("{value:.1}");
    let number = number.strip_suffix(".0").unwrap_or(&number);
    format!("{number}{unit}")
}
