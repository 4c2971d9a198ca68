//! Classification of a cut against the ordered length.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Within,
    Near,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    TooLong,
    TooShort,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceVerdict {
    /// Absolute difference between the effective measured length and the target.
    pub deviation_inches: f64,
    pub band: Band,
    pub direction: Direction,
    pub print_allowed: bool,
}

/// Tolerance thresholds and the sensor's mounting offset, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceSettings {
    pub offset_inches: f64,
    pub min_tolerance_inches: f64,
    pub max_tolerance_inches: f64,
}

impl ToleranceSettings {
    pub fn classify(&self, target_inches: f64, measured_inches: f64) -> ToleranceVerdict {
        classify(
            target_inches,
            measured_inches,
            self.offset_inches,
            self.min_tolerance_inches,
            self.max_tolerance_inches,
        )
    }
}

/// Compares the measured length plus `offset_inches` against the target.
///
/// A deviation up to and including `min_tol` is within tolerance and allows printing; up
/// to and including `max_tol` it is near; beyond that it is outside.
pub fn classify(
    target_inches: f64,
    measured_inches: f64,
    offset_inches: f64,
    min_tol: f64,
    max_tol: f64,
) -> ToleranceVerdict {
    let effective_measured = measured_inches + offset_inches;
    let deviation_inches = (effective_measured - target_inches).abs();

    let direction = if target_inches < effective_measured {
        Direction::TooLong
    } else if target_inches > effective_measured {
        Direction::TooShort
    } else {
        Direction::None
    };

    let band = if deviation_inches <= min_tol {
        Band::Within
    } else if deviation_inches <= max_tol {
        Band::Near
    } else {
        Band::Outside
    };

    ToleranceVerdict {
        deviation_inches,
        band,
        direction,
        print_allowed: band == Band::Within,
    }
}

impl fmt::Display for ToleranceVerdict {
    /// Operator text, e.g. `Near Tolerance: Too Long`. A cut within tolerance carries no
    /// direction.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.band {
            Band::Within => return f.write_str("Within Tolerance"),
            Band::Near => "Near Tolerance",
            Band::Outside => "Outside Tolerance",
        };
        match self.direction {
            Direction::None => f.write_str(label),
            Direction::TooLong => write!(f, "{}: Too Long", label),
            Direction::TooShort => write!(f, "{}: Too Short", label),
        }
    }
}
