//! Unit conversion and length display helpers.

/// Inches in one meter, as used by the rangefinder conversion.
pub const INCHES_PER_METER: f64 = 39.3701;

/// Converts a distance reported by the rangefinder (meters) into inches.
pub fn meters_to_inches(meters: f64) -> f64 {
    meters * INCHES_PER_METER
}

/// Rounds to two decimal places.
pub fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Formats decimal inches as `"<feet> FT <inches> IN"`, or `"<inches> IN"` below one foot.
///
/// The sign is dropped; direction is reported separately by the tolerance verdict.
pub fn format_length(dec_inches: f64) -> String {
    // Round first so 143.999 becomes 12 FT 0.00 IN instead of 11 FT 12.00 IN.
    let magnitude = round_hundredths(dec_inches.abs());
    let feet = (magnitude / 12.0).trunc();
    let inches = magnitude - feet * 12.0;

    if feet >= 1.0 {
        format!("{} FT {:.2} IN", feet as u64, inches)
    } else {
        format!("{:.2} IN", inches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_meter_in_inches() {
        assert!((meters_to_inches(1.0) - 39.3701).abs() < 1e-4);
        assert_eq!(meters_to_inches(0.0), 0.0);
    }

    #[test]
    fn formats_feet_and_inches() {
        assert_eq!(format_length(146.5), "12 FT 2.50 IN");
        assert_eq!(format_length(12.0), "1 FT 0.00 IN");
    }

    #[test]
    fn formats_inches_only_below_a_foot() {
        assert_eq!(format_length(8.2), "8.20 IN");
        assert_eq!(format_length(0.0), "0.00 IN");
    }

    #[test]
    fn drops_the_sign() {
        assert_eq!(format_length(-146.5), "12 FT 2.50 IN");
        assert_eq!(format_length(-0.25), "0.25 IN");
    }

    #[test]
    fn carries_rounded_inches_into_feet() {
        assert_eq!(format_length(143.999), "12 FT 0.00 IN");
    }
}
