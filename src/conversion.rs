//! Angular helpers on the celestial sphere.
//!
//! All angles are in **degrees** on input and output. Motion vectors live in the local
//! tangent plane: the first component is `ΔRA · cos δ`, the second `ΔDec`, so that both
//! components are true angular displacements.
use nalgebra::Vector2;

use crate::constants::{Degree, EPS, RADEG};

/// Wrap a right ascension difference into `(-180, 180]` degrees.
pub fn wrap_delta_ra(delta: Degree) -> Degree {
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Normalize a right ascension into `[0, 360)` degrees.
pub fn normalize_ra(ra: Degree) -> Degree {
    ra.rem_euclid(360.0)
}

/// Great-circle separation between two sky positions.
///
/// Uses the Vincenty formula, which stays accurate for both very small and antipodal
/// separations (same formula as astropy's `SkyCoord.separation`).
///
/// Arguments
/// ---------
/// * `ra1`, `dec1`: first position (degrees)
/// * `ra2`, `dec2`: second position (degrees)
///
/// Return
/// ------
/// * the separation in degrees, in `[0, 180]`
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let delta_ra = (ra2 - ra1) * RADEG;
    let (sin_d1, cos_d1) = (dec1 * RADEG).sin_cos();
    let (sin_d2, cos_d2) = (dec2 * RADEG).sin_cos();
    let (sin_dra, cos_dra) = delta_ra.sin_cos();

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denominator = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    num1.hypot(num2).atan2(denominator).to_degrees()
}

/// Tangent-plane displacement from one position to another (degrees).
///
/// The RA difference is wrapped and scaled by the cosine of the mean declination.
pub fn tangent_offset(
    from_ra: Degree,
    from_dec: Degree,
    to_ra: Degree,
    to_dec: Degree,
) -> Vector2<f64> {
    let mean_dec = 0.5 * (from_dec + to_dec) * RADEG;
    Vector2::new(
        wrap_delta_ra(to_ra - from_ra) * mean_dec.cos(),
        to_dec - from_dec,
    )
}

/// Move a sky position by a tangent-plane displacement (degrees).
///
/// The declination is clamped to the poles and the right ascension normalized into
/// `[0, 360)`. The RA step is divided by the cosine of the midpoint declination, which
/// is the inverse of [`tangent_offset`].
pub fn apply_offset(ra: Degree, dec: Degree, offset: &Vector2<f64>) -> (Degree, Degree) {
    let new_dec = (dec + offset.y).clamp(-90.0, 90.0);
    let cos_mid = (0.5 * (dec + new_dec) * RADEG).cos();
    let new_ra = if cos_mid.abs() < EPS {
        ra
    } else {
        ra + offset.x / cos_mid
    };
    (normalize_ra(new_ra), new_dec)
}

/// Angle between two consecutive motion segments (degrees, in `[0, 180]`).
///
/// Return
/// ------
/// * `None` when one of the segments has no length: a stationary segment has no direction.
pub fn turn_angle(first: &Vector2<f64>, second: &Vector2<f64>) -> Option<Degree> {
    let n1 = first.norm();
    let n2 = second.norm();
    if n1 < EPS || n2 < EPS {
        return None;
    }
    let cosine = (first.dot(second) / (n1 * n2)).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees())
}

/// Format a right ascension as the MPC sexagesimal string `HH MM SS.sss`.
pub fn format_ra_hms(ra: Degree) -> String {
    // milliseconds of time, carried before splitting to avoid "60.000" seconds
    let total_ms = (normalize_ra(ra) / 15.0 * 3_600_000.0).round() as u64 % 86_400_000;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms % 60_000) as f64 / 1000.0;
    format!("{hours:02} {minutes:02} {seconds:06.3}")
}

/// Format a declination as the MPC sexagesimal string `sDD MM SS.ss`.
pub fn format_dec_dms(dec: Degree) -> String {
    let sign = if dec < 0.0 { '-' } else { '+' };
    let total_cas = (dec.abs() * 360_000.0).round() as u64;
    let degrees = total_cas / 360_000;
    let minutes = (total_cas / 6_000) % 60;
    let seconds = (total_cas % 6_000) as f64 / 100.0;
    format!("{sign}{degrees:02} {minutes:02} {seconds:05.2}")
}

#[cfg(test)]
mod conversion_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wrap_delta_ra() {
        assert_abs_diff_eq!(wrap_delta_ra(359.0), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_delta_ra(-359.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_delta_ra(180.0), 180.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_delta_ra(-180.0), 180.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_delta_ra(12.5), 12.5, epsilon = 1e-12);
    }

    #[test]
    fn test_angular_separation() {
        assert_abs_diff_eq!(angular_separation(10.0, 0.0, 11.0, 0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angular_separation(0.0, 0.0, 0.0, 90.0), 90.0, epsilon = 1e-12);
        // across the RA origin
        assert_abs_diff_eq!(
            angular_separation(359.5, 0.0, 0.5, 0.0),
            1.0,
            epsilon = 1e-12
        );
        // RA differences shrink with declination
        assert!(angular_separation(10.0, 60.0, 11.0, 60.0) < 0.51);
        assert_abs_diff_eq!(angular_separation(42.0, -12.0, 42.0, -12.0), 0.0);
    }

    #[test]
    fn test_offset_round_trip() {
        let offset = tangent_offset(359.9, 10.0, 0.1, 10.05);
        assert!(offset.x > 0.0);
        let (ra, dec) = apply_offset(359.9, 10.0, &offset);
        assert_abs_diff_eq!(ra, 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(dec, 10.05, epsilon = 1e-12);
    }

    #[test]
    fn test_turn_angle() {
        let east = Vector2::new(1.0, 0.0);
        let north = Vector2::new(0.0, 2.0);
        assert_abs_diff_eq!(turn_angle(&east, &east).unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(turn_angle(&east, &north).unwrap(), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(turn_angle(&east, &-east).unwrap(), 180.0, epsilon = 1e-9);
        assert_eq!(turn_angle(&east, &Vector2::zeros()), None);
    }

    #[test]
    fn test_sexagesimal_format() {
        assert_eq!(format_ra_hms(343.097375), "22 52 23.370");
        assert_eq!(format_ra_hms(0.0), "00 00 00.000");
        // rounding carries into the minutes instead of printing 60 seconds
        assert_eq!(format_ra_hms(14.999_999_999), "01 00 00.000");
        assert_eq!(format_dec_dms(-0.5039444444444444), "-00 30 14.20");
        assert_eq!(format_dec_dms(13.928527777777777), "+13 55 42.70");
    }
}
