use hifitime::Epoch;

use crate::constants::{JD, JDTOMJD, MJD};

/// Transformation from julian date (JD) to modified julian date (MJD)
pub fn jd_to_mjd(jd: JD) -> MJD {
    jd - JDTOMJD
}

/// Transformation from modified julian date (MJD) to julian date (JD)
pub fn mjd_to_jd(mjd: MJD) -> JD {
    mjd + JDTOMJD
}

/// Calendar date of a julian date in the UTC scale.
///
/// Argument
/// --------
/// * `jd`: a julian date (UTC)
///
/// Return
/// ------
/// * `(year, month, day)` where `day` carries the fraction of the day
pub fn jd_to_calendar(jd: JD) -> (i32, u8, f64) {
    let (year, month, day, hour, minute, second, nanos) = Epoch::from_jde_utc(jd).to_gregorian_utc();
    let seconds_of_day =
        hour as f64 * 3600.0 + minute as f64 * 60.0 + second as f64 + nanos as f64 * 1e-9;
    (year, month, day as f64 + seconds_of_day / 86_400.0)
}

/// Format a julian date as an MPC fractional date `YYYY MM DD.dddddd`.
pub fn jd_to_frac_date(jd: JD) -> String {
    let (year, month, day) = jd_to_calendar(jd);
    format!("{year:04} {month:02} {day:09.6}")
}

#[cfg(test)]
mod time_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_jd_mjd() {
        assert_abs_diff_eq!(jd_to_mjd(2459274.810893373), 59274.310893373, epsilon = 1e-9);
        assert_abs_diff_eq!(mjd_to_jd(59274.310893373), 2459274.810893373, epsilon = 1e-9);
    }

    #[test]
    fn test_jd_to_calendar() {
        // 2021-05-22 12:00:00 UTC
        let (year, month, day) = jd_to_calendar(2459357.0);
        assert_eq!(year, 2021);
        assert_eq!(month, 5);
        assert_abs_diff_eq!(day, 22.5, epsilon = 1e-6);
    }

    #[test]
    fn test_frac_date() {
        assert_eq!(jd_to_frac_date(2459357.0), "2021 05 22.500000");
    }
}
