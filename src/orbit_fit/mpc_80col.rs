//! MPC 80-column observation records.
//!
//! The orbit solver reads its astrometry in the fixed-width format of the Minor Planet
//! Center. Only the fields the pipeline knows are filled:
//!
//! ```text
//! columns  content
//!  1-5     packed number (blank: unnumbered object)
//!  6-12    packed provisional designation
//!  15      observation type, `C` for CCD
//!  16-32   UTC date `YYYY MM DD.dddddd`
//!  33-44   right ascension `HH MM SS.sss`
//!  45-56   declination `sDD MM SS.ss`
//!  66-70   magnitude, one decimal
//!  71      band
//!  78-80   observatory code
//! ```
use crate::{
    constants::FilterId,
    conversion::{format_dec_dms, format_ra_hms},
    observations::Observation,
    time::jd_to_frac_date,
};

/// Band letter of a survey filter id (ZTF: 1 = g, 2 = r, 3 = i).
pub fn band_letter(fid: FilterId) -> char {
    match fid {
        1 => 'g',
        2 => 'r',
        3 => 'i',
        _ => ' ',
    }
}

/// Render one observation as an 80-column line (without the line terminator).
pub fn format_line(designation: &str, observation: &Observation, obs_code: &str) -> String {
    let magnitude = format!("{:.1}", observation.magpsf);
    format!(
        "{:5}{:<7}  C{:<17}{:<12}{:<12}{:9}{:<5}{}{:6}{:>3}",
        "",
        designation,
        jd_to_frac_date(observation.jd),
        format_ra_hms(observation.ra),
        format_dec_dms(observation.dec),
        "",
        magnitude,
        band_letter(observation.fid),
        "",
        obs_code,
    )
}

/// Render every observation of a trajectory, one line each, newline-separated.
pub fn format_observations<'a>(
    designation: &str,
    observations: impl IntoIterator<Item = &'a Observation>,
    obs_code: &str,
) -> String {
    observations
        .into_iter()
        .map(|obs| format_line(designation, obs, obs_code))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod mpc_80col_test {
    use super::*;

    #[test]
    fn test_format_line() {
        // 2021-05-22 12:00:00 UTC
        let obs = Observation::new(1, 343.097375, -0.5039444444444444, 2459357.0, 18.46, 2, 1);
        let line = format_line("K21K00A", &obs, "I41");
        assert_eq!(line.len(), 80);
        assert_eq!(
            line,
            "     K21K00A  C2021 05 22.50000022 52 23.370-00 30 14.20         18.5 r      I41"
        );
        assert_eq!(&line[5..12], "K21K00A");
        assert_eq!(&line[15..32], "2021 05 22.500000");
        assert_eq!(&line[77..80], "I41");
    }

    #[test]
    fn test_format_observations() {
        let obs = [
            Observation::new(1, 10.0, 5.0, 2459357.0, 18.0, 1, 1),
            Observation::new(2, 10.1, 5.0, 2459358.0, 18.1, 3, 2),
        ];
        let text = format_observations("K21K00B", &obs, "I41");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].chars().nth(70), Some('i'));
    }
}
