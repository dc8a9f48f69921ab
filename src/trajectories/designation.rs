//! MPC packed provisional designations.
//!
//! Every trajectory gets a 7-character packed designation built from the calendar date
//! of its first detection and a discovery number (the trajectory id):
//!
//! ```text
//! K 21 K 00 A
//! │ │  │ │  └ order letter inside the half-month (A–Z without I), n % 25
//! │ │  │ └─── cycle count n / 25, packed on two characters (00–99, A0–z9)
//! │ │  └───── half-month letter (A/B for January … X/Y for December, I skipped)
//! │ └──────── last two digits of the year
//! └────────── century letter (I = 1800, J = 1900, K = 2000, L = 2100)
//! ```
//!
//! The designation is the object name handed to the orbit solver and written in the
//! association output.
use crate::{constants::JD, time::jd_to_calendar};

const HALF_MONTH_LETTERS: &[u8; 24] = b"ABCDEFGHJKLMNOPQRSTUVWXY";
const ORDER_LETTERS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";
const CYCLE_DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Largest cycle count that fits on two packed characters (`z9`).
const MAX_CYCLE: u64 = 619;

/// Pack a cycle count on two characters.
///
/// Return
/// ------
/// * `None` beyond `z9` (cycle 619).
pub fn make_cycle(cycle: u64) -> Option<String> {
    if cycle > MAX_CYCLE {
        return None;
    }
    let tens = CYCLE_DIGITS[(cycle / 10) as usize] as char;
    let unit = (b'0' + (cycle % 10) as u8) as char;
    Some(format!("{tens}{unit}"))
}

fn century_letter(year: i32) -> Option<char> {
    match year.div_euclid(100) {
        18 => Some('I'),
        19 => Some('J'),
        20 => Some('K'),
        21 => Some('L'),
        _ => None,
    }
}

/// Packed provisional designation for a discovery at `jd`.
///
/// Arguments
/// ---------
/// * `jd`: epoch of the first detection (UTC julian date)
/// * `discovery_number`: rank of the object in its half-month, starting at 0
///
/// Return
/// ------
/// * `None` when the year or the discovery number cannot be packed.
pub fn make_designation(jd: JD, discovery_number: u64) -> Option<String> {
    let (year, month, day) = jd_to_calendar(jd);
    let century = century_letter(year)?;
    let half = if day.floor() <= 15.0 { 0 } else { 1 };
    let half_month = HALF_MONTH_LETTERS[(month as usize - 1) * 2 + half] as char;
    let order = ORDER_LETTERS[(discovery_number % 25) as usize] as char;
    let cycle = make_cycle(discovery_number / 25)?;
    Some(format!(
        "{century}{:02}{half_month}{cycle}{order}",
        year.rem_euclid(100)
    ))
}

/// Designation of a trajectory, falling back to its zero-padded id when the packed
/// form is not available.
pub fn designation_or_id(jd: JD, discovery_number: u64) -> String {
    make_designation(jd, discovery_number).unwrap_or_else(|| format!("{discovery_number:07}"))
}

#[cfg(test)]
mod designation_test {
    use super::*;

    // 2021-05-22 07:33:02 UTC
    const MAY_22_2021: JD = 2459356.814606;

    #[test]
    fn test_make_cycle() {
        assert_eq!(make_cycle(0).unwrap(), "00");
        assert_eq!(make_cycle(10).unwrap(), "10");
        assert_eq!(make_cycle(108).unwrap(), "A8");
        assert_eq!(make_cycle(110).unwrap(), "B0");
        assert_eq!(make_cycle(127).unwrap(), "C7");
        assert_eq!(make_cycle(162).unwrap(), "G2");
        assert_eq!(make_cycle(193).unwrap(), "J3");
        assert_eq!(make_cycle(348).unwrap(), "Y8");
        assert_eq!(make_cycle(355).unwrap(), "Z5");
        assert_eq!(make_cycle(360).unwrap(), "a0");
        assert_eq!(make_cycle(418).unwrap(), "f8");
        assert_eq!(make_cycle(619).unwrap(), "z9");
        assert_eq!(make_cycle(620), None);
    }

    #[test]
    fn test_make_designation() {
        assert_eq!(make_designation(MAY_22_2021, 0).unwrap(), "K21K00A");
        assert_eq!(make_designation(MAY_22_2021, 24).unwrap(), "K21K00Z");
        assert_eq!(make_designation(MAY_22_2021, 25).unwrap(), "K21K01A");
        assert_eq!(make_designation(MAY_22_2021, 49).unwrap(), "K21K01Z");
        assert_eq!(make_designation(MAY_22_2021, 8999).unwrap(), "K21KZ9Z");
        assert_eq!(make_designation(MAY_22_2021, 9000).unwrap(), "K21Ka0A");

        // 2021-01-01 07:33 UTC and 2022-07-04 07:33 UTC
        assert_eq!(make_designation(2459215.814606, 0).unwrap(), "K21A00A");
        assert_eq!(make_designation(2459764.814606, 0).unwrap(), "K22N00A");
    }

    #[test]
    fn test_designation_fallback() {
        assert_eq!(designation_or_id(MAY_22_2021, 20_000), "0020000");
        assert_eq!(designation_or_id(MAY_22_2021, 3), "K21K00D");
    }
}
