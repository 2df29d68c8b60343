//! Tapering windows applied along the fast-time axis before range conversion.
//!
//! Coefficients follow the symmetric definitions (denominator `N - 1`), so a
//! window of length one is `[1.0]`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prelude::RadarError;

/// Shape parameter used for the Kaiser window.
pub const KAISER_BETA: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Blackman,
    Bartlett,
    Hamming,
    Hanning,
    Kaiser,
}

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Blackman,
        WindowKind::Bartlett,
        WindowKind::Hamming,
        WindowKind::Hanning,
        WindowKind::Kaiser,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowKind::Blackman => "blackman",
            WindowKind::Bartlett => "bartlett",
            WindowKind::Hamming => "hamming",
            WindowKind::Hanning => "hanning",
            WindowKind::Kaiser => "kaiser",
        }
    }

    /// Numeric code recorded in the flag ledger. Zero is reserved for "not run".
    pub fn code(self) -> u8 {
        match self {
            WindowKind::Blackman => 1,
            WindowKind::Bartlett => 2,
            WindowKind::Hamming => 3,
            WindowKind::Hanning => 4,
            WindowKind::Kaiser => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Weight vector of the given length.
    pub fn weights(self, length: usize) -> Vec<f64> {
        if length == 0 {
            return Vec::new();
        }
        if length == 1 {
            return vec![1.0];
        }
        let n_minus_1 = (length - 1) as f64;
        (0..length)
            .map(|n| {
                let n = n as f64;
                match self {
                    WindowKind::Blackman => {
                        let x = 2.0 * PI * n / n_minus_1;
                        0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
                    }
                    WindowKind::Bartlett => {
                        let half = n_minus_1 / 2.0;
                        1.0 - ((n - half) / half).abs()
                    }
                    WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * n / n_minus_1).cos(),
                    WindowKind::Hanning => 0.5 - 0.5 * (2.0 * PI * n / n_minus_1).cos(),
                    WindowKind::Kaiser => {
                        let half = n_minus_1 / 2.0;
                        let x = (n - half) / half;
                        bessel_i0(KAISER_BETA * (1.0 - x * x).max(0.0).sqrt())
                            / bessel_i0(KAISER_BETA)
                    }
                }
            })
            .collect()
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = RadarError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                RadarError::Config(format!(
                    "window '{name}' is not one of blackman, bartlett, hamming, hanning, kaiser"
                ))
            })
    }
}

/// Modified Bessel function of the first kind, order zero, by power series.
fn bessel_i0(x: f64) -> f64 {
    let quarter_x2 = x * x / 4.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    while term > sum * 1e-17 {
        term *= quarter_x2 / (k * k);
        sum += term;
        k += 1.0;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn windows_are_symmetric_and_sized() {
        for kind in WindowKind::ALL {
            let w = kind.weights(9);
            assert_eq!(w.len(), 9);
            for i in 0..9 {
                assert_close(w[i], w[8 - i]);
            }
            assert_close(w[4], 1.0);
        }
    }

    #[test]
    fn endpoints_match_reference_definitions() {
        assert_close(WindowKind::Hamming.weights(8)[0], 0.08);
        assert_close(WindowKind::Hanning.weights(8)[0], 0.0);
        assert_close(WindowKind::Bartlett.weights(8)[7], 0.0);
        assert_close(WindowKind::Blackman.weights(8)[0], 0.0);
        assert_close(WindowKind::Kaiser.weights(8)[0], 1.0 / bessel_i0(KAISER_BETA));
    }

    #[test]
    fn single_sample_window_is_unity() {
        for kind in WindowKind::ALL {
            assert_eq!(kind.weights(1), vec![1.0]);
        }
    }

    #[test]
    fn bessel_series_matches_known_values() {
        assert_close(bessel_i0(0.0), 1.0);
        assert!((bessel_i0(1.0) - 1.266_065_877_752_008_4).abs() < 1e-12);
    }

    #[test]
    fn names_parse_case_insensitively_and_codes_round_trip() {
        assert_eq!("Hanning".parse::<WindowKind>().unwrap(), WindowKind::Hanning);
        for kind in WindowKind::ALL {
            assert_eq!(WindowKind::from_code(kind.code()), Some(kind));
        }
        assert!(matches!(
            "rectangular".parse::<WindowKind>(),
            Err(RadarError::Config(_))
        ));
        assert_eq!(WindowKind::from_code(0), None);
    }
}
