//! Band and mode classification from frequency and comment text

use crate::models::{Band, Mode};

/// Inclusive band edges in kHz
const BAND_PLAN: &[(f64, f64, Band)] = &[
    (1_800.0, 2_000.0, Band::M160),
    (3_500.0, 4_000.0, Band::M80),
    (5_351.5, 5_366.5, Band::M60),
    (7_000.0, 7_300.0, Band::M40),
    (10_100.0, 10_150.0, Band::M30),
    (14_000.0, 14_350.0, Band::M20),
    (18_068.0, 18_168.0, Band::M17),
    (21_000.0, 21_450.0, Band::M15),
    (24_890.0, 24_990.0, Band::M12),
    (28_000.0, 29_700.0, Band::M10),
    (50_000.0, 54_000.0, Band::M6),
    (70_000.0, 71_000.0, Band::M4),
    (144_000.0, 148_000.0, Band::M2),
    (430_000.0, 440_000.0, Band::Cm70),
    (10_489_540.0, 10_489_902.0, Band::Qo100),
];

/// Mode keywords recognised in spot comments
const MODE_KEYWORDS: &[(&str, Mode)] = &[
    ("FT8", Mode::Ft8),
    ("FT4", Mode::Ft4),
    ("CW", Mode::Cw),
    ("SSB", Mode::Ssb),
    ("USB", Mode::Ssb),
    ("LSB", Mode::Ssb),
    ("RTTY", Mode::Rtty),
    ("PSK31", Mode::Psk31),
    ("JT65", Mode::Jt65),
    ("JT9", Mode::Jt9),
    ("WSPR", Mode::Wspr),
    ("Q65", Mode::Q65),
    ("MSK144", Mode::Msk144),
    ("FSK441", Mode::Fsk441),
    ("DIGI", Mode::Digi),
    ("FM", Mode::Fm),
    ("AM", Mode::Am),
];

/// Sub-band windows (kHz) used when the comment names no mode.
/// Checked in order; the narrow digital windows come first.
const MODE_WINDOWS: &[(f64, f64, Mode)] = &[
    // FT8 dial frequencies
    (3_573.0, 3_575.0, Mode::Ft8),
    (7_074.0, 7_076.0, Mode::Ft8),
    (10_136.0, 10_138.0, Mode::Ft8),
    (14_074.0, 14_076.0, Mode::Ft8),
    (18_100.0, 18_102.0, Mode::Ft8),
    (21_074.0, 21_076.0, Mode::Ft8),
    (24_915.0, 24_917.0, Mode::Ft8),
    (28_074.0, 28_076.0, Mode::Ft8),
    (50_313.0, 50_314.0, Mode::Ft8),
    // FT4 dial frequencies
    (7_047.5, 7_049.5, Mode::Ft4),
    (14_080.0, 14_082.0, Mode::Ft4),
    (21_140.0, 21_142.0, Mode::Ft4),
    (14_070.0, 14_073.0, Mode::Psk31),
    // CW segments
    (7_000.0, 7_035.0, Mode::Cw),
    (14_000.0, 14_070.0, Mode::Cw),
    (21_000.0, 21_070.0, Mode::Cw),
    // Phone segments
    (7_180.0, 7_300.0, Mode::Ssb),
    (14_150.0, 14_350.0, Mode::Ssb),
    (21_200.0, 21_450.0, Mode::Ssb),
];

/// Band for a frequency in kHz, or `Band::Unknown` outside the band plan
pub fn band_for(frequency_khz: f64) -> Band {
    BAND_PLAN
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&frequency_khz))
        .map(|(_, _, band)| *band)
        .unwrap_or(Band::Unknown)
}

/// Infer the mode of a spot.
///
/// A mode named in the comment always wins over the frequency guess.
pub fn mode_for(comment: &str, frequency_khz: f64) -> Mode {
    mode_from_text(comment)
        .or_else(|| mode_from_frequency(frequency_khz))
        .unwrap_or(Mode::Unknown)
}

fn mode_from_text(comment: &str) -> Option<Mode> {
    comment
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            MODE_KEYWORDS
                .iter()
                .find(|(keyword, _)| token.eq_ignore_ascii_case(keyword))
                .map(|(_, mode)| *mode)
        })
}

fn mode_from_frequency(frequency_khz: f64) -> Option<Mode> {
    MODE_WINDOWS
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&frequency_khz))
        .map(|(_, _, mode)| *mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges_inclusive() {
        assert_eq!(band_for(14_000.0), Band::M20);
        assert_eq!(band_for(14_350.0), Band::M20);
        assert_ne!(band_for(13_999.0), Band::M20);
        assert_ne!(band_for(14_351.0), Band::M20);
    }

    #[test]
    fn test_band_plan_coverage() {
        assert_eq!(band_for(1_840.0), Band::M160);
        assert_eq!(band_for(3_573.0), Band::M80);
        assert_eq!(band_for(5_357.0), Band::M60);
        assert_eq!(band_for(7_074.0), Band::M40);
        assert_eq!(band_for(10_136.0), Band::M30);
        assert_eq!(band_for(18_100.0), Band::M17);
        assert_eq!(band_for(21_074.0), Band::M15);
        assert_eq!(band_for(24_915.0), Band::M12);
        assert_eq!(band_for(28_074.0), Band::M10);
        assert_eq!(band_for(50_313.0), Band::M6);
        assert_eq!(band_for(70_200.0), Band::M4);
        assert_eq!(band_for(144_300.0), Band::M2);
        assert_eq!(band_for(432_200.0), Band::Cm70);
        assert_eq!(band_for(10_489_750.0), Band::Qo100);
        assert_eq!(band_for(9_000.0), Band::Unknown);
        assert_eq!(band_for(0.0), Band::Unknown);
    }

    #[test]
    fn test_band_plan_does_not_overlap() {
        for pair in BAND_PLAN.windows(2) {
            assert!(pair[0].1 < pair[1].0, "{:?} overlaps {:?}", pair[0].2, pair[1].2);
        }
    }

    #[test]
    fn test_text_beats_frequency() {
        // 7000 kHz sits in the CW window
        assert_eq!(mode_for("FT8 CQ", 7_000.0), Mode::Ft8);
        assert_eq!(mode_for("", 7_000.0), Mode::Cw);
    }

    #[test]
    fn test_sideband_maps_to_ssb() {
        assert_eq!(mode_for("usb 59 tnx", 3_700.0), Mode::Ssb);
        assert_eq!(mode_for("LSB", 3_700.0), Mode::Ssb);
    }

    #[test]
    fn test_first_keyword_in_text_wins() {
        assert_eq!(mode_for("CW then RTTY", 14_080.0), Mode::Cw);
        assert_eq!(mode_for("up 2 RTTY/CW", 14_080.0), Mode::Rtty);
    }

    #[test]
    fn test_keywords_are_whole_tokens() {
        // "CQ" and "JAMES" must not be read as CW or AM
        assert_eq!(mode_for("CQ JAMES", 9_000.0), Mode::Unknown);
        assert_eq!(mode_for("tnx-fm!", 145_500.0), Mode::Fm);
        assert_eq!(mode_for("MSK144 meteor scatter", 50_260.0), Mode::Msk144);
    }

    #[test]
    fn test_frequency_windows() {
        assert_eq!(mode_for("", 14_074.5), Mode::Ft8);
        assert_eq!(mode_for("", 14_081.0), Mode::Ft4);
        assert_eq!(mode_for("", 14_071.0), Mode::Psk31);
        assert_eq!(mode_for("", 14_200.0), Mode::Ssb);
        assert_eq!(mode_for("", 14_110.0), Mode::Unknown);
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..3 {
            assert_eq!(mode_for("tnx QSO", 21_075.0), Mode::Ft8);
            assert_eq!(band_for(21_075.0), Band::M15);
        }
    }
}
