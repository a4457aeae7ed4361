//! Parsing of cluster announcement lines into enriched spots

use crate::models::{Spot, SpotError, SpotSource};
use crate::services::classifier::{band_for, mode_for};
use crate::services::prefix_table::{PrefixTable, SharedPrefixTable};
use chrono::NaiveTime;
use regex::Regex;
use thiserror::Error;

/// Frequencies below this are MHz and get scaled to kHz.
///
/// Clusters announce kHz (`14074.0`), but some sources send MHz
/// (`14.074`). No amateur allocation handled here sits below 1000 kHz, so a
/// value in `[1, 1000)` can only be MHz.
pub const MHZ_INPUT_CEILING: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("not a DX announcement")]
    NotASpot,
    #[error("unreadable frequency {0:?}")]
    Frequency(String),
    #[error("invalid spot: {0}")]
    Invalid(#[from] SpotError),
}

/// Turns one line of cluster output into a spot
pub trait SpotParse: Send + Sync {
    fn parse(&self, line: &str, source: SpotSource) -> Result<Spot, ParseFailure>;
}

/// Parser for the classic `DX de SPOTTER: FREQ CALL comment HHMMZ` line
pub struct DxSpotParser {
    prefixes: SharedPrefixTable,
    line_regex: Regex,
    time_regex: Regex,
}

impl DxSpotParser {
    pub fn new(prefixes: SharedPrefixTable) -> Self {
        Self {
            prefixes,
            line_regex: Regex::new(
                r"(?i)^DX de\s+([A-Z0-9/#-]+)\s*[:>]?\s+(\d+(?:\.\d+)?)\s+([A-Z0-9/]+)(?:\s+(.*?))?\s*$",
            )
            .expect("Invalid regex"),
            time_regex: Regex::new(r"\b([0-2]\d)([0-5]\d)Z\b").expect("Invalid regex"),
        }
    }

    /// Split the trailing `HHMMZ` token off the comment, if there is one
    fn split_time<'a>(&self, tail: &'a str) -> (Option<NaiveTime>, &'a str) {
        let last = self
            .time_regex
            .captures_iter(tail)
            .filter_map(|caps| {
                let (whole, hour, minute) = (caps.get(0)?, caps.get(1)?, caps.get(2)?);
                let time = NaiveTime::from_hms_opt(
                    hour.as_str().parse().ok()?,
                    minute.as_str().parse().ok()?,
                    0,
                )?;
                Some((whole, time))
            })
            .last();

        match last {
            Some((whole, time)) if whole.end() == tail.len() => (Some(time), tail[..whole.start()].trim_end()),
            Some((_, time)) => (Some(time), tail),
            None => (None, tail),
        }
    }
}

impl SpotParse for DxSpotParser {
    fn parse(&self, line: &str, source: SpotSource) -> Result<Spot, ParseFailure> {
        let line = line.trim();
        let caps = self.line_regex.captures(line).ok_or(ParseFailure::NotASpot)?;
        let (Some(spotter), Some(freq), Some(call)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            return Err(ParseFailure::NotASpot);
        };

        let raw: f64 = freq
            .as_str()
            .parse()
            .map_err(|_| ParseFailure::Frequency(freq.as_str().to_string()))?;
        let frequency_khz = normalize_frequency_khz(raw);

        let tail = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let (time, comment) = self.split_time(tail);

        let mut spot = Spot::new(call.as_str(), frequency_khz, source)?
            .with_spotter(spotter.as_str())
            .with_comment(comment);
        if let Some(time) = time {
            spot = spot.with_announced_time(time);
        }

        Ok(enrich(spot, &self.prefixes.current()))
    }
}

/// Normalise a raw frequency to kHz using [`MHZ_INPUT_CEILING`]
pub fn normalize_frequency_khz(raw: f64) -> f64 {
    if (1.0..MHZ_INPUT_CEILING).contains(&raw) {
        raw * 1000.0
    } else {
        raw
    }
}

/// Fill in band, mode and country details for a spot
pub fn enrich(mut spot: Spot, prefixes: &PrefixTable) -> Spot {
    let resolution = prefixes.lookup(&spot.callsign);
    spot.band = band_for(spot.frequency_khz);
    spot.mode = mode_for(&spot.comment_text, spot.frequency_khz);
    spot.country = resolution.country;
    spot.coordinates = resolution.coordinates;
    spot.continent = resolution.continent;
    spot
}
