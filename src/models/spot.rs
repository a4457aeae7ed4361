use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Label used for any field that could not be resolved
pub const UNKNOWN: &str = "unknown";

/// Where a spot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotSource {
    Cluster,
    Simulated,
}

/// Amateur band a frequency falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    M160,
    M80,
    M60,
    M40,
    M30,
    M20,
    M17,
    M15,
    M12,
    M10,
    M6,
    M4,
    M2,
    Cm70,
    /// QO-100 geostationary satellite narrowband transponder
    Qo100,
    Unknown,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::M160 => "160m",
            Band::M80 => "80m",
            Band::M60 => "60m",
            Band::M40 => "40m",
            Band::M30 => "30m",
            Band::M20 => "20m",
            Band::M17 => "17m",
            Band::M15 => "15m",
            Band::M12 => "12m",
            Band::M10 => "10m",
            Band::M6 => "6m",
            Band::M4 => "4m",
            Band::M2 => "2m",
            Band::Cm70 => "70cm",
            Band::Qo100 => "QO-100",
            Band::Unknown => UNKNOWN,
        }
    }
}

/// Operating mode, as far as it can be inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Ft8,
    Ft4,
    Cw,
    Ssb,
    Rtty,
    Psk31,
    Jt65,
    Jt9,
    Wspr,
    Q65,
    Msk144,
    Fsk441,
    Digi,
    Fm,
    Am,
    Unknown,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Ft8 => "FT8",
            Mode::Ft4 => "FT4",
            Mode::Cw => "CW",
            Mode::Ssb => "SSB",
            Mode::Rtty => "RTTY",
            Mode::Psk31 => "PSK31",
            Mode::Jt65 => "JT65",
            Mode::Jt9 => "JT9",
            Mode::Wspr => "WSPR",
            Mode::Q65 => "Q65",
            Mode::Msk144 => "MSK144",
            Mode::Fsk441 => "FSK441",
            Mode::Digi => "DIGI",
            Mode::Fm => "FM",
            Mode::Am => "AM",
            Mode::Unknown => UNKNOWN,
        }
    }
}

macro_rules! label_impls {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }
    )*};
}

label_impls!(Band, Mode);

/// Approximate location of a country entity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpotError {
    #[error("frequency must be a positive number of kHz, got {0}")]
    Frequency(f64),
    #[error("callsign is empty")]
    EmptyCallsign,
}

/// A single DX spot, either heard on the cluster or simulated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spot {
    pub received_at: DateTime<Utc>,
    /// Time announced by the cluster (HHMM UTC); display only
    #[serde(serialize_with = "serialize_hhmm")]
    pub announced_time: NaiveTime,
    pub frequency_khz: f64,
    pub callsign: String,
    pub spotter_callsign: Option<String>,
    pub band: Band,
    pub mode: Mode,
    pub country: String,
    pub coordinates: Option<Coordinates>,
    pub continent: Option<String>,
    pub comment_text: String,
    pub source: SpotSource,
}

impl Spot {
    /// Create a spot received now with no enrichment yet.
    ///
    /// Band, mode and country start out as unknown; the parser fills them in
    /// before the spot is published.
    pub fn new(callsign: &str, frequency_khz: f64, source: SpotSource) -> Result<Self, SpotError> {
        if !frequency_khz.is_finite() || frequency_khz <= 0.0 {
            return Err(SpotError::Frequency(frequency_khz));
        }
        let callsign = callsign.trim().to_uppercase();
        if callsign.is_empty() {
            return Err(SpotError::EmptyCallsign);
        }

        let now = Utc::now();
        Ok(Self {
            received_at: now,
            announced_time: now.time().with_nanosecond(0).unwrap_or_else(|| now.time()),
            frequency_khz,
            callsign,
            spotter_callsign: None,
            band: Band::Unknown,
            mode: Mode::Unknown,
            country: UNKNOWN.to_string(),
            coordinates: None,
            continent: None,
            comment_text: String::new(),
            source,
        })
    }

    pub fn with_spotter(mut self, spotter: &str) -> Self {
        let spotter = spotter
            .trim()
            .trim_end_matches(['-', '#', ':', '>'])
            .to_uppercase();
        self.spotter_callsign = (!spotter.is_empty()).then_some(spotter);
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment_text = comment.trim().to_string();
        self
    }

    pub fn with_announced_time(mut self, time: NaiveTime) -> Self {
        self.announced_time = time;
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

fn serialize_hhmm<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H%MZ").to_string())
}
