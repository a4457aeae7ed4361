mod callsign;
mod spot;

pub use callsign::{
    canonical_callsign, lookup_candidates, matches_watchlist, remove_watchlist_entry,
    OPERATING_SUFFIXES,
};
pub use spot::{Band, Coordinates, Mode, Spot, SpotError, SpotSource, UNKNOWN};
