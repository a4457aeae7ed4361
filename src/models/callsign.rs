//! Callsign normalisation shared by prefix lookup and the watchlist

/// Operating suffixes that say how a station operates, not where
pub const OPERATING_SUFFIXES: &[&str] = &["/QRP", "/MM", "/AM", "/P", "/M"];

/// Uppercase, whitespace removed, operating suffix stripped.
///
/// `F4ABC/P` and `f4abc` both become `F4ABC`.
pub fn canonical_callsign(callsign: &str) -> String {
    let call: String = callsign
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    strip_operating_suffix(&call).to_string()
}

fn strip_operating_suffix(call: &str) -> &str {
    OPERATING_SUFFIXES
        .iter()
        .find_map(|suffix| call.strip_suffix(suffix))
        .unwrap_or(call)
}

fn is_operating_token(part: &str) -> bool {
    OPERATING_SUFFIXES.iter().any(|s| &s[1..] == part)
}

/// Candidate strings to resolve against the prefix table, most specific first.
///
/// Order: the full call, the call without its operating suffix, then both
/// halves of a single `/` split. Halves that are only an operating suffix or
/// a call-area digit carry no country information and are left out.
pub fn lookup_candidates(callsign: &str) -> Vec<String> {
    let full: String = callsign
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if full.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![full.clone()];
    let mut push = |candidate: &str| {
        if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_string());
        }
    };

    push(strip_operating_suffix(&full));

    let parts: Vec<&str> = full.split('/').collect();
    if parts.len() == 2 {
        for part in parts {
            if is_operating_token(part) || part.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            push(part);
        }
    }

    candidates
}

/// Whether `callsign` is on the watchlist, ignoring case and operating suffixes
pub fn matches_watchlist<S: AsRef<str>>(callsign: &str, watchlist: &[S]) -> bool {
    let wanted = canonical_callsign(callsign);
    !wanted.is_empty()
        && watchlist
            .iter()
            .any(|entry| canonical_callsign(entry.as_ref()) == wanted)
}

/// Remove the first watchlist entry equivalent to `callsign`.
///
/// Returns false when nothing matched.
pub fn remove_watchlist_entry(watchlist: &mut Vec<String>, callsign: &str) -> bool {
    let wanted = canonical_callsign(callsign);
    match watchlist
        .iter()
        .position(|entry| canonical_callsign(entry) == wanted)
    {
        Some(index) => {
            watchlist.remove(index);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_callsign() {
        assert_eq!(canonical_callsign("f4abc/p"), "F4ABC");
        assert_eq!(canonical_callsign(" G4XYZ/MM "), "G4XYZ");
        assert_eq!(canonical_callsign("W1AW/QRP"), "W1AW");
        assert_eq!(canonical_callsign("EA8/ON4ZZZ"), "EA8/ON4ZZZ");
        assert_eq!(canonical_callsign(""), "");
    }

    #[test]
    fn test_candidates_portable_prefix() {
        assert_eq!(
            lookup_candidates("EA8/ON4ZZZ"),
            vec!["EA8/ON4ZZZ", "EA8", "ON4ZZZ"]
        );
    }

    #[test]
    fn test_candidates_operating_suffix() {
        assert_eq!(lookup_candidates("F4ABC/P"), vec!["F4ABC/P", "F4ABC"]);
        assert_eq!(lookup_candidates("W6ABC/7"), vec!["W6ABC/7", "W6ABC"]);
        assert_eq!(lookup_candidates("JA1XYZ"), vec!["JA1XYZ"]);
        assert!(lookup_candidates("  ").is_empty());
    }

    #[test]
    fn test_matches_watchlist() {
        let watchlist = ["FT8WW", "3Y0J", "J38LD/P"];
        assert!(matches_watchlist("ft8ww", &watchlist));
        assert!(matches_watchlist("3Y0J/P", &watchlist));
        assert!(matches_watchlist("J38LD", &watchlist));
        assert!(!matches_watchlist("K1ABC", &watchlist));
        assert!(!matches_watchlist("", &watchlist));
    }

    #[test]
    fn test_remove_watchlist_entry() {
        let mut watchlist = vec!["FT8WW".to_string(), "3Y0J".to_string()];
        assert!(remove_watchlist_entry(&mut watchlist, "3y0j/m"));
        assert_eq!(watchlist, vec!["FT8WW".to_string()]);
        assert!(!remove_watchlist_entry(&mut watchlist, "3Y0J"));
    }
}
