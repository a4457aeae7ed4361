//! Callsign prefix to country resolution with longest-prefix matching

use crate::models::{lookup_candidates, Coordinates, UNKNOWN};
use anyhow::Context;
use log::{debug, info, warn};
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("dx-spot-watcher/", env!("CARGO_PKG_VERSION"));

/// Prefixes known even when no table file can be loaded:
/// (prefix, country, lat, lon, continent)
const BUILTIN_PREFIXES: &[(&str, &str, f64, f64, &str)] = &[
    ("F", "France", 46.7, 2.3, "EU"),
    ("DL", "Fed. Rep. of Germany", 51.1, 10.3, "EU"),
    ("G", "England", 52.35, -1.17, "EU"),
    ("M", "England", 52.35, -1.17, "EU"),
    ("GM", "Scotland", 56.49, -4.2, "EU"),
    ("I", "Italy", 42.8, 12.5, "EU"),
    ("EA", "Spain", 40.3, -3.7, "EU"),
    ("EA8", "Canary Islands", 28.3, -16.6, "AF"),
    ("CT", "Portugal", 39.5, -8.0, "EU"),
    ("ON", "Belgium", 50.8, 4.4, "EU"),
    ("PA", "Netherlands", 52.2, 5.3, "EU"),
    ("LX", "Luxembourg", 49.8, 6.1, "EU"),
    ("K", "United States", 39.8, -98.6, "NA"),
    ("W", "United States", 39.8, -98.6, "NA"),
    ("N", "United States", 39.8, -98.6, "NA"),
    ("VE", "Canada", 56.1, -106.3, "NA"),
    ("VP2M", "Montserrat", 16.75, -62.2, "NA"),
    ("J3", "Grenada", 12.1, -61.7, "NA"),
    ("PY", "Brazil", -10.3, -53.1, "SA"),
    ("PY0F", "Fernando de Noronha", -3.85, -32.42, "SA"),
    ("LU", "Argentina", -38.4, -63.6, "SA"),
    ("JA", "Japan", 36.2, 138.25, "AS"),
    ("A4", "Oman", 21.47, 55.98, "AS"),
    ("4S", "Sri Lanka", 7.87, 80.77, "AS"),
    ("VK", "Australia", -25.0, 133.0, "OC"),
    ("ZS", "South Africa", -30.6, 22.9, "AF"),
    ("3Y", "Bouvet Island", -54.42, 3.36, "AF"),
    ("FT8W", "Crozet Island", -46.41, 51.77, "AF"),
];

#[derive(Debug, Error)]
pub enum PrefixTableError {
    #[error("prefix table has no usable rows")]
    Empty,
    #[error("prefix table too small: {found} prefixes, expected at least {minimum}")]
    TooSmall { found: usize, minimum: usize },
    #[error("failed to read prefix table: {0}")]
    Io(#[from] std::io::Error),
}

/// One prefix and the entity it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixEntry {
    pub prefix: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
    pub continent: Option<String>,
}

/// Result of resolving a callsign
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub country: String,
    pub coordinates: Option<Coordinates>,
    pub continent: Option<String>,
}

impl Resolution {
    pub fn unknown() -> Self {
        Self {
            country: UNKNOWN.to_string(),
            coordinates: None,
            continent: None,
        }
    }
}

impl From<&PrefixEntry> for Resolution {
    fn from(entry: &PrefixEntry) -> Self {
        Self {
            country: entry.country.clone(),
            coordinates: entry.coordinates,
            continent: entry.continent.clone(),
        }
    }
}

/// Flat prefix dictionary, immutable once built
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    entries: HashMap<String, PrefixEntry>,
    longest: usize,
}

impl PrefixTable {
    /// Parse a delimited prefix table.
    ///
    /// Accepts either `prefix,country[,lat,lon,continent]` rows or the
    /// country-files.com `cty.csv` layout, comma or semicolon separated.
    pub fn parse(text: &str) -> Result<Self, PrefixTableError> {
        let delimiter = detect_delimiter(text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut table = Self::default();
        let mut skipped = 0usize;
        for record in reader.records() {
            let Ok(record) = record else {
                skipped += 1;
                continue;
            };
            let fields: Vec<&str> = record.iter().collect();
            if is_cty_row(&fields) {
                table.insert_cty_row(&fields);
            } else if !table.insert_generic_row(&fields) {
                skipped += 1;
            }
        }

        if skipped > 0 {
            debug!("Skipped {} unusable prefix table rows", skipped);
        }
        if table.is_empty() {
            return Err(PrefixTableError::Empty);
        }
        Ok(table)
    }

    /// Parse, rejecting tables smaller than `min_entries` prefixes.
    /// Guards against swapping in a truncated download.
    pub fn load(text: &str, min_entries: usize) -> Result<Self, PrefixTableError> {
        let table = Self::parse(text)?;
        if table.len() < min_entries {
            return Err(PrefixTableError::TooSmall {
                found: table.len(),
                minimum: min_entries,
            });
        }
        Ok(table)
    }

    /// Small table of common prefixes for running without a table file
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (prefix, country, lat, lon, continent) in BUILTIN_PREFIXES {
            table.insert(PrefixEntry {
                prefix: prefix.to_string(),
                country: country.to_string(),
                coordinates: Some(Coordinates { lat: *lat, lon: *lon }),
                continent: Some(continent.to_string()),
            });
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, prefix: &str) -> Option<&PrefixEntry> {
        self.entries.get(prefix)
    }

    /// Resolve a callsign to its entity.
    ///
    /// Every lookup candidate is matched longest-prefix first; the longest
    /// match across candidates wins, earlier candidates winning ties.
    pub fn lookup(&self, callsign: &str) -> Resolution {
        let mut best: Option<&PrefixEntry> = None;
        for candidate in lookup_candidates(callsign) {
            if let Some(entry) = self.longest_match(&candidate) {
                if best.map_or(true, |b| entry.prefix.len() > b.prefix.len()) {
                    best = Some(entry);
                }
            }
        }
        best.map(Resolution::from).unwrap_or_else(Resolution::unknown)
    }

    fn longest_match(&self, candidate: &str) -> Option<&PrefixEntry> {
        let max = self.longest.min(candidate.len());
        (1..=max)
            .rev()
            .filter(|&n| candidate.is_char_boundary(n))
            .find_map(|n| self.entries.get(&candidate[..n]))
    }

    /// Insert unless the prefix is already known; first occurrence wins
    fn insert(&mut self, entry: PrefixEntry) -> bool {
        if entry.prefix.is_empty() || self.entries.contains_key(&entry.prefix) {
            return false;
        }
        self.longest = self.longest.max(entry.prefix.len());
        self.entries.insert(entry.prefix.clone(), entry);
        true
    }

    fn insert_generic_row(&mut self, fields: &[&str]) -> bool {
        let (Some(prefix), Some(country)) = (fields.first(), fields.get(1)) else {
            return false;
        };
        let prefix = normalize_prefix(prefix);
        if prefix.is_empty() || country.is_empty() {
            return false;
        }
        let coordinates = parse_coordinates(fields.get(2), fields.get(3), false);
        let continent = fields
            .get(4)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_uppercase());

        self.insert(PrefixEntry {
            prefix,
            country: country.to_string(),
            coordinates,
            continent,
        });
        true
    }

    fn insert_cty_row(&mut self, fields: &[&str]) {
        let country = fields[1].to_string();
        let continent = Some(fields[3].to_uppercase()).filter(|c| !c.is_empty());
        // cty.csv gives longitude positive west
        let coordinates = parse_coordinates(fields.get(6), fields.get(7), true);

        let primary = normalize_prefix(fields[0]);
        let aliases = fields
            .get(9)
            .map(|column| column.split_whitespace().map(normalize_alias).collect())
            .unwrap_or_else(Vec::new);

        for prefix in std::iter::once(primary).chain(aliases) {
            self.insert(PrefixEntry {
                prefix,
                country: country.clone(),
                coordinates,
                continent: continent.clone(),
            });
        }
    }
}

/// Semicolon only when the first data line clearly uses it; comma otherwise
fn detect_delimiter(text: &str) -> u8 {
    let first = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .unwrap_or_default();
    let semicolons = first.matches(';').count();
    let commas = first.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn is_cty_row(fields: &[&str]) -> bool {
    fields.len() >= 10 && fields[2].parse::<u32>().is_ok()
}

fn normalize_prefix(raw: &str) -> String {
    // '*' marks WAE-only entities in cty.csv
    raw.trim().trim_start_matches('*').to_uppercase()
}

/// `=K1ABC(4)[8]{..}` becomes `K1ABC`
fn normalize_alias(raw: &str) -> String {
    let raw = raw.trim_start_matches('=');
    let end = raw
        .find(['(', '[', '<', '{', '~', ';'])
        .unwrap_or(raw.len());
    raw[..end].to_uppercase()
}

fn parse_coordinates(lat: Option<&&str>, lon: Option<&&str>, west_positive: bool) -> Option<Coordinates> {
    let lat: f64 = lat?.parse().ok()?;
    let lon: f64 = lon?.parse().ok()?;
    let lon = if west_positive { -lon } else { lon };
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon))
        .then_some(Coordinates { lat, lon })
}

/// Prefix table shared between tasks.
///
/// The table is only ever replaced as a whole, so lookups never observe a
/// partially loaded table.
#[derive(Clone)]
pub struct SharedPrefixTable {
    table: Arc<RwLock<Arc<PrefixTable>>>,
    cache_path: Option<PathBuf>,
    min_entries: usize,
    client: Client,
}

impl SharedPrefixTable {
    pub fn new(table: PrefixTable) -> Self {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            table: Arc::new(RwLock::new(Arc::new(table))),
            cache_path: None,
            min_entries: 0,
            client,
        }
    }

    /// Where a successfully downloaded table is written
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_min_entries(mut self, min_entries: usize) -> Self {
        self.min_entries = min_entries;
        self
    }

    /// Startup path: local file, then download, then the built-in table
    pub async fn open(path: &Path, refresh_url: Option<&str>, min_entries: usize) -> Self {
        let shared = Self::new(PrefixTable::builtin())
            .with_cache_path(path)
            .with_min_entries(min_entries);

        match read_table_file(path, min_entries).await {
            Ok(table) => {
                info!("Loaded {} prefixes from {}", table.len(), path.display());
                shared.replace(table);
                return shared;
            }
            Err(e) => warn!("Prefix table {} unusable: {}", path.display(), e),
        }

        if let Some(url) = refresh_url {
            if shared.refresh(url).await {
                return shared;
            }
        }

        warn!("Using built-in prefix table ({} prefixes)", shared.len());
        shared
    }

    /// The table currently in use
    pub fn current(&self) -> Arc<PrefixTable> {
        match self.table.read() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn lookup(&self, callsign: &str) -> Resolution {
        self.current().lookup(callsign)
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Swap in a new table
    pub fn replace(&self, table: PrefixTable) {
        let table = Arc::new(table);
        match self.table.write() {
            Ok(mut current) => *current = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }

    /// Download a fresh table and swap it in.
    ///
    /// On any failure the current table stays in place and false is returned.
    pub async fn refresh(&self, url: &str) -> bool {
        let (table, text) = match download_table(&self.client, url, self.min_entries).await {
            Ok(downloaded) => downloaded,
            Err(e) => {
                warn!("Prefix table refresh from {} failed: {:#}", url, e);
                return false;
            }
        };

        info!("Downloaded {} prefixes from {}", table.len(), url);
        self.replace(table);

        if let Some(path) = &self.cache_path {
            if let Err(e) = write_cache(path, &text).await {
                warn!("Could not cache prefix table at {}: {}", path.display(), e);
            }
        }
        true
    }
}

async fn read_table_file(path: &Path, min_entries: usize) -> Result<PrefixTable, PrefixTableError> {
    let text = tokio::fs::read_to_string(path).await?;
    PrefixTable::load(&text, min_entries)
}

async fn download_table(
    client: &Client,
    url: &str,
    min_entries: usize,
) -> anyhow::Result<(PrefixTable, String)> {
    let text = client
        .get(url)
        .send()
        .await
        .context("request failed")?
        .error_for_status()
        .context("server returned an error")?
        .text()
        .await
        .context("failed to read response body")?;

    let table = PrefixTable::load(&text, min_entries).context("downloaded table rejected")?;
    Ok((table, text))
}

async fn write_cache(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn table(text: &str) -> PrefixTable {
        PrefixTable::parse(text).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dx-spot-watcher-{}-{}", std::process::id(), name))
    }

    /// Serve one HTTP response on a local port, returning its URL
    async fn serve_once(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/cty.csv", addr)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let t = table("F,France\nFT5,France Antarctic\n");
        assert_eq!(t.lookup("FT5ZM").country, "France Antarctic");
        assert_eq!(t.lookup("F5ABC").country, "France");
    }

    #[test]
    fn test_operating_suffix_stripped() {
        let t = table("F,France\nP5,North Korea\n");
        assert_eq!(t.lookup("F4ABC/P").country, "France");
    }

    #[test]
    fn test_portable_prefix_resolves() {
        let t = table("EA8,Canary Islands\nON,Belgium\nEA,Spain\n");
        assert_eq!(t.lookup("EA8/ON4ZZZ").country, "Canary Islands");
        assert_eq!(t.lookup("ON4ZZZ/EA8").country, "Canary Islands");
    }

    #[test]
    fn test_unknown_never_fails() {
        let t = table("F,France\n");
        assert_eq!(t.lookup("JA1XYZ"), Resolution::unknown());
        assert_eq!(t.lookup(""), Resolution::unknown());
        assert_eq!(t.lookup("///"), Resolution::unknown());
    }

    #[test]
    fn test_generic_columns() {
        let t = table("JA,Japan,36.2,138.25,as\nVK,Australia\n");
        let ja = t.get("JA").unwrap();
        assert_eq!(ja.coordinates, Some(Coordinates { lat: 36.2, lon: 138.25 }));
        assert_eq!(ja.continent.as_deref(), Some("AS"));
        assert_eq!(t.get("VK").unwrap().coordinates, None);
    }

    #[test]
    fn test_semicolon_delimiter() {
        let t = table("F;France;46.7;2.3\nDL;Germany;51.1;10.3\n");
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup("DL1XYZ").country, "Germany");
    }

    #[test]
    fn test_unclear_delimiter_defaults_to_comma() {
        let t = table("F,France;Metropolitan\n");
        assert_eq!(t.lookup("F4ABC").country, "France;Metropolitan");
    }

    #[test]
    fn test_first_duplicate_wins() {
        let t = table("F,France\nF,Not France\n");
        assert_eq!(t.len(), 1);
        assert_eq!(t.lookup("F4ABC").country, "France");
    }

    #[test]
    fn test_cty_layout_with_aliases() {
        let text = "1A,Sov Mil Order of Malta,246,EU,15,28,41.90,-12.43,-1.0,1A;\n\
                    3Y/b,Bouvet,24,AF,38,67,-54.42,-3.36,-1.0,3Y/B;\n\
                    JA,Japan,339,AS,25,45,36.40,-138.38,-9.0,JA JE JF =JD1YAA(27) 7J[45];\n";
        let t = table(text);
        assert_eq!(t.lookup("JF1ABC").country, "Japan");
        assert_eq!(t.lookup("7J1XYZ").country, "Japan");
        assert_eq!(t.lookup("JD1YAA").country, "Japan");
        let japan = t.lookup("JA1XYZ");
        assert_eq!(japan.continent.as_deref(), Some("AS"));
        assert_eq!(japan.coordinates, Some(Coordinates { lat: 36.40, lon: 138.38 }));
    }

    #[test]
    fn test_rejects_small_tables() {
        assert!(matches!(PrefixTable::parse("# nothing\n\n"), Err(PrefixTableError::Empty)));
        assert!(matches!(
            PrefixTable::load("F,France\n", 10),
            Err(PrefixTableError::TooSmall { found: 1, minimum: 10 })
        ));
    }

    #[test]
    fn test_builtin_table() {
        let t = PrefixTable::builtin();
        assert!(t.len() > 20);
        assert_eq!(t.lookup("JA1XYZ").country, "Japan");
        assert_eq!(t.lookup("VP2MAA").country, "Montserrat");
        assert_eq!(t.lookup("EA8/ON4ZZZ").country, "Canary Islands");
        assert!(t.lookup("F4ABC").coordinates.is_some());
    }

    #[test]
    fn test_replace_swaps_whole_table() {
        let shared = SharedPrefixTable::new(table("F,France\n"));
        let before = shared.current();
        shared.replace(table("JA,Japan\nW,United States\n"));
        assert_eq!(before.len(), 1);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.lookup("F4ABC").country, UNKNOWN);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_table() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let shared = SharedPrefixTable::new(table("F,France\n"));
        assert!(!shared.refresh(&format!("http://{}/cty.csv", addr)).await);
        assert_eq!(shared.lookup("F4ABC").country, "France");
    }

    #[tokio::test]
    async fn test_refresh_rejects_truncated_download() {
        let url = serve_once("JA,Japan\n".to_string()).await;
        let shared = SharedPrefixTable::new(table("F,France\n")).with_min_entries(3);
        assert!(!shared.refresh(&url).await);
        assert_eq!(shared.lookup("F4ABC").country, "France");
    }

    #[tokio::test]
    async fn test_refresh_swaps_and_caches() {
        let path = temp_path("refresh.csv");
        let body = "JA,Japan\nW,United States\nF,France\n".to_string();
        let url = serve_once(body.clone()).await;
        let shared = SharedPrefixTable::new(PrefixTable::default())
            .with_min_entries(3)
            .with_cache_path(&path);

        assert!(shared.refresh(&url).await);
        assert_eq!(shared.lookup("JA1XYZ").country, "Japan");
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), body);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_open_falls_back_to_builtin() {
        let shared = SharedPrefixTable::open(&temp_path("missing.csv"), None, 1).await;
        assert_eq!(shared.len(), PrefixTable::builtin().len());
    }

    #[tokio::test]
    async fn test_open_reads_local_file() {
        let path = temp_path("local.csv");
        tokio::fs::write(&path, "ZL,New Zealand\nVK,Australia\n").await.unwrap();
        let shared = SharedPrefixTable::open(&path, None, 2).await;
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.lookup("ZL1ABC").country, "New Zealand");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
