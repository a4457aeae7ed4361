use crate::services::cluster_session::Endpoint;
use configparser::ini::Ini;
use directories::ProjectDirs;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PRIMARY_HOST: &str = "dxcluster.f5len.org";
pub const DEFAULT_PRIMARY_PORT: u16 = 7373;
pub const DEFAULT_BACKUP_HOST: &str = "dxcluster.ham-radio.ch";
pub const DEFAULT_BACKUP_PORT: u16 = 7300;
pub const DEFAULT_REFRESH_URL: &str = "https://www.country-files.com/cty/cty.csv";

/// Separates login commands inside the single INI value
const COMMAND_SEPARATOR: char = '|';

/// Application settings
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub spots: SpotConfig,
    pub prefixes: PrefixConfig,
    pub simulation: SimulationConfig,
    pub watchlist: Vec<String>,
}

/// Cluster connection settings
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub primary: Endpoint,
    pub backup: Option<Endpoint>,
    /// Callsign sent at the login prompt
    pub identity: String,
    /// Sent one per line after the identity
    pub login_commands: Vec<String>,
    pub connect_timeout: Duration,
    pub login_prompt_timeout: Duration,
    pub idle_timeout: Duration,
    pub keepalive_command: Option<String>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            primary: Endpoint::new(DEFAULT_PRIMARY_HOST, DEFAULT_PRIMARY_PORT),
            backup: Some(Endpoint::new(DEFAULT_BACKUP_HOST, DEFAULT_BACKUP_PORT)),
            identity: "N0CALL".to_string(),
            login_commands: vec!["set/dx filter by_band all".to_string(), "sh/dx 50".to_string()],
            connect_timeout: Duration::from_secs(15),
            login_prompt_timeout: Duration::from_secs(4),
            idle_timeout: Duration::from_secs(60),
            keepalive_command: Some("sh/dx".to_string()),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// Spot retention
#[derive(Debug, Clone)]
pub struct SpotConfig {
    pub max_spots: usize,
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            max_spots: 500,
            max_age: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Callsign prefix table source
#[derive(Debug, Clone)]
pub struct PrefixConfig {
    pub table_path: PathBuf,
    pub refresh_url: Option<String>,
    /// `None` disables periodic refresh
    pub refresh_interval: Option<Duration>,
    /// Smaller tables are treated as truncated and rejected
    pub min_entries: usize,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            table_path: Config::data_dir()
                .map(|dir| dir.join("cty.csv"))
                .unwrap_or_else(|| PathBuf::from("cty.csv")),
            refresh_url: Some(DEFAULT_REFRESH_URL.to_string()),
            refresh_interval: Some(Duration::from_secs(7 * 24 * 3600)),
            min_entries: 100,
        }
    }
}

/// Synthetic spot generator
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Delay before the first synthetic spot
    pub grace: Duration,
    pub keep_running_when_connected: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(8),
            grace: Duration::from_secs(10),
            keep_running_when_connected: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            spots: SpotConfig::default(),
            prefixes: PrefixConfig::default(),
            simulation: SimulationConfig::default(),
            watchlist: vec!["FT8WW".to_string(), "3Y0J".to_string(), "J38LD".to_string()],
        }
    }
}

impl Config {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("org", "dxspot", "dx-spot-watcher")
    }

    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("settings.ini"))
    }

    fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Load config from `path` (or the default location), falling back to
    /// defaults for anything missing
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::config_path) else {
            return Self::default();
        };

        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        let mut ini = Ini::new();
        if let Err(e) = ini.load(&path) {
            warn!("Failed to read config {}: {}", path.display(), e);
            return Self::default();
        }

        info!("Loaded config from {}", path.display());
        Self::from_ini(&ini)
    }

    /// Parse config from INI text
    pub fn parse(text: &str) -> Self {
        let mut ini = Ini::new();
        if let Err(e) = ini.read(text.to_string()) {
            warn!("Failed to parse config: {}", e);
            return Self::default();
        }
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Self {
        let defaults = Self::default();

        let cluster = {
            let d = defaults.cluster;
            let primary = Endpoint::new(
                ini.get("cluster", "primary_host")
                    .unwrap_or_else(|| d.primary.host.clone()),
                port(ini, "cluster", "primary_port").unwrap_or(d.primary.port),
            );
            let backup = match ini.get("cluster", "backup_host") {
                Some(host) if host.trim().is_empty() => None,
                Some(host) => Some(Endpoint::new(
                    host,
                    port(ini, "cluster", "backup_port").unwrap_or(DEFAULT_BACKUP_PORT),
                )),
                None => d.backup,
            };
            ClusterConfig {
                primary,
                backup,
                identity: ini
                    .get("cluster", "identity")
                    .map(|call| call.trim().to_uppercase())
                    .filter(|call| !call.is_empty())
                    .unwrap_or(d.identity),
                login_commands: ini
                    .get("cluster", "login_commands")
                    .map(|value| split_list(&value, COMMAND_SEPARATOR))
                    .unwrap_or(d.login_commands),
                connect_timeout: seconds(ini, "cluster", "connect_timeout_seconds")
                    .unwrap_or(d.connect_timeout),
                login_prompt_timeout: seconds(ini, "cluster", "login_prompt_timeout_seconds")
                    .unwrap_or(d.login_prompt_timeout),
                idle_timeout: seconds(ini, "cluster", "idle_timeout_seconds")
                    .unwrap_or(d.idle_timeout),
                keepalive_command: match ini.get("cluster", "keepalive_command") {
                    Some(command) if command.trim().is_empty() => None,
                    Some(command) => Some(command.trim().to_string()),
                    None => d.keepalive_command,
                },
                backoff_initial: seconds(ini, "cluster", "backoff_initial_seconds")
                    .unwrap_or(d.backoff_initial),
                backoff_max: seconds(ini, "cluster", "backoff_max_seconds")
                    .unwrap_or(d.backoff_max),
            }
        };

        let spots = SpotConfig {
            max_spots: ini
                .getuint("spots", "max_spots")
                .ok()
                .flatten()
                .map(|n| n as usize)
                .unwrap_or(defaults.spots.max_spots),
            max_age: ini
                .getuint("spots", "max_age_minutes")
                .ok()
                .flatten()
                .and_then(|m| m.checked_mul(60))
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.spots.max_age),
            sweep_interval: seconds(ini, "spots", "sweep_interval_seconds")
                .unwrap_or(defaults.spots.sweep_interval),
        };

        let prefixes = {
            let d = defaults.prefixes;
            let refresh_interval = match ini.getuint("prefixes", "refresh_interval_hours").ok().flatten() {
                Some(0) => None,
                Some(hours) => hours
                    .checked_mul(3600)
                    .map(Duration::from_secs)
                    .or(d.refresh_interval),
                None => d.refresh_interval,
            };
            PrefixConfig {
                table_path: ini
                    .get("prefixes", "table_path")
                    .map(PathBuf::from)
                    .unwrap_or(d.table_path),
                refresh_url: match ini.get("prefixes", "refresh_url") {
                    Some(url) if url.trim().is_empty() => None,
                    Some(url) => Some(url),
                    None => d.refresh_url,
                },
                refresh_interval,
                min_entries: ini
                    .getuint("prefixes", "min_entries")
                    .ok()
                    .flatten()
                    .map(|n| n as usize)
                    .unwrap_or(d.min_entries),
            }
        };

        let simulation = {
            let d = defaults.simulation;
            SimulationConfig {
                enabled: ini
                    .getbool("simulation", "enabled")
                    .ok()
                    .flatten()
                    .unwrap_or(d.enabled),
                interval: seconds(ini, "simulation", "interval_seconds").unwrap_or(d.interval),
                // Zero is fine here: no grace period
                grace: ini
                    .getuint("simulation", "grace_seconds")
                    .ok()
                    .flatten()
                    .map(Duration::from_secs)
                    .unwrap_or(d.grace),
                keep_running_when_connected: ini
                    .getbool("simulation", "keep_running_when_connected")
                    .ok()
                    .flatten()
                    .unwrap_or(d.keep_running_when_connected),
            }
        };

        let watchlist = ini
            .get("watchlist", "calls")
            .map(|value| {
                split_list(&value, ',')
                    .into_iter()
                    .map(|call| call.to_uppercase())
                    .collect()
            })
            .unwrap_or(defaults.watchlist);

        Self {
            cluster,
            spots,
            prefixes,
            simulation,
            watchlist,
        }
    }
}

/// A strictly positive number of seconds; zero falls back to the default
fn seconds(ini: &Ini, section: &str, key: &str) -> Option<Duration> {
    ini.getuint(section, key)
        .ok()
        .flatten()
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
}

fn port(ini: &Ini, section: &str, key: &str) -> Option<u16> {
    ini.getuint(section, key)
        .ok()
        .flatten()
        .and_then(|p| u16::try_from(p).ok())
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
