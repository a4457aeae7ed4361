use crate::config::Config;
use crate::models::{matches_watchlist, Spot, SpotSource};
use crate::services::cluster_session::{
    ClusterSession, Connector, SessionState, SessionStatus, TcpConnector,
};
use crate::services::prefix_table::SharedPrefixTable;
use crate::services::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::services::simulated_feed::SimulatedFeed;
use crate::services::spot_parser::{DxSpotParser, SpotParse};
use crate::services::spot_store::SpotStore;
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Spots buffered between producers and the store writer
const SPOT_CHANNEL_CAPACITY: usize = 256;

/// Floor for the eviction sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of the pipeline for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub connected: bool,
    pub state: SessionState,
    pub current_endpoint: String,
    pub last_error: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub cluster_spot_count: u64,
    pub simulated_spot_count: u64,
    pub prefix_count: usize,
}

/// Owns every background task of the spot pipeline
pub struct Supervisor {
    store: SpotStore,
    prefixes: SharedPrefixTable,
    session: watch::Receiver<SessionStatus>,
    watchlist: Arc<Vec<String>>,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Load the prefix table and start against the real cluster
    pub async fn launch(config: Config) -> Self {
        let prefixes = SharedPrefixTable::open(
            &config.prefixes.table_path,
            config.prefixes.refresh_url.as_deref(),
            config.prefixes.min_entries,
        )
        .await;
        Self::start(config, prefixes, Arc::new(TcpConnector))
    }

    /// Spawn the session, feed, store writer, eviction sweep and refresh tasks
    pub fn start(config: Config, prefixes: SharedPrefixTable, connector: Arc<dyn Connector>) -> Self {
        let store = SpotStore::new(config.spots.max_spots);
        let (trigger, shutdown) = shutdown::channel();
        let (spots_tx, spots_rx) = mpsc::channel(SPOT_CHANNEL_CAPACITY);
        let watchlist = Arc::new(config.watchlist.clone());

        let parser: Arc<dyn SpotParse> = Arc::new(DxSpotParser::new(prefixes.clone()));
        let session = ClusterSession::new(
            config.cluster.clone(),
            connector,
            parser,
            spots_tx.clone(),
            shutdown.clone(),
        );
        let session_status = session.subscribe();

        let mut tasks = vec![tokio::spawn(session.run())];

        if config.simulation.enabled {
            let feed = SimulatedFeed::new(
                config.simulation.clone(),
                prefixes.clone(),
                spots_tx.clone(),
                session_status.clone(),
                shutdown.clone(),
            );
            tasks.push(tokio::spawn(feed.run()));
        }
        // The pump stops once every producer has gone
        drop(spots_tx);

        tasks.push(tokio::spawn(pump(
            spots_rx,
            store.clone(),
            session_status.clone(),
            config.simulation.keep_running_when_connected,
            watchlist.clone(),
        )));
        tasks.push(tokio::spawn(sweep(
            store.clone(),
            config.spots.max_age,
            config.spots.sweep_interval,
            shutdown.clone(),
        )));

        if let (Some(url), Some(interval)) = (
            config.prefixes.refresh_url.clone(),
            config.prefixes.refresh_interval,
        ) {
            tasks.push(tokio::spawn(refresh_prefixes(
                prefixes.clone(),
                url,
                interval,
                shutdown,
            )));
        }

        info!(
            "Spot pipeline started: cluster {}, simulation {}",
            config.cluster.primary,
            if config.simulation.enabled { "on" } else { "off" }
        );

        Self {
            store,
            prefixes,
            session: session_status,
            watchlist,
            trigger,
            tasks,
        }
    }

    /// Newest spots first, at most `limit`
    pub fn recent_spots(&self, limit: Option<usize>) -> Vec<Spot> {
        self.store.recent(limit)
    }

    pub fn status(&self) -> ClusterStatus {
        let session = self.session.borrow().clone();
        ClusterStatus {
            connected: session.connected(),
            state: session.state,
            current_endpoint: session.endpoint.to_string(),
            last_error: session.last_error,
            last_update_time: self.store.last_insert(SpotSource::Cluster),
            cluster_spot_count: self.store.inserted_total(SpotSource::Cluster),
            simulated_spot_count: self.store.inserted_total(SpotSource::Simulated),
            prefix_count: self.prefixes.len(),
        }
    }

    pub fn prefixes(&self) -> &SharedPrefixTable {
        &self.prefixes
    }

    pub fn store(&self) -> &SpotStore {
        &self.store
    }

    /// Stored spots whose callsign is on the watchlist, newest first
    pub fn watchlist_hits(&self) -> Vec<Spot> {
        self.store
            .snapshot()
            .into_iter()
            .filter(|spot| matches_watchlist(&spot.callsign, &self.watchlist))
            .collect()
    }

    /// Watch session state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.session.clone()
    }

    /// Stop every task and wait for them to finish
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }
        info!("Spot pipeline stopped");
    }
}

/// Single writer into the store
async fn pump(
    mut spots: mpsc::Receiver<Spot>,
    store: SpotStore,
    session: watch::Receiver<SessionStatus>,
    keep_simulated_when_connected: bool,
    watchlist: Arc<Vec<String>>,
) {
    while let Some(spot) = spots.recv().await {
        if spot.source == SpotSource::Simulated
            && !keep_simulated_when_connected
            && session.borrow().connected()
        {
            trace!("Dropping simulated spot for {} while streaming", spot.callsign);
            continue;
        }

        if spot.source == SpotSource::Cluster && matches_watchlist(&spot.callsign, &watchlist) {
            info!(
                "Watchlist: {} on {} kHz ({}, {}) by {}",
                spot.callsign,
                spot.frequency_khz,
                spot.mode,
                spot.country,
                spot.spotter_callsign.as_deref().unwrap_or("?")
            );
        }

        store.insert_front(spot);
    }
    debug!("Spot pump stopped");
}

async fn sweep(store: SpotStore, max_age: Duration, interval: Duration, mut shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }
        let removed = store.evict_older_than(max_age);
        if removed > 0 {
            debug!("Evicted {} spots older than {:?}", removed, max_age);
        }
    }
}

async fn refresh_prefixes(
    prefixes: SharedPrefixTable,
    url: String,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    // The table was loaded at startup; first refresh is one interval out
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }
        if !prefixes.refresh(&url).await {
            info!("Keeping current prefix table ({} prefixes)", prefixes.len());
        }
    }
}
