use crate::config::SimulationConfig;
use crate::models::{Spot, SpotError, SpotSource};
use crate::services::cluster_session::SessionStatus;
use crate::services::prefix_table::SharedPrefixTable;
use crate::services::shutdown::Shutdown;
use crate::services::spot_parser::enrich;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const DEMO_CALLSIGNS: &[&str] = &[
    "F4ABC", "DL1XYZ", "JA1NQZ", "VK0DS", "PY0F", "A45XR", "ZS1ABC", "EA8/ON4ZZZ", "VP2MAA",
    "4STAB", "LX25GDG", "IW2NEF", "KI7QCF", "FT8WW", "3Y0J",
];

/// Sub-bands (kHz) the generator draws frequencies from
const DEMO_SUB_BANDS: &[(f64, f64)] = &[
    (7_020.0, 7_080.0),
    (10_130.0, 10_140.0),
    (14_000.0, 14_350.0),
    (18_068.0, 18_110.0),
    (21_010.0, 21_090.0),
    (24_890.0, 24_930.0),
    (28_000.0, 28_100.0),
    (50_300.0, 50_320.0),
    (10_489_540.0, 10_489_902.0),
];

/// Shortest spacing between synthetic spots
const MIN_INTERVAL: Duration = Duration::from_millis(1);

const DEMO_COMMENTS: &[&str] = &["FT8 CQ", "FT4", "CW 599 TU", "SSB 59", "RTTY test", "up 2", ""];

/// Generates synthetic spots while the cluster is unavailable
pub struct SimulatedFeed {
    config: SimulationConfig,
    prefixes: SharedPrefixTable,
    spots: mpsc::Sender<Spot>,
    session: watch::Receiver<SessionStatus>,
    shutdown: Shutdown,
}

impl SimulatedFeed {
    pub fn new(
        config: SimulationConfig,
        prefixes: SharedPrefixTable,
        spots: mpsc::Sender<Spot>,
        session: watch::Receiver<SessionStatus>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            prefixes,
            spots,
            session,
            shutdown,
        }
    }

    /// Build one plausible spot
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Result<Spot, SpotError> {
        let callsign = DEMO_CALLSIGNS.choose(rng).copied().unwrap_or("F4ABC");
        let (low, high) = DEMO_SUB_BANDS.choose(rng).copied().unwrap_or((14_000.0, 14_350.0));
        let frequency_khz = (rng.gen_range(low..=high) * 10.0).round() / 10.0;
        let comment = DEMO_COMMENTS.choose(rng).copied().unwrap_or_default();

        let spot = Spot::new(callsign, frequency_khz, SpotSource::Simulated)?.with_comment(comment);
        Ok(enrich(spot, &self.prefixes.current()))
    }

    fn should_emit(&self) -> bool {
        self.config.keep_running_when_connected || !self.session.borrow().connected()
    }

    pub async fn run(mut self) {
        tokio::select! {
            _ = self.shutdown.wait() => return,
            _ = tokio::time::sleep(self.config.grace) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        let mut active = false;
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let emit = self.should_emit();
            if emit != active {
                active = emit;
                if active {
                    info!("Simulated feed active, cluster not streaming");
                } else {
                    info!("Simulated feed paused, cluster streaming");
                }
            }
            if !emit {
                continue;
            }

            let spot = match self.generate(&mut rand::thread_rng()) {
                Ok(spot) => spot,
                Err(e) => {
                    debug!("Skipping simulated spot: {}", e);
                    continue;
                }
            };
            if self.spots.send(spot).await.is_err() {
                break;
            }
        }
        debug!("Simulated feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Band;
    use crate::services::classifier::mode_for;
    use crate::services::cluster_session::{Endpoint, SessionState};
    use crate::services::prefix_table::PrefixTable;
    use crate::services::shutdown;

    fn status(state: SessionState) -> SessionStatus {
        SessionStatus {
            state,
            endpoint: Endpoint::new("primary.test", 7373),
            last_error: None,
        }
    }

    fn config(keep_running_when_connected: bool) -> SimulationConfig {
        SimulationConfig {
            enabled: true,
            interval: Duration::from_millis(10),
            grace: Duration::from_millis(20),
            keep_running_when_connected,
        }
    }

    fn feed(
        keep: bool,
    ) -> (
        SimulatedFeed,
        mpsc::Receiver<Spot>,
        watch::Sender<SessionStatus>,
        shutdown::ShutdownTrigger,
    ) {
        let (spots_tx, spots_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(status(SessionState::Disconnected));
        let (trigger, shutdown) = shutdown::channel();
        let feed = SimulatedFeed::new(
            config(keep),
            SharedPrefixTable::new(PrefixTable::builtin()),
            spots_tx,
            status_rx,
            shutdown,
        );
        (feed, spots_rx, status_tx, trigger)
    }

    fn drain(rx: &mut mpsc::Receiver<Spot>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_generated_spots_are_plausible() {
        let (feed, _rx, _status, _trigger) = feed(false);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let spot = feed.generate(&mut rng).unwrap();
            assert_eq!(spot.source, SpotSource::Simulated);
            assert!(DEMO_CALLSIGNS.contains(&spot.callsign.as_str()));
            assert_ne!(spot.band, Band::Unknown, "{}", spot.frequency_khz);
            assert_eq!(spot.mode, mode_for(&spot.comment_text, spot.frequency_khz));
        }
    }

    #[tokio::test]
    async fn test_emits_while_disconnected() {
        let (feed, mut rx, _status, trigger) = feed(false);
        let task = tokio::spawn(feed.run());

        let spot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spot.source, SpotSource::Simulated);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pauses_while_streaming() {
        let (feed, mut rx, status_tx, trigger) = feed(false);
        let task = tokio::spawn(feed.run());

        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        status_tx.send_replace(status(SessionState::Streaming));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain(&mut rx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(drain(&mut rx), 0);

        // Cluster lost again: the fallback resumes
        status_tx.send_replace(status(SessionState::Failed));
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_keeps_running_when_configured() {
        let (feed, mut rx, status_tx, trigger) = feed(true);
        status_tx.send_replace(status(SessionState::Streaming));
        let task = tokio::spawn(feed.run());

        let spot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spot.source, SpotSource::Simulated);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_still_emits() {
        let (mut feed, mut rx, _status, trigger) = feed(false);
        feed.config.interval = Duration::ZERO;
        feed.config.grace = Duration::ZERO;
        let task = tokio::spawn(feed.run());

        let spot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spot.source, SpotSource::Simulated);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_grace() {
        let (mut feed, mut rx, _status, trigger) = feed(false);
        feed.config.grace = Duration::from_secs(3600);
        let task = tokio::spawn(feed.run());
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(drain(&mut rx), 0);
    }
}
