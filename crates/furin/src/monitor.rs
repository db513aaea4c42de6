//! The polling loop: tick, fetch, compare, maybe ring.
//!
//! Lifecycle is idle -> check -> notify -> sleep, driven by a tokio
//! interval and a shutdown watch channel. A failed fetch is logged and
//! skipped; it never produces a phantom 0.0 m/s reading.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::chime::Notifier;
use crate::config::PollConfig;
use crate::location::{Place, ResolvedLocation};
use crate::weather::{ApiError, CurrentConditions, WeatherClient};

/// Anything that can report current conditions for a place. Lets tests
/// drive the monitor without the network.
#[async_trait::async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, place: &Place) -> Result<CurrentConditions, ApiError>;
}

#[async_trait::async_trait]
impl WeatherSource for WeatherClient {
    async fn current(&self, place: &Place) -> Result<CurrentConditions, ApiError> {
        WeatherClient::current(self, place).await
    }
}

/// Drives the check loop for one location.
pub struct WindMonitor<S, N> {
    source: S,
    notifier: N,
    location: ResolvedLocation,
    threshold_mps: f64,
    interval: Duration,
    consecutive_failures: u32,
}

impl<S: WeatherSource, N: Notifier> WindMonitor<S, N> {
    pub fn new(source: S, notifier: N, location: ResolvedLocation, poll: &PollConfig) -> Self {
        Self {
            source,
            notifier,
            location,
            threshold_mps: poll.threshold_mps,
            interval: Duration::from_secs(poll.interval_secs),
            consecutive_failures: 0,
        }
    }

    pub fn is_windy(&self, conditions: &CurrentConditions) -> bool {
        exceeds_threshold(conditions.wind_speed_mps, self.threshold_mps)
    }

    /// One poll cycle. Returns the reading when the fetch succeeded;
    /// a failed fetch is logged and skipped, never evaluated.
    pub async fn check(&mut self) -> Option<CurrentConditions> {
        log::debug!("Checking wind in {}...", self.location.label());
        let conditions = match self.source.current(&self.location.place).await {
            Ok(conditions) => conditions,
            Err(e) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "Weather check failed ({} in a row): {}",
                    self.consecutive_failures,
                    e
                );
                return None;
            }
        };
        self.consecutive_failures = 0;

        let gust = conditions
            .wind_gust_mps
            .map(|g| format!(", gusting {:.1}", g))
            .unwrap_or_default();
        log::info!(
            "Wind in {}: {:.1} m/s{}",
            self.location.label(),
            conditions.wind_speed_mps,
            gust
        );

        if self.is_windy(&conditions) {
            log::info!(
                "Windy! {:.1} m/s >= {:.1} m/s *DING*",
                conditions.wind_speed_mps,
                self.threshold_mps
            );
            if let Err(e) = self.notifier.ring(&conditions).await {
                log::warn!("Could not ring the chime: {}", e);
            }
        } else {
            log::debug!("Calm ({:.1} m/s)", conditions.wind_speed_mps);
        }
        Some(conditions)
    }

    /// Run until the shutdown channel fires. The first check happens
    /// immediately; a slow cycle delays the next tick instead of
    /// bursting catch-up checks.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<()>) {
        log::info!(
            "Watching wind in {} (threshold {} m/s, every {}s)",
            self.location.label(),
            self.threshold_mps,
            self.interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    log::debug!("Wind monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.check().await;
                }
            }
        }
    }
}

/// The one decision in this whole crate.
fn exceeds_threshold(wind_speed_mps: f64, threshold_mps: f64) -> bool {
    wind_speed_mps >= threshold_mps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chime::ChimeError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn conditions(speed: f64) -> CurrentConditions {
        CurrentConditions {
            wind_speed_mps: speed,
            wind_gust_mps: None,
            wind_deg: None,
            temperature_c: None,
            description: None,
            station: None,
        }
    }

    fn here() -> ResolvedLocation {
        ResolvedLocation {
            place: Place::City("Testville".to_string()),
            city: Some("Testville".to_string()),
            country: None,
        }
    }

    struct ScriptedSource {
        readings: Mutex<VecDeque<Result<CurrentConditions, ApiError>>>,
    }

    impl ScriptedSource {
        fn new(readings: Vec<Result<CurrentConditions, ApiError>>) -> Self {
            Self {
                readings: Mutex::new(readings.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl WeatherSource for ScriptedSource {
        async fn current(&self, _place: &Place) -> Result<CurrentConditions, ApiError> {
            self.readings
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Http("script exhausted".to_string())))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        rings: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for Arc<CountingNotifier> {
        async fn ring(&self, _conditions: &CurrentConditions) -> Result<(), ChimeError> {
            self.rings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn threshold_comparison_is_inclusive() {
        assert!(exceeds_threshold(5.0, 5.0));
        assert!(exceeds_threshold(5.1, 5.0));
        assert!(!exceeds_threshold(4.9, 5.0));
        assert!(!exceeds_threshold(0.0, 5.0));
    }

    #[tokio::test]
    async fn windy_reading_rings() {
        let notifier = Arc::new(CountingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(conditions(6.0))]);
        let mut monitor = WindMonitor::new(source, notifier.clone(), here(), &PollConfig::default());
        let reading = monitor.check().await;
        assert!(reading.is_some());
        assert_eq!(notifier.rings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn calm_reading_stays_quiet() {
        let notifier = Arc::new(CountingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(conditions(1.2))]);
        let mut monitor = WindMonitor::new(source, notifier.clone(), here(), &PollConfig::default());
        assert!(monitor.check().await.is_some());
        assert_eq!(notifier.rings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_skipped_not_zeroed() {
        let notifier = Arc::new(CountingNotifier::default());
        let source = ScriptedSource::new(vec![
            Err(ApiError::Http("connection refused".to_string())),
            Ok(conditions(6.0)),
        ]);
        let mut monitor = WindMonitor::new(source, notifier.clone(), here(), &PollConfig::default());

        // The failure yields no reading and no ring.
        assert!(monitor.check().await.is_none());
        assert_eq!(monitor.consecutive_failures, 1);
        assert_eq!(notifier.rings.load(Ordering::SeqCst), 0);

        // Recovery resets the failure count and evaluates normally.
        assert!(monitor.check().await.is_some());
        assert_eq!(monitor.consecutive_failures, 0);
        assert_eq!(notifier.rings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ring_error_does_not_abort_the_check() {
        struct BrokenNotifier;
        #[async_trait::async_trait]
        impl Notifier for BrokenNotifier {
            async fn ring(&self, _c: &CurrentConditions) -> Result<(), ChimeError> {
                Err(ChimeError::Device("no output device".to_string()))
            }
        }
        let source = ScriptedSource::new(vec![Ok(conditions(9.0))]);
        let mut monitor = WindMonitor::new(source, BrokenNotifier, here(), &PollConfig::default());
        assert!(monitor.check().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_shutdown() {
        let notifier = Arc::new(CountingNotifier::default());
        let source = ScriptedSource::new(vec![Ok(conditions(2.0))]);
        let monitor = WindMonitor::new(
            source,
            notifier.clone(),
            here(),
            &PollConfig {
                interval_secs: 600,
                threshold_mps: 5.0,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(monitor.run(shutdown_rx));
        // Let the immediate first tick happen, then signal.
        tokio::task::yield_now().await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop on shutdown")
            .unwrap();
    }
}
