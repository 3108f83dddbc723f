use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    time::Duration as StdDuration,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

use crate::{utils::clock::Clock, window_api::IdleSource};

/// Shared timestamp of the last physical input. Input callbacks write into it from their own
/// thread, the tracker reads and resets it every tick. Last write wins.
#[derive(Clone, Debug)]
pub struct IdleDetector {
    last_input_ms: Arc<AtomicI64>,
}

impl IdleDetector {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_input_ms: Arc::new(AtomicI64::new(now.timestamp_millis())),
        }
    }

    /// Called by input listeners on every move, click, scroll or key press.
    pub fn record_input(&self, at: DateTime<Utc>) {
        self.last_input_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Like [IdleDetector::record_input] but never moves the last input back in time, so a
    /// reset done after an idle report sticks while the platform keeps reporting older input.
    pub fn observe_input(&self, at: DateTime<Utc>) {
        self.last_input_ms
            .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn reset(&self, at: DateTime<Utc>) {
        self.record_input(at)
    }

    pub fn last_input(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_input_ms.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_input()
    }
}

pub struct IdleEvaluator {
    threshold: Duration,
}

impl IdleEvaluator {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_minutes(threshold_m: u32) -> Self {
        Self::new(Duration::minutes(threshold_m.into()))
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_idle(&self, elapsed: Duration) -> bool {
        self.threshold < elapsed
    }
}

/// Source of physical input events.
#[cfg_attr(test, mockall::automock)]
pub trait InputListener: Send {
    /// Starts forwarding input into `detector`. Returns `false` when input can't be observed on
    /// this platform, in which case idle detection is disabled.
    fn start(&mut self, detector: IdleDetector) -> Result<bool>;

    fn stop(&mut self);
}

pub struct NoopInputListener;

impl InputListener for NoopInputListener {
    fn start(&mut self, _detector: IdleDetector) -> Result<bool> {
        Ok(false)
    }

    fn stop(&mut self) {}
}

/// Polls the platform idle time from a background thread.
pub struct PolledInputListener {
    source: Option<Box<dyn IdleSource>>,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
    stop: Option<mpsc::Sender<()>>,
}

impl PolledInputListener {
    pub fn new(source: Box<dyn IdleSource>, clock: Arc<dyn Clock>, interval: StdDuration) -> Self {
        Self {
            source: Some(source),
            clock,
            interval,
            stop: None,
        }
    }
}

fn observe(
    source: &mut Box<dyn IdleSource>,
    clock: &dyn Clock,
    detector: &IdleDetector,
) -> Result<()> {
    let idle = Duration::from_std(source.idle_time()?)?;
    detector.observe_input(clock.time() - idle);
    Ok(())
}

impl InputListener for PolledInputListener {
    /// Queries the source once up front. An error there means the source doesn't work at all.
    fn start(&mut self, detector: IdleDetector) -> Result<bool> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("Idle source was already started"))?;
        observe(&mut source, self.clock.as_ref(), &detector)?;

        let (stop, stopped) = mpsc::channel::<()>();
        let clock = self.clock.clone();
        let interval = self.interval;
        std::thread::Builder::new()
            .name("onloq-idle".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = observe(&mut source, clock.as_ref(), &detector) {
                            error!("Failed to query idle time {e:?}");
                        }
                    }
                    _ => break,
                }
            })?;
        self.stop = Some(stop);
        info!("Polling platform idle time every {interval:?}");
        Ok(true)
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread up.
        self.stop.take();
    }
}

#[cfg(feature = "input")]
pub use rdev_listener::RdevInputListener;

#[cfg(feature = "input")]
mod rdev_listener {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use anyhow::Result;
    use chrono::Utc;
    use rdev::EventType;
    use tracing::{error, info};

    use super::{IdleDetector, InputListener};

    /// Global input hook based on `rdev`. The hook can't be removed once installed, so stopping
    /// only detaches it from the detector.
    #[derive(Default)]
    pub struct RdevInputListener {
        active: Arc<AtomicBool>,
        started: bool,
    }

    impl InputListener for RdevInputListener {
        fn start(&mut self, detector: IdleDetector) -> Result<bool> {
            self.active.store(true, Ordering::Relaxed);
            if self.started {
                return Ok(true);
            }

            let active = self.active.clone();
            std::thread::Builder::new()
                .name("onloq-input".into())
                .spawn(move || {
                    let result = rdev::listen(move |event| {
                        if !active.load(Ordering::Relaxed) {
                            return;
                        }
                        match event.event_type {
                            EventType::MouseMove { .. }
                            | EventType::ButtonPress(_)
                            | EventType::Wheel { .. }
                            | EventType::KeyPress(_)
                            | EventType::KeyRelease(_) => detector.record_input(Utc::now()),
                            EventType::ButtonRelease(_) => (),
                        }
                    });
                    if let Err(e) = result {
                        error!("Input listener stopped {e:?}");
                    }
                })?;
            self.started = true;
            info!("Started input listener");
            Ok(true)
        }

        fn stop(&mut self) {
            self.active.store(false, Ordering::Relaxed);
        }
    }
}

/// Picks the input listener available in this build. The platform idle time is preferred, a
/// global input hook is the fallback.
pub fn default_input_listener(
    idle_source: Option<Box<dyn IdleSource>>,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
) -> Box<dyn InputListener> {
    if let Some(source) = idle_source {
        return Box::new(PolledInputListener::new(source, clock, interval));
    }
    cfg_if::cfg_if! {
        if #[cfg(feature = "input")] {
            Box::new(RdevInputListener::default())
        } else {
            Box::new(NoopInputListener)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration as StdDuration};

    use chrono::{Duration, TimeZone, Utc};

    use crate::{utils::clock::FixedClock, window_api::MockIdleSource};

    use super::{IdleDetector, IdleEvaluator, InputListener, PolledInputListener};

    #[test]
    fn test_detector_tracks_last_write() {
        let start = Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap();
        let detector = IdleDetector::new(start);
        let listener_side = detector.clone();

        listener_side.record_input(start + Duration::seconds(30));
        assert_eq!(detector.last_input(), start + Duration::seconds(30));
        assert_eq!(
            detector.elapsed(start + Duration::seconds(90)),
            Duration::seconds(60)
        );

        detector.reset(start + Duration::seconds(100));
        assert_eq!(listener_side.last_input(), start + Duration::seconds(100));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let evaluator = IdleEvaluator::from_minutes(5);
        assert!(!evaluator.is_idle(Duration::minutes(5)));
        assert!(evaluator.is_idle(Duration::minutes(5) + Duration::milliseconds(1)));
    }

    #[test]
    fn test_observed_input_never_goes_back() {
        let start = Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap();
        let detector = IdleDetector::new(start);

        detector.observe_input(start - Duration::minutes(10));
        assert_eq!(detector.last_input(), start);
        detector.observe_input(start + Duration::seconds(5));
        assert_eq!(detector.last_input(), start + Duration::seconds(5));
    }

    #[test]
    fn test_polled_source_feeds_detector() {
        let now = Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap();
        let detector = IdleDetector::new(now - Duration::hours(1));

        let mut source = MockIdleSource::new();
        source
            .expect_idle_time()
            .returning(|| Ok(StdDuration::from_secs(30)));
        let mut listener = PolledInputListener::new(
            Box::new(source),
            Arc::new(FixedClock(now)),
            StdDuration::from_secs(3600),
        );

        assert!(listener.start(detector.clone()).unwrap());
        assert_eq!(detector.last_input(), now - Duration::seconds(30));
        // The source moved into the polling thread.
        assert!(listener.start(detector.clone()).is_err());
        listener.stop();
    }

    #[test]
    fn test_broken_source_fails_to_start() {
        let now = Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap();
        let mut source = MockIdleSource::new();
        source
            .expect_idle_time()
            .returning(|| Err(anyhow::anyhow!("no screensaver extension")));
        let mut listener = PolledInputListener::new(
            Box::new(source),
            Arc::new(FixedClock(now)),
            StdDuration::from_secs(1),
        );

        assert!(listener.start(IdleDetector::new(now)).is_err());
    }
}
