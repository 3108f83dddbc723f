use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::Config,
    daemon::storage::{
        entities::{ActivityEvent, ActivityEventType, Metadata},
        sink::{EventSink, SinkError},
    },
    utils::clock::Clock,
    window_api::{domain::extract_domain, WindowSample, WindowSampler},
};

use super::{
    idle::{IdleDetector, IdleEvaluator, InputListener},
    state::{ActivityState, Observation},
};

pub const SESSION_START: &str = "session_start";
pub const SESSION_END: &str = "session_end";

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub idle_threshold: chrono::Duration,
    pub track_websites: bool,
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            idle_threshold: config.idle_threshold(),
            track_websites: config.activity_tracking.track_websites,
        }
    }
}

/// Turns periodic foreground window samples into focus, website and idle events.
pub struct ActivityTracker {
    sampler: Box<dyn WindowSampler>,
    input: Box<dyn InputListener>,
    idle: IdleDetector,
    idle_evaluator: IdleEvaluator,
    // False when the platform can't observe input, idle events would be meaningless then.
    idle_available: bool,
    sink: Arc<dyn EventSink>,
    state: ActivityState,
    poll_interval: Duration,
    track_websites: bool,
    time_provider: Box<dyn Clock>,
    shutdown: CancellationToken,
}

impl ActivityTracker {
    pub fn new(
        sampler: Box<dyn WindowSampler>,
        input: Box<dyn InputListener>,
        sink: Arc<dyn EventSink>,
        settings: TrackerSettings,
        time_provider: Box<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sampler,
            input,
            idle: IdleDetector::new(time_provider.time()),
            idle_evaluator: IdleEvaluator::new(settings.idle_threshold),
            idle_available: false,
            sink,
            state: ActivityState::default(),
            poll_interval: settings.poll_interval,
            track_websites: settings.track_websites,
            time_provider,
            shutdown,
        }
    }

    pub fn idle_detector(&self) -> IdleDetector {
        self.idle.clone()
    }

    fn observe(&self, sample: Option<WindowSample>) -> Observation {
        let Some(WindowSample {
            application,
            window_title,
        }) = sample
        else {
            return Observation::default();
        };

        let website_domain = if self.track_websites {
            extract_domain(&window_title, &application)
        } else {
            None
        };

        Observation {
            application: Some(application),
            window_title: Some(window_title),
            website_domain,
        }
    }

    /// Initializes idle tracking and marks the beginning of a session.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        self.idle.reset(now);
        self.idle_available = self
            .input
            .start(self.idle.clone())
            .inspect_err(|e| error!("Failed to start input listener {e:?}"))
            .unwrap_or(false);
        if !self.idle_available {
            info!("Input can't be observed, idle detection is disabled");
        }

        self.sink
            .record_system_event(SESSION_START, Metadata::new())
            .await
    }

    /// A single poll. Sampling errors are logged and only skip the focus part of the tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let focus = match self.sampler.current_foreground_window() {
            Ok(sample) => {
                let observation = self.observe(sample);
                if self.state.differs_from(&observation) {
                    self.transition(observation, now).await
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                error!("Encountered an error during window sampling {e:?}");
                Ok(())
            }
        };

        let idle = self.check_idle(now).await;
        focus.and(idle)
    }

    async fn transition(
        &mut self,
        observation: Observation,
        now: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        debug!("Focus changed to {observation:?}");
        let previous = std::mem::replace(
            &mut self.state,
            ActivityState::focused(observation.clone(), now),
        );

        if let Some(event) = previous.close(now) {
            self.sink.record_activity(event).await?;
        }

        // Only a change of domain counts as a new visit, a new title on the same site doesn't.
        if let Some(domain) = observation
            .website_domain
            .filter(|v| previous.current.website_domain.as_ref() != Some(v))
        {
            let mut metadata = Metadata::new();
            if let Some(title) = &observation.window_title {
                metadata.insert("title".into(), title.to_string().into());
            }
            self.sink
                .record_activity(ActivityEvent {
                    event_type: ActivityEventType::WebsiteVisit,
                    application: observation.application,
                    window_title: None,
                    website_domain: Some(domain),
                    duration_seconds: 0,
                    timestamp: now,
                    metadata,
                })
                .await?;
        }
        Ok(())
    }

    async fn check_idle(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        if !self.idle_available {
            return Ok(());
        }
        let elapsed = self.idle.elapsed(now);
        if !self.idle_evaluator.is_idle(elapsed) {
            return Ok(());
        }

        // Restart the countdown so that a long idle period is reported once per threshold.
        self.idle.reset(now);

        let mut metadata = Metadata::new();
        metadata.insert(
            "idle_threshold_minutes".into(),
            (self.idle_evaluator.threshold().num_seconds() as f64 / 60.).into(),
        );
        info!("User has been idle for {}s", elapsed.num_seconds());
        self.sink
            .record_activity(ActivityEvent::idle(
                elapsed.num_seconds().max(0) as u64,
                now,
                metadata,
            ))
            .await
    }

    /// Flushes the interval in progress, detaches input listeners and marks the end of the
    /// session.
    pub async fn stop(&mut self, now: DateTime<Utc>) -> Result<(), SinkError> {
        let state = std::mem::take(&mut self.state);
        let flushed = match state.close(now) {
            Some(event) => self.sink.record_activity(event).await,
            None => Ok(()),
        };

        self.input.stop();

        let ended = self
            .sink
            .record_system_event(SESSION_END, Metadata::new())
            .await;
        flushed.and(ended)
    }

    /// Executes the tracker event loop until shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        if let Err(e) = self.start(self.time_provider.time()).await {
            error!("Failed to record session start {e:?}");
        }

        let mut collection_point = self.time_provider.instant();
        loop {
            collection_point += self.poll_interval;

            if let Err(e) = self.tick(self.time_provider.time()).await {
                error!("Failed to record activity {e:?}");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.time_provider.sleep_until(collection_point) => ()
            }
        }

        if let Err(e) = self.stop(self.time_provider.time()).await {
            error!("Failed to record session end {e:?}");
        }
        info!("Activity tracker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::predicate::always;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            activity::idle::{MockInputListener, NoopInputListener, PolledInputListener},
            storage::{
                entities::ActivityEventType,
                memory::MemorySink,
                sink::{MockEventSink, SinkError},
            },
        },
        utils::{
            clock::{FixedClock, TestClock},
            logging::TEST_LOGGING,
        },
        window_api::{MockIdleSource, MockWindowSampler, WindowSample},
    };

    use super::{ActivityTracker, TrackerSettings, SESSION_END, SESSION_START};

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        start_time() + chrono::Duration::seconds(seconds)
    }

    fn settings() -> TrackerSettings {
        TrackerSettings {
            poll_interval: Duration::from_secs(5),
            idle_threshold: chrono::Duration::minutes(5),
            track_websites: true,
        }
    }

    fn sample(application: &str, window_title: &str) -> Option<WindowSample> {
        Some(WindowSample {
            application: application.into(),
            window_title: window_title.into(),
        })
    }

    fn sampler_from(samples: Vec<Option<WindowSample>>) -> MockWindowSampler {
        let mut sampler = MockWindowSampler::new();
        let mut samples = samples.into_iter();
        sampler
            .expect_current_foreground_window()
            .returning(move || Ok(samples.next().flatten()));
        sampler
    }

    fn active_input() -> MockInputListener {
        let mut input = MockInputListener::new();
        input.expect_start().with(always()).returning(|_| Ok(true));
        input.expect_stop().return_const(());
        input
    }

    fn tracker(
        sampler: MockWindowSampler,
        sink: Arc<MemorySink>,
        input: Box<dyn crate::daemon::activity::idle::InputListener>,
    ) -> ActivityTracker {
        ActivityTracker::new(
            Box::new(sampler),
            input,
            sink,
            settings(),
            Box::new(FixedClock(start_time())),
            CancellationToken::new(),
        )
    }

    fn focus_total(sink: &MemorySink, application: &str) -> u64 {
        sink.activity()
            .iter()
            .filter(|v| v.event_type == ActivityEventType::AppFocus)
            .filter(|v| v.application.as_deref() == Some(application))
            .map(|v| v.duration_seconds)
            .sum()
    }

    #[tokio::test]
    async fn test_focus_durations_match_dwell_time() -> Result<()> {
        *TEST_LOGGING;
        // editor for 0..15, terminal for 15..25, editor again for 25..32
        let samples = vec![
            sample("code", "main.rs"),
            sample("code", "main.rs"),
            sample("code", "main.rs"),
            sample("alacritty", "bash"),
            sample("alacritty", "bash"),
            sample("code", "main.rs"),
            sample("code", "main.rs"),
        ];
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(sampler_from(samples), sink.clone(), Box::new(NoopInputListener));

        tracker.start(at(0)).await?;
        for tick in 0..7 {
            tracker.tick(at(tick * 5)).await?;
        }
        tracker.stop(at(32)).await?;

        assert_eq!(focus_total(&sink, "code"), 15 + 7);
        assert_eq!(focus_total(&sink, "alacritty"), 10);
        assert_eq!(sink.system_events(), vec![SESSION_START, SESSION_END]);

        let last = sink.activity().pop().unwrap();
        assert_eq!(last.application.as_deref(), Some("code"));
        assert_eq!(last.duration_seconds, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_title_change_closes_interval() -> Result<()> {
        let samples = vec![sample("code", "main.rs"), sample("code", "lib.rs")];
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(sampler_from(samples), sink.clone(), Box::new(NoopInputListener));

        tracker.tick(at(0)).await?;
        tracker.tick(at(5)).await?;

        let activity = sink.activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].window_title.as_deref(), Some("main.rs"));
        assert_eq!(activity[0].duration_seconds, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_sampling_error_skips_focus_step() -> Result<()> {
        let mut sampler = MockWindowSampler::new();
        let mut calls = 0;
        sampler
            .expect_current_foreground_window()
            .returning(move || {
                calls += 1;
                if calls == 2 {
                    Err(anyhow::anyhow!("process vanished"))
                } else {
                    Ok(sample("code", "main.rs"))
                }
            });
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(sampler, sink.clone(), Box::new(NoopInputListener));

        tracker.tick(at(0)).await?;
        tracker.tick(at(5)).await?;
        tracker.tick(at(10)).await?;
        tracker.stop(at(12)).await?;

        // The failed sample neither ended nor restarted the focus interval.
        let activity = sink.activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].duration_seconds, 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_website_visit_on_domain_change() -> Result<()> {
        let samples = vec![
            sample("firefox.exe", "github.com - Mozilla Firefox"),
            sample("firefox.exe", "github.com/pulls - Mozilla Firefox"),
            sample("firefox.exe", "docs.rs - Mozilla Firefox"),
            sample("firefox.exe", "GitHub - Mozilla Firefox"),
        ];
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(sampler_from(samples), sink.clone(), Box::new(NoopInputListener));

        for tick in 0..4 {
            tracker.tick(at(tick * 5)).await?;
        }

        let visits = sink
            .activity()
            .into_iter()
            .filter(|v| v.event_type == ActivityEventType::WebsiteVisit)
            .collect::<Vec<_>>();
        let domains = visits
            .iter()
            .map(|v| v.website_domain.as_deref().unwrap().to_string())
            .collect::<Vec<_>>();
        // Same domain with a different title is not a new visit, a title without a domain isn't
        // one either.
        assert_eq!(domains, vec!["github.com", "docs.rs"]);
        assert!(visits.iter().all(|v| v.duration_seconds == 0));
        assert_eq!(visits[1].metadata["title"], "docs.rs - Mozilla Firefox");

        let focus_domains = sink
            .activity()
            .into_iter()
            .filter(|v| v.event_type == ActivityEventType::AppFocus)
            .map(|v| v.website_domain.as_deref().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(
            focus_domains,
            vec![
                Some("github.com".to_string()),
                Some("github.com".to_string()),
                Some("docs.rs".to_string())
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_websites_can_be_disabled() -> Result<()> {
        let sink = Arc::new(MemorySink::default());
        let mut tracker = ActivityTracker::new(
            Box::new(sampler_from(vec![sample("firefox.exe", "github.com - Firefox")])),
            Box::new(NoopInputListener),
            sink.clone(),
            TrackerSettings {
                track_websites: false,
                ..settings()
            },
            Box::new(FixedClock(start_time())),
            CancellationToken::new(),
        );

        tracker.tick(at(0)).await?;
        tracker.stop(at(10)).await?;

        let activity = sink.activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].website_domain, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_fires_once_per_threshold() -> Result<()> {
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(
            sampler_from(vec![]),
            sink.clone(),
            Box::new(active_input()),
        );
        tracker.start(at(0)).await?;

        let idle_events = |sink: &MemorySink| {
            sink.activity()
                .into_iter()
                .filter(|v| v.event_type == ActivityEventType::Idle)
                .collect::<Vec<_>>()
        };

        // Exactly at the threshold is not idle yet.
        tracker.tick(at(300)).await?;
        assert!(idle_events(&sink).is_empty());

        tracker.tick(at(305)).await?;
        let events = idle_events(&sink);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_seconds, 305);
        assert_eq!(events[0].metadata["idle_threshold_minutes"], 5.0);

        // Still idle, but a full threshold hasn't passed since the last report.
        tracker.tick(at(310)).await?;
        tracker.tick(at(600)).await?;
        assert_eq!(idle_events(&sink).len(), 1);

        tracker.tick(at(610)).await?;
        assert_eq!(idle_events(&sink).len(), 2);
        assert_eq!(idle_events(&sink)[1].duration_seconds, 305);
        Ok(())
    }

    #[tokio::test]
    async fn test_input_postpones_idle() -> Result<()> {
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(
            sampler_from(vec![]),
            sink.clone(),
            Box::new(active_input()),
        );
        tracker.start(at(0)).await?;
        let detector = tracker.idle_detector();

        detector.record_input(at(200));
        tracker.tick(at(400)).await?;
        assert!(sink.activity().is_empty());

        tracker.tick(at(501)).await?;
        assert_eq!(sink.activity().len(), 1);
        assert_eq!(sink.activity()[0].duration_seconds, 301);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_idle_without_input_source() -> Result<()> {
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(
            sampler_from(vec![]),
            sink.clone(),
            Box::new(NoopInputListener),
        );
        tracker.start(at(0)).await?;
        tracker.tick(at(3600)).await?;
        assert!(sink.activity().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_platform_idle_time_enables_idle_events() -> Result<()> {
        let mut source = MockIdleSource::new();
        source
            .expect_idle_time()
            .returning(|| Ok(Duration::from_secs(0)));
        let input = PolledInputListener::new(
            Box::new(source),
            Arc::new(FixedClock(start_time())),
            Duration::from_secs(3600),
        );
        let sink = Arc::new(MemorySink::default());
        let mut tracker = tracker(sampler_from(vec![]), sink.clone(), Box::new(input));

        tracker.start(at(0)).await?;
        assert!(tracker.idle_available);

        tracker.tick(at(301)).await?;
        tracker.stop(at(302)).await?;
        let idle = sink
            .activity()
            .into_iter()
            .filter(|v| v.event_type == ActivityEventType::Idle)
            .collect::<Vec<_>>();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].duration_seconds, 301);
        Ok(())
    }

    #[tokio::test]
    async fn test_sink_failure_is_returned() -> Result<()> {
        let mut sink = MockEventSink::new();
        sink.expect_record_activity().returning(|_| {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        });
        let mut tracker = ActivityTracker::new(
            Box::new(sampler_from(vec![
                sample("code", "main.rs"),
                sample("alacritty", "bash"),
            ])),
            Box::new(NoopInputListener),
            Arc::new(sink),
            settings(),
            Box::new(FixedClock(start_time())),
            CancellationToken::new(),
        );

        tracker.tick(at(0)).await?;
        assert!(matches!(tracker.tick(at(5)).await, Err(SinkError::Io(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() -> Result<()> {
        *TEST_LOGGING;
        let samples = vec![
            sample("code", "main.rs"),
            sample("code", "main.rs"),
            sample("alacritty", "bash"),
        ];
        let mut sampler = MockWindowSampler::new();
        let mut samples = samples.into_iter().cycle();
        sampler
            .expect_current_foreground_window()
            .returning(move || Ok(samples.next().flatten()))
            .times(3);

        let sink = Arc::new(MemorySink::default());
        let shutdown = CancellationToken::new();
        let mut input = MockInputListener::new();
        input.expect_start().returning(|_| Ok(true)).times(1);
        input.expect_stop().return_const(()).times(1);

        let tracker = ActivityTracker::new(
            Box::new(sampler),
            Box::new(input),
            sink.clone(),
            settings(),
            Box::new(TestClock::new(start_time())),
            shutdown.clone(),
        );

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_secs(12)).await;
                shutdown.cancel()
            },
            tracker.run(),
        );
        result?;

        assert_eq!(sink.system_events(), vec![SESSION_START, SESSION_END]);
        let activity = sink.activity();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].application.as_deref(), Some("code"));
        assert_eq!(activity[0].duration_seconds, 10);
        assert_eq!(activity[1].application.as_deref(), Some("alacritty"));
        assert_eq!(activity[1].duration_seconds, 2);
        Ok(())
    }
}
