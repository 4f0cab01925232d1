use crate::{
    core::{
        error::{Result, TimerError},
        format::format_duration,
        timer::TimerId,
    },
    utils::{Logger, StdoutLogger},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, Receiver, Sender, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_PROGRESS_CAPACITY: usize = 1;
/// Upper bound for [`CountdownConfig::progress_capacity`].
pub const MAX_PROGRESS_CAPACITY: usize = 1024;
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    /// How often progress is computed and offered to the progress channel.
    pub tick_interval: Duration,
    /// Updates buffered before further ones are dropped, up to [`MAX_PROGRESS_CAPACITY`].
    pub progress_capacity: usize,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    /// The full duration elapsed and the callback ran.
    Completed,
    /// [`Countdown::stop`] was called first.
    Stopped,
    /// The external cancellation token fired first.
    Cancelled,
}

/// Runs a callback once a fixed duration has elapsed, unless stopped or cancelled first.
///
/// A countdown can be started once. Its wait runs on a tokio task that races
/// the deadline against [`Countdown::stop`] and the cancellation token passed to
/// [`Countdown::start`]; stop and cancellation win over a deadline that is ready
/// at the same moment.
pub struct Countdown {
    id: TimerId,
    duration: Duration,
    config: CountdownConfig,
    logger: Arc<dyn Logger>,
    on_complete: Option<Callback>,
    stop_token: CancellationToken,
    progress_sender: Option<Sender<f64>>,
    progress_taken: bool,
    started: bool,
    handle: Option<JoinHandle<CountdownOutcome>>,
}

impl Countdown {
    pub fn new<F>(duration: Duration, on_complete: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: TimerId::new(),
            duration,
            config: CountdownConfig::default(),
            logger: Arc::new(StdoutLogger::new()),
            on_complete: Some(Box::new(on_complete)),
            stop_token: CancellationToken::new(),
            progress_sender: None,
            progress_taken: false,
            started: false,
            handle: None,
        }
    }

    pub fn with_config(mut self, config: CountdownConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Takes the receiving end of the progress channel, turning progress reporting on.
    ///
    /// Only available once, and only before [`Countdown::start`]. The channel
    /// closes when the countdown terminates for any reason. Its capacity is
    /// taken from the config in effect at start.
    pub fn progress(&mut self) -> Option<Receiver<f64>> {
        if self.started || self.progress_taken {
            return None;
        }
        let (sender, receiver) = mpsc::channel(MAX_PROGRESS_CAPACITY);
        self.progress_sender = Some(sender);
        self.progress_taken = true;
        Some(receiver)
    }

    /// Spawns the background wait. Must be called from within a tokio runtime.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.started {
            return Err(TimerError::AlreadyStarted);
        }
        if self.duration.is_zero() {
            return Err(TimerError::InvalidDuration(self.duration));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let on_complete = self.on_complete.take().ok_or(TimerError::AlreadyStarted)?;

        let task = CountdownTask {
            id: self.id,
            duration: self.duration,
            tick_interval: self.config.tick_interval,
            progress_capacity: self.config.progress_capacity.clamp(1, MAX_PROGRESS_CAPACITY),
            on_complete,
            stop: self.stop_token.clone(),
            cancel: cancel.clone(),
            progress: self.progress_sender.take(),
            logger: self.logger.clone(),
        };

        self.logger.debug(&format!(
            "countdown {} started for {}",
            self.id,
            format_duration(self.duration)
        ));

        self.handle = Some(runtime.spawn(task.run()));
        self.started = true;
        Ok(())
    }

    /// Requests early termination. Calling it more than once has no further effect.
    ///
    /// A stop issued before [`Countdown::start`] makes the countdown end as
    /// soon as it is started.
    pub fn stop(&self) {
        if !self.stop_token.is_cancelled() {
            self.logger
                .debug(&format!("countdown {} stop requested", self.id));
        }
        self.stop_token.cancel();
    }

    /// Waits for the background task to terminate and reports how it ended.
    ///
    /// Cancel safe: dropping the returned future keeps the task joinable.
    pub async fn wait(&mut self) -> Result<CountdownOutcome> {
        if !self.started {
            return Err(TimerError::NotStarted);
        }
        let handle = self.handle.as_mut().ok_or(TimerError::AlreadyJoined)?;
        let joined = handle.await;
        self.handle = None;
        joined.map_err(|err| TimerError::TaskFailed(err.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => self.started,
        }
    }
}

struct CountdownTask {
    id: TimerId,
    duration: Duration,
    tick_interval: Duration,
    progress_capacity: usize,
    on_complete: Callback,
    stop: CancellationToken,
    cancel: CancellationToken,
    progress: Option<Sender<f64>>,
    logger: Arc<dyn Logger>,
}

impl CountdownTask {
    async fn run(mut self) -> CountdownOutcome {
        let started_at = Instant::now();

        let tick = self
            .tick_interval
            .clamp(Duration::from_millis(1), MAX_TICK_INTERVAL);
        let mut ticker = time::interval_at(started_at + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // `sleep` saturates durations past the representable deadline.
        let expiry = time::sleep(self.duration);
        tokio::pin!(expiry);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break CountdownOutcome::Stopped,
                _ = self.cancel.cancelled() => break CountdownOutcome::Cancelled,
                _ = &mut expiry => break CountdownOutcome::Completed,
                _ = ticker.tick(), if self.progress.is_some() => {
                    self.report_progress(started_at.elapsed());
                }
            }
        };

        match outcome {
            CountdownOutcome::Completed => {
                self.logger
                    .debug(&format!("countdown {} complete", self.id));
                (self.on_complete)();
            }
            CountdownOutcome::Stopped => {
                self.logger.debug(&format!("countdown {} stopped", self.id));
            }
            CountdownOutcome::Cancelled => {
                self.logger
                    .debug(&format!("countdown {} cancelled", self.id));
            }
        }

        // Dropping the sender closes the progress channel.
        drop(self.progress);
        outcome
    }

    fn report_progress(&mut self, elapsed: Duration) {
        let fraction = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        if fraction >= 1.0 {
            // The deadline branch reports completion.
            return;
        }

        let Some(sender) = &self.progress else {
            return;
        };
        // The channel is allocated at its maximum size; the configured capacity
        // is enforced here so it can still change after `progress()` is called.
        let pending = sender.max_capacity() - sender.capacity();
        if pending >= self.progress_capacity && !sender.is_closed() {
            self.logger.debug(&format!(
                "countdown {} progress channel full, dropping update",
                self.id
            ));
            return;
        }
        match sender.try_send(fraction) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.logger.debug(&format!(
                    "countdown {} progress channel full, dropping update",
                    self.id
                ));
            }
            Err(TrySendError::Closed(_)) => {
                // Receiver is gone, stop computing progress.
                self.progress = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::LogLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    fn counting_countdown(duration: Duration) -> (Arc<AtomicUsize>, Countdown) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let countdown = Countdown::new(duration, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (calls, countdown)
    }

    #[test_case(100; "short")]
    #[test_case(1000; "one_second")]
    #[test_case(3600 * 1000; "one_hour")]
    #[tokio::test(start_paused = true)]
    async fn callback_runs_once_after_duration(millis: u64) {
        let duration = Duration::from_millis(millis);
        let (calls, mut countdown) = counting_countdown(duration);
        let started_at = Instant::now();

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        assert_eq!(1, calls.load(Ordering::SeqCst));
        let waited = started_at.elapsed();
        assert!(waited >= duration, "fired early after {waited:?}");
        assert!(waited < duration + DEFAULT_TICK_INTERVAL, "fired late after {waited:?}");
        assert!(countdown.is_finished());
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let (_calls, mut countdown) = counting_countdown(Duration::ZERO);
        assert_eq!(
            Err(TimerError::InvalidDuration(Duration::ZERO)),
            countdown.start(&CancellationToken::new())
        );
        assert!(!countdown.is_finished());
        assert_eq!(Err(TimerError::NotStarted), countdown.wait().await);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let (calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        let cancel = CancellationToken::new();

        countdown.start(&cancel).unwrap();
        assert_eq!(Err(TimerError::AlreadyStarted), countdown.start(&cancel));

        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        assert_eq!(
            Err(TimerError::NoRuntime),
            countdown.start(&CancellationToken::new())
        );
        assert!(!countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_deadline_skips_callback() {
        let duration = Duration::from_secs(5);
        let (calls, mut countdown) = counting_countdown(duration);

        countdown.start(&CancellationToken::new()).unwrap();
        time::sleep(duration / 2).await;
        countdown.stop();
        countdown.stop();

        assert_eq!(Ok(CountdownOutcome::Stopped), countdown.wait().await);
        time::sleep(duration * 2).await;
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancellation_skips_callback() {
        let duration = Duration::from_secs(5);
        let (calls, mut countdown) = counting_countdown(duration);
        let cancel = CancellationToken::new();

        countdown.start(&cancel).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(Ok(CountdownOutcome::Cancelled), countdown.wait().await);
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_ends_immediately() {
        let (calls, mut countdown) = counting_countdown(Duration::from_secs(5));
        countdown.stop();

        let started_at = Instant::now();
        countdown.start(&CancellationToken::new()).unwrap();

        assert_eq!(Ok(CountdownOutcome::Stopped), countdown.wait().await);
        assert_eq!(Duration::ZERO, started_at.elapsed());
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_reported_in_unit_interval() {
        let (calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();

        let mut updates = Vec::new();
        while let Some(fraction) = progress.recv().await {
            updates.push(fraction);
        }

        assert!(!updates.is_empty(), "expected progress updates");
        assert!(updates.iter().all(|p| (0.0..1.0).contains(p)), "{updates:?}");
        assert!(updates.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_channel_closes_on_stop() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_secs(5));
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();
        assert!(progress.recv().await.is_some());
        countdown.stop();

        while progress.recv().await.is_some() {}
        assert_eq!(Ok(CountdownOutcome::Stopped), countdown.wait().await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_drops_updates() {
        let logger = Arc::new(
            StdoutLogger::new()
                .with_level(LogLevel::Debug)
                .with_receiver(),
        );
        let (_calls, countdown) = counting_countdown(Duration::from_secs(1));
        let mut countdown = countdown.with_logger(logger.clone());
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        // Only the first update fitted in the single-slot channel.
        let first = progress.recv().await;
        assert!(first.is_some_and(|p| p > 0.0 && p < 1.0));
        assert_eq!(None, progress.recv().await);
        assert!(logger.contains("dropping update").await);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_handed_out_once_and_only_before_start() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        let _progress = countdown.progress().unwrap();
        assert!(countdown.progress().is_none());

        let (_calls, mut other) = counting_countdown(Duration::from_secs(1));
        other.start(&CancellationToken::new()).unwrap();
        assert!(other.progress().is_none());
        other.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_twice_fails() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_millis(10));
        countdown.start(&CancellationToken::new()).unwrap();

        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);
        assert_eq!(Err(TimerError::AlreadyJoined), countdown.wait().await);
        assert!(countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_keeps_task_joinable() {
        let (calls, mut countdown) = counting_countdown(Duration::from_secs(2));
        countdown.start(&CancellationToken::new()).unwrap();

        let timed_out = time::timeout(Duration::from_secs(1), countdown.wait()).await;
        assert!(timed_out.is_err());
        assert!(!countdown.is_finished());

        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_past_instant_range_still_waits() {
        let (calls, mut countdown) = counting_countdown(Duration::from_secs(u64::MAX));
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();
        time::sleep(Duration::from_millis(250)).await;
        assert!(!countdown.is_finished());
        assert!(progress.recv().await.is_some_and(|p| p < 1.0));

        countdown.stop();
        assert_eq!(Ok(CountdownOutcome::Stopped), countdown.wait().await);
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_surfaces_as_task_failure() {
        let mut countdown = Countdown::new(Duration::from_millis(10), || panic!("boom"));
        countdown.start(&CancellationToken::new()).unwrap();

        let result = countdown.wait().await;
        assert!(
            matches!(&result, Err(TimerError::TaskFailed(message)) if message.contains("boom")),
            "{result:?}"
        );
        assert!(countdown.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn config_set_after_progress_sizes_the_channel() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        let mut progress = countdown.progress().unwrap();
        let mut countdown = countdown.with_config(CountdownConfig {
            tick_interval: Duration::from_millis(250),
            progress_capacity: 16,
        });

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        let mut updates = Vec::new();
        while let Some(fraction) = progress.recv().await {
            updates.push(fraction);
        }
        assert_eq!(3, updates.len(), "{updates:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn default_capacity_holds_a_single_update() {
        let (_calls, mut countdown) = counting_countdown(Duration::from_secs(1));
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        assert!(progress.recv().await.is_some());
        assert_eq!(None, progress.recv().await);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_quiet_at_info_level() {
        let logger = Arc::new(StdoutLogger::new().with_level(LogLevel::Info).with_receiver());
        let (calls, countdown) = counting_countdown(Duration::from_millis(100));
        let mut countdown = countdown.with_logger(logger.clone());

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(!logger.contains("countdown").await);
    }

    #[tokio::test(start_paused = true)]
    async fn countdowns_run_independently() {
        let (first_calls, mut first) = counting_countdown(Duration::from_secs(1));
        let (second_calls, mut second) = counting_countdown(Duration::from_secs(2));
        let cancel = CancellationToken::new();

        first.start(&cancel).unwrap();
        second.start(&cancel).unwrap();

        assert_eq!(Ok(CountdownOutcome::Completed), first.wait().await);
        assert_eq!(0, second_calls.load(Ordering::SeqCst));

        second.stop();
        assert_eq!(Ok(CountdownOutcome::Stopped), second.wait().await);
        assert_eq!(1, first_calls.load(Ordering::SeqCst));
        assert_eq!(0, second_calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_tick_interval_controls_update_count() {
        let config = CountdownConfig {
            tick_interval: Duration::from_millis(250),
            progress_capacity: 16,
        };
        let (_calls, countdown) = counting_countdown(Duration::from_secs(1));
        let mut countdown = countdown.with_config(config);
        let mut progress = countdown.progress().unwrap();

        countdown.start(&CancellationToken::new()).unwrap();
        assert_eq!(Ok(CountdownOutcome::Completed), countdown.wait().await);

        let mut updates = Vec::new();
        while let Some(fraction) = progress.recv().await {
            updates.push(fraction);
        }
        assert_eq!(3, updates.len(), "{updates:?}");
        for (update, expected) in updates.iter().zip([0.25, 0.5, 0.75]) {
            assert!((update - expected).abs() < 0.01, "{updates:?}");
        }
    }
}
