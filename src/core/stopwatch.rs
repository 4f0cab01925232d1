use crate::{
    core::{
        clock::{Clock, SystemClock},
        error::{Result, TimerError},
        timer::TimerId,
    },
    utils::{Logger, StdoutLogger},
};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct StopwatchState {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    running: bool,
    paused: bool,
    pause_start_time: Option<Instant>,
    total_pause: Duration,
    laps: Vec<Duration>,
    /// Bumped on every start so a cancellation binding only ever stops its own run.
    generation: u64,
    /// Cancelled when the run ends, releasing any cancellation binding.
    run_token: Option<CancellationToken>,
}

impl StopwatchState {
    fn elapsed_at(&self, now: Instant) -> Option<Duration> {
        let start = self.start_time?;
        let reference = if self.running {
            // An open pause freezes the reading at the moment it began.
            match (self.paused, self.pause_start_time) {
                (true, Some(pause_start)) => pause_start,
                _ => now,
            }
        } else {
            self.end_time?
        };
        Some(
            reference
                .saturating_duration_since(start)
                .saturating_sub(self.total_pause),
        )
    }

    fn close_pause(&mut self, now: Instant) {
        if let (true, Some(pause_start)) = (self.paused, self.pause_start_time.take()) {
            self.total_pause += now.saturating_duration_since(pause_start);
        }
        self.paused = false;
    }

    /// Returns false when there was no run to stop.
    fn stop_at(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        self.close_pause(now);
        self.end_time = Some(now);
        self.running = false;
        if let Some(token) = self.run_token.take() {
            token.cancel();
        }
        true
    }
}

/// Measures running time across pause/resume cycles and records lap splits.
///
/// Clones share the same underlying stopwatch. Mutating calls are expected
/// to come from a single owner at a time; the internal lock exists so that a
/// cancellation binding can stop the run from its own task.
#[derive(Clone)]
pub struct Stopwatch {
    id: TimerId,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    state: Arc<Mutex<StopwatchState>>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            id: TimerId::new(),
            clock,
            logger: Arc::new(StdoutLogger::new()),
            state: Arc::new(Mutex::new(StopwatchState::default())),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Starts a fresh run, clearing the pause total, laps and end time of any previous run.
    pub fn start(&self) -> Result<()> {
        self.begin().map(|_| ())
    }

    /// Starts a fresh run that is stopped once `cancel` fires.
    ///
    /// The binding lives on a tokio task, so this must be called from within a runtime.
    /// It only ever stops the run started here; a manual [`Stopwatch::stop`] releases it.
    pub fn start_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let (generation, run_token) = self.begin()?;

        let stopwatch = self.clone();
        let cancel = cancel.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = run_token.cancelled() => {}
                _ = cancel.cancelled() => stopwatch.stop_run(generation),
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        let now = self.clock.now();
        if self.state.lock().stop_at(now) {
            self.logger.debug(&format!("stopwatch {} stopped", self.id));
        }
    }

    pub fn pause(&self) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.running {
            return Err(TimerError::NotRunning);
        }
        if state.paused {
            return Err(TimerError::AlreadyPaused);
        }
        state.pause_start_time = Some(now);
        state.paused = true;
        drop(state);

        self.logger.debug(&format!("stopwatch {} paused", self.id));
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.running {
            return Err(TimerError::NotRunning);
        }
        if !state.paused {
            return Err(TimerError::NotPaused);
        }
        state.close_pause(now);
        drop(state);

        self.logger.debug(&format!("stopwatch {} resumed", self.id));
        Ok(())
    }

    /// Records the current net running time as a lap and returns it.
    pub fn lap(&self) -> Result<Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.running {
            return Err(TimerError::NotRunning);
        }
        let lap = state.elapsed_at(now).ok_or(TimerError::NotStarted)?;
        state.laps.push(lap);
        Ok(lap)
    }

    pub fn laps(&self) -> Vec<Duration> {
        self.state.lock().laps.clone()
    }

    /// Live net running time while running, the frozen total once stopped.
    pub fn elapsed(&self) -> Result<Duration> {
        let now = self.clock.now();
        self.state
            .lock()
            .elapsed_at(now)
            .ok_or(TimerError::NotStarted)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn begin(&self) -> Result<(u64, CancellationToken)> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.running {
            return Err(TimerError::AlreadyRunning);
        }

        let run_token = CancellationToken::new();
        let generation = state.generation.wrapping_add(1);
        *state = StopwatchState {
            start_time: Some(now),
            running: true,
            generation,
            run_token: Some(run_token.clone()),
            ..StopwatchState::default()
        };
        drop(state);

        self.logger.debug(&format!("stopwatch {} started", self.id));
        Ok((generation, run_token))
    }

    fn stop_run(&self, generation: u64) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if state.stop_at(now) {
            drop(state);
            self.logger
                .debug(&format!("stopwatch {} stopped by cancellation", self.id));
        }
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
