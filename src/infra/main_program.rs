use crate::{
    core::{Countdown, CountdownOutcome, Stopwatch, format_duration},
    utils::{Logger, StdoutLogger},
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const DEFAULT_COUNTDOWN_SECS: u64 = 5;
const LAP_INTERVAL: Duration = Duration::from_secs(1);

/// Drives the demo: a stopwatch taking laps alongside a countdown reporting progress.
pub struct MainProgram {
    logger: Arc<dyn Logger>,
    countdown: Duration,
}

impl MainProgram {
    /// Builds the program from command line arguments, excluding the binary name.
    pub fn new<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let countdown_secs = match args.next() {
            Some(arg) => arg
                .parse::<u64>()
                .with_context(|| format!("Invalid countdown length '{arg}', expected seconds"))?,
            None => DEFAULT_COUNTDOWN_SECS,
        };

        Ok(Self {
            logger: Arc::new(StdoutLogger::new()),
            countdown: Duration::from_secs(countdown_secs),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub async fn run(&mut self) -> Result<CountdownOutcome> {
        let shutdown = CancellationToken::new();
        self.set_ctrlc_handler(shutdown.clone());
        self.run_inner(shutdown).await
    }

    async fn run_inner(&mut self, shutdown: CancellationToken) -> Result<CountdownOutcome> {
        self.log_startup_banner();

        let stopwatch = Stopwatch::new().with_logger(self.logger.clone());
        stopwatch
            .start_with_cancel(&shutdown)
            .context("Failed to start stopwatch")?;

        let logger = self.logger.clone();
        let mut countdown = Countdown::new(self.countdown, move || {
            logger.info("Countdown finished");
        })
        .with_logger(self.logger.clone());

        if let Some(mut progress) = countdown.progress() {
            let logger = self.logger.clone();
            tokio::spawn(async move {
                while let Some(fraction) = progress.recv().await {
                    logger.info(&format!("Progress: {:.0}%", fraction * 100.0));
                }
            });
        }

        countdown
            .start(&shutdown)
            .context("Failed to start countdown")?;

        let mut lap_ticker = time::interval_at(time::Instant::now() + LAP_INTERVAL, LAP_INTERVAL);
        lap_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                outcome = countdown.wait() => break outcome.context("Countdown failed")?,
                _ = lap_ticker.tick() => {
                    // The stopwatch may already have been stopped by Ctrl-C.
                    if let Ok(lap) = stopwatch.lap() {
                        self.logger.info(&format!("Lap: {}", format_duration(lap)));
                    }
                }
            }
        };

        stopwatch.stop();
        self.report(&stopwatch, outcome)?;

        Ok(outcome)
    }

    fn report(&self, stopwatch: &Stopwatch, outcome: CountdownOutcome) -> Result<()> {
        let elapsed = stopwatch
            .elapsed()
            .context("Stopwatch was never started")?;

        for (index, lap) in stopwatch.laps().iter().enumerate() {
            self.logger
                .info(&format!("Lap {}: {}", index + 1, format_duration(*lap)));
        }
        self.logger.info(&format!(
            "Countdown {:?}, stopwatch elapsed {} ({:?})",
            outcome,
            format_duration(elapsed),
            elapsed
        ));
        Ok(())
    }

    fn log_startup_banner(&self) {
        self.logger
            .info(&format!("lapwatch - version {}", env!("CARGO_PKG_VERSION")));
    }

    fn set_ctrlc_handler(&self, shutdown: CancellationToken) {
        let logger = self.logger.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    logger.warn("Interrupted, stopping timers");
                    shutdown.cancel();
                }
                Err(err) => logger.error(&format!("Error setting Ctrl-C handler: {err}")),
            }
        });

        self.logger.info("Press CTRL-C to stop early");
    }
}
