use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Error};
use log::{debug, error};
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};

use crate::led::LedInner;
use crate::state::{Color, LedState};

pub mod scheduler;
pub mod token;

pub use scheduler::Scheduler;
pub use token::CancellationToken;

/// Where a transition ended up. `Running` is the only non-terminal state.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionStatus {
    Running,
    /// The destination state was applied exactly.
    Completed,
    /// Stopped on request; the LED holds whatever was last applied.
    Cancelled,
    /// A driver write failed and the transition was aborted.
    Failed(String),
}

impl TransitionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransitionStatus::Running)
    }
}

/// The per-field destinations of a transition, resolved once at creation.
///
/// `None` leaves a field untouched. `restore_brightness` carries the
/// remembered brightness that is written back into stored state when a
/// fade to off finishes without an explicit destination brightness.
#[derive(Clone, Debug, Default)]
pub(crate) struct TransitionTargets {
    pub is_on: Option<bool>,
    pub brightness: Option<f64>,
    pub color: Option<Color>,
    pub restore_brightness: Option<f64>,
}

/// One scheduled interpolation from a source snapshot to a destination
/// state over a wall-clock duration.
///
/// Stepped only by the scheduler loop; cancellation arrives through the
/// token from any task and is observed at tick granularity.
pub(crate) struct Transition {
    led: Arc<Mutex<LedInner>>,
    duration: Duration,
    src: LedState,
    targets: TransitionTargets,
    start: Instant,
    token: CancellationToken,
    status: watch::Sender<TransitionStatus>,
}

impl Transition {
    pub(crate) fn new(
        led: Arc<Mutex<LedInner>>,
        duration: Duration,
        src: LedState,
        targets: TransitionTargets,
    ) -> (Self, TransitionHandle) {
        let (status, status_rx) = watch::channel(TransitionStatus::Running);
        let token = CancellationToken::new();
        let handle = TransitionHandle {
            status: status_rx,
            token: token.clone(),
        };

        let transition = Self {
            led,
            duration,
            src,
            targets,
            start: Instant::now(),
            token,
            status,
        };
        (transition, handle)
    }

    /// Elapsed-time fraction, clamped to 0.0-1.0. A zero duration is
    /// complete on the first tick.
    fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }

        let run_time = now.saturating_duration_since(self.start).as_secs_f64();
        (run_time / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Advance the transition one tick. Returns true once it is finished
    /// and should be dropped from the active set.
    pub(crate) async fn step(&self) -> bool {
        // Cancellation is observed here, before any further driver write;
        // the tick that would have run is abandoned.
        if self.token.is_cancellation_requested() {
            debug!("transition cancelled after {:?}", self.start.elapsed());
            self.finish(TransitionStatus::Cancelled);
            return true;
        }

        let progress = self.progress(Instant::now());
        let done = progress >= 1.0;
        let result = if done {
            // Apply the literal destination values rather than the
            // interpolation at progress 1, so no rounding error remains.
            self.apply_destination().await
        } else {
            self.apply_interpolated(progress).await
        };

        match result {
            Ok(()) if done => {
                self.finish(TransitionStatus::Completed);
                true
            }
            Ok(()) => false,
            Err(err) => {
                error!("transition aborted: {:#}", err);
                self.finish(TransitionStatus::Failed(format!("{:#}", err)));
                true
            }
        }
    }

    fn finish(&self, status: TransitionStatus) {
        // Status first, so the terminal state is visible by the time a
        // confirmed canceller resumes. Every terminal path confirms: a
        // canceller racing a natural completion is released instead of
        // waiting out its timeout.
        self.status.send_replace(status);
        self.token.confirm_cancellation();
    }

    /// The interpolated state at the given progress. Present numeric
    /// fields are interpolated linearly, color channels independently.
    fn state_at(&self, progress: f64) -> LedState {
        let is_on = self.src.is_on || self.targets.is_on == Some(true);

        let brightness = match self.targets.brightness {
            Some(end) => interpolate(self.src.brightness, end, progress),
            None => self.src.brightness,
        };

        let color = match (self.src.color, self.targets.color) {
            (Some(start), Some(end)) => Some(Color::new(
                interpolate(start.r, end.r, progress),
                interpolate(start.g, end.g, progress),
                interpolate(start.b, end.b, progress),
            )),
            (src, _) => src,
        };

        LedState {
            is_on,
            brightness,
            color,
        }
    }

    async fn apply_interpolated(&self, progress: f64) -> Result<(), Error> {
        let state = self.state_at(progress);
        self.led.lock().await.apply_state(state)
    }

    async fn apply_destination(&self) -> Result<(), Error> {
        let mut state = self.src.clone();
        if let Some(is_on) = self.targets.is_on {
            state.is_on = is_on;
        }
        if let Some(brightness) = self.targets.brightness {
            state.brightness = brightness;
        }
        if let Some(color) = self.targets.color {
            state.color = Some(color);
        }
        if let Some(remembered) = self.targets.restore_brightness {
            state.brightness = remembered;
        }

        self.led.lock().await.apply_state(state)
    }
}

/// Linear interpolation between two values at the given progress.
fn interpolate(start: f64, end: f64, progress: f64) -> f64 {
    start + progress * (end - start)
}

/// Caller-side view of a scheduled transition.
#[derive(Clone, Debug)]
pub struct TransitionHandle {
    status: watch::Receiver<TransitionStatus>,
    token: CancellationToken,
}

impl TransitionHandle {
    /// Wait until the transition reaches a terminal state, at most `wait`
    /// long (`None` waits indefinitely).
    ///
    /// Resolves to `Completed` or `Cancelled`; a failed transition and an
    /// elapsed timeout both surface as errors.
    pub async fn wait(&self, wait: Option<Duration>) -> Result<TransitionStatus, Error> {
        let mut status = self.status.clone();
        let outcome = {
            let terminal = status.wait_for(|status| status.is_terminal());
            let result = match wait {
                Some(limit) => timeout(limit, terminal)
                    .await
                    .map_err(|_| anyhow!("timed out waiting for transition to finish"))?,
                None => terminal.await,
            };
            result
                .map_err(|_| anyhow!("transition was dropped before finishing"))?
                .clone()
        };

        match outcome {
            TransitionStatus::Failed(reason) => Err(anyhow!("transition failed: {}", reason)),
            status => Ok(status),
        }
    }

    /// Request cancellation and wait, at most `wait` long, for the
    /// transition to confirm that it stopped.
    ///
    /// An elapsed timeout means the transition is stuck, not cancelled,
    /// and is reported as an error.
    pub async fn cancel(&self, wait: Option<Duration>) -> Result<(), Error> {
        if self.token.request_cancellation(wait).await {
            Ok(())
        } else {
            Err(anyhow!(
                "transition is still running after a cancellation request"
            ))
        }
    }

    /// The status at this moment.
    pub fn status(&self) -> TransitionStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::state::LedKind;

    fn test_transition(
        src: LedState,
        duration: Duration,
        targets: TransitionTargets,
    ) -> (Transition, TransitionHandle) {
        let inner = LedInner::new(LedKind::Rgb, Box::new(MemoryDriver::new(3)));
        Transition::new(Arc::new(Mutex::new(inner)), duration, src, targets)
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate(0.0, 1.0, 0.5), 0.5);
        assert_eq!(interpolate(1.0, 0.0, 0.25), 0.75);
        assert_eq!(interpolate(0.3, 0.3, 0.9), 0.3);
    }

    #[tokio::test]
    async fn test_zero_duration_is_complete_immediately() {
        let src = LedState::initial(LedKind::Rgb);
        let (transition, _handle) =
            test_transition(src, Duration::ZERO, TransitionTargets::default());

        assert_eq!(transition.progress(Instant::now()), 1.0);
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let src = LedState::initial(LedKind::Rgb);
        let (transition, _handle) = test_transition(
            src,
            Duration::from_secs(10),
            TransitionTargets::default(),
        );

        let progress = transition.progress(Instant::now());
        assert!((0.0..0.1).contains(&progress));
        assert_eq!(
            transition.progress(Instant::now() + Duration::from_secs(60)),
            1.0
        );
    }

    #[tokio::test]
    async fn test_color_channels_interpolate_independently() {
        let src = LedState {
            is_on: true,
            brightness: 1.0,
            color: Some(Color::new(0.0, 0.0, 0.0)),
        };
        let targets = TransitionTargets {
            color: Some(Color::new(255.0, 100.0, 0.0)),
            ..Default::default()
        };
        let (transition, _handle) = test_transition(src, Duration::from_secs(1), targets);

        let halfway = transition.state_at(0.5).color.unwrap();
        assert!((halfway.r - 127.5).abs() < 1e-9);
        assert!((halfway.g - 50.0).abs() < 1e-9);
        assert_eq!(halfway.b, 0.0);

        // Brightness was not named and stays untouched.
        assert_eq!(transition.state_at(0.5).brightness, 1.0);
    }

    #[tokio::test]
    async fn test_turning_on_is_visible_mid_transition() {
        let src = LedState {
            is_on: false,
            brightness: 0.0,
            color: Some(Color::WHITE),
        };
        let targets = TransitionTargets {
            is_on: Some(true),
            brightness: Some(0.8),
            ..Default::default()
        };
        let (transition, _handle) = test_transition(src, Duration::from_secs(1), targets);

        let state = transition.state_at(0.5);
        assert!(state.is_on);
        assert!((state.brightness - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_turning_off_stays_on_until_finished() {
        let src = LedState {
            is_on: true,
            brightness: 0.6,
            color: Some(Color::WHITE),
        };
        let targets = TransitionTargets {
            is_on: Some(false),
            brightness: Some(0.0),
            restore_brightness: Some(0.6),
            ..Default::default()
        };
        let (transition, _handle) = test_transition(src, Duration::from_secs(1), targets);

        assert!(transition.state_at(0.99).is_on);

        // The finished transition switches off and restores the
        // remembered brightness into stored state.
        transition.apply_destination().await.unwrap();
        let state = transition.led.lock().await.state();
        assert!(!state.is_on);
        assert_eq!(state.brightness, 0.6);
    }

    #[tokio::test]
    async fn test_cancelled_step_confirms_and_signals() {
        let src = LedState::initial(LedKind::Rgb);
        let (transition, handle) = test_transition(
            src,
            Duration::from_secs(10),
            TransitionTargets::default(),
        );

        // Raise the request without waiting for the confirmation.
        handle.token.request_cancellation(Some(Duration::ZERO)).await;
        assert!(transition.step().await);
        assert_eq!(handle.status(), TransitionStatus::Cancelled);
        assert!(handle.token.is_cancellation_confirmed());
    }
}
