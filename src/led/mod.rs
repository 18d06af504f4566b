use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Error};
use log::{debug, info};
use tokio::sync::Mutex;

use crate::driver::Driver;
use crate::state::{Color, LedKind, LedState, StateChange};
use crate::transition::{Scheduler, Transition, TransitionHandle, TransitionTargets};

/// Default bound on waiting for an active transition to confirm it stopped.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// How a fade to off treats the stored brightness once it finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrightnessMemory {
    /// Restore the pre-transition brightness unless the destination named
    /// an explicit one, so a later `on()` resumes at the remembered level.
    RestoreUnlessExplicit,
    /// Keep whatever brightness the transition ended at.
    KeepDestination,
}

/// State plus driver of one LED, shared between the controller and the
/// transition loop.
///
/// The controller mutates it from caller tasks, the scheduler from its
/// loop; the cancel-before-mutate rule on [`Led`] keeps those two from
/// ever animating the same LED at once.
pub(crate) struct LedInner {
    kind: LedKind,
    state: LedState,
    driver: Box<dyn Driver>,
}

impl LedInner {
    pub(crate) fn new(kind: LedKind, driver: Box<dyn Driver>) -> Self {
        Self {
            kind,
            state: LedState::initial(kind),
            driver,
        }
    }

    pub(crate) fn state(&self) -> LedState {
        self.state.clone()
    }

    /// Store the state and push the matching pwm values to the driver.
    ///
    /// This is the single authorized write path during an active
    /// transition; callers go through [`Led::set`], which cancels first.
    pub(crate) fn apply_state(&mut self, state: LedState) -> Result<(), Error> {
        self.state = state;
        self.update_pwm()
    }

    fn update_pwm(&mut self) -> Result<(), Error> {
        let values = if self.state.is_on {
            pwm_values(self.kind, &self.state)
        } else {
            // Brightness and color are retained in the state; only the
            // output goes dark.
            vec![0.0; self.driver.pins().len()]
        };

        self.driver.set_pwm(&values)
    }
}

/// One controllable LED: the authoritative current state, its driver, and
/// the entry points for immediate and animated state changes.
pub struct Led {
    name: String,
    kind: LedKind,
    inner: Arc<Mutex<LedInner>>,
    scheduler: Scheduler,
    cancel_timeout: Duration,
    memory: BrightnessMemory,
    active: Mutex<Option<TransitionHandle>>,
}

impl Led {
    /// Create an LED of the given kind on top of a driver whose channel
    /// count must match the kind.
    pub fn new(
        name: impl Into<String>,
        kind: LedKind,
        driver: Box<dyn Driver>,
        scheduler: Scheduler,
    ) -> Result<Self, Error> {
        let name = name.into();
        if driver.pins().len() != kind.channels() {
            bail!(
                "Led {}: a {:?} led needs {} pwm channels, the driver controls {}.",
                name,
                kind,
                kind.channels(),
                driver.pins().len()
            );
        }

        info!(
            "Led {}: initialized as {:?} on pins {:?}",
            name,
            kind,
            driver.pins()
        );

        Ok(Self {
            name,
            kind,
            inner: Arc::new(Mutex::new(LedInner::new(kind, driver))),
            scheduler,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
            memory: BrightnessMemory::RestoreUnlessExplicit,
            active: Mutex::new(None),
        })
    }

    pub fn with_cancel_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_timeout = timeout;
        self
    }

    pub fn with_brightness_memory(mut self, memory: BrightnessMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LedKind {
        self.kind
    }

    pub async fn state(&self) -> LedState {
        self.inner.lock().await.state()
    }

    pub async fn is_on(&self) -> bool {
        self.inner.lock().await.state.is_on
    }

    pub async fn brightness(&self) -> f64 {
        self.inner.lock().await.state.brightness
    }

    pub async fn color(&self) -> Option<Color> {
        self.inner.lock().await.state.color
    }

    pub async fn on(&self) -> Result<(), Error> {
        self.set(StateChange::on()).await
    }

    pub async fn off(&self) -> Result<(), Error> {
        self.set(StateChange::off()).await
    }

    pub async fn set_brightness(&self, brightness: f64) -> Result<(), Error> {
        self.set(StateChange::new().with_brightness(brightness)).await
    }

    pub async fn set_color(&self, color: impl Into<Color>) -> Result<(), Error> {
        self.set(StateChange::new().with_color(color)).await
    }

    /// Apply the present fields immediately.
    ///
    /// Any active transition is cancelled first and waited for, bounded by
    /// the cancel timeout, so the change never races the scheduler.
    pub async fn set(&self, change: StateChange) -> Result<(), Error> {
        change.validate(self.kind)?;
        let mut active = self.active.lock().await;
        self.cancel_active(&mut active).await?;

        let mut inner = self.inner.lock().await;
        let mut state = inner.state();
        if let Some(is_on) = change.is_on {
            state.is_on = is_on;
        }
        if let Some(brightness) = change.brightness {
            state.brightness = brightness;
        }
        if let Some(color) = change.color {
            state.color = Some(color);
        }

        inner.apply_state(state)
    }

    /// Animate to the destination fields over `duration`.
    ///
    /// An already running transition is cancelled and confirmed first, and
    /// the source snapshot is taken only afterwards, so the animation
    /// starts from a state the old transition actually applied.
    pub async fn transition(
        &self,
        duration: Duration,
        change: StateChange,
    ) -> Result<TransitionHandle, Error> {
        change.validate(self.kind)?;

        // The slot stays locked from cancellation to registration, so two
        // racing callers cannot both schedule a transition.
        let mut active = self.active.lock().await;
        self.cancel_active(&mut active).await?;

        let mut src = self.inner.lock().await.state();
        let targets = self.resolve_targets(&mut src, &change);
        let (transition, handle) = Transition::new(self.inner.clone(), duration, src, targets);

        *active = Some(handle.clone());
        self.scheduler.execute(transition).await;
        Ok(handle)
    }

    /// Cancel any running transition and release the driver.
    pub async fn stop(&self) -> Result<(), Error> {
        let mut active = self.active.lock().await;
        self.cancel_active(&mut active).await?;
        self.inner.lock().await.driver.stop()
    }

    async fn cancel_active(&self, active: &mut Option<TransitionHandle>) -> Result<(), Error> {
        if let Some(handle) = active.take() {
            if !handle.is_finished() {
                debug!("Led {}: cancelling active transition", self.name);
                handle.cancel(Some(self.cancel_timeout)).await.map_err(|_| {
                    anyhow!(
                        "Led {}: active transition did not stop within {:?}.",
                        self.name,
                        self.cancel_timeout
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Resolve the destination fields, folding in the on/off composition
    /// rules. `src` is adjusted in place where the rules demand a
    /// different interpolation start.
    fn resolve_targets(&self, src: &mut LedState, change: &StateChange) -> TransitionTargets {
        let mut targets = TransitionTargets {
            is_on: change.is_on,
            brightness: change.brightness,
            color: change.color,
            restore_brightness: None,
        };

        let turning_on = change.is_on == Some(true) && !src.is_on;
        let turning_off = change.is_on == Some(false) && src.is_on;

        if turning_on {
            // Fade in from dark; with no explicit destination the LED
            // returns to where it left off.
            if targets.brightness.is_none() {
                targets.brightness = Some(src.brightness);
            }
            src.brightness = 0.0;
        } else if turning_off && targets.brightness.is_none() {
            // Fade down to dark, but remember the brightness so a later
            // `on()` resumes there. An explicit destination wins instead.
            if self.memory == BrightnessMemory::RestoreUnlessExplicit {
                targets.restore_brightness = Some(src.brightness);
            }
            targets.brightness = Some(0.0);
        }

        targets
    }
}

/// The uniform pwm values for a state of the given LED kind. Pure; the
/// on/off gate is applied by the caller.
pub fn pwm_values(kind: LedKind, state: &LedState) -> Vec<f64> {
    let brightness = state.brightness;
    let color = state.color.unwrap_or(Color::WHITE);

    match kind {
        LedKind::Single => vec![brightness],
        LedKind::Rgb => color
            .channels()
            .iter()
            .map(|c| c / 255.0 * brightness)
            .collect(),
        LedKind::Rgbw => rgb_to_rgbw(color)
            .iter()
            .map(|c| c / 255.0 * brightness)
            .collect(),
    }
}

/// Split an RGB color into RGBW by extracting the common "whiteness" and
/// moving it onto the dedicated white channel.
fn rgb_to_rgbw(color: Color) -> [f64; 4] {
    let [r, g, b] = color.channels();

    let max_value = r.max(g).max(b);
    if max_value == 0.0 {
        return [0.0; 4];
    }

    // Scale to the fully saturated hue, take its whiteness, then scale
    // that back into the original range.
    let multiplier = 255.0 / max_value;
    let hue_r = r * multiplier;
    let hue_g = g * multiplier;
    let hue_b = b * multiplier;

    let max_hue = hue_r.max(hue_g).max(hue_b);
    let min_hue = hue_r.min(hue_g).min(hue_b);
    let white = ((max_hue + min_hue) / 2.0 - 127.5) * 2.0 / multiplier;

    [
        (r - white).clamp(0.0, 255.0),
        (g - white).clamp(0.0, 255.0),
        (b - white).clamp(0.0, 255.0),
        white.clamp(0.0, 255.0),
    ]
}
