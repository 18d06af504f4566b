use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// A color in 8-bit RGB space.
///
/// Channels are floats so that the intermediate colors of a running
/// transition stay representable; ranges are checked at the API boundary,
/// never by clamping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 255.0,
        g: 255.0,
        b: 255.0,
    };

    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn channels(&self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.channels().iter().any(|c| !(0.0..=255.0).contains(c)) {
            bail!("RGB values of color must be between 0 and 255.");
        }
        Ok(())
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color::new(r.into(), g.into(), b.into())
    }
}

/// The closed set of controllable LED kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedKind {
    /// One-color LED on a single pwm channel.
    Single,
    /// Color LED on three pwm channels.
    Rgb,
    /// Color LED with a dedicated white channel.
    Rgbw,
}

impl LedKind {
    /// Number of pwm channels this kind drives.
    pub fn channels(&self) -> usize {
        match self {
            LedKind::Single => 1,
            LedKind::Rgb => 3,
            LedKind::Rgbw => 4,
        }
    }

    pub fn has_color(&self) -> bool {
        matches!(self, LedKind::Rgb | LedKind::Rgbw)
    }
}

/// The authoritative state of one LED.
///
/// Brightness and color are retained while the LED is off so that turning
/// it back on restores the previous look.
#[derive(Clone, Debug, PartialEq)]
pub struct LedState {
    pub is_on: bool,
    /// Brightness in the range 0.0-1.0.
    pub brightness: f64,
    /// Present exactly for color-capable kinds.
    pub color: Option<Color>,
}

impl LedState {
    pub(crate) fn initial(kind: LedKind) -> Self {
        Self {
            is_on: false,
            brightness: 1.0,
            color: kind.has_color().then_some(Color::WHITE),
        }
    }
}

/// A partial state where every absent field means "leave unchanged".
///
/// Used both as the argument to immediate state changes and as the
/// destination of a transition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateChange {
    pub is_on: Option<bool>,
    pub brightness: Option<f64>,
    pub color: Option<Color>,
}

impl StateChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on() -> Self {
        Self::new().with_on(true)
    }

    pub fn off() -> Self {
        Self::new().with_on(false)
    }

    pub fn with_on(mut self, is_on: bool) -> Self {
        self.is_on = Some(is_on);
        self
    }

    pub fn with_brightness(mut self, brightness: f64) -> Self {
        self.brightness = Some(brightness);
        self
    }

    pub fn with_color(mut self, color: impl Into<Color>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.is_on.is_none() && self.brightness.is_none() && self.color.is_none()
    }

    /// Check every present field against its range and the LED kind.
    /// Out-of-range values are rejected here, never clamped.
    pub(crate) fn validate(&self, kind: LedKind) -> Result<(), Error> {
        if let Some(brightness) = self.brightness {
            if !(0.0..=1.0).contains(&brightness) {
                bail!("Brightness must be between 0 and 1.");
            }
        }

        if let Some(color) = self.color {
            if !kind.has_color() {
                bail!("A {:?} led does not support color.", kind);
            }
            color.validate()?;
        }

        Ok(())
    }
}
