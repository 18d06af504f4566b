use anyhow::{bail, Error};

#[cfg(feature = "pi")]
pub mod gpio;
pub mod memory;
#[cfg(feature = "pi")]
pub mod pca9685;

#[cfg(feature = "pi")]
pub use gpio::GpioDriver;
pub use memory::{MemoryDriver, PwmHistory};
#[cfg(feature = "pi")]
pub use pca9685::Pca9685Driver;

/// Capability every pwm backend provides.
///
/// Values are uniform duty cycles in 0.0-1.0; each backend converts them to
/// its own raw resolution. Backends are owned by exactly one LED.
pub trait Driver: Send {
    /// Ordered channel identifiers, fixed at construction.
    fn pins(&self) -> &[u8];

    /// Bit resolution of a raw pwm value.
    fn resolution(&self) -> u32;

    /// Apply one duty cycle per pin. Fails on a length mismatch or an
    /// out-of-range value.
    fn set_pwm(&mut self, values: &[f64]) -> Result<(), Error>;

    /// Number of discrete hardware steps between two uniform values.
    fn steps(&self, start: f64, end: f64) -> Result<usize, Error> {
        for value in [start, end] {
            if !(0.0..=1.0).contains(&value) {
                bail!("Values must be between 0 and 1.");
            }
        }

        let start = to_raw(start, self.resolution());
        let end = to_raw(end, self.resolution());
        Ok(start.abs_diff(end) as usize)
    }

    /// Release the underlying hardware. Idempotent.
    fn stop(&mut self) -> Result<(), Error>;
}

/// Convert a uniform pwm value to the raw value at the given resolution.
pub fn to_raw(value: f64, resolution: u32) -> u32 {
    (value * max_raw(resolution)).round() as u32
}

fn max_raw(resolution: u32) -> f64 {
    ((1u64 << resolution) - 1) as f64
}

/// Shared input check for [`Driver::set_pwm`] implementations.
pub(crate) fn check_values(pins: &[u8], values: &[f64]) -> Result<(), Error> {
    if values.len() != pins.len() {
        bail!("Number of values has to be identical with the number of pins.");
    }
    if values.iter().any(|v| !(0.0..=1.0).contains(v)) {
        bail!("Values must be between 0 and 1.");
    }
    Ok(())
}
