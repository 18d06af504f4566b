use anyhow::Error;
use log::info;
use rppal::gpio::{Gpio, OutputPin};

use super::{check_values, Driver};

/// Software pwm on plain GPIO pins via rppal.
///
/// Good enough for single LEDs and low channel counts; use the PCA9685
/// backend when more channels or a stable hardware clock are needed.
pub struct GpioDriver {
    pins: Vec<u8>,
    outputs: Vec<OutputPin>,
    frequency: f64,
}

impl GpioDriver {
    /// Claim the given BCM pins and start them at duty cycle 0.
    pub fn new(pins: &[u8], frequency: f64) -> Result<Self, Error> {
        let gpio = Gpio::new()?;
        let mut outputs = Vec::new();

        for &pin in pins {
            info!("Gpio driver: initializing software pwm on pin {}", pin);
            let mut output = gpio.get(pin)?.into_output();
            output.set_pwm_frequency(frequency, 0.0)?;
            outputs.push(output);
        }

        Ok(Self {
            pins: pins.to_vec(),
            outputs,
            frequency,
        })
    }
}

impl Driver for GpioDriver {
    fn pins(&self) -> &[u8] {
        &self.pins
    }

    fn resolution(&self) -> u32 {
        8
    }

    fn set_pwm(&mut self, values: &[f64]) -> Result<(), Error> {
        check_values(&self.pins, values)?;

        for (output, &value) in self.outputs.iter_mut().zip(values) {
            output.set_pwm_frequency(self.frequency, value)?;
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        for output in &mut self.outputs {
            output.clear_pwm()?;
        }
        Ok(())
    }
}
