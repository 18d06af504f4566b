use anyhow::Error;
use log::{debug, info};
use rppal::i2c::I2c;

use super::{check_values, to_raw, Driver};

const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;

const OSCILLATOR_HZ: f64 = 25_000_000.0;
const PWM_STEPS: f64 = 4096.0;

/// Transient bus errors are retried this many times before giving up.
const IO_TRIES: usize = 10;

/// PCA9685 16-channel pwm expander on the I2C bus, 12-bit resolution.
pub struct Pca9685Driver {
    pins: Vec<u8>,
    i2c: I2c,
}

impl Pca9685Driver {
    /// Connect to the expander at `address` and program its pwm frequency.
    pub fn new(pins: &[u8], address: u16, frequency: f64) -> Result<Self, Error> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(address)?;

        info!(
            "Pca9685 driver: initializing at 0x{:02x}, {} Hz, channels {:?}",
            address, frequency, pins
        );

        // The prescaler can only be set while the oscillator sleeps.
        let prescale = (OSCILLATOR_HZ / (PWM_STEPS * frequency)).round() - 1.0;
        i2c.smbus_write_byte(MODE1, MODE1_SLEEP)?;
        i2c.smbus_write_byte(PRESCALE, prescale as u8)?;
        i2c.smbus_write_byte(MODE1, MODE1_AUTO_INCREMENT)?;

        let mut driver = Self {
            pins: pins.to_vec(),
            i2c,
        };
        for pin in driver.pins.clone() {
            driver.write_channel(pin, 0)?;
        }

        Ok(driver)
    }

    fn write_channel(&mut self, channel: u8, raw: u16) -> Result<(), Error> {
        let mut tries = 0;
        loop {
            match self.try_write_channel(channel, raw) {
                Ok(()) => return Ok(()),
                Err(err) if tries + 1 < IO_TRIES => {
                    tries += 1;
                    debug!(
                        "Pca9685 driver: write to channel {} failed ({}), retry {}/{}",
                        channel, err, tries, IO_TRIES
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn try_write_channel(&mut self, channel: u8, raw: u16) -> Result<(), rppal::i2c::Error> {
        let base = LED0_ON_L + 4 * channel;
        self.i2c.smbus_write_byte(base, 0x00)?;
        self.i2c.smbus_write_byte(base + 1, 0x00)?;
        self.i2c.smbus_write_byte(base + 2, (raw & 0xff) as u8)?;
        self.i2c.smbus_write_byte(base + 3, (raw >> 8) as u8)?;
        Ok(())
    }
}

impl Driver for Pca9685Driver {
    fn pins(&self) -> &[u8] {
        &self.pins
    }

    fn resolution(&self) -> u32 {
        12
    }

    fn set_pwm(&mut self, values: &[f64]) -> Result<(), Error> {
        check_values(&self.pins, values)?;

        let pins = self.pins.clone();
        for (&pin, &value) in pins.iter().zip(values) {
            let raw = to_raw(value, 12) as u16;
            self.write_channel(pin, raw)?;
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        for pin in self.pins.clone() {
            self.write_channel(pin, 0)?;
        }
        self.i2c.smbus_write_byte(MODE1, MODE1_SLEEP)?;
        Ok(())
    }
}
