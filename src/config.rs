use std::time::Duration;

use anyhow::Error;
use pi_pinout::{GpioPin, PhysicalPin, WiringPiPin};
use serde::{Deserialize, Serialize};

use crate::state::LedKind;

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Pause between two passes of the transition loop, in milliseconds.
    pub tick_interval_ms: u64,
    /// Bound on waiting for a cancelled transition to confirm, in
    /// milliseconds.
    pub cancel_timeout_ms: u64,
    pub leds: Vec<LedConfig>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct LedConfig {
    pub name: String,
    pub kind: LedKind,
    /// One pin per pwm channel, ordered to match the kind.
    pub pins: Vec<Pin>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub enum Pin {
    Physical(PhysicalPin),
    Gpio(GpioPin),
    WiringPi(WiringPiPin),
}

impl Pin {
    /// Resolve to the BCM gpio pin.
    pub fn gpio(&self) -> GpioPin {
        match self {
            Pin::Physical(pin) => (*pin).into(),
            Pin::Gpio(pin) => *pin,
            Pin::WiringPi(pin) => (*pin).into(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Error> {
        let config = std::fs::read_to_string("config.ron")?;
        let config: Config = ron::from_str(&config)?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        // Write an example config file
        std::fs::write(
            "config.ron",
            r#"(
    tick_interval_ms: 1,
    cancel_timeout_ms: 5000,
    leds: [
        LedConfig(
            name: "porch",
            kind: Single,
            pins: [Physical(PhysicalPin(12))],
        ),
        LedConfig(
            name: "strip",
            kind: Rgb,
            pins: [Gpio(GpioPin(17)), Gpio(GpioPin(27)), Gpio(GpioPin(22))],
        ),
    ],
)"#,
        )
        .unwrap();

        let config = Config::load().unwrap();
        assert_eq!(
            config,
            Config {
                tick_interval_ms: 1,
                cancel_timeout_ms: 5000,
                leds: vec![
                    LedConfig {
                        name: "porch".to_string(),
                        kind: LedKind::Single,
                        pins: vec![Pin::Physical(pi_pinout::PhysicalPin(12))],
                    },
                    LedConfig {
                        name: "strip".to_string(),
                        kind: LedKind::Rgb,
                        pins: vec![
                            Pin::Gpio(pi_pinout::GpioPin(17)),
                            Pin::Gpio(pi_pinout::GpioPin(27)),
                            Pin::Gpio(pi_pinout::GpioPin(22)),
                        ],
                    },
                ]
            }
        );

        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.leds[1].pins[0].gpio().0, 17);
    }
}
