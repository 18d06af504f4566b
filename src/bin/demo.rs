use std::time::Duration;

use anyhow::Error;
use log::info;
use pi_pinout::GpioPin;
use pwmled::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    // Load the config file, or fall back to a single in-memory strip so
    // the demo runs anywhere
    println!("Starting config...");
    let config = Config::load().unwrap_or_else(|_| Config {
        tick_interval_ms: 1,
        cancel_timeout_ms: 5000,
        leds: vec![LedConfig {
            name: "strip".to_string(),
            kind: LedKind::Rgb,
            pins: vec![
                Pin::Gpio(GpioPin(17)),
                Pin::Gpio(GpioPin(27)),
                Pin::Gpio(GpioPin(22)),
            ],
        }],
    });

    println!("Starting scheduler...");
    let scheduler = Scheduler::new(config.tick_interval());

    println!("Starting leds...");
    let mut leds = Vec::new();
    #[allow(unused_mut)]
    let mut histories: Vec<(String, PwmHistory)> = Vec::new();
    for led_config in &config.leds {
        #[cfg(feature = "pi")]
        let driver: Box<dyn Driver> = {
            let pins: Vec<u8> = led_config.pins.iter().map(|pin| pin.gpio().0).collect();
            Box::new(GpioDriver::new(&pins, 200.0)?)
        };

        #[cfg(not(feature = "pi"))]
        let driver: Box<dyn Driver> = {
            let driver = MemoryDriver::new(led_config.kind.channels());
            histories.push((led_config.name.clone(), driver.history()));
            Box::new(driver)
        };

        let led = Led::new(&led_config.name, led_config.kind, driver, scheduler.clone())?
            .with_cancel_timeout(config.cancel_timeout());
        leds.push(led);
    }

    for led in &leds {
        info!("{}: fading in", led.name());
        let handle = led.transition(Duration::from_secs(1), StateChange::on()).await?;
        handle.wait(None).await?;

        if led.kind().has_color() {
            info!("{}: fading to amber", led.name());
            let handle = led
                .transition(
                    Duration::from_secs(1),
                    StateChange::new().with_color((255, 120, 0)),
                )
                .await?;
            handle.wait(None).await?;
        }

        info!("{}: starting a slow fade and cancelling it mid-flight", led.name());
        let handle = led
            .transition(
                Duration::from_secs(30),
                StateChange::new().with_brightness(0.05),
            )
            .await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel(Some(Duration::from_secs(1))).await?;
        info!("{}: left at brightness {:.3}", led.name(), led.brightness().await);

        let handle = led.transition(Duration::from_secs(1), StateChange::off()).await?;
        handle.wait(None).await?;
        led.stop().await?;
    }

    for (name, history) in &histories {
        info!("{}: drove {} pwm writes", name, history.len());
    }

    Ok(())
}
