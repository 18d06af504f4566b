use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::Error;

use super::{check_values, Driver};

/// In-memory backend that records every accepted write.
///
/// Lets the rest of the crate run off-hardware, with the write history
/// inspectable through a [`PwmHistory`] handle kept by the caller.
pub struct MemoryDriver {
    pins: Vec<u8>,
    history: PwmHistory,
}

impl MemoryDriver {
    pub fn new(channels: usize) -> Self {
        Self {
            pins: (0..channels as u8).collect(),
            history: PwmHistory::default(),
        }
    }

    /// Handle onto the recorded writes, valid after the driver is handed off.
    pub fn history(&self) -> PwmHistory {
        self.history.clone()
    }
}

impl Driver for MemoryDriver {
    fn pins(&self) -> &[u8] {
        &self.pins
    }

    fn resolution(&self) -> u32 {
        8
    }

    fn set_pwm(&mut self, values: &[f64]) -> Result<(), Error> {
        check_values(&self.pins, values)?;
        self.history.record(values);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.history.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The writes a [`MemoryDriver`] has accepted, oldest first.
#[derive(Clone, Debug, Default)]
pub struct PwmHistory {
    writes: Arc<Mutex<Vec<Vec<f64>>>>,
    stopped: Arc<AtomicBool>,
}

impl PwmHistory {
    fn record(&self, values: &[f64]) {
        self.writes.lock().unwrap().push(values.to_vec());
    }

    pub fn all(&self) -> Vec<Vec<f64>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Vec<f64>> {
        self.writes.lock().unwrap().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.lock().unwrap().is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_accepted_writes() {
        let mut driver = MemoryDriver::new(3);
        let history = driver.history();

        driver.set_pwm(&[0.0, 0.5, 1.0]).unwrap();
        driver.set_pwm(&[1.0, 1.0, 1.0]).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rejected_writes_not_recorded() {
        let mut driver = MemoryDriver::new(2);
        let history = driver.history();

        assert!(driver.set_pwm(&[0.5]).is_err());
        assert!(driver.set_pwm(&[0.5, 1.2]).is_err());
        assert!(history.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut driver = MemoryDriver::new(1);
        let history = driver.history();

        driver.stop().unwrap();
        driver.stop().unwrap();
        assert!(history.is_stopped());
    }
}
