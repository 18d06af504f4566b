use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use super::Transition;

/// Minimum pause between two passes over the active set.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Ticks every active transition on one shared background task.
///
/// All driver writes of all transitions are serialized through this loop,
/// so two transitions can never interleave writes to the same driver. The
/// loop starts lazily with the first queued transition and exits once the
/// active set drains; the next `execute` starts it again.
///
/// Cloning is cheap and every clone drives the same loop. Construct one
/// per process and pass clones to each LED.
#[derive(Clone)]
pub struct Scheduler {
    active: Arc<Mutex<ActiveSet>>,
    tick_interval: Duration,
}

struct ActiveSet {
    transitions: Vec<Transition>,
    loop_running: bool,
}

impl Scheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            active: Arc::new(Mutex::new(ActiveSet {
                transitions: Vec::new(),
                loop_running: false,
            })),
            tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Queue a transition for execution, starting the loop if it is idle.
    pub(crate) async fn execute(&self, transition: Transition) {
        let mut active = self.active.lock().await;
        active.transitions.push(transition);

        if !active.loop_running {
            active.loop_running = true;
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.tick_loop().await });
        }
    }

    /// Whether no loop task is currently running.
    pub async fn is_idle(&self) -> bool {
        !self.active.lock().await.loop_running
    }

    async fn tick_loop(self) {
        debug!("transition loop started");

        loop {
            let pass_start = Instant::now();

            {
                let mut active = self.active.lock().await;

                // Step in insertion order, dropping whatever finished. A
                // transition that fails is marked failed by its own step
                // and removed here like any other; the loop carries on.
                let mut index = 0;
                while index < active.transitions.len() {
                    if active.transitions[index].step().await {
                        active.transitions.remove(index);
                    } else {
                        index += 1;
                    }
                }

                if active.transitions.is_empty() {
                    active.loop_running = false;
                    debug!("transition loop idle");
                    return;
                }
            }

            sleep(self.tick_interval.saturating_sub(pass_start.elapsed())).await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(MIN_TICK_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::led::LedInner;
    use crate::state::{LedKind, LedState};
    use crate::transition::{TransitionStatus, TransitionTargets};

    fn queued_transition(
        duration: Duration,
        brightness: f64,
    ) -> (Transition, crate::transition::TransitionHandle) {
        let inner = LedInner::new(LedKind::Single, Box::new(MemoryDriver::new(1)));
        let src = LedState {
            is_on: true,
            brightness: 1.0,
            color: None,
        };
        let targets = TransitionTargets {
            brightness: Some(brightness),
            ..Default::default()
        };
        Transition::new(Arc::new(Mutex::new(inner)), duration, src, targets)
    }

    #[tokio::test]
    async fn test_zero_duration_completes_on_first_pass() {
        let scheduler = Scheduler::default();
        let (transition, handle) = queued_transition(Duration::ZERO, 0.2);

        scheduler.execute(transition).await;
        let status = handle.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(status, TransitionStatus::Completed);
    }

    #[tokio::test]
    async fn test_loop_goes_idle_and_restarts() {
        let scheduler = Scheduler::default();

        let (transition, handle) = queued_transition(Duration::from_millis(20), 0.5);
        scheduler.execute(transition).await;
        assert!(!scheduler.is_idle().await);
        handle.wait(Some(Duration::from_secs(1))).await.unwrap();

        // Give the loop a pass to notice the drained set.
        sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_idle().await);

        // A later transition lazily starts a fresh loop.
        let (transition, handle) = queued_transition(Duration::from_millis(20), 0.1);
        scheduler.execute(transition).await;
        let status = handle.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(status, TransitionStatus::Completed);
    }

    #[tokio::test]
    async fn test_many_concurrent_transitions_all_complete() {
        let scheduler = Scheduler::default();
        let mut handles = Vec::new();

        for i in 0..10 {
            let (transition, handle) =
                queued_transition(Duration::from_millis(10 + i * 5), 0.0);
            scheduler.execute(transition).await;
            handles.push(handle);
        }

        for handle in handles {
            let status = handle.wait(Some(Duration::from_secs(2))).await.unwrap();
            assert_eq!(status, TransitionStatus::Completed);
        }
    }
}
