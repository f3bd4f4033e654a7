//! Rescan Timer
//!
//! Periodically asks the controller to re-deliver its discovery snapshot.
//! Some platforms throttle or coalesce discovery callbacks, so consumers get
//! refreshed at a bounded cadence even when the adapter goes quiet.

use crate::domain::adapter::ControllerEvent;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Default interval between snapshot re-deliveries
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(3);

/// Cancellable scheduled task owned by the controller.
///
/// Ticks are queued as [`ControllerEvent::RescanTick`] on the controller's
/// own channel, so a tick never interrupts event processing.
pub struct RescanTimer {
    interval: Duration,
    repeats: bool,
    runtime: Handle,
    task: Option<JoinHandle<()>>,
}

impl RescanTimer {
    pub fn new(interval: Duration, repeats: bool, runtime: Handle) -> Self {
        Self {
            interval,
            repeats,
            runtime,
            task: None,
        }
    }

    /// Start (or restart) the timer. The first tick fires one interval from now.
    pub fn start(&mut self, ticks: mpsc::UnboundedSender<ControllerEvent>) {
        self.stop();

        let period = self.interval;
        let repeats = self.repeats;
        debug!(?period, repeats, "Starting rescan timer");

        self.task = Some(self.runtime.spawn(async move {
            if !repeats {
                time::sleep(period).await;
                let _ = ticks.send(ControllerEvent::RescanTick);
                return;
            }

            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if ticks.send(ControllerEvent::RescanTick).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel the timer. Returns true if it was running.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                if was_running {
                    debug!("Rescan timer stopped");
                }
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RescanTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_repeating_timer_ticks_every_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RescanTimer::new(Duration::from_secs(3), true, Handle::current());
        let started = Instant::now();
        timer.start(tx);

        for n in 1..=4u32 {
            assert_eq!(rx.recv().await, Some(ControllerEvent::RescanTick));
            assert_eq!(started.elapsed(), Duration::from_secs(3) * n);
        }
        assert!(timer.is_running());
        assert!(timer.stop());
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RescanTimer::new(Duration::from_secs(3), false, Handle::current());
        timer.start(tx);

        assert_eq!(rx.recv().await, Some(ControllerEvent::RescanTick));
        // Sender is dropped with the finished task
        assert_eq!(rx.recv().await, None);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RescanTimer::new(Duration::from_secs(3), true, Handle::current());
        timer.start(tx);
        timer.stop();

        time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
