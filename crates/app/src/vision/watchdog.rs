use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::telemetry;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 1_500;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HealthComponent {
    Capture,
    Detection,
}

impl HealthComponent {
    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Detection => "detection",
        }
    }
}

/// Last-progress timestamps of the vision loop stages.
pub(crate) struct LoopHealth {
    capture: AtomicU64,
    detection: AtomicU64,
}

impl LoopHealth {
    pub(crate) fn new() -> Self {
        Self::starting_at(current_millis())
    }

    fn starting_at(now: u64) -> Self {
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            capture: AtomicU64::new(grace_deadline),
            detection: AtomicU64::new(grace_deadline),
        }
    }

    pub(crate) fn beat(&self, component: HealthComponent) {
        self.beat_at(component, current_millis());
    }

    fn beat_at(&self, component: HealthComponent, now: u64) {
        match component {
            HealthComponent::Capture => self.capture.store(now, Ordering::Relaxed),
            HealthComponent::Detection => self.detection.store(now, Ordering::Relaxed),
        }
    }

    pub(crate) fn stale_component(&self, now: u64) -> Option<HealthComponent> {
        if now.saturating_sub(self.capture.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
            return Some(HealthComponent::Capture);
        }
        if now.saturating_sub(self.detection.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS
        {
            return Some(HealthComponent::Detection);
        }
        None
    }
}

/// Poll `health` until `running` clears, logging each stall once.
///
/// The watchdog only reports; the loop keeps running degraded.
pub(crate) fn spawn_watchdog(
    health: Arc<LoopHealth>,
    running: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("vision-watchdog", move || {
        let mut stalled: Option<HealthComponent> = None;
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let now = current_millis();
            match (health.stale_component(now), stalled) {
                (Some(component), previous) if previous != Some(component) => {
                    warn!(
                        "Watchdog detected stalled {} stage (no progress for {} ms)",
                        component.label(),
                        WATCHDOG_STALE_THRESHOLD_MS
                    );
                    metrics::counter!("vision_watchdog_stalls_total", "stage" => component.label())
                        .increment(1);
                    stalled = Some(component);
                }
                (None, Some(component)) => {
                    info!("{} stage recovered", component.label());
                    stalled = None;
                }
                _ => {}
            }
        }
    })
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_hides_early_silence() {
        let health = LoopHealth::starting_at(10_000);
        assert_eq!(health.stale_component(10_000), None);
        assert_eq!(
            health.stale_component(10_000 + WATCHDOG_STARTUP_GRACE_MS + WATCHDOG_STALE_THRESHOLD_MS),
            None
        );
        assert_eq!(
            health.stale_component(
                10_000 + WATCHDOG_STARTUP_GRACE_MS + WATCHDOG_STALE_THRESHOLD_MS + 1
            ),
            Some(HealthComponent::Capture)
        );
    }

    #[test]
    fn reports_the_first_silent_stage() {
        let health = LoopHealth::starting_at(0);
        let now = 60_000;
        health.beat_at(HealthComponent::Capture, now - 100);
        health.beat_at(HealthComponent::Detection, now - 2_000);
        assert_eq!(health.stale_component(now), Some(HealthComponent::Detection));

        health.beat_at(HealthComponent::Detection, now);
        assert_eq!(health.stale_component(now), None);
    }
}
