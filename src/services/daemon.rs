//! Background loop driving the thermostat.
//!
//! One thread, one loop: every tick checks two independent timers, the
//! control interval and the relay sync interval. Both fire on the first tick.
//! Control and sync therefore never overlap.

use crate::client::Relay;
use crate::db::store::ThermostatStore;
use crate::services::thermostat::Thermostat;
use log::{debug, error, info};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_CONTROL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Time source for the daemon; tests substitute a manual clock.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub control_interval: Duration,
    pub sync_interval: Duration,
    pub tick: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule {
            control_interval: DEFAULT_CONTROL_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            tick: DEFAULT_TICK,
        }
    }
}

/// Requests the daemon loop to exit at its next tick.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ThermostatDaemon<S, R, C = SystemClock> {
    thermostat: Arc<Thermostat<S, R>>,
    clock: C,
    schedule: Schedule,
    last_check: Option<Instant>,
    last_sync: Option<Instant>,
    running: Arc<AtomicBool>,
}

impl<S, R> ThermostatDaemon<S, R, SystemClock>
where
    S: ThermostatStore + 'static,
    R: Relay + 'static,
{
    pub fn new(thermostat: Arc<Thermostat<S, R>>, schedule: Schedule) -> Self {
        Self::with_clock(thermostat, schedule, SystemClock)
    }
}

impl<S, R, C> ThermostatDaemon<S, R, C>
where
    S: ThermostatStore + 'static,
    R: Relay + 'static,
    C: Clock + 'static,
{
    pub fn with_clock(thermostat: Arc<Thermostat<S, R>>, schedule: Schedule, clock: C) -> Self {
        ThermostatDaemon {
            thermostat,
            clock,
            schedule,
            last_check: None,
            last_sync: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.running))
    }

    fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
        last.is_none_or(|t| now.saturating_duration_since(t) >= interval)
    }

    /// Evaluate both timers once.
    ///
    /// A timer restarts when its run starts, whether or not the run succeeds.
    /// A failing run is therefore retried after a full interval, not on the
    /// next tick.
    pub fn tick(&mut self) {
        let now = self.clock.now();

        if Self::due(self.last_check, now, self.schedule.control_interval) {
            self.last_check = Some(now);
            match self.thermostat.control_logic() {
                Ok(report) if report.is_noteworthy() => info!("Thermostat action: {:?}", report),
                Ok(report) => debug!("Thermostat: {:?}", report.action),
                Err(e) => error!("Thermostat control failed: {}", e),
            }
        }

        if Self::due(self.last_sync, now, self.schedule.sync_interval) {
            self.last_sync = Some(now);
            debug!("Syncing boiler status with relay");
            match self.thermostat.sync_boiler_with_shelly() {
                Ok(outcome) => debug!("Sync: {:?}", outcome),
                Err(e) => error!("Relay sync failed: {}", e),
            }
        }
    }

    /// Run until [`StopHandle::stop`] is called.
    pub fn run(&mut self) {
        info!(
            "Thermostat daemon started (control every {}s, sync every {}s, hysteresis {} °C)",
            self.schedule.control_interval.as_secs(),
            self.schedule.sync_interval.as_secs(),
            self.thermostat.hysteresis()
        );
        while self.running.load(Ordering::SeqCst) {
            self.tick();
            self.clock.sleep(self.schedule.tick);
        }
        info!("Thermostat daemon stopped");
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(mut self) -> io::Result<(JoinHandle<()>, StopHandle)> {
        let stop = self.stop_handle();
        let handle = thread::Builder::new()
            .name("thermostat-daemon".into())
            .spawn(move || self.run())?;
        Ok((handle, stop))
    }
}
