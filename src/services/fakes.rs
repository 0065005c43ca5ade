//! In-memory store and relay used by the service and daemon tests.

use crate::client::{Relay, RelayError};
use crate::db::models::{NewThermostatAction, ThermostatAction};
use crate::db::store::{StoreError, ThermostatStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    enabled: bool,
    target: Option<f64>,
    current: Option<f64>,
    boiler_on: bool,
    actions: Vec<NewThermostatAction>,
    failing: bool,
    fail_boiler_writes: bool,
    fail_log_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn checked(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let s = self.state();
        if s.failing {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(s)
    }

    pub fn seed(&self, enabled: bool, target: Option<f64>, current: Option<f64>, boiler_on: bool) {
        let mut s = self.state();
        s.enabled = enabled;
        s.target = target;
        s.current = current;
        s.boiler_on = boiler_on;
    }

    pub fn set_current_temperature(&self, current: Option<f64>) {
        self.state().current = current;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn fail_boiler_writes(&self, fail: bool) {
        self.state().fail_boiler_writes = fail;
    }

    pub fn fail_log_writes(&self, fail: bool) {
        self.state().fail_log_writes = fail;
    }

    pub fn action_rows(&self) -> Vec<NewThermostatAction> {
        self.state().actions.clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.state().actions.iter().map(|a| a.action.clone()).collect()
    }
}

impl ThermostatStore for MemoryStore {
    fn current_temperature(&self) -> Result<Option<f64>, StoreError> {
        Ok(self.checked()?.current)
    }

    fn target_temperature(&self) -> Result<Option<f64>, StoreError> {
        Ok(self.checked()?.target)
    }

    fn set_target_temperature(&self, celsius: f64) -> Result<(), StoreError> {
        self.checked()?.target = Some(celsius);
        Ok(())
    }

    fn thermostat_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.checked()?.enabled)
    }

    fn set_thermostat_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.checked()?.enabled = enabled;
        Ok(())
    }

    fn boiler_status(&self) -> Result<bool, StoreError> {
        Ok(self.checked()?.boiler_on)
    }

    fn set_boiler_status(&self, is_on: bool) -> Result<(), StoreError> {
        let mut s = self.checked()?;
        if s.fail_boiler_writes {
            return Err(StoreError::Unavailable("simulated write failure".into()));
        }
        s.boiler_on = is_on;
        Ok(())
    }

    fn log_action(&self, entry: &NewThermostatAction) -> Result<(), StoreError> {
        let mut s = self.checked()?;
        if s.fail_log_writes {
            return Err(StoreError::Unavailable("simulated write failure".into()));
        }
        s.actions.push(entry.clone());
        Ok(())
    }

    fn recent_actions(&self, limit: i64) -> Result<Vec<ThermostatAction>, StoreError> {
        let s = self.checked()?;
        Ok(s.actions
            .iter()
            .enumerate()
            .rev()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(i, a)| ThermostatAction {
                id: i as i64 + 1,
                time: a.time,
                action: a.action.clone(),
                current_temp_c: a.current_temp_c,
                target_temp_c: a.target_temp_c,
                boiler_on: a.boiler_on,
            })
            .collect())
    }
}

/// Relay double. Unreachable relays fail every call like a timeout would.
#[derive(Debug)]
pub struct FakeRelay {
    on: AtomicBool,
    reachable: AtomicBool,
    switch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRelay {
    pub fn new(on: bool) -> Self {
        FakeRelay {
            on: AtomicBool::new(on),
            reachable: AtomicBool::new(true),
            switch_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Change the physical state behind the service's back (e.g. a wall switch).
    pub fn force_state(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }

    pub fn switch_calls(&self) -> usize {
        self.switch_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Relay for FakeRelay {
    fn set_state(&self, on: bool) -> Result<(), RelayError> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));

        let result = if self.reachable.load(Ordering::SeqCst) {
            self.on.store(on, Ordering::SeqCst);
            Ok(())
        } else {
            Err(RelayError::Transport("simulated timeout".into()))
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn get_status(&self) -> Result<bool, RelayError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(self.is_on())
        } else {
            Err(RelayError::Transport("simulated timeout".into()))
        }
    }
}
