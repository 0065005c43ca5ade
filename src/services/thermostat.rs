//! Thermostat service: the control logic side effects, relay reconciliation
//! and the manual override operations.
//!
//! Every operation that reads or writes the stored boiler state holds the
//! `boiler_control` lock for the whole read-call-write sequence, so the daemon
//! and a manual override never issue contradictory relay calls back to back.
//! The relay is always called before the store is written.

use crate::client::{Relay, RelayError};
use crate::db::models::{NewThermostatAction, ThermostatAction};
use crate::db::store::{StoreError, ThermostatStore};
use crate::models::thermostat::{
    ActionKind, ControlAction, ControlFailure, ControlReport, SyncOutcome, ThermostatStatus, status_text,
};
use crate::services::control::{ControlInputs, Decision, decide, temp_diff};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

pub const MIN_TARGET_C: f64 = 5.0;
pub const MAX_TARGET_C: f64 = 35.0;

#[derive(Debug)]
pub enum ThermostatError {
    Store(StoreError),
    Relay(RelayError),
    /// Relay switched but the store could not record it; reconciliation repairs the cache.
    StoreAfterSwitch { on: bool, source: StoreError },
    InvalidTarget(f64),
}

impl Display for ThermostatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ThermostatError::Store(e) => write!(f, "store error: {}", e),
            ThermostatError::Relay(e) => write!(f, "relay error: {}", e),
            ThermostatError::StoreAfterSwitch { on, source } => write!(
                f,
                "relay switched {} but boiler status was not stored: {}",
                if *on { "on" } else { "off" },
                source
            ),
            ThermostatError::InvalidTarget(v) => write!(
                f,
                "target temperature {} outside {}..={} °C",
                v, MIN_TARGET_C, MAX_TARGET_C
            ),
        }
    }
}

impl Error for ThermostatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ThermostatError::Store(e) => Some(e),
            ThermostatError::Relay(e) => Some(e),
            ThermostatError::StoreAfterSwitch { source, .. } => Some(source),
            ThermostatError::InvalidTarget(_) => None,
        }
    }
}

impl From<StoreError> for ThermostatError {
    fn from(value: StoreError) -> Self {
        ThermostatError::Store(value)
    }
}

impl From<RelayError> for ThermostatError {
    fn from(value: RelayError) -> Self {
        ThermostatError::Relay(value)
    }
}

pub struct Thermostat<S, R> {
    store: S,
    relay: R,
    hysteresis: f64,
    boiler_control: Mutex<()>,
}

impl<S: ThermostatStore, R: Relay> Thermostat<S, R> {
    pub fn new(store: S, relay: R, hysteresis: f64) -> Self {
        Thermostat {
            store,
            relay,
            hysteresis,
            boiler_control: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn hysteresis(&self) -> f64 {
        self.hysteresis
    }

    fn lock_boiler(&self) -> MutexGuard<'_, ()> {
        self.boiler_control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the action log without letting a failure reach the caller.
    fn record(&self, entry: NewThermostatAction) {
        if let Err(e) = self.store.log_action(&entry) {
            warn!("Action log: failed to record {}: {}", entry.action, e);
        }
    }

    /// Relay first, then the store. Caller holds the boiler lock.
    fn switch_boiler(&self, on: bool, current: Option<f64>, target: Option<f64>) -> Result<(), ThermostatError> {
        if on {
            self.relay.turn_on()?;
        } else {
            self.relay.turn_off()?;
        }
        self.store
            .set_boiler_status(on)
            .map_err(|source| ThermostatError::StoreAfterSwitch { on, source })?;
        self.record(
            NewThermostatAction::new(ActionKind::boiler_switched(on))
                .with_temps(current, target)
                .with_boiler(on),
        );
        Ok(())
    }

    /// Run one control cycle.
    ///
    /// Transient conditions (no reading, no target, relay failure) come back
    /// as an `error` report; `Err` means the store itself failed.
    pub fn control_logic(&self) -> Result<ControlReport, ThermostatError> {
        let enabled = self.store.thermostat_enabled()?;
        let current = self.store.current_temperature()?;
        let target = self.store.target_temperature()?;

        let _guard = self.lock_boiler();
        let boiler_on = self.store.boiler_status()?;
        let inputs = ControlInputs {
            enabled,
            current_temp: current,
            target_temp: target,
            boiler_on,
        };
        let mut report = ControlReport {
            action: ControlAction::NoChange,
            reason: None,
            current_temp: current,
            target_temp: target,
            temp_diff: current.zip(target).map(|(c, t)| temp_diff(c, t)),
            boiler_status: Some(boiler_on),
        };

        match decide(&inputs, self.hysteresis) {
            Decision::Disabled => return Ok(ControlReport::disabled()),
            Decision::MissingTemperature => {
                warn!("Thermostat: no temperature reading, skipping cycle");
                report.action = ControlAction::Error;
                report.reason = Some(ControlFailure::NoTemperatureReading);
            }
            Decision::MissingTarget => {
                warn!("Thermostat: no target temperature set, skipping cycle");
                report.action = ControlAction::Error;
                report.reason = Some(ControlFailure::NoTargetTemperature);
            }
            Decision::Hold => {}
            decision @ (Decision::TurnOn | Decision::TurnOff) => {
                let on = decision == Decision::TurnOn;
                match self.switch_boiler(on, current, target) {
                    Ok(()) => {
                        report.action = if on { ControlAction::TurnedOn } else { ControlAction::TurnedOff };
                        report.boiler_status = Some(on);
                    }
                    Err(ThermostatError::Relay(e)) => {
                        error!("Thermostat: relay refused turn {}: {}", if on { "on" } else { "off" }, e);
                        report.action = ControlAction::Error;
                        report.reason = Some(ControlFailure::relay_switch(on));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }

    /// Overwrite the stored boiler state with what the relay reports.
    /// Never switches the relay.
    pub fn sync_boiler_with_shelly(&self) -> Result<SyncOutcome, ThermostatError> {
        let _guard = self.lock_boiler();
        let actual = match self.relay.get_status() {
            Ok(v) => v,
            Err(e) => {
                warn!("Sync: relay unreachable, keeping stored boiler state: {}", e);
                return Ok(SyncOutcome::RelayUnreachable);
            }
        };
        let stored = self.store.boiler_status()?;
        if stored == actual {
            return Ok(SyncOutcome::InSync { is_on: actual });
        }

        self.store.set_boiler_status(actual)?;
        info!("Sync: boiler status drifted (stored={}, relay={}), store updated", stored, actual);
        self.record(NewThermostatAction::new(ActionKind::SyncDbWithShelly).with_boiler(actual));
        Ok(SyncOutcome::Repaired { stored, actual })
    }

    /// Manual override: force the boiler on or off.
    pub fn set_boiler(&self, on: bool) -> Result<(), ThermostatError> {
        let current = self.store.current_temperature().ok().flatten();
        let target = self.store.target_temperature().ok().flatten();

        let _guard = self.lock_boiler();
        self.switch_boiler(on, current, target)?;
        info!("Manual override: boiler turned {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Store a new target. Values outside [`MIN_TARGET_C`]..=[`MAX_TARGET_C`]
    /// (5 to 35 °C) or non-finite values are refused with
    /// [`ThermostatError::InvalidTarget`].
    pub fn set_target_temperature(&self, celsius: f64) -> Result<(), ThermostatError> {
        if !celsius.is_finite() || !(MIN_TARGET_C..=MAX_TARGET_C).contains(&celsius) {
            return Err(ThermostatError::InvalidTarget(celsius));
        }
        self.store.set_target_temperature(celsius)?;
        info!("Target temperature set to {:.1} °C", celsius);
        let current = self.store.current_temperature().ok().flatten();
        self.record(NewThermostatAction::new(ActionKind::TargetTempChanged).with_temps(current, Some(celsius)));
        Ok(())
    }

    pub fn set_thermostat_enabled(&self, enabled: bool) -> Result<(), ThermostatError> {
        self.store.set_thermostat_enabled(enabled)?;
        info!("Thermostat {}", if enabled { "enabled" } else { "disabled" });
        let kind = if enabled {
            ActionKind::ThermostatEnabled
        } else {
            ActionKind::ThermostatDisabled
        };
        self.record(NewThermostatAction::new(kind));
        Ok(())
    }

    /// Everything a dashboard shows about the thermostat.
    pub fn status_full(&self) -> Result<ThermostatStatus, ThermostatError> {
        let current = self.store.current_temperature()?;
        let target = self.store.target_temperature()?;
        let enabled = self.store.thermostat_enabled()?;
        let boiler_on = self.store.boiler_status()?;
        let diff = current.zip(target).map(|(c, t)| temp_diff(c, t));

        let text = match diff {
            _ if !enabled => status_text::DISABLED,
            None => status_text::WAITING_FOR_DATA,
            Some(d) if d >= self.hysteresis => status_text::HEATING_NEEDED,
            Some(d) if d <= -self.hysteresis => status_text::ABOVE_TARGET,
            Some(_) => status_text::TARGET_REACHED,
        };

        Ok(ThermostatStatus {
            current_temperature: current,
            target_temperature: target,
            thermostat_enabled: enabled,
            boiler_on,
            temp_diff: diff,
            status_text: text.to_string(),
        })
    }

    pub fn recent_actions(&self, limit: i64) -> Result<Vec<ThermostatAction>, ThermostatError> {
        Ok(self.store.recent_actions(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fakes::{FakeRelay, MemoryStore};

    fn thermostat(target: Option<f64>, current: Option<f64>, boiler_on: bool) -> Thermostat<MemoryStore, FakeRelay> {
        let store = MemoryStore::default();
        store.seed(true, target, current, boiler_on);
        Thermostat::new(store, FakeRelay::new(boiler_on), 0.5)
    }

    #[test]
    fn cold_room_turns_boiler_on_and_logs() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        let report = t.control_logic().expect("control cycle");

        assert_eq!(report.action, ControlAction::TurnedOn);
        assert_eq!(report.temp_diff, Some(2.0));
        assert_eq!(report.boiler_status, Some(true));
        assert!(t.store().boiler_status().unwrap());
        assert!(t.relay().is_on());
        assert_eq!(t.store().actions(), vec!["BOILER_TURNED_ON".to_string()]);

        let logged = &t.store().action_rows()[0];
        assert_eq!(logged.current_temp_c, Some(19.0));
        assert_eq!(logged.target_temp_c, Some(21.0));
        assert_eq!(logged.boiler_on, Some(true));
    }

    #[test]
    fn slightly_warm_room_keeps_boiler_on() {
        let t = thermostat(Some(21.0), Some(21.3), true);
        let report = t.control_logic().expect("control cycle");

        assert_eq!(report.action, ControlAction::NoChange);
        assert_eq!(report.temp_diff, Some(-0.3));
        assert!(t.store().boiler_status().unwrap());
        assert_eq!(t.relay().switch_calls(), 0);
        assert!(t.store().actions().is_empty());
    }

    #[test]
    fn warm_room_turns_boiler_off() {
        let t = thermostat(Some(21.0), Some(21.6), true);
        let report = t.control_logic().expect("control cycle");

        assert_eq!(report.action, ControlAction::TurnedOff);
        assert_eq!(report.temp_diff, Some(-0.6));
        assert!(!t.store().boiler_status().unwrap());
        assert_eq!(t.store().actions(), vec!["BOILER_TURNED_OFF".to_string()]);
    }

    #[test]
    fn band_edge_reading_switches_and_reports_consistently() {
        let t = thermostat(Some(16.4), Some(15.9), false);
        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.action, ControlAction::TurnedOn);
        assert_eq!(report.temp_diff, Some(0.5));
        assert_eq!(t.status_full().unwrap().status_text, "Heating needed");

        let t = thermostat(Some(31.8), Some(32.3), true);
        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.action, ControlAction::TurnedOff);
        assert_eq!(report.temp_diff, Some(-0.5));
        assert_eq!(t.status_full().unwrap().status_text, "Temperature above target");
    }

    #[test]
    fn relay_failure_does_not_claim_success() {
        let t = thermostat(Some(21.0), Some(18.0), false);
        t.relay().set_reachable(false);

        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.action, ControlAction::Error);
        assert_eq!(report.reason, Some(ControlFailure::ErrorTurningOn));
        assert_eq!(report.boiler_status, Some(false));
        assert!(!t.store().boiler_status().unwrap());
        assert!(t.store().actions().is_empty());
    }

    #[test]
    fn relay_failure_when_turning_off_keeps_boiler_on() {
        let t = thermostat(Some(21.0), Some(23.0), true);
        t.relay().set_reachable(false);

        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.reason, Some(ControlFailure::ErrorTurningOff));
        assert!(t.store().boiler_status().unwrap());
    }

    #[test]
    fn disabled_thermostat_does_nothing() {
        for (current, boiler_on) in [(5.0, false), (35.0, true)] {
            let t = thermostat(Some(21.0), Some(current), boiler_on);
            t.store().set_thermostat_enabled(false).unwrap();

            let report = t.control_logic().expect("control cycle");
            assert_eq!(report, ControlReport::disabled());
            assert_eq!(t.store().boiler_status().unwrap(), boiler_on);
            assert_eq!(t.relay().switch_calls(), 0);
            assert!(t.store().actions().is_empty());
        }
    }

    #[test]
    fn disabled_wins_over_missing_inputs() {
        let t = thermostat(None, None, true);
        t.store().set_thermostat_enabled(false).unwrap();

        assert_eq!(t.control_logic().expect("control cycle"), ControlReport::disabled());
        assert!(t.store().boiler_status().unwrap());
        assert_eq!(t.relay().switch_calls(), 0);
    }

    #[test]
    fn missing_reading_and_target_are_transient_errors() {
        let t = thermostat(Some(21.0), None, false);
        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.action, ControlAction::Error);
        assert_eq!(report.reason, Some(ControlFailure::NoTemperatureReading));

        let t = thermostat(None, Some(18.0), false);
        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.reason, Some(ControlFailure::NoTargetTemperature));
        assert_eq!(t.relay().switch_calls(), 0);
    }

    #[test]
    fn store_failure_is_an_err() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        t.store().set_failing(true);
        assert!(matches!(t.control_logic(), Err(ThermostatError::Store(_))));
    }

    #[test]
    fn in_band_cycles_never_touch_the_boiler() {
        for start_on in [false, true] {
            let t = thermostat(Some(21.0), Some(20.7), start_on);
            for current in [20.7, 21.2, 20.9, 21.4, 20.6] {
                t.store().set_current_temperature(Some(current));
                let report = t.control_logic().expect("control cycle");
                assert_eq!(report.action, ControlAction::NoChange);
            }
            assert_eq!(t.store().boiler_status().unwrap(), start_on);
            assert_eq!(t.relay().switch_calls(), 0);
        }
    }

    #[test]
    fn sync_repairs_drift_from_relay() {
        let t = thermostat(Some(21.0), Some(20.0), false);
        t.relay().force_state(true);

        let outcome = t.sync_boiler_with_shelly().expect("sync");
        assert_eq!(outcome, SyncOutcome::Repaired { stored: false, actual: true });
        assert!(t.store().boiler_status().unwrap());
        assert_eq!(t.store().actions(), vec!["SYNC_DB_WITH_SHELLY".to_string()]);
        assert_eq!(t.relay().switch_calls(), 0);

        let again = t.sync_boiler_with_shelly().expect("sync");
        assert_eq!(again, SyncOutcome::InSync { is_on: true });
        assert_eq!(t.store().actions().len(), 1);
    }

    #[test]
    fn sync_with_unreachable_relay_changes_nothing() {
        let t = thermostat(Some(21.0), Some(20.0), true);
        t.relay().set_reachable(false);

        let outcome = t.sync_boiler_with_shelly().expect("sync");
        assert!(!outcome.is_synced());
        assert!(t.store().boiler_status().unwrap());
        assert!(t.store().actions().is_empty());
    }

    #[test]
    fn switch_recorded_only_in_relay_when_store_write_fails() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        t.store().fail_boiler_writes(true);

        let err = t.control_logic().unwrap_err();
        assert!(matches!(err, ThermostatError::StoreAfterSwitch { on: true, .. }));
        assert!(t.relay().is_on());
        assert!(!t.store().boiler_status().unwrap());

        t.store().fail_boiler_writes(false);
        let outcome = t.sync_boiler_with_shelly().expect("sync");
        assert!(matches!(outcome, SyncOutcome::Repaired { actual: true, .. }));
        assert!(t.store().boiler_status().unwrap());
    }

    #[test]
    fn manual_override_matches_automatic_switch() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        t.set_boiler(true).expect("override");

        assert!(t.store().boiler_status().unwrap());
        let logged = &t.store().action_rows()[0];
        assert_eq!(logged.action, "BOILER_TURNED_ON");
        assert_eq!(logged.current_temp_c, Some(19.0));
        assert_eq!(logged.target_temp_c, Some(21.0));

        t.relay().set_reachable(false);
        assert!(matches!(t.set_boiler(false), Err(ThermostatError::Relay(_))));
        assert!(t.store().boiler_status().unwrap());
    }

    #[test]
    fn target_and_enabled_updates_are_logged() {
        let t = thermostat(None, Some(19.0), false);
        t.set_target_temperature(22.5).expect("set target");
        t.set_thermostat_enabled(false).expect("disable");
        t.set_thermostat_enabled(true).expect("enable");

        assert_eq!(t.store().target_temperature().unwrap(), Some(22.5));
        assert_eq!(
            t.store().actions(),
            vec!["TARGET_TEMP_CHANGED", "THERMOSTAT_DISABLED", "THERMOSTAT_ENABLED"]
        );
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        for bad in [f64::NAN, f64::INFINITY, 2.0, 40.0] {
            assert!(matches!(
                t.set_target_temperature(bad),
                Err(ThermostatError::InvalidTarget(_))
            ));
        }
        assert_eq!(t.store().target_temperature().unwrap(), Some(21.0));
    }

    #[test]
    fn action_log_failure_does_not_block_switch() {
        let t = thermostat(Some(21.0), Some(19.0), false);
        t.store().fail_log_writes(true);

        let report = t.control_logic().expect("control cycle");
        assert_eq!(report.action, ControlAction::TurnedOn);
        assert!(t.store().boiler_status().unwrap());
    }

    #[test]
    fn status_text_follows_band() {
        let cases = [
            (19.0, "Heating needed"),
            (21.2, "Target temperature reached"),
            (22.0, "Temperature above target"),
        ];
        for (current, text) in cases {
            let t = thermostat(Some(21.0), Some(current), false);
            let status = t.status_full().expect("status");
            assert_eq!(status.status_text, text, "at {current}");
            assert!(status.thermostat_enabled);
        }

        let t = thermostat(Some(21.0), Some(19.0), true);
        t.store().set_thermostat_enabled(false).unwrap();
        let status = t.status_full().expect("status");
        assert_eq!(status.status_text, "Thermostat disabled");
        assert!(status.boiler_on);
        assert_eq!(status.temp_diff, Some(2.0));

        let t = thermostat(None, Some(19.0), false);
        assert_eq!(t.status_full().unwrap().status_text, "Waiting for data");
    }

    #[test]
    fn override_and_daemon_serialize_on_boiler_lock() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(thermostat(Some(21.0), Some(19.0), false));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let t = Arc::clone(&t);
                thread::spawn(move || {
                    for _ in 0..10 {
                        if i % 2 == 0 {
                            let _ = t.control_logic();
                        } else {
                            let _ = t.set_boiler(i == 1);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker");
        }

        assert_eq!(t.relay().max_concurrent_calls(), 1);
        assert_eq!(t.store().boiler_status().unwrap(), t.relay().is_on());
    }
}
