//! Domain types shared by the control loop, the daemon and whatever serves
//! them to a dashboard. All report types serialize to the JSON shapes the
//! HTTP layer returns.

use serde::{Deserialize, Serialize};

/// Entries of the append-only thermostat action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    BoilerTurnedOn,
    BoilerTurnedOff,
    TargetTempChanged,
    ThermostatEnabled,
    ThermostatDisabled,
    SyncDbWithShelly,
}

impl ActionKind {
    pub fn boiler_switched(on: bool) -> Self {
        if on {
            ActionKind::BoilerTurnedOn
        } else {
            ActionKind::BoilerTurnedOff
        }
    }
}

/// Outcome of one control logic invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    TurnedOn,
    TurnedOff,
    NoChange,
    /// Thermostat disabled; nothing was evaluated.
    None,
    Error,
}

/// Why a control cycle ended with [`ControlAction::Error`]. All of these are
/// transient: the next cycle evaluates again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFailure {
    NoTemperatureReading,
    NoTargetTemperature,
    ErrorTurningOn,
    ErrorTurningOff,
}

impl ControlFailure {
    pub fn relay_switch(on: bool) -> Self {
        if on {
            ControlFailure::ErrorTurningOn
        } else {
            ControlFailure::ErrorTurningOff
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReport {
    pub action: ControlAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ControlFailure>,
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub temp_diff: Option<f64>,
    /// Stored boiler state after this cycle.
    pub boiler_status: Option<bool>,
}

impl ControlReport {
    pub fn disabled() -> Self {
        ControlReport {
            action: ControlAction::None,
            reason: None,
            current_temp: None,
            target_temp: None,
            temp_diff: None,
            boiler_status: None,
        }
    }

    /// Whether the daemon should log this outcome at info level.
    pub fn is_noteworthy(&self) -> bool {
        !matches!(self.action, ControlAction::None | ControlAction::NoChange)
    }
}

/// Result of reconciling the stored boiler state with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    InSync { is_on: bool },
    Repaired { stored: bool, actual: bool },
    RelayUnreachable,
}

impl SyncOutcome {
    /// True when the store matches the relay after the sync.
    pub fn is_synced(&self) -> bool {
        !matches!(self, SyncOutcome::RelayUnreachable)
    }
}

pub mod status_text {
    pub const DISABLED: &str = "Thermostat disabled";
    pub const WAITING_FOR_DATA: &str = "Waiting for data";
    pub const HEATING_NEEDED: &str = "Heating needed";
    pub const ABOVE_TARGET: &str = "Temperature above target";
    pub const TARGET_REACHED: &str = "Target temperature reached";
}

/// Dashboard view of the thermostat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatStatus {
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub thermostat_enabled: bool,
    pub boiler_on: bool,
    pub temp_diff: Option<f64>,
    pub status_text: String,
}
