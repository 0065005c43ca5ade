//! Pure hysteresis decision for the boiler. No I/O happens here; the
//! thermostat service gathers the inputs and carries out the decision.

use crate::utils::round2;

pub const DEFAULT_HYSTERESIS_C: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    pub enabled: bool,
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub boiler_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Disabled,
    MissingTemperature,
    MissingTarget,
    TurnOn,
    TurnOff,
    Hold,
}

impl Decision {
    /// Requested relay state, if the decision switches the boiler.
    pub fn switch_to(self) -> Option<bool> {
        match self {
            Decision::TurnOn => Some(true),
            Decision::TurnOff => Some(false),
            _ => None,
        }
    }
}

/// `target - current`, snapped to the reporting precision.
///
/// Decisions, reports and status text all compare this value, so a reading
/// that reports as exactly on the band edge also switches on it.
pub fn temp_diff(current: f64, target: f64) -> f64 {
    round2(target - current)
}

/// Decide whether the boiler should change state.
///
/// The band is symmetric around the target: the boiler turns on once the room
/// is at least `hysteresis` below target and off once it is at least
/// `hysteresis` above. Inside the band the current state is kept.
pub fn decide(inputs: &ControlInputs, hysteresis: f64) -> Decision {
    if !inputs.enabled {
        return Decision::Disabled;
    }
    let Some(current) = inputs.current_temp else {
        return Decision::MissingTemperature;
    };
    let Some(target) = inputs.target_temp else {
        return Decision::MissingTarget;
    };

    let diff = temp_diff(current, target);
    if inputs.boiler_on && diff <= -hysteresis {
        Decision::TurnOff
    } else if !inputs.boiler_on && diff >= hysteresis {
        Decision::TurnOn
    } else {
        Decision::Hold
    }
}
