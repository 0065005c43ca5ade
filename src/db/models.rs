//! Diesel model structs for the thermostat tables.
//!
//! `thermostat_settings` and `boiler_status` hold a single row each, keyed by
//! [`SINGLETON_ID`]; writes are upserts on that key.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::thermostat::ActionKind;
use crate::schema;
use crate::utils::serde_enum_name;

pub const SINGLETON_ID: i32 = 1;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::sensor_readings)]
pub struct SensorReading {
    pub id: i32,
    pub temperature_c: f64,
    pub humidity: f64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::thermostat_settings)]
pub struct ThermostatSettings {
    pub id: i32,
    pub target_temp_c: Option<f64>,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::boiler_status)]
pub struct BoilerStatus {
    pub id: i32,
    pub is_on: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::thermostat_actions)]
pub struct ThermostatAction {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub action: String,
    pub current_temp_c: Option<f64>,
    pub target_temp_c: Option<f64>,
    pub boiler_on: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::thermostat_actions)]
pub struct NewThermostatAction {
    pub time: DateTime<Utc>,
    pub action: String,
    pub current_temp_c: Option<f64>,
    pub target_temp_c: Option<f64>,
    pub boiler_on: Option<bool>,
}

impl NewThermostatAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            time: Utc::now(),
            action: serde_enum_name(&kind).unwrap_or_else(|| format!("{:?}", kind)),
            current_temp_c: None,
            target_temp_c: None,
            boiler_on: None,
        }
    }

    pub fn with_temps(mut self, current: Option<f64>, target: Option<f64>) -> Self {
        self.current_temp_c = current;
        self.target_temp_c = target;
        self
    }

    pub fn with_boiler(mut self, on: bool) -> Self {
        self.boiler_on = Some(on);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_action_carries_log_name_and_context() {
        let row = NewThermostatAction::new(ActionKind::BoilerTurnedOn)
            .with_temps(Some(19.0), Some(21.0))
            .with_boiler(true);
        assert_eq!(row.action, "BOILER_TURNED_ON");
        assert_eq!(row.current_temp_c, Some(19.0));
        assert_eq!(row.target_temp_c, Some(21.0));
        assert_eq!(row.boiler_on, Some(true));
    }
}
