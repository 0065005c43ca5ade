//! Storage seam for the thermostat: the trait the control loop depends on and
//! its PostgreSQL implementation.

use crate::db::models::{
    BoilerStatus, NewThermostatAction, SINGLETON_ID, SensorReading, ThermostatAction, ThermostatSettings,
};
use crate::schema;
use chrono::{Local, NaiveDateTime, Utc};
use diesel::PgConnection;
use diesel::prelude::*;
use log::{debug, warn};
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
pub enum StoreError {
    Query(diesel::result::Error),
    /// Backend-independent failure, used by non-Postgres stores.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Query(e) => write!(f, "query failed: {}", e),
            StoreError::Unavailable(s) => write!(f, "store unavailable: {}", s),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Query(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Query(value)
    }
}

/// Persistent thermostat state, temperature readings and the action log.
///
/// Missing singleton rows read as defaults: no target, thermostat disabled,
/// boiler off.
pub trait ThermostatStore: Send + Sync {
    /// Most recent temperature reading in °C, if any.
    fn current_temperature(&self) -> Result<Option<f64>, StoreError>;

    fn target_temperature(&self) -> Result<Option<f64>, StoreError>;
    fn set_target_temperature(&self, celsius: f64) -> Result<(), StoreError>;

    fn thermostat_enabled(&self) -> Result<bool, StoreError>;
    fn set_thermostat_enabled(&self, enabled: bool) -> Result<(), StoreError>;

    fn boiler_status(&self) -> Result<bool, StoreError>;
    fn set_boiler_status(&self, is_on: bool) -> Result<(), StoreError>;

    fn log_action(&self, entry: &NewThermostatAction) -> Result<(), StoreError>;
    /// Newest first.
    fn recent_actions(&self, limit: i64) -> Result<Vec<ThermostatAction>, StoreError>;
}

pub struct PgStore {
    conn: Mutex<PgConnection>,
    max_reading_age: Option<chrono::Duration>,
}

impl PgStore {
    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
            max_reading_age: None,
        }
    }

    /// Ignore readings older than `max_age` when looking up the current temperature.
    pub fn with_max_reading_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_reading_age = max_age.and_then(|d| chrono::Duration::from_std(d).ok());
        self
    }

    fn conn(&self) -> MutexGuard<'_, PgConnection> {
        // A panic mid-query leaves the connection usable; diesel rolls back on drop.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settings(&self) -> Result<Option<ThermostatSettings>, StoreError> {
        use schema::thermostat_settings::dsl as S;

        Ok(S::thermostat_settings
            .find(SINGLETON_ID)
            .select(ThermostatSettings::as_select())
            .first(&mut *self.conn())
            .optional()?)
    }

    fn boiler(&self) -> Result<Option<BoilerStatus>, StoreError> {
        use schema::boiler_status::dsl as B;

        Ok(B::boiler_status
            .find(SINGLETON_ID)
            .select(BoilerStatus::as_select())
            .first(&mut *self.conn())
            .optional()?)
    }
}

impl ThermostatStore for PgStore {
    fn current_temperature(&self) -> Result<Option<f64>, StoreError> {
        use schema::sensor_readings::dsl as R;

        let mut query = R::sensor_readings
            .select(SensorReading::as_select())
            .order(R::timestamp.desc())
            .into_boxed();
        if let Some(max_age) = self.max_reading_age {
            // readings are stored as naive local time
            match reading_cutoff(Local::now().naive_local(), max_age) {
                Some(cutoff) => query = query.filter(R::timestamp.ge(cutoff)),
                None => warn!("Max reading age {} reaches past the calendar, not filtering", max_age),
            }
        }
        let reading = query.first::<SensorReading>(&mut *self.conn()).optional()?;
        if let Some(r) = &reading {
            debug!("Latest reading: {:.2} °C at {}", r.temperature_c, r.timestamp);
        }
        Ok(reading.map(|r| r.temperature_c))
    }

    fn target_temperature(&self) -> Result<Option<f64>, StoreError> {
        Ok(self.settings()?.and_then(|s| s.target_temp_c))
    }

    fn set_target_temperature(&self, celsius: f64) -> Result<(), StoreError> {
        use schema::thermostat_settings::dsl as S;

        let now = Utc::now();
        diesel::insert_into(S::thermostat_settings)
            .values((
                S::id.eq(SINGLETON_ID),
                S::target_temp_c.eq(Some(celsius)),
                S::updated_at.eq(now),
            ))
            .on_conflict(S::id)
            .do_update()
            .set((S::target_temp_c.eq(Some(celsius)), S::updated_at.eq(now)))
            .execute(&mut *self.conn())?;
        Ok(())
    }

    fn thermostat_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.settings()?.is_some_and(|s| s.enabled))
    }

    fn set_thermostat_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        use schema::thermostat_settings::dsl as S;

        let now = Utc::now();
        diesel::insert_into(S::thermostat_settings)
            .values((S::id.eq(SINGLETON_ID), S::enabled.eq(enabled), S::updated_at.eq(now)))
            .on_conflict(S::id)
            .do_update()
            .set((S::enabled.eq(enabled), S::updated_at.eq(now)))
            .execute(&mut *self.conn())?;
        Ok(())
    }

    fn boiler_status(&self) -> Result<bool, StoreError> {
        Ok(self.boiler()?.is_some_and(|b| b.is_on))
    }

    fn set_boiler_status(&self, is_on: bool) -> Result<(), StoreError> {
        use schema::boiler_status::dsl as B;

        let now = Utc::now();
        diesel::insert_into(B::boiler_status)
            .values((B::id.eq(SINGLETON_ID), B::is_on.eq(is_on), B::updated_at.eq(now)))
            .on_conflict(B::id)
            .do_update()
            .set((B::is_on.eq(is_on), B::updated_at.eq(now)))
            .execute(&mut *self.conn())?;
        Ok(())
    }

    fn log_action(&self, entry: &NewThermostatAction) -> Result<(), StoreError> {
        use schema::thermostat_actions::dsl as A;

        diesel::insert_into(A::thermostat_actions)
            .values(entry)
            .execute(&mut *self.conn())?;
        Ok(())
    }

    fn recent_actions(&self, limit: i64) -> Result<Vec<ThermostatAction>, StoreError> {
        use schema::thermostat_actions::dsl as A;

        let rows = A::thermostat_actions
            .order((A::time.desc(), A::id.desc()))
            .limit(limit)
            .select(ThermostatAction::as_select())
            .load(&mut *self.conn())?;
        Ok(rows)
    }
}

fn reading_cutoff(now: NaiveDateTime, max_age: chrono::Duration) -> Option<NaiveDateTime> {
    now.checked_sub_signed(max_age)
}
