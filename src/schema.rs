//! Handwritten Diesel schema declarations matching `migrations/`.

diesel::table! {
    sensor_readings (id) {
        id -> Int4,
        temperature_c -> Float8,
        humidity -> Float8,
        timestamp -> Timestamp,
    }
}

// Singleton: id is always 1
diesel::table! {
    thermostat_settings (id) {
        id -> Int4,
        target_temp_c -> Nullable<Float8>,
        enabled -> Bool,
        updated_at -> Timestamptz,
    }
}

// Singleton: id is always 1
diesel::table! {
    boiler_status (id) {
        id -> Int4,
        is_on -> Bool,
        updated_at -> Timestamptz,
    }
}

// Append-only audit trail
diesel::table! {
    thermostat_actions (id) {
        id -> Int8,
        time -> Timestamptz,
        action -> Text,
        current_temp_c -> Nullable<Float8>,
        target_temp_c -> Nullable<Float8>,
        boiler_on -> Nullable<Bool>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sensor_readings, thermostat_settings, boiler_status, thermostat_actions,);
