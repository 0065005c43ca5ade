use serde::Serialize;

/// Serialize a serde-backed enum into its string name (e.g. SCREAMING_SNAKE_CASE).
pub fn serde_enum_name<T: Serialize>(val: &T) -> Option<String> {
    serde_json::to_value(val).ok()?.as_str().map(|s| s.to_string())
}

/// Round to two decimals for reports; sensor values carry float noise.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
