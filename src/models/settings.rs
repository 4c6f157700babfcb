use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Type tag for a configuration value's canonical string form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SettingType {
    String,
    Boolean,
    Integer,
    Json,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Setting {
    pub id: i64,
    pub setting_key: String,
    pub setting_value: Option<String>,
    pub setting_type: SettingType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed projection of a stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Json(serde_json::Value),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical string form stored in the database.
    pub fn to_stored(&self) -> String {
        match self {
            SettingValue::String(s) => s.clone(),
            SettingValue::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            SettingValue::Integer(i) => i.to_string(),
            SettingValue::Json(v) => v.to_string(),
        }
    }

    /// Parse a stored string back into its typed projection.
    ///
    /// Invalid representations fall back to the type's zero value so
    /// settings reads never fail.
    pub fn from_stored(raw: &str, ty: SettingType) -> SettingValue {
        match ty {
            SettingType::String => SettingValue::String(raw.to_string()),
            SettingType::Boolean => SettingValue::Boolean(matches!(
                raw.to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            SettingType::Integer => SettingValue::Integer(raw.parse().unwrap_or(0)),
            SettingType::Json => SettingValue::Json(
                serde_json::from_str(raw).unwrap_or(serde_json::Value::Object(Default::default())),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_round_trip() {
        let v = SettingValue::Boolean(true);
        let stored = v.to_stored();
        assert_eq!(stored, "true");
        assert_eq!(SettingValue::from_stored(&stored, SettingType::Boolean), v);
    }

    #[test]
    fn test_boolean_accepts_loose_forms() {
        for raw in ["true", "1", "yes", "on", "True"] {
            assert_eq!(
                SettingValue::from_stored(raw, SettingType::Boolean),
                SettingValue::Boolean(true),
                "raw = {}",
                raw
            );
        }
        assert_eq!(
            SettingValue::from_stored("false", SettingType::Boolean),
            SettingValue::Boolean(false)
        );
    }

    #[test]
    fn test_integer_round_trip() {
        let v = SettingValue::Integer(42);
        assert_eq!(
            SettingValue::from_stored(&v.to_stored(), SettingType::Integer),
            v
        );
    }

    #[test]
    fn test_invalid_integer_falls_back_to_zero() {
        assert_eq!(
            SettingValue::from_stored("not-a-number", SettingType::Integer),
            SettingValue::Integer(0)
        );
    }

    #[test]
    fn test_json_round_trip() {
        let v = SettingValue::Json(serde_json::json!({"k": [1, 2, 3]}));
        assert_eq!(
            SettingValue::from_stored(&v.to_stored(), SettingType::Json),
            v
        );
    }
}
