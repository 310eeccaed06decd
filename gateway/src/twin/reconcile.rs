//! Settings reconciliation over desired-property patches.
//!
//! Both the module twin and each camera device twin keep a table of writable
//! settings. An incoming desired patch is applied in a single pass: known
//! keys take the patch value, every known key the patch does not mention is
//! reset to its declared default, and the resulting values are staged into a
//! reported-property patch that echoes what the gateway actually applied.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

/// Twin metadata key carried in every desired patch, never a real setting.
pub const VERSION_KEY: &str = "$version";

/// A typed setting value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Str(String),
    Bool(bool),
}

impl SettingValue {
    pub fn as_json(&self) -> Value {
        match self {
            SettingValue::Str(s) => Value::String(s.clone()),
            SettingValue::Bool(b) => Value::Bool(*b),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    current: SettingValue,
    default: SettingValue,
}

/// Table of writable settings with their declared defaults
#[derive(Debug, Clone, Default)]
pub struct SettingsTable {
    entries: BTreeMap<String, Entry>,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Reported-property patch to send back; empty only for an empty table.
    pub report: Map<String, Value>,

    /// Patch keys this table does not recognize.
    pub unknown: Vec<String>,
}

impl SettingsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a string setting with its default value.
    pub fn with_str(mut self, name: &str, default: &str) -> Self {
        self.entries.insert(
            name.to_string(),
            Entry {
                current: SettingValue::Str(default.to_string()),
                default: SettingValue::Str(default.to_string()),
            },
        );
        self
    }

    /// Declare a boolean setting with its default value.
    pub fn with_bool(mut self, name: &str, default: bool) -> Self {
        self.entries.insert(
            name.to_string(),
            Entry {
                current: SettingValue::Bool(default),
                default: SettingValue::Bool(default),
            },
        );
        self
    }

    /// Current value of a string setting; `""` when undeclared or non-string.
    pub fn get_str(&self, name: &str) -> String {
        match self.entries.get(name).map(|e| &e.current) {
            Some(SettingValue::Str(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Current value of a boolean setting; `false` when undeclared or non-bool.
    pub fn get_bool(&self, name: &str) -> bool {
        match self.entries.get(name).map(|e| &e.current) {
            Some(SettingValue::Bool(b)) => *b,
            _ => false,
        }
    }

    /// Apply one desired patch.
    ///
    /// The pass works on a shadow copy and commits it in a single assignment,
    /// so a caller holding the table lock never observes a half-applied pass.
    pub fn reconcile(&mut self, patch: &Value) -> ReconcileOutcome {
        let mut shadow = self.entries.clone();
        let mut handled: BTreeSet<String> = BTreeSet::new();
        let mut report = Map::new();
        let mut unknown = Vec::new();

        if let Some(object) = patch.as_object() {
            for (name, raw) in object {
                if name == VERSION_KEY {
                    continue;
                }

                let Some(entry) = shadow.get_mut(name) else {
                    unknown.push(name.clone());
                    continue;
                };

                // Desired values arrive wrapped as {"value": ...}; anything
                // absent, null, or mistyped falls back to the declared default.
                let coerced = coerce(raw.get("value"), &entry.default);
                report.insert(name.clone(), coerced.as_json());
                entry.current = coerced;
                handled.insert(name.clone());
            }
        }

        // Every known key the patch did not mention reverts to its default
        // and is reported alongside the applied values.
        for (name, entry) in shadow.iter_mut() {
            if handled.contains(name) {
                continue;
            }
            entry.current = entry.default.clone();
            report.insert(name.clone(), entry.default.as_json());
        }

        self.entries = shadow;

        ReconcileOutcome { report, unknown }
    }
}

fn coerce(incoming: Option<&Value>, default: &SettingValue) -> SettingValue {
    match default {
        SettingValue::Str(fallback) => {
            let value = incoming
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.clone());
            SettingValue::Str(value)
        }
        SettingValue::Bool(fallback) => {
            let value = incoming.and_then(Value::as_bool).unwrap_or(*fallback);
            SettingValue::Bool(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> SettingsTable {
        SettingsTable::new()
            .with_str("wpServiceHost", "")
            .with_str("wpPlaybackHost", "localhost:8094")
            .with_bool("wpDebugTelemetry", false)
    }

    #[test]
    fn test_patch_value_applied_and_echoed() {
        let mut table = table();
        let outcome = table.reconcile(&json!({
            "wpServiceHost": { "value": "fleet.example.com" },
            "$version": 4,
        }));

        assert_eq!(table.get_str("wpServiceHost"), "fleet.example.com");
        assert_eq!(
            outcome.report.get("wpServiceHost"),
            Some(&json!("fleet.example.com"))
        );
        assert!(outcome.unknown.is_empty());
    }

    #[test]
    fn test_unknown_keys_only_redefaults_known() {
        let mut table = table();
        table.reconcile(&json!({ "wpServiceHost": { "value": "first.example.com" } }));

        let outcome = table.reconcile(&json!({ "wpMystery": { "value": 12 } }));

        assert_eq!(outcome.unknown, vec!["wpMystery".to_string()]);
        assert_eq!(table.get_str("wpServiceHost"), "");
        assert_eq!(table.get_str("wpPlaybackHost"), "localhost:8094");
        // Every known key is reported after being reset.
        assert_eq!(outcome.report.len(), 3);
    }

    #[test]
    fn test_empty_patch_reports_each_known_key_exactly_once() {
        let mut table = table();
        table.reconcile(&json!({ "wpServiceHost": { "value": "first.example.com" } }));

        let outcome = table.reconcile(&json!({}));

        let keys: Vec<&String> = outcome.report.keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(
            keys,
            vec!["wpDebugTelemetry", "wpPlaybackHost", "wpServiceHost"]
        );
    }

    #[test]
    fn test_version_marker_never_reported() {
        let mut table = table();
        let outcome = table.reconcile(&json!({ "$version": 17 }));

        assert!(!outcome.report.contains_key(VERSION_KEY));
        assert!(outcome.unknown.is_empty());
    }

    #[test]
    fn test_null_value_falls_back_to_declared_default() {
        let mut table = table();
        let outcome = table.reconcile(&json!({
            "wpPlaybackHost": { "value": null },
            "wpDebugTelemetry": { "value": null },
        }));

        assert_eq!(table.get_str("wpPlaybackHost"), "localhost:8094");
        assert!(!table.get_bool("wpDebugTelemetry"));
        assert_eq!(
            outcome.report.get("wpPlaybackHost"),
            Some(&json!("localhost:8094"))
        );
    }

    #[test]
    fn test_mistyped_value_falls_back() {
        let mut table = table();
        table.reconcile(&json!({
            "wpServiceHost": { "value": 99 },
            "wpDebugTelemetry": { "value": "yes" },
        }));

        assert_eq!(table.get_str("wpServiceHost"), "");
        assert!(!table.get_bool("wpDebugTelemetry"));
    }

    #[test]
    fn test_unwrapped_value_treated_as_absent() {
        let mut table = table();
        table.reconcile(&json!({ "wpServiceHost": "bare-string" }));

        assert_eq!(table.get_str("wpServiceHost"), "");
    }

    #[test]
    fn test_bool_applied() {
        let mut table = table();
        table.reconcile(&json!({ "wpDebugTelemetry": { "value": true } }));

        assert!(table.get_bool("wpDebugTelemetry"));
    }

    #[test]
    fn test_non_object_patch_resets_to_defaults() {
        let mut table = table();
        table.reconcile(&json!({ "wpServiceHost": { "value": "x.example.com" } }));

        let outcome = table.reconcile(&Value::Null);

        assert_eq!(table.get_str("wpServiceHost"), "");
        assert_eq!(outcome.report.len(), 3);
    }
}
