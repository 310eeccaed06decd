//! Module-level settings.
//!
//! The module twin carries the provisioning coordinates for the whole fleet:
//! where the identity service lives, the enrollment master key, and the ids
//! the gateway registers cameras under. All of them arrive as writable
//! properties and reconcile through the common settings table.

use secrecy::SecretString;

use crate::errors::GatewayError;
use crate::fleet::keys;
use crate::twin::reconcile::SettingsTable;

/// Build the module settings table with its declared defaults.
///
/// Every provisioning coordinate defaults to empty, which keeps the gateway
/// idle until an operator pushes real values through the twin.
pub fn module_settings() -> SettingsTable {
    SettingsTable::new()
        .with_str(keys::IDENTITY_SERVICE_HOST, "")
        .with_str(keys::IDENTITY_SERVICE_API_TOKEN, "")
        .with_str(keys::MASTER_PROVISION_KEY, "")
        .with_str(keys::SCOPE_ID, "")
        .with_str(keys::GATEWAY_INSTANCE_ID, "")
        .with_str(keys::GATEWAY_MODULE_ID, "")
        .with_str(keys::PIPELINE_MODULE_ID, "")
        .with_bool(keys::DEBUG_TELEMETRY, false)
        .with_bool(keys::DEBUG_ROUTED_MESSAGE, false)
}

/// Snapshot of the module settings needed to onboard a camera
#[derive(Clone, Debug)]
pub struct ProvisioningSettings {
    pub identity_host: String,
    pub api_token: SecretString,
    pub master_key: SecretString,
    pub scope_id: String,
    pub gateway_instance_id: String,
    pub gateway_module_id: String,
    pub pipeline_module_id: String,
}

impl ProvisioningSettings {
    /// Read a snapshot out of the table.
    ///
    /// An incomplete table is a configuration error naming every missing key,
    /// so the operator sees the full list in one pass.
    pub fn from_table(table: &SettingsTable) -> Result<Self, GatewayError> {
        let mut missing = Vec::new();
        let mut required = |key: &'static str| -> String {
            let value = table.get_str(key);
            if value.trim().is_empty() {
                missing.push(key);
            }
            value
        };

        let snapshot = Self {
            identity_host: required(keys::IDENTITY_SERVICE_HOST),
            api_token: SecretString::from(required(keys::IDENTITY_SERVICE_API_TOKEN)),
            master_key: SecretString::from(required(keys::MASTER_PROVISION_KEY)),
            scope_id: required(keys::SCOPE_ID),
            gateway_instance_id: required(keys::GATEWAY_INSTANCE_ID),
            gateway_module_id: required(keys::GATEWAY_MODULE_ID),
            pipeline_module_id: required(keys::PIPELINE_MODULE_ID),
        };

        if !missing.is_empty() {
            return Err(GatewayError::ConfigError(format!(
                "Gateway provisioning settings are incomplete, missing: {}",
                missing.join(", ")
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured_table() -> SettingsTable {
        let mut table = module_settings();
        table.reconcile(&json!({
            (keys::IDENTITY_SERVICE_HOST): { "value": "identity.example.com" },
            (keys::IDENTITY_SERVICE_API_TOKEN): { "value": "token-1" },
            (keys::MASTER_PROVISION_KEY): { "value": "bWFzdGVyLWtleQ==" },
            (keys::SCOPE_ID): { "value": "scope1" },
            (keys::GATEWAY_INSTANCE_ID): { "value": "edge-box-1" },
            (keys::GATEWAY_MODULE_ID): { "value": "lensgate" },
            (keys::PIPELINE_MODULE_ID): { "value": "pipeline" },
        }));
        table
    }

    #[test]
    fn test_snapshot_from_complete_table() {
        let table = configured_table();

        let snapshot = ProvisioningSettings::from_table(&table)
            .expect("complete table should produce a snapshot");

        assert_eq!(snapshot.identity_host, "identity.example.com");
        assert_eq!(snapshot.scope_id, "scope1");
        assert_eq!(snapshot.gateway_instance_id, "edge-box-1");
        assert_eq!(snapshot.pipeline_module_id, "pipeline");
    }

    #[test]
    fn test_incomplete_table_names_missing_keys() {
        let mut table = module_settings();
        table.reconcile(&json!({
            (keys::IDENTITY_SERVICE_HOST): { "value": "identity.example.com" },
        }));

        let error = ProvisioningSettings::from_table(&table)
            .expect_err("missing settings should be rejected");

        let message = error.to_string();
        assert!(message.contains(keys::MASTER_PROVISION_KEY));
        assert!(message.contains(keys::SCOPE_ID));
        assert!(!message.contains(keys::IDENTITY_SERVICE_HOST));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut table = configured_table();
        table.reconcile(&json!({
            (keys::IDENTITY_SERVICE_HOST): { "value": "identity.example.com" },
            (keys::IDENTITY_SERVICE_API_TOKEN): { "value": "token-1" },
            (keys::MASTER_PROVISION_KEY): { "value": "bWFzdGVyLWtleQ==" },
            (keys::SCOPE_ID): { "value": "   " },
            (keys::GATEWAY_INSTANCE_ID): { "value": "edge-box-1" },
            (keys::GATEWAY_MODULE_ID): { "value": "lensgate" },
            (keys::PIPELINE_MODULE_ID): { "value": "pipeline" },
        }));

        let error = ProvisioningSettings::from_table(&table)
            .expect_err("blank scope should be rejected");

        assert!(error.to_string().contains(keys::SCOPE_ID));
    }
}
