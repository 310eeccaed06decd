//! Connection strings, derived device keys, and SAS tokens

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Parsed hub connection string.
///
/// Device form: `HostName=...;DeviceId=...;SharedAccessKey=...`
/// Module form adds `ModuleId=...` and optionally `GatewayHostName=...`.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub module_id: Option<String>,
    pub shared_access_key: SecretString,
    pub gateway_host_name: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let mut host_name = None;
        let mut device_id = None;
        let mut module_id = None;
        let mut shared_access_key = None;
        let mut gateway_host_name = None;

        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(GatewayError::ConfigError(format!(
                    "Malformed connection string segment: {}",
                    part
                )));
            };
            match key {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "ModuleId" => module_id = Some(value.to_string()),
                // Base64 keys may carry '=' padding; value is the remainder.
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                "GatewayHostName" => gateway_host_name = Some(value.to_string()),
                _ => {}
            }
        }

        let host_name = host_name
            .ok_or_else(|| GatewayError::ConfigError("Connection string missing HostName".to_string()))?;
        let device_id = device_id
            .ok_or_else(|| GatewayError::ConfigError("Connection string missing DeviceId".to_string()))?;
        let shared_access_key = shared_access_key.ok_or_else(|| {
            GatewayError::ConfigError("Connection string missing SharedAccessKey".to_string())
        })?;

        Ok(Self {
            host_name,
            device_id,
            module_id,
            shared_access_key: SecretString::from(shared_access_key),
            gateway_host_name,
        })
    }

    /// Render a device connection string from its parts.
    pub fn format_device(host_name: &str, device_id: &str, shared_access_key: &str) -> String {
        format!(
            "HostName={};DeviceId={};SharedAccessKey={}",
            host_name, device_id, shared_access_key
        )
    }
}

/// Derive the per-device key from the base64 group master key.
///
/// `base64( HMAC-SHA256( base64decode(masterKey), utf8(deviceId) ) )`
pub fn derive_device_key(master_key: &str, device_id: &str) -> Result<String, GatewayError> {
    let key_bytes = BASE64
        .decode(master_key)
        .map_err(|e| GatewayError::ProvisionError(format!("Master key is not valid base64: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|e| GatewayError::ProvisionError(format!("Invalid master key: {}", e)))?;
    mac.update(device_id.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Build a shared-access-signature token for a hub resource.
pub fn generate_sas_token(
    resource_uri: &str,
    key: &SecretString,
    ttl_secs: i64,
) -> Result<String, GatewayError> {
    let expiry = Utc::now().timestamp() + ttl_secs;
    let encoded_uri = url_encode(resource_uri);
    let to_sign = format!("{}\n{}", encoded_uri, expiry);

    let key_bytes = BASE64
        .decode(key.expose_secret())
        .map_err(|e| GatewayError::HubError(format!("Access key is not valid base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|e| GatewayError::HubError(format!("Invalid access key: {}", e)))?;
    mac.update(to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        url_encode(&signature),
        expiry
    ))
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_connection_string() {
        let cs = ConnectionString::parse(
            "HostName=hub.example.com;DeviceId=cam1;SharedAccessKey=a2V5cGFk==",
        )
        .unwrap();

        assert_eq!(cs.host_name, "hub.example.com");
        assert_eq!(cs.device_id, "cam1");
        assert_eq!(cs.module_id, None);
        assert_eq!(cs.shared_access_key.expose_secret(), "a2V5cGFk==");
    }

    #[test]
    fn test_parse_module_connection_string() {
        let cs = ConnectionString::parse(
            "HostName=hub.example.com;DeviceId=edge1;ModuleId=lensgate;SharedAccessKey=a2V5;GatewayHostName=edge1.local",
        )
        .unwrap();

        assert_eq!(cs.module_id.as_deref(), Some("lensgate"));
        assert_eq!(cs.gateway_host_name.as_deref(), Some("edge1.local"));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(ConnectionString::parse("HostName=hub.example.com;DeviceId=cam1").is_err());
        assert!(ConnectionString::parse("DeviceId=cam1;SharedAccessKey=a2V5").is_err());
    }

    #[test]
    fn test_format_device_round_trips() {
        let raw = ConnectionString::format_device("hub.example.com", "cam7", "a2V5");
        let cs = ConnectionString::parse(&raw).unwrap();

        assert_eq!(cs.host_name, "hub.example.com");
        assert_eq!(cs.device_id, "cam7");
    }

    #[test]
    fn test_derive_device_key_deterministic() {
        let master = BASE64.encode(b"group-master-key-material");

        let first = derive_device_key(&master, "cam1").unwrap();
        let second = derive_device_key(&master, "cam1").unwrap();

        assert_eq!(first, second);
        // HMAC-SHA256 output is 32 bytes, 44 chars once base64 encoded.
        assert_eq!(first.len(), 44);
    }

    #[test]
    fn test_derive_device_key_differs_per_device() {
        let master = BASE64.encode(b"group-master-key-material");

        let one = derive_device_key(&master, "cam1").unwrap();
        let two = derive_device_key(&master, "cam2").unwrap();

        assert_ne!(one, two);
    }

    #[test]
    fn test_derive_device_key_rejects_bad_master() {
        assert!(derive_device_key("not-base64!!!", "cam1").is_err());
    }

    #[test]
    fn test_sas_token_shape() {
        let key = SecretString::from(BASE64.encode(b"device-key"));
        let token = generate_sas_token("hub.example.com/devices/cam1", &key, 3600).unwrap();

        assert!(token.starts_with("SharedAccessSignature sr="));
        assert!(token.contains("&sig="));
        assert!(token.contains("&se="));
    }
}
