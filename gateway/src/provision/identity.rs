//! Fleet identity service client

use async_trait::async_trait;
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use uuid::Uuid;

use identity_api::models::{
    DeviceListResponse, DeviceRecord, RegisterDeviceRequest, RegisterDeviceResponse,
    RegistrationPayload,
};

use crate::errors::GatewayError;
use crate::hub::auth;

const REGISTRATION_SAS_TTL_SECS: i64 = 3600;

/// Device identity operations against the fleet identity service.
///
/// The trait carries host and credentials per call so the orchestrator can
/// follow module-setting changes without rebuilding the client.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Register a device under the fleet scope, in a single round trip.
    async fn register(
        &self,
        host: &str,
        scope_id: &str,
        registration_id: &str,
        derived_key: &SecretString,
        payload: &RegistrationPayload,
    ) -> Result<RegisterDeviceResponse, GatewayError>;

    /// List the device identities registered under this account.
    async fn list_devices(
        &self,
        host: &str,
        token: &SecretString,
    ) -> Result<Vec<DeviceRecord>, GatewayError>;

    /// Fetch the reported properties of one registered device.
    async fn device_properties(
        &self,
        host: &str,
        token: &SecretString,
        device_id: &str,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Remove a device identity.
    async fn delete_device(
        &self,
        host: &str,
        token: &SecretString,
        device_id: &str,
    ) -> Result<(), GatewayError>;
}

/// REST implementation of [`IdentityApi`]
pub struct IdentityClient {
    client: reqwest::Client,
}

impl IdentityClient {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl IdentityApi for IdentityClient {
    async fn register(
        &self,
        host: &str,
        scope_id: &str,
        registration_id: &str,
        derived_key: &SecretString,
        payload: &RegistrationPayload,
    ) -> Result<RegisterDeviceResponse, GatewayError> {
        let url = service_url(
            host,
            &format!("/api/scopes/{}/registrations/{}", scope_id, registration_id),
        );
        debug!("PUT {}", url);

        // Registration authenticates with the derived device key, not the
        // management token.
        let resource = format!("{}/registrations/{}", scope_id, registration_id);
        let sas = auth::generate_sas_token(&resource, derived_key, REGISTRATION_SAS_TTL_SECS)?;
        let authorization = format!("{}&skn=registration", sas);

        let request = RegisterDeviceRequest {
            registration_id: registration_id.to_string(),
            payload: payload.clone(),
        };

        let response = self
            .client
            .put(&url)
            .header(header::AUTHORIZATION, authorization)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Device registration failed: {} - {}", status, body);
            return Err(GatewayError::ProvisionError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }

    async fn list_devices(
        &self,
        host: &str,
        token: &SecretString,
    ) -> Result<Vec<DeviceRecord>, GatewayError> {
        let url = service_url(host, "/api/devices");
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .header("x-request-id", Uuid::new_v4().to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Device listing failed: {} - {}", status, body);
            return Err(GatewayError::ProvisionError(format!("{}: {}", status, body)));
        }

        let body: DeviceListResponse = response.json().await?;
        Ok(body.value)
    }

    async fn device_properties(
        &self,
        host: &str,
        token: &SecretString,
        device_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let url = service_url(host, &format!("/api/devices/{}/properties", device_id));
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .header("x-request-id", Uuid::new_v4().to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Property fetch for {} failed: {} - {}", device_id, status, body);
            return Err(GatewayError::ProvisionError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }

    async fn delete_device(
        &self,
        host: &str,
        token: &SecretString,
        device_id: &str,
    ) -> Result<(), GatewayError> {
        let url = service_url(host, &format!("/api/devices/{}", device_id));
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .header("x-request-id", Uuid::new_v4().to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Device deletion for {} failed: {} - {}", device_id, status, body);
            return Err(GatewayError::ProvisionError(format!("{}: {}", status, body)));
        }

        Ok(())
    }
}

fn service_url(host: &str, path: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        format!("{}{}", trimmed, path)
    } else {
        format!("https://{}{}", trimmed, path)
    }
}
