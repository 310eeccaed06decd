//! Camera identity provisioning
//!
//! Derives a per-camera key from the fleet master key, registers the camera
//! with the identity service under the gateway's scope, and turns the
//! assignment into a hub connection string for the device proxy.

pub mod identity;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use identity_api::models::{GatewayBinding, RegistrationPayload};

use crate::errors::GatewayError;
use crate::hub::auth;
use crate::provision::identity::IdentityApi;

/// Inputs for provisioning one camera, taken from the module settings
pub struct ProvisionRequest<'a> {
    pub identity_host: &'a str,
    pub scope_id: &'a str,
    pub master_key: &'a SecretString,
    pub camera_id: &'a str,
    pub model_id: &'a str,
    pub gateway_instance_id: &'a str,
    pub gateway_module_id: &'a str,
}

/// A provisioned camera identity, ready to connect
#[derive(Debug)]
pub struct ProvisionedIdentity {
    pub assigned_hub: String,
    pub connection_string: SecretString,
}

/// Register one camera identity and build its connection string.
///
/// A failure here leaves nothing to clean up: either the identity service
/// rejected the registration, or the response carried no assignment.
pub async fn provision_camera(
    identity: &dyn IdentityApi,
    request: &ProvisionRequest<'_>,
) -> Result<ProvisionedIdentity, GatewayError> {
    let derived_key = SecretString::from(auth::derive_device_key(
        request.master_key.expose_secret(),
        request.camera_id,
    )?);

    let payload = RegistrationPayload {
        model_id: request.model_id.to_string(),
        gateway: GatewayBinding {
            instance_id: request.gateway_instance_id.to_string(),
            module_id: request.gateway_module_id.to_string(),
        },
    };

    let response = identity
        .register(
            request.identity_host,
            request.scope_id,
            request.camera_id,
            &derived_key,
            &payload,
        )
        .await?;

    let state = response.registration_state.ok_or_else(|| {
        GatewayError::ProvisionError("Registration response carried no state".to_string())
    })?;

    let assigned = state
        .status
        .as_deref()
        .map(|s| s.eq_ignore_ascii_case("assigned"))
        .unwrap_or(false);
    if !assigned {
        let message = state.error_message.unwrap_or_else(|| {
            format!(
                "Registration for {} ended in state {}",
                request.camera_id,
                state.status.as_deref().unwrap_or("unknown")
            )
        });
        return Err(GatewayError::ProvisionError(message));
    }

    let assigned_hub = state.assigned_hub.ok_or_else(|| {
        GatewayError::ProvisionError("Registration response carried no assigned hub".to_string())
    })?;

    info!("Camera {} assigned to hub {}", request.camera_id, assigned_hub);

    let connection_string = auth::ConnectionString::format_device(
        &assigned_hub,
        request.camera_id,
        derived_key.expose_secret(),
    );

    Ok(ProvisionedIdentity {
        assigned_hub,
        connection_string: SecretString::from(connection_string),
    })
}
