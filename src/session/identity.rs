//! Identity services used by the session controller.

use crate::chain::types::Address;
use crate::clock::Clock;
use crate::roles::error::AccessError;
use crate::roles::resolver::RoleResolver;
use crate::roles::types::{Role, RoleGrant, RoleResolution};
use crate::session::error::IdentityError;
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Resolves wallet identities and exchanges emergency keys.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn check_user(&self, address: Address) -> Result<RoleResolution, IdentityError>;

    async fn emergency_access(&self, address: Address, key: &str) -> Result<RoleGrant, IdentityError>;
}

impl From<AccessError> for IdentityError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::InvalidKey => IdentityError::InvalidKey,
            other => IdentityError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl IdentityService for RoleResolver {
    async fn check_user(&self, address: Address) -> Result<RoleResolution, IdentityError> {
        Ok(self.resolve_role(address).await?)
    }

    async fn emergency_access(&self, address: Address, key: &str) -> Result<RoleGrant, IdentityError> {
        Ok(self.grant_emergency_access(address, key)?)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmergencyBody {
    role: Role,
    is_admin: bool,
    is_system: bool,
}

/// Client of the HTTP user endpoints.
pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            clock,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, IdentityError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| IdentityError::Transport(format!("invalid response: {}", e)));
        }

        if status == reqwest::StatusCode::FORBIDDEN && path.ends_with("/emergency-access") {
            return Err(IdentityError::InvalidKey);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| status.to_string());
        Err(IdentityError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl IdentityService for HttpIdentityClient {
    async fn check_user(&self, address: Address) -> Result<RoleResolution, IdentityError> {
        self.post("/api/users/check", json!({ "walletAddress": address }))
            .await
    }

    async fn emergency_access(&self, address: Address, key: &str) -> Result<RoleGrant, IdentityError> {
        let body: EmergencyBody = self
            .post(
                &format!("/api/users/{}/emergency-access", address),
                json!({ "key": key }),
            )
            .await?;

        Ok(RoleGrant {
            address,
            is_admin: body.is_admin,
            is_system: body.is_system,
            is_owner: false,
            role: Some(body.role),
            expiry: None,
            acquired_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_error_mapping() {
        assert_eq!(IdentityError::from(AccessError::InvalidKey), IdentityError::InvalidKey);
        assert!(matches!(
            IdentityError::from(AccessError::Ledger(crate::chain::error::LedgerError::Unavailable)),
            IdentityError::Unavailable(_)
        ));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HttpIdentityClient::new(
            "http://localhost:3001/",
            Arc::new(crate::clock::SystemClock),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:3001");
    }
}
