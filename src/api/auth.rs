//! Caller identification and role gating for HTTP handlers.

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::chain::mock::DEFAULT_OPERATOR;
use crate::chain::types::Address;
use crate::roles::gate::Requirement;
use axum::http::HeaderMap;
use log::warn;

/// Header carrying the caller's wallet address.
pub const WALLET_HEADER: &str = "x-wallet-address";

/// Caller address from the request body's `walletAddress`, else the wallet header.
///
/// In development a missing address falls back to the default operator.
pub fn caller_address(
    headers: &HeaderMap,
    body_address: Option<&str>,
    development: bool,
) -> Result<Address, ApiError> {
    let raw = body_address
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            headers
                .get(WALLET_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.trim().is_empty())
        });

    match raw {
        Some(raw) => Ok(raw.parse()?),
        None if development => {
            warn!(
                "No wallet address supplied, using development default {}",
                DEFAULT_OPERATOR.short()
            );
            Ok(DEFAULT_OPERATOR)
        }
        None => Err(ApiError::MissingAddress),
    }
}

/// Identify the caller and check `requirement`.
///
/// Development mode grants access without consulting the ledger.
pub async fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    body_address: Option<&str>,
    requirement: Requirement,
) -> Result<Address, ApiError> {
    let address = caller_address(headers, body_address, state.development)?;

    if state.development {
        warn!(
            "Development mode: granting {} access to {} without role check",
            requirement,
            address.short()
        );
        return Ok(address);
    }

    state.gate.authorize(address, requirement).await?;
    Ok(address)
}
