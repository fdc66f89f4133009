// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection identity and the RBAC gate for prefixed streams.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::HubError;

/// Identity attached to a session at accept time. Immutable afterwards.
///
/// An empty `uid` marks an anonymous connection.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    pub uid: String,
    pub role: String,
}

impl Auth {
    pub fn is_anonymous(&self) -> bool {
        self.uid.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    role: String,
}

/// Verifies RS256 bearer tokens against a configured public key.
pub struct TokenVerifier {
    key: Option<DecodingKey>,
}

impl TokenVerifier {
    /// Build a verifier from the base64-encoded PEM key in the configuration.
    /// `None` leaves the verifier keyless (dev mode, trusted headers).
    pub fn from_config(encoded_pem: Option<&str>) -> Result<Self, HubError> {
        let key = match encoded_pem {
            None => None,
            Some(encoded) => {
                let pem =
                    STANDARD.decode(encoded).map_err(|e| HubError::JwtKey(e.to_string()))?;
                Some(
                    DecodingKey::from_rsa_pem(&pem)
                        .map_err(|e| HubError::JwtKey(e.to_string()))?,
                )
            }
        };
        Ok(Self { key })
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Verify a bearer token. Any failure yields `None`; the connection
    /// proceeds as anonymous and the endpoint decides whether that is enough.
    pub fn verify(&self, token: &str) -> Option<Auth> {
        let key = self.key.as_ref()?;
        let validation = Validation::new(Algorithm::RS256);
        match decode::<Claims>(token, key, &validation) {
            Ok(data) => Some(Auth { uid: data.claims.uid, role: data.claims.role }),
            Err(e) => {
                tracing::debug!(err = %e, "rejected bearer token");
                None
            }
        }
    }
}

/// Role gate for prefixed subscriptions.
///
/// The `system` prefix is checked against the system role list, every other
/// prefix against the admin list. Anonymous sessions carry an empty role and
/// are always denied.
#[derive(Debug, Clone)]
pub struct RbacGate {
    system: Vec<String>,
    admin: Vec<String>,
}

impl RbacGate {
    pub fn new(system: Vec<String>, admin: Vec<String>) -> Self {
        Self { system, admin }
    }

    pub fn allows(&self, prefix: &str, role: &str) -> bool {
        if role.is_empty() {
            return false;
        }
        let roles = if prefix == "system" { &self.system } else { &self.admin };
        roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
