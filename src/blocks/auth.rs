//! `auth.verify`: JWT verification as a Condition
//!
//! States: no token (401 UNAUTHORIZED), undecodable token (401 INVALID_TOKEN),
//! wrong role (403 INSUFFICIENT_PERMISSIONS), verified. Only the verified state
//! writes `context.user`.

use super::{Block, BlockEnv, BlockOutcome};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFailure {
    Unauthorized,
    InvalidToken,
    InsufficientPermissions,
}

impl AuthFailure {
    fn code(&self) -> &'static str {
        match self {
            AuthFailure::Unauthorized => "UNAUTHORIZED",
            AuthFailure::InvalidToken => "INVALID_TOKEN",
            AuthFailure::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
        }
    }

    fn status(&self) -> u16 {
        match self {
            AuthFailure::InsufficientPermissions => 403,
            _ => 401,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuthFailure::Unauthorized => "Authentication token is missing",
            AuthFailure::InvalidToken => "Authentication token is invalid or expired",
            AuthFailure::InsufficientPermissions => "User lacks the required role",
        }
    }

    fn into_outcome(self) -> BlockOutcome {
        let authenticated = self == AuthFailure::InsufficientPermissions;
        BlockOutcome::failure(Block::AuthVerify, self.code())
            .with_payload("result", Value::Bool(false))
            .with_payload("errorMessage", json!(self.message()))
            .with_payload("errorCode", json!(self.status()))
            .with_payload("isAuthenticated", Value::Bool(authenticated))
            .with_payload("isAuthorized", Value::Bool(false))
    }
}

pub(super) fn execute(env: &BlockEnv<'_>) -> BlockOutcome {
    let variable = env.str("tokenVariable").unwrap_or("token");
    let token = env
        .context
        .lookup(variable)
        .and_then(Value::as_str)
        .map(strip_bearer)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return AuthFailure::Unauthorized.into_outcome();
    };

    let claims = match verify(token, &env.services.settings.jwt_secret) {
        Some(claims) => claims,
        None => {
            tracing::warn!("🔐 Rejected token on node '{}'", env.node_id);
            return AuthFailure::InvalidToken.into_outcome();
        }
    };

    if let Some(required) = env.str("requiredRole") {
        if !has_role(&claims, required) {
            return AuthFailure::InsufficientPermissions.into_outcome();
        }
    }

    let mut payload = serde_json::Map::new();
    payload.insert("result".into(), Value::Bool(true));
    payload.insert("isAuthenticated".into(), Value::Bool(true));
    payload.insert("isAuthorized".into(), Value::Bool(true));
    payload.insert("user".into(), claims.clone());
    BlockOutcome::success(Block::AuthVerify, payload)
        .with_update("user", claims.clone())
        .with_output(claims)
}

/// Drop an optional `Bearer` scheme, matched case-insensitively
fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => raw,
    }
}

/// Decode an HS256 token; `exp` is optional but checked when present
fn verify(token: &str, secret: &str) -> Option<Value> {
    if secret.is_empty() {
        return None;
    }
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    decode::<Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .ok()
        .map(|data| data.claims)
        .filter(Value::is_object)
}

fn has_role(claims: &Value, required: &str) -> bool {
    let single = claims.get("role").and_then(Value::as_str) == Some(required);
    let listed = claims
        .get("roles")
        .and_then(Value::as_array)
        .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some(required)));
    single || listed
}
