//! Signed bearer sessions for the admin API.
//!
//! A token is `v1.<hex subject>.<role>.<expiry unix secs>.<hex hmac>`, where
//! the HMAC-SHA256 covers everything before the final dot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "customer" => Ok(Self::Customer),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub subject: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Actor label recorded in status history and audit events.
    pub fn actor(&self) -> String {
        format!("{}:{}", self.role, self.subject)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed token")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("role `{0}` is not allowed here")]
    Forbidden(Role),
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("session subject must not be empty")]
    EmptySubject,
    #[error("token lifetime is out of range")]
    LifetimeOutOfRange,
}

#[derive(Clone, Debug)]
pub struct SessionSigner {
    secret: SecretString,
    default_ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: SecretString, ttl_hours: u32) -> Self {
        Self { secret, default_ttl: Duration::hours(i64::from(ttl_hours)) }
    }

    /// Expiry for a token issued at `issued_at`, falling back to the
    /// configured lifetime.
    pub fn expires_at(
        &self,
        issued_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<DateTime<Utc>, AuthError> {
        issued_at
            .checked_add_signed(ttl.unwrap_or(self.default_ttl))
            .ok_or(AuthError::LifetimeOutOfRange)
    }

    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        issued_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<String, AuthError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(AuthError::EmptySubject);
        }

        let expires_at = self.expires_at(issued_at, ttl)?;
        let payload = format!(
            "{TOKEN_VERSION}.{}.{}.{}",
            hex::encode(subject.as_bytes()),
            role.as_str(),
            expires_at.timestamp()
        );
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let (payload, signature) = token.trim().rsplit_once('.').ok_or(AuthError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let mut parts = payload.split('.');
        let (Some(version), Some(subject), Some(role), Some(expiry), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };
        if version != TOKEN_VERSION {
            return Err(AuthError::Malformed);
        }

        let subject = hex::decode(subject)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(AuthError::Malformed)?;
        let role = role.parse::<Role>()?;
        let expires_at = expiry
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or(AuthError::Malformed)?;
        if expires_at <= now {
            return Err(AuthError::Expired(expires_at));
        }

        Ok(Principal { subject, role, expires_at })
    }

    /// Verifies and additionally requires the admin role.
    pub fn verify_admin(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let principal = self.verify(token, now)?;
        if principal.role != Role::Admin {
            return Err(AuthError::Forbidden(principal.role));
        }
        Ok(principal)
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::Malformed)?;
        mac.update(payload);
        Ok(mac)
    }
}

/// Pulls the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?.trim();
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.trim())
}
