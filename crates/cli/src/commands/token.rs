use chrono::{Duration, Utc};
use serde_json::json;
use tireline_core::auth::{Role, SessionSigner};
use tireline_core::config::LoadOptions;

use crate::commands::{load_config, CommandResult};

/// Issues a signed session token for the admin API.
pub fn run(
    options: LoadOptions,
    subject: &str,
    role: &str,
    ttl_hours: Option<u32>,
) -> CommandResult {
    let config = match load_config("token", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let role = match role.parse::<Role>() {
        Ok(role) => role,
        Err(error) => {
            return CommandResult::failure("token", "invalid_argument", error.to_string(), 2);
        }
    };

    let signer =
        SessionSigner::new(config.auth.session_secret.clone(), config.auth.session_ttl_hours);
    let issued_at = Utc::now();
    let ttl = ttl_hours.map(|hours| Duration::hours(i64::from(hours)));
    let issued = signer.issue(subject, role, issued_at, ttl).and_then(|token| {
        signer.expires_at(issued_at, ttl).map(|expires_at| (token, expires_at))
    });

    match issued {
        Ok((token, expires_at)) => CommandResult::success_with(
            "token",
            format!("issued {role} token for {}", subject.trim()),
            Some(json!({
                "token": token,
                "subject": subject.trim(),
                "role": role,
                "expiresAt": expires_at.to_rfc3339(),
            })),
        ),
        Err(error) => CommandResult::failure("token", "invalid_argument", error.to_string(), 2),
    }
}
