use chrono::Utc;
use serde_json::json;
use tireline_core::audit::{AuditEvent, AuditSink, TracingAuditSink};
use tireline_core::config::LoadOptions;
use tireline_db::repositories::{QuoteRepository, SqlQuoteRepository};

use crate::commands::{load_config, migrated_pool, runtime, CommandResult};

pub const EXPIRE_ACTOR: &str = "system:cli-expire";

/// One-shot expiry sweep: lapsed draft/sent/viewed quotes become `expired`.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("expire", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("expire") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let repository = SqlQuoteRepository::new(pool.clone());
        let transitions = repository
            .expire_overdue(Utc::now(), EXPIRE_ACTOR)
            .await
            .map_err(|error| ("expire", error.to_string(), 5u8));
        pool.close().await;
        transitions
    });

    match result {
        Ok(transitions) => {
            let audit = TracingAuditSink;
            for transition in &transitions {
                audit.emit(AuditEvent::transition(transition, "cli-expire"));
            }
            let ids = transitions.iter().map(|t| t.quote_id.0.clone()).collect::<Vec<_>>();
            CommandResult::success_with(
                "expire",
                format!("expired {} quote(s)", transitions.len()),
                Some(json!({ "expired": ids })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}
