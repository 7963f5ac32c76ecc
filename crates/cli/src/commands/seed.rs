use chrono::Utc;
use tireline_core::config::LoadOptions;
use tireline_db::repositories::SqlQuoteRepository;
use tireline_db::{DemoSeedDataset, QuoteSeedInfo};

use crate::commands::{
    load_config, migrated_pool, pricing_engine, runtime, CommandResult, StepError,
};

/// Loads the demo quotes. With `reset`, existing demo quotes are removed
/// first so they are rebuilt relative to the current time.
pub fn run(options: LoadOptions, reset: bool) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let repository = SqlQuoteRepository::new(pool.clone());
        let pricing = pricing_engine(&config);
        let now = Utc::now();

        if reset {
            DemoSeedDataset::clean(&repository)
                .await
                .map_err(|error| ("seed_reset", error.to_string(), 5u8))?;
        }

        let seeded = DemoSeedDataset::load(&repository, &pricing, now)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeedDataset::verify(&repository, now)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome: Result<SeedOutput, StepError> = if verification.all_present {
            Ok(SeedOutput { seeded: seeded.quotes_seeded, skipped: seeded.skipped })
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(output) => CommandResult::success("seed", output.message()),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    seeded: Vec<QuoteSeedInfo>,
    skipped: Vec<&'static str>,
}

impl SeedOutput {
    fn message(&self) -> String {
        let mut lines = vec![format!(
            "demo quotes ready: {} seeded, {} already present",
            self.seeded.len(),
            self.skipped.len()
        )];
        lines.extend(self.seeded.iter().map(|info| {
            format!("  - {}: {} ({})", info.quote_number, info.status.as_str(), info.description)
        }));
        lines.join("\n")
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo quotes failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", failed_checks.join(", "))
    }
}
