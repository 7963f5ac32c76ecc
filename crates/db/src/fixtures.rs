use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use tireline_core::domain::quote::{QuoteId, QuoteNumber, QuoteStatus};
use tireline_core::errors::DomainError;
use tireline_core::intake::{IntakeDefaults, ItemInput, NewQuoteInput};
use tireline_core::pricing::PricingEngine;

use crate::repositories::{QuoteRepository, RepositoryError};

pub const SEED_ACTOR: &str = "system:seed";

/// Deterministic demo quotes, one per interesting lifecycle position.
const SEED_QUOTES: &[SeedQuoteContract] = &[
    SeedQuoteContract {
        quote_id: "seed-quote-draft-001",
        quote_number: "Q-DEMO-0001",
        customer_name: "Maria Jansen",
        customer_email: "maria.jansen@example.com",
        vehicle: ("Volkswagen", "Golf", 2019, "AB-123-C"),
        items: &[
            SeedItem { name: "Michelin Primacy 4 205/55 R16", quantity: 4, unit_cents: 11_950 },
            SeedItem { name: "Mounting and balancing", quantity: 4, unit_cents: 1_500 },
        ],
        requirements: &["summer tires"],
        target: QuoteStatus::Draft,
        created_days_ago: 3,
        valid_days: 30,
        description: "Fresh draft awaiting review",
    },
    SeedQuoteContract {
        quote_id: "seed-quote-sent-001",
        quote_number: "Q-DEMO-0002",
        customer_name: "Tom de Vries",
        customer_email: "tom.devries@example.com",
        vehicle: ("Toyota", "RAV4", 2021, "GH-456-J"),
        items: &[
            SeedItem {
                name: "Continental AllSeasonContact 225/65 R17",
                quantity: 4,
                unit_cents: 14_900,
            },
            SeedItem { name: "TPMS sensor service", quantity: 1, unit_cents: 2_500 },
        ],
        requirements: &["all season", "run flat preferred"],
        target: QuoteStatus::Sent,
        created_days_ago: 5,
        valid_days: 30,
        description: "Sent to the customer, not opened yet",
    },
    SeedQuoteContract {
        quote_id: "seed-quote-viewed-001",
        quote_number: "Q-DEMO-0003",
        customer_name: "Sanne Bakker",
        customer_email: "sanne.bakker@example.com",
        vehicle: ("BMW", "320i", 2018, "KL-789-M"),
        items: &[SeedItem {
            name: "Pirelli Winter Sottozero 3 225/45 R18",
            quantity: 4,
            unit_cents: 18_500,
        }],
        requirements: &["winter tires"],
        target: QuoteStatus::Viewed,
        created_days_ago: 8,
        valid_days: 30,
        description: "Opened by the customer, no decision yet",
    },
    SeedQuoteContract {
        quote_id: "seed-quote-accepted-001",
        quote_number: "Q-DEMO-0004",
        customer_name: "Pieter Smit",
        customer_email: "pieter.smit@example.com",
        vehicle: ("Ford", "Transit", 2020, "NP-012-Q"),
        items: &[
            SeedItem { name: "Bridgestone Duravis R660 215/65 R16C", quantity: 4, unit_cents: 13_200 },
            SeedItem { name: "Wheel alignment", quantity: 1, unit_cents: 6_900 },
        ],
        requirements: &["van tires"],
        target: QuoteStatus::Accepted,
        created_days_ago: 12,
        valid_days: 30,
        description: "Accepted by the customer",
    },
    SeedQuoteContract {
        quote_id: "seed-quote-expired-001",
        quote_number: "Q-DEMO-0005",
        customer_name: "Lotte Visser",
        customer_email: "lotte.visser@example.com",
        vehicle: ("Renault", "Clio", 2016, "RS-345-T"),
        items: &[SeedItem { name: "Goodyear EfficientGrip 185/65 R15", quantity: 2, unit_cents: 8_400 }],
        requirements: &[],
        target: QuoteStatus::Expired,
        created_days_ago: 45,
        valid_days: 14,
        description: "Sent and left to lapse",
    },
];

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Demo dataset for local development and smoke tests.
///
/// Loading is idempotent: quotes whose number already exists are skipped,
/// so `seed` can be re-run against a live database.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(
        repository: &dyn QuoteRepository,
        pricing: &dyn PricingEngine,
        now: DateTime<Utc>,
    ) -> Result<SeedResult, SeedError> {
        let mut result = SeedResult::default();

        for contract in SEED_QUOTES {
            let number = QuoteNumber(contract.quote_number.to_string());
            if repository.find_by_number(&number).await?.is_some() {
                result.skipped.push(contract.quote_number);
                continue;
            }

            contract.seed(repository, pricing, now).await?;
            result.quotes_seeded.push(QuoteSeedInfo {
                quote_number: contract.quote_number,
                status: contract.target,
                description: contract.description,
            });
        }

        tracing::info!(
            event_name = "seed.loaded",
            seeded = result.quotes_seeded.len(),
            skipped = result.skipped.len(),
            "demo quotes loaded"
        );
        Ok(result)
    }

    /// Checks every demo quote is present with its expected status and items.
    pub async fn verify(
        repository: &dyn QuoteRepository,
        now: DateTime<Utc>,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_QUOTES {
            let number = QuoteNumber(contract.quote_number.to_string());
            let present = match repository.find_by_number(&number).await? {
                Some(quote) => {
                    quote.effective_status(now) == contract.target
                        && quote.items.len() == contract.items.len()
                }
                None => false,
            };
            checks.push((contract.quote_number, present));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(repository: &dyn QuoteRepository) -> Result<(), RepositoryError> {
        for contract in SEED_QUOTES {
            repository.delete(&QuoteId(contract.quote_id.to_string())).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedItem {
    name: &'static str,
    quantity: u32,
    unit_cents: i64,
}

#[derive(Debug, Clone, Copy)]
struct SeedQuoteContract {
    quote_id: &'static str,
    quote_number: &'static str,
    customer_name: &'static str,
    customer_email: &'static str,
    vehicle: (&'static str, &'static str, u16, &'static str),
    items: &'static [SeedItem],
    requirements: &'static [&'static str],
    target: QuoteStatus,
    created_days_ago: i64,
    valid_days: u32,
    description: &'static str,
}

impl SeedQuoteContract {
    fn input(&self) -> NewQuoteInput {
        let (make, model, year, plate) = self.vehicle;
        NewQuoteInput {
            customer_name: self.customer_name.to_string(),
            customer_email: self.customer_email.to_string(),
            vehicle_make: Some(make.to_string()),
            vehicle_model: Some(model.to_string()),
            vehicle_year: Some(year),
            license_plate: Some(plate.to_string()),
            requirements: self.requirements.iter().map(|value| value.to_string()).collect(),
            valid_days: Some(self.valid_days),
            items: self
                .items
                .iter()
                .map(|item| ItemInput {
                    name: item.name.to_string(),
                    quantity: item.quantity,
                    unit_price: Decimal::new(item.unit_cents, 2),
                    ..ItemInput::default()
                })
                .collect(),
            ..NewQuoteInput::default()
        }
    }

    /// Inserts the draft, then walks it to the target status through the
    /// same transitions the workflow would record.
    async fn seed(
        &self,
        repository: &dyn QuoteRepository,
        pricing: &dyn PricingEngine,
        now: DateTime<Utc>,
    ) -> Result<(), SeedError> {
        let created_at = now - Duration::days(self.created_days_ago);
        let mut quote = self.input().into_quote(
            pricing,
            IntakeDefaults::default(),
            Some(SEED_ACTOR.to_string()),
            created_at,
        )?;
        quote.id = QuoteId(self.quote_id.to_string());
        quote.quote_number = QuoteNumber(self.quote_number.to_string());
        repository.insert(&quote).await?;

        let sent_at = created_at + Duration::hours(1);
        let mut transitions = Vec::new();
        if self.target != QuoteStatus::Draft {
            transitions.push(quote.mark_sent(SEED_ACTOR, sent_at)?);
        }
        if matches!(self.target, QuoteStatus::Viewed | QuoteStatus::Accepted) {
            transitions.extend(quote.mark_viewed(SEED_ACTOR, sent_at + Duration::days(1)));
        }
        if self.target == QuoteStatus::Accepted {
            transitions.push(quote.record_response(
                QuoteStatus::Accepted,
                SEED_ACTOR,
                sent_at + Duration::days(2),
            )?);
        }
        if self.target == QuoteStatus::Expired {
            let lapsed_at = quote.valid_until + Duration::minutes(1);
            transitions.push(quote.apply_status(QuoteStatus::Expired, SEED_ACTOR, lapsed_at));
        }

        for transition in &transitions {
            repository.record_transition(&quote, transition).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SeedResult {
    pub quotes_seeded: Vec<QuoteSeedInfo>,
    pub skipped: Vec<&'static str>,
}

#[derive(Debug)]
pub struct QuoteSeedInfo {
    pub quote_number: &'static str,
    pub status: QuoteStatus,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tireline_core::domain::quote::{QuoteId, QuoteStatus};
    use tireline_core::pricing::FixedRatePricingEngine;

    use super::{DemoSeedDataset, SEED_QUOTES};
    use crate::repositories::{InMemoryQuoteRepository, QuoteRepository, SqlQuoteRepository};
    use crate::{connect_with_settings, migrations};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).single().expect("valid timestamp")
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        let repository = SqlQuoteRepository::new(pool);
        let pricing = FixedRatePricingEngine::default();

        let first = DemoSeedDataset::load(&repository, &pricing, now()).await.expect("load");
        let first_verification =
            DemoSeedDataset::verify(&repository, now()).await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.quotes_seeded.len(), SEED_QUOTES.len());

        let second = DemoSeedDataset::load(&repository, &pricing, now()).await.expect("reload");
        assert!(second.quotes_seeded.is_empty());
        assert_eq!(second.skipped.len(), SEED_QUOTES.len());

        let second_verification =
            DemoSeedDataset::verify(&repository, now()).await.expect("re-verify");
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn seeded_quotes_carry_history_and_lifecycle_timestamps() {
        let repository = InMemoryQuoteRepository::default();
        DemoSeedDataset::load(&repository, &FixedRatePricingEngine::default(), now())
            .await
            .expect("load");

        let accepted_id = QuoteId("seed-quote-accepted-001".to_string());
        let accepted =
            repository.find_by_id(&accepted_id).await.expect("find").expect("accepted quote");
        assert_eq!(accepted.status, QuoteStatus::Accepted);
        assert!(accepted.sent_at.is_some());
        assert!(accepted.viewed_at.is_some());
        assert!(accepted.responded_at.is_some());

        let history = repository.status_history(&accepted_id).await.expect("history");
        let steps: Vec<_> = history.iter().map(|transition| transition.to).collect();
        assert_eq!(steps, vec![QuoteStatus::Sent, QuoteStatus::Viewed, QuoteStatus::Accepted]);

        let draft = repository
            .find_by_id(&QuoteId("seed-quote-draft-001".to_string()))
            .await
            .expect("find")
            .expect("draft quote");
        assert_eq!(draft.status, QuoteStatus::Draft);
        assert!(draft.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn clean_removes_every_demo_quote() {
        let repository = InMemoryQuoteRepository::default();
        DemoSeedDataset::load(&repository, &FixedRatePricingEngine::default(), now())
            .await
            .expect("load");

        DemoSeedDataset::clean(&repository).await.expect("clean");

        let verification = DemoSeedDataset::verify(&repository, now()).await.expect("verify");
        assert!(verification.checks.iter().all(|(_, present)| !present));
    }
}
