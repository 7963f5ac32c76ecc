//! Fixtures and behaviour checks shared by the SQL and in-memory repository
//! tests, so both stores are held to the same contract.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use tireline_core::domain::catalog::ProductId;
use tireline_core::domain::quote::{
    Quote, QuoteId, QuoteItem, QuoteItemId, QuoteNumber, QuoteStatus, StatusTransition,
    VehicleInfo,
};
use tireline_core::listing::{
    PageRequest, QuoteFilter, QuoteQuery, QuoteSort, SortDirection, SortField,
};

use super::{QuoteRepository, RepositoryError};

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).single().expect("valid date")
}

pub fn item(id: &str, name: &str, quantity: u32, unit_price: Decimal) -> QuoteItem {
    QuoteItem {
        id: QuoteItemId(id.to_string()),
        name: name.to_string(),
        description: None,
        quantity,
        unit_price,
        total_price: unit_price * Decimal::from(quantity),
        product_id: None,
        service_id: None,
    }
}

/// Quote created on October `day` with a 30 day window and a total of
/// `total` (no tax, no discount, single item).
pub fn quote(id: &str, name: &str, status: QuoteStatus, total: i64, day: u32) -> Quote {
    let created = at(day, 9);
    let amount = Decimal::new(total * 100, 2);
    Quote {
        id: QuoteId(id.to_string()),
        quote_number: QuoteNumber(format!("Q-202610{day:02}-{:0>8}", id.to_ascii_uppercase())),
        customer_name: name.to_string(),
        customer_email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        customer_phone: Some("+34 600 000 000".to_string()),
        status,
        items: vec![item(&format!("{id}-item-1"), "All-season tire", 1, amount)],
        subtotal: amount,
        tax_amount: Decimal::new(0, 2),
        discount_amount: Decimal::new(0, 2),
        total_amount: amount,
        currency: "EUR".to_string(),
        valid_until: created + Duration::days(30),
        vehicle: None,
        notes: None,
        requirements: Vec::new(),
        created_by: Some("admin:ops".to_string()),
        created_at: created,
        updated_at: created,
        sent_at: None,
        viewed_at: None,
        responded_at: None,
    }
}

pub fn detailed_quote() -> Quote {
    let mut quote = quote("q1", "Ana Ruiz", QuoteStatus::Draft, 0, 1);
    quote.items = vec![
        QuoteItem {
            product_id: Some(ProductId("tire-225-45-r17".to_string())),
            description: Some("225/45 R17 summer".to_string()),
            ..item("q1-item-1", "Tire A", 4, Decimal::new(5000, 2))
        },
        item("q1-item-2", "Fitting and balancing", 1, Decimal::new(2500, 2)),
    ];
    quote.subtotal = Decimal::new(22500, 2);
    quote.tax_amount = Decimal::new(4725, 2);
    quote.discount_amount = Decimal::new(1000, 2);
    quote.total_amount = Decimal::new(26225, 2);
    quote.vehicle = Some(VehicleInfo {
        make: Some("Seat".to_string()),
        model: Some("Leon".to_string()),
        year: Some(2019),
        license_plate: Some("1234ABC".to_string()),
    });
    quote.notes = Some("Customer prefers Saturday fitting".to_string());
    quote.requirements = vec!["run-flat".to_string(), "low noise".to_string()];
    quote
}

pub async fn round_trips_full_quote(repo: &dyn QuoteRepository) {
    let quote = detailed_quote();
    repo.insert(&quote).await.expect("insert");

    let by_id = repo.find_by_id(&quote.id).await.expect("find by id");
    let by_number = repo.find_by_number(&quote.quote_number).await.expect("find by number");

    assert_eq!(by_id.as_ref(), Some(&quote));
    assert_eq!(by_number, Some(quote));
    assert_eq!(repo.find_by_id(&QuoteId("missing".to_string())).await.expect("find"), None);
}

pub async fn rejects_duplicate_quote_numbers(repo: &dyn QuoteRepository) {
    let first = quote("q1", "Ana Ruiz", QuoteStatus::Draft, 100, 1);
    let mut second = quote("q2", "Luis Gil", QuoteStatus::Draft, 100, 1);
    second.quote_number = first.quote_number.clone();

    repo.insert(&first).await.expect("insert first");
    let error = repo.insert(&second).await.expect_err("duplicate number");

    assert!(matches!(error, RepositoryError::Duplicate(_)));
    assert_eq!(repo.find_by_id(&second.id).await.expect("find"), None);
}

pub async fn filters_sorts_and_pages(repo: &dyn QuoteRepository) {
    for quote in [
        quote("q1", "Ana Ruiz", QuoteStatus::Sent, 300, 1),
        quote("q2", "Ana Ruiz", QuoteStatus::Draft, 100, 2),
        quote("q3", "Luis Gil", QuoteStatus::Sent, 200, 3),
        quote("q4", "Marta Ruiz", QuoteStatus::Sent, 400, 4),
    ] {
        repo.insert(&quote).await.expect("insert");
    }
    let now = at(10, 12);

    let filtered = QuoteQuery {
        filter: QuoteFilter {
            search: Some("RUIZ".to_string()),
            status: Some(QuoteStatus::Sent),
            ..QuoteFilter::default()
        },
        ..QuoteQuery::default()
    };
    let page = repo.list(&filtered, now).await.expect("list");
    let ids: Vec<&str> = page.quotes.iter().map(|quote| quote.id.0.as_str()).collect();
    assert_eq!(ids, vec!["q4", "q1"], "default order is newest first");
    assert_eq!(page.total, 2);
    assert_eq!(page.stats.count(QuoteStatus::Sent), 2);
    assert_eq!(page.stats.total_value, Decimal::new(70000, 2));

    let by_total = QuoteQuery {
        sort: QuoteSort { field: SortField::TotalAmount, direction: SortDirection::Asc },
        page: PageRequest { page: 2, page_size: 3 },
        ..QuoteQuery::default()
    };
    let second_page = repo.list(&by_total, now).await.expect("list page 2");
    assert_eq!(second_page.total, 4);
    assert_eq!(second_page.total_pages(), 2);
    assert_eq!(second_page.quotes.len(), 1);
    assert_eq!(second_page.quotes[0].id.0, "q4");
    assert_eq!(second_page.quotes[0].items.len(), 1);

    let created_window = QuoteFilter {
        created_from: Some(at(2, 0)),
        created_to: Some(at(3, 23)),
        ..QuoteFilter::default()
    };
    let stats = repo.stats(&created_window, now).await.expect("stats");
    assert_eq!(stats.total_quotes, 2);
    assert_eq!(stats.average_value, Decimal::new(15000, 2));
}

pub async fn status_filters_use_effective_status(repo: &dyn QuoteRepository) {
    let mut accepted = quote("q3", "Luis Gil", QuoteStatus::Accepted, 250, 1);
    accepted.responded_at = Some(at(2, 9));
    for quote in [
        quote("q1", "Ana Ruiz", QuoteStatus::Sent, 100, 1),
        quote("q2", "Ana Ruiz", QuoteStatus::Draft, 100, 20),
        accepted,
    ] {
        repo.insert(&quote).await.expect("insert");
    }
    // q1 and q3 were valid until October 31; q2 until November 19.
    let now = Utc.with_ymd_and_hms(2026, 11, 5, 0, 0, 0).single().expect("valid date");

    let expired = QuoteFilter { status: Some(QuoteStatus::Expired), ..QuoteFilter::default() };
    let sent = QuoteFilter { status: Some(QuoteStatus::Sent), ..QuoteFilter::default() };
    let expired_page = repo
        .list(&QuoteQuery { filter: expired, ..QuoteQuery::default() }, now)
        .await
        .expect("list expired");
    assert_eq!(expired_page.quotes.len(), 1);
    assert_eq!(expired_page.quotes[0].id.0, "q1");
    assert_eq!(expired_page.quotes[0].status, QuoteStatus::Sent, "stored status untouched");
    assert_eq!(repo.stats(&sent, now).await.expect("stats").total_quotes, 0);

    let stats = repo.stats(&QuoteFilter::default(), now).await.expect("stats");
    assert_eq!(stats.count(QuoteStatus::Expired), 1);
    assert_eq!(stats.count(QuoteStatus::Draft), 1);
    assert_eq!(stats.count(QuoteStatus::Accepted), 1);
    assert_eq!(stats.accepted_value, Decimal::new(25000, 2));
}

pub async fn status_sort_uses_effective_status(repo: &dyn QuoteRepository) {
    let mut rejected = quote("q2", "Luis Gil", QuoteStatus::Rejected, 100, 1);
    rejected.responded_at = Some(at(2, 9));
    for quote in [quote("q1", "Ana Ruiz", QuoteStatus::Sent, 100, 1), rejected] {
        repo.insert(&quote).await.expect("insert");
    }
    let now = Utc.with_ymd_and_hms(2026, 11, 5, 0, 0, 0).single().expect("valid date");

    let by_status = QuoteQuery {
        sort: QuoteSort { field: SortField::Status, direction: SortDirection::Asc },
        ..QuoteQuery::default()
    };
    let page = repo.list(&by_status, now).await.expect("list");
    let ids: Vec<&str> = page.quotes.iter().map(|quote| quote.id.0.as_str()).collect();
    assert_eq!(ids, vec!["q1", "q2"], "lapsed q1 sorts as expired, ahead of rejected");
}

pub async fn transitions_never_overwrite_lifecycle_timestamps(repo: &dyn QuoteRepository) {
    let mut stored = quote("q1", "Ana Ruiz", QuoteStatus::Sent, 100, 1);
    stored.sent_at = Some(at(1, 10));
    repo.insert(&stored).await.expect("insert");

    let mut stale = stored.clone();
    stale.sent_at = Some(at(5, 10));
    stale.status = QuoteStatus::Viewed;
    stale.viewed_at = Some(at(5, 11));
    stale.updated_at = at(5, 11);
    let transition = StatusTransition {
        quote_id: stored.id.clone(),
        from: QuoteStatus::Sent,
        to: QuoteStatus::Viewed,
        actor: "customer".to_string(),
        occurred_at: at(5, 11),
    };

    let updated = repo
        .record_transition(&stale, &transition)
        .await
        .expect("record")
        .expect("quote exists");
    assert_eq!(updated.status, QuoteStatus::Viewed);
    assert_eq!(updated.sent_at, Some(at(1, 10)));
    assert_eq!(updated.viewed_at, Some(at(5, 11)));
    assert_eq!(repo.status_history(&stored.id).await.expect("history"), vec![transition.clone()]);

    let mut ghost = stale.clone();
    ghost.id = QuoteId("missing".to_string());
    assert_eq!(repo.record_transition(&ghost, &transition).await.expect("record"), None);
}

pub async fn replaces_items_and_totals(repo: &dyn QuoteRepository) {
    let mut quote = detailed_quote();
    repo.insert(&quote).await.expect("insert");

    quote.items = vec![item("q1-item-9", "Tire B", 2, Decimal::new(8999, 2))];
    quote.subtotal = Decimal::new(17998, 2);
    quote.tax_amount = Decimal::new(3780, 2);
    quote.discount_amount = Decimal::new(0, 2);
    quote.total_amount = Decimal::new(21778, 2);
    quote.notes = None;
    quote.updated_at = at(2, 9);

    assert!(repo.update_details(&quote, None).await.expect("update"));
    assert_eq!(repo.find_by_id(&quote.id).await.expect("find"), Some(quote.clone()));

    quote.id = QuoteId("missing".to_string());
    assert!(!repo.update_details(&quote, None).await.expect("update missing"));
}

pub async fn details_and_status_change_commit_together(repo: &dyn QuoteRepository) {
    let mut quote = detailed_quote();
    repo.insert(&quote).await.expect("insert");

    quote.notes = Some("Swap to winter set".to_string());
    quote.updated_at = at(2, 9);
    let transition = quote.apply_status(QuoteStatus::Sent, "admin:ops", at(2, 9));

    assert!(repo.update_details(&quote, Some(&transition)).await.expect("update"));
    let stored = repo.find_by_id(&quote.id).await.expect("find").expect("quote exists");
    assert_eq!(stored.notes.as_deref(), Some("Swap to winter set"));
    assert_eq!(stored.status, QuoteStatus::Sent);
    assert_eq!(stored.sent_at, Some(at(2, 9)));
    assert_eq!(repo.status_history(&quote.id).await.expect("history"), vec![transition]);
}

pub async fn delete_removes_quote_and_history(repo: &dyn QuoteRepository) {
    let mut stored = quote("q1", "Ana Ruiz", QuoteStatus::Draft, 100, 1);
    repo.insert(&stored).await.expect("insert");
    let transition = stored.apply_status(QuoteStatus::Sent, "admin:ops", at(1, 12));
    repo.record_transition(&stored, &transition).await.expect("record");

    assert!(repo.delete(&stored.id).await.expect("delete"));
    assert_eq!(repo.find_by_id(&stored.id).await.expect("find"), None);
    assert!(repo.status_history(&stored.id).await.expect("history").is_empty());
    assert!(!repo.delete(&stored.id).await.expect("delete again"));
}

pub async fn expires_overdue_open_quotes(repo: &dyn QuoteRepository) {
    for quote in [
        quote("q1", "Ana Ruiz", QuoteStatus::Sent, 100, 1),
        quote("q2", "Ana Ruiz", QuoteStatus::Viewed, 100, 2),
        quote("q3", "Luis Gil", QuoteStatus::Accepted, 100, 1),
        quote("q4", "Luis Gil", QuoteStatus::Draft, 100, 25),
    ] {
        repo.insert(&quote).await.expect("insert");
    }
    let now = Utc.with_ymd_and_hms(2026, 11, 10, 0, 0, 0).single().expect("valid date");

    let transitions = repo.expire_overdue(now, "system:expiry-sweep").await.expect("sweep");
    let mut expired: Vec<&str> = transitions.iter().map(|t| t.quote_id.0.as_str()).collect();
    expired.sort_unstable();
    assert_eq!(expired, vec!["q1", "q2"]);
    assert!(transitions.iter().all(|t| t.to == QuoteStatus::Expired));

    let q2 = repo.find_by_id(&QuoteId("q2".to_string())).await.expect("find").expect("q2");
    assert_eq!(q2.status, QuoteStatus::Expired);
    assert_eq!(q2.updated_at, now);
    let history = repo.status_history(&q2.id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from, QuoteStatus::Viewed);
    assert_eq!(history[0].actor, "system:expiry-sweep");

    assert!(repo.expire_overdue(now, "system:expiry-sweep").await.expect("sweep").is_empty());
}
