//! Customer e-mail for sent quotes: `tera` rendering plus the HTTP provider.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tireline_core::domain::quote::Quote;
use tireline_core::notify::{
    DeliveryReceipt, DispatchError, NotificationDispatcher, OutboundEmail,
};

const HTML_TEMPLATE: &str = "quote_sent.html";
const TEXT_TEMPLATE: &str = "quote_sent.txt";

pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

/// Formats a decimal (string or number) to two places, optionally suffixed
/// with `currency`. Usage: `amount | money(currency="EUR")`
fn tera_money_filter(
    value: &tera::Value,
    args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(raw) => Decimal::from_str(raw)
            .map_err(|error| tera::Error::msg(format!("money filter: {error}")))?,
        tera::Value::Number(number) => number
            .as_f64()
            .and_then(|float| Decimal::try_from(float).ok())
            .unwrap_or(Decimal::ZERO),
        tera::Value::Null => Decimal::ZERO,
        _ => return Err(tera::Error::msg("money filter expects a number or decimal string")),
    };

    let formatted = format!("{:.2}", amount.round_dp(2));
    let rendered = match args.get("currency").and_then(tera::Value::as_str) {
        Some(currency) => format!("{formatted} {currency}"),
        None => formatted,
    };
    Ok(tera::Value::String(rendered))
}

pub struct EmailRenderer {
    tera: Tera,
}

impl EmailRenderer {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_templates(vec![
            (HTML_TEMPLATE, include_str!("../../../templates/email/quote_sent.html.tera")),
            (TEXT_TEMPLATE, include_str!("../../../templates/email/quote_sent.txt.tera")),
        ])?;
        Ok(Self { tera })
    }

    pub fn quote_sent(&self, quote: &Quote) -> Result<OutboundEmail, DispatchError> {
        let mut context = Context::new();
        context.insert("quote", quote);
        context.insert("vehicle_label", &quote.vehicle.as_ref().and_then(|vehicle| vehicle.label()));
        context.insert("has_discount", &(quote.discount_amount > Decimal::ZERO));
        context.insert("valid_until", &quote.valid_until.format("%Y-%m-%d").to_string());

        let render = |name: &str| {
            self.tera.render(name, &context).map_err(|error| DispatchError::Render(error.to_string()))
        };

        Ok(OutboundEmail {
            to: quote.customer_email.clone(),
            subject: format!("Your tire quote {}", quote.quote_number),
            html_body: render(HTML_TEMPLATE)?,
            text_body: render(TEXT_TEMPLATE)?,
        })
    }
}

/// Renders and dispatches the "quote sent" message through whichever
/// provider is configured.
pub struct QuoteMailer {
    renderer: EmailRenderer,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl QuoteMailer {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Result<Self, tera::Error> {
        Ok(Self { renderer: EmailRenderer::new()?, dispatcher })
    }

    pub fn provider(&self) -> &'static str {
        self.dispatcher.name()
    }

    pub async fn quote_sent(&self, quote: &Quote) -> Result<DeliveryReceipt, DispatchError> {
        let email = self.renderer.quote_sent(quote)?;
        self.dispatcher.dispatch(email).await
    }
}

#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    id: String,
}

/// Transactional e-mail API: JSON POST with a bearer API key, answering
/// `{"id": "..."}`.
pub struct HttpEmailDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    from_address: String,
}

impl HttpEmailDispatcher {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DispatchError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpEmailDispatcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn dispatch(&self, email: OutboundEmail) -> Result<DeliveryReceipt, DispatchError> {
        let request = ProviderRequest {
            from: &self.from_address,
            to: &email.to,
            subject: &email.subject,
            html: &email.html_body,
            text: &email.text_body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| DispatchError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status: status.as_u16(), body });
        }

        let accepted: ProviderResponse = response
            .json()
            .await
            .map_err(|error| DispatchError::Transport(format!("unreadable response: {error}")))?;
        tracing::debug!(
            event_name = "notification.http.accepted",
            message_id = %accepted.id,
            "mail provider accepted message"
        );
        Ok(DeliveryReceipt { provider: self.name().to_string(), message_id: accepted.id })
    }
}
