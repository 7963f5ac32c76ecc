//! Outbound customer notification contract. Providers implement
//! [`NotificationDispatcher`]; the quote service calls it after the status
//! change has been committed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub provider: String,
    pub message_id: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("could not render notification: {0}")]
    Render(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, email: OutboundEmail) -> Result<DeliveryReceipt, DispatchError>;
}

/// Writes the message to the log instead of delivering it. Default provider
/// for local development.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn dispatch(&self, email: OutboundEmail) -> Result<DeliveryReceipt, DispatchError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        tracing::info!(
            event_name = "notification.logged",
            message_id = %message_id,
            to = %email.to,
            subject = %email.subject,
            "quote notification written to log"
        );
        Ok(DeliveryReceipt { provider: self.name().to_string(), message_id })
    }
}

/// Captures dispatched messages; optionally fails every call.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    failure: Arc<Mutex<Option<DispatchError>>>,
}

impl RecordingDispatcher {
    pub fn failing(error: DispatchError) -> Self {
        let dispatcher = Self::default();
        dispatcher.fail_with(Some(error));
        dispatcher
    }

    pub fn fail_with(&self, error: Option<DispatchError>) {
        match self.failure.lock() {
            Ok(mut failure) => *failure = error,
            Err(poisoned) => *poisoned.into_inner() = error,
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn configured_failure(&self) -> Option<DispatchError> {
        match self.failure.lock() {
            Ok(failure) => failure.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn dispatch(&self, email: OutboundEmail) -> Result<DeliveryReceipt, DispatchError> {
        if let Some(error) = self.configured_failure() {
            return Err(error);
        }

        let message_id = {
            let mut sent = match self.sent.lock() {
                Ok(sent) => sent,
                Err(poisoned) => poisoned.into_inner(),
            };
            sent.push(email);
            format!("recorded-{}", sent.len())
        };
        Ok(DeliveryReceipt { provider: self.name().to_string(), message_id })
    }
}
