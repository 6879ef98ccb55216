//! Outbound JSON webhook notifications.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::EventObserver;
use crate::models::event::{FactoryEvent, NotifyCategory};
use crate::session::BoxFuture;
use crate::{AppError, Result};

#[derive(Serialize)]
struct WebhookBody<'a> {
    text: String,
    event: &'a FactoryEvent,
}

/// POSTs `{"text": ..., "event": {...}}` for events in the enabled categories.
pub struct WebhookObserver {
    client: reqwest::Client,
    url: String,
    categories: HashSet<NotifyCategory>,
}

impl WebhookObserver {
    /// Build a webhook observer for `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notify` if the HTTP client cannot be constructed.
    pub fn new(
        url: impl Into<String>,
        categories: impl IntoIterator<Item = NotifyCategory>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Notify(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
            categories: categories.into_iter().collect(),
        })
    }

    /// Whether events of `category` are delivered.
    #[must_use]
    pub fn accepts(&self, category: NotifyCategory) -> bool {
        self.categories.contains(&category)
    }
}

impl EventObserver for WebhookObserver {
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !self.accepts(event.kind.category()) {
                return Ok(());
            }
            let body = WebhookBody {
                text: event.describe(),
                event,
            };
            let response = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .map_err(|err| AppError::Notify(format!("webhook request failed: {err}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Notify(format!("webhook returned {status}")));
            }
            debug!(project = %event.project, engine = %event.engine, "webhook delivered");
            Ok(())
        })
    }
}
