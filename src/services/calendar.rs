use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Event payload mirrored to the external calendar on confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct EventInput {
    pub summary: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: String,
}

/// External calendar mirror. All calls are best-effort from the flow's
/// point of view: the orchestrator downgrades failures to a soft flag and
/// the local appointment record stays the source of truth.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Returns the external event id to store on the appointment.
    async fn insert_event(&self, event: &EventInput) -> anyhow::Result<String>;

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()>;

    async fn patch_event(
        &self,
        event_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> anyhow::Result<()>;
}

pub struct HttpCalendarClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpCalendarClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

#[async_trait]
impl CalendarSync for HttpCalendarClient {
    async fn insert_event(&self, event: &EventInput) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/events", self.base_url))
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .context("failed to call calendar API")?
            .error_for_status()
            .context("calendar API returned error")?;

        let created: CreatedEvent = resp
            .json()
            .await
            .context("failed to parse calendar response")?;
        Ok(created.id)
    }

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        self.client
            .delete(format!("{}/events/{event_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to call calendar API")?
            .error_for_status()
            .context("calendar API returned error")?;
        Ok(())
    }

    async fn patch_event(
        &self,
        event_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> anyhow::Result<()> {
        self.client
            .patch(format!("{}/events/{event_id}", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "start": start, "end": end }))
            .send()
            .await
            .context("failed to call calendar API")?
            .error_for_status()
            .context("calendar API returned error")?;
        Ok(())
    }
}
