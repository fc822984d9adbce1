use crate::framework::DatabaseProcessor;
use hookline_sdk::objects::{WebhookResponse, WebhookSelector};
use kanau::processor::Processor;
use uuid::Uuid;

/// A registered webhook.
///
/// `(owner_id, key)` is unique. A webhook with `valid = false` is never
/// executed until its owner saves it again.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub key: String,
    /// Operation name of the query, if it has one.
    pub name: Option<String>,
    pub document: String,
    pub variables: serde_json::Value,
    pub url: String,
    pub metadata: serde_json::Value,
    pub valid: bool,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

impl From<&Webhook> for WebhookResponse {
    fn from(w: &Webhook) -> Self {
        WebhookResponse {
            id: w.id,
            key: w.key.clone(),
            name: w.name.clone(),
            document: w.document.clone(),
            variables: w.variables.as_object().cloned().unwrap_or_default(),
            url: w.url.clone(),
            metadata: w.metadata.clone(),
            valid: w.valid,
            created_at: w.created_at.unix_timestamp(),
            updated_at: w.updated_at.unix_timestamp(),
        }
    }
}

/// Data for creating or replacing a webhook, keyed by `(owner_id, key)`.
#[derive(Debug, Clone)]
pub struct UpsertWebhook {
    pub owner_id: Uuid,
    pub key: String,
    pub name: Option<String>,
    pub document: String,
    pub variables: serde_json::Value,
    pub url: String,
    pub metadata: serde_json::Value,
}

impl Processor<UpsertWebhook> for DatabaseProcessor {
    type Output = Webhook;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertWebhook")]
    async fn process(&self, insert: UpsertWebhook) -> Result<Webhook, sqlx::Error> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"
            INSERT INTO webhooks (id, owner_id, key, name, document, variables, url, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (owner_id, key) DO UPDATE SET
                name = EXCLUDED.name,
                document = EXCLUDED.document,
                variables = EXCLUDED.variables,
                url = EXCLUDED.url,
                metadata = EXCLUDED.metadata,
                valid = TRUE,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(insert.owner_id)
        .bind(insert.key)
        .bind(insert.name)
        .bind(insert.document)
        .bind(insert.variables)
        .bind(insert.url)
        .bind(insert.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(webhook)
    }
}

#[derive(Debug, Clone)]
pub struct GetWebhookById {
    pub id: Uuid,
}

impl Processor<GetWebhookById> for DatabaseProcessor {
    type Output = Option<Webhook>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWebhookById")]
    async fn process(&self, query: GetWebhookById) -> Result<Option<Webhook>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = $1")
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetWebhooksByIds {
    pub ids: Vec<Uuid>,
}

impl Processor<GetWebhooksByIds> for DatabaseProcessor {
    type Output = Vec<Webhook>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWebhooksByIds")]
    async fn process(&self, query: GetWebhooksByIds) -> Result<Vec<Webhook>, sqlx::Error> {
        if query.ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = ANY($1)")
            .bind(query.ids)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListWebhooksByOwner {
    pub owner_id: Uuid,
}

impl Processor<ListWebhooksByOwner> for DatabaseProcessor {
    type Output = Vec<Webhook>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListWebhooksByOwner")]
    async fn process(&self, query: ListWebhooksByOwner) -> Result<Vec<Webhook>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(
            "SELECT * FROM webhooks WHERE owner_id = $1 ORDER BY created_at ASC",
        )
        .bind(query.owner_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Delete an owner's webhooks matching the selector, returning the deleted rows.
///
/// Bindings and version rows go with them via `ON DELETE CASCADE`; orphaned
/// channel entries are collected separately by the binding store.
pub struct DeleteWebhooks {
    pub owner_id: Uuid,
    pub selector: WebhookSelector,
}

impl Processor<DeleteWebhooks> for DatabaseProcessor {
    type Output = Vec<Webhook>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteWebhooks")]
    async fn process(&self, cmd: DeleteWebhooks) -> Result<Vec<Webhook>, sqlx::Error> {
        let query = match &cmd.selector {
            WebhookSelector::Id(id) => {
                sqlx::query_as::<_, Webhook>(
                    "DELETE FROM webhooks WHERE owner_id = $1 AND id = $2 RETURNING *",
                )
                .bind(cmd.owner_id)
                .bind(*id)
            }
            WebhookSelector::Key(key) => {
                sqlx::query_as::<_, Webhook>(
                    "DELETE FROM webhooks WHERE owner_id = $1 AND key = $2 RETURNING *",
                )
                .bind(cmd.owner_id)
                .bind(key.clone())
            }
            WebhookSelector::Name(name) => {
                sqlx::query_as::<_, Webhook>(
                    "DELETE FROM webhooks WHERE owner_id = $1 AND name = $2 RETURNING *",
                )
                .bind(cmd.owner_id)
                .bind(name.clone())
            }
        };
        query.fetch_all(&self.pool).await
    }
}

#[derive(Debug, Clone)]
pub struct MarkWebhookInvalid {
    pub id: Uuid,
}

impl Processor<MarkWebhookInvalid> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkWebhookInvalid")]
    async fn process(&self, cmd: MarkWebhookInvalid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhooks SET valid = FALSE, updated_at = NOW() WHERE id = $1 AND valid",
        )
        .bind(cmd.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct RestoreWebhookValid {
    pub id: Uuid,
}

impl Processor<RestoreWebhookValid> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RestoreWebhookValid")]
    async fn process(&self, cmd: RestoreWebhookValid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE webhooks SET valid = TRUE WHERE id = $1 AND NOT valid")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_variables_become_empty_map() {
        let now = time::OffsetDateTime::now_utc();
        let webhook = Webhook {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            key: "k".into(),
            name: None,
            document: "{}".into(),
            variables: serde_json::Value::Null,
            url: "https://example.com/".into(),
            metadata: json!({ "a": 1 }),
            valid: true,
            created_at: now,
            updated_at: now,
        };
        let response = WebhookResponse::from(&webhook);
        assert!(response.variables.is_empty());
        assert_eq!(response.metadata, json!({ "a": 1 }));
        assert_eq!(response.created_at, now.unix_timestamp());
    }
}
