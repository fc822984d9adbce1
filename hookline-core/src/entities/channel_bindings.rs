use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use std::collections::BTreeSet;
use uuid::Uuid;

/// How one binding replacement touches the channel table.
///
/// Every channel row the replacement reads or deletes is locked first, in
/// channel order, so concurrent saves sharing a channel serialize on it
/// instead of one collecting the row out from under the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingChange {
    /// Channels the webhook observes now but not afterwards.
    pub dropped: Vec<String>,
    /// Every channel to lock: the new set plus the dropped ones, sorted.
    pub locked: Vec<String>,
}

impl BindingChange {
    pub fn new(current: &[String], next: &[String]) -> Self {
        let next: BTreeSet<&String> = next.iter().collect();
        let dropped: BTreeSet<&String> = current.iter().filter(|c| !next.contains(c)).collect();
        let locked = next.union(&dropped).map(|c| c.to_string()).collect();
        Self {
            dropped: dropped.into_iter().cloned().collect(),
            locked,
        }
    }
}

/// Transactional helpers for replacing a webhook's channel set.
///
/// Callers hold the webhook row lock, so the webhook's current binding is
/// stable for the whole transaction.
pub struct ChannelBinding;

impl ChannelBinding {
    /// Replace the channel set of `webhook_id` with `channels` and record the
    /// logic version it was computed under. Returns how many channel entries
    /// were collected because the webhook was their last observer.
    pub async fn replace_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        webhook_id: Uuid,
        owner_id: Uuid,
        channels: &[String],
        version: i32,
    ) -> Result<u64, sqlx::Error> {
        let current = Self::channels_of_tx(tx, webhook_id).await?;
        let change = BindingChange::new(&current, channels);
        let locked = Self::lock_channels_tx(tx, &change.locked).await?;

        let (kept, dropped): (Vec<(i64, String)>, Vec<(i64, String)>) = locked
            .into_iter()
            .partition(|(_, channel)| channels.contains(channel));
        let kept: Vec<i64> = kept.into_iter().map(|(id, _)| id).collect();
        let dropped: Vec<i64> = dropped.into_iter().map(|(id, _)| id).collect();

        if !dropped.is_empty() {
            sqlx::query(
                "DELETE FROM webhook_channel_bindings WHERE webhook_id = $1 AND channel_id = ANY($2)",
            )
            .bind(webhook_id)
            .bind(&dropped)
            .execute(&mut **tx)
            .await?;
        }

        if !kept.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO webhook_channel_bindings (webhook_id, channel_id)
                SELECT $1, UNNEST($2::bigint[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(webhook_id)
            .bind(&kept)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO webhook_channel_versions (webhook_id, owner_id, version)
            VALUES ($1, $2, $3)
            ON CONFLICT (webhook_id) DO UPDATE SET version = EXCLUDED.version, computed_at = NOW()
            "#,
        )
        .bind(webhook_id)
        .bind(owner_id)
        .bind(version)
        .execute(&mut **tx)
        .await?;

        Self::delete_unobserved_tx(tx, &dropped).await
    }

    /// Drop every binding of `webhook_id` and its version row, collecting
    /// the channel entries it was the last observer of.
    pub async fn remove_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        webhook_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let current = Self::channels_of_tx(tx, webhook_id).await?;
        let locked = Self::lock_channels_tx(tx, &current).await?;
        let ids: Vec<i64> = locked.into_iter().map(|(id, _)| id).collect();

        sqlx::query("DELETE FROM webhook_channel_bindings WHERE webhook_id = $1")
            .bind(webhook_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM webhook_channel_versions WHERE webhook_id = $1")
            .bind(webhook_id)
            .execute(&mut **tx)
            .await?;

        Self::delete_unobserved_tx(tx, &ids).await
    }

    /// Delete channel entries no webhook observes any more.
    ///
    /// Used after bindings went away by cascade. Candidates are locked in one
    /// statement and rechecked in the next, which sees every binding committed
    /// by a transaction that held one of those locks.
    pub async fn collect_orphans_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<u64, sqlx::Error> {
        let candidates: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT c.id FROM webhook_channels AS c
            WHERE NOT EXISTS (
                SELECT 1 FROM webhook_channel_bindings AS b WHERE b.channel_id = c.id
            )
            ORDER BY c.channel
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut **tx)
        .await?;
        Self::delete_unobserved_tx(tx, &candidates).await
    }

    async fn channels_of_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        webhook_id: Uuid,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT c.channel
            FROM webhook_channel_bindings AS b
            JOIN webhook_channels AS c ON c.id = b.channel_id
            WHERE b.webhook_id = $1
            "#,
        )
        .bind(webhook_id)
        .fetch_all(&mut **tx)
        .await
    }

    /// Create missing channel entries and row-lock all of `channels`.
    ///
    /// `DO UPDATE` takes the row lock on existing entries where `DO NOTHING`
    /// would not. `channels` must be sorted so lock order is global.
    async fn lock_channels_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        channels: &[String],
    ) -> Result<Vec<(i64, String)>, sqlx::Error> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as(
            r#"
            INSERT INTO webhook_channels (channel)
            SELECT channel FROM UNNEST($1::text[]) AS t (channel) ORDER BY channel
            ON CONFLICT (channel) DO UPDATE SET channel = EXCLUDED.channel
            RETURNING id, channel
            "#,
        )
        .bind(channels)
        .fetch_all(&mut **tx)
        .await
    }

    /// Delete those of `ids` left without bindings. The rows must already be
    /// locked by this transaction.
    async fn delete_unobserved_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_channels AS c
            WHERE c.id = ANY($1)
              AND NOT EXISTS (
                SELECT 1 FROM webhook_channel_bindings AS b WHERE b.channel_id = c.id
              )
            "#,
        )
        .bind(ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct ListWebhooksForChannel {
    pub channel: String,
}

impl Processor<ListWebhooksForChannel> for DatabaseProcessor {
    type Output = Vec<Uuid>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListWebhooksForChannel")]
    async fn process(&self, query: ListWebhooksForChannel) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT b.webhook_id
            FROM webhook_channel_bindings AS b
            JOIN webhook_channels AS c ON c.id = b.channel_id
            WHERE c.channel = $1
            "#,
        )
        .bind(query.channel)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ListChannelsForWebhook {
    pub webhook_id: Uuid,
}

impl Processor<ListChannelsForWebhook> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListChannelsForWebhook")]
    async fn process(&self, query: ListChannelsForWebhook) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.channel
            FROM webhook_channel_bindings AS b
            JOIN webhook_channels AS c ON c.id = b.channel_id
            WHERE b.webhook_id = $1
            ORDER BY c.channel
            "#,
        )
        .bind(query.webhook_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Webhooks whose binding was computed under another logic version, or
/// that have no binding at all.
pub struct GetStaleWebhooks {
    pub current_version: i32,
}

impl Processor<GetStaleWebhooks> for DatabaseProcessor {
    type Output = Vec<Uuid>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetStaleWebhooks")]
    async fn process(&self, query: GetStaleWebhooks) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT w.id
            FROM webhooks AS w
            LEFT JOIN webhook_channel_versions AS v ON v.webhook_id = w.id
            WHERE v.version IS DISTINCT FROM $1
            ORDER BY w.created_at
            "#,
        )
        .bind(query.current_version)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ListChannels;

impl Processor<ListChannels> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListChannels")]
    async fn process(&self, _query: ListChannels) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT channel FROM webhook_channels ORDER BY channel")
            .fetch_all(&self.pool)
            .await
    }
}
