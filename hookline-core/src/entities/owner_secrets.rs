use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use uuid::Uuid;

#[derive(Debug, Clone)]
/// Return the owner's signing secret, storing `candidate` if none exists yet.
pub struct GetOrCreateOwnerSecret {
    pub owner_id: Uuid,
    pub candidate: String,
}

impl Processor<GetOrCreateOwnerSecret> for DatabaseProcessor {
    type Output = String;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrCreateOwnerSecret")]
    async fn process(&self, query: GetOrCreateOwnerSecret) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO owner_secrets (owner_id, secret)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE SET secret = owner_secrets.secret
            RETURNING secret
            "#,
        )
        .bind(query.owner_id)
        .bind(query.candidate)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Replace the owner's signing secret for all of their webhooks at once.
pub struct RotateOwnerSecret {
    pub owner_id: Uuid,
    pub secret: String,
}

impl Processor<RotateOwnerSecret> for DatabaseProcessor {
    type Output = String;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RotateOwnerSecret")]
    async fn process(&self, cmd: RotateOwnerSecret) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO owner_secrets (owner_id, secret)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE SET secret = EXCLUDED.secret, rotated_at = NOW()
            RETURNING secret
            "#,
        )
        .bind(cmd.owner_id)
        .bind(cmd.secret)
        .fetch_one(&self.pool)
        .await
    }
}
