use sqlx::PgPool;

/// Executes query structs against the connection pool.
///
/// Each query is a plain struct with a `kanau::processor::Processor` impl on
/// this type, so call sites read `db.process(GetWebhookById { id })`.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Start a transaction for multi-statement writes.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
