use sqlx::PgPool;

/// Target of the kanau `Processor` query structs in `store::postgres`.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

pub type PgTransaction = sqlx::Transaction<'static, sqlx::Postgres>;

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Multi-row operations run their statements on one transaction.
    pub async fn begin(&self) -> Result<PgTransaction, sqlx::Error> {
        self.pool.begin().await
    }
}
