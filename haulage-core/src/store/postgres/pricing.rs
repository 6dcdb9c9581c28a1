use kanau::processor::Processor;
use sqlx::types::Json;

use crate::entities::PricingConfiguration;
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;

#[derive(Debug, Clone)]
/// Store a configuration and make it the only active one.
pub struct ActivatePricingConfiguration {
    pub configuration: PricingConfiguration,
}

impl Processor<ActivatePricingConfiguration> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ActivatePricingConfiguration")]
    async fn process(&self, cmd: ActivatePricingConfiguration) -> Result<(), StoreError> {
        let config = cmd.configuration;
        let mut tx = self.begin().await?;
        sqlx::query("UPDATE pricing_configurations SET is_active = FALSE WHERE is_active AND id <> $1")
            .bind(config.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO pricing_configurations (id, name, is_default, is_active, body)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                is_default = EXCLUDED.is_default,
                is_active = TRUE,
                body = EXCLUDED.body
            "#,
        )
        .bind(config.id)
        .bind(config.name.as_str())
        .bind(config.is_default)
        .bind(Json(&config))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GetActivePricingConfiguration;

impl Processor<GetActivePricingConfiguration> for DatabaseProcessor {
    type Output = Option<PricingConfiguration>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActivePricingConfiguration")]
    async fn process(
        &self,
        _: GetActivePricingConfiguration,
    ) -> Result<Option<PricingConfiguration>, StoreError> {
        let body: Option<Json<PricingConfiguration>> =
            sqlx::query_scalar("SELECT body FROM pricing_configurations WHERE is_active")
                .fetch_optional(&self.pool)
                .await?;
        Ok(body.map(|b| b.0))
    }
}
