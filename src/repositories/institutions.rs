use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::FinancialInstitution;
use crate::infrastructure::db::PgPool;

pub struct FinancialInstitutionRepository {
    pool: PgPool,
    service_name: String,
}

impl FinancialInstitutionRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, institution: &mut FinancialInstitution) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM financial_institution WHERE source_id = $1",
        )
        .bind(&institution.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE financial_institution
                 SET user_id = $1, name = $2, fl_credit_card = $3, fl_money_movement = $4,
                     fl_investment = $5, updated_at = $6, updated_by = $7
                 WHERE source_id = $8",
            )
            .bind(institution.user_id)
            .bind(&institution.name)
            .bind(institution.fl_credit_card)
            .bind(institution.fl_money_movement)
            .bind(institution.fl_investment)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&institution.source_id)
            .execute(&self.pool)
            .await?;

            institution.id = row.get("id");
            institution.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO financial_institution (guid, source_id, user_id, name, fl_credit_card,
                 fl_money_movement, fl_investment, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(guid)
        .bind(&institution.source_id)
        .bind(institution.user_id)
        .bind(&institution.name)
        .bind(institution.fl_credit_card)
        .bind(institution.fl_money_movement)
        .bind(institution.fl_investment)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        institution.id = id;
        institution.guid = Some(guid);
        Ok(())
    }
}
