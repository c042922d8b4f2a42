use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::{AdditionalBalance, BalanceHistory};
use crate::infrastructure::db::PgPool;

pub struct AdditionalBalanceRepository {
    pool: PgPool,
    service_name: String,
}

impl AdditionalBalanceRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, balance: &mut AdditionalBalance) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM additional_balance WHERE source_id = $1",
        )
        .bind(&balance.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE additional_balance
                 SET user_id = $1, spending_date__yyyy_mm = $2, amount = $3, description = $4,
                     updated_at = $5, updated_by = $6
                 WHERE source_id = $7",
            )
            .bind(balance.user_id)
            .bind(&balance.spending_date_yyyy_mm)
            .bind(balance.amount)
            .bind(&balance.description)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&balance.source_id)
            .execute(&self.pool)
            .await?;

            balance.id = row.get("id");
            balance.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO additional_balance (guid, source_id, user_id, spending_date__yyyy_mm,
                 amount, description, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(guid)
        .bind(&balance.source_id)
        .bind(balance.user_id)
        .bind(&balance.spending_date_yyyy_mm)
        .bind(balance.amount)
        .bind(&balance.description)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        balance.id = id;
        balance.guid = Some(guid);
        Ok(())
    }
}

pub struct BalanceHistoryRepository {
    pool: PgPool,
    service_name: String,
}

impl BalanceHistoryRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, history: &mut BalanceHistory) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM balance_history WHERE source_id = $1",
        )
        .bind(&history.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE balance_history
                 SET user_id = $1, spending_date__yyyy_mm = $2, amount = $3,
                     last_month_amount = $4, monthly_income = $5, updated_at = $6, updated_by = $7
                 WHERE source_id = $8",
            )
            .bind(history.user_id)
            .bind(&history.spending_date_yyyy_mm)
            .bind(history.amount)
            .bind(history.last_month_amount)
            .bind(history.monthly_income)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&history.source_id)
            .execute(&self.pool)
            .await?;

            history.id = row.get("id");
            history.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO balance_history (guid, source_id, user_id, spending_date__yyyy_mm,
                 amount, last_month_amount, monthly_income, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(guid)
        .bind(&history.source_id)
        .bind(history.user_id)
        .bind(&history.spending_date_yyyy_mm)
        .bind(history.amount)
        .bind(history.last_month_amount)
        .bind(history.monthly_income)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        history.id = id;
        history.guid = Some(guid);
        Ok(())
    }
}
