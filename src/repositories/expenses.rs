use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::Expense;
use crate::infrastructure::db::PgPool;

pub struct ExpenseRepository {
    pool: PgPool,
    service_name: String,
}

impl ExpenseRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, expense: &mut Expense) -> sqlx::Result<()> {
        let existing = sqlx::query_as::<_, (i64, Uuid)>(
            "SELECT id, guid FROM expense WHERE source_id = $1",
        )
        .bind(&expense.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id, guid)) = existing {
            sqlx::query(
                "UPDATE expense
                 SET user_id = $1, spending_date__yyyy_mm = $2, id_status = $3, id_type = $4,
                     validity_period_date = $5, fl_indeterminate_validity_period_date = $6,
                     name = $7, total_amount = $8, total_paid_amount = $9,
                     updated_at = $10, updated_by = $11
                 WHERE source_id = $12",
            )
            .bind(expense.user_id)
            .bind(&expense.spending_date_yyyy_mm)
            .bind(expense.id_status)
            .bind(expense.id_type)
            .bind(expense.validity_period_date)
            .bind(expense.fl_indeterminate_validity_period_date)
            .bind(&expense.name)
            .bind(expense.total_amount)
            .bind(expense.total_paid_amount)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&expense.source_id)
            .execute(&self.pool)
            .await?;

            expense.id = id;
            expense.guid = Some(guid);
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO expense (guid, source_id, user_id, spending_date__yyyy_mm, id_status,
                 id_type, validity_period_date, fl_indeterminate_validity_period_date, name,
                 total_amount, total_paid_amount, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING id",
        )
        .bind(guid)
        .bind(&expense.source_id)
        .bind(expense.user_id)
        .bind(&expense.spending_date_yyyy_mm)
        .bind(expense.id_status)
        .bind(expense.id_type)
        .bind(expense.validity_period_date)
        .bind(expense.fl_indeterminate_validity_period_date)
        .bind(&expense.name)
        .bind(expense.total_amount)
        .bind(expense.total_paid_amount)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        expense.id = id;
        expense.guid = Some(guid);
        Ok(())
    }

    /// Finds the aggregate parent for an invoice/savings plan: the row with
    /// this name and validity month for the user whose spending date is
    /// empty. Keeping this lookup stable is what prevents duplicate parents
    /// when the same aggregate is replicated again.
    pub async fn by_name_validity_user(
        &self,
        name: &str,
        validity: &str,
        user_id: i64,
    ) -> sqlx::Result<Option<Expense>> {
        sqlx::query(
            "SELECT id, guid, source_id, user_id, spending_date__yyyy_mm, id_status, id_type,
                    validity_period_date, fl_indeterminate_validity_period_date, name,
                    total_amount, total_paid_amount
             FROM expense
             WHERE user_id = $1
               AND name = $2
               AND spending_date__yyyy_mm = ''
               AND to_char(validity_period_date, 'YYYY/MM') = $3",
        )
        .bind(user_id)
        .bind(name)
        .bind(validity)
        .map(map_expense)
        .fetch_optional(&self.pool)
        .await
    }
}

fn map_expense(row: PgRow) -> Expense {
    Expense {
        id: row.get("id"),
        guid: row.get("guid"),
        source_id: row.get("source_id"),
        user_id: row.get("user_id"),
        spending_date_yyyy_mm: row.get("spending_date__yyyy_mm"),
        id_status: row.get("id_status"),
        id_type: row.get("id_type"),
        validity_period_date: row.get("validity_period_date"),
        fl_indeterminate_validity_period_date: row.get("fl_indeterminate_validity_period_date"),
        name: row.get("name"),
        total_amount: row.get("total_amount"),
        total_paid_amount: row.get("total_paid_amount"),
    }
}
