use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::ExpenseInstallment;
use crate::infrastructure::db::PgPool;

pub struct ExpenseInstallmentRepository {
    pool: PgPool,
    service_name: String,
}

impl ExpenseInstallmentRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    /// Installments carry no `source_id`; a row with a guid is updated in
    /// place, a row without one is always inserted. The engine guarantees
    /// at most one installment per `(expense_id, month)` by looking up
    /// before writing.
    pub async fn upsert(&self, installment: &mut ExpenseInstallment) -> sqlx::Result<()> {
        if let Some(guid) = installment.guid {
            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM expense_installment WHERE guid = $1",
            )
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = existing {
                sqlx::query(
                    "UPDATE expense_installment
                     SET expense_id = $1, amount = $2, paid_amount = $3, id_status = $4,
                         due_date = $5, updated_at = $6, updated_by = $7
                     WHERE guid = $8",
                )
                .bind(installment.expense_id)
                .bind(installment.amount)
                .bind(installment.paid_amount)
                .bind(installment.id_status)
                .bind(installment.due_date)
                .bind(Utc::now())
                .bind(&self.service_name)
                .bind(guid)
                .execute(&self.pool)
                .await?;

                installment.id = id;
                return Ok(());
            }
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO expense_installment (guid, expense_id, amount, paid_amount, id_status,
                 due_date, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(guid)
        .bind(installment.expense_id)
        .bind(installment.amount)
        .bind(installment.paid_amount)
        .bind(installment.id_status)
        .bind(installment.due_date)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        installment.id = id;
        installment.guid = Some(guid);
        Ok(())
    }

    /// The month is the canonical `YYYY/MM` projection of the due date.
    pub async fn by_expense_and_month(
        &self,
        expense_id: i64,
        month: &str,
    ) -> sqlx::Result<Option<ExpenseInstallment>> {
        sqlx::query(
            "SELECT id, guid, expense_id, amount, paid_amount, id_status, due_date
             FROM expense_installment
             WHERE expense_id = $1 AND to_char(due_date, 'YYYY/MM') = $2",
        )
        .bind(expense_id)
        .bind(month)
        .map(map_installment)
        .fetch_optional(&self.pool)
        .await
    }
}

fn map_installment(row: PgRow) -> ExpenseInstallment {
    ExpenseInstallment {
        id: row.get("id"),
        guid: row.get("guid"),
        expense_id: row.get("expense_id"),
        amount: row.get("amount"),
        paid_amount: row.get("paid_amount"),
        id_status: row.get("id_status"),
        due_date: row.get("due_date"),
    }
}
