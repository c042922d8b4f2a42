use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::User;
use crate::infrastructure::db::PgPool;

pub struct UserRepository {
    pool: PgPool,
    service_name: String,
}

impl UserRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    /// Inserts the user on first sight of its `source_id`, updates every
    /// non-key column afterwards. The assigned id and guid are written back
    /// onto the row.
    pub async fn upsert(&self, user: &mut User) -> sqlx::Result<()> {
        let existing = sqlx::query_as::<_, (i64, Uuid)>(
            "SELECT id, guid FROM user_account WHERE source_id = $1",
        )
        .bind(&user.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id, guid)) = existing {
            sqlx::query(
                "UPDATE user_account
                 SET first_name = $1, last_name = $2, email = $3, fl_admin = $4,
                     monthly_income = $5, fl_payment_requested = $6, fl_payment_pending = $7,
                     fl_payment_paid = $8, current_spending_date = $9,
                     updated_at = $10, updated_by = $11
                 WHERE source_id = $12",
            )
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.fl_admin)
            .bind(user.monthly_income)
            .bind(user.fl_payment_requested)
            .bind(user.fl_payment_pending)
            .bind(user.fl_payment_paid)
            .bind(&user.current_spending_date)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&user.source_id)
            .execute(&self.pool)
            .await?;

            user.id = id;
            user.guid = Some(guid);
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO user_account (guid, source_id, first_name, last_name, email, fl_admin,
                 monthly_income, fl_payment_requested, fl_payment_pending, fl_payment_paid,
                 current_spending_date, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING id",
        )
        .bind(guid)
        .bind(&user.source_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.fl_admin)
        .bind(user.monthly_income)
        .bind(user.fl_payment_requested)
        .bind(user.fl_payment_pending)
        .bind(user.fl_payment_paid)
        .bind(&user.current_spending_date)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        user.id = id;
        user.guid = Some(guid);
        Ok(())
    }

    /// Owner lookup used before replicating any user-scoped document.
    pub async fn by_source_id(&self, source_id: &str) -> sqlx::Result<Option<User>> {
        sqlx::query(
            "SELECT id, guid, source_id, first_name, last_name, email, fl_admin, monthly_income,
                    fl_payment_requested, fl_payment_pending, fl_payment_paid, current_spending_date
             FROM user_account
             WHERE source_id = $1",
        )
        .bind(source_id)
        .map(map_user)
        .fetch_optional(&self.pool)
        .await
    }
}

fn map_user(row: PgRow) -> User {
    User {
        id: row.get("id"),
        guid: row.get("guid"),
        source_id: row.get("source_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        fl_admin: row.get("fl_admin"),
        monthly_income: row.get("monthly_income"),
        fl_payment_requested: row.get("fl_payment_requested"),
        fl_payment_pending: row.get("fl_payment_pending"),
        fl_payment_paid: row.get("fl_payment_paid"),
        current_spending_date: row.get("current_spending_date"),
    }
}
