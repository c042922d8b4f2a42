use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::ServicePayment;
use crate::infrastructure::db::PgPool;

pub struct ServicePaymentRepository {
    pool: PgPool,
    service_name: String,
}

impl ServicePaymentRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, payment: &mut ServicePayment) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM service_payment WHERE source_id = $1",
        )
        .bind(&payment.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE service_payment
                 SET user_id = $1, service_payment_date = $2, service_payment_type_id = $3,
                     updated_at = $4, updated_by = $5
                 WHERE source_id = $6",
            )
            .bind(payment.user_id)
            .bind(payment.service_payment_date)
            .bind(payment.service_payment_type_id)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&payment.source_id)
            .execute(&self.pool)
            .await?;

            payment.id = row.get("id");
            payment.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO service_payment (guid, source_id, user_id, service_payment_date,
                 service_payment_type_id, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(guid)
        .bind(&payment.source_id)
        .bind(payment.user_id)
        .bind(payment.service_payment_date)
        .bind(payment.service_payment_type_id)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        payment.id = id;
        payment.guid = Some(guid);
        Ok(())
    }
}
