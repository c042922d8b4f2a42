use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::SystemSettings;
use crate::infrastructure::db::PgPool;

pub struct SystemSettingsRepository {
    pool: PgPool,
    service_name: String,
}

impl SystemSettingsRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, settings: &mut SystemSettings) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM system_settings WHERE source_id = $1",
        )
        .bind(&settings.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE system_settings
                 SET fl_block_user_registration = $1, fl_maintenance = $2,
                     json_sync_metadata = $3, updated_at = $4, updated_by = $5
                 WHERE source_id = $6",
            )
            .bind(settings.fl_block_user_registration)
            .bind(settings.fl_maintenance)
            .bind(&settings.json_sync_metadata)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&settings.source_id)
            .execute(&self.pool)
            .await?;

            settings.id = row.get("id");
            settings.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO system_settings (guid, source_id, fl_block_user_registration,
                 fl_maintenance, json_sync_metadata, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(guid)
        .bind(&settings.source_id)
        .bind(settings.fl_block_user_registration)
        .bind(settings.fl_maintenance)
        .bind(&settings.json_sync_metadata)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        settings.id = id;
        settings.guid = Some(guid);
        Ok(())
    }
}
