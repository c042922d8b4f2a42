use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::models::{
    ExpenseAutomaticWorkflow, ExpenseAutomaticWorkflowPreSavedDescription,
};
use crate::infrastructure::db::PgPool;

pub struct ExpenseAutomaticWorkflowRepository {
    pool: PgPool,
    service_name: String,
}

impl ExpenseAutomaticWorkflowRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(&self, workflow: &mut ExpenseAutomaticWorkflow) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM expense_automatic_workflow WHERE source_id = $1",
        )
        .bind(&workflow.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE expense_automatic_workflow
                 SET user_id = $1, base64_image = $2, description = $3,
                     extracted_expense_content_from_image = $4, spending_date__yyyy_mm = $5,
                     sync_processed_date = $6, id_sync_status = $7, processing_message = $8,
                     updated_at = $9, updated_by = $10
                 WHERE source_id = $11",
            )
            .bind(workflow.user_id)
            .bind(&workflow.base64_image)
            .bind(&workflow.description)
            .bind(&workflow.extracted_expense_content_from_image)
            .bind(&workflow.spending_date_yyyy_mm)
            .bind(workflow.sync_processed_date)
            .bind(workflow.id_sync_status)
            .bind(&workflow.processing_message)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&workflow.source_id)
            .execute(&self.pool)
            .await?;

            workflow.id = row.get("id");
            workflow.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO expense_automatic_workflow (guid, source_id, user_id, base64_image,
                 description, extracted_expense_content_from_image, spending_date__yyyy_mm,
                 sync_processed_date, id_sync_status, processing_message, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING id",
        )
        .bind(guid)
        .bind(&workflow.source_id)
        .bind(workflow.user_id)
        .bind(&workflow.base64_image)
        .bind(&workflow.description)
        .bind(&workflow.extracted_expense_content_from_image)
        .bind(&workflow.spending_date_yyyy_mm)
        .bind(workflow.sync_processed_date)
        .bind(workflow.id_sync_status)
        .bind(&workflow.processing_message)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        workflow.id = id;
        workflow.guid = Some(guid);
        Ok(())
    }
}

pub struct PreSavedDescriptionRepository {
    pool: PgPool,
    service_name: String,
}

impl PreSavedDescriptionRepository {
    pub fn new(pool: &PgPool, service_name: &str) -> Self {
        Self {
            pool: pool.clone(),
            service_name: service_name.to_string(),
        }
    }

    pub async fn upsert(
        &self,
        description: &mut ExpenseAutomaticWorkflowPreSavedDescription,
    ) -> sqlx::Result<()> {
        let existing = sqlx::query(
            "SELECT id, guid FROM expense_automatic_workflow_pre_saved_description
             WHERE source_id = $1",
        )
        .bind(&description.source_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query(
                "UPDATE expense_automatic_workflow_pre_saved_description
                 SET user_id = $1, description = $2, updated_at = $3, updated_by = $4
                 WHERE source_id = $5",
            )
            .bind(description.user_id)
            .bind(&description.description)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(&description.source_id)
            .execute(&self.pool)
            .await?;

            description.id = row.get("id");
            description.guid = Some(row.get("guid"));
            return Ok(());
        }

        let guid = Uuid::new_v4();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO expense_automatic_workflow_pre_saved_description
                 (guid, source_id, user_id, description, created_at, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(guid)
        .bind(&description.source_id)
        .bind(description.user_id)
        .bind(&description.description)
        .bind(Utc::now())
        .bind(&self.service_name)
        .fetch_one(&self.pool)
        .await?;

        description.id = id;
        description.guid = Some(guid);
        Ok(())
    }
}
