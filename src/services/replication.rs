//! Envelope replication. One bus message names one envelope document; the
//! orchestrator walks the envelope's collections in foreign-key order,
//! replicating each named document and aggregating per-collection failures
//! so the consumer can decide between acknowledge and requeue.

use std::sync::Arc;

use bson::Bson;
use tracing::{debug, info, warn};

use crate::infrastructure::documents::ExpenseDocument;
use crate::infrastructure::state::AppState;
use crate::repositories::{
    AdditionalBalanceRepository, BalanceHistoryRepository, ExpenseAutomaticWorkflowRepository,
    ExpenseRepository, FinancialInstitutionRepository, PreSavedDescriptionRepository,
    ServicePaymentRepository, SystemSettingsRepository, UserRepository,
};
use crate::services::errors::{CollectionFailure, SyncError};
use crate::services::{installments, transform};

/// Replication order. Users commit before everything that foreign-keys
/// them; the remaining collections only depend on users.
pub const COLLECTION_ORDER: [&str; 9] = [
    "users",
    "banks",
    "expenses",
    "additional_balances",
    "balance_history",
    "expense_automatic_workflow",
    "expense_automatic_workflow_pre_saved_description",
    "payments",
    "settings",
];

/// Pulls the source-id list out of the loosely typed envelope value.
/// Values may be arrays mixing types; anything that is not a string is
/// dropped. A bare string is treated as a single-element list.
pub fn extract_doc_ids(value: &Bson) -> Vec<String> {
    match value {
        Bson::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Bson::String(id) => Some(id.clone()),
                _ => None,
            })
            .collect(),
        Bson::String(id) => vec![id.clone()],
        _ => Vec::new(),
    }
}

pub struct Replicator {
    state: Arc<AppState>,
}

impl Replicator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn service_name(&self) -> &str {
        &self.state.config.ingestion.service_name
    }

    fn batch_size(&self) -> usize {
        self.state.config.ingestion.batch_size.max(1)
    }

    /// Replicates every document named by the envelope. Success means every
    /// collection replicated (individual documents may still have been
    /// skipped); the envelope is then annotated as processed. Any collection
    /// failure yields a composite error and leaves the envelope unannotated
    /// so the redelivered message retries the idempotent writes.
    pub async fn process_envelope(&self, envelope_id: &str) -> Result<(), SyncError> {
        let envelope = self.state.documents.envelope_by_id(envelope_id).await?;
        let Some(envelope) = envelope else {
            return Err(SyncError::EnvelopeNotFound(envelope_id.to_string()));
        };

        info!(
            envelope_id,
            collections = envelope.map_collection_to_docs.len(),
            "processing envelope"
        );

        for name in envelope.map_collection_to_docs.keys() {
            if !COLLECTION_ORDER.contains(&name.as_str()) {
                warn!(collection = %name, "unknown collection in envelope, skipping");
            }
        }

        let mut failures = Vec::new();

        for collection in COLLECTION_ORDER {
            let Some(raw) = envelope.map_collection_to_docs.get(collection) else {
                continue;
            };
            let ids = extract_doc_ids(raw);
            if ids.is_empty() {
                debug!(collection, "no document ids listed for collection");
                continue;
            }

            debug!(collection, count = ids.len(), "replicating collection");

            let result = match collection {
                "users" => self.sync_users(&ids).await,
                "banks" => self.sync_financial_institutions(&ids).await,
                "expenses" => self.sync_expenses(&ids).await,
                "additional_balances" => self.sync_additional_balances(&ids).await,
                "balance_history" => self.sync_balance_history(&ids).await,
                "expense_automatic_workflow" => self.sync_workflows(&ids).await,
                "expense_automatic_workflow_pre_saved_description" => {
                    self.sync_pre_saved_descriptions(&ids).await
                }
                "payments" => self.sync_service_payments(&ids).await,
                "settings" => self.sync_settings(&ids).await,
                _ => Ok(()),
            };

            match result {
                Ok(()) => info!(collection, "collection replicated"),
                Err(failure) => {
                    warn!(collection, error = %failure, "collection failed to replicate");
                    failures.push(failure);
                }
            }
        }

        if !failures.is_empty() {
            return Err(SyncError::Collections(failures));
        }

        if let Err(err) = self.state.documents.mark_envelope_processed(envelope_id).await {
            warn!(envelope_id, error = %err, "failed to mark envelope as processed");
        }

        if let Some(upstream) = &self.state.upstream {
            if let Err(err) = upstream
                .update_settings_sync_metadata(self.state.config.sync_service_name())
                .await
            {
                warn!(error = %err, "failed to push sync metadata upstream");
            }
        }

        Ok(())
    }

    async fn mark_replicated(&self, collection: &'static str, source_id: &str) {
        if let Err(err) = self.state.documents.mark_replicated(collection, source_id).await {
            warn!(collection, source_id, error = %err, "failed to annotate source document");
        }
    }

    /// Resolves the relational id of the user owning a document, or `None`
    /// (with a warning) when the user has not been replicated yet. Missing
    /// owners skip the document without failing the collection; a later
    /// envelope carrying both will catch it up.
    async fn owner_id(
        &self,
        collection: &'static str,
        source_id: &str,
        user_source_id: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let users = UserRepository::new(&self.state.pool, self.service_name());
        match users.by_source_id(user_source_id).await? {
            Some(user) => Ok(Some(user.id)),
            None => {
                warn!(
                    collection,
                    source_id,
                    user = user_source_id,
                    "owner user not found, skipping document"
                );
                Ok(None)
            }
        }
    }

    async fn sync_users(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = UserRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .users_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("users", err))?;

            for doc in docs {
                let mut user = transform::user_row(&doc);
                if let Err(err) = repo.upsert(&mut user).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert user");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("users", &doc.id).await;
            }
        }

        finish("users", errors)
    }

    async fn sync_financial_institutions(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = FinancialInstitutionRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .financial_institutions_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("banks", err))?;

            for doc in docs {
                let user_id = match self.owner_id("banks", &doc.id, &doc.user).await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let mut institution = transform::financial_institution_row(&doc, user_id);
                if let Err(err) = repo.upsert(&mut institution).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert financial institution");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("banks", &doc.id).await;
            }
        }

        finish("banks", errors)
    }

    async fn sync_expenses(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = ExpenseRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .expenses_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("expenses", err))?;

            for doc in docs {
                let user_id = match self.owner_id("expenses", &doc.id, &doc.user).await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let result = if installments::is_aggregate(&doc) {
                    self.sync_aggregate_expense(&doc, user_id).await
                } else {
                    let mut expense = transform::expense_row(&doc, user_id, &self.state.catalog);
                    repo.upsert(&mut expense).await.map_err(SyncError::from)
                };

                if let Err(err) = result {
                    warn!(source_id = %doc.id, error = %err, "failed to replicate expense");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("expenses", &doc.id).await;
            }
        }

        finish("expenses", errors)
    }

    async fn sync_aggregate_expense(
        &self,
        doc: &ExpenseDocument,
        user_id: i64,
    ) -> Result<(), SyncError> {
        let validity = doc.validity.as_deref().unwrap_or_default();
        let siblings = self
            .state
            .documents
            .expense_aggregate(&doc.user, &doc.expense_name, validity)
            .await?;

        installments::sync_aggregate_expense(
            &self.state.pool,
            &self.state.catalog,
            self.service_name(),
            doc,
            &siblings,
            user_id,
        )
        .await
    }

    async fn sync_additional_balances(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = AdditionalBalanceRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .additional_balances_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("additional_balances", err))?;

            for doc in docs {
                let user_id = match self.owner_id("additional_balances", &doc.id, &doc.user).await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let mut balance = transform::additional_balance_row(&doc, user_id);
                if let Err(err) = repo.upsert(&mut balance).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert additional balance");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("additional_balances", &doc.id).await;
            }
        }

        finish("additional_balances", errors)
    }

    async fn sync_balance_history(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = BalanceHistoryRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .balance_history_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("balance_history", err))?;

            for doc in docs {
                let user_id = match self.owner_id("balance_history", &doc.id, &doc.user).await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let mut history = transform::balance_history_row(&doc, user_id);
                if let Err(err) = repo.upsert(&mut history).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert balance history");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("balance_history", &doc.id).await;
            }
        }

        finish("balance_history", errors)
    }

    async fn sync_workflows(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = ExpenseAutomaticWorkflowRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .workflows_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("expense_automatic_workflow", err))?;

            for doc in docs {
                let user_id = match self
                    .owner_id("expense_automatic_workflow", &doc.id, &doc.user)
                    .await
                {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let mut workflow = transform::workflow_row(&doc, user_id, &self.state.catalog);
                if let Err(err) = repo.upsert(&mut workflow).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert workflow");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("expense_automatic_workflow", &doc.id).await;
            }
        }

        finish("expense_automatic_workflow", errors)
    }

    async fn sync_pre_saved_descriptions(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = PreSavedDescriptionRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .pre_saved_descriptions_by_ids(chunk)
                .await
                .map_err(|err| {
                    fetch_failure("expense_automatic_workflow_pre_saved_description", err)
                })?;

            for doc in docs {
                let user_id = match self
                    .owner_id(
                        "expense_automatic_workflow_pre_saved_description",
                        &doc.id,
                        &doc.user,
                    )
                    .await
                {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let mut description = transform::pre_saved_description_row(&doc, user_id);
                if let Err(err) = repo.upsert(&mut description).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert pre-saved description");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("expense_automatic_workflow_pre_saved_description", &doc.id)
                    .await;
            }
        }

        finish("expense_automatic_workflow_pre_saved_description", errors)
    }

    async fn sync_service_payments(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = ServicePaymentRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .service_payments_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("payments", err))?;

            for doc in docs {
                let user_id = match self.owner_id("payments", &doc.id, &doc.user).await {
                    Ok(Some(user_id)) => user_id,
                    Ok(None) => continue,
                    Err(err) => {
                        errors.push(format!("{}: {err}", doc.id));
                        continue;
                    }
                };

                let Some(mut payment) =
                    transform::service_payment_row(&doc, user_id, &self.state.catalog)
                else {
                    warn!(source_id = %doc.id, "unparseable payment date, skipping document");
                    continue;
                };

                if let Err(err) = repo.upsert(&mut payment).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert service payment");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("payments", &doc.id).await;
            }
        }

        finish("payments", errors)
    }

    async fn sync_settings(&self, ids: &[String]) -> Result<(), CollectionFailure> {
        let repo = SystemSettingsRepository::new(&self.state.pool, self.service_name());
        let mut errors = Vec::new();

        for chunk in ids.chunks(self.batch_size()) {
            let docs = self
                .state
                .documents
                .settings_by_ids(chunk)
                .await
                .map_err(|err| fetch_failure("settings", err))?;

            for doc in docs {
                let mut settings = transform::system_settings_row(&doc);
                if let Err(err) = repo.upsert(&mut settings).await {
                    warn!(source_id = %doc.id, error = %err, "failed to upsert system settings");
                    errors.push(format!("{}: {err}", doc.id));
                    continue;
                }
                self.mark_replicated("settings", &doc.id).await;
            }
        }

        finish("settings", errors)
    }
}

fn fetch_failure(collection: &'static str, err: mongodb::error::Error) -> CollectionFailure {
    CollectionFailure {
        collection,
        message: format!("failed to read documents: {err}"),
    }
}

fn finish(collection: &'static str, errors: Vec<String>) -> Result<(), CollectionFailure> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CollectionFailure {
            collection,
            message: errors.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn extracts_ids_from_string_arrays() {
        let value = bson!(["a", "b", "c"]);
        assert_eq!(extract_doc_ids(&value), vec!["a", "b", "c"]);
    }

    #[test]
    fn drops_non_string_elements_from_heterogeneous_arrays() {
        let value = bson!(["a", 42, null, { "nested": true }, "b"]);
        assert_eq!(extract_doc_ids(&value), vec!["a", "b"]);
    }

    #[test]
    fn accepts_a_bare_string_as_a_single_id() {
        let value = bson!("only-one");
        assert_eq!(extract_doc_ids(&value), vec!["only-one"]);
    }

    #[test]
    fn non_list_values_yield_nothing() {
        assert!(extract_doc_ids(&bson!(42)).is_empty());
        assert!(extract_doc_ids(&bson!({ "not": "a list" })).is_empty());
        assert!(extract_doc_ids(&bson!(null)).is_empty());
    }

    #[test]
    fn users_replicate_before_every_dependent_collection() {
        assert_eq!(COLLECTION_ORDER[0], "users");
        assert!(COLLECTION_ORDER.contains(&"expenses"));
        assert!(COLLECTION_ORDER.contains(&"settings"));
    }
}
