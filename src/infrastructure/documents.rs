//! Document-store access: typed reads for each source collection, the
//! aggregate-expense query used by the installment engine, and the sync
//! bookkeeping annotations written back onto source documents.

use std::collections::HashMap;
use std::time::Duration;

use bson::oid::ObjectId;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::config::DocumentStoreConfig;

/// Collection holding the batch envelopes. The spelling matches what the
/// producing service writes.
const ENVELOPE_COLLECTION: &str = "succesfully_ingested_firestore_docs";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(rename = "monthlyIncome", default)]
    pub monthly_income: f64,
    #[serde(rename = "requestedPayment", default)]
    pub requested_payment: bool,
    #[serde(rename = "pendingPayment", default)]
    pub pending_payment: bool,
    #[serde(rename = "paidPayment", default)]
    pub paid_payment: bool,
    #[serde(rename = "lookingAtSpendingDate", default)]
    pub looking_at_spending_date: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExpenseDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "expenseName", default)]
    pub expense_name: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(rename = "alreadyPaidAmount", default)]
    pub already_paid_amount: f64,
    #[serde(rename = "spendingDate", default)]
    pub spending_date: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub expense_type: String,
    #[serde(default)]
    pub validity: Option<String>,
    #[serde(rename = "indeterminateValidity", default)]
    pub indeterminate_validity: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FinancialInstitutionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub nome: String,
    #[serde(rename = "cartaoCredito", default)]
    pub cartao_credito: bool,
    #[serde(rename = "movimentacaoDinheiro", default)]
    pub movimentacao_dinheiro: bool,
    #[serde(default)]
    pub investimentos: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdditionalBalanceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "spendingDate", default)]
    pub spending_date: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BalanceHistoryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "spendingDate", default)]
    pub spending_date: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(rename = "lastMonthBalance", default)]
    pub last_month_balance: f64,
    #[serde(rename = "monthlyIncome", default)]
    pub monthly_income: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExpenseAutomaticWorkflowDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub base64_image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub extracted_expense_content_from_image: Option<Bson>,
    #[serde(rename = "spendingDate", default)]
    pub spending_date: String,
    #[serde(rename = "syncProcessedDate", default)]
    pub sync_processed_date: String,
    #[serde(rename = "syncStatus", default)]
    pub sync_status: String,
    #[serde(rename = "processingMessage", default)]
    pub processing_message: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreSavedDescriptionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicePaymentDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "paymentDate", default)]
    pub payment_date: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SettingsDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "blockUserRegistration", default)]
    pub block_user_registration: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(rename = "syncMetadata", default)]
    pub sync_metadata: Vec<Bson>,
}

/// The batch envelope: which recently landed documents still need relational
/// replication. `map_collection_to_docs` is loosely typed on the wire, so
/// the values stay as raw BSON until id extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeDocument {
    #[serde(rename = "_id")]
    pub id: Bson,
    #[serde(rename = "map_collection_to_docs", default)]
    pub map_collection_to_docs: HashMap<String, Bson>,
}

pub struct DocumentStore {
    database: Database,
    service_name: String,
}

impl DocumentStore {
    pub async fn connect(
        config: &DocumentStoreConfig,
        service_name: &str,
    ) -> mongodb::error::Result<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options)?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(Self {
            database,
            service_name: service_name.to_string(),
        })
    }

    async fn by_ids<T>(&self, collection: &str, ids: &[String]) -> mongodb::error::Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let cursor = self
            .database
            .collection::<T>(collection)
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .await?;
        let documents: Vec<T> = cursor.try_collect().await?;

        if documents.len() != ids.len() {
            warn!(
                collection,
                requested = ids.len(),
                found = documents.len(),
                "some document ids were not found"
            );
        }

        Ok(documents)
    }

    pub async fn users_by_ids(&self, ids: &[String]) -> mongodb::error::Result<Vec<UserDocument>> {
        self.by_ids("users", ids).await
    }

    pub async fn expenses_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<ExpenseDocument>> {
        self.by_ids("expenses", ids).await
    }

    pub async fn financial_institutions_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<FinancialInstitutionDocument>> {
        self.by_ids("banks", ids).await
    }

    pub async fn additional_balances_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<AdditionalBalanceDocument>> {
        self.by_ids("additional_balances", ids).await
    }

    pub async fn balance_history_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<BalanceHistoryDocument>> {
        self.by_ids("balance_history", ids).await
    }

    pub async fn workflows_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<ExpenseAutomaticWorkflowDocument>> {
        self.by_ids("expense_automatic_workflow", ids).await
    }

    pub async fn pre_saved_descriptions_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<PreSavedDescriptionDocument>> {
        self.by_ids("expense_automatic_workflow_pre_saved_description", ids)
            .await
    }

    pub async fn service_payments_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<ServicePaymentDocument>> {
        self.by_ids("payments", ids).await
    }

    pub async fn settings_by_ids(
        &self,
        ids: &[String],
    ) -> mongodb::error::Result<Vec<SettingsDocument>> {
        self.by_ids("settings", ids).await
    }

    /// All expense documents composing one logical invoice/savings plan:
    /// same user, same expense name, same validity. Sorted ascending by
    /// spending date so installments materialize in month order.
    pub async fn expense_aggregate(
        &self,
        user_source_id: &str,
        expense_name: &str,
        validity: &str,
    ) -> mongodb::error::Result<Vec<ExpenseDocument>> {
        let cursor = self
            .database
            .collection::<ExpenseDocument>("expenses")
            .find(doc! {
                "user": user_source_id,
                "expenseName": expense_name,
                "validity": validity,
            })
            .sort(doc! { "spendingDate": 1 })
            .await?;
        cursor.try_collect().await
    }

    /// Fetches a batch envelope. The id may be a hex-encoded ObjectId or an
    /// opaque string; both forms are tried before reporting not-found.
    pub async fn envelope_by_id(
        &self,
        envelope_id: &str,
    ) -> mongodb::error::Result<Option<EnvelopeDocument>> {
        let collection = self.database.collection::<EnvelopeDocument>(ENVELOPE_COLLECTION);

        if let Ok(object_id) = ObjectId::parse_str(envelope_id) {
            debug!(%object_id, "looking up envelope by object id");
            if let Some(envelope) = collection.find_one(doc! { "_id": object_id }).await? {
                return Ok(Some(envelope));
            }
        }

        collection.find_one(doc! { "_id": envelope_id }).await
    }

    /// Annotates a source document with the replication timestamp and this
    /// service's identity. Best-effort: the caller logs failures and moves on.
    pub async fn mark_replicated(
        &self,
        collection: &str,
        source_id: &str,
    ) -> mongodb::error::Result<()> {
        self.database
            .collection::<bson::Document>(collection)
            .update_one(
                doc! { "_id": source_id },
                doc! { "$set": {
                    "onPremiseRelationalDBSyncDatetime": bson::DateTime::now(),
                    "onPremiseRelationalDBSyncService": &self.service_name,
                } },
            )
            .await?;
        Ok(())
    }

    /// Annotates the envelope itself once every collection replicated.
    pub async fn mark_envelope_processed(
        &self,
        envelope_id: &str,
    ) -> mongodb::error::Result<()> {
        let collection = self.database.collection::<bson::Document>(ENVELOPE_COLLECTION);
        let update = doc! { "$set": {
            "ingestedAt": bson::DateTime::now(),
            "ingestedBy": &self.service_name,
        } };

        if let Ok(object_id) = ObjectId::parse_str(envelope_id) {
            let result = collection
                .update_one(doc! { "_id": object_id }, update.clone())
                .await?;
            if result.matched_count > 0 {
                return Ok(());
            }
        }

        collection
            .update_one(doc! { "_id": envelope_id }, update)
            .await?;
        Ok(())
    }
}
