//! Relational row types. Numeric ids are assigned by the database on first
//! insert; `guid` is issued by the repository at the same time and is stable
//! for the life of the row. `source_id` carries the document-store identity
//! verbatim and is the idempotency key for every entity except installments.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Row in the `user_account` table.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub fl_admin: bool,
    pub monthly_income: Decimal,
    pub fl_payment_requested: bool,
    pub fl_payment_pending: bool,
    pub fl_payment_paid: bool,
    pub current_spending_date: Option<String>,
}

/// Row in the `financial_institution` table.
#[derive(Debug, Clone)]
pub struct FinancialInstitution {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub name: String,
    pub fl_credit_card: bool,
    pub fl_money_movement: bool,
    pub fl_investment: bool,
}

/// Row in the `expense` table. Two shapes share it: simple expenses carry a
/// `spending_date__yyyy_mm` and their own amounts; aggregate parents carry an
/// empty spending date, a validity horizon, zero totals and a NULL status,
/// with all per-month amounts living on child installments.
#[derive(Debug, Clone)]
pub struct Expense {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub spending_date_yyyy_mm: String,
    pub id_status: Option<i64>,
    pub id_type: Option<i64>,
    pub validity_period_date: Option<NaiveDate>,
    pub fl_indeterminate_validity_period_date: bool,
    pub name: String,
    pub total_amount: Decimal,
    pub total_paid_amount: Decimal,
}

/// Row in the `expense_installment` table. Installments have no `source_id`;
/// the guid doubles as the upsert key once issued.
#[derive(Debug, Clone)]
pub struct ExpenseInstallment {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub expense_id: i64,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub id_status: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

/// Row in the `additional_balance` table.
#[derive(Debug, Clone)]
pub struct AdditionalBalance {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub spending_date_yyyy_mm: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Row in the `balance_history` table.
#[derive(Debug, Clone)]
pub struct BalanceHistory {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub spending_date_yyyy_mm: String,
    pub amount: Decimal,
    pub last_month_amount: Decimal,
    pub monthly_income: Decimal,
}

/// Row in the `expense_automatic_workflow` table.
#[derive(Debug, Clone)]
pub struct ExpenseAutomaticWorkflow {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub base64_image: Option<String>,
    pub description: Option<String>,
    pub extracted_expense_content_from_image: Option<String>,
    pub spending_date_yyyy_mm: Option<String>,
    pub sync_processed_date: Option<DateTime<Utc>>,
    pub id_sync_status: Option<i64>,
    pub processing_message: Option<String>,
}

/// Row in the `expense_automatic_workflow_pre_saved_description` table.
#[derive(Debug, Clone)]
pub struct ExpenseAutomaticWorkflowPreSavedDescription {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub description: String,
}

/// Row in the `service_payment` table.
#[derive(Debug, Clone)]
pub struct ServicePayment {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub user_id: i64,
    pub service_payment_date: NaiveDate,
    pub service_payment_type_id: Option<i64>,
}

/// Row in the `system_settings` table.
#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub id: i64,
    pub guid: Option<Uuid>,
    pub source_id: String,
    pub fl_block_user_registration: bool,
    pub fl_maintenance: bool,
    pub json_sync_metadata: Option<serde_json::Value>,
}
