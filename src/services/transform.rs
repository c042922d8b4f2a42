//! Field mapping from source documents to relational rows: date
//! canonicalization, enum-string resolution through the domain catalog,
//! nullable projections and fixed-point money conversion.

use bson::Bson;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::domain::dates::{canonical_month, parse_month};
use crate::domain::models::{
    AdditionalBalance, BalanceHistory, Expense, ExpenseAutomaticWorkflow,
    ExpenseAutomaticWorkflowPreSavedDescription, FinancialInstitution, ServicePayment,
    SystemSettings, User,
};
use crate::infrastructure::documents::{
    AdditionalBalanceDocument, BalanceHistoryDocument, ExpenseAutomaticWorkflowDocument,
    ExpenseDocument, FinancialInstitutionDocument, PreSavedDescriptionDocument,
    ServicePaymentDocument, SettingsDocument, UserDocument,
};

use super::catalog::DomainCatalog;

/// Source amounts arrive as doubles; the relational columns are fixed-point
/// with two fractional digits.
pub fn money(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

fn optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve(catalog: &DomainCatalog, name: &str, kind: &str, source: &str) -> Option<i64> {
    if name.is_empty() {
        return None;
    }
    catalog.resolve(name, kind, source)
}

pub fn user_row(doc: &UserDocument) -> User {
    User {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        first_name: doc.name.clone(),
        last_name: optional_text(&doc.last_name),
        email: doc.email.clone(),
        fl_admin: doc.admin,
        monthly_income: money(doc.monthly_income),
        fl_payment_requested: doc.requested_payment,
        fl_payment_pending: doc.pending_payment,
        fl_payment_paid: doc.paid_payment,
        current_spending_date: optional_text(&canonical_month(&doc.looking_at_spending_date)),
    }
}

/// Maps a simple (non-aggregate) expense. Aggregate parents are built by the
/// installment engine instead.
pub fn expense_row(doc: &ExpenseDocument, user_id: i64, catalog: &DomainCatalog) -> Expense {
    let validity_period_date = doc
        .validity
        .as_deref()
        .filter(|validity| !validity.is_empty())
        .and_then(parse_month);

    Expense {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        spending_date_yyyy_mm: canonical_month(&doc.spending_date),
        id_status: resolve(catalog, &doc.status, "id_status", "expense"),
        id_type: resolve(catalog, &doc.expense_type, "id_type", "expense"),
        validity_period_date,
        fl_indeterminate_validity_period_date: doc.indeterminate_validity,
        name: doc.expense_name.clone(),
        total_amount: money(doc.amount),
        total_paid_amount: money(doc.already_paid_amount),
    }
}

pub fn financial_institution_row(
    doc: &FinancialInstitutionDocument,
    user_id: i64,
) -> FinancialInstitution {
    FinancialInstitution {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        name: doc.nome.clone(),
        fl_credit_card: doc.cartao_credito,
        fl_money_movement: doc.movimentacao_dinheiro,
        fl_investment: doc.investimentos,
    }
}

pub fn additional_balance_row(doc: &AdditionalBalanceDocument, user_id: i64) -> AdditionalBalance {
    AdditionalBalance {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        spending_date_yyyy_mm: canonical_month(&doc.spending_date),
        amount: money(doc.balance),
        description: optional_text(&doc.description),
    }
}

pub fn balance_history_row(doc: &BalanceHistoryDocument, user_id: i64) -> BalanceHistory {
    BalanceHistory {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        spending_date_yyyy_mm: canonical_month(&doc.spending_date),
        amount: money(doc.balance),
        last_month_amount: money(doc.last_month_balance),
        monthly_income: money(doc.monthly_income),
    }
}

pub fn workflow_row(
    doc: &ExpenseAutomaticWorkflowDocument,
    user_id: i64,
    catalog: &DomainCatalog,
) -> ExpenseAutomaticWorkflow {
    let extracted = doc
        .extracted_expense_content_from_image
        .as_ref()
        .and_then(bson_to_json_text);

    let sync_processed_date = parse_rfc3339(&doc.sync_processed_date);

    ExpenseAutomaticWorkflow {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        base64_image: optional_text(&doc.base64_image),
        description: optional_text(&doc.description),
        extracted_expense_content_from_image: extracted,
        spending_date_yyyy_mm: optional_text(&canonical_month(&doc.spending_date)),
        sync_processed_date,
        id_sync_status: resolve(
            catalog,
            &doc.sync_status,
            "id_sync_status",
            "expense_automatic_workflow",
        ),
        processing_message: optional_text(&doc.processing_message),
    }
}

pub fn pre_saved_description_row(
    doc: &PreSavedDescriptionDocument,
    user_id: i64,
) -> ExpenseAutomaticWorkflowPreSavedDescription {
    ExpenseAutomaticWorkflowPreSavedDescription {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        description: doc.description.clone(),
    }
}

/// Maps a service payment. `None` when the payment date is missing or in a
/// format we cannot parse; the document is skipped and retried on a later
/// envelope.
pub fn service_payment_row(
    doc: &ServicePaymentDocument,
    user_id: i64,
    catalog: &DomainCatalog,
) -> Option<ServicePayment> {
    let service_payment_date = parse_payment_date(&doc.payment_date)?;

    Some(ServicePayment {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        user_id,
        service_payment_date,
        service_payment_type_id: catalog.resolve(
            "PayPal",
            "service_payment_type_id",
            "service_payment",
        ),
    })
}

pub fn system_settings_row(doc: &SettingsDocument) -> SystemSettings {
    let json_sync_metadata = if doc.sync_metadata.is_empty() {
        None
    } else {
        let values: Vec<serde_json::Value> = doc
            .sync_metadata
            .iter()
            .map(|entry| entry.clone().into_relaxed_extjson())
            .collect();
        Some(serde_json::Value::Array(values))
    };

    SystemSettings {
        id: 0,
        guid: None,
        source_id: doc.id.clone(),
        fl_block_user_registration: doc.block_user_registration,
        fl_maintenance: doc.maintenance,
        json_sync_metadata,
    }
}

/// Payment dates are written as plain `YYYY-MM-DD` by newer clients and as
/// RFC-3339 timestamps by older ones.
fn parse_payment_date(value: &str) -> Option<NaiveDate> {
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|timestamp| timestamp.date_naive())
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

/// Serializes the loosely typed extracted-content payload to JSON text.
/// A BSON null becomes NULL rather than the string "null".
fn bson_to_json_text(value: &Bson) -> Option<String> {
    if matches!(value, Bson::Null) {
        return None;
    }
    let json = value.clone().into_relaxed_extjson();
    if json.is_null() {
        return None;
    }
    serde_json::to_string(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::DomainCatalog;

    fn catalog() -> DomainCatalog {
        DomainCatalog::from_entries(vec![
            (key("paid", "id_status", "expense"), 1),
            (key("expense", "id_type", "expense"), 2),
            (key("invoice", "id_type", "expense"), 3),
            (key("pending", "id_status", "expense_installment"), 4),
            (key("PayPal", "service_payment_type_id", "service_payment"), 5),
            (key("success", "id_sync_status", "expense_automatic_workflow"), 6),
        ])
    }

    fn key(name: &str, kind: &str, source: &str) -> (String, String, String) {
        (name.to_string(), kind.to_string(), source.to_string())
    }

    #[test]
    fn maps_simple_expense_with_canonical_spending_date() {
        let doc = ExpenseDocument {
            id: "E1".to_string(),
            user: "U1".to_string(),
            expense_name: "Coffee".to_string(),
            amount: 4.5,
            already_paid_amount: 4.5,
            spending_date: "2024-03".to_string(),
            status: "paid".to_string(),
            expense_type: "expense".to_string(),
            validity: None,
            indeterminate_validity: false,
        };

        let row = expense_row(&doc, 42, &catalog());

        assert_eq!(row.source_id, "E1");
        assert_eq!(row.user_id, 42);
        assert_eq!(row.spending_date_yyyy_mm, "2024/03");
        assert_eq!(row.name, "Coffee");
        assert_eq!(row.total_amount, Decimal::new(450, 2));
        assert_eq!(row.total_paid_amount, Decimal::new(450, 2));
        assert_eq!(row.id_status, Some(1));
        assert_eq!(row.id_type, Some(2));
        assert_eq!(row.validity_period_date, None);
    }

    #[test]
    fn unresolved_enum_projects_to_none() {
        let doc = ExpenseDocument {
            id: "E2".to_string(),
            status: "refunded".to_string(),
            expense_type: "subscription".to_string(),
            ..ExpenseDocument::default()
        };

        let row = expense_row(&doc, 1, &catalog());

        assert_eq!(row.id_status, None);
        assert_eq!(row.id_type, None);
    }

    #[test]
    fn maps_user_with_nullable_projections() {
        let doc = UserDocument {
            id: "U1".to_string(),
            name: "Ada".to_string(),
            last_name: String::new(),
            email: "ada@example.com".to_string(),
            admin: true,
            monthly_income: 1234.567,
            requested_payment: true,
            pending_payment: false,
            paid_payment: true,
            looking_at_spending_date: "2024-06".to_string(),
        };

        let row = user_row(&doc);

        assert_eq!(row.first_name, "Ada");
        assert_eq!(row.last_name, None);
        assert!(row.fl_admin);
        assert_eq!(row.monthly_income, Decimal::new(123457, 2));
        assert_eq!(row.current_spending_date.as_deref(), Some("2024/06"));
    }

    #[test]
    fn payment_date_accepts_both_formats() {
        assert_eq!(
            parse_payment_date("2024-05-20"),
            NaiveDate::from_ymd_opt(2024, 5, 20)
        );
        assert_eq!(
            parse_payment_date("2024-05-20T14:30:00Z"),
            NaiveDate::from_ymd_opt(2024, 5, 20)
        );
        assert_eq!(parse_payment_date(""), None);
        assert_eq!(parse_payment_date("next tuesday"), None);
    }

    #[test]
    fn unparseable_payment_date_skips_the_document() {
        let doc = ServicePaymentDocument {
            id: "P1".to_string(),
            user: "U1".to_string(),
            payment_date: "not-a-date".to_string(),
        };

        assert!(service_payment_row(&doc, 1, &catalog()).is_none());
    }

    #[test]
    fn payment_type_always_resolves_paypal() {
        let doc = ServicePaymentDocument {
            id: "P2".to_string(),
            user: "U1".to_string(),
            payment_date: "2024-01-15".to_string(),
        };

        let row = service_payment_row(&doc, 1, &catalog()).expect("expected a row");
        assert_eq!(row.service_payment_type_id, Some(5));
        assert_eq!(
            row.service_payment_date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn workflow_extracted_content_serializes_to_json_text() {
        let doc = ExpenseAutomaticWorkflowDocument {
            id: "W1".to_string(),
            user: "U1".to_string(),
            extracted_expense_content_from_image: Some(Bson::Document(bson::doc! {
                "expenseName": "Groceries",
                "amount": 99.9,
            })),
            sync_status: "success".to_string(),
            spending_date: "202405".to_string(),
            ..ExpenseAutomaticWorkflowDocument::default()
        };

        let row = workflow_row(&doc, 7, &catalog());

        let text = row
            .extracted_expense_content_from_image
            .expect("expected serialized content");
        assert!(text.contains("Groceries"));
        assert_eq!(row.id_sync_status, Some(6));
        assert_eq!(row.spending_date_yyyy_mm.as_deref(), Some("2024/05"));
    }

    #[test]
    fn workflow_null_content_projects_to_none() {
        let doc = ExpenseAutomaticWorkflowDocument {
            id: "W2".to_string(),
            extracted_expense_content_from_image: Some(Bson::Null),
            ..ExpenseAutomaticWorkflowDocument::default()
        };

        let row = workflow_row(&doc, 7, &catalog());
        assert_eq!(row.extracted_expense_content_from_image, None);
    }

    #[test]
    fn money_rounds_to_two_fractional_digits() {
        assert_eq!(money(4.5), Decimal::new(450, 2));
        assert_eq!(money(10.005), Decimal::new(1000, 2));
        assert_eq!(money(0.0), Decimal::ZERO);
    }
}
