//! Aggregate-expense installment engine. Several source expense records with
//! the same name and validity compose one logical invoice/savings plan; they
//! materialize in the relational store as a single parent expense plus one
//! installment per covered month, extended forward to the validity horizon.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::domain::dates::{add_months, canonical_month, month_range, parse_month};
use crate::domain::models::{Expense, ExpenseInstallment};
use crate::infrastructure::db::PgPool;
use crate::infrastructure::documents::ExpenseDocument;
use crate::repositories::{ExpenseInstallmentRepository, ExpenseRepository};
use crate::services::catalog::DomainCatalog;
use crate::services::errors::SyncError;
use crate::services::transform::money;

/// Whether an expense document takes the aggregate path: invoices and
/// savings plans with a validity horizon. Everything else is a plain upsert.
pub fn is_aggregate(doc: &ExpenseDocument) -> bool {
    matches!(doc.expense_type.as_str(), "invoice" | "savings")
        && doc
            .validity
            .as_deref()
            .is_some_and(|validity| !validity.is_empty())
}

/// Replicates one aggregate expense: finds or creates the parent row, then
/// walks the sibling set (`siblings`, the documents sharing this plan's
/// user/name/validity, in spending-date order) materializing one installment
/// per observed month, and finally projects pending installments forward
/// from the last observed month to the validity horizon.
///
/// Re-invocation with the same inputs is a no-op apart from `updated_at`:
/// the parent is found by (name, validity, user), historical installments
/// update in place, and projected months that already exist are skipped.
pub async fn sync_aggregate_expense(
    pool: &PgPool,
    catalog: &DomainCatalog,
    service_name: &str,
    doc: &ExpenseDocument,
    siblings: &[ExpenseDocument],
    user_id: i64,
) -> Result<(), SyncError> {
    let validity = match doc.validity.as_deref() {
        Some(validity) if !validity.is_empty() => validity,
        _ => {
            debug!(source_id = %doc.id, "expense has no validity, nothing to aggregate");
            return Ok(());
        }
    };

    let expense_repo = ExpenseRepository::new(pool, service_name);
    let installment_repo = ExpenseInstallmentRepository::new(pool, service_name);

    // The validity can arrive as YYYY-MM or as a full ISO timestamp.
    let validity_month = canonical_month(validity);

    let parent_id = match expense_repo
        .by_name_validity_user(&doc.expense_name, &validity_month, user_id)
        .await?
    {
        Some(parent) => {
            debug!(expense = %doc.expense_name, id = parent.id, "reusing aggregate parent");
            parent.id
        }
        None => {
            let mut parent = Expense {
                id: 0,
                guid: None,
                source_id: doc.id.clone(),
                user_id,
                spending_date_yyyy_mm: String::new(),
                id_status: None,
                id_type: catalog.resolve(&doc.expense_type, "id_type", "expense"),
                validity_period_date: parse_month(&validity_month),
                fl_indeterminate_validity_period_date: doc.indeterminate_validity,
                name: doc.expense_name.clone(),
                total_amount: money(0.0),
                total_paid_amount: money(0.0),
            };
            expense_repo.upsert(&mut parent).await?;
            info!(expense = %doc.expense_name, id = parent.id, "created aggregate parent");
            parent.id
        }
    };

    let mut ordered: Vec<&ExpenseDocument> = siblings.iter().collect();
    ordered.sort_by(|a, b| a.spending_date.cmp(&b.spending_date));

    let mut seen_months: HashSet<String> = HashSet::new();
    let mut failed_writes = 0usize;

    for sibling in &ordered {
        let month = canonical_month(&sibling.spending_date);
        let status_id = if sibling.status.is_empty() {
            None
        } else {
            catalog.resolve(&sibling.status, "id_status", "expense_installment")
        };
        let due_date = parse_month(&month);

        let mut installment = match installment_repo
            .by_expense_and_month(parent_id, &month)
            .await?
        {
            Some(mut existing) => {
                existing.amount = money(sibling.amount);
                existing.paid_amount = money(sibling.already_paid_amount);
                existing.id_status = status_id;
                existing.due_date = due_date;
                existing
            }
            None => ExpenseInstallment {
                id: 0,
                guid: None,
                expense_id: parent_id,
                amount: money(sibling.amount),
                paid_amount: money(sibling.already_paid_amount),
                id_status: status_id,
                due_date,
            },
        };

        if let Err(err) = installment_repo.upsert(&mut installment).await {
            warn!(month = %month, error = %err, "failed to write installment");
            failed_writes += 1;
        }

        seen_months.insert(month);
    }

    // Forward projection: from the month after the last observed sibling
    // (or the trigger document's own month when the sibling set is empty)
    // through the validity horizon, inclusive.
    let last_month = match ordered.last() {
        Some(last) => canonical_month(&last.spending_date),
        None => canonical_month(&doc.spending_date),
    };

    if !last_month.is_empty() {
        let pending_status = catalog.resolve("pending", "id_status", "expense_installment");
        let remaining = add_months(&last_month, 1)
            .map(|next| month_range(&next, &validity_month))
            .unwrap_or_default();

        for month in remaining {
            if seen_months.contains(&month) {
                continue;
            }
            if installment_repo
                .by_expense_and_month(parent_id, &month)
                .await?
                .is_some()
            {
                continue;
            }

            let mut installment = ExpenseInstallment {
                id: 0,
                guid: None,
                expense_id: parent_id,
                amount: money(doc.amount),
                paid_amount: money(0.0),
                id_status: pending_status,
                due_date: parse_month(&month),
            };

            if let Err(err) = installment_repo.upsert(&mut installment).await {
                warn!(month = %month, error = %err, "failed to write projected installment");
                failed_writes += 1;
            } else {
                debug!(expense = %doc.expense_name, month = %month, "projected pending installment");
            }
        }
    }

    if failed_writes > 0 {
        return Err(SyncError::Installments(format!(
            "{failed_writes} installment write(s) failed for expense {}",
            doc.expense_name
        )));
    }

    Ok(())
}
