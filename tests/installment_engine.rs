mod test_harness;

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use ledger_ingest::infrastructure::documents::{ExpenseDocument, UserDocument};
use ledger_ingest::repositories::UserRepository;
use ledger_ingest::services::catalog::DomainCatalog;
use ledger_ingest::services::{installments, transform};

const SERVICE: &str = "ledger-ingest-test";

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

async fn replicated_user(pool: &PgPool) -> Result<(String, i64)> {
    let source_id = unique("user");
    let doc = UserDocument {
        id: source_id.clone(),
        name: "Ada".to_string(),
        email: format!("{source_id}@example.com"),
        ..UserDocument::default()
    };
    let mut row = transform::user_row(&doc);
    UserRepository::new(pool, SERVICE).upsert(&mut row).await?;
    Ok((source_id, row.id))
}

fn invoice_doc(
    user: &str,
    name: &str,
    spending_date: &str,
    validity: &str,
) -> ExpenseDocument {
    ExpenseDocument {
        id: unique("expense"),
        user: user.to_string(),
        expense_name: name.to_string(),
        amount: 500.0,
        already_paid_amount: 500.0,
        spending_date: spending_date.to_string(),
        status: "paid".to_string(),
        expense_type: "invoice".to_string(),
        validity: Some(validity.to_string()),
        ..ExpenseDocument::default()
    }
}

async fn parent_id(pool: &PgPool, name: &str, user_id: i64) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM expense
         WHERE user_id = $1 AND name = $2 AND spending_date__yyyy_mm = ''",
    )
    .bind(user_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn installment_months(pool: &PgPool, expense_id: i64) -> Result<Vec<String>> {
    let months = sqlx::query_scalar::<_, String>(
        "SELECT to_char(due_date, 'YYYY/MM') FROM expense_installment
         WHERE expense_id = $1 ORDER BY due_date",
    )
    .bind(expense_id)
    .fetch_all(pool)
    .await?;
    Ok(months)
}

#[tokio::test]
async fn materializes_history_and_projects_to_the_validity_horizon() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let (user_source, user_id) = replicated_user(&pool).await?;
        let name = unique("Laptop");

        let trigger = invoice_doc(&user_source, &name, "2024-01", "2024-04");
        let siblings = vec![
            trigger.clone(),
            invoice_doc(&user_source, &name, "2024-02", "2024-04"),
            invoice_doc(&user_source, &name, "2024-03", "2024-04"),
        ];

        installments::sync_aggregate_expense(
            &pool, &catalog, SERVICE, &trigger, &siblings, user_id,
        )
        .await?;

        let parent = parent_id(&pool, &name, user_id).await?;

        let (spending, validity, total, paid, status) = sqlx::query_as::<
            _,
            (String, Option<NaiveDate>, Decimal, Decimal, Option<i64>),
        >(
            "SELECT spending_date__yyyy_mm, validity_period_date, total_amount,
                    total_paid_amount, id_status
             FROM expense WHERE id = $1",
        )
        .bind(parent)
        .fetch_one(&pool)
        .await?;

        assert_eq!(spending, "");
        assert_eq!(validity, NaiveDate::from_ymd_opt(2024, 4, 1));
        assert_eq!(total, Decimal::ZERO);
        assert_eq!(paid, Decimal::ZERO);
        assert_eq!(status, None);

        let months = installment_months(&pool, parent).await?;
        assert_eq!(months, vec!["2024/01", "2024/02", "2024/03", "2024/04"]);

        // The projected month carries the trigger amount, nothing paid, and
        // the pending status.
        let (amount, paid_amount, status) = sqlx::query_as::<_, (Decimal, Decimal, Option<i64>)>(
            "SELECT amount, paid_amount, id_status FROM expense_installment
             WHERE expense_id = $1 AND to_char(due_date, 'YYYY/MM') = '2024/04'",
        )
        .bind(parent)
        .fetch_one(&pool)
        .await?;
        assert_eq!(amount, Decimal::new(50000, 2));
        assert_eq!(paid_amount, Decimal::ZERO);
        assert_eq!(
            status,
            catalog.resolve("pending", "id_status", "expense_installment")
        );

        let (historical_amount, historical_paid) = sqlx::query_as::<_, (Decimal, Decimal)>(
            "SELECT amount, paid_amount FROM expense_installment
             WHERE expense_id = $1 AND to_char(due_date, 'YYYY/MM') = '2024/02'",
        )
        .bind(parent)
        .fetch_one(&pool)
        .await?;
        assert_eq!(historical_amount, Decimal::new(50000, 2));
        assert_eq!(historical_paid, Decimal::new(50000, 2));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn replay_does_not_grow_the_installment_set() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let (user_source, user_id) = replicated_user(&pool).await?;
        let name = unique("Laptop");

        let trigger = invoice_doc(&user_source, &name, "2024-01", "2024-04");
        let siblings = vec![
            trigger.clone(),
            invoice_doc(&user_source, &name, "2024-02", "2024-04"),
            invoice_doc(&user_source, &name, "2024-03", "2024-04"),
        ];

        installments::sync_aggregate_expense(
            &pool, &catalog, SERVICE, &trigger, &siblings, user_id,
        )
        .await?;
        let parent_first = parent_id(&pool, &name, user_id).await?;
        let months_first = installment_months(&pool, parent_first).await?;

        installments::sync_aggregate_expense(
            &pool, &catalog, SERVICE, &trigger, &siblings, user_id,
        )
        .await?;
        let parent_second = parent_id(&pool, &name, user_id).await?;
        let months_second = installment_months(&pool, parent_second).await?;

        assert_eq!(parent_second, parent_first);
        assert_eq!(months_second, months_first);
        assert_eq!(months_second.len(), 4);

        // Historical installments were updated in place, not duplicated.
        let duplicates = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM (
                 SELECT to_char(due_date, 'YYYY/MM') AS month
                 FROM expense_installment WHERE expense_id = $1
                 GROUP BY 1 HAVING COUNT(1) > 1
             ) duplicated",
        )
        .bind(parent_first)
        .fetch_one(&pool)
        .await?;
        assert_eq!(duplicates, 0);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn no_forward_projection_when_history_reaches_the_horizon() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let (user_source, user_id) = replicated_user(&pool).await?;
        let name = unique("Savings");

        let trigger = invoice_doc(&user_source, &name, "2024-01", "2024-03");
        let siblings = vec![
            trigger.clone(),
            invoice_doc(&user_source, &name, "2024-02", "2024-03"),
            invoice_doc(&user_source, &name, "2024-03", "2024-03"),
        ];

        installments::sync_aggregate_expense(
            &pool, &catalog, SERVICE, &trigger, &siblings, user_id,
        )
        .await?;

        let parent = parent_id(&pool, &name, user_id).await?;
        let months = installment_months(&pool, parent).await?;
        assert_eq!(months, vec!["2024/01", "2024/02", "2024/03"]);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn empty_sibling_set_projects_from_the_trigger_document() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let (user_source, user_id) = replicated_user(&pool).await?;
        let name = unique("Subscription");

        let trigger = invoice_doc(&user_source, &name, "2024-01", "2024-03");

        installments::sync_aggregate_expense(&pool, &catalog, SERVICE, &trigger, &[], user_id)
            .await?;

        let parent = parent_id(&pool, &name, user_id).await?;
        let months = installment_months(&pool, parent).await?;
        assert_eq!(months, vec!["2024/02", "2024/03"]);

        Ok(())
    })
    .await
}
