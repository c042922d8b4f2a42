mod test_harness;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use ledger_ingest::infrastructure::documents::{ExpenseDocument, UserDocument};
use ledger_ingest::repositories::{ExpenseRepository, UserRepository};
use ledger_ingest::services::catalog::DomainCatalog;
use ledger_ingest::services::transform;

const SERVICE: &str = "ledger-ingest-test";

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn user_doc(source_id: &str) -> UserDocument {
    UserDocument {
        id: source_id.to_string(),
        name: "Ada".to_string(),
        email: format!("{source_id}@example.com"),
        monthly_income: 2500.0,
        looking_at_spending_date: "2024-03".to_string(),
        ..UserDocument::default()
    }
}

#[tokio::test]
async fn user_upsert_is_idempotent_and_bumps_updated_at() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let repo = UserRepository::new(&pool, SERVICE);
        let source_id = unique("user");
        let doc = user_doc(&source_id);

        let mut first = transform::user_row(&doc);
        repo.upsert(&mut first).await?;
        assert!(first.id > 0);
        let first_guid = first.guid.expect("guid issued on insert");

        let updated_after_insert = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT updated_at FROM user_account WHERE source_id = $1",
        )
        .bind(&source_id)
        .fetch_one(&pool)
        .await?;
        assert!(updated_after_insert.is_none());

        let mut second = transform::user_row(&doc);
        repo.upsert(&mut second).await?;

        assert_eq!(second.id, first.id);
        assert_eq!(second.guid, Some(first_guid));

        let (created_at, updated_at) =
            sqlx::query_as::<_, (DateTime<Utc>, Option<DateTime<Utc>>)>(
                "SELECT created_at, updated_at FROM user_account WHERE source_id = $1",
            )
            .bind(&source_id)
            .fetch_one(&pool)
            .await?;
        let updated_at = updated_at.expect("updated_at set on second pass");
        assert!(updated_at > created_at);

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM user_account WHERE source_id = $1",
        )
        .bind(&source_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(count, 1);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn update_pass_rewrites_non_key_columns() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let repo = UserRepository::new(&pool, SERVICE);
        let source_id = unique("user");

        let mut row = transform::user_row(&user_doc(&source_id));
        repo.upsert(&mut row).await?;

        let mut changed_doc = user_doc(&source_id);
        changed_doc.name = "Grace".to_string();
        changed_doc.monthly_income = 3100.5;
        let mut changed = transform::user_row(&changed_doc);
        repo.upsert(&mut changed).await?;

        let (first_name, monthly_income) = sqlx::query_as::<_, (String, Decimal)>(
            "SELECT first_name, monthly_income FROM user_account WHERE source_id = $1",
        )
        .bind(&source_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(first_name, "Grace");
        assert_eq!(monthly_income, Decimal::new(31005, 1));

        Ok(())
    })
    .await
}

#[tokio::test]
async fn simple_expense_replicates_with_resolved_status() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let users = UserRepository::new(&pool, SERVICE);
        let expenses = ExpenseRepository::new(&pool, SERVICE);

        let user_source = unique("user");
        let mut owner = transform::user_row(&user_doc(&user_source));
        users.upsert(&mut owner).await?;

        let doc = ExpenseDocument {
            id: unique("expense"),
            user: user_source,
            expense_name: "Coffee".to_string(),
            amount: 4.5,
            already_paid_amount: 4.5,
            spending_date: "2024-03".to_string(),
            status: "paid".to_string(),
            expense_type: "expense".to_string(),
            ..ExpenseDocument::default()
        };

        let mut row = transform::expense_row(&doc, owner.id, &catalog);
        expenses.upsert(&mut row).await?;

        let (spending, total, paid, status) =
            sqlx::query_as::<_, (String, Decimal, Decimal, Option<i64>)>(
                "SELECT spending_date__yyyy_mm, total_amount, total_paid_amount, id_status
                 FROM expense WHERE source_id = $1",
            )
            .bind(&doc.id)
            .fetch_one(&pool)
            .await?;

        assert_eq!(spending, "2024/03");
        assert_eq!(total, Decimal::new(450, 2));
        assert_eq!(paid, Decimal::new(450, 2));
        assert_eq!(status, catalog.resolve("paid", "id_status", "expense"));

        let installments = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM expense_installment ei
             JOIN expense e ON e.id = ei.expense_id
             WHERE e.source_id = $1",
        )
        .bind(&doc.id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(installments, 0);

        Ok(())
    })
    .await
}

#[tokio::test]
async fn unresolved_domain_value_stores_null() -> Result<()> {
    test_harness::run_test(|pool| async move {
        let catalog = DomainCatalog::load(&pool).await?;
        let users = UserRepository::new(&pool, SERVICE);
        let expenses = ExpenseRepository::new(&pool, SERVICE);

        let user_source = unique("user");
        let mut owner = transform::user_row(&user_doc(&user_source));
        users.upsert(&mut owner).await?;

        let doc = ExpenseDocument {
            id: unique("expense"),
            user: user_source,
            expense_name: "Mystery".to_string(),
            amount: 10.0,
            spending_date: "2024-05".to_string(),
            status: "definitely-not-a-seeded-status".to_string(),
            expense_type: "also-not-a-type".to_string(),
            ..ExpenseDocument::default()
        };

        let mut row = transform::expense_row(&doc, owner.id, &catalog);
        expenses.upsert(&mut row).await?;

        let (status, kind) = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
            "SELECT id_status, id_type FROM expense WHERE source_id = $1",
        )
        .bind(&doc.id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(status, None);
        assert_eq!(kind, None);

        Ok(())
    })
    .await
}
