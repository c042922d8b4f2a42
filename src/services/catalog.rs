//! Domain enum catalog. The `domain` table is a closed set seeded at boot;
//! at runtime lookups go through an in-memory map so the hot replication
//! path never round-trips to the database for an enum id.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::infrastructure::db::PgPool;

pub struct DomainSeed {
    pub source: &'static str,
    pub kind: &'static str,
    pub names: &'static [&'static str],
}

pub const DOMAIN_SEEDS: &[DomainSeed] = &[
    DomainSeed {
        source: "expense_automatic_workflow",
        kind: "id_sync_status",
        names: &["pending", "success", "error"],
    },
    DomainSeed {
        source: "expense",
        kind: "id_status",
        names: &["pending", "partially_paid", "paid"],
    },
    DomainSeed {
        source: "expense",
        kind: "id_type",
        names: &["expense", "invoice", "savings"],
    },
    DomainSeed {
        source: "expense_installment",
        kind: "id_status",
        names: &["pending", "partially_paid", "paid"],
    },
    DomainSeed {
        source: "service_payment",
        kind: "service_payment_type_id",
        names: &["PayPal"],
    },
];

/// Inserts any missing seed rows. Existing rows are left untouched so the
/// ids the catalog hands out stay stable across restarts.
pub async fn seed_domains(pool: &PgPool) -> sqlx::Result<()> {
    for seed in DOMAIN_SEEDS {
        for name in seed.names {
            sqlx::query(
                "INSERT INTO domain (guid, name, type, source, created_by)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (name, type, source) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(seed.kind)
            .bind(seed.source)
            .bind("system")
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Read-only lookup from `(name, type, source)` to the domain row id.
pub struct DomainCatalog {
    entries: HashMap<(String, String, String), i64>,
}

impl DomainCatalog {
    pub async fn load(pool: &PgPool) -> sqlx::Result<Self> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, name, type, source FROM domain",
        )
        .fetch_all(pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|(id, name, kind, source)| ((name, kind, source), id))
            .collect();

        Ok(Self { entries })
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ((String, String, String), i64)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Resolves an enum string to its domain id. Unknown values are not an
    /// error; the caller projects the column as NULL.
    pub fn resolve(&self, name: &str, kind: &str, source: &str) -> Option<i64> {
        let id = self
            .entries
            .get(&(name.to_string(), kind.to_string(), source.to_string()))
            .copied();
        if id.is_none() {
            debug!(name, kind, source, "domain value not found in catalog");
        }
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::DomainCatalog;

    fn entry(name: &str, kind: &str, source: &str, id: i64) -> ((String, String, String), i64) {
        ((name.to_string(), kind.to_string(), source.to_string()), id)
    }

    #[test]
    fn resolves_seeded_tuples() {
        let catalog = DomainCatalog::from_entries(vec![
            entry("paid", "id_status", "expense", 7),
            entry("pending", "id_status", "expense_installment", 11),
        ]);

        assert_eq!(catalog.resolve("paid", "id_status", "expense"), Some(7));
        assert_eq!(
            catalog.resolve("pending", "id_status", "expense_installment"),
            Some(11)
        );
    }

    #[test]
    fn unknown_lookups_are_none_not_errors() {
        let catalog = DomainCatalog::from_entries(vec![entry("paid", "id_status", "expense", 7)]);

        assert_eq!(catalog.resolve("paid", "id_status", "expense_installment"), None);
        assert_eq!(catalog.resolve("refunded", "id_status", "expense"), None);
    }
}
