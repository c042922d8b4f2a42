//! Idempotent persistence for every replicated entity. Each repository
//! upserts by `source_id` (installments key on their guid instead): the
//! first replication inserts the row and issues its guid, later
//! replications update every non-key column and stamp `updated_at`.

mod balances;
mod expenses;
mod installments;
mod institutions;
mod payments;
mod settings;
mod users;
mod workflows;

pub use balances::{AdditionalBalanceRepository, BalanceHistoryRepository};
pub use expenses::ExpenseRepository;
pub use installments::ExpenseInstallmentRepository;
pub use institutions::FinancialInstitutionRepository;
pub use payments::ServicePaymentRepository;
pub use settings::SystemSettingsRepository;
pub use users::UserRepository;
pub use workflows::{ExpenseAutomaticWorkflowRepository, PreSavedDescriptionRepository};
