use thiserror::Error;

/// A collection that could not be fully replicated within one envelope.
#[derive(Debug, Error)]
#[error("{collection}: {message}")]
pub struct CollectionFailure {
    pub collection: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The envelope document named by the bus message does not exist. The
    /// message is dropped rather than requeued; retrying cannot help.
    #[error("envelope {0} not found in document store")]
    EnvelopeNotFound(String),
    #[error("document store error: {0}")]
    Documents(#[from] mongodb::error::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Installments(String),
    #[error("failed to sync {} collection(s): {}", .0.len(), join_failures(.0))]
    Collections(Vec<CollectionFailure>),
}

fn join_failures(failures: &[CollectionFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_error_names_every_failed_collection() {
        let error = SyncError::Collections(vec![
            CollectionFailure {
                collection: "users",
                message: "connection reset".to_string(),
            },
            CollectionFailure {
                collection: "expenses",
                message: "constraint violation".to_string(),
            },
        ]);

        let rendered = error.to_string();
        assert!(rendered.contains("2 collection(s)"));
        assert!(rendered.contains("users: connection reset"));
        assert!(rendered.contains("expenses: constraint violation"));
    }
}
