use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] linkbio_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Validation(#[from] linkbio_core::error::ValidationError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Operation(String),
    #[error("Not signed in. Run `linkbio auth login --email <email> --password <password>` first.")]
    NotSignedIn,
    #[error("Timed out waiting for the link store")]
    Timeout,
    #[error(
        "Firebase is not configured. Run `linkbio config init`, or set FIREBASE_API_KEY and FIREBASE_DATABASE_URL."
    )]
    NotConfigured,
}
