//! Error types for linkbio-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Result type alias using linkbio-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in linkbio-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local input was rejected before reaching any collaborator
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The remote collection store failed
    #[error("Transport error: {0}")]
    Transport(#[from] StoreError),

    /// The identity provider failed
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Input problems detected locally. The display text is user-facing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An intent was submitted with no bound identity
    #[error("You must be logged in to {0}.")]
    NotSignedIn(&'static str),

    /// Title or URL was empty after trimming
    #[error("Both Title and URL are required.")]
    MissingFields,

    /// The normalized URL is not an absolute URL
    #[error("Please enter a valid URL.")]
    InvalidUrl(String),

    /// Delete intent without a link id
    #[error("Link id is required.")]
    MissingLinkId,

    /// A user id that cannot be used as a database key
    #[error("Invalid collection path: {0}")]
    InvalidPath(String),
}
