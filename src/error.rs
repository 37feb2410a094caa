//
// error.rs
// Dicom-Hanging-rs
//
// Error taxonomy for protocol loading, selection and extension registration.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HangingProtocolError>;

#[derive(Debug, Error)]
pub enum HangingProtocolError {
    /// Auto-selection was requested but nothing is registered.
    #[error("No hanging protocol is registered")]
    NoProtocolAvailable,

    #[error("Hanging protocol not registered: {id}")]
    UnknownProtocol { id: String },

    #[error("Invalid extension registration: {reason}")]
    InvalidExtension { reason: String },

    #[error("Failed to parse hanging protocol {path:?}")]
    ProtocolParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
