//! Error handling for the KTV engine
//!
//! Every error carries a stable code and, where the user can act on it,
//! recovery suggestions.

use thiserror::Error;

/// Result type alias for KTV operations
pub type Result<T> = std::result::Result<T, KtvError>;

/// Main error type for KTV operations
#[derive(Error, Debug)]
pub enum KtvError {
    // Capture Errors
    #[error("Microphone access denied: {reason}")]
    PermissionDenied { reason: String },

    // Audio Data Errors
    #[error("Could not decode audio: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Could not fetch asset '{path}': {reason}")]
    Fetch {
        path: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Graph Errors
    #[error("Graph reference error: {reason}")]
    GraphReference { reason: String },

    #[error("Node '{name}' is already registered")]
    DuplicateNode { name: String },

    // State Errors
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Invalid parameter {param}: {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Backend Errors
    #[error("Audio backend error: {reason}")]
    Backend { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KtvError {
    /// Shorthand for a `GraphReference` error
    pub fn graph_reference(reason: impl Into<String>) -> Self {
        KtvError::GraphReference {
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidState` error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        KtvError::InvalidState {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Decode` error without an underlying source
    pub fn decode(reason: impl Into<String>) -> Self {
        KtvError::Decode {
            reason: reason.into(),
            source: None,
        }
    }

    /// Shorthand for a `Backend` error
    pub fn backend(reason: impl Into<String>) -> Self {
        KtvError::Backend {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            KtvError::PermissionDenied { .. } => "PERMISSION_DENIED",
            KtvError::Decode { .. } => "DECODE_ERROR",
            KtvError::Fetch { .. } => "FETCH_ERROR",
            KtvError::GraphReference { .. } => "GRAPH_REFERENCE_ERROR",
            KtvError::DuplicateNode { .. } => "DUPLICATE_NODE",
            KtvError::InvalidState { .. } => "INVALID_STATE",
            KtvError::InvalidParameter { .. } => "INVALID_PARAMETER",
            KtvError::Backend { .. } => "BACKEND_ERROR",
            KtvError::Io(_) => "IO_ERROR",
            KtvError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Graph errors are internal defects and are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            KtvError::PermissionDenied { .. } => true,
            KtvError::Decode { .. } => true,
            KtvError::Fetch { .. } => true,
            KtvError::InvalidState { .. } => true,
            KtvError::InvalidParameter { .. } => true,
            _ => false,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            KtvError::PermissionDenied { .. } => vec![
                "Allow microphone access for this application",
                "Check that no other application holds the microphone exclusively",
                "Plug in a microphone and try again",
            ],
            KtvError::Decode { .. } => vec![
                "Try converting the file to WAV or MP3 first",
                "Check if the file plays in another application",
                "The file may be corrupted - try re-exporting from source",
            ],
            KtvError::Fetch { .. } => vec![
                "Check that the bundled assets directory is present",
                "A synthetic reverb will be used until the asset is available",
            ],
            KtvError::InvalidState { .. } => vec![
                "Start the karaoke engine first",
                "Upload a backing track before pressing play",
            ],
            KtvError::InvalidParameter { .. } => {
                vec!["Move the control back into its allowed range"]
            }
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            KtvError::PermissionDenied { .. } => {
                "I can't hear your microphone. Please allow microphone access and press \
                 start again."
                    .to_string()
            }
            KtvError::Decode { reason, .. } => {
                format!(
                    "This file doesn't look like audio I can play ({}). Could you try a WAV or \
                     MP3 file?",
                    reason
                )
            }
            KtvError::GraphReference { reason } => {
                format!("Internal audio routing problem: {}. Please report this.", reason)
            }
            _ => self.to_string(),
        }
    }
}
