//! Error types for the VASP node binary.

/// Errors that can occur while configuring or running a VASP node.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A required setting was missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// This node's own `LOCAL_ADDRESS` failed to decode.
    #[error("invalid local address: {0}")]
    Address(#[from] vasp_core::error::StructureError),

    /// The bind address/port could not be bound.
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
}
