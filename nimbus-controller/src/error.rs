use nimbus_backends::{DispatchError, KeyGenError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    InvalidState(String),

    #[error("volume {0} is not attached to anything")]
    NotAttached(String),

    #[error("instance {0} has no fixed address")]
    NoFixedIp(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("store failure: {0}")]
    Store(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    KeyGeneration(#[from] KeyGenError),
}

impl ControllerError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ControllerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound { .. })
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::QuotaExceeded(_) => "quota_exceeded",
            ControllerError::NotFound { .. } => "not_found",
            ControllerError::InvalidState(_) => "invalid_state",
            ControllerError::NotAttached(_) => "not_attached",
            ControllerError::NoFixedIp(_) => "no_fixed_ip",
            ControllerError::InvalidParameter(_) => "invalid_parameter",
            ControllerError::Duplicate { .. } => "duplicate",
            ControllerError::Store(_) => "store_error",
            ControllerError::Dispatch(_) => "dispatch_error",
            ControllerError::KeyGeneration(_) => "key_generation_failed",
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => ControllerError::NotFound { kind, id },
            StoreError::Duplicate { kind, id } => ControllerError::Duplicate { kind, id },
            other => ControllerError::Store(other.to_string()),
        }
    }
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;
