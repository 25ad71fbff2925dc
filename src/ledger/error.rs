use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid transition {transition} for {key} from state {from}")]
    InvalidTransition {
        key: String,
        from: String,
        transition: &'static str,
    },

    #[error(
        "Destinations of partition {partition} changed from {recorded:?} to {configured:?}; use a new partition id"
    )]
    DestinationsChanged {
        partition: String,
        recorded: Vec<String>,
        configured: Vec<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, LedgerError::InvalidTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
