use crate::CandidateId;

#[derive(thiserror::Error, Debug)]
pub enum SelectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Alphabet mismatch: {0}")]
    AlphabetMismatch(String),
    #[error("Unknown {kind} symbol '{symbol}'")]
    UnknownSymbol { kind: &'static str, symbol: String },
    #[error("decreaseFactor must be a finite number greater than 1, got {0}")]
    InvalidDecreaseFactor(f64),
    #[error("No stop criterion configured. Set max_selected, diphone_saturation or prosody_saturation.")]
    EmptyStopCriteria,
    #[error("Invalid stop criterion '{0}'")]
    StopCriterion(String),
    #[error("Malformed feature vector for candidate {id}: {reason}")]
    MalformedVector { id: CandidateId, reason: String },
    #[error("Feature store error: {0}")]
    Store(String),
    #[error("Invalid coverage snapshot: {0}")]
    Snapshot(String),
}
