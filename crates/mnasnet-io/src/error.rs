use mnasnet_core::TensorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateDictError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing key in state dict: {0}")]
    MissingKey(String),

    #[error("unexpected key in state dict: {0}")]
    UnexpectedKey(String),

    #[error("duplicate key in state dict: {0}")]
    DuplicateKey(String),

    #[error("shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("entry {name} holds {len} values for shape {shape:?}")]
    CorruptEntry {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type StateDictResult<T> = Result<T, StateDictError>;
