//! Saving and restoring layer state as JSON state dicts.

pub mod error;
pub mod state_dict;

pub use error::{StateDictError, StateDictResult};
pub use state_dict::{apply_state_dict, load_state_dict_file, save_state_dict, StateDict, TensorEntry};
