//! Validation modules

pub mod upload;

pub use upload::{parse_slot_index, UploadPolicy, UploadValidationError};
