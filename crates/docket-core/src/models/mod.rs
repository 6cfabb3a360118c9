//! Data models for Docket
//!
//! Collections and slots, quota accounts and plans, and upload grants.

mod category;
mod document;
mod quota;
mod upload;

pub use category::*;
pub use document::*;
pub use quota::*;
pub use upload::*;
