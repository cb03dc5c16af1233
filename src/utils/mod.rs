//! Utility modules for common functionality

mod sanitize;
mod string;

pub use sanitize::redact_tool_input;
pub use string::truncate_str;
