/* src/lib.rs */

// Re-export modules for both binary and tests
pub mod alert;
pub mod error;
pub mod logger;
pub mod parse;
pub mod pump;
pub mod runtime;
pub mod signals;
pub mod sink;

pub use error::{Error, Result};
