//! Shared response contract, wire schema, and error taxonomy for the encrypted network core.

pub mod error;
pub mod protocol;

pub use error::{ErrorClassification, ErrorKind};
pub use protocol::{NetworkResponse, ParseError};
