/*!
The error taxonomy used across the whole crate.

Only input-validation and device-tree invariant violations are meant to reach
application code; wire-parse failures and transport I/O errors are logged and
absorbed at the point they occur (see the module docs on `publisher` and
`locator`).
*/

use thiserror::Error;

/// The error type returned by fallible operations in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller passed an argument that violates a documented precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation was attempted on a publisher/locator that has already
    /// been disposed.
    #[error("operation attempted after dispose")]
    Disposed,

    /// An operation would violate a device-tree invariant, e.g. attaching an
    /// embedded device to two different roots.
    #[error("device tree invariant violated: {0}")]
    InvariantViolation(String),

    /// A transport-level I/O failure. Publisher and Locator never let this
    /// variant escape from their own methods; it exists for the
    /// communications server implementation(s).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
