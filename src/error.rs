// src/error.rs

//! Crate-level error type
//!
//! Generation errors (validation) are detected before any filesystem
//! mutation; IO and init-system errors surface to the caller. The stop
//! escalation during removal is not an error: the unit does end up
//! stopped and the event travels over the progress channel instead.

use thiserror::Error;

/// Errors surfaced by unit generation and service control
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest text would forge additional unit directives
    #[error(transparent)]
    Validation(#[from] crate::validate::ValidationError),

    /// Manifest failed parsing or invariant checks
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),

    /// Unit or wrapper file write/delete failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Init-system call failure
    #[error(transparent)]
    Systemd(#[from] crate::systemd::SystemdError),
}

pub type Result<T> = std::result::Result<T, Error>;
