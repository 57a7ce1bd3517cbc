// src/lib.rs

//! Capsule service management core
//!
//! Translates a confined application's package manifest into systemd
//! service and socket units plus launcher wrapper scripts, installs and
//! activates them, and tears them down again with a bounded TERM-to-KILL
//! stop escalation.
//!
//! # Architecture
//!
//! - Manifest-first: apps are declared in the package manifest, parsed
//!   once and immutable for the duration of generation and control calls
//! - Generated artifacts are derived values: recreated in full on every
//!   install, deleted in full on removal, never partially mutated
//! - The init-system client and the progress reporter are injected
//!   capabilities, so the controller is testable with fakes
//! - All filesystem work hangs off an explicit root prefix, allowing
//!   staged installs (tests, image builds) that never touch the host

pub mod arch;
pub mod dirs;
mod error;
pub mod manifest;
pub mod progress;
pub mod services;
pub mod systemd;
pub mod validate;
pub mod wrapper;

pub use dirs::Dirs;
pub use error::{Error, Result};
pub use manifest::{
    AppSpec, DaemonType, ManifestError, PackageKind, PackageManifest, RestartCondition,
    DEFAULT_STOP_TIMEOUT,
};
pub use progress::{LogProgress, ProgressReporter, SilentProgress};
pub use services::{ServiceManager, KILL_GRACE_PERIOD, STOP_POLL_INTERVAL};
pub use systemd::{KillSignal, Systemctl, Systemd, SystemdError};
pub use validate::ValidationError;
