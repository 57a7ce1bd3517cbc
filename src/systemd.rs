// src/systemd.rs

//! Init-system client capability
//!
//! The service controller talks to systemd through the [`Systemd`] trait
//! so tests can substitute a recording fake and so multiple callers can
//! share one client safely. [`Systemctl`] is the real implementation and
//! shells out to `systemctl`.
//!
//! Operations against the same unit name must be serialized by the
//! caller: the unit registry is a single global namespace.

use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SystemdError {
    #[error("failed to run systemctl {verb}: {source}")]
    Spawn {
        verb: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("systemctl {verb} failed for '{unit}'")]
    Failed { verb: &'static str, unit: String },
}

/// Signals used by the stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
}

impl KillSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
        }
    }
}

/// Client capability for the init system. All calls are blocking and
/// fallible; errors propagate as [`SystemdError`].
pub trait Systemd {
    fn daemon_reload(&self) -> Result<(), SystemdError>;
    fn enable(&self, unit: &str) -> Result<(), SystemdError>;
    fn disable(&self, unit: &str) -> Result<(), SystemdError>;
    fn start(&self, unit: &str) -> Result<(), SystemdError>;
    fn stop(&self, unit: &str) -> Result<(), SystemdError>;
    fn kill(&self, unit: &str, signal: KillSignal) -> Result<(), SystemdError>;
    fn is_active(&self, unit: &str) -> Result<bool, SystemdError>;
}

/// Real client shelling out to `systemctl`.
#[derive(Debug, Default)]
pub struct Systemctl;

impl Systemctl {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, verb: &'static str, args: &[&str], unit: &str) -> Result<(), SystemdError> {
        let status = Command::new("systemctl")
            .arg(verb)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| SystemdError::Spawn { verb, source })?;

        if status.success() {
            debug!("systemctl {} {}", verb, unit);
            Ok(())
        } else {
            Err(SystemdError::Failed {
                verb,
                unit: unit.to_string(),
            })
        }
    }
}

impl Systemd for Systemctl {
    fn daemon_reload(&self) -> Result<(), SystemdError> {
        self.run("daemon-reload", &[], "")
    }

    fn enable(&self, unit: &str) -> Result<(), SystemdError> {
        self.run("enable", &[unit], unit)
    }

    fn disable(&self, unit: &str) -> Result<(), SystemdError> {
        self.run("disable", &[unit], unit)
    }

    fn start(&self, unit: &str) -> Result<(), SystemdError> {
        self.run("start", &[unit], unit)
    }

    fn stop(&self, unit: &str) -> Result<(), SystemdError> {
        self.run("stop", &[unit], unit)
    }

    fn kill(&self, unit: &str, signal: KillSignal) -> Result<(), SystemdError> {
        self.run("kill", &[unit, "-s", signal.as_str()], unit)
    }

    /// `systemctl show` exits zero even for unknown units, so the active
    /// state is read from its property output.
    fn is_active(&self, unit: &str) -> Result<bool, SystemdError> {
        let output = Command::new("systemctl")
            .args(["show", "--property=ActiveState", unit])
            .output()
            .map_err(|source| SystemdError::Spawn { verb: "show", source })?;

        Ok(parse_active_state(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_active_state(show_output: &str) -> bool {
    show_output
        .lines()
        .any(|line| line.trim() == "ActiveState=active")
}
