// src/manifest.rs

//! Package manifest model
//!
//! In-memory representation of a package and its declared applications,
//! parsed from the package's TOML manifest. The model is constructed
//! once and stays immutable for the duration of generation and service
//! control; everything derived from it (unit text, wrapper scripts) is
//! recreated in full on every install.
//!
//! The manifest also defines the package's security identity: the
//! confinement profile `<qualified>.<app>` and the versioned instance id
//! `<qualified>_<app>_<version>`, which double as the unit file names.

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Stop timeout applied when the manifest does not set one
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("duplicate app name: {0}")]
    DuplicateApp(String),

    #[error("app '{0}': bus-name must be set exactly when daemon type is dbus")]
    BusName(String),

    #[error("app '{0}': listen-stream must be set exactly when socket is enabled")]
    ListenStream(String),
}

/// Declared supervision semantics for a daemon app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DaemonType {
    Simple,
    Forking,
    Dbus,
    Oneshot,
    Notify,
}

/// Condition under which the init system restarts a stopped service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RestartCondition {
    Always,
    OnSuccess,
    #[default]
    OnFailure,
    OnAbnormal,
    OnAbort,
    OnWatchdog,
    Never,
}

/// Whether a package is a regular application or a framework other
/// packages depend on. Frameworks must be fully up before dependents
/// start, and themselves wait for pre-framework setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PackageKind {
    #[default]
    App,
    Framework,
}

/// One runnable unit within a package.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppSpec {
    /// Identifier, unique within the package
    pub name: String,

    /// Start command, relative to the package base directory
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub stop: Option<String>,

    #[serde(default)]
    pub post_stop: Option<String>,

    /// Free text from the manifest author; untrusted, screened by the
    /// injection validator before it reaches unit text
    #[serde(default)]
    pub description: String,

    /// Present iff the app runs as a service
    #[serde(default)]
    pub daemon: Option<DaemonType>,

    /// Required iff `daemon` is dbus
    #[serde(default)]
    pub bus_name: Option<String>,

    #[serde(default)]
    pub restart_condition: Option<RestartCondition>,

    /// Seconds to wait for a graceful stop before escalating
    #[serde(default, rename = "stop-timeout")]
    pub stop_timeout_secs: Option<u64>,

    /// Socket activation: the init system owns the listening socket and
    /// starts the service on first connection
    #[serde(default)]
    pub socket: bool,

    /// Required iff `socket` is set
    #[serde(default)]
    pub listen_stream: Option<String>,

    /// Octal permission string for the activation socket
    #[serde(default)]
    pub socket_mode: Option<String>,
}

impl AppSpec {
    /// True when the app runs under the init system.
    pub fn is_service(&self) -> bool {
        self.daemon.is_some()
    }

    /// Graceful stop window, defaulting to [`DEFAULT_STOP_TIMEOUT`].
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STOP_TIMEOUT)
    }
}

/// A package and its declared applications.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,

    /// Origin namespace for packages that carry one
    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub kind: PackageKind,

    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

impl PackageManifest {
    /// Parse and validate a manifest from TOML text.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: PackageManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate required fields and cross-field invariants.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::MissingField("name".to_string()));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingField("version".to_string()));
        }

        let mut seen = HashSet::new();
        for app in &self.apps {
            if app.name.is_empty() {
                return Err(ManifestError::MissingField("apps.name".to_string()));
            }
            if !seen.insert(app.name.as_str()) {
                return Err(ManifestError::DuplicateApp(app.name.clone()));
            }
            if (app.daemon == Some(DaemonType::Dbus)) != app.bus_name.is_some() {
                return Err(ManifestError::BusName(app.name.clone()));
            }
            if app.socket != app.listen_stream.is_some() {
                return Err(ManifestError::ListenStream(app.name.clone()));
            }
        }
        Ok(())
    }

    /// Package name qualified with its origin namespace.
    ///
    /// Frameworks are origin-less by definition.
    pub fn qualified_name(&self) -> String {
        match (self.kind, &self.origin) {
            (PackageKind::Framework, _) | (_, None) => self.name.clone(),
            (_, Some(origin)) => format!("{}.{}", self.name, origin),
        }
    }

    pub fn is_framework(&self) -> bool {
        self.kind == PackageKind::Framework
    }

    /// Confinement profile for one app: `<qualified>.<app>`
    pub fn security_profile(&self, app: &AppSpec) -> String {
        format!("{}.{}", self.qualified_name(), app.name)
    }

    /// Versioned instance id for one app: `<qualified>_<app>_<version>`
    pub fn instance_id(&self, app: &AppSpec) -> String {
        format!("{}_{}_{}", self.qualified_name(), app.name, self.version)
    }

    pub fn service_unit_name(&self, app: &AppSpec) -> String {
        format!("{}.service", self.instance_id(app))
    }

    pub fn socket_unit_name(&self, app: &AppSpec) -> String {
        format!("{}.socket", self.instance_id(app))
    }

    /// Name of the wrapper script for a command-line entry point
    pub fn binary_name(&self, app: &AppSpec) -> String {
        self.security_profile(app)
    }
}
