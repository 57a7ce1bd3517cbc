// src/wrapper.rs

//! Unit and wrapper generation
//!
//! Renders systemd service units, socket units, and launcher wrapper
//! scripts from a validated app declaration. The output layout is a
//! compatibility contract: key order, the `Environment=` variable set
//! and ordering, and the launcher argument shape are all fixed and
//! covered by golden tests.
//!
//! Every path embedded here is first pushed through
//! [`Dirs::strip_global_root`] so artifacts reference the device root
//! rather than a staging prefix.

use crate::arch;
use crate::dirs::{Dirs, DEVICE_DATA_DIR, DEVICE_USER_DATA_DIR};
use crate::manifest::{AppSpec, DaemonType, PackageManifest};
use crate::validate::{verify_unit_safe, ValidationError};
use std::path::Path;

/// Confinement launcher invoked by every generated ExecStart/ExecStop
/// line. Argument shape is fixed: `<profile> <instance> <exe> [args...]`.
const LAUNCHER: &str = "/usr/bin/ubuntu-core-launcher";
/// Wrapper scripts find the launcher via PATH
const LAUNCHER_BIN: &str = "ubuntu-core-launcher";

const FRAMEWORKS_TARGET: &str = "ubuntu-snappy.frameworks.target";
const FRAMEWORKS_PRE_TARGET: &str = "ubuntu-snappy.frameworks-pre.target";
const SERVICE_TARGET: &str = "multi-user.target";
const SOCKET_TARGET: &str = "sockets.target";

/// Marker tagging generated units for later enumeration and cleanup
const MARKER: &str = "X-Snappy=yes";

const DEFAULT_SOCKET_MODE: &str = "0660";

/// systemd rendering for a daemon type. Kept as a lookup so the
/// per-type rules are auditable as data.
struct TypeRendering {
    systemd_type: &'static str,
    needs_bus_name: bool,
}

fn type_rendering(daemon: DaemonType) -> TypeRendering {
    match daemon {
        DaemonType::Simple => TypeRendering {
            systemd_type: "simple",
            needs_bus_name: false,
        },
        DaemonType::Forking => TypeRendering {
            systemd_type: "forking",
            needs_bus_name: false,
        },
        DaemonType::Dbus => TypeRendering {
            systemd_type: "dbus",
            needs_bus_name: true,
        },
        DaemonType::Oneshot => TypeRendering {
            systemd_type: "oneshot",
            needs_bus_name: false,
        },
        DaemonType::Notify => TypeRendering {
            systemd_type: "notify",
            needs_bus_name: false,
        },
    }
}

/// Join a command declared relative to the package base onto the
/// device-rooted base path.
fn resolved_command(app_path: &str, command: &str) -> String {
    format!("{}/{}", app_path.trim_end_matches('/'), command)
}

fn launcher_line(profile: &str, instance: &str, app_path: &str, command: &str) -> String {
    format!(
        "{} {} {} {}",
        LAUNCHER,
        profile,
        instance,
        resolved_command(app_path, command)
    )
}

/// The fixed `Environment=` payload: quoted KEY=VALUE pairs in a fixed
/// order. Order and variable set are a compatibility contract.
fn environment_pairs(
    manifest: &PackageManifest,
    instance: &str,
    app_path: &str,
    data_dir: &str,
    user_data_dir: &str,
) -> String {
    let pairs = [
        ("SNAP_APP", instance),
        ("SNAP", app_path),
        ("SNAP_DATA", data_dir),
        ("SNAP_NAME", manifest.name.as_str()),
        ("SNAP_VERSION", manifest.version.as_str()),
        ("SNAP_ARCH", arch::debian_architecture()),
        ("SNAP_USER_DATA", user_data_dir),
        ("SNAP_APP_PATH", app_path),
        ("SNAP_APP_DATA_PATH", data_dir),
        ("SNAP_APP_USER_DATA_PATH", user_data_dir),
    ];
    pairs
        .iter()
        .map(|(key, value)| format!("\"{}={}\"", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Versioned data directory on the device, trailing slash kept.
fn versioned_dir(base: &str, qualified: &str, version: &str) -> String {
    format!("{}/{}/{}/", base, qualified, version)
}

/// Render the service unit for a daemon app.
///
/// Validation of the manifest-supplied text fields is the only error
/// condition; rendering itself is infallible.
pub fn generate_service_unit(
    app: &AppSpec,
    base_dir: &Path,
    security_profile: &str,
    manifest: &PackageManifest,
    dirs: &Dirs,
) -> Result<String, ValidationError> {
    verify_unit_safe(
        [
            app.name.as_str(),
            app.description.as_str(),
            app.command.as_str(),
            manifest.name.as_str(),
            manifest.version.as_str(),
        ]
        .into_iter()
        .chain(manifest.origin.as_deref())
        .chain(app.stop.as_deref())
        .chain(app.post_stop.as_deref())
        .chain(app.bus_name.as_deref()),
    )?;

    let qualified = manifest.qualified_name();
    let instance = manifest.instance_id(app);
    let app_path = dirs.strip_global_root(base_dir).display().to_string();
    let data_dir = versioned_dir(DEVICE_DATA_DIR, &qualified, &manifest.version);
    let user_data_dir = versioned_dir(DEVICE_USER_DATA_DIR, &qualified, &manifest.version);

    let socket_suffix = if app.socket {
        format!(" {}", manifest.socket_unit_name(app))
    } else {
        String::new()
    };
    let dependencies = if manifest.is_framework() {
        format!(
            "Before={FRAMEWORKS_TARGET}\nAfter={FRAMEWORKS_PRE_TARGET}{socket_suffix}\nRequires={FRAMEWORKS_PRE_TARGET}{socket_suffix}"
        )
    } else {
        format!(
            "After={FRAMEWORKS_TARGET}{socket_suffix}\nRequires={FRAMEWORKS_TARGET}{socket_suffix}"
        )
    };

    let exec_start = launcher_line(security_profile, &instance, &app_path, &app.command);
    let exec_stop = match &app.stop {
        Some(stop) => format!(
            "ExecStop={}\n",
            launcher_line(security_profile, &instance, &app_path, stop)
        ),
        None => String::new(),
    };
    let exec_stop_post = match &app.post_stop {
        Some(post_stop) => format!(
            "ExecStopPost={}\n",
            launcher_line(security_profile, &instance, &app_path, post_stop)
        ),
        None => String::new(),
    };

    let rendering = type_rendering(app.daemon.unwrap_or(DaemonType::Simple));
    // non-dbus units keep a placeholder line where BusName= would sit
    let type_block = if rendering.needs_bus_name {
        format!(
            "Type={}\nBusName={}\n",
            rendering.systemd_type,
            app.bus_name.as_deref().unwrap_or_default()
        )
    } else {
        format!("Type={}\n\n", rendering.systemd_type)
    };

    let environment = environment_pairs(manifest, &instance, &app_path, &data_dir, &user_data_dir);
    let restart = app.restart_condition.unwrap_or_default();
    let timeout = app.stop_timeout().as_secs();

    Ok(format!(
        "[Unit]\n\
         Description={description}\n\
         {dependencies}\n\
         {MARKER}\n\
         \n\
         [Service]\n\
         ExecStart={exec_start}\n\
         Restart={restart}\n\
         WorkingDirectory={data_dir}\n\
         Environment={environment}\n\
         {exec_stop}{exec_stop_post}TimeoutStopSec={timeout}\n\
         {type_block}\
         \n\
         [Install]\n\
         WantedBy={SERVICE_TARGET}\n",
        description = app.description,
    ))
}

/// Render the activation socket unit paired with a service unit.
pub fn generate_socket_unit(
    app: &AppSpec,
    _base_dir: &Path,
    _security_profile: &str,
    manifest: &PackageManifest,
    _dirs: &Dirs,
) -> Result<String, ValidationError> {
    verify_unit_safe(
        [
            app.name.as_str(),
            manifest.name.as_str(),
            manifest.version.as_str(),
        ]
        .into_iter()
        .chain(manifest.origin.as_deref())
        .chain(app.listen_stream.as_deref())
        .chain(app.socket_mode.as_deref()),
    )?;

    let service_unit = manifest.service_unit_name(app);
    let listen_stream = app.listen_stream.as_deref().unwrap_or_default();
    let socket_mode = app.socket_mode.as_deref().unwrap_or(DEFAULT_SOCKET_MODE);

    Ok(format!(
        "[Unit]\n\
         Description= Socket Unit File\n\
         PartOf={service_unit}\n\
         {MARKER}\n\
         \n\
         [Socket]\n\
         ListenStream={listen_stream}\n\
         SocketMode={socket_mode}\n\
         \n\
         [Install]\n\
         WantedBy={SOCKET_TARGET}\n"
    ))
}

/// Render the executable wrapper for a command-line entry point.
///
/// The script forwards all caller arguments to the confinement launcher
/// with the same argument shape the service units use.
pub fn generate_binary_wrapper(
    app: &AppSpec,
    base_dir: &Path,
    security_profile: &str,
    manifest: &PackageManifest,
    dirs: &Dirs,
) -> String {
    let qualified = manifest.qualified_name();
    let instance = manifest.instance_id(app);
    let app_path = dirs.strip_global_root(base_dir).display().to_string();
    let data_dir = versioned_dir(DEVICE_DATA_DIR, &qualified, &manifest.version);
    let exec_path = resolved_command(&app_path, &app.command);

    format!(
        "#!/bin/sh\n\
         set -e\n\
         \n\
         # app environment\n\
         export SNAP_APP=\"{instance}\"\n\
         export SNAP=\"{app_path}\"\n\
         export SNAP_DATA=\"{data_dir}\"\n\
         export SNAP_NAME=\"{name}\"\n\
         export SNAP_VERSION=\"{version}\"\n\
         export SNAP_ARCH=\"{arch}\"\n\
         export SNAP_USER_DATA=\"$HOME/snaps/{qualified}/{version}/\"\n\
         export SNAP_APP_PATH=\"{app_path}\"\n\
         export SNAP_APP_DATA_PATH=\"{data_dir}\"\n\
         export SNAP_APP_USER_DATA_PATH=\"$SNAP_USER_DATA\"\n\
         \n\
         if [ ! -d \"$SNAP_APP_USER_DATA_PATH\" ]; then\n\
         \x20   mkdir -p \"$SNAP_APP_USER_DATA_PATH\"\n\
         fi\n\
         export HOME=\"$SNAP_APP_USER_DATA_PATH\"\n\
         \n\
         cd \"$SNAP_APP_PATH\"\n\
         {LAUNCHER_BIN} {security_profile} {instance} {exec_path} \"$@\"\n",
        name = manifest.name,
        version = manifest.version,
        arch = arch::debian_architecture(),
    )
}
