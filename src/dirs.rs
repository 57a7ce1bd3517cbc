// src/dirs.rs

//! Filesystem layout for installed packages
//!
//! Every path hangs off a configurable global root so that install and
//! removal can operate on a staged filesystem (tests, image builds)
//! without touching the host. The root is an explicit value threaded
//! through calls, never ambient global state.
//!
//! Paths embedded into generated artifacts must be the paths as seen on
//! the device itself, so [`Dirs::strip_global_root`] is applied to every
//! executable path, working directory, and environment value before it
//! is rendered.

use std::path::{Path, PathBuf};

/// Device-rooted package tree location
pub const DEVICE_APP_DIR: &str = "/snaps";
/// Device-rooted versioned writable data location
pub const DEVICE_DATA_DIR: &str = "/var/lib/snaps";
/// Device-rooted per-user data location used by services
pub const DEVICE_USER_DATA_DIR: &str = "/root/snaps";
/// Device-rooted systemd unit directory
pub const DEVICE_UNIT_DIR: &str = "/etc/systemd/system";

/// Re-root a device-absolute path under an alternate root.
fn rooted(root: &Path, device_path: &str) -> PathBuf {
    root.join(device_path.trim_start_matches('/'))
}

/// Directory layout under a global root.
#[derive(Debug, Clone)]
pub struct Dirs {
    /// Root prefix every other path hangs off ("/" on a live system)
    pub global_root: PathBuf,
    /// Installed package trees: `<root>/snaps`
    pub app_dir: PathBuf,
    /// Versioned writable data: `<root>/var/lib/snaps`
    pub data_dir: PathBuf,
    /// Wrapper scripts for command-line entry points: `<root>/snaps/bin`
    pub bin_dir: PathBuf,
    /// systemd unit directory: `<root>/etc/systemd/system`
    pub unit_dir: PathBuf,
}

impl Dirs {
    /// Layout under an alternate root.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            global_root: root.to_path_buf(),
            app_dir: rooted(root, DEVICE_APP_DIR),
            data_dir: rooted(root, DEVICE_DATA_DIR),
            bin_dir: rooted(root, DEVICE_APP_DIR).join("bin"),
            unit_dir: rooted(root, DEVICE_UNIT_DIR),
        }
    }

    /// Layout for the live system root.
    pub fn live() -> Self {
        Self::under("/")
    }

    /// True when operating on the live root rather than a staged tree.
    pub fn is_live_root(&self) -> bool {
        self.global_root == Path::new("/")
    }

    /// Strip the global root from an absolute path so the result is the
    /// path as seen on the device.
    ///
    /// A no-op when the root is "/" or the path lies outside it: paths
    /// are never discarded, and stripping twice equals stripping once.
    pub fn strip_global_root(&self, path: &Path) -> PathBuf {
        if self.is_live_root() {
            return path.to_path_buf();
        }
        match path.strip_prefix(&self.global_root) {
            Ok(rest) => Path::new("/").join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}
