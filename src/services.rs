// src/services.rs

//! Service install and removal orchestration
//!
//! Installation renders every unit before writing anything, so a
//! validation failure leaves no partial state. Removal runs a bounded
//! stop escalation per unit: a graceful stop request, a polled wait up
//! to the app's stop timeout, then TERM, a fixed grace period, and KILL
//! only if the unit is still active. Escalation is reported through the
//! progress channel, never raised as an error, since the unit does end
//! up stopped.

use crate::dirs::Dirs;
use crate::error::{Error, Result};
use crate::manifest::PackageManifest;
use crate::progress::ProgressReporter;
use crate::systemd::{KillSignal, Systemd, SystemdError};
use crate::wrapper;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a unit gets to honor TERM before KILL follows.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Interval between active-state checks while waiting for a graceful stop.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Orchestrates unit installation and removal for a package.
///
/// The init system's unit registry is a single global namespace, so
/// callers must serialize operations touching the same unit name. In
/// practice, hold a per-package lock for the duration of add/remove.
/// Independent packages may be processed concurrently.
pub struct ServiceManager<'a> {
    dirs: &'a Dirs,
    systemd: &'a dyn Systemd,
    kill_grace: Duration,
    poll_interval: Duration,
}

impl<'a> ServiceManager<'a> {
    pub fn new(dirs: &'a Dirs, systemd: &'a dyn Systemd) -> Self {
        Self {
            dirs,
            systemd,
            kill_grace: KILL_GRACE_PERIOD,
            poll_interval: STOP_POLL_INTERVAL,
        }
    }

    /// Shorten the TERM-to-KILL window (tests).
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Shorten the graceful-wait poll interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Render and install units for every daemon app in the manifest.
    ///
    /// All entries are validated and rendered up front; only then are
    /// unit files written. Unless `build_only`, each entry's units are
    /// reloaded, enabled and started, socket unit first so it exists
    /// before the service that depends on it. Fails fast on the first
    /// error.
    pub fn add_services(
        &self,
        manifest: &PackageManifest,
        base_dir: &Path,
        build_only: bool,
    ) -> Result<()> {
        struct Rendered {
            service_unit: String,
            service_text: String,
            socket: Option<(String, String)>,
        }

        let mut rendered = Vec::new();
        for app in manifest.apps.iter().filter(|app| app.is_service()) {
            let profile = manifest.security_profile(app);
            let service_text =
                wrapper::generate_service_unit(app, base_dir, &profile, manifest, self.dirs)?;
            let socket = if app.socket {
                let socket_text =
                    wrapper::generate_socket_unit(app, base_dir, &profile, manifest, self.dirs)?;
                Some((manifest.socket_unit_name(app), socket_text))
            } else {
                None
            };
            rendered.push(Rendered {
                service_unit: manifest.service_unit_name(app),
                service_text,
                socket,
            });
        }

        fs::create_dir_all(&self.dirs.unit_dir)?;
        for entry in &rendered {
            fs::write(self.dirs.unit_dir.join(&entry.service_unit), &entry.service_text)?;
            if let Some((socket_unit, socket_text)) = &entry.socket {
                fs::write(self.dirs.unit_dir.join(socket_unit), socket_text)?;
            }

            if build_only {
                debug!("Wrote unit '{}' (build only)", entry.service_unit);
                continue;
            }

            self.systemd.daemon_reload()?;
            if let Some((socket_unit, _)) = &entry.socket {
                self.systemd.enable(socket_unit)?;
                self.systemd.start(socket_unit)?;
            }
            self.systemd.enable(&entry.service_unit)?;
            self.systemd.start(&entry.service_unit)?;
            info!("Started service unit '{}'", entry.service_unit);
        }
        Ok(())
    }

    /// Write one executable launcher wrapper per command-line app.
    /// Purely file writes, no init-system interaction.
    pub fn add_binaries(&self, manifest: &PackageManifest, base_dir: &Path) -> Result<()> {
        fs::create_dir_all(&self.dirs.bin_dir)?;
        for app in manifest.apps.iter().filter(|app| !app.is_service()) {
            let profile = manifest.security_profile(app);
            let script =
                wrapper::generate_binary_wrapper(app, base_dir, &profile, manifest, self.dirs);
            let path = self.dirs.bin_dir.join(manifest.binary_name(app));
            fs::write(&path, script)?;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
            debug!("Wrote binary wrapper '{}'", path.display());
        }
        Ok(())
    }

    /// Stop, disable and delete the units for every daemon app.
    ///
    /// A failure on one unit is reported and does not block the
    /// remaining units; the first error is returned once the whole
    /// teardown pass completes.
    pub fn remove_services(
        &self,
        manifest: &PackageManifest,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let mut first_err: Option<Error> = None;
        let mut record = |err: Error| {
            warn!("{}", err);
            first_err.get_or_insert(err);
        };

        for app in manifest.apps.iter().filter(|app| app.is_service()) {
            let unit = manifest.service_unit_name(app);
            if let Err(err) = self.stop_unit(&unit, app.stop_timeout(), progress) {
                record(err.into());
            }
            if let Err(err) = self.systemd.disable(&unit) {
                record(err.into());
            }
            if let Err(err) = fs::remove_file(self.dirs.unit_dir.join(&unit)) {
                record(err.into());
            }

            if app.socket {
                let socket_unit = manifest.socket_unit_name(app);
                if let Err(err) = self.systemd.disable(&socket_unit) {
                    record(err.into());
                }
                if let Err(err) = fs::remove_file(self.dirs.unit_dir.join(&socket_unit)) {
                    record(err.into());
                }
            }
            info!("Removed service unit '{}'", unit);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Graceful-stop state machine for one unit.
    ///
    /// Requests a stop, then polls the active state until the unit is
    /// down or `timeout` elapses. On timeout: notify once, TERM, wait
    /// the grace period, and KILL only if the unit is still active.
    fn stop_unit(
        &self,
        unit: &str,
        timeout: Duration,
        progress: &dyn ProgressReporter,
    ) -> std::result::Result<(), SystemdError> {
        self.systemd.stop(unit)?;

        let deadline = Instant::now() + timeout;
        loop {
            if !self.systemd.is_active(unit)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        progress.notify(&format!("{unit} refused to stop, killing."));
        self.systemd.kill(unit, KillSignal::Term)?;
        thread::sleep(self.kill_grace);
        if self.systemd.is_active(unit)? {
            self.systemd.kill(unit, KillSignal::Kill)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AppSpec, DaemonType};
    use std::cell::RefCell;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// How a fake unit responds to the stop protocol.
    #[derive(Clone, Copy, PartialEq)]
    enum StopBehavior {
        /// Inactive by the first poll after stop
        StopsCleanly,
        /// Ignores stop, dies once a TERM has been delivered
        DiesOnTerm,
        /// Ignores everything short of KILL
        Stuck,
    }

    struct FakeSystemd {
        calls: RefCell<Vec<String>>,
        behavior: StopBehavior,
    }

    impl FakeSystemd {
        fn new(behavior: StopBehavior) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                behavior,
            }
        }

        fn record(&self, call: String) -> std::result::Result<(), SystemdError> {
            self.calls.borrow_mut().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Systemd for FakeSystemd {
        fn daemon_reload(&self) -> std::result::Result<(), SystemdError> {
            self.record("daemon-reload".to_string())
        }

        fn enable(&self, unit: &str) -> std::result::Result<(), SystemdError> {
            self.record(format!("enable {unit}"))
        }

        fn disable(&self, unit: &str) -> std::result::Result<(), SystemdError> {
            self.record(format!("disable {unit}"))
        }

        fn start(&self, unit: &str) -> std::result::Result<(), SystemdError> {
            self.record(format!("start {unit}"))
        }

        fn stop(&self, unit: &str) -> std::result::Result<(), SystemdError> {
            self.record(format!("stop {unit}"))
        }

        fn kill(&self, unit: &str, signal: KillSignal) -> std::result::Result<(), SystemdError> {
            self.record(format!("kill {unit} {}", signal.as_str()))
        }

        fn is_active(&self, unit: &str) -> std::result::Result<bool, SystemdError> {
            let mut calls = self.calls.borrow_mut();
            let term_delivered = calls.iter().any(|call| call == &format!("kill {unit} TERM"));
            calls.push(format!("is-active {unit}"));
            Ok(match self.behavior {
                StopBehavior::StopsCleanly => false,
                StopBehavior::DiesOnTerm => !term_delivered,
                StopBehavior::Stuck => true,
            })
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        notified: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn notify(&self, message: &str) {
            self.notified.lock().unwrap().push(message.to_string());
        }
    }

    fn webserver_manifest(socket: bool) -> PackageManifest {
        PackageManifest {
            name: "xkcd-webserver".to_string(),
            version: "0.3.4".to_string(),
            apps: vec![AppSpec {
                name: "xkcd-webserver".to_string(),
                command: "bin/foo start".to_string(),
                description: "A fun webserver".to_string(),
                daemon: Some(DaemonType::Simple),
                socket,
                listen_stream: socket.then(|| "/var/run/ws.sock".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn fast_manager<'a>(dirs: &'a Dirs, systemd: &'a dyn Systemd) -> ServiceManager<'a> {
        ServiceManager::new(dirs, systemd)
            .with_poll_interval(Duration::from_millis(1))
            .with_kill_grace(Duration::from_millis(1))
    }

    #[test]
    fn test_add_services_writes_and_activates() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = ServiceManager::new(&dirs, &systemd);
        let manifest = webserver_manifest(false);
        let base_dir = dirs.app_dir.join("xkcd-webserver/0.3.4");

        manager.add_services(&manifest, &base_dir, false).unwrap();

        let unit_path = dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.service");
        let content = fs::read_to_string(&unit_path).unwrap();
        assert!(content.contains("ExecStart=/usr/bin/ubuntu-core-launcher"));
        assert!(!content.contains(temp.path().to_str().unwrap()));

        assert_eq!(
            systemd.calls(),
            vec![
                "daemon-reload".to_string(),
                "enable xkcd-webserver_xkcd-webserver_0.3.4.service".to_string(),
                "start xkcd-webserver_xkcd-webserver_0.3.4.service".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_services_starts_socket_before_service() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = ServiceManager::new(&dirs, &systemd);
        let manifest = webserver_manifest(true);
        let base_dir = dirs.app_dir.join("xkcd-webserver/0.3.4");

        manager.add_services(&manifest, &base_dir, false).unwrap();

        assert!(dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.socket").exists());
        assert_eq!(
            systemd.calls(),
            vec![
                "daemon-reload".to_string(),
                "enable xkcd-webserver_xkcd-webserver_0.3.4.socket".to_string(),
                "start xkcd-webserver_xkcd-webserver_0.3.4.socket".to_string(),
                "enable xkcd-webserver_xkcd-webserver_0.3.4.service".to_string(),
                "start xkcd-webserver_xkcd-webserver_0.3.4.service".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_services_build_only_skips_activation() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = ServiceManager::new(&dirs, &systemd);
        let manifest = webserver_manifest(false);
        let base_dir = dirs.app_dir.join("xkcd-webserver/0.3.4");

        manager.add_services(&manifest, &base_dir, true).unwrap();

        assert!(dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.service").exists());
        assert!(systemd.calls().is_empty());
    }

    #[test]
    fn test_add_services_validates_before_writing() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = ServiceManager::new(&dirs, &systemd);

        let mut manifest = webserver_manifest(false);
        manifest.apps.push(AppSpec {
            name: "evil".to_string(),
            command: "bin/evil".to_string(),
            description: "fine first line\nExecStartPre=/bin/evil".to_string(),
            daemon: Some(DaemonType::Simple),
            ..Default::default()
        });
        let base_dir = dirs.app_dir.join("xkcd-webserver/0.3.4");

        let result = manager.add_services(&manifest, &base_dir, false);
        assert!(matches!(result, Err(Error::Validation(_))));

        // validate-all-then-write: not even the valid entry was written
        assert!(!dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.service").exists());
        assert!(systemd.calls().is_empty());
    }

    #[test]
    fn test_add_binaries_writes_executable_wrapper() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = ServiceManager::new(&dirs, &systemd);
        let manifest = PackageManifest {
            name: "hello-snap".to_string(),
            version: "1.10".to_string(),
            apps: vec![AppSpec {
                name: "hello".to_string(),
                command: "bin/hello".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let base_dir = dirs.app_dir.join("hello-snap/1.10");

        manager.add_binaries(&manifest, &base_dir).unwrap();

        let wrapper_path = dirs.bin_dir.join("hello-snap.hello");
        let script = fs::read_to_string(&wrapper_path).unwrap();
        assert!(script.ends_with(
            "ubuntu-core-launcher hello-snap.hello hello-snap_hello_1.10 /snaps/hello-snap/1.10/bin/hello \"$@\"\n"
        ));
        let mode = fs::metadata(&wrapper_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(systemd.calls().is_empty());
    }

    #[test]
    fn test_graceful_stop_sends_no_kills() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = fast_manager(&dirs, &systemd);
        let progress = RecordingProgress::default();

        manager
            .stop_unit("wat_wat_42.service", Duration::from_millis(50), &progress)
            .unwrap();

        let calls = systemd.calls();
        assert_eq!(calls[0], "stop wat_wat_42.service");
        assert!(calls.iter().all(|call| !call.starts_with("kill")));
        assert!(progress.notified.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stuck_unit_is_escalated_term_then_kill() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::Stuck);
        let manager = fast_manager(&dirs, &systemd);
        let progress = RecordingProgress::default();

        manager
            .stop_unit("wat_wat_42.service", Duration::from_millis(10), &progress)
            .unwrap();

        let calls = systemd.calls();
        let kills: Vec<&String> = calls.iter().filter(|call| call.starts_with("kill")).collect();
        assert_eq!(
            kills,
            vec!["kill wat_wat_42.service TERM", "kill wat_wat_42.service KILL"]
        );
        assert_eq!(
            *progress.notified.lock().unwrap(),
            vec!["wat_wat_42.service refused to stop, killing.".to_string()]
        );
    }

    #[test]
    fn test_term_is_enough_when_unit_dies_in_grace_period() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::DiesOnTerm);
        let manager = fast_manager(&dirs, &systemd);
        let progress = RecordingProgress::default();

        manager
            .stop_unit("wat_wat_42.service", Duration::from_millis(5), &progress)
            .unwrap();

        let calls = systemd.calls();
        assert!(calls.contains(&"kill wat_wat_42.service TERM".to_string()));
        assert!(!calls.iter().any(|call| call.ends_with("KILL")));
        assert_eq!(progress.notified.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_services_deletes_units() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = fast_manager(&dirs, &systemd);
        let manifest = webserver_manifest(true);
        let base_dir = dirs.app_dir.join("xkcd-webserver/0.3.4");
        let progress = RecordingProgress::default();

        manager.add_services(&manifest, &base_dir, true).unwrap();
        manager.remove_services(&manifest, &progress).unwrap();

        assert!(!dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.service").exists());
        assert!(!dirs.unit_dir.join("xkcd-webserver_xkcd-webserver_0.3.4.socket").exists());

        let calls = systemd.calls();
        assert!(calls.contains(&"stop xkcd-webserver_xkcd-webserver_0.3.4.service".to_string()));
        assert!(calls.contains(&"disable xkcd-webserver_xkcd-webserver_0.3.4.service".to_string()));
        assert!(calls.contains(&"disable xkcd-webserver_xkcd-webserver_0.3.4.socket".to_string()));
        assert!(progress.notified.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_services_continues_past_missing_unit_file() {
        let temp = TempDir::new().unwrap();
        let dirs = Dirs::under(temp.path());
        let systemd = FakeSystemd::new(StopBehavior::StopsCleanly);
        let manager = fast_manager(&dirs, &systemd);
        let progress = RecordingProgress::default();

        let manifest = PackageManifest {
            name: "pkg".to_string(),
            version: "1.0".to_string(),
            apps: vec![
                AppSpec {
                    name: "gone".to_string(),
                    daemon: Some(DaemonType::Simple),
                    ..Default::default()
                },
                AppSpec {
                    name: "present".to_string(),
                    command: "bin/present".to_string(),
                    daemon: Some(DaemonType::Simple),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        // only the second unit's file exists on disk
        fs::create_dir_all(&dirs.unit_dir).unwrap();
        fs::write(dirs.unit_dir.join("pkg_present_1.0.service"), "[Unit]\n").unwrap();

        let result = manager.remove_services(&manifest, &progress);
        assert!(matches!(result, Err(Error::Io(_))));

        // the second unit was still processed
        assert!(!dirs.unit_dir.join("pkg_present_1.0.service").exists());
        let calls = systemd.calls();
        assert!(calls.contains(&"disable pkg_present_1.0.service".to_string()));
    }
}
