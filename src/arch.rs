// src/arch.rs

//! Debian-style architecture naming
//!
//! Generated units and wrappers embed the package architecture in the
//! `SNAP_ARCH` environment value using the Debian convention rather than
//! the kernel one.

/// Architecture string for the build target, Debian-style.
pub fn debian_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        "x86_64" => "amd64",
        "arm" => "armhf",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64el",
        other => other,
    }
}
