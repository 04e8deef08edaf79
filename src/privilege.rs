//! Host privilege detection.
//!
//! The classifier only ever asks one question, "does this process hold
//! elevated privileges?", through [`PrivilegeProbe`]. Each host platform
//! answers it in its own way; [`host_probe`] picks the implementation at
//! startup.

use std::sync::Arc;

/// Reports whether the current process runs with elevated privileges.
pub trait PrivilegeProbe: Send + Sync {
    /// Returns `true` when the process is root/administrator.
    fn is_privileged(&self) -> bool;
}

/// Superuser check for Unix-like hosts (effective UID 0).
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UnixPrivilegeProbe;

#[cfg(unix)]
impl PrivilegeProbe for UnixPrivilegeProbe {
    fn is_privileged(&self) -> bool {
        nix::unistd::Uid::effective().is_root()
    }
}

/// Administrator check for Windows hosts.
///
/// `net session` only succeeds from an elevated token. The answer is computed
/// once and cached.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct WindowsPrivilegeProbe {
    cached: std::sync::OnceLock<bool>,
}

#[cfg(windows)]
impl PrivilegeProbe for WindowsPrivilegeProbe {
    fn is_privileged(&self) -> bool {
        *self.cached.get_or_init(|| {
            std::process::Command::new("net")
                .arg("session")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .is_ok_and(|status| status.success())
        })
    }
}

/// Probe with a fixed answer, for tests and unsupported hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedPrivilege(pub bool);

impl PrivilegeProbe for FixedPrivilege {
    fn is_privileged(&self) -> bool {
        self.0
    }
}

/// Selects the probe for the current host platform.
///
/// Platforms without a dedicated probe are treated as unprivileged so that
/// privilege-dependent scripts are skipped rather than attempted.
#[must_use]
pub fn host_probe() -> Arc<dyn PrivilegeProbe> {
    #[cfg(unix)]
    {
        Arc::new(UnixPrivilegeProbe)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsPrivilegeProbe::default())
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(FixedPrivilege(false))
    }
}
