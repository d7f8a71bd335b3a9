//! Environment collaborator: package installation.

use std::process::Command;

use tracing::{info, warn};

use crate::errors::{Error, Result};

/// Installs one package into the active environment; returns the installer's
/// exit code (0 = success).
pub trait PackageInstaller {
    fn install(&self, package: &str) -> Result<i32>;
}

/// Shells out to `pip install`.
pub struct PipInstaller {
    pub pip: String,
}

impl Default for PipInstaller {
    fn default() -> Self {
        PipInstaller {
            pip: "pip".to_string(),
        }
    }
}

impl PackageInstaller for PipInstaller {
    fn install(&self, package: &str) -> Result<i32> {
        let output = Command::new(&self.pip)
            .arg("install")
            .arg(package)
            .output()
            .map_err(|e| Error::Execution(format!("failed to spawn {}: {e}", self.pip)))?;

        let code = output.status.code().unwrap_or(-1);
        if code == 0 {
            info!(package, "installed");
        } else {
            warn!(
                package,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "install failed"
            );
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pip_binary_is_an_execution_error() {
        let installer = PipInstaller {
            pip: "definitely-not-pip-9c1d".to_string(),
        };
        assert!(matches!(
            installer.install("requests"),
            Err(Error::Execution(_))
        ));
    }
}
