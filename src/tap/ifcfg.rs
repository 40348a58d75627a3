//! Child-process invocation of the interface configuration tool.
//!
//! Endpoint create/configure/destroy goes through the platform `ifconfig`
//! binary (path configurable) rather than ioctls, so an alternate tool can be
//! substituted without code changes.

use std::process::Command;

use crate::error::TapError;

/// Runs the configured interface tool with the given arguments and requires
/// a zero exit status.
#[derive(Debug, Clone)]
pub struct IfconfigRunner {
    command: String,
}

impl IfconfigRunner {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }

    pub fn run(&self, args: &[&str]) -> Result<(), TapError> {
        tracing::debug!("running: {} {}", self.command, args.join(" "));
        let status = Command::new(&self.command)
            .args(args)
            .status()
            .map_err(|e| TapError::Ifconfig {
                command: self.command.clone(),
                detail: e.to_string(),
            })?;
        if !status.success() {
            return Err(TapError::Ifconfig {
                command: format!("{} {}", self.command, args.join(" ")),
                detail: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

/// Records endpoint creations and destroys them in reverse order on drop.
///
/// `open` runs many interacting steps after creating the endpoints; if any of
/// them fails, dropping this guard removes the devices before the error
/// surfaces. On success the recorded names are released to the tap interface,
/// which destroys them in its own teardown.
pub struct DeviceGuard {
    runner: IfconfigRunner,
    created: Vec<String>,
}

impl DeviceGuard {
    pub fn new(runner: IfconfigRunner) -> Self {
        Self {
            runner,
            created: Vec::new(),
        }
    }

    /// Create `name` and record it for cleanup.
    pub fn create(&mut self, name: &str) -> Result<(), TapError> {
        self.runner.run(&[name, "create"])?;
        self.created.push(name.to_string());
        Ok(())
    }

    /// Disarm the guard, handing ownership of the created devices back.
    pub fn release(mut self) -> Vec<String> {
        std::mem::take(&mut self.created)
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        for name in self.created.iter().rev() {
            destroy_device(&self.runner, name);
        }
    }
}

/// Destroy one endpoint, logging instead of failing: teardown paths must not
/// raise.
pub fn destroy_device(runner: &IfconfigRunner, name: &str) {
    if let Err(e) = runner.run(&[name, "destroy"]) {
        tracing::warn!("could not destroy {name}: {e}");
    }
}
