//! Pluggable boundaries for the parts of the system this crate treats as
//! external collaborators: the vulnerability scanner process, the sandbox
//! the scanner and emulator run in, and plugin-filename-to-OID resolution.
//!
//! Grounded on `execute_scan`/`create_openvas_cmd` and `get_oids_for_vts` in
//! `original_source/vts-qa-recorder/vts-recording/recorder.py`, and
//! `oid_filename_mapper.py`. Those functions shell out to a real `openvas`
//! binary and grep VT source files respectively; here they're behind traits
//! so the rest of the system (readiness probing, sanitize/compare, the
//! recorder's record loop) is testable without either.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("failed to launch scanner process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("scanner process exited without a usable status")]
    NoStatus,
    #[error("sandbox operation failed: {0}")]
    Sandbox(String),
    #[error("oid resolution failed for {0}: {1}")]
    OidResolution(PathBuf, String),
}

/// One VT's worth of scan result, as far as the runner cares: whether the
/// process completed and what it printed.
#[derive(Clone, Debug)]
pub struct ScanOutcome {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Launches a vulnerability scan against a target and reports its output.
/// Implemented by a real scanner integration out of tree; `LocalProcessScanner`
/// here just execs a configurable command, enough for tests and for a
/// scanner already installed on PATH.
#[async_trait]
pub trait ScannerDriver: Send + Sync {
    async fn scan(
        &self,
        target_host: &str,
        target_ports: &[u16],
        oids: &[String],
    ) -> Result<ScanOutcome, DriverError>;
}

/// Starts/stops the sandbox the scanner (and, on replay, the emulator) run
/// inside. `LocalSandbox` is a no-op: the default deployment already runs
/// everything in the current process namespace.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn start(&self) -> Result<(), DriverError>;
    async fn stop(&self) -> Result<(), DriverError>;

    /// Extra host strings the emulator is reachable at from inside this
    /// sandbox (e.g. a container's hostname and its network alias), besides
    /// the bind host the caller already knows. Used to sanitize scan output
    /// before comparing it to a recorded baseline. `LocalSandbox` has none.
    fn network_aliases(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolves VT plugin filenames to their `script_oid(...)` identifiers.
#[async_trait]
pub trait OidResolver: Send + Sync {
    async fn resolve(&self, vt_filenames: &[PathBuf]) -> Result<HashMap<PathBuf, String>, DriverError>;
}

/// Execs `openvas` (or a compatible CLI given via `command`) the way
/// `create_openvas_cmd`/`execute_scan` do, passing the target and OIDs as
/// arguments and collecting output.
pub struct LocalProcessScanner {
    pub command: PathBuf,
    pub extra_args: Vec<String>,
}

impl LocalProcessScanner {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            extra_args: Vec::new(),
        }
    }
}

#[async_trait]
impl ScannerDriver for LocalProcessScanner {
    async fn scan(
        &self,
        target_host: &str,
        target_ports: &[u16],
        oids: &[String],
    ) -> Result<ScanOutcome, DriverError> {
        let ports = target_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("--target").arg(target_host);
        cmd.arg("--ports").arg(ports);
        for oid in oids {
            cmd.arg("--oid").arg(oid);
        }
        cmd.args(&self.extra_args);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let output = cmd.output().await.map_err(DriverError::Spawn)?;
        Ok(ScanOutcome {
            status: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

/// A sandbox that does nothing: the scanner and emulator already run as
/// plain child processes of this one.
#[derive(Default)]
pub struct LocalSandbox;

#[async_trait]
impl SandboxRuntime for LocalSandbox {
    async fn start(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Resolves OIDs by grepping each VT source file for `script_oid("...")`,
/// mirroring `oid_filename_mapper.py`/`get_oids_for_vts`.
#[derive(Default)]
pub struct GrepOidResolver;

#[async_trait]
impl OidResolver for GrepOidResolver {
    async fn resolve(&self, vt_filenames: &[PathBuf]) -> Result<HashMap<PathBuf, String>, DriverError> {
        let re = regex::Regex::new(r#"script_oid\(\s*"([0-9.]+)"\s*\)"#).expect("static regex");
        let mut out = HashMap::new();
        for path in vt_filenames {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| DriverError::OidResolution(path.clone(), e.to_string()))?;
            let oid = re
                .captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    DriverError::OidResolution(path.clone(), "no script_oid(...) found".to_string())
                })?;
            out.insert(path.clone(), oid);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grep_resolver_extracts_oid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vt.nasl");
        tokio::fs::write(&path, "script_oid(\"1.3.6.1.4.1.25623.1.0.12345\");\n")
            .await
            .unwrap();
        let resolver = GrepOidResolver;
        let resolved = resolver.resolve(&[path.clone()]).await.unwrap();
        assert_eq!(
            resolved.get(&path).unwrap(),
            "1.3.6.1.4.1.25623.1.0.12345"
        );
    }

    #[tokio::test]
    async fn grep_resolver_errors_without_oid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vt.nasl");
        tokio::fs::write(&path, "// nothing here\n").await.unwrap();
        let resolver = GrepOidResolver;
        assert!(resolver.resolve(&[path]).await.is_err());
    }
}
