//! The package installer capability and a command-backed implementation.

use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use deploy_protocol::DeploymentResponse;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use url::Url;

/// A storage location packages can be deployed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVolume {
    pub name: String,
    pub path: PathBuf,
    /// Whether packages can be installed onto this volume.
    #[serde(default)]
    pub supports_install: bool,
    /// Whether full-trust packages may run from this volume.
    #[serde(default)]
    pub full_trust: bool,
}

impl PackageVolume {
    pub fn is_eligible(&self) -> bool {
        self.supports_install && self.full_trust
    }
}

/// First volume that accepts full-trust installs.
pub fn select_volume(volumes: &[PackageVolume]) -> Option<&PackageVolume> {
    volumes.iter().find(|volume| volume.is_eligible())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Install,
    Update,
}

impl DeployMode {
    pub fn as_arg(self) -> &'static str {
        match self {
            DeployMode::Install => "install",
            DeployMode::Update => "update",
        }
    }
}

/// What the installer reported. Blank error text means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub error_text: String,
}

impl DeploymentOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            error_text: error_text.into(),
        }
    }

    /// The response this outcome is reported as.
    pub fn response(&self) -> DeploymentResponse {
        DeploymentResponse::from_error_text(&self.error_text)
    }

    pub fn is_success(&self) -> bool {
        self.response() == DeploymentResponse::Success
    }

    pub fn into_result(self) -> Result<()> {
        match self.response() {
            DeploymentResponse::Success => Ok(()),
            DeploymentResponse::Error(text) => Err(ServiceError::InstallerFailed(text)),
        }
    }
}

/// Performs the actual package operations on behalf of the service.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Volumes known to the installer, in preference order.
    fn volumes(&self) -> Vec<PackageVolume>;

    /// Install or update from `source` onto `volume`, reporting percentages on `progress`.
    async fn deploy(
        &self,
        mode: DeployMode,
        source: &Url,
        volume: &PackageVolume,
        progress: mpsc::Sender<u32>,
    ) -> Result<DeploymentOutcome>;

    /// Remove the package identified by `package_full_name`.
    async fn remove(&self, package_full_name: &str) -> Result<DeploymentOutcome>;
}

/// Installer backed by an external program.
///
/// Invoked as `<program> <args..> install|update <url> --volume <path>` or
/// `<program> <args..> remove <package>`. Stdout lines holding a percentage
/// (optionally prefixed with `progress:`) are reported as progress.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: PathBuf,
    args: Vec<String>,
    volumes: Vec<PackageVolume>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, volumes: Vec<PackageVolume>) -> Self {
        Self {
            program: program.into(),
            args,
            volumes,
        }
    }

    async fn run(
        &self,
        operation: Vec<OsString>,
        progress: Option<mpsc::Sender<u32>>,
    ) -> Result<DeploymentOutcome> {
        tracing::debug!(program = %self.program.display(), ?operation, "starting installer");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(&operation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::InstallerFailed("installer stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::InstallerFailed("installer stderr unavailable".into()))?;

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match (parse_progress(&line), &progress) {
                    (Some(percentage), Some(progress)) => {
                        let _ = progress.send(percentage).await;
                    }
                    (Some(_), None) => {}
                    (None, _) => tracing::debug!(line, "installer output"),
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            let mut raw = Vec::new();
            stderr.read_to_end(&mut raw).await.map(|_| raw)
        };

        let (stdout_result, stderr_result) = tokio::join!(read_stdout, read_stderr);
        stdout_result?;
        let stderr_text = String::from_utf8_lossy(&stderr_result?).trim().to_string();
        let status = child.wait().await?;

        if status.success() {
            return Ok(DeploymentOutcome::success());
        }
        let error_text = if stderr_text.is_empty() {
            format!("installer exited with {status}")
        } else {
            stderr_text
        };
        Ok(DeploymentOutcome::failed(error_text))
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    fn volumes(&self) -> Vec<PackageVolume> {
        self.volumes.clone()
    }

    async fn deploy(
        &self,
        mode: DeployMode,
        source: &Url,
        volume: &PackageVolume,
        progress: mpsc::Sender<u32>,
    ) -> Result<DeploymentOutcome> {
        let operation = vec![
            OsString::from(mode.as_arg()),
            OsString::from(source.as_str()),
            OsString::from("--volume"),
            volume.path.clone().into_os_string(),
        ];
        self.run(operation, Some(progress)).await
    }

    async fn remove(&self, package_full_name: &str) -> Result<DeploymentOutcome> {
        let operation = vec![OsString::from("remove"), OsString::from(package_full_name)];
        self.run(operation, None).await
    }
}

/// A percentage in 0..=100, bare or as `progress: N`.
fn parse_progress(line: &str) -> Option<u32> {
    let line = line.trim();
    let value = line.strip_prefix("progress:").unwrap_or(line).trim();
    value.parse::<u32>().ok().filter(|p| *p <= 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(name: &str, supports_install: bool, full_trust: bool) -> PackageVolume {
        PackageVolume {
            name: name.into(),
            path: PathBuf::from(format!("/volumes/{name}")),
            supports_install,
            full_trust,
        }
    }

    fn script(body: &str) -> CommandInstaller {
        CommandInstaller::new(
            "sh",
            vec!["-c".into(), body.into(), "installer".into()],
            vec![volume("main", true, true)],
        )
    }

    fn source() -> Url {
        Url::parse("https://updates.example.com/App.msixbundle").unwrap()
    }

    #[test]
    fn picks_first_eligible_volume() {
        let volumes = vec![
            volume("removable", true, false),
            volume("readonly", false, true),
            volume("main", true, true),
            volume("second", true, true),
        ];
        assert_eq!(select_volume(&volumes).unwrap().name, "main");
        assert!(select_volume(&volumes[..2]).is_none());
    }

    #[test]
    fn progress_lines() {
        assert_eq!(parse_progress("45"), Some(45));
        assert_eq!(parse_progress("  progress: 100 "), Some(100));
        assert_eq!(parse_progress("101"), None);
        assert_eq!(parse_progress("-1"), None);
        assert_eq!(parse_progress("copying files"), None);
    }

    #[test]
    fn blank_error_text_is_reported_as_success() {
        let blank = DeploymentOutcome::failed("  \n");
        assert!(blank.is_success());
        assert_eq!(blank.response(), DeploymentResponse::Success);
        assert!(blank.into_result().is_ok());

        let failed = DeploymentOutcome::failed("disk full");
        assert_eq!(failed.response(), DeploymentResponse::Error("disk full".into()));
        assert!(matches!(
            failed.into_result(),
            Err(ServiceError::InstallerFailed(text)) if text == "disk full"
        ));
    }

    #[tokio::test]
    async fn command_reports_progress_and_success() {
        let installer = script(
            r#"[ "$1" = update ] && [ "$3" = --volume ] && [ "$4" = /volumes/main ] || exit 7
               echo 10; echo "progress: 45"; echo unpacking; echo 100"#,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = installer
            .deploy(DeployMode::Update, &source(), &installer.volumes()[0], tx)
            .await
            .unwrap();

        assert!(outcome.is_success());
        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p);
        }
        assert_eq!(seen, vec![10, 45, 100]);
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let installer = script("echo 'disk full' >&2; exit 1");
        let (tx, _rx) = mpsc::channel(8);
        let outcome = installer
            .deploy(DeployMode::Install, &source(), &installer.volumes()[0], tx)
            .await
            .unwrap();
        assert_eq!(outcome, DeploymentOutcome::failed("disk full"));
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let installer = script(r#"[ "$1" = remove ] && [ "$2" = App_1.0.0.0 ] && exit 3; exit 0"#);
        let outcome = installer.remove("App_1.0.0.0").await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.error_text.contains("exit status: 3"), "{}", outcome.error_text);
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let installer = CommandInstaller::new("/nonexistent/installer", Vec::new(), Vec::new());
        assert!(matches!(
            installer.remove("App").await,
            Err(ServiceError::Io(_))
        ));
    }
}
