//! Remote scanner installation and execution over SSH.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::credentials::ScanKeyPair;
use crate::exec::{CommandOutput, CommandRunner, ExecError, RemoteShell, RemoteTarget, SshSettings};
use crate::provision::ScanInstance;
use crate::workdir::{WorkDir, WorkDirError};

/// Default location of the scanner's install script.
pub const DEFAULT_INSTALLER_URL: &str =
    "https://raw.githubusercontent.com/anchore/grype/main/install.sh";
/// Default remote scanner invocation.
pub const DEFAULT_SCANNER_COMMAND: &str = "./bin/grype / -o json";

/// Errors raised while fetching the installer script.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InstallerError {
    /// The request could not be sent or the body could not be read.
    #[error("failed to fetch installer from {url}: {message}")]
    Fetch {
        /// Installer URL.
        url: String,
        /// Transport error description.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("installer request to {url} returned HTTP {status}")]
    Status {
        /// Installer URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
}

/// Future returned by [`InstallerSource::fetch`].
pub type InstallerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, InstallerError>> + Send + 'a>>;

/// Source of the scanner's install script.
pub trait InstallerSource: Send + Sync {
    /// Fetches the install script text.
    fn fetch(&self) -> InstallerFuture<'_>;
}

/// Fetches the install script over HTTPS.
#[derive(Clone, Debug)]
pub struct HttpInstaller {
    client: reqwest::Client,
    url: String,
}

impl HttpInstaller {
    /// Creates an installer source for `url`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl InstallerSource for HttpInstaller {
    fn fetch(&self) -> InstallerFuture<'_> {
        Box::pin(async move {
            let fetch_error = |err: reqwest::Error| InstallerError::Fetch {
                url: self.url.clone(),
                message: err.to_string(),
            };
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(fetch_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(InstallerError::Status {
                    url: self.url.clone(),
                    status: status.as_u16(),
                });
            }
            response.text().await.map_err(fetch_error)
        })
    }
}

/// Result artifact written for one source instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawScanResult {
    /// Source instance the result belongs to.
    pub source_name: String,
    /// File name of the artifact inside the work directory.
    pub file_name: String,
}

/// Retry and command settings for remote scans.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanSettings {
    /// SSH client settings.
    pub ssh: SshSettings,
    /// Number of reachability probes before giving up.
    pub attempts: u32,
    /// Delay between reachability probes.
    pub retry_delay: Duration,
    /// Scanner command executed on the instance.
    pub scanner_command: String,
}

/// Remote execution failures for one scan instance.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The instance has no public address.
    #[error("{instance} has no public address")]
    NoAddress {
        /// Instance name.
        instance: String,
    },
    /// The remote shell never accepted a connection.
    #[error("{instance} unreachable over ssh after {attempts} attempts: {last_error}")]
    Unreachable {
        /// Instance name.
        instance: String,
        /// Probes made.
        attempts: u32,
        /// Last probe failure.
        last_error: String,
    },
    /// The installer script could not be fetched.
    #[error("failed to fetch scanner installer: {0}")]
    Installer(#[from] InstallerError),
    /// The installer exited with a non-zero status.
    #[error("scanner install on {instance} exited with status {status}")]
    Install {
        /// Instance name.
        instance: String,
        /// Exit status text.
        status: String,
    },
    /// The scanner exited with a non-zero status.
    #[error("scanner on {instance} exited with status {status}")]
    Scanner {
        /// Instance name.
        instance: String,
        /// Exit status text.
        status: String,
    },
    /// `ssh` could not be run.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// A local artifact could not be written.
    #[error(transparent)]
    Io(#[from] WorkDirError),
}

/// Installs and runs the scanner on scan instances.
#[derive(Debug)]
pub struct RemoteScanRunner<'a, R: CommandRunner, I> {
    shell: RemoteShell<'a, R>,
    installer: &'a I,
    workdir: &'a WorkDir,
    settings: &'a ScanSettings,
}

impl<'a, R, I> RemoteScanRunner<'a, R, I>
where
    R: CommandRunner,
    I: InstallerSource,
{
    /// Creates a scan runner.
    #[must_use]
    pub const fn new(
        runner: &'a R,
        installer: &'a I,
        workdir: &'a WorkDir,
        settings: &'a ScanSettings,
    ) -> Self {
        Self {
            shell: RemoteShell::new(runner, &settings.ssh),
            installer,
            workdir,
            settings,
        }
    }

    /// Installs the scanner on `instance` and writes its JSON output to
    /// `<source>-result.json`.
    ///
    /// Installer and scanner stderr go to the diagnostic log. The local copy
    /// of the install script is removed whether or not installation works.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] when the instance is unreachable, the installer
    /// cannot be fetched, or a remote step exits non-zero.
    pub async fn scan_instance(
        &self,
        instance: &ScanInstance,
        key: &ScanKeyPair,
    ) -> Result<RawScanResult, ScanError> {
        let address = instance.public_ip.ok_or_else(|| ScanError::NoAddress {
            instance: instance.name.clone(),
        })?;
        let target = RemoteTarget {
            address,
            identity: &key.private_key,
        };
        let source = instance.lineage.source_name.as_str();

        self.wait_until_reachable(instance, target).await?;

        info!(instance = %instance.name, "installing scanner");
        let script = self.installer.fetch().await?;
        let script_name = format!("{source}-install.sh");
        self.workdir.write(&script_name, &script)?;
        let installed = self.install(instance, target, &script_name).await;
        if let Err(err) = self.workdir.remove(&script_name) {
            warn!(error = %err, "failed to remove local installer copy");
        }
        installed?;

        let result_name = instance.lineage.result_file_name();
        self.workdir.write(&result_name, "")?;
        info!(instance = %instance.name, result = %result_name, "scanning");
        let output = self
            .shell
            .exec(target, &self.settings.scanner_command, None)
            .await?;
        self.workdir.append(&result_name, output.stdout.as_bytes())?;
        self.workdir.record_diagnostics(
            &format!("scanner {}", instance.name),
            &CommandOutput {
                stdout: String::new(),
                ..output.clone()
            },
        );
        if !output.is_success() {
            return Err(ScanError::Scanner {
                instance: instance.name.clone(),
                status: output.status_text(),
            });
        }

        Ok(RawScanResult {
            source_name: source.to_owned(),
            file_name: result_name,
        })
    }

    async fn wait_until_reachable(
        &self,
        instance: &ScanInstance,
        target: RemoteTarget<'_>,
    ) -> Result<(), ScanError> {
        let attempts = self.settings.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.shell.exec(target, "true", None).await {
                Ok(output) if output.is_success() => return Ok(()),
                Ok(output) => {
                    last_error = format!(
                        "ssh exited with status {}: {}",
                        output.status_text(),
                        output.stderr.trim()
                    );
                }
                Err(err) => last_error = err.to_string(),
            }
            debug!(
                instance = %instance.name,
                attempt,
                attempts,
                error = %last_error,
                "ssh not ready"
            );
            if attempt < attempts {
                sleep(self.settings.retry_delay).await;
            }
        }
        Err(ScanError::Unreachable {
            instance: instance.name.clone(),
            attempts,
            last_error,
        })
    }

    async fn install(
        &self,
        instance: &ScanInstance,
        target: RemoteTarget<'_>,
        script_name: &str,
    ) -> Result<(), ScanError> {
        let script = self.workdir.read(script_name)?;
        let output = self.shell.exec(target, "bash -s", Some(&script)).await?;
        self.workdir
            .record_diagnostics(&format!("installer {}", instance.name), &output);
        if output.is_success() {
            Ok(())
        } else {
            Err(ScanError::Install {
                instance: instance.name.clone(),
                status: output.status_text(),
            })
        }
    }
}
