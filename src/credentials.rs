//! Run-scoped SSH key pair management.
//!
//! Each run generates one disposable key pair with `ssh-keygen`, registers
//! the public half with the provider, and removes the provider key plus both
//! local files when the run ends.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::exec::{CommandRunner, ExecError};
use crate::naming::{RunId, run_key_name};
use crate::provider::{KeyResource, Provider};
use crate::workdir::{WorkDir, WorkDirError};

/// Disposable key pair shared by every scan instance of one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanKeyPair {
    /// Run that owns the key.
    pub run: RunId,
    /// Key name used both locally and with the provider.
    pub name: String,
    /// Local private key path.
    pub private_key: Utf8PathBuf,
    /// Local public key path.
    pub public_key: Utf8PathBuf,
    /// Provider-side key resource.
    pub resource: KeyResource,
}

impl ScanKeyPair {
    /// File name of the private key inside the work directory.
    #[must_use]
    pub fn private_file_name(&self) -> &str {
        &self.name
    }

    /// File name of the public key inside the work directory.
    #[must_use]
    pub fn public_file_name(&self) -> String {
        public_file_name(&self.name)
    }
}

/// Errors raised while creating or destroying the run key.
#[derive(Debug, Error)]
pub enum CredentialError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when `ssh-keygen` cannot be run.
    #[error("key generation failed: {0}")]
    Spawn(#[source] ExecError),
    /// Raised when `ssh-keygen` exits with a non-zero status.
    #[error("key generation failed: {program} exited with status {status_text}: {stderr}")]
    Keygen {
        /// Program that failed.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when the generated public key cannot be read.
    #[error("key generation failed: {0}")]
    PublicKey(#[source] WorkDirError),
    /// Raised when the provider rejects the public key.
    #[error("key generation failed: provider rejected key {name}: {source}")]
    Registration {
        /// Key name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when one or more removals fail during cleanup.
    #[error("key cleanup incomplete: {}", failures.join("; "))]
    Cleanup {
        /// One message per failed removal.
        failures: Vec<String>,
    },
}

/// Creates and destroys the run's key pair.
#[derive(Debug)]
pub struct CredentialManager<'a, P, R> {
    provider: &'a P,
    runner: &'a R,
    workdir: &'a WorkDir,
    keygen_bin: &'a str,
}

impl<'a, P, R> CredentialManager<'a, P, R>
where
    P: Provider,
    R: CommandRunner,
{
    /// Creates a manager that stores key files in `workdir`.
    #[must_use]
    pub const fn new(
        provider: &'a P,
        runner: &'a R,
        workdir: &'a WorkDir,
        keygen_bin: &'a str,
    ) -> Self {
        Self {
            provider,
            runner,
            workdir,
            keygen_bin,
        }
    }

    /// Generates the run key locally and registers it with the provider.
    ///
    /// Local key files are removed again when registration fails so that a
    /// failed creation leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when generation or registration fails.
    pub async fn create_run_key(
        &self,
        run: RunId,
    ) -> Result<ScanKeyPair, CredentialError<P::Error>> {
        let name = run_key_name(run);
        let private_key = self.workdir.path_of(&name);
        info!(key = %name, "generating run key");

        let args = keygen_args(&private_key, &name);
        let output = self
            .runner
            .run(self.keygen_bin, &args, None)
            .await
            .map_err(CredentialError::Spawn)?;
        self.workdir
            .record_diagnostics(&format!("{} {name}", self.keygen_bin), &output);
        if !output.is_success() {
            return Err(CredentialError::Keygen {
                program: self.keygen_bin.to_owned(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }

        let public_name = public_file_name(&name);
        let public_key = match self.workdir.read_to_string(&public_name) {
            Ok(contents) => contents,
            Err(err) => {
                self.remove_local_files(&name);
                return Err(CredentialError::PublicKey(err));
            }
        };

        info!(key = %name, "registering run key with provider");
        let resource = match self.provider.create_key(&name, public_key.trim()).await {
            Ok(resource) => resource,
            Err(source) => {
                self.remove_local_files(&name);
                return Err(CredentialError::Registration { name, source });
            }
        };

        Ok(ScanKeyPair {
            run,
            public_key: self.workdir.path_of(&public_name),
            private_key,
            name,
            resource,
        })
    }

    /// Removes the provider key and both local key files.
    ///
    /// Every removal is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Cleanup`] listing every failed removal.
    pub async fn destroy_run_key(
        &self,
        key: &ScanKeyPair,
    ) -> Result<(), CredentialError<P::Error>> {
        let mut failures = Vec::new();

        info!(key = %key.name, key_id = key.resource.id, "destroying run key");
        if let Err(err) = self.provider.destroy_key(key.resource.id).await {
            failures.push(format!("provider key {} ({}): {err}", key.name, key.resource.id));
        }
        for file in [key.private_file_name().to_owned(), key.public_file_name()] {
            if !self.workdir.contains(&file) {
                continue;
            }
            if let Err(err) = self.workdir.remove(&file) {
                failures.push(err.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::Cleanup { failures })
        }
    }

    fn remove_local_files(&self, name: &str) {
        for file in [name.to_owned(), public_file_name(name)] {
            if self.workdir.contains(&file) {
                if let Err(err) = self.workdir.remove(&file) {
                    warn!(error = %err, "failed to remove key file after failed registration");
                }
            }
        }
    }
}

fn public_file_name(name: &str) -> String {
    format!("{name}.pub")
}

fn keygen_args(private_key: &Utf8Path, name: &str) -> Vec<OsString> {
    vec![
        OsString::from("-t"),
        OsString::from("ed25519"),
        OsString::from("-N"),
        OsString::new(),
        OsString::from("-C"),
        OsString::from(name),
        OsString::from("-q"),
        OsString::from("-f"),
        OsString::from(private_key.as_str()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::temp_workdir;
    use crate::test_support::{FakeProvider, ScriptedRunner};
    use rstest::rstest;

    fn seed_key_files(workdir: &WorkDir, name: &str) {
        workdir.write(name, "PRIVATE").expect("write private");
        workdir
            .write(&public_file_name(name), "ssh-ed25519 AAAA sidescan\n")
            .expect("write public");
    }

    #[rstest]
    #[tokio::test]
    async fn create_registers_trimmed_public_key() {
        let (_tmp, workdir) = temp_workdir();
        let provider = FakeProvider::new();
        let runner = ScriptedRunner::new();
        runner.push_success();
        seed_key_files(&workdir, "sidescan-key-10");

        let manager = CredentialManager::new(&provider, &runner, &workdir, "ssh-keygen");
        let key = manager
            .create_run_key(RunId::from_timestamp(10))
            .await
            .expect("key should be created");

        assert_eq!(key.name, "sidescan-key-10");
        assert_eq!(key.private_key, workdir.path_of("sidescan-key-10"));
        let registered = provider.keys();
        assert_eq!(registered.len(), 1);
        assert_eq!(
            provider.registered_public_key(key.resource.id).as_deref(),
            Some("ssh-ed25519 AAAA sidescan")
        );
        let call = runner.invocations().remove(0);
        assert_eq!(call.program, "ssh-keygen");
        assert!(call.command_string().contains("-f"));
    }

    #[rstest]
    #[tokio::test]
    async fn create_fails_when_keygen_fails() {
        let (_tmp, workdir) = temp_workdir();
        let provider = FakeProvider::new();
        let runner = ScriptedRunner::new();
        runner.push_failure(1);

        let manager = CredentialManager::new(&provider, &runner, &workdir, "ssh-keygen");
        let err = manager
            .create_run_key(RunId::from_timestamp(11))
            .await
            .expect_err("keygen failure should surface");
        assert!(matches!(err, CredentialError::Keygen { .. }));
        assert!(provider.keys().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_registration_removes_local_files() {
        let (_tmp, workdir) = temp_workdir();
        let provider = FakeProvider::new();
        provider.fail_key_creation();
        let runner = ScriptedRunner::new();
        runner.push_success();
        seed_key_files(&workdir, "sidescan-key-12");

        let manager = CredentialManager::new(&provider, &runner, &workdir, "ssh-keygen");
        let err = manager
            .create_run_key(RunId::from_timestamp(12))
            .await
            .expect_err("registration failure should surface");

        assert!(matches!(err, CredentialError::Registration { .. }));
        assert!(!workdir.contains("sidescan-key-12"));
        assert!(!workdir.contains("sidescan-key-12.pub"));
    }

    #[rstest]
    #[tokio::test]
    async fn destroy_attempts_every_removal_and_skips_missing_files() {
        let (_tmp, workdir) = temp_workdir();
        let provider = FakeProvider::new();
        let runner = ScriptedRunner::new();
        runner.push_success();
        seed_key_files(&workdir, "sidescan-key-13");
        let manager = CredentialManager::new(&provider, &runner, &workdir, "ssh-keygen");
        let key = manager
            .create_run_key(RunId::from_timestamp(13))
            .await
            .expect("key should be created");

        provider.fail_key_destroy();
        workdir.remove("sidescan-key-13.pub").expect("pre-remove public key");

        let err = manager
            .destroy_run_key(&key)
            .await
            .expect_err("partial cleanup should be reported");
        let CredentialError::Cleanup { failures } = err else {
            panic!("expected Cleanup, got {err:?}");
        };
        assert_eq!(failures.len(), 1, "failures: {failures:?}");
        assert!(failures.iter().all(|failure| failure.starts_with("provider key")));
        assert!(!workdir.contains("sidescan-key-13"), "private key must still be removed");
        assert_eq!(provider.calls().destroy_key, 1);
    }
}
