//! Provider abstraction for the instance, snapshot, key, and action APIs.
//!
//! The orchestrator never talks to a cloud SDK directly. Every component is
//! handed a [`Provider`] so tests can substitute doubles that simulate
//! provider latency, failed actions, and listing lag.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider assigned identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Region slug (for example `nyc3`).
    pub region: String,
    /// Size slug (for example `s-2vcpu-4gb`).
    pub size: String,
    /// Disk size in gigabytes.
    pub disk_gb: u64,
    /// Lifecycle status reported by the provider (`new`, `active`, ...).
    pub status: String,
    /// Public IPv4 address, present once the provider has assigned one.
    pub public_ip: Option<IpAddr>,
    /// Tags attached to the instance.
    pub tags: Vec<String>,
}

impl Instance {
    /// Returns `true` once the provider reports the instance as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Snapshot image as listed by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Provider assigned identifier.
    pub id: String,
    /// Snapshot name.
    pub name: String,
    /// Regions in which the snapshot is available.
    pub regions: Vec<String>,
}

/// SSH key registered with the provider account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyResource {
    /// Provider assigned identifier.
    pub id: u64,
    /// Key name.
    pub name: String,
    /// Key fingerprint.
    pub fingerprint: String,
}

/// Status of a provider-tracked asynchronous operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionStatus {
    /// The operation is still running.
    InProgress,
    /// The operation finished successfully.
    Completed,
    /// The provider reported a failure.
    Errored,
}

impl ActionStatus {
    /// Parses a provider status string. Unknown values are treated as still
    /// in progress so that polling continues until a known terminal state.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "completed" => Self::Completed,
            "errored" => Self::Errored,
            _ => Self::InProgress,
        }
    }

    /// Returns `true` for completed and errored actions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Provider-tracked asynchronous operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Action {
    /// Provider assigned identifier.
    pub id: u64,
    /// Operation type (for example `snapshot` or `create`).
    pub kind: String,
    /// Current status.
    pub status: ActionStatus,
}

/// Instance creation result: the new instance plus the action tracking it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedInstance {
    /// Instance as returned by the create call.
    pub instance: Instance,
    /// Action tracking the creation.
    pub action: Action,
}

/// Parameters for creating a scan instance from a snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Size slug.
    pub size: String,
    /// Snapshot identifier used as the boot image.
    pub image: String,
    /// Key resources to install for the root user.
    pub ssh_keys: Vec<u64>,
    /// Whether provider monitoring is enabled.
    pub monitoring: bool,
    /// Tags applied to the instance.
    pub tags: Vec<String>,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::default()
    }

    /// Validates the spec, returning the name of the first empty field.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), SpecError> {
        let required = [
            ("name", &self.name),
            ("region", &self.region),
            ("size", &self.size),
            ("image", &self.image),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(SpecError::Validation(field.to_owned()));
            }
        }
        if self.ssh_keys.is_empty() {
            return Err(SpecError::Validation(String::from("ssh_keys")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    region: String,
    size: String,
    image: String,
    ssh_keys: Vec<u64>,
    monitoring: bool,
    tags: Vec<String>,
}

impl InstanceSpecBuilder {
    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the region slug.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the size slug.
    #[must_use]
    pub fn size(mut self, value: impl Into<String>) -> Self {
        self.size = value.into();
        self
    }

    /// Sets the boot image (snapshot identifier).
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Adds a key resource to install on the instance.
    #[must_use]
    pub fn ssh_key(mut self, id: u64) -> Self {
        self.ssh_keys.push(id);
        self
    }

    /// Enables or disables provider monitoring.
    #[must_use]
    pub const fn monitoring(mut self, enabled: bool) -> Self {
        self.monitoring = enabled;
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tags.push(value.into());
        self
    }

    /// Builds and validates the [`InstanceSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            region: self.region.trim().to_owned(),
            size: self.size.trim().to_owned(),
            image: self.image.trim().to_owned(),
            ssh_keys: self.ssh_keys,
            monitoring: self.monitoring,
            tags: self
                .tags
                .into_iter()
                .map(|tag| tag.trim().to_owned())
                .filter(|tag| !tag.is_empty())
                .collect(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised when building provider requests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability surface over the cloud provider's API.
pub trait Provider: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance in the account.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error>;

    /// Fetches one instance, returning `None` when it does not exist.
    fn get_instance(&self, id: u64) -> ProviderFuture<'_, Option<Instance>, Self::Error>;

    /// Requests a snapshot of `instance_id` named `name`.
    fn create_snapshot<'a>(
        &'a self,
        instance_id: u64,
        name: &'a str,
    ) -> ProviderFuture<'a, Action, Self::Error>;

    /// Lists every instance snapshot owned by the account.
    fn list_snapshots(&self) -> ProviderFuture<'_, Vec<Snapshot>, Self::Error>;

    /// Destroys a snapshot.
    fn destroy_snapshot<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Creates an instance and returns it with its creation action.
    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, CreatedInstance, Self::Error>;

    /// Destroys an instance.
    fn destroy_instance(&self, id: u64) -> ProviderFuture<'_, (), Self::Error>;

    /// Registers a public key with the account.
    fn create_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, KeyResource, Self::Error>;

    /// Lists the keys registered with the account.
    fn list_keys(&self) -> ProviderFuture<'_, Vec<KeyResource>, Self::Error>;

    /// Removes a registered key.
    fn destroy_key(&self, id: u64) -> ProviderFuture<'_, (), Self::Error>;

    /// Reloads an action's status.
    fn get_action(&self, id: u64) -> ProviderFuture<'_, Action, Self::Error>;
}
