//! Wire types for the DigitalOcean v2 API and their conversions into the
//! provider-neutral model.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{Action, ActionStatus, Instance, InstanceSpec, KeyResource, Snapshot};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Links {
    #[serde(default)]
    pub(crate) pages: Option<PageLinks>,
    #[serde(default)]
    pub(crate) actions: Vec<ActionLink>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageLinks {
    #[serde(default)]
    pub(crate) next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionLink {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) rel: String,
}

impl Links {
    pub(crate) fn next_page(self) -> Option<String> {
        self.pages.and_then(|pages| pages.next)
    }
}

/// Collection response split into its items and the next page URL.
pub(crate) trait Paged {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegionBody {
    pub(crate) slug: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NetworkV4 {
    pub(crate) ip_address: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Networks {
    #[serde(default)]
    pub(crate) v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DropletBody {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) disk: u64,
    pub(crate) region: RegionBody,
    pub(crate) size_slug: String,
    #[serde(default)]
    pub(crate) networks: Networks,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
}

impl DropletBody {
    fn public_ip(&self) -> Option<IpAddr> {
        self.networks
            .v4
            .iter()
            .filter(|network| network.kind == "public")
            .find_map(|network| network.ip_address.parse().ok())
    }
}

impl From<DropletBody> for Instance {
    fn from(value: DropletBody) -> Self {
        let public_ip = value.public_ip();
        Self {
            id: value.id,
            name: value.name,
            region: value.region.slug,
            size: value.size_slug,
            disk_gb: value.disk,
            status: value.status,
            public_ip,
            tags: value.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DropletEnvelope {
    pub(crate) droplet: DropletBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DropletPage {
    #[serde(default)]
    pub(crate) droplets: Vec<DropletBody>,
    #[serde(default)]
    pub(crate) links: Links,
}

impl Paged for DropletPage {
    type Item = Instance;

    fn into_parts(self) -> (Vec<Instance>, Option<String>) {
        let items = self.droplets.into_iter().map(Instance::from).collect();
        (items, self.links.next_page())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateDropletResponse {
    pub(crate) droplet: DropletBody,
    #[serde(default)]
    pub(crate) links: Links,
}

impl CreateDropletResponse {
    /// Returns the id of the action tracking creation, preferring the link
    /// tagged `create`.
    pub(crate) fn create_action_id(&self) -> Option<u64> {
        self.links
            .actions
            .iter()
            .find(|link| link.rel == "create")
            .or_else(|| self.links.actions.first())
            .map(|link| link.id)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateDropletRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) region: &'a str,
    pub(crate) size: &'a str,
    pub(crate) image: Value,
    pub(crate) ssh_keys: &'a [u64],
    pub(crate) backups: bool,
    pub(crate) ipv6: bool,
    pub(crate) monitoring: bool,
    pub(crate) tags: &'a [String],
}

impl<'a> From<&'a InstanceSpec> for CreateDropletRequest<'a> {
    fn from(spec: &'a InstanceSpec) -> Self {
        Self {
            name: &spec.name,
            region: &spec.region,
            size: &spec.size,
            image: image_value(&spec.image),
            ssh_keys: &spec.ssh_keys,
            backups: false,
            ipv6: false,
            monitoring: spec.monitoring,
            tags: &spec.tags,
        }
    }
}

/// Snapshot ids are numeric image ids; the API expects them as numbers while
/// slugs stay strings.
pub(crate) fn image_value(image: &str) -> Value {
    image
        .parse::<u64>()
        .map_or_else(|_| Value::String(image.to_owned()), Value::from)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotBody {
    pub(crate) id: Value,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) regions: Vec<String>,
}

impl From<SnapshotBody> for Snapshot {
    fn from(value: SnapshotBody) -> Self {
        let id = match value.id {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Self {
            id,
            name: value.name,
            regions: value.regions,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotPage {
    #[serde(default)]
    pub(crate) snapshots: Vec<SnapshotBody>,
    #[serde(default)]
    pub(crate) links: Links,
}

impl Paged for SnapshotPage {
    type Item = Snapshot;

    fn into_parts(self) -> (Vec<Snapshot>, Option<String>) {
        let items = self.snapshots.into_iter().map(Snapshot::from).collect();
        (items, self.links.next_page())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SnapshotActionRequest<'a> {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
    pub(crate) name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionBody {
    pub(crate) id: u64,
    pub(crate) status: String,
    #[serde(rename = "type", default)]
    pub(crate) kind: String,
}

impl From<ActionBody> for Action {
    fn from(value: ActionBody) -> Self {
        Self {
            id: value.id,
            kind: value.kind,
            status: ActionStatus::from_provider(&value.status),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionEnvelope {
    pub(crate) action: ActionBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyBody {
    pub(crate) id: u64,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) fingerprint: String,
}

impl From<KeyBody> for KeyResource {
    fn from(value: KeyBody) -> Self {
        Self {
            id: value.id,
            name: value.name,
            fingerprint: value.fingerprint,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyEnvelope {
    pub(crate) ssh_key: KeyBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyPage {
    #[serde(default)]
    pub(crate) ssh_keys: Vec<KeyBody>,
    #[serde(default)]
    pub(crate) links: Links,
}

impl Paged for KeyPage {
    type Item = KeyResource;

    fn into_parts(self) -> (Vec<KeyResource>, Option<String>) {
        let items = self.ssh_keys.into_iter().map(KeyResource::from).collect();
        (items, self.links.next_page())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateKeyRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) id: String,
    pub(crate) message: String,
}

/// Extracts a readable message from an error response body.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if parsed.id.is_empty() => parsed.message,
        Ok(parsed) => format!("{} ({})", parsed.message, parsed.id),
        Err(_) => body.trim().to_owned(),
    }
}
