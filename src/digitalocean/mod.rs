//! DigitalOcean implementation of the provider capability surface.
//!
//! Talks to the v2 REST API with bearer-token authentication. Collection
//! endpoints are followed through `links.pages.next` until exhausted.

mod error;
mod types;

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::DigitalOceanConfig;
use crate::provider::{
    Action, ActionStatus, CreatedInstance, Instance, InstanceSpec, KeyResource, Provider,
    ProviderFuture, Snapshot,
};
use types::{
    ActionEnvelope, CreateDropletRequest, CreateDropletResponse, CreateKeyRequest, DropletEnvelope,
    DropletPage, KeyEnvelope, KeyPage, Paged, SnapshotActionRequest, SnapshotPage, error_message,
};

pub use error::DigitalOceanError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 200;

/// Provider backed by the DigitalOcean API.
#[derive(Clone, Debug)]
pub struct DigitalOceanProvider {
    client: Client,
    base_url: String,
}

impl DigitalOceanProvider {
    /// Constructs a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the configuration fails
    /// validation or the token cannot be used as a header, and
    /// [`DigitalOceanError::Http`] when the HTTP client cannot be built.
    pub fn new(config: &DigitalOceanConfig) -> Result<Self, DigitalOceanError> {
        config.validate()?;
        let mut token = HeaderValue::from_str(&format!("Bearer {}", config.access_token.trim()))
            .map_err(|err| DigitalOceanError::Config(format!("invalid access token: {err}")))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("sidescan/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{path}", self.base_url)
    }

    async fn send(request: RequestBuilder) -> Result<Response, DigitalOceanError> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(Self::api_error(response).await)
    }

    async fn api_error(response: Response) -> DigitalOceanError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        DigitalOceanError::Api {
            status,
            message: error_message(&body),
        }
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, DigitalOceanError> {
        let response = Self::send(request).await?;
        Ok(response.json::<T>().await?)
    }

    async fn fetch_all<P>(&self, path: &str) -> Result<Vec<P::Item>, DigitalOceanError>
    where
        P: Paged + DeserializeOwned,
    {
        let mut items = Vec::new();
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut next = Some(format!("{}{separator}per_page={PAGE_SIZE}", self.url(path)));
        while let Some(url) = next {
            debug!(%url, "fetching page");
            let page: P = Self::fetch(self.client.get(&url)).await?;
            let (batch, following) = page.into_parts();
            items.extend(batch);
            next = following;
        }
        Ok(items)
    }

    async fn delete(&self, path: &str) -> Result<(), DigitalOceanError> {
        Self::send(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}

impl Provider for DigitalOceanProvider {
    type Error = DigitalOceanError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move { self.fetch_all::<DropletPage>("droplets").await })
    }

    fn get_instance(&self, id: u64) -> ProviderFuture<'_, Option<Instance>, Self::Error> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(&format!("droplets/{id}")))
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }
            let envelope: DropletEnvelope = response.json().await?;
            Ok(Some(Instance::from(envelope.droplet)))
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        instance_id: u64,
        name: &'a str,
    ) -> ProviderFuture<'a, Action, Self::Error> {
        Box::pin(async move {
            let body = SnapshotActionRequest {
                kind: "snapshot",
                name,
            };
            let request = self
                .client
                .post(self.url(&format!("droplets/{instance_id}/actions")))
                .json(&body);
            let envelope: ActionEnvelope = Self::fetch(request).await?;
            Ok(Action::from(envelope.action))
        })
    }

    fn list_snapshots(&self) -> ProviderFuture<'_, Vec<Snapshot>, Self::Error> {
        Box::pin(async move {
            self.fetch_all::<SnapshotPage>("snapshots?resource_type=droplet")
                .await
        })
    }

    fn destroy_snapshot<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("snapshots/{id}")).await })
    }

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, CreatedInstance, Self::Error> {
        Box::pin(async move {
            let body = CreateDropletRequest::from(spec);
            let request = self.client.post(self.url("droplets")).json(&body);
            let response: CreateDropletResponse = Self::fetch(request).await?;
            let action_id = response.create_action_id().ok_or_else(|| {
                DigitalOceanError::MissingCreateAction {
                    instance: spec.name.clone(),
                }
            })?;
            Ok(CreatedInstance {
                instance: Instance::from(response.droplet),
                action: Action {
                    id: action_id,
                    kind: String::from("create"),
                    status: ActionStatus::InProgress,
                },
            })
        })
    }

    fn destroy_instance(&self, id: u64) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("droplets/{id}")).await })
    }

    fn create_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, KeyResource, Self::Error> {
        Box::pin(async move {
            let body = CreateKeyRequest { name, public_key };
            let request = self.client.post(self.url("account/keys")).json(&body);
            let envelope: KeyEnvelope = Self::fetch(request).await?;
            Ok(KeyResource::from(envelope.ssh_key))
        })
    }

    fn list_keys(&self) -> ProviderFuture<'_, Vec<KeyResource>, Self::Error> {
        Box::pin(async move { self.fetch_all::<KeyPage>("account/keys").await })
    }

    fn destroy_key(&self, id: u64) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("account/keys/{id}")).await })
    }

    fn get_action(&self, id: u64) -> ProviderFuture<'_, Action, Self::Error> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!("actions/{id}")));
            let envelope: ActionEnvelope = Self::fetch(request).await?;
            Ok(Action::from(envelope.action))
        })
    }
}
