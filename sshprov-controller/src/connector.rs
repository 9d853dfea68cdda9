//! Turns a managed resource into a connected remote session.
//!
//! Every connect re-reads the provider config and re-resolves its secret, so
//! rotated credentials are picked up on the next pass.

use std::sync::Arc;

use sshprov_api::{
    ConfigStore, CredentialsSource, ProviderConfig, Resource, ResourceKind, SecretSource,
    StoreError,
};
use tracing::debug;

use crate::error::{ConnectError, CredentialError};
use crate::remote::{Credentials, Dialer, Endpoint, RemoteSession, Secret};

pub struct Connector {
    configs: Arc<dyn ConfigStore>,
    dialer: Arc<dyn Dialer>,
}

impl Connector {
    pub fn new(configs: Arc<dyn ConfigStore>, dialer: Arc<dyn Dialer>) -> Self {
        Self { configs, dialer }
    }

    /// Track usage of the referenced config, look it up, resolve its
    /// credentials and dial.
    pub async fn connect<K: ResourceKind>(
        &self,
        resource: &Resource<K>,
    ) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let config_ref = &resource.provider_config_ref;

        self.configs
            .track_usage(config_ref, resource.name())
            .await
            .map_err(|source| ConnectError::Track {
                config: config_ref.name.clone(),
                source,
            })?;

        let config = self
            .configs
            .get_provider_config(&config_ref.name)
            .await
            .and_then(|c| c.ok_or_else(|| StoreError::NotFound(config_ref.name.clone())))
            .map_err(|source| ConnectError::ConfigLookup {
                config: config_ref.name.clone(),
                source,
            })?;

        let credentials =
            resolve_credentials(&config)
                .await
                .map_err(|source| ConnectError::Credentials {
                    config: config.name.clone(),
                    source,
                })?;

        let endpoint = Endpoint {
            host: config.host.clone(),
            port: config.port,
            known_hosts: config.known_hosts.clone(),
        };

        debug!(
            "Dialing {} for {} {}",
            endpoint.address(),
            K::KIND,
            resource.name()
        );
        Ok(self.dialer.dial(&endpoint, &credentials).await?)
    }
}

/// Resolve the user and secret of a provider config.
pub async fn resolve_credentials(config: &ProviderConfig) -> Result<Credentials, CredentialError> {
    if config.user.trim().is_empty() {
        return Err(CredentialError::MissingUser {
            config: config.name.clone(),
        });
    }

    let secret = match &config.credentials {
        CredentialsSource::Password { secret } => {
            let value = resolve_secret(secret).await?;
            Secret::Password(value.trim_end_matches(['\r', '\n']).to_string())
        }
        CredentialsSource::PrivateKey { secret } => Secret::PrivateKey(resolve_secret(secret).await?),
    };

    Ok(Credentials {
        user: config.user.clone(),
        secret,
    })
}

async fn resolve_secret(source: &SecretSource) -> Result<String, CredentialError> {
    let (value, from) = match source {
        SecretSource::Inline { value } => (value.clone(), "inline value".to_string()),
        SecretSource::Env { var } => {
            let value = std::env::var(var)
                .map_err(|_| CredentialError::MissingEnv { var: var.clone() })?;
            (value, format!("environment variable {}", var))
        }
        SecretSource::File { path } => {
            let value =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| CredentialError::File {
                        path: path.display().to_string(),
                        source,
                    })?;
            (value, format!("file {}", path.display()))
        }
    };

    if value.trim().is_empty() {
        return Err(CredentialError::Empty { from });
    }
    Ok(value)
}
