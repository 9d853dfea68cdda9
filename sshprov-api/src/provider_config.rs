//! Provider configs: where a remote host lives and how to log in to it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    22
}

/// Where a secret value is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SecretSource {
    /// The value is stored in the config itself.
    Inline { value: String },
    /// The value is read from an environment variable of the controller.
    Env { var: String },
    /// The value is read from a file on the controller's host.
    File { path: PathBuf },
}

/// How the controller authenticates against the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsSource {
    Password { secret: SecretSource },
    PrivateKey { secret: SecretSource },
}

/// Connection settings for one remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub credentials: CredentialsSource,
    /// Known-hosts file to verify the host key against. Host keys are not
    /// verified when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,
}

impl ProviderConfig {
    /// Address as `host:port`.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_password_config() {
        let cfg: ProviderConfig = serde_json::from_value(json!({
            "name": "default",
            "host": "10.0.0.7",
            "user": "root",
            "credentials": {
                "type": "password",
                "secret": { "source": "env", "var": "SSH_PASSWORD" }
            }
        }))
        .unwrap();

        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.address(), "10.0.0.7:22");
        assert_eq!(
            cfg.credentials,
            CredentialsSource::Password {
                secret: SecretSource::Env {
                    var: "SSH_PASSWORD".to_string()
                }
            }
        );
    }

    #[test]
    fn test_ipv6_address() {
        let cfg = ProviderConfig {
            name: "v6".to_string(),
            host: "fd00::1".to_string(),
            port: 2222,
            user: "root".to_string(),
            credentials: CredentialsSource::Password {
                secret: SecretSource::Inline {
                    value: "x".to_string(),
                },
            },
            known_hosts: None,
        };
        assert_eq!(cfg.address(), "[fd00::1]:2222");
    }
}
