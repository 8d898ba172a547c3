//! Credential collaborator: hands out a valid, possibly refreshed credential
//! for a source. Tokens are persisted only through this module.

use crate::catalog::{CatalogStore, SourceKind};
use crate::config::OAuthSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Material needed to call a source's remote API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Object-storage application key pair.
    BucketKey { key_id: String, application_key: String },
    /// OAuth bearer token for a photo-library account.
    Bearer { access_token: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::BucketKey { key_id, .. } => f
                .debug_struct("BucketKey")
                .field("key_id_len", &key_id.len())
                .finish_non_exhaustive(),
            Credential::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` when the source has no usable credential.
    async fn get_valid_credential(&self, source_id: i64) -> Result<Option<Credential>>;
}

/// Stored key pair for a bucket source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketKeys {
    pub key_id: String,
    pub application_key: String,
}

/// Stored OAuth token for a photo-library source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| at - Duration::seconds(30) <= now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Reads credentials from the catalog's `sources` table and refreshes
/// expired OAuth tokens against the configured token endpoint.
pub struct StoredCredentials {
    store: Arc<dyn CatalogStore>,
    client: Client,
    oauth: OAuthSettings,
}

impl StoredCredentials {
    pub fn new(store: Arc<dyn CatalogStore>, client: Client, oauth: OAuthSettings) -> Self {
        Self { store, client, oauth }
    }

    async fn refresh(&self, source_id: i64, token: &OAuthToken) -> Result<Option<OAuthToken>> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            token.refresh_token.as_deref(),
            self.oauth.client_id.as_deref(),
            self.oauth.client_secret.as_deref(),
        ) else {
            return Ok(None);
        };

        tracing::info!("Refreshing access token for source {}", source_id);
        let response = self
            .client
            .post(&self.oauth.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::credential(source_id, e))?;
        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| Error::credential(source_id, e))?;

        let refreshed = OAuthToken {
            access_token: parsed.access_token,
            refresh_token: token.refresh_token.clone(),
            expires_at: parsed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };
        self.store
            .set_credentials_json(source_id, &serde_json::to_string(&refreshed)?)?;
        Ok(Some(refreshed))
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentials {
    async fn get_valid_credential(&self, source_id: i64) -> Result<Option<Credential>> {
        let Some(source) = self.store.get_source(source_id)? else {
            return Ok(None);
        };
        let Some(json) = self.store.credentials_json(source_id)? else {
            return Ok(None);
        };

        match source.kind {
            SourceKind::ObjectStorage => {
                let keys: BucketKeys =
                    serde_json::from_str(&json).map_err(|e| Error::credential(source_id, e))?;
                let key_id = keys.key_id.trim();
                let application_key = keys.application_key.trim();
                if key_id.is_empty() || application_key.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Credential::BucketKey {
                    key_id: key_id.to_string(),
                    application_key: application_key.to_string(),
                }))
            }
            SourceKind::PhotoLibrary => {
                let token: OAuthToken =
                    serde_json::from_str(&json).map_err(|e| Error::credential(source_id, e))?;
                let token = if token.is_expired(Utc::now()) {
                    match self.refresh(source_id, &token).await? {
                        Some(fresh) => fresh,
                        None => {
                            tracing::warn!("Token for source {} expired and cannot be refreshed", source_id);
                            return Ok(None);
                        }
                    }
                } else {
                    token
                };
                Ok(Some(Credential::Bearer {
                    access_token: token.access_token,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewSource, SqliteCatalog};

    fn provider(store: Arc<SqliteCatalog>) -> StoredCredentials {
        StoredCredentials::new(
            store,
            Client::new(),
            OAuthSettings {
                token_url: "http://127.0.0.1:9/token".into(),
                client_id: None,
                client_secret: None,
            },
        )
    }

    #[tokio::test]
    async fn bucket_keys_are_trimmed() {
        let store = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let source = store
            .add_source(&NewSource {
                kind: SourceKind::ObjectStorage,
                label: "b".into(),
                bucket_name: Some("b".into()),
                credentials_json: r#"{"key_id":" 001abc ","application_key":"K001\n"}"#.into(),
            })
            .unwrap();

        let cred = provider(store).get_valid_credential(source.id).await.unwrap();
        assert_eq!(
            cred,
            Some(Credential::BucketKey {
                key_id: "001abc".into(),
                application_key: "K001".into(),
            })
        );
    }

    #[tokio::test]
    async fn expired_token_without_refresh_material_yields_none() {
        let store = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let expired = OAuthToken {
            access_token: "old".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(Utc::now() - Duration::hours(1)),
        };
        let source = store
            .add_source(&NewSource {
                kind: SourceKind::PhotoLibrary,
                label: "me@example.com".into(),
                bucket_name: None,
                credentials_json: serde_json::to_string(&expired).unwrap(),
            })
            .unwrap();

        let creds = provider(store.clone());
        assert_eq!(creds.get_valid_credential(source.id).await.unwrap(), None);
        assert_eq!(creds.get_valid_credential(404).await.unwrap(), None);
    }

    #[tokio::test]
    async fn live_token_is_returned_as_bearer() {
        let store = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let live = OAuthToken {
            access_token: "fresh".into(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };
        let source = store
            .add_source(&NewSource {
                kind: SourceKind::PhotoLibrary,
                label: "me@example.com".into(),
                bucket_name: None,
                credentials_json: serde_json::to_string(&live).unwrap(),
            })
            .unwrap();

        let cred = provider(store).get_valid_credential(source.id).await.unwrap();
        assert_eq!(cred, Some(Credential::Bearer { access_token: "fresh".into() }));
    }
}
