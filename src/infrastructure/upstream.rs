//! Optional push of sync metadata back to the upstream source of record.
//! After a fully replicated envelope, every settings document upstream gets
//! its `syncMetadata` array stamped with this service's name and the sync
//! time, preserving entries owned by other services. Authentication is a
//! self-signed service-account JWT exchanged for an OAuth access token.

use std::fs;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadataEntry {
    pub name: String,
    pub latest_sync_datetime: String,
}

pub struct UpstreamClient {
    account: ServiceAccount,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl UpstreamClient {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read service account file {path}"))?;
        let account: ServiceAccount =
            serde_json::from_str(&data).with_context(|| "failed to parse service account JSON")?;

        if account.project_id.is_empty()
            || account.private_key.is_empty()
            || account.client_email.is_empty()
        {
            anyhow::bail!("invalid service account: missing required fields");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .with_context(|| "failed to build http client")?;

        Ok(Self {
            account,
            http,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + chrono::Duration::seconds(60) {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let claims = Claims {
            iss: self.account.client_email.clone(),
            scope: DATASTORE_SCOPE.to_string(),
            aud: self.account.token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .with_context(|| "failed to parse service account private key")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .with_context(|| "failed to sign token assertion")?;

        let response: TokenResponse = self
            .http
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let expires_in = if response.expires_in > 0 {
            response.expires_in
        } else {
            3600
        };
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(expires_in),
        });

        Ok(response.access_token)
    }

    /// Upserts this service's entry into the `syncMetadata` array of every
    /// upstream settings document. Entries written by other services are
    /// carried over untouched.
    pub async fn update_settings_sync_metadata(
        &self,
        sync_service_name: &str,
    ) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let base = format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/(default)/documents",
            self.account.project_id
        );

        let listing: Value = self
            .http
            .get(format!("{base}/settings"))
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(documents) = listing.get("documents").and_then(Value::as_array) else {
            debug!("no upstream settings documents to update");
            return Ok(());
        };

        let stamp = Utc::now().to_rfc3339();

        for document in documents {
            let Some(name) = document.get("name").and_then(Value::as_str) else {
                continue;
            };

            let mut entries = parse_sync_metadata(
                document
                    .pointer("/fields/syncMetadata")
                    .unwrap_or(&Value::Null),
            );
            merge_entry(&mut entries, sync_service_name, &stamp);

            let body = json!({
                "fields": {
                    "syncMetadata": encode_sync_metadata(&entries),
                }
            });

            self.http
                .patch(format!(
                    "https://firestore.googleapis.com/v1/{name}?updateMask.fieldPaths=syncMetadata"
                ))
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            debug!(document = name, "updated upstream sync metadata");
        }

        Ok(())
    }
}

/// Decodes a Firestore `arrayValue` of sync-metadata maps, keeping every
/// entry that names a service even when other fields are absent.
fn parse_sync_metadata(value: &Value) -> Vec<SyncMetadataEntry> {
    let Some(values) = value.pointer("/arrayValue/values").and_then(Value::as_array) else {
        return Vec::new();
    };

    values
        .iter()
        .filter_map(|entry| {
            let fields = entry.pointer("/mapValue/fields")?;
            let name = fields.pointer("/name/stringValue")?.as_str()?.to_string();
            let latest_sync_datetime = fields
                .pointer("/latestSyncDatetime/stringValue")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(SyncMetadataEntry {
                name,
                latest_sync_datetime,
            })
        })
        .collect()
}

fn merge_entry(entries: &mut Vec<SyncMetadataEntry>, name: &str, stamp: &str) {
    match entries.iter_mut().find(|entry| entry.name == name) {
        Some(entry) => entry.latest_sync_datetime = stamp.to_string(),
        None => entries.push(SyncMetadataEntry {
            name: name.to_string(),
            latest_sync_datetime: stamp.to_string(),
        }),
    }
}

fn encode_sync_metadata(entries: &[SyncMetadataEntry]) -> Value {
    let values: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "mapValue": {
                    "fields": {
                        "name": { "stringValue": entry.name },
                        "latestSyncDatetime": { "stringValue": entry.latest_sync_datetime },
                    }
                }
            })
        })
        .collect();

    json!({ "arrayValue": { "values": values } })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firestore_array(entries: &[(&str, &str)]) -> Value {
        let values: Vec<Value> = entries
            .iter()
            .map(|(name, datetime)| {
                json!({
                    "mapValue": {
                        "fields": {
                            "name": { "stringValue": name },
                            "latestSyncDatetime": { "stringValue": datetime },
                        }
                    }
                })
            })
            .collect();
        json!({ "arrayValue": { "values": values } })
    }

    #[test]
    fn parses_and_preserves_foreign_entries() {
        let value = firestore_array(&[
            ("other-service", "2024-01-01T00:00:00Z"),
            ("ledger-sync", "2024-02-01T00:00:00Z"),
        ]);

        let entries = parse_sync_metadata(&value);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "other-service");
        assert_eq!(entries[1].latest_sync_datetime, "2024-02-01T00:00:00Z");
    }

    #[test]
    fn merge_updates_existing_entry_in_place() {
        let mut entries = parse_sync_metadata(&firestore_array(&[
            ("other-service", "2024-01-01T00:00:00Z"),
            ("ledger-sync", "2024-02-01T00:00:00Z"),
        ]));

        merge_entry(&mut entries, "ledger-sync", "2024-03-01T00:00:00Z");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].latest_sync_datetime, "2024-03-01T00:00:00Z");
        assert_eq!(entries[0].latest_sync_datetime, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn merge_appends_a_new_entry() {
        let mut entries = Vec::new();
        merge_entry(&mut entries, "ledger-sync", "2024-03-01T00:00:00Z");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ledger-sync");
    }

    #[test]
    fn missing_array_decodes_to_empty() {
        assert!(parse_sync_metadata(&Value::Null).is_empty());
        assert!(parse_sync_metadata(&json!({ "arrayValue": {} })).is_empty());
    }

    #[test]
    fn round_trips_through_the_wire_encoding() {
        let entries = vec![SyncMetadataEntry {
            name: "ledger-sync".to_string(),
            latest_sync_datetime: "2024-03-01T00:00:00Z".to_string(),
        }];

        let decoded = parse_sync_metadata(&encode_sync_metadata(&entries));
        assert_eq!(decoded, entries);
    }
}
