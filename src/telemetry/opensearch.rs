//! Best-effort OpenSearch log shipping. Events are serialized on the
//! tracing layer, pushed over a bounded channel, and posted to a dated
//! index by a background task. The replication path is never blocked: when
//! the channel is full the entry is dropped, and when the sink is down the
//! stdout JSON layer remains the only output.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::infrastructure::config::OpenSearchConfig;

const CHANNEL_CAPACITY: usize = 1024;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct LogEntry {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// Builds the shipping layer and spawns its background sender, or `None`
/// when shipping is disabled.
pub fn layer(config: &OpenSearchConfig, service_name: &str) -> Option<OpenSearchLayer> {
    if !config.enabled || config.url.trim().is_empty() {
        return None;
    }

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    let client = OpenSearchClient::new(config.clone());
    tokio::spawn(run_shipper(client, receiver));

    Some(OpenSearchLayer {
        sender,
        service: service_name.to_string(),
        host: std::env::var("HOSTNAME").ok(),
    })
}

pub struct OpenSearchLayer {
    sender: mpsc::Sender<LogEntry>,
    service: String,
    host: Option<String>,
}

impl<S: Subscriber> Layer<S> for OpenSearchLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            message: visitor.message,
            service: self.service.clone(),
            host: self.host.clone(),
            fields: visitor.fields,
        };

        // Dropped on a full channel; shipping is strictly best-effort.
        let _ = self.sender.try_send(entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{value:?}")));
        }
    }
}

struct OpenSearchClient {
    config: OpenSearchConfig,
    http: reqwest::Client,
    available: bool,
    last_attempt: Option<Instant>,
}

// The shipper never emits tracing events of its own: they would feed back
// through the layer above.
impl OpenSearchClient {
    fn new(config: OpenSearchConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            available: false,
            last_attempt: None,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        if self.config.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    /// Connects at most once per reconnect interval while unavailable.
    async fn ensure_connected(&mut self) -> bool {
        if self.available {
            return true;
        }
        if let Some(last) = self.last_attempt {
            if last.elapsed() < RECONNECT_INTERVAL {
                return false;
            }
        }
        self.last_attempt = Some(Instant::now());
        self.available = self.connect().await;
        self.available
    }

    async fn connect(&self) -> bool {
        let ping = self
            .request(reqwest::Method::GET, self.config.url.clone())
            .send()
            .await;
        match ping {
            Ok(response) if response.status().is_success() => {}
            _ => return false,
        }

        if !self.put_index_template().await {
            return false;
        }

        // Retention is managed by an ISM policy; failure to install it only
        // means indices outlive the configured window.
        let _ = self.put_ism_policy().await;

        true
    }

    async fn put_index_template(&self) -> bool {
        let url = format!(
            "{}/_index_template/{}-template",
            self.config.url, self.config.index_prefix
        );
        let template = json!({
            "index_patterns": [format!("{}-*", self.config.index_prefix)],
            "template": {
                "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
                "mappings": {
                    "properties": {
                        "@timestamp": { "type": "date" },
                        "level": { "type": "keyword" },
                        "message": { "type": "text" },
                        "service": { "type": "keyword" },
                        "host": { "type": "keyword" },
                        "fields": { "type": "object", "enabled": true },
                    }
                }
            },
            "priority": 100,
        });

        matches!(
            self.request(reqwest::Method::PUT, url).json(&template).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn put_ism_policy(&self) -> bool {
        let url = format!(
            "{}/_plugins/_ism/policies/{}-ism-policy",
            self.config.url, self.config.index_prefix
        );
        let policy = json!({
            "policy": {
                "description": format!(
                    "retention policy for {} ({} days)",
                    self.config.index_prefix, self.config.retention_days
                ),
                "default_state": "hot",
                "states": [
                    {
                        "name": "hot",
                        "actions": [],
                        "transitions": [{
                            "state_name": "delete",
                            "conditions": {
                                "min_index_age": format!("{}d", self.config.retention_days)
                            }
                        }]
                    },
                    {
                        "name": "delete",
                        "actions": [{ "delete": {} }],
                        "transitions": []
                    }
                ],
                "ism_template": [{
                    "index_patterns": [format!("{}-*", self.config.index_prefix)],
                    "priority": 100,
                }]
            }
        });

        // 409 means the policy already exists, which is fine.
        matches!(
            self.request(reqwest::Method::PUT, url).json(&policy).send().await,
            Ok(response) if response.status().is_success()
                || response.status() == reqwest::StatusCode::CONFLICT
        )
    }

    async fn index(&mut self, entry: &LogEntry) {
        let index = format!(
            "{}-{}",
            self.config.index_prefix,
            Utc::now().format("%Y.%m.%d")
        );
        let url = format!("{}/{}/_doc", self.config.url, index);

        // Document-level rejections keep the sink available; only transport
        // failures trigger the reconnect backoff.
        if self.request(reqwest::Method::POST, url).json(entry).send().await.is_err() {
            self.available = false;
        }
    }
}

async fn run_shipper(mut client: OpenSearchClient, mut receiver: mpsc::Receiver<LogEntry>) {
    while let Some(entry) = receiver.recv().await {
        if client.ensure_connected().await {
            client.index(&entry).await;
        }
    }
}
