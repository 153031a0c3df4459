//! Logging setup and the chat-webhook sink for logs and alerts.
//!
//! Every INFO+ event goes to `LOGS_WEBHOOK_URL`; WARN+ events are copied to
//! `ALERTS_WEBHOOK_URL` as alerts. Delivery runs on its own thread so the audio path never
//! waits on HTTP.

use crate::config::Secrets;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Records waiting for delivery before new ones are dropped.
const QUEUE_DEPTH: usize = 256;

/// Targets never forwarded: the HTTP stack used for delivery itself.
const SKIPPED_TARGET_PREFIXES: &[&str] = &["reqwest", "hyper", "h2", "rustls", "tower"];

/// Where the fmt layer writes. The `describe` worker keeps stdout for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), fmt, webhook sink.
pub fn init_tracing(secrets: &Secrets, output: LogOutput) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let webhooks = WebhookAlertLayer::new(
        secrets.logs_webhook_url.clone(),
        secrets.alerts_webhook_url.clone(),
    );
    let registry = tracing_subscriber::registry().with(filter).with(webhooks);
    let result = match output {
        LogOutput::Stdout => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogOutput::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

/// One event captured for delivery.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub target: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

struct Delivery {
    url: String,
    payload: Value,
}

/// `tracing` layer that forwards events to chat webhooks.
pub struct WebhookAlertLayer {
    logs_url: Option<String>,
    alerts_url: Option<String>,
    tx: SyncSender<Delivery>,
}

impl WebhookAlertLayer {
    /// `None` when neither webhook is configured.
    pub fn new(logs_url: Option<String>, alerts_url: Option<String>) -> Option<Self> {
        if logs_url.is_none() && alerts_url.is_none() {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        let spawned = thread::Builder::new()
            .name("boneheart-webhooks".to_string())
            .spawn(move || deliver(rx));
        if let Err(e) = spawned {
            eprintln!("webhook delivery disabled: {}", e);
            return None;
        }
        Some(Self {
            logs_url,
            alerts_url,
            tx,
        })
    }

    fn enqueue(&self, url: &str, payload: Value) {
        let delivery = Delivery {
            url: url.to_string(),
            payload,
        };
        match self.tx.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => eprintln!("webhook queue full, dropping log record"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for WebhookAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > Level::INFO || is_skipped_target(meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            level: *meta.level(),
            message: visitor.finish(),
            target: meta.target().to_string(),
            location: format!(
                "{}:{}",
                meta.file().unwrap_or("unknown"),
                meta.line().unwrap_or(0)
            ),
            timestamp: Utc::now(),
        };

        if let Some(url) = &self.logs_url {
            self.enqueue(url, embed_payload(&record, false));
        }
        if record.level <= Level::WARN {
            if let Some(url) = &self.alerts_url {
                self.enqueue(url, embed_payload(&record, true));
            }
        }
    }
}

fn is_skipped_target(target: &str) -> bool {
    SKIPPED_TARGET_PREFIXES
        .iter()
        .any(|prefix| target == *prefix || target.starts_with(&format!("{}::", prefix)))
}

fn deliver(rx: Receiver<Delivery>) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("webhook client unavailable: {}", e);
            return;
        }
    };
    for delivery in rx {
        match client.post(&delivery.url).json(&delivery.payload).send() {
            Ok(res) if !res.status().is_success() => {
                eprintln!("webhook rejected log record: {}", res.status());
            }
            Ok(_) => {}
            Err(e) => eprintln!("webhook delivery failed: {}", e),
        }
    }
}

fn level_style(level: Level) -> (&'static str, u32) {
    match level {
        Level::ERROR => ("🚨", 0xFF0000),
        Level::WARN => ("⚠️", 0xFFFF00),
        Level::INFO => ("ℹ️", 0x0099FF),
        _ => ("🔍", 0x808080),
    }
}

/// Chat embed for one record. Alerts get an "ALERT" title and ping the channel.
pub fn embed_payload(record: &LogRecord, alert: bool) -> Value {
    let (emoji, color) = level_style(record.level);
    let title = if alert {
        format!("🚨 ALERT: {}", record.level)
    } else {
        format!("{} {}", emoji, record.level)
    };
    let embed = json!({
        "title": title,
        "description": format!("```\n{}\n```", record.message),
        "color": color,
        "timestamp": record.timestamp.to_rfc3339(),
        "fields": [
            { "name": "Target", "value": record.target, "inline": true },
            { "name": "Location", "value": record.location, "inline": true },
        ],
    });
    if alert {
        json!({ "embeds": [embed], "username": "Alert Bot", "content": "@everyone" })
    } else {
        json!({ "embeds": [embed], "username": "App Logger" })
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.trim_start())
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
