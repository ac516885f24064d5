//! Failure-notification delivery, decoupled from the execution path by a
//! bounded in-process queue.
//!
//! One consumer loop drains the queue: mail goes out synchronously in the
//! loop (one in flight at a time, to spare the SMTP relay), webhooks are
//! submitted to a semaphore-bounded set of concurrent sends so a slow
//! endpoint cannot starve mail delivery or queue draining. Delivery is
//! best-effort and at-most-once; failures are logged and dropped.

pub mod mail;
pub mod webhook;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::NotifyConfig;
use crate::job::NotifyChannel;

pub use mail::Mailer;
pub use webhook::WebhookSender;

/// Queue depth before `submit` applies backpressure.
pub const QUEUE_CAPACITY: usize = 64;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One notification to deliver. Queue-only: lost if the process exits
/// before delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub channel: NotifyChannel,
    pub ip: String,
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub occur_time: String,
}

impl Message {
    /// Default the timestamp and strip characters that would corrupt
    /// downstream templates or JSON.
    pub fn normalize(&mut self) {
        if self.occur_time.is_empty() {
            self.occur_time = Utc::now().format(TIME_FORMAT).to_string();
        }
        self.body = self.body.replace('"', "'").replace('\n', "");
    }
}

/// Producer handle onto the dispatcher queue. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Message>,
}

impl Notifier {
    /// Enqueue a message. Blocks only while the queue is full; messages
    /// are never dropped on the producer side.
    pub async fn submit(&self, message: Message) {
        if self.tx.send(message).await.is_err() {
            tracing::warn!("notification queue is closed, dropping message");
        }
    }
}

/// Owns the delivery channels and the consumer loop.
pub struct Dispatcher {
    mailer: Option<Mailer>,
    webhook: Option<WebhookSender>,
    webhook_permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Build channels from configuration; unconfigured channels drop
    /// their messages with a debug log.
    pub fn new(config: &NotifyConfig) -> Self {
        let mailer = if config.mail.is_configured() {
            match Mailer::from_config(&config.mail) {
                Ok(mailer) => Some(mailer),
                Err(err) => {
                    tracing::warn!(error = %err, "mail transport misconfigured, channel disabled");
                    None
                }
            }
        } else {
            None
        };
        let webhook = config
            .webhook
            .is_configured()
            .then(|| WebhookSender::new(&config.webhook, reqwest::Client::new()));
        Self {
            mailer,
            webhook,
            webhook_permits: Arc::new(Semaphore::new(config.webhook_concurrency.max(1))),
        }
    }

    /// Start the consumer loop; returns the producer handle and the loop
    /// task. The loop ends when every producer handle is dropped.
    pub fn spawn(self) -> (Notifier, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Message>(QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(mut message) = rx.recv().await {
                message.normalize();
                match message.channel {
                    NotifyChannel::Mail => {
                        let Some(mailer) = &self.mailer else {
                            tracing::debug!("mail channel not configured, dropping message");
                            continue;
                        };
                        mailer.send(&message).await;
                    }
                    NotifyChannel::Webhook => {
                        let Some(webhook) = self.webhook.clone() else {
                            tracing::debug!("webhook channel not configured, dropping message");
                            continue;
                        };
                        let Ok(permit) = self.webhook_permits.clone().acquire_owned().await
                        else {
                            break;
                        };
                        tokio::spawn(async move {
                            webhook.send(&message).await;
                            drop(permit);
                        });
                    }
                }
            }
        });
        (Notifier { tx }, handle)
    }
}
