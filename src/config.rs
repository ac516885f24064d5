use std::time::Duration;

/// Identity of this node as seen by the control plane.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Stable unique identifier, also the segment under the job prefix.
    pub uuid: String,
    pub hostname: String,
    pub ip: String,
    /// OS process id of the agent, reported alongside the IP in alerts.
    pub pid: String,
}

impl NodeIdentity {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            hostname: String::new(),
            ip: String::new(),
            pid: std::process::id().to_string(),
        }
    }

    pub fn with_host(mut self, hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self.ip = ip.into();
        self
    }
}

/// Settings for the coordination store connection.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root namespace every key lives under, e.g. "/cronbeat".
    pub namespace: String,
    /// Endpoint set, surfaced in timeout errors so operators know which
    /// cluster may be unreachable.
    pub endpoints: Vec<String>,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// TTL of run heartbeat keys. A crashed run vanishes within this bound.
    pub proc_ttl_secs: i64,
    /// TTL of the lease backing distributed locks.
    pub lock_ttl_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "/cronbeat".to_string(),
            endpoints: vec!["memory://local".to_string()],
            request_timeout: Duration::from_secs(5),
            proc_ttl_secs: 60,
            lock_ttl_secs: 10,
        }
    }
}

/// SMTP delivery settings for the mail channel.
#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub secret: String,
    pub nickname: String,
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.from.is_empty()
    }
}

/// Webhook delivery settings.
///
/// `kind` selects the payload shape: "feishu" renders the card template,
/// anything else posts the generic JSON envelope.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub kind: String,
    pub url: String,
}

impl WebhookConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub mail: MailConfig,
    pub webhook: WebhookConfig,
    /// Upper bound on concurrent webhook deliveries.
    pub webhook_concurrency: usize,
}

impl NotifyConfig {
    pub fn new(mail: MailConfig, webhook: WebhookConfig) -> Self {
        Self {
            mail,
            webhook,
            webhook_concurrency: 8,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node: NodeIdentity,
    pub store: StoreConfig,
    pub notify: NotifyConfig,
}

impl AgentConfig {
    pub fn new(node: NodeIdentity) -> Self {
        Self {
            node,
            store: StoreConfig::default(),
            notify: NotifyConfig::default(),
        }
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_default() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.namespace, "/cronbeat");
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.proc_ttl_secs, 60);
        assert!(!cfg.endpoints.is_empty());
    }

    #[test]
    fn node_identity_with_host() {
        let node = NodeIdentity::new("node-a").with_host("worker-1", "10.0.0.8");
        assert_eq!(node.uuid, "node-a");
        assert_eq!(node.hostname, "worker-1");
        assert_eq!(node.ip, "10.0.0.8");
        assert!(!node.pid.is_empty());
    }

    #[test]
    fn mail_config_requires_host_and_from() {
        let mut cfg = MailConfig::default();
        assert!(!cfg.is_configured());
        cfg.host = "smtp.example.com".to_string();
        assert!(!cfg.is_configured());
        cfg.from = "alerts@example.com".to_string();
        assert!(cfg.is_configured());
    }

    #[test]
    fn notify_config_defaults_webhook_concurrency() {
        let cfg = NotifyConfig::new(MailConfig::default(), WebhookConfig::default());
        assert_eq!(cfg.webhook_concurrency, 8);
        assert!(!cfg.webhook.is_configured());
    }
}
