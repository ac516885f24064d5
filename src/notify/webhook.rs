use crate::config::WebhookConfig;
use crate::notify::Message;

/// Card payload for the feishu integration. Slots are substituted with
/// message fields before posting.
const FEISHU_CARD_TEMPLATE: &str = r#"{
  "msg_type": "interactive",
  "card": {
    "header": {
      "template": "red",
      "title": { "tag": "plain_text", "content": "subjectSlot" }
    },
    "elements": [
      { "tag": "div", "text": { "tag": "lark_md", "content": "**host:** ipSlot" } },
      { "tag": "div", "text": { "tag": "lark_md", "content": "**time:** timeSlot" } },
      { "tag": "div", "text": { "tag": "lark_md", "content": "msgSlot" } },
      { "tag": "div", "text": { "tag": "lark_md", "content": "userSlot" } }
    ]
  }
}"#;

/// Posts notifications to the configured webhook endpoint. The payload
/// shape depends on the configured kind: a templated card for "feishu",
/// the full message as a JSON envelope otherwise.
#[derive(Clone)]
pub struct WebhookSender {
    kind: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(config: &WebhookConfig, client: reqwest::Client) -> Self {
        Self {
            kind: config.kind.clone(),
            url: config.url.clone(),
            client,
        }
    }

    /// Deliver one message. Failures are logged and dropped.
    pub async fn send(&self, message: &Message) {
        let payload = self.render(message);
        let result = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await;
        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {}
            Ok(response) => {
                tracing::warn!(
                    url = %self.url,
                    status = %response.status(),
                    "webhook delivery rejected"
                );
            }
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "webhook send failed");
            }
        }
    }

    pub fn render(&self, message: &Message) -> String {
        if self.kind == "feishu" {
            render_feishu_card(message)
        } else {
            serde_json::to_string(message).unwrap_or_default()
        }
    }
}

fn render_feishu_card(message: &Message) -> String {
    let mentions: String = message
        .to
        .iter()
        .map(|to| format!("<at email='' >{to}</at>"))
        .collect();
    FEISHU_CARD_TEMPLATE
        .replacen("timeSlot", &message.occur_time, 1)
        .replacen("ipSlot", &message.ip, 1)
        .replacen("userSlot", &mentions, 1)
        .replacen("msgSlot", &message.body, 1)
        .replacen("subjectSlot", &message.subject, 1)
}
