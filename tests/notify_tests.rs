use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Router;

use cronbeat::config::{MailConfig, NotifyConfig, WebhookConfig};
use cronbeat::job::NotifyChannel;
use cronbeat::notify::{Dispatcher, Message};

type Payloads = Arc<Mutex<Vec<String>>>;

async fn record_hook(State(payloads): State<Payloads>, body: String) -> &'static str {
    payloads.lock().unwrap().push(body);
    "ok"
}

async fn serve_hook() -> (SocketAddr, Payloads) {
    let payloads: Payloads = Arc::default();
    let app = Router::new()
        .route("/hook", post(record_hook))
        .with_state(payloads.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, payloads)
}

fn webhook_config(addr: SocketAddr, kind: &str) -> NotifyConfig {
    NotifyConfig::new(
        MailConfig::default(),
        WebhookConfig {
            kind: kind.to_string(),
            url: format!("http://{addr}/hook"),
        },
    )
}

fn message(subject: &str, body: &str) -> Message {
    Message {
        channel: NotifyChannel::Webhook,
        ip: "10.0.0.5:31".to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        to: vec!["ops".to_string()],
        occur_time: String::new(),
    }
}

async fn wait_for_payloads(payloads: &Payloads, count: usize) -> Vec<String> {
    for _ in 0..40 {
        {
            let seen = payloads.lock().unwrap();
            if seen.len() >= count {
                return seen.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("webhook payloads never arrived");
}

#[tokio::test]
async fn generic_webhook_gets_the_normalized_envelope() {
    let (addr, payloads) = serve_hook().await;
    let (notifier, _delivery) = Dispatcher::new(&webhook_config(addr, "")).spawn();

    notifier
        .submit(message("job [sync] execution failed", "line \"one\"\nline two"))
        .await;

    let delivered = wait_for_payloads(&payloads, 1).await;
    let envelope: serde_json::Value = serde_json::from_str(&delivered[0]).unwrap();
    assert_eq!(envelope["type"], 2);
    assert_eq!(envelope["subject"], "job [sync] execution failed");
    // normalization: quotes become apostrophes, newlines vanish
    assert_eq!(envelope["body"], "line 'one'line two");
    assert_ne!(envelope["occur_time"], "");
}

#[tokio::test]
async fn feishu_kind_posts_the_card_payload() {
    let (addr, payloads) = serve_hook().await;
    let (notifier, _delivery) = Dispatcher::new(&webhook_config(addr, "feishu")).spawn();

    notifier
        .submit(message("job [sync] execution failed", "exit status Some(2)"))
        .await;

    let delivered = wait_for_payloads(&payloads, 1).await;
    assert!(delivered[0].contains("\"msg_type\": \"interactive\""));
    assert!(delivered[0].contains("job [sync] execution failed"));
    assert!(delivered[0].contains("<at email='' >ops</at>"));
}

#[tokio::test]
async fn unconfigured_mail_channel_never_blocks_the_queue() {
    let (addr, payloads) = serve_hook().await;
    let (notifier, _delivery) = Dispatcher::new(&webhook_config(addr, "")).spawn();

    let mut mail = message("mail subject", "mail body");
    mail.channel = NotifyChannel::Mail;
    notifier.submit(mail).await;
    notifier.submit(message("after mail", "still flowing")).await;

    // the mail message is dropped, the webhook one still drains
    let delivered = wait_for_payloads(&payloads, 1).await;
    assert!(delivered[0].contains("after mail"));
}

#[tokio::test]
async fn multiple_messages_are_all_delivered() {
    let (addr, payloads) = serve_hook().await;
    let (notifier, _delivery) = Dispatcher::new(&webhook_config(addr, "")).spawn();

    for i in 0..5 {
        notifier.submit(message(&format!("subject-{i}"), "b")).await;
    }

    let delivered = wait_for_payloads(&payloads, 5).await;
    assert_eq!(delivered.len(), 5);
}
