//! Integration tests for slotwatch
//!
//! These drive the orchestrator against a local HTTP booking endpoint and
//! check what ends up on disk and in subscribers' inboxes.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use slotwatch::console::{self, ConsoleExit};
use slotwatch::monitoring::{HttpProber, Registry, Target};
use slotwatch::notify::{MessageSender, Notifier, SendError};
use slotwatch::orchestrator::{ALL_BOOKED_MESSAGE, STOPPED_MESSAGE, StartOutcome};
use slotwatch::{Orchestrator, RecipientId, StateStore};
use tokio::time::{sleep, timeout};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTERVAL: Duration = Duration::from_millis(20);
const DEADLINE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<(RecipientId, String)>>,
}

impl Inbox {
    fn texts(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait::async_trait]
impl MessageSender for Inbox {
    async fn send_message(&self, recipient: &RecipientId, text: &str) -> Result<(), SendError> {
        self.messages.lock().unwrap().push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

fn registry(server: &MockServer) -> Arc<Registry> {
    let url = format!("{}/widget/createBooking", server.uri());
    Arc::new(
        Registry::new([
            Target::new("43", "Khutorok", &url, json!({ "campingId": "43" })),
            Target::new("44", "Perevoloka", &url, json!({ "campingId": "44" })),
        ])
        .unwrap(),
    )
}

async fn open_store(state: &Path, registry: &Registry) -> Arc<StateStore> {
    Arc::new(StateStore::load(state, registry.ids()).await.unwrap())
}

fn build_orchestrator(
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    inbox: Arc<Inbox>,
) -> Orchestrator {
    let prober = Arc::new(HttpProber::new(Duration::from_secs(2)).unwrap());
    Orchestrator::new(registry, store, prober, Arc::new(Notifier::new(inbox)), INTERVAL)
}

async fn mount_pending(server: &MockServer, camping: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/widget/createBooking"))
        .and(body_partial_json(json!({ "campingId": camping })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "isSuccess": false, "message": "no free slots" })),
        )
        .up_to_n_times(times)
        .with_priority(1)
        .mount(server)
        .await;
}

async fn mount_success(server: &MockServer, camping: &str) {
    Mock::given(method("POST"))
        .and(path("/widget/createBooking"))
        .and(body_partial_json(json!({ "campingId": camping })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isSuccess": true })))
        .mount(server)
        .await;
}

async fn requests_for(server: &MockServer, camping: &str) -> usize {
    let needle = format!("\"campingId\":\"{camping}\"");
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| String::from_utf8_lossy(&request.body).contains(&needle))
        .count()
}

#[tokio::test]
async fn test_every_target_booked_once_and_cycle_closed() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    mount_pending(&server, "43", 2).await;
    mount_success(&server, "43").await;
    mount_success(&server, "44").await;

    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let registry = registry(&server);
    let store = open_store(&state, &registry).await;
    store.add_recipient("111".into()).await.unwrap();
    store.add_recipient("222".into()).await.unwrap();

    let inbox = Arc::new(Inbox::default());
    let orchestrator = build_orchestrator(registry.clone(), store, inbox.clone());

    assert_eq!(orchestrator.enable_polling().await.unwrap(), StartOutcome::Started);
    let reports = timeout(DEADLINE, orchestrator.wait_idle()).await.unwrap();
    assert!(reports.iter().any(|report| report.completed));

    assert_eq!(requests_for(&server, "43").await, 3);
    assert_eq!(requests_for(&server, "44").await, 1);

    let texts = inbox.texts();
    assert_eq!(texts.iter().filter(|text| text.contains("Khutorok")).count(), 2);
    assert_eq!(texts.iter().filter(|text| text.contains("Perevoloka")).count(), 2);
    assert_eq!(texts.iter().filter(|text| text.as_str() == ALL_BOOKED_MESSAGE).count(), 2);
    assert_eq!(texts.iter().filter(|text| text.as_str() == STOPPED_MESSAGE).count(), 2);

    // A fresh process sees the finished cycle
    let reloaded = open_store(&state, &registry).await;
    let persisted = reloaded.snapshot().await;
    assert!(!persisted.polling_enabled);
    assert!(registry.ids().all(|id| !persisted.is_target_active(id)));
    assert_eq!(persisted.recipients.len(), 2);

    let restarted = build_orchestrator(registry, reloaded, Arc::new(Inbox::default()));
    assert_eq!(restarted.enable_polling().await.unwrap(), StartOutcome::AllTargetsDone);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "campingId": "43" })))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "campingId": "43" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    mount_success(&server, "43").await;
    mount_success(&server, "44").await;

    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server);
    let store = open_store(&dir.path().join("state.json"), &registry).await;
    store.add_recipient("111".into()).await.unwrap();

    let inbox = Arc::new(Inbox::default());
    let orchestrator = build_orchestrator(registry, store, inbox.clone());

    orchestrator.enable_polling().await.unwrap();
    timeout(DEADLINE, orchestrator.wait_idle()).await.unwrap();

    assert_eq!(requests_for(&server, "43").await, 4);
    let texts = inbox.texts();
    assert_eq!(texts.iter().filter(|text| text.contains("Khutorok")).count(), 1);
    assert_eq!(texts[texts.len() - 2..], [ALL_BOOKED_MESSAGE, STOPPED_MESSAGE]);
}

#[tokio::test]
async fn test_stop_halts_probing_and_enable_resumes_after_restart() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    mount_pending(&server, "43", u64::MAX).await;
    mount_pending(&server, "44", u64::MAX).await;

    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let registry = registry(&server);
    let store = open_store(&state, &registry).await;
    store.add_recipient("111".into()).await.unwrap();

    let inbox = Arc::new(Inbox::default());
    let orchestrator = build_orchestrator(registry.clone(), store.clone(), inbox.clone());
    orchestrator.enable_polling().await.unwrap();

    timeout(DEADLINE, async {
        while requests_for(&server, "43").await < 2 {
            sleep(INTERVAL).await;
        }
    })
    .await
    .unwrap();

    orchestrator.disable_polling().await.unwrap();
    let reports = timeout(DEADLINE, orchestrator.wait_idle()).await.unwrap();
    assert!(reports.iter().all(|report| !report.completed && report.succeeded == 0));

    let probed = server.received_requests().await.unwrap_or_default().len();
    sleep(INTERVAL * 5).await;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), probed);
    assert_eq!(inbox.texts().last().map(String::as_str), Some(STOPPED_MESSAGE));

    // Stopped state survives a restart
    let reloaded = open_store(&state, &registry).await;
    let restarted = build_orchestrator(registry.clone(), reloaded.clone(), inbox.clone());
    assert!(!restarted.resume().await);

    // Enabled offline, picked up on the next start
    reloaded.set_polling_enabled(true).await.unwrap();
    let restarted = build_orchestrator(registry, reloaded, inbox);
    assert!(restarted.resume().await);

    timeout(DEADLINE, async {
        while server.received_requests().await.unwrap_or_default().len() <= probed {
            sleep(INTERVAL).await;
        }
    })
    .await
    .unwrap();

    restarted.disable_polling().await.unwrap();
    timeout(DEADLINE, restarted.wait_idle()).await.unwrap();
}

#[tokio::test]
async fn test_console_session() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server);
    let store = open_store(&dir.path().join("state.json"), &registry).await;
    let orchestrator = build_orchestrator(registry, store.clone(), Arc::new(Inbox::default()));

    let input: &[u8] = b"subscribe 555\nsubscribe 555\n\nfly\nstatus\nquit\nstatus\n";
    let mut output = Vec::new();

    let exit = console::run(&orchestrator, input, &mut output).await.unwrap();
    assert_eq!(exit, ConsoleExit::Quit);

    let output = String::from_utf8(output).unwrap();
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(lines[0], "Subscribed 555.");
    assert_eq!(lines[1], "555 is already subscribed.");
    assert!(lines[2].starts_with("unknown command \"fly\""));
    assert_eq!(lines[3], "Monitoring status:");
    assert!(output.contains("Khutorok [43]: in progress"));
    assert_eq!(output.matches("Monitoring status:").count(), 1);

    assert_eq!(store.recipients().await, vec![RecipientId::from("555")]);
}

#[tokio::test]
async fn test_console_stops_at_end_of_input() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server);
    let store = open_store(&dir.path().join("state.json"), &registry).await;
    let orchestrator = build_orchestrator(registry, store, Arc::new(Inbox::default()));

    let input: &[u8] = b"help\n";
    let mut output = Vec::new();

    let exit = console::run(&orchestrator, input, &mut output).await.unwrap();
    assert_eq!(exit, ConsoleExit::EndOfInput);
    assert!(String::from_utf8(output).unwrap().starts_with("Commands:"));
}
