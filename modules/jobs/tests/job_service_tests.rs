use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobs::email::{EmailClient, MailError, Mailer, OutgoingEmail, TemplateStore};
use jobs::{
    new_welcome_email_task, register_email_handlers, JobService, Task, TaskHandler,
    WelcomeEmailPayload,
};
use parking_lot::Mutex;
use runtime::JobsConfig;
use tracing_test::traced_test;

fn config(concurrency: usize) -> JobsConfig {
    JobsConfig {
        concurrency,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails the first `fail_first` calls, then succeeds.
struct Flaky {
    calls: AtomicU32,
    fail_first: u32,
}

impl Flaky {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for Flaky {
    async fn process(&self, _task: &Task) -> anyhow::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            anyhow::bail!("transient failure #{n}");
        }
        Ok(())
    }
}

#[tokio::test]
async fn runs_enqueued_task() {
    let handler = Flaky::new(0);
    let service = JobService::new(&config(4)).with_handler("noop", handler.clone());
    service.start();

    let info = service.client().enqueue(Task::new("noop", Vec::new())).unwrap();
    assert_eq!(info.queue, "default");

    wait_until(|| handler.calls() == 1).await;
    service.stop().await;
}

#[tokio::test]
async fn retries_until_success() {
    let handler = Flaky::new(2);
    let service = JobService::new(&config(1)).with_handler("flaky", handler.clone());
    service.start();

    service
        .client()
        .enqueue(Task::new("flaky", Vec::new()).max_retry(3))
        .unwrap();

    wait_until(|| handler.calls() == 3).await;
    service.stop().await;
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
#[traced_test]
async fn drops_task_after_max_retry() {
    let handler = Flaky::new(u32::MAX);
    let service = JobService::new(&config(1)).with_handler("doomed", handler.clone());
    service.start();

    service
        .client()
        .enqueue(Task::new("doomed", Vec::new()).max_retry(1))
        .unwrap();

    wait_until(|| handler.calls() == 2).await;
    service.stop().await;

    assert_eq!(handler.calls(), 2);
    assert!(logs_contain("task failed, scheduling retry"));
    assert!(logs_contain("task failed after exhausting retries"));
}

struct Sleepy {
    delay: Duration,
    started: AtomicBool,
    finished: AtomicBool,
}

#[async_trait]
impl TaskHandler for Sleepy {
    async fn process(&self, _task: &Task) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
#[traced_test]
async fn attempt_is_bounded_by_task_timeout() {
    let handler = Arc::new(Sleepy {
        delay: Duration::from_secs(5),
        started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });
    let service = JobService::new(&config(1)).with_handler("slow", handler.clone());
    service.start();

    service
        .client()
        .enqueue(
            Task::new("slow", Vec::new())
                .max_retry(0)
                .timeout(Duration::from_millis(20)),
        )
        .unwrap();

    wait_until(|| handler.started.load(Ordering::SeqCst)).await;
    tokio::time::timeout(Duration::from_secs(2), service.stop())
        .await
        .expect("stop should not wait for the full handler delay");

    assert!(!handler.finished.load(Ordering::SeqCst));
    assert!(logs_contain("timed out"));
}

#[tokio::test]
async fn stop_waits_for_in_flight_tasks() {
    let handler = Arc::new(Sleepy {
        delay: Duration::from_millis(50),
        started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });
    let service = JobService::new(&config(1)).with_handler("slow", handler.clone());
    service.start();
    service.client().enqueue(Task::new("slow", Vec::new())).unwrap();

    wait_until(|| handler.started.load(Ordering::SeqCst)).await;
    service.stop().await;
    assert!(handler.finished.load(Ordering::SeqCst));
}

struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
}

#[async_trait]
impl TaskHandler for Gauge {
    async fn process(&self, _task: &Task) -> anyhow::Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let handler = Arc::new(Gauge {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
    });
    let service = JobService::new(&config(2)).with_handler("work", handler.clone());
    let client = service.client();
    for queue in ["critical", "default", "low", "default", "critical", "low"] {
        client.enqueue(Task::new("work", Vec::new()).queue(queue)).unwrap();
    }
    service.start();

    wait_until(|| handler.done.load(Ordering::SeqCst) == 6).await;
    service.stop().await;
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
#[traced_test]
async fn unknown_task_type_is_dropped() {
    let service = JobService::new(&config(1));
    service.start();
    service.client().enqueue(Task::new("nobody:home", Vec::new())).unwrap();

    wait_until(|| logs_contain("no handler registered")).await;
    service.stop().await;
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

#[tokio::test]
#[traced_test]
async fn welcome_email_task_sends_rendered_template() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("welcome.html"),
        "<p>Welcome, {{UserFirstName}}!</p>",
    )
    .unwrap();

    let mailer = Arc::new(RecordingMailer::default());
    let email = Arc::new(EmailClient::new(
        mailer.clone(),
        TemplateStore::new(dir.path()),
        "Boilerplate <onboarding@resend.dev>",
    ));
    let service = register_email_handlers(JobService::new(&config(2)), email);
    service.start();

    let task = new_welcome_email_task("ada@example.com", "Ada <3").unwrap();
    assert_eq!(
        task.decode::<WelcomeEmailPayload>().unwrap().first_name,
        "Ada <3"
    );
    service.client().enqueue(task).unwrap();

    wait_until(|| mailer.sent.lock().len() == 1).await;
    service.stop().await;

    let sent = mailer.sent.lock().clone();
    assert_eq!(sent[0].to, vec!["ada@example.com".to_string()]);
    assert_eq!(sent[0].subject, "Welcome to Boilerplate!");
    assert_eq!(sent[0].from, "Boilerplate <onboarding@resend.dev>");
    assert_eq!(sent[0].html, "<p>Welcome, Ada &lt;3!</p>");
    assert!(logs_contain("processing welcome email task"));
}

#[tokio::test]
async fn bundled_welcome_template_renders() {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../templates/emails");
    let store = TemplateStore::new(dir);
    let data = BTreeMap::from([("UserFirstName".to_string(), "Grace".to_string())]);
    let html = store
        .render(jobs::email::Template::Welcome, &data)
        .await
        .unwrap();
    assert!(html.contains("Welcome, Grace!"));
    assert!(!html.contains("{{"));
}
