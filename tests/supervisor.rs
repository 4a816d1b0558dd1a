// tests/supervisor.rs

mod common;
use crate::common::{FakeWorkerBuilder, FetchOutcome, ScriptedConfigurationSource};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

use calcnode::errors::CalcNodeError;
use calcnode::exec::FunctionRegistry;
use calcnode::protocol::{NodeMessage, decode_message};
use calcnode::supervisor::{
    CalcNodeWorkerBuilder, ConfigurationSource, Escalation, EscalationPolicy,
    HttpConfigurationSource, RetryPolicy, Supervisor, SupervisorExit, SupervisorSettings,
};
use calcnode::transport;

type TestResult = Result<(), Box<dyn Error>>;

const URL: &str = "http://coordinator.test:9000/config/node.toml";
const DOCUMENT: &str = "[node]\nid = \"node-a\"\ncapacity = 1\n";
const CHANGED_DOCUMENT: &str = "[node]\nid = \"node-a\"\ncapacity = 2\n";

fn settings(shutdown_after: u32) -> SupervisorSettings {
    SupervisorSettings {
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy {
            attempts: 5,
            sleep: Duration::from_millis(5),
        },
        escalation: EscalationPolicy::shutdown_after(shutdown_after),
    }
}

fn supervisor(
    source: &Arc<ScriptedConfigurationSource>,
    builder: &FakeWorkerBuilder,
    settings: SupervisorSettings,
) -> Supervisor {
    let source: Arc<dyn ConfigurationSource> = source.clone();
    Supervisor::new(URL, source, Arc::new(builder.clone()), settings)
}

#[tokio::test]
async fn startup_retries_until_the_configuration_is_served() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([
        FetchOutcome::status(500),
        FetchOutcome::status(500),
        FetchOutcome::document(DOCUMENT),
    ]));
    let builder = FakeWorkerBuilder::new();
    let mut supervisor = supervisor(&source, &builder, settings(4));

    let exit = with_timeout(supervisor.run(sleep(Duration::from_millis(30)))).await?;

    assert_eq!(exit, SupervisorExit::Interrupted);
    let built = builder.built_configs();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].node.id, "node-a");
    assert_eq!(built[0].coordinator.host, "coordinator.test");
    assert_eq!(built[0].coordinator.port, 9000);
    assert!(source.fetch_count() >= 3);
    assert!(builder.shutdown_requested());
    Ok(())
}

#[tokio::test]
async fn startup_gives_up_after_every_attempt_fails() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::status(503)]));
    let builder = FakeWorkerBuilder::new();
    let mut settings = settings(4);
    settings.retry.attempts = 3;
    let mut supervisor = supervisor(&source, &builder, settings);

    let err = with_timeout(supervisor.run(pending())).await.unwrap_err();

    match err {
        CalcNodeError::ConfigurationUnavailable { url, attempts } => {
            assert_eq!(url, URL);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected ConfigurationUnavailable, got {other:?}"),
    }
    assert_eq!(source.fetch_count(), 3);
    assert!(builder.built_configs().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_changed_document_retires_the_node() -> TestResult {
    init_tracing();

    let mut script = vec![FetchOutcome::document(DOCUMENT)];
    script.extend((0..10).map(|_| FetchOutcome::document(DOCUMENT)));
    script.push(FetchOutcome::document(CHANGED_DOCUMENT));
    let source = Arc::new(ScriptedConfigurationSource::new(script));
    let builder = FakeWorkerBuilder::new();
    let mut supervisor = supervisor(&source, &builder, settings(4));

    let exit = with_timeout(supervisor.run(pending())).await?;

    assert_eq!(exit, SupervisorExit::ConfigurationChanged);
    assert_eq!(supervisor.polls(), 11);
    assert_eq!(source.fetch_count(), 12);
    assert!(builder.shutdown_requested());
    assert_eq!(exit.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn repeated_poll_failures_escalate_to_shutdown() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([
        FetchOutcome::document(DOCUMENT),
        FetchOutcome::Unavailable("connection refused".to_string()),
    ]));
    let builder = FakeWorkerBuilder::new();
    let mut supervisor = supervisor(&source, &builder, settings(3));

    let exit = with_timeout(supervisor.run(pending())).await?;

    assert_eq!(exit, SupervisorExit::ConfigurationUnreachable);
    assert_eq!(supervisor.polls(), 3);
    assert!(builder.shutdown_requested());
    Ok(())
}

#[tokio::test]
async fn a_successful_poll_resets_the_failure_count() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([
        FetchOutcome::document(DOCUMENT),
        FetchOutcome::status(500),
        FetchOutcome::status(500),
        FetchOutcome::document(DOCUMENT),
        FetchOutcome::status(500),
        FetchOutcome::status(500),
        FetchOutcome::document(CHANGED_DOCUMENT),
    ]));
    let builder = FakeWorkerBuilder::new();
    let mut supervisor = supervisor(&source, &builder, settings(3));

    let exit = with_timeout(supervisor.run(pending())).await?;

    assert_eq!(exit, SupervisorExit::ConfigurationChanged);
    assert_eq!(supervisor.polls(), 6);
    Ok(())
}

#[tokio::test]
async fn a_worker_that_stops_ends_supervision() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        DOCUMENT,
    )]));
    let builder = FakeWorkerBuilder::new().stopping_after(Duration::from_millis(25));
    let mut supervisor = supervisor(&source, &builder, settings(4));

    let exit = with_timeout(supervisor.run(pending())).await?;

    assert_eq!(exit, SupervisorExit::WorkerStopped);
    assert!(supervisor.polls() >= 1);
    assert!(!builder.shutdown_requested());
    Ok(())
}

#[tokio::test]
async fn startup_failures_are_fatal() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        DOCUMENT,
    )]));
    let failing = FakeWorkerBuilder::new().failing();
    let err = with_timeout(supervisor(&source, &failing, settings(4)).run(pending()))
        .await
        .unwrap_err();
    assert!(matches!(err, CalcNodeError::WorkerBuild(_)));

    let invalid = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        "[node]\ncapacity = 0\n",
    )]));
    let builder = FakeWorkerBuilder::new();
    let err = with_timeout(supervisor(&invalid, &builder, settings(4)).run(pending()))
        .await
        .unwrap_err();
    assert!(matches!(err, CalcNodeError::ConfigError(_)));
    assert!(builder.built_configs().is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_poll_interval_is_rejected_before_fetching() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        DOCUMENT,
    )]));
    let builder = FakeWorkerBuilder::new();
    let zero = SupervisorSettings {
        poll_interval: Duration::ZERO,
        ..settings(4)
    };

    let err = with_timeout(supervisor(&source, &builder, zero).run(pending()))
        .await
        .unwrap_err();

    assert!(matches!(err, CalcNodeError::ConfigError(ref m) if m.contains("poll interval")));
    assert_eq!(source.fetch_count(), 0);
    assert!(builder.built_configs().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_worker_error_during_interrupt_is_fatal() -> TestResult {
    init_tracing();

    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        DOCUMENT,
    )]));
    let builder = FakeWorkerBuilder::new().failing_on_shutdown();
    let mut supervisor = supervisor(&source, &builder, settings(4));

    let err = with_timeout(supervisor.run(sleep(Duration::from_millis(20))))
        .await
        .unwrap_err();

    assert!(matches!(err, CalcNodeError::WorkerBuild(_)));
    assert!(builder.shutdown_requested());
    Ok(())
}

#[tokio::test]
async fn unreachable_coordinator_fails_startup_immediately() -> TestResult {
    init_tracing();

    // Reserve a port, then free it so nothing is listening there.
    let port = TcpListener::bind("127.0.0.1:0").await?.local_addr()?.port();
    let document = format!(
        "[node]\nid = \"orphan\"\ncapacity = 1\n\n[coordinator]\nhost = \"127.0.0.1\"\nport = {port}\n"
    );
    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        &document,
    )]));
    let mut supervisor = Supervisor::new(
        URL,
        source,
        Arc::new(CalcNodeWorkerBuilder::new(FunctionRegistry::with_builtins())),
        SupervisorSettings {
            poll_interval: Duration::from_secs(60),
            ..settings(4)
        },
    );

    let started = std::time::Instant::now();
    // An interrupt arriving first would mask a late startup failure.
    let err = with_timeout(supervisor.run(sleep(Duration::from_secs(5))))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        CalcNodeError::WorkerBuild(reason) => {
            assert!(reason.contains(&format!("127.0.0.1:{port}")), "{reason}");
        }
        other => panic!("expected a worker start failure, got {other:?}"),
    }
    assert_eq!(supervisor.polls(), 0);
    Ok(())
}

#[test]
fn escalation_thresholds_classify_failures() {
    let policy = EscalationPolicy::default();
    assert_eq!(policy.classify(1), Escalation::Info);
    assert_eq!(policy.classify(2), Escalation::Warn);
    assert_eq!(policy.classify(3), Escalation::Error);
    assert_eq!(policy.classify(4), Escalation::Shutdown);
    assert_eq!(policy.classify(40), Escalation::Shutdown);

    let eager = EscalationPolicy::shutdown_after(1);
    assert_eq!(eager.shutdown_at(), 1);
    assert_eq!(eager.classify(1), Escalation::Shutdown);

    let clamped = EscalationPolicy::new(9, 7, 0);
    assert_eq!(clamped.shutdown_at(), 1);
    assert_eq!(clamped.classify(1), Escalation::Shutdown);
}

/// Serves a fixed sequence of HTTP statuses, then 200 with `body` forever.
async fn serve_http(
    listener: TcpListener,
    failures: Vec<u16>,
    body: &'static str,
    hits: Arc<AtomicUsize>,
) {
    let mut failures = failures.into_iter();
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        hits.fetch_add(1, Ordering::SeqCst);

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let response = match failures.next() {
            Some(status) => format!(
                "HTTP/1.1 {status} Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            ),
            None => format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            ),
        };
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

#[tokio::test]
async fn http_source_treats_error_statuses_as_unavailable() -> TestResult {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/config.toml", listener.local_addr()?);
    let hits = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(serve_http(listener, vec![500, 500], DOCUMENT, Arc::clone(&hits)));

    let builder = FakeWorkerBuilder::new();
    let mut supervisor = Supervisor::new(
        url,
        Arc::new(HttpConfigurationSource::with_timeout(Duration::from_secs(2))?),
        Arc::new(builder.clone()),
        SupervisorSettings {
            poll_interval: Duration::from_secs(60),
            ..settings(4)
        },
    );

    let exit = with_timeout(supervisor.run(sleep(Duration::from_millis(20)))).await?;

    assert_eq!(exit, SupervisorExit::Interrupted);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let built = builder.built_configs();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].coordinator.host, "127.0.0.1");

    server.abort();
    Ok(())
}

#[tokio::test]
async fn supervised_node_reaches_its_coordinator() -> TestResult {
    init_tracing();

    let coordinator = TcpListener::bind("127.0.0.1:0").await?;
    let port = coordinator.local_addr()?.port();
    let document = format!(
        "[node]\nid = \"supervised\"\ncapacity = 1\n\n[coordinator]\nhost = \"127.0.0.1\"\nport = {port}\n"
    );
    let source = Arc::new(ScriptedConfigurationSource::new([FetchOutcome::document(
        &document,
    )]));
    let mut supervisor = Supervisor::new(
        URL,
        source,
        Arc::new(CalcNodeWorkerBuilder::new(FunctionRegistry::with_builtins())),
        settings(4),
    );

    let coordinator_task = tokio::spawn(async move {
        let (stream, _) = coordinator.accept().await.map_err(|e| e.to_string())?;
        let (mut reader, writer) = transport::split(stream, 1024 * 1024);
        let frame = reader
            .next_frame()
            .await
            .map_err(|e| e.to_string())?
            .ok_or("closed before READY")?;
        let ready = decode_message(&frame).map_err(|e| e.to_string())?;
        // Keep the connection open until the node closes it.
        while let Ok(Some(_)) = reader.next_frame().await {}
        drop(writer);
        Ok::<NodeMessage, String>(ready)
    });

    let exit = with_timeout(supervisor.run(sleep(Duration::from_millis(100)))).await?;
    assert_eq!(exit, SupervisorExit::Interrupted);

    match with_timeout(coordinator_task).await? {
        Ok(NodeMessage::Ready(ready)) => {
            assert_eq!(ready.node_id, "supervised");
            assert_eq!(ready.capacity, 1);
        }
        other => panic!("expected READY, got {other:?}"),
    }
    Ok(())
}
