mod common;

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use agentlog::{
    FileSinkConfig, LoggerFactory, LoggingConfig, RemoteSinkConfig, SinkConfig,
};
use common::{RecordingTransport, SlowTransport};

#[test]
fn concurrent_first_requests_build_exactly_one_chain() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(LoggerFactory::new());
    factory
        .register_config(LoggingConfig::new("svc").with_sinks(vec![SinkConfig::File(
            FileSinkConfig {
                dir: dir.path().to_path_buf(),
                ..FileSinkConfig::default()
            },
        )]))
        .unwrap();

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let factory = factory.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                factory.get_logger("svc", None)
            })
        })
        .collect();

    let loggers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for logger in &loggers[1..] {
        assert!(loggers[0].same_instance(logger));
    }

    // One chain means one physical file was opened, not sixteen.
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn full_async_queue_sheds_records_without_blocking_the_producer() {
    let factory = LoggerFactory::builder()
        .with_transport(Arc::new(SlowTransport {
            delay: Duration::from_millis(5),
        }))
        .with_queue_capacity(8)
        .build();
    factory
        .register_config(
            LoggingConfig::new("svc")
                .with_sinks(vec![SinkConfig::Remote(RemoteSinkConfig {
                    batch_size: 1,
                    ..RemoteSinkConfig::default()
                })])
                .with_async_enabled(true),
        )
        .unwrap();

    let handle = factory.get_logger("svc", None);
    let mut slowest_call = Duration::ZERO;
    for i in 0..500 {
        let started = Instant::now();
        handle.info(&format!("flood {i}"));
        slowest_call = slowest_call.max(started.elapsed());
    }

    assert!(
        slowest_call < Duration::from_millis(50),
        "producer blocked for {slowest_call:?}"
    );
    assert!(factory.metrics().records_dropped > 0);
    factory.shutdown();
}

#[test]
fn async_mode_delivers_queued_records_before_shutdown_returns() {
    let transport = RecordingTransport::new();
    let factory = LoggerFactory::builder()
        .with_transport(transport.clone())
        .build();
    factory
        .register_config(
            LoggingConfig::new("svc")
                .with_sinks(vec![SinkConfig::Remote(RemoteSinkConfig {
                    batch_size: 1,
                    ..RemoteSinkConfig::default()
                })])
                .with_async_enabled(true),
        )
        .unwrap();

    let handle = factory.get_logger("svc", None);
    for i in 0..50 {
        handle.info(&format!("queued {i}"));
    }
    factory.shutdown();

    assert_eq!(transport.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logging_from_async_tasks_is_safe_and_complete() {
    let transport = RecordingTransport::new();
    let factory = Arc::new(
        LoggerFactory::builder()
            .with_transport(transport.clone())
            .build(),
    );
    factory
        .register_config(
            LoggingConfig::new("svc").with_sinks(vec![SinkConfig::Remote(RemoteSinkConfig {
                batch_size: 1,
                ..RemoteSinkConfig::default()
            })]),
        )
        .unwrap();

    let mut tasks = Vec::new();
    for task in 0..8 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            let handle = factory.get_logger("svc", None);
            for i in 0..25 {
                handle.info(&format!("task {task} record {i}"));
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(transport.len(), 8 * 25);
    assert_eq!(factory.metrics().records_total, 8 * 25);
}
