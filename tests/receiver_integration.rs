mod common;

use async_trait::async_trait;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tasker_queue::{
    Broker, FactoryDependency, FailureKind, InMemoryResultBackend, Middleware, Param, ParamType,
    Receiver, ReceiverConfig, ResultBackend, TaskKicker, TaskMessage, TaskRegistration,
    TaskRegistry, TaskResult,
};

#[tokio::test]
async fn test_add_returns_sum_end_to_end() {
    let registry = TaskRegistry::builder().register(add_task()).build().unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let (shutdown, worker) = start_worker(broker.clone(), ReceiverConfig::default());

    let handle = TaskKicker::new(broker.clone(), "add")
        .kiq(vec![json!(2), json!(3)], Map::new())
        .await
        .unwrap();
    let result = wait(&handle).await;

    assert!(!result.is_err());
    assert_eq!(result.return_value(), Some(&json!(5)));
    assert_eq!(result.return_value_as::<i64>().unwrap(), 5);

    shutdown.shutdown();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unregistered_task_records_error_without_progress() {
    let backend = CountingBackend::new();
    let broker = broker_with(TaskRegistry::default(), backend.clone(), vec![]);
    let receiver = Receiver::new(broker.clone(), ReceiverConfig::default());

    let result = receiver.callback(TaskMessage::new("g1", "ghost")).await;
    assert!(result.is_err());
    assert_eq!(result.error().unwrap().kind, FailureKind::NotFound);

    let stored = backend.get_result("g1").await.unwrap().unwrap();
    assert!(stored.is_err());
    assert_eq!(backend.set_result_calls("g1"), 1);
    assert!(backend.get_progress("g1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_domain_failure_is_persisted_exactly_once() {
    let backend = CountingBackend::new();
    let registry = TaskRegistry::builder()
        .register(withdraw_task())
        .build()
        .unwrap();
    let broker = broker_with(registry, backend.clone(), vec![]);
    let (shutdown, worker) = start_worker(broker.clone(), ReceiverConfig::default());

    let handle = TaskKicker::new(broker.clone(), "withdraw")
        .kiq(vec![json!(100)], Map::new())
        .await
        .unwrap();
    let result = wait(&handle).await;

    let info = result.error().unwrap();
    assert_eq!(info.kind, FailureKind::Execution);
    assert_eq!(info.error_type, "InsufficientFunds");
    assert!(info.message.contains("cannot withdraw 100"));
    assert!(!info.retryable);

    shutdown.shutdown();
    worker.await.unwrap().unwrap();
    assert_eq!(backend.set_result_calls(handle.task_id()), 1);
}

#[tokio::test]
async fn test_invalid_arguments_have_no_side_effects() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let registry = TaskRegistry::builder()
        .register(TaskRegistration::new_async(
            "count",
            vec![Param::required("n", ParamType::Integer)],
            move |_args| {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
            },
        ))
        .build()
        .unwrap();
    let backend = CountingBackend::new();
    let broker = broker_with(registry, backend.clone(), vec![]);
    let receiver = Receiver::new(broker, ReceiverConfig::default());

    let bad = vec![
        TaskMessage::new("b1", "count"),
        TaskMessage::new("b2", "count").with_args(vec![json!("seven")]),
        TaskMessage::new("b3", "count").with_args(vec![json!(1), json!(2)]),
        TaskMessage::new("b4", "count").with_kwarg("m", json!(1)),
    ];
    for message in bad {
        let task_id = message.task_id.clone();
        let result = receiver.callback(message).await;
        assert_eq!(result.error().unwrap().kind, FailureKind::Resolution, "{task_id}");
        assert_eq!(backend.set_result_calls(&task_id), 1);
        assert!(backend.get_progress(&task_id).await.unwrap().is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_toggle_allows_loose_types() {
    let registry = TaskRegistry::builder()
        .register(TaskRegistration::new_async(
            "echo",
            vec![Param::required("value", ParamType::Integer)],
            |args| async move { Ok(args.value("value").cloned()) },
        ))
        .build()
        .unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let receiver = Receiver::new(
        broker,
        ReceiverConfig {
            validate_params: false,
            ..ReceiverConfig::default()
        },
    );

    let result = receiver
        .callback(TaskMessage::new("e1", "echo").with_args(vec![json!("text")]))
        .await;
    assert_eq!(result.return_value(), Some(&json!("text")));
}

/// Tracks executions between `pre_execute` and `post_save`
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

#[async_trait]
impl Middleware for Gauge {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn pre_execute(&self, message: TaskMessage) -> anyhow::Result<TaskMessage> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        Ok(message)
    }

    async fn post_save(&self, _message: &TaskMessage, _result: &TaskResult) -> anyhow::Result<()> {
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_limit_bounds_concurrent_executions() {
    const LIMIT: usize = 3;
    const MESSAGES: usize = 12;

    let registry = TaskRegistry::builder()
        .register(TaskRegistration::new_async("nap", Vec::<Param>::new(), |_args| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }))
        .build()
        .unwrap();
    let gauge = Arc::new(Gauge::default());
    let broker = broker_with(
        registry,
        Arc::new(InMemoryResultBackend::new()),
        vec![gauge.clone() as Arc<dyn Middleware>],
    );
    let (shutdown, worker) = start_worker(
        broker.clone(),
        ReceiverConfig {
            max_async_tasks: Some(LIMIT),
            ..ReceiverConfig::default()
        },
    );

    let mut handles = Vec::new();
    for _ in 0..MESSAGES {
        handles.push(
            TaskKicker::new(broker.clone(), "nap")
                .kiq(Vec::new(), Map::new())
                .await
                .unwrap(),
        );
    }
    for handle in &handles {
        assert!(!wait(handle).await.is_err());
    }

    let max = gauge.max.load(Ordering::SeqCst);
    assert!(max >= 1 && max <= LIMIT, "observed {max} concurrent executions");

    shutdown.shutdown();
    worker.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_task_does_not_starve_async_lane() {
    let registry = TaskRegistry::builder()
        .register(add_task())
        .register(TaskRegistration::new_blocking(
            "crunch",
            Vec::<Param>::new(),
            |_args| {
                std::thread::sleep(Duration::from_millis(500));
                Ok("crunched")
            },
        ))
        .build()
        .unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let (shutdown, worker) = start_worker(
        broker.clone(),
        ReceiverConfig {
            max_blocking_workers: 1,
            ..ReceiverConfig::default()
        },
    );

    let slow = TaskKicker::new(broker.clone(), "crunch")
        .kiq(Vec::new(), Map::new())
        .await
        .unwrap();
    let fast = TaskKicker::new(broker.clone(), "add")
        .kiq(vec![json!(1), json!(1)], Map::new())
        .await
        .unwrap();

    let fast_result = fast
        .wait_result(Duration::from_millis(5), Duration::from_millis(400))
        .await
        .unwrap();
    assert_eq!(fast_result.return_value(), Some(&json!(2)));
    assert!(!slow.is_ready().await.unwrap());

    assert_eq!(wait(&slow).await.return_value(), Some(&json!("crunched")));
    shutdown.shutdown();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_panicking_task_becomes_error_and_loop_survives() {
    let registry = TaskRegistry::builder()
        .register(add_task())
        .register(TaskRegistration::new_async(
            "explode",
            Vec::<Param>::new(),
            |_args| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            },
        ))
        .register(TaskRegistration::new_blocking(
            "explode_blocking",
            Vec::<Param>::new(),
            |_args| -> anyhow::Result<()> { panic!("blocking kaboom") },
        ))
        .build()
        .unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let (shutdown, worker) = start_worker(broker.clone(), ReceiverConfig::default());

    for (task, expected) in [("explode", "kaboom"), ("explode_blocking", "blocking kaboom")] {
        let handle = TaskKicker::new(broker.clone(), task)
            .kiq(Vec::new(), Map::new())
            .await
            .unwrap();
        let result = wait(&handle).await;
        let info = result.error().unwrap();
        assert_eq!(info.kind, FailureKind::Panic);
        assert!(info.message.contains(expected));
        assert!(!info.retryable);
    }

    let handle = TaskKicker::new(broker.clone(), "add")
        .kiq(vec![json!(4), json!(5)], Map::new())
        .await
        .unwrap();
    assert_eq!(wait(&handle).await.return_value(), Some(&json!(9)));

    shutdown.shutdown();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_config_timeout_applies_without_label() {
    let registry = TaskRegistry::builder()
        .register(TaskRegistration::new_async("hang", Vec::<Param>::new(), |_args| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }))
        .build()
        .unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let receiver = Receiver::new(
        broker,
        ReceiverConfig {
            task_timeout_ms: Some(30),
            ..ReceiverConfig::default()
        },
    );

    let result = receiver.callback(TaskMessage::new("h1", "hang")).await;
    let info = result.error().unwrap();
    assert_eq!(info.kind, FailureKind::Timeout);
    assert!(info.retryable);
}

#[tokio::test]
async fn test_requeue_skips_persistence_until_final_attempt() {
    let registry = TaskRegistry::builder()
        .register(TaskRegistration::new_async(
            "patient",
            vec![Param::context("ctx")],
            |args| async move {
                let ctx = args.context("ctx")?;
                if ctx.message().label("requeue_count").is_none() {
                    return Err(ctx.requeue().await);
                }
                Ok("ready")
            },
        ))
        .build()
        .unwrap();
    let backend = CountingBackend::new();
    let broker = broker_with(registry, backend.clone(), vec![]);
    let (shutdown, worker) = start_worker(broker.clone(), ReceiverConfig::default());

    let handle = TaskKicker::new(broker.clone(), "patient")
        .kiq(Vec::new(), Map::new())
        .await
        .unwrap();
    let result = wait(&handle).await;
    assert_eq!(result.return_value(), Some(&json!("ready")));
    assert_eq!(result.labels().get("requeue_count").map(String::as_str), Some("1"));

    shutdown.shutdown();
    worker.await.unwrap().unwrap();
    assert_eq!(backend.set_result_calls(handle.task_id()), 1);
}

#[tokio::test]
async fn test_providers_resolve_once_per_invocation() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let registry = TaskRegistry::builder()
        .provider(
            "base",
            Arc::new(FactoryDependency::new(Vec::<String>::new(), move |_scope| {
                Ok(counter.fetch_add(1, Ordering::SeqCst) as i64 + 40)
            })),
        )
        .provider(
            "plus_two",
            Arc::new(FactoryDependency::new(["base"], |scope| {
                Ok(*scope.get::<i64>("base")? + 2)
            })),
        )
        .register(TaskRegistration::new_async(
            "answer",
            vec![
                Param::depends("base", "base"),
                Param::depends("answer", "plus_two"),
                Param::depends("again", "base"),
            ],
            |args| async move {
                let base = *args.dependency::<i64>("base")?;
                let again = *args.dependency::<i64>("again")?;
                anyhow::ensure!(base == again, "provider resolved twice");
                Ok(*args.dependency::<i64>("answer")?)
            },
        ))
        .build()
        .unwrap();
    let broker = broker_with(registry, Arc::new(InMemoryResultBackend::new()), vec![]);
    let receiver = Receiver::new(broker, ReceiverConfig::default());

    let first = receiver.callback(TaskMessage::new("q1", "answer")).await;
    assert_eq!(first.return_value(), Some(&json!(42)));
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    let second = receiver.callback(TaskMessage::new("q2", "answer")).await;
    assert_eq!(second.return_value(), Some(&json!(43)));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undecodable_payload_is_dropped() {
    let broker = broker_with(TaskRegistry::default(), Arc::new(InMemoryResultBackend::new()), vec![]);
    let receiver = Receiver::new(broker.clone(), ReceiverConfig::default());

    assert!(receiver.decode(b"not json").is_none());
    assert_eq!(receiver.stats().decode_failures, 1);
    assert_eq!(broker.codec().name(), "json");
}
