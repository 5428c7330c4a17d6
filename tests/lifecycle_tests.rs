use async_trait::async_trait;
use hexagon::error::{Error, Result};
use hexagon::event::{EventHandler, PluginEvent};
use hexagon::lifecycle::{HealthChecker, Lifecycle};
use hexagon::plugin::{
    ConfigMap, HealthStatus, Plugin, PluginDescriptor, PluginState, PluginType,
};
use hexagon::registry::PluginRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct TestPlugin {
    descriptor: PluginDescriptor,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestPlugin {
    fn new(name: &str, dependencies: &[&str]) -> Self {
        let mut descriptor = PluginDescriptor::new(name, "1.0.0", PluginType::Extension);
        for dep in dependencies {
            descriptor = descriptor.with_dependency(*dep);
        }
        Self {
            descriptor,
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        self.descriptor.clone()
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::MissingConfig("start refused".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy()
    }
}

async fn registered(
    plugins: Vec<Arc<TestPlugin>>,
) -> (Arc<PluginRegistry>, Lifecycle) {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = Arc::new(PluginRegistry::new());
    for plugin in plugins {
        registry.register(plugin).await.unwrap();
    }
    let lifecycle = Lifecycle::new(registry.clone());
    lifecycle.init_all(&HashMap::new()).await.unwrap();
    (registry, lifecycle)
}

#[tokio::test]
async fn start_all_honors_dependencies_and_stop_guards_dependents() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let b = Arc::new(TestPlugin::new("b", &["a"]));
    let (registry, lifecycle) = registered(vec![a.clone(), b.clone()]).await;

    lifecycle.start_all().await.unwrap();
    assert_eq!(
        registry.get_instance("a").await.unwrap().state,
        PluginState::Running
    );
    assert_eq!(
        registry.get_instance("b").await.unwrap().state,
        PluginState::Running
    );

    // Stopping the dependency while its dependent runs is refused.
    let err = lifecycle.stop("a").await.unwrap_err();
    match err {
        Error::HasDependents { dependents, .. } => {
            assert_eq!(dependents, vec!["b".to_string()]);
        }
        other => panic!("expected HasDependents, got {other:?}"),
    }

    lifecycle.stop("b").await.unwrap();
    lifecycle.stop("a").await.unwrap();
    assert_eq!(a.stops.load(Ordering::SeqCst), 1);
    assert_eq!(b.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_requires_running_dependencies() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let b = Arc::new(TestPlugin::new("b", &["a"]));
    let (_registry, lifecycle) = registered(vec![a, b]).await;

    let err = lifecycle.start("b").await.unwrap_err();
    assert!(matches!(err, Error::DependencyNotReady { .. }));

    lifecycle.start("a").await.unwrap();
    lifecycle.start("b").await.unwrap();
}

#[tokio::test]
async fn init_requires_loaded_state() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let registry = Arc::new(PluginRegistry::new());
    registry.register(a).await.unwrap();
    let lifecycle = Lifecycle::new(registry.clone());

    lifecycle.init("a", ConfigMap::new()).await.unwrap();
    let err = lifecycle.init("a", ConfigMap::new()).await.unwrap_err();
    assert!(matches!(err, Error::WrongState { .. }));
}

#[tokio::test]
async fn start_failure_lands_in_error_state_and_restart_recovers() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let (registry, lifecycle) = registered(vec![a.clone()]).await;

    a.fail_start.store(true, Ordering::SeqCst);
    assert!(lifecycle.start("a").await.is_err());
    let snapshot = registry.get_instance("a").await.unwrap();
    assert_eq!(snapshot.state, PluginState::Error);
    assert!(snapshot.last_error.is_some());

    // Restart is the sanctioned way out of Error: Stopped, then Start.
    a.fail_start.store(false, Ordering::SeqCst);
    lifecycle.restart("a").await.unwrap();
    assert_eq!(
        registry.get_instance("a").await.unwrap().state,
        PluginState::Running
    );
}

#[tokio::test]
async fn stop_all_walks_reverse_start_order_best_effort() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let b = Arc::new(TestPlugin::new("b", &["a"]));
    let c = Arc::new(TestPlugin::new("c", &["b"]));
    let (registry, lifecycle) = registered(vec![c.clone(), b.clone(), a.clone()]).await;

    lifecycle.start_all().await.unwrap();
    lifecycle.stop_all().await.unwrap();

    for name in ["a", "b", "c"] {
        assert_eq!(
            registry.get_instance(name).await.unwrap().state,
            PluginState::Stopped,
            "plugin {name}"
        );
    }
}

#[tokio::test]
async fn unregister_refuses_running_plugins() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let (registry, lifecycle) = registered(vec![a]).await;
    lifecycle.start("a").await.unwrap();

    let err = registry.unregister("a").await.unwrap_err();
    assert!(matches!(err, Error::WrongState { .. }));

    lifecycle.stop("a").await.unwrap();
    registry.unregister("a").await.unwrap();
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let registry = PluginRegistry::new();
    registry
        .register(Arc::new(TestPlugin::new("dup", &[])))
        .await
        .unwrap();
    let err = registry
        .register(Arc::new(TestPlugin::new("dup", &[])))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate(_)));
}

#[tokio::test]
async fn list_queries_return_sorted_snapshots() {
    let registry = PluginRegistry::new();
    for name in ["zeta", "alpha", "midd"] {
        registry
            .register(Arc::new(TestPlugin::new(name, &[])))
            .await
            .unwrap();
    }
    let names: Vec<String> = registry
        .list()
        .await
        .into_iter()
        .map(|s| s.descriptor.name)
        .collect();
    assert_eq!(names, vec!["alpha", "midd", "zeta"]);

    assert_eq!(
        registry.list_by_state(PluginState::Loaded).await.len(),
        3
    );
    assert_eq!(
        registry
            .list_by_type(PluginType::Extension)
            .await
            .len(),
        3
    );
}

#[tokio::test]
async fn factories_create_instances_on_demand() {
    let registry = PluginRegistry::new();
    registry
        .register_factory("maker", Arc::new(|| Arc::new(TestPlugin::new("made", &[]))))
        .await
        .unwrap();
    assert_eq!(registry.list_factories().await, vec!["maker".to_string()]);

    registry.create_from_factory("maker").await.unwrap();
    assert!(registry.has("made").await);

    assert!(matches!(
        registry.create_from_factory("unknown").await.unwrap_err(),
        Error::NotFound(_)
    ));
    registry.unregister_factory("maker").await.unwrap();
    assert!(registry.list_factories().await.is_empty());
}

struct CollectingHandler {
    events: StdMutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn on_plugin_event(&self, event: &PluginEvent) {
        let label = match event {
            PluginEvent::Loaded { name } => format!("loaded:{name}"),
            PluginEvent::Unloaded { name } => format!("unloaded:{name}"),
            PluginEvent::StateChanged { name, to, .. } => format!("state:{name}:{to}"),
            PluginEvent::HealthChecked { name, .. } => format!("health:{name}"),
            other => format!("other:{other:?}"),
        };
        self.events.lock().expect("events lock").push(label);
    }
}

#[tokio::test]
async fn state_changes_emit_events() {
    let handler = Arc::new(CollectingHandler {
        events: StdMutex::new(Vec::new()),
    });
    let registry = Arc::new(PluginRegistry::new());
    registry.on_event(handler.clone()).await;

    registry
        .register(Arc::new(TestPlugin::new("p", &[])))
        .await
        .unwrap();
    let lifecycle = Lifecycle::new(registry.clone());
    lifecycle.init("p", ConfigMap::new()).await.unwrap();
    lifecycle.start("p").await.unwrap();

    // Event dispatch is detached; give the handler tasks a beat to run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = handler.events.lock().expect("events lock").clone();
    assert!(events.contains(&"loaded:p".to_string()));
    assert!(events.contains(&"state:p:initialized".to_string()));
    assert!(events.contains(&"state:p:running".to_string()));
}

#[tokio::test]
async fn health_checker_reports_unknown_for_non_running() {
    let a = Arc::new(TestPlugin::new("a", &[]));
    let b = Arc::new(TestPlugin::new("b", &[]));
    let (registry, lifecycle) = registered(vec![a, b]).await;
    lifecycle.start("a").await.unwrap();

    let checker = HealthChecker::new(registry.clone());
    let statuses = checker.check_now().await;
    assert_eq!(statuses["a"], HealthStatus::Healthy);
    assert!(matches!(statuses["b"], HealthStatus::Unknown { .. }));
}

#[tokio::test]
async fn health_checker_stop_is_idempotent() {
    let registry = Arc::new(PluginRegistry::new());
    let checker = Arc::new(
        HealthChecker::new(registry).with_interval(Duration::from_millis(10)),
    );
    checker.start(CancellationToken::new());

    // Concurrent and repeated stops must all be safe.
    let clones: Vec<_> = (0..4).map(|_| checker.clone()).collect();
    let handles: Vec<_> = clones
        .into_iter()
        .map(|c| tokio::spawn(async move { c.stop() }))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    checker.stop();
}

#[tokio::test]
async fn circular_dependencies_fail_start_all() {
    let a = Arc::new(TestPlugin::new("a", &["b"]));
    let b = Arc::new(TestPlugin::new("b", &["a"]));
    let (_registry, lifecycle) = registered(vec![a, b]).await;

    let err = lifecycle.start_all().await.unwrap_err();
    match err {
        Error::CircularDependency { cycle } => assert!(!cycle.is_empty()),
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}
