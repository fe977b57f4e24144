use fdbkube::fdbkube::api::cluster::{ClusterKey, FoundationDBCluster};
use fdbkube::fdbkube::controller::add_pods::AddPods;
use fdbkube::fdbkube::controller::cluster::ClusterController;
use fdbkube::fdbkube::controller::reconcile::{
    ClusterReconciler, ReconcileContext, ReconcileStep, Requeue,
};
use fdbkube::fdbkube::controller::runtime::ControllerRuntime;
use fdbkube::fdbkube::fdb::admin::{AdminClient, AdminClientError, AdminClientOracle};
use fdbkube::fdbkube::fdb::fixtures::{FixtureOracle, StaticAdminClient};
use fdbkube::fdbkube::k8s::store::ObjectStore;
use fdbkube::fdbkube::observability::metrics;
use fdbkube::fdbkube::test_support::{default_cluster, TestHarness, TEST_NAMESPACE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingStep {
    name: &'static str,
    runs: Arc<AtomicUsize>,
    requeue_first: Option<Requeue>,
}

impl ReconcileStep for CountingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn reconcile(&self, _: &ReconcileContext, _: &FoundationDBCluster) -> Option<Requeue> {
        let previous = self.runs.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.requeue_first.clone()
        } else {
            None
        }
    }
}

fn counting(
    name: &'static str,
    runs: &Arc<AtomicUsize>,
    requeue_first: Option<Requeue>,
) -> Box<dyn ReconcileStep> {
    Box::new(CountingStep {
        name,
        runs: Arc::clone(runs),
        requeue_first,
    })
}

#[tokio::test]
async fn run_once_creates_pods_for_stored_cluster() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    let controller = harness.controller();

    assert!(controller.run_once(&harness.key).await.is_none());
    assert_eq!(harness.pods().len(), 13);

    let exported = String::from_utf8(metrics::gather().expect("gather metrics"))
        .expect("utf8 metrics");
    assert!(exported.contains("fdbkube_controller_reconciles_total"));
    assert!(exported.contains("fdbkube_pods_created_total"));
}

#[tokio::test]
async fn run_once_ignores_missing_cluster() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    let controller = harness.controller();
    let missing = ClusterKey::new(Some(TEST_NAMESPACE), "deleted-cluster");

    assert!(controller.run_once(&missing).await.is_none());
    assert!(harness.pods().is_empty());
}

#[tokio::test]
async fn immediate_requeue_stops_later_steps() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    let before = Arc::new(AtomicUsize::new(0));
    let reconciler = ClusterReconciler::new(vec![
        counting("gate", &before, Some(Requeue::immediate("not yet"))),
        Box::new(AddPods::new()),
    ]);
    let controller = ClusterController::new(
        Arc::clone(&harness.runtime),
        Arc::clone(&harness.store),
        reconciler,
    );

    let requeue = controller
        .run_once(&harness.key)
        .await
        .expect("gate requeues");
    assert_eq!(requeue.message, "not yet");
    assert!(harness.pods().is_empty());

    assert!(controller.run_once(&harness.key).await.is_none());
    assert_eq!(before.load(Ordering::SeqCst), 2);
    assert_eq!(harness.pods().len(), 13);
}

#[tokio::test]
async fn delayed_requeue_lets_add_pods_run() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    let runs = Arc::new(AtomicUsize::new(0));
    let reconciler = ClusterReconciler::new(vec![
        counting(
            "slow",
            &runs,
            Some(Requeue::delayed("check back later", Duration::from_secs(30))),
        ),
        Box::new(AddPods::new()),
    ]);
    let controller = ClusterController::new(
        Arc::clone(&harness.runtime),
        Arc::clone(&harness.store),
        reconciler,
    );

    let requeue = controller
        .run_once(&harness.key)
        .await
        .expect("delayed requeue surfaces");
    assert!(requeue.delayed);
    assert_eq!(requeue.delay, Some(Duration::from_secs(30)));
    assert_eq!(harness.pods().len(), 13);
}

#[tokio::test]
async fn spawned_controller_requeues_until_converged() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    let runs = Arc::new(AtomicUsize::new(0));
    let reconciler = ClusterReconciler::new(vec![
        counting(
            "warmup",
            &runs,
            Some(Requeue::delayed("warming up", Duration::from_millis(10))),
        ),
        Box::new(AddPods::new()),
    ]);
    let controller = Arc::new(ClusterController::new(
        Arc::clone(&harness.runtime),
        Arc::clone(&harness.store),
        reconciler,
    ));
    let handle = Arc::clone(&controller).spawn();

    controller
        .enqueue(harness.key.clone())
        .await
        .expect("enqueue cluster");

    tokio::time::timeout(Duration::from_secs(5), async {
        while runs.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cluster requeued after the delay");
    assert_eq!(harness.pods().len(), 13);
    handle.abort();
}

#[tokio::test]
async fn default_wiring_uses_admin_client_status() {
    let runtime = Arc::new(ControllerRuntime::with_capacity(4));
    let store = Arc::new(ObjectStore::new());
    let mut cluster = default_cluster();
    cluster.status.process_groups[0].mark_for_removal();
    let cluster = store.create_cluster(cluster).expect("create cluster");

    let oracle = Arc::new(AdminClientOracle::with_timeout(
        Arc::new(StaticAdminClient::healthy()),
        Duration::from_secs(1),
    ));
    let controller = ClusterController::with_defaults(runtime, Arc::clone(&store), oracle);

    assert!(controller.run_once(&cluster.key()).await.is_none());
    let pods = store
        .list_pods(Some(TEST_NAMESPACE), &[])
        .expect("list pods");
    // The healthy cluster can spare the removed storage-1 group.
    assert_eq!(pods.len(), 12);
    assert!(pods
        .iter()
        .all(|pod| pod.name() != Some("operator-test-1-storage-1")));
}

/// Answers like a healthy cluster after holding the calling thread.
struct SlowAdminClient {
    delay: Duration,
    inner: StaticAdminClient,
}

impl AdminClient for SlowAdminClient {
    fn get_status(
        &self,
        cluster: &ClusterKey,
        timeout: Duration,
    ) -> Result<String, AdminClientError> {
        std::thread::sleep(self.delay);
        self.inner.get_status(cluster, timeout)
    }
}

#[tokio::test]
async fn slow_status_call_leaves_runtime_free() {
    let runtime = Arc::new(ControllerRuntime::with_capacity(4));
    let store = Arc::new(ObjectStore::new());
    let mut cluster = default_cluster();
    cluster.status.process_groups[0].mark_for_removal();
    let cluster = store.create_cluster(cluster).expect("create cluster");

    let admin = SlowAdminClient {
        delay: Duration::from_millis(300),
        inner: StaticAdminClient::healthy(),
    };
    let oracle = Arc::new(AdminClientOracle::with_timeout(
        Arc::new(admin),
        Duration::from_secs(1),
    ));
    let controller = ClusterController::with_defaults(runtime, Arc::clone(&store), oracle);

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = tokio::spawn({
        let ticks = Arc::clone(&ticks);
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let requeue = controller.run_once(&cluster.key()).await;
    let ticks_during_pass = ticks.load(Ordering::SeqCst);
    ticker.abort();

    assert!(requeue.is_none());
    assert!(
        ticks_during_pass >= 3,
        "runtime stalled during the pass: {} ticks",
        ticks_during_pass
    );
    let pods = store
        .list_pods(Some(TEST_NAMESPACE), &[])
        .expect("list pods");
    assert_eq!(pods.len(), 12);
}
