use fdbkube::fdbkube::api::cluster::{
    ClusterKey, LABEL_CLUSTER_NAME, LABEL_PROCESS_CLASS, LABEL_PROCESS_GROUP_ID,
};
use fdbkube::fdbkube::api::process_group::{ProcessClass, ProcessGroupId, ProcessGroupStatus};
use fdbkube::fdbkube::config::Config;
use fdbkube::fdbkube::controller::inventory::{InventoryError, ProcessGroupInventory};
use fdbkube::fdbkube::fdb::fixtures::FixtureOracle;
use fdbkube::fdbkube::k8s::event::EventType;
use fdbkube::fdbkube::k8s::pod::{ObjectMeta, Pod, PodSpec};
use fdbkube::fdbkube::k8s::store::StoreError;
use fdbkube::fdbkube::test_support::{TestHarness, TEST_CLUSTER_NAME, TEST_NAMESPACE};
use std::sync::Arc;

const NEW_POD: &str = "operator-test-1-storage-9";

fn reconciled_with_new_storage_group(oracle: FixtureOracle) -> (TestHarness, ProcessGroupId) {
    let harness = TestHarness::reconciled(oracle);
    let id = harness.add_process_group(ProcessClass::Storage, 9);
    (harness, id)
}

fn reconciled_with_removed_storage_group(oracle: FixtureOracle) -> TestHarness {
    let (harness, id) = reconciled_with_new_storage_group(oracle);
    harness.mark_for_removal(&id);
    harness
}

fn assert_new_pod_created(harness: &TestHarness, initial: usize) {
    let pods = harness.pods();
    assert_eq!(pods.len(), initial + 1);
    let last = pods.last().expect("at least one pod");
    assert_eq!(last.name(), Some(NEW_POD));
    assert_eq!(last.metadata.label(LABEL_PROCESS_GROUP_ID), Some("storage-9"));
    assert_eq!(last.metadata.label(LABEL_PROCESS_CLASS), Some("storage"));
    assert_eq!(
        last.metadata.label(LABEL_CLUSTER_NAME),
        Some(TEST_CLUSTER_NAME)
    );
    let owner = harness
        .cluster()
        .owner_reference()
        .expect("persisted cluster has an owner reference");
    assert_eq!(last.metadata.owner_references, vec![owner]);
}

#[test]
fn scenario_reconciled_cluster_is_left_alone() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    let initial = harness.pod_names();
    assert_eq!(initial.len(), 13);

    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pod_names(), initial);
    assert_eq!(harness.oracle.calls(), 0);
}

#[test]
fn scenario_missing_pod_is_created() {
    let (harness, _) = reconciled_with_new_storage_group(FixtureOracle::healthy());
    let initial = harness.pods().len();

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
    assert_eq!(harness.oracle.calls(), 0);
    assert!(harness
        .store
        .get_claim(Some(TEST_NAMESPACE), "operator-test-1-storage-9-data")
        .expect("claim lookup")
        .is_some());
}

#[test]
fn scenario_removed_group_stays_down_when_fully_replicated() {
    let harness = reconciled_with_removed_storage_group(FixtureOracle::healthy());
    let initial = harness.pod_names();

    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pod_names(), initial);
    assert_eq!(harness.oracle.calls(), 1);
}

#[test]
fn scenario_removed_group_recreated_with_degraded_availability() {
    let harness = reconciled_with_removed_storage_group(FixtureOracle::degraded_availability());
    let initial = harness.pods().len();

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
}

#[test]
fn scenario_removed_group_recreated_with_degraded_data() {
    let harness = reconciled_with_removed_storage_group(FixtureOracle::degraded_data());
    let initial = harness.pods().len();

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
}

#[test]
fn scenario_removed_group_recreated_when_unavailable() {
    let harness = reconciled_with_removed_storage_group(FixtureOracle::unavailable());
    let initial = harness.pods().len();

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
}

#[test]
fn scenario_removed_group_recreated_when_status_unreachable() {
    let harness =
        reconciled_with_removed_storage_group(FixtureOracle::unreachable("can't reach cluster"));
    let initial = harness.pods().len();

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
    assert_eq!(harness.oracle.calls(), 1);
}

#[test]
fn second_pass_creates_nothing() {
    let harness = reconciled_with_removed_storage_group(FixtureOracle::degraded_data());
    assert!(harness.reconcile().is_none());
    let after_first = harness.pod_names();

    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pod_names(), after_first);
}

#[test]
fn deleted_pod_of_active_group_is_recreated() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    let id = ProcessGroupId::new(&ProcessClass::Log, 2);
    let initial = harness.pod_names();
    harness.delete_pod(&id);
    assert_eq!(harness.pod_names().len(), initial.len() - 1);

    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pod_names(), initial);
}

#[test]
fn oracle_consulted_once_for_many_removed_groups() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    for number in 20..25 {
        let id = harness.add_process_group(ProcessClass::Storage, number);
        harness.mark_for_removal(&id);
    }
    let initial = harness.pod_names();

    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pod_names(), initial);
    assert_eq!(harness.oracle.calls(), 1);
}

#[test]
fn duplicate_process_group_ids_create_one_pod() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    let initial = harness.pods().len();
    harness.update_status(|status| {
        for _ in 0..2 {
            status.process_groups.push(ProcessGroupStatus::new(
                ProcessGroupId::new(&ProcessClass::Storage, 9),
                ProcessClass::Storage,
                Vec::new(),
            ));
        }
    });

    assert!(harness.reconcile().is_none());
    assert_new_pod_created(&harness, initial);
}

#[test]
fn failed_creation_does_not_block_other_groups() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    let blocked = harness.add_process_group(ProcessClass::Storage, 9);
    let free = harness.add_process_group(ProcessClass::Stateless, 9);

    // An unlabelled pod squatting on the name the materializer will choose.
    let squatter = ObjectMeta {
        name: Some(harness.cluster().pod_name(&blocked)),
        namespace: Some(TEST_NAMESPACE.to_string()),
        ..Default::default()
    };
    harness
        .store
        .create_pod(Pod::new(squatter, PodSpec::default()))
        .expect("create squatter");

    let requeue = harness.reconcile().expect("failure requeues");
    assert!(requeue.is_error());
    assert!(!requeue.delayed);
    assert!(requeue.message.contains("storage-9"));

    let free_name = harness.cluster().pod_name(&free);
    let created = harness
        .store
        .get_pod(Some(TEST_NAMESPACE), &free_name)
        .expect("pod lookup")
        .expect("stateless pod created despite the failure");
    assert_eq!(created.metadata.label(LABEL_PROCESS_GROUP_ID), Some("stateless-9"));

    let events = harness.store.events_for(&harness.key);
    assert!(events.iter().any(|event| event.event_type == EventType::Warning
        && event.reason == "PodCreationFailed"
        && event.message.contains("storage-9")));

    harness
        .store
        .delete_pod(Some(TEST_NAMESPACE), NEW_POD)
        .expect("remove squatter");
    let before_retry = harness.pods().len();
    assert!(harness.reconcile().is_none());
    let pods = harness.pods();
    assert_eq!(pods.len(), before_retry + 1);
    assert!(pods.iter().any(|pod| pod.name() == Some(NEW_POD)));
}

#[test]
fn quota_exhaustion_requeues_with_delay() {
    let harness = TestHarness::reconciled(FixtureOracle::healthy());
    let existing = harness.pods().len();
    harness.add_process_group(ProcessClass::Storage, 9);
    harness.add_process_group(ProcessClass::Storage, 10);
    harness
        .store
        .set_pod_quota(Some(TEST_NAMESPACE), Some(existing + 1))
        .expect("set quota");

    let requeue = harness.reconcile().expect("quota requeues");
    assert!(requeue.delayed);
    assert_eq!(
        requeue.delay,
        Some(Config::QuotaRequeueDelay.get_duration())
    );
    assert_eq!(harness.pods().len(), existing + 1);

    harness
        .store
        .set_pod_quota(Some(TEST_NAMESPACE), None)
        .expect("lift quota");
    assert!(harness.reconcile().is_none());
    assert_eq!(harness.pods().len(), existing + 2);
}

struct FailingInventory;

impl ProcessGroupInventory for FailingInventory {
    fn list_process_groups(
        &self,
        _cluster: &ClusterKey,
    ) -> Result<Vec<ProcessGroupStatus>, InventoryError> {
        Err(InventoryError::Store(StoreError::Unavailable(
            "connection reset".to_string(),
        )))
    }
}

#[test]
fn inventory_failure_creates_nothing() {
    let harness = TestHarness::new(FixtureOracle::healthy());
    harness
        .runtime
        .register_handle::<dyn ProcessGroupInventory>(Arc::new(FailingInventory));

    let requeue = harness.reconcile().expect("inventory failure requeues");
    assert!(requeue.is_error());
    assert!(requeue.message.contains("connection reset"));
    assert!(harness.pods().is_empty());
    assert_eq!(harness.oracle.calls(), 0);
}
