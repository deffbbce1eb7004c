use std::sync::Arc;

use gatehouse_core::deploy::DeploymentTrigger;
use gatehouse_core::tagger::ArtifactTagger;
use gatehouse_core::{GatehouseError, RecordingDeployer, TriggerKind};
use gatehouse_state::{FsTagStore, RunId, StateBackend, TagStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn publish(store: &dyn TagStore, run: &str) -> String {
    let run_id = RunId::from(run);
    let tag = ArtifactTagger::new(TriggerKind::Push)
        .tag(&run_id, 1)
        .expect("tag");
    store.put(&run_id, &tag).await.expect("put");
    tag
}

// ---------------------------------------------------------------------------
// Deployment trigger over durable stores
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploys_tag_recorded_before_restart() {
    let dir = tempfile::tempdir().unwrap();
    let tag = {
        let store = FsTagStore::open(dir.path()).unwrap();
        publish(&store, "run-42").await
    };

    let store = StateBackend::Fs(dir.path().to_path_buf())
        .open()
        .await
        .unwrap();
    let deployer = Arc::new(RecordingDeployer::new());
    let trigger = DeploymentTrigger::new(store, deployer.clone());

    let handle = trigger.deploy("production", &tag).await.unwrap();
    assert_eq!(handle.run_id, RunId::from("run-42"));
    assert_eq!(handle.tag, "push-b1-run-42");
    assert_eq!(deployer.requests()[0].environment, "production");
}

#[tokio::test]
async fn unknown_tag_never_reaches_deployer() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TagStore> = Arc::new(FsTagStore::open(dir.path()).unwrap());
    publish(store.as_ref(), "run-1").await;

    let deployer = Arc::new(RecordingDeployer::new());
    let trigger = DeploymentTrigger::new(store, deployer.clone());

    // Well-formed but never recorded by a gated run.
    let err = trigger
        .deploy("staging", "push-b1-run-2")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::UnknownTag(_)));
    assert!(deployer.requests().is_empty());
}

#[tokio::test]
async fn deploy_is_idempotent_across_invocations() {
    let store: Arc<dyn TagStore> = Arc::new(gatehouse_state::fakes::MemoryTagStore::new());
    let tag = publish(store.as_ref(), "run-7").await;
    let trigger = DeploymentTrigger::new(store, Arc::new(RecordingDeployer::new()));

    let a = trigger.deploy("staging", &tag).await.unwrap();
    let b = trigger.deploy("staging", &tag).await.unwrap();
    assert_eq!(a.deployment_id, b.deployment_id);
    assert_eq!(a.run_id, b.run_id);
}
