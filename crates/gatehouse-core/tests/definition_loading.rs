use gatehouse_core::{
    DefinitionError, GateAction, GatehouseConfig, PipelineDefinition, Severity, StageGraph,
};

const DELIVERY: &str = r#"
name = "gated-delivery"
artifact_stage = "push"
max_parallel = 4

[[stages]]
name = "sast"
threshold = "CRITICAL,HIGH"
command = ["semgrep", "--json", "--config", "auto"]
findings = "json"

[[stages]]
name = "iac-scan"
command = ["checkov", "-d", "infra"]

[[stages]]
name = "build"
needs = ["sast"]
command = ["docker", "build", "-t", "${GATEHOUSE_REGISTRY}:${GATEHOUSE_TAG}", "."]

[[stages]]
name = "image-scan"
needs = ["build"]
command = ["trivy", "image", "--format", "json", "${GATEHOUSE_REGISTRY}:${GATEHOUSE_TAG}"]
findings = "trivy"
ignore_exit_code = true
timeout_secs = 600

[[stages]]
name = "push"
needs = ["image-scan"]
gate_inputs = ["image-scan"]
threshold = "CRITICAL,HIGH"
command = ["docker", "push", "${GATEHOUSE_REGISTRY}:${GATEHOUSE_TAG}"]

[[stages]]
name = "deploy"
needs = ["push", "iac-scan"]
"#;

#[test]
fn delivery_pipeline_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, DELIVERY).unwrap();

    let def = PipelineDefinition::from_path(&path).unwrap();
    let graph = StageGraph::new(def).unwrap();

    assert_eq!(graph.len(), 6);
    assert_eq!(graph.artifact_stage(), Some("push"));
    assert_eq!(graph.levels()[0], vec!["sast", "iac-scan"]);
    assert_eq!(graph.dependents("push"), vec!["deploy"]);
    assert!(graph.stage("push").unwrap().effective_policy().is_gate());
    assert!(!graph.stage("image-scan").unwrap().effective_policy().is_gate());
}

#[test]
fn env_threshold_overrides_reach_stages() {
    let mut def = PipelineDefinition::from_toml_str(DELIVERY).unwrap();
    let config = GatehouseConfig::from_vars([
        ("GATEHOUSE_GATE_IMAGE_SCAN", "CRITICAL"),
        ("GATEHOUSE_GATE_PUSH", "CRITICAL,HIGH,MEDIUM"),
    ])
    .unwrap();

    let mut applied = def.apply_gate_overrides(&config.gate_thresholds).unwrap();
    applied.sort();
    assert_eq!(applied, vec!["image-scan", "push"]);

    let graph = StageGraph::new(def).unwrap();
    let scan = graph.stage("image-scan").unwrap().effective_policy();
    assert_eq!(scan.action_for(Severity::Critical), GateAction::Block);
    assert_eq!(scan.action_for(Severity::High), GateAction::Warn);
    let push = graph.stage("push").unwrap().effective_policy();
    assert_eq!(push.action_for(Severity::Medium), GateAction::Block);
}

#[test]
fn json_definition_with_cycle_is_rejected_at_load() {
    let def = PipelineDefinition::from_json_str(
        r#"{
            "name": "broken",
            "stages": [
                {"name": "build", "needs": ["push"]},
                {"name": "scan", "needs": ["build"]},
                {"name": "push", "needs": ["scan"]}
            ]
        }"#,
    )
    .unwrap();

    let err = StageGraph::new(def).unwrap_err();
    assert!(matches!(err, DefinitionError::CyclicDependency { .. }));
}

#[test]
fn malformed_threshold_is_a_load_error() {
    let err = PipelineDefinition::from_toml_str(
        r#"
name = "p"
[[stages]]
name = "sast"
threshold = "CRITICAL,SERIOUS"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidThreshold { .. }));
}
