use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::run::{Artifact, PipelineRun, RunState, StageExecution, StageState};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Outcome of one pipeline run, as persisted for CI and PR reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub schema_version: String,
    pub pipeline: String,
    pub definition_digest: String,
    pub run: PipelineRun,
    pub state: RunState,
    /// Tag computed for this run; only an `artifact` if it was published.
    pub tag: Option<String>,
    pub artifact: Option<Artifact>,
    /// Stage executions in dependency order.
    pub stages: Vec<StageExecution>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageExecution> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn state_of(&self, name: &str) -> Option<StageState> {
        self.stage(name).map(|s| s.state)
    }

    /// Names of stages that ended in `state`.
    pub fn stages_in(&self, state: StageState) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.stage.as_str())
            .collect()
    }

    pub fn soft_failed(&self) -> Vec<&str> {
        self.stages_in(StageState::SoftFailed)
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Write the run report as pretty JSON.
pub fn write_run_report_json(path: &Path, report: &RunReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

pub fn read_run_report_json(path: &Path) -> Result<RunReport> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse {:?}", path))
}

/// Render a markdown summary for PR/comment/check output.
pub fn render_run_summary_md(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} {}\n\n", report.pipeline, report.state));
    out.push_str(&format!(
        "- run: `{}`\n- trigger: {} `{}`\n",
        report.run.run_id, report.run.trigger.kind, report.run.trigger.git_ref
    ));
    match (&report.artifact, &report.tag) {
        (Some(artifact), _) => out.push_str(&format!("- artifact: `{}`\n", artifact.tag)),
        (None, Some(tag)) => out.push_str(&format!("- artifact: not published (`{}`)\n", tag)),
        (None, None) => out.push_str("- artifact: none\n"),
    }
    out.push('\n');

    out.push_str("## Stages\n");
    out.push_str("| stage | state | findings |\n|---|---|---|\n");
    for stage in &report.stages {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            stage.stage,
            stage.state,
            stage.findings.len()
        ));
    }

    let flagged: Vec<&StageExecution> = report
        .stages
        .iter()
        .filter(|s| {
            matches!(s.state, StageState::SoftFailed | StageState::HardFailed)
                && (!s.findings.is_empty() || s.note.is_some())
        })
        .collect();
    if !flagged.is_empty() {
        out.push_str("\n## Findings\n");
        for stage in flagged {
            out.push_str(&format!("### {} ({})\n", stage.stage, stage.state));
            if let Some(note) = &stage.note {
                out.push_str(&format!("_{}_\n", note));
            }
            for finding in &stage.findings {
                match &finding.source {
                    Some(source) if source != &stage.stage => out.push_str(&format!(
                        "- **{}** {} (from {})\n",
                        finding.severity, finding.description, source
                    )),
                    _ => out.push_str(&format!(
                        "- **{}** {}\n",
                        finding.severity, finding.description
                    )),
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::{Finding, Severity};
    use crate::domain::run::Trigger;
    use gatehouse_state::RunId;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("parse RFC3339")
            .with_timezone(&Utc)
    }

    fn sample() -> RunReport {
        let run = PipelineRun {
            run_id: RunId::from("run-1"),
            trigger: Trigger::push("main"),
            created_at: at("2026-01-01T00:00:00Z"),
        };
        let mut build = StageExecution::pending("build");
        build.state = StageState::Passed;
        let mut scan = StageExecution::pending("scan");
        scan.state = StageState::SoftFailed;
        scan.findings = vec![Finding::new(Severity::Medium, "CVE-2024-0002").with_source("scan")];
        let mut push = StageExecution::pending("push");
        push.state = StageState::SoftFailed;
        push.findings = vec![Finding::new(Severity::Medium, "CVE-2024-0002").with_source("scan")];

        RunReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            pipeline: "gated-delivery".to_string(),
            definition_digest: "abc".to_string(),
            run,
            state: RunState::Succeeded,
            tag: Some("push-b1-run-1".to_string()),
            artifact: Some(Artifact {
                tag: "push-b1-run-1".to_string(),
                run_id: RunId::from("run-1"),
                created_at: at("2026-01-01T00:01:00Z"),
            }),
            stages: vec![build, scan, push],
            started_at: at("2026-01-01T00:00:00Z"),
            finished_at: at("2026-01-01T00:01:00Z"),
        }
    }

    #[test]
    fn run_report_schema_has_expected_keys() {
        let raw = serde_json::to_value(sample()).expect("serialize report");
        let obj = raw.as_object().expect("report object");
        for key in [
            "schema_version",
            "pipeline",
            "definition_digest",
            "run",
            "state",
            "artifact",
            "stages",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(raw["state"], json!("SUCCEEDED"));
        assert_eq!(raw["stages"][1]["state"], json!("SOFT_FAILED"));
        assert_eq!(raw["run"]["trigger"]["kind"], json!("push"));
    }

    #[test]
    fn run_report_helpers() {
        let report = sample();
        assert_eq!(report.soft_failed(), vec!["scan", "push"]);
        assert_eq!(report.state_of("build"), Some(StageState::Passed));
        assert_eq!(report.duration_ms(), 60_000);
        assert!(report.succeeded());
    }

    #[test]
    fn run_summary_markdown_render_is_stable() {
        let actual = render_run_summary_md(&sample());
        let expected = "# gated-delivery SUCCEEDED\n\n\
- run: `run-1`\n- trigger: push `main`\n- artifact: `push-b1-run-1`\n\n\
## Stages\n| stage | state | findings |\n|---|---|---|\n\
| build | PASSED | 0 |\n| scan | SOFT_FAILED | 1 |\n| push | SOFT_FAILED | 1 |\n\
\n## Findings\n\
### scan (SOFT_FAILED)\n- **MEDIUM** CVE-2024-0002\n\
### push (SOFT_FAILED)\n- **MEDIUM** CVE-2024-0002 (from scan)\n";
        assert_eq!(actual, expected);
    }

    #[test]
    fn report_json_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_run_report_json(&path, &sample()).unwrap();
        let back = read_run_report_json(&path).unwrap();
        assert_eq!(back.run.run_id, RunId::from("run-1"));
        assert_eq!(back.artifact.unwrap().tag, "push-b1-run-1");
    }
}
