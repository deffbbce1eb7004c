//! Process-backed stage execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use gatehouse_core::{Finding, StageDefinition};

use crate::executor::{StageExecutor, StageOutput};
use crate::findings::parse_findings;
use crate::stage::StageEnv;

/// Lines of stderr quoted in a failure finding.
const STDERR_TAIL_LINES: usize = 5;

/// Runs each stage's command as a child process.
///
/// The child is killed if the stage is cancelled or times out.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    work_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(dir.into()),
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, stage: &StageDefinition, env: &StageEnv) -> StageOutput {
        let start = Instant::now();
        if stage.command.is_empty() {
            debug!(stage = %stage.name, "Stage has no command");
            return StageOutput::default();
        }

        let argv = env.expand_all(&stage.command);
        let exe = &argv[0];
        let mut cmd = Command::new(exe);
        cmd.args(&argv[1..])
            .envs(env.iter())
            .envs(stage.env.iter().map(|(k, v)| (k.as_str(), env.expand(v))))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(stage = %stage.name, exe = %exe, error = %e, "Failed to spawn stage command");
                return StageOutput {
                    findings: vec![Finding::critical(format!("failed to spawn `{exe}`: {e}"))],
                    exit_code: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return StageOutput {
                    findings: vec![Finding::critical(format!(
                        "failed to collect output of `{exe}`: {e}"
                    ))],
                    exit_code: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut findings = match parse_findings(stage.findings, &stdout) {
            Ok(findings) => findings,
            Err(e) => vec![Finding::critical(e.to_string())],
        };

        if !output.status.success() && !stage.ignore_exit_code {
            let status = exit_code
                .map(|c| format!("exit code {c}"))
                .unwrap_or_else(|| "a signal".to_string());
            let tail = stderr_tail(&stderr);
            let mut description = format!("`{exe}` terminated with {status}");
            if !tail.is_empty() {
                description.push_str(": ");
                description.push_str(&tail);
            }
            findings.push(Finding::critical(description));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            stage = %stage.name,
            exit_code = ?exit_code,
            findings = findings.len(),
            duration_ms,
            "Stage command finished"
        );
        StageOutput {
            findings,
            exit_code,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::RunContext;
    use gatehouse_core::{FindingsFormat, PipelineRun, RunId, Severity, Trigger};

    fn env(stage: &str) -> StageEnv {
        RunContext::new(PipelineRun::with_id(RunId::from("run-1"), Trigger::push("main")))
            .with_tag("push-b1-run-1")
            .stage_env(stage)
    }

    fn sh(name: &str, script: &str) -> StageDefinition {
        StageDefinition::new(name).with_command(["sh", "-c", script])
    }

    #[tokio::test]
    async fn test_successful_command_has_no_findings() {
        let out = CommandExecutor::new()
            .execute(&sh("ok", "exit 0"), &env("ok"))
            .await;
        assert!(out.findings.is_empty());
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_critical_finding() {
        let out = CommandExecutor::new()
            .execute(&sh("bad", "echo boom >&2; exit 3"), &env("bad"))
            .await;
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].severity, Severity::Critical);
        assert!(out.findings[0].description.contains("exit code 3"));
        assert!(out.findings[0].description.contains("boom"));
    }

    #[tokio::test]
    async fn test_ignore_exit_code_keeps_only_findings() {
        let stage = sh(
            "scan",
            r#"echo '[{"severity":"medium","description":"weak tls"}]'; exit 1"#,
        )
        .with_findings(FindingsFormat::Json)
        .ignoring_exit_code();
        let out = CommandExecutor::new().execute(&stage, &env("scan")).await;
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_unparsable_findings_are_critical() {
        let stage = sh("scan", "echo not-json").with_findings(FindingsFormat::Json);
        let out = CommandExecutor::new().execute(&stage, &env("scan")).await;
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].severity, Severity::Critical);
        assert!(out.findings[0].description.contains("unparsable"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_critical_finding() {
        let stage = StageDefinition::new("ghost").with_command(["/nonexistent/scanner"]);
        let out = CommandExecutor::new().execute(&stage, &env("ghost")).await;
        assert!(out.exit_code.is_none());
        assert!(out.findings[0].description.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_env_and_placeholders_reach_process() {
        let stage = sh(
            "echo",
            r#"test "$GATEHOUSE_TAG" = "$1" && test "$GATEHOUSE_STAGE" = echo"#,
        );
        let mut stage = stage;
        stage.command.push("sh".to_string());
        stage.command.push("${GATEHOUSE_TAG}".to_string());
        let out = CommandExecutor::new().execute(&stage, &env("echo")).await;
        assert!(out.findings.is_empty(), "{:?}", out.findings);
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        let out = CommandExecutor::new()
            .execute(&StageDefinition::new("gate"), &env("gate"))
            .await;
        assert_eq!(out, StageOutput::default());
    }

    #[test]
    fn test_stderr_tail() {
        let text = "1\n2\n\n3\n4\n5\n6\n";
        assert_eq!(stderr_tail(text), "2\n3\n4\n5\n6");
    }
}
