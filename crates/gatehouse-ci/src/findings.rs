//! Parsing scanner output into findings.
//!
//! Scanners are opaque: the stage runner only needs a severity and a
//! description per issue. Severity labels outside the known scale become
//! `UNKNOWN` rather than being dropped.

use serde::Deserialize;

use gatehouse_core::{Finding, FindingsFormat, Severity};

#[derive(Debug, thiserror::Error)]
#[error("unparsable {format} findings: {reason}")]
pub struct FindingsParseError {
    pub format: &'static str,
    pub reason: String,
}

/// Parse `stdout` according to `format`.
pub fn parse_findings(format: FindingsFormat, stdout: &str) -> Result<Vec<Finding>, FindingsParseError> {
    match format {
        FindingsFormat::None => Ok(Vec::new()),
        FindingsFormat::Json => parse_json(stdout),
        FindingsFormat::Trivy => parse_trivy(stdout),
    }
}

// ---------------------------------------------------------------------------
// Generic JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawFinding {
    severity: String,
    description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    List(Vec<RawFinding>),
    Wrapped { findings: Vec<RawFinding> },
}

fn parse_json(stdout: &str) -> Result<Vec<Finding>, FindingsParseError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: JsonDocument =
        serde_json::from_str(stdout.trim()).map_err(|e| FindingsParseError {
            format: "json",
            reason: e.to_string(),
        })?;
    let raw = match doc {
        JsonDocument::List(items) => items,
        JsonDocument::Wrapped { findings } => findings,
    };
    Ok(raw
        .into_iter()
        .map(|r| Finding::new(Severity::parse_lenient(&r.severity), r.description))
        .collect())
}

// ---------------------------------------------------------------------------
// Trivy `--format json`
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    target: String,
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
    #[serde(default)]
    misconfigurations: Option<Vec<TrivyMisconfiguration>>,
    #[serde(default)]
    secrets: Option<Vec<TrivySecret>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    #[serde(default)]
    pkg_name: String,
    #[serde(default)]
    installed_version: String,
    severity: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyMisconfiguration {
    #[serde(rename = "ID")]
    id: String,
    severity: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivySecret {
    #[serde(rename = "RuleID")]
    rule_id: String,
    severity: String,
    #[serde(default)]
    title: Option<String>,
}

fn parse_trivy(stdout: &str) -> Result<Vec<Finding>, FindingsParseError> {
    let report: TrivyReport =
        serde_json::from_str(stdout.trim()).map_err(|e| FindingsParseError {
            format: "trivy",
            reason: e.to_string(),
        })?;

    let mut findings = Vec::new();
    for result in report.results.unwrap_or_default() {
        for v in result.vulnerabilities.unwrap_or_default() {
            let mut description = format!(
                "{} in {} {} ({})",
                v.vulnerability_id, v.pkg_name, v.installed_version, result.target
            );
            if let Some(title) = v.title {
                description.push_str(": ");
                description.push_str(&title);
            }
            findings.push(Finding::new(Severity::parse_lenient(&v.severity), description));
        }
        for m in result.misconfigurations.unwrap_or_default() {
            let description = format!(
                "{} ({}){}",
                m.id,
                result.target,
                m.title.map(|t| format!(": {t}")).unwrap_or_default()
            );
            findings.push(Finding::new(Severity::parse_lenient(&m.severity), description));
        }
        for s in result.secrets.unwrap_or_default() {
            let description = format!(
                "secret {} ({}){}",
                s.rule_id,
                result.target,
                s.title.map(|t| format!(": {t}")).unwrap_or_default()
            );
            findings.push(Finding::new(Severity::parse_lenient(&s.severity), description));
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_ignores_output() {
        assert!(parse_findings(FindingsFormat::None, "garbage").unwrap().is_empty());
    }

    #[test]
    fn test_json_list_and_wrapped() {
        let list = parse_findings(
            FindingsFormat::Json,
            r#"[{"severity":"high","description":"sql injection"},{"severity":"sev0","description":"?"}]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].severity, Severity::High);
        assert_eq!(list[1].severity, Severity::Unknown);

        let wrapped = parse_findings(
            FindingsFormat::Json,
            r#"{"findings":[{"severity":"LOW","description":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped[0].severity, Severity::Low);
    }

    #[test]
    fn test_json_empty_stdout_has_no_findings() {
        assert!(parse_findings(FindingsFormat::Json, "  \n").unwrap().is_empty());
    }

    #[test]
    fn test_json_garbage_is_error() {
        let err = parse_findings(FindingsFormat::Json, "Segmentation fault").unwrap_err();
        assert_eq!(err.format, "json");
    }

    #[test]
    fn test_trivy_report() {
        let report = r#"{
            "SchemaVersion": 2,
            "ArtifactName": "app:push-b1-r",
            "Results": [
                {
                    "Target": "app (debian 12.4)",
                    "Vulnerabilities": [
                        {
                            "VulnerabilityID": "CVE-2024-0001",
                            "PkgName": "openssl",
                            "InstalledVersion": "3.0.11",
                            "Severity": "CRITICAL",
                            "Title": "buffer overflow"
                        }
                    ]
                },
                {
                    "Target": "Dockerfile",
                    "Misconfigurations": [
                        {"ID": "DS002", "Severity": "HIGH", "Title": "root user"}
                    ],
                    "Secrets": [
                        {"RuleID": "aws-access-key-id", "Severity": "CRITICAL"}
                    ]
                },
                {"Target": "go.sum", "Vulnerabilities": null}
            ]
        }"#;
        let findings = parse_findings(FindingsFormat::Trivy, report).unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].description.contains("CVE-2024-0001"));
        assert!(findings[0].description.contains("openssl"));
        assert_eq!(findings[1].severity, Severity::High);
        assert!(findings[2].description.starts_with("secret aws-access-key-id"));
    }

    #[test]
    fn test_trivy_clean_image() {
        let findings =
            parse_findings(FindingsFormat::Trivy, r#"{"SchemaVersion":2,"Results":[]}"#).unwrap();
        assert!(findings.is_empty());
        let no_results = parse_findings(FindingsFormat::Trivy, r#"{"SchemaVersion":2}"#).unwrap();
        assert!(no_results.is_empty());
    }
}
