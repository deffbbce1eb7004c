//! Artifact tag derivation.
//!
//! Tags have the shape `<kind>-b<seq>-<run_id>`, e.g. `push-b3-4f1c…`. The
//! prefix is drawn from a fixed, prefix-free set and the run id is carried
//! verbatim as the suffix, so distinct run ids always yield distinct tags.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use gatehouse_state::RunId;

use crate::domain::error::TaggingError;
use crate::domain::run::{PipelineRun, TriggerKind};

/// OCI distribution limit for a tag.
pub const MAX_TAG_LEN: usize = 128;

fn run_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("run id pattern compiles")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(manual|pr|push)-b([1-9][0-9]*)-([A-Za-z0-9_][A-Za-z0-9_.\-]*)$")
            .expect("tag pattern compiles")
    })
}

/// Derives tags for runs of one trigger kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactTagger {
    kind: TriggerKind,
}

impl ArtifactTagger {
    pub fn new(kind: TriggerKind) -> Self {
        Self { kind }
    }

    pub fn for_run(run: &PipelineRun) -> Self {
        Self::new(run.trigger.kind)
    }

    /// Tag for `run_id` at build `build_seq` (1-based).
    pub fn tag(&self, run_id: &RunId, build_seq: u32) -> Result<String, TaggingError> {
        tag(self.kind, run_id, build_seq)
    }
}

/// Pure tag function: `<kind>-b<build_seq>-<run_id>`.
pub fn tag(kind: TriggerKind, run_id: &RunId, build_seq: u32) -> Result<String, TaggingError> {
    let id = run_id.as_str();
    if id.is_empty() {
        return Err(TaggingError::EmptyRunId);
    }
    if !run_id_pattern().is_match(id) {
        return Err(TaggingError::MalformedRunId(id.to_string()));
    }
    if build_seq == 0 {
        return Err(TaggingError::ZeroBuildSequence);
    }
    let tag = format!("{}-b{}-{}", kind.tag_prefix(), build_seq, id);
    if tag.len() > MAX_TAG_LEN {
        return Err(TaggingError::TooLong {
            len: tag.len(),
            max: MAX_TAG_LEN,
        });
    }
    Ok(tag)
}

/// Components recovered from a well-formed tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    pub kind: TriggerKind,
    pub build_seq: u32,
    pub run_id: RunId,
}

/// Inverse of [`tag`]. Returns `None` for strings outside the tag grammar.
pub fn parse_tag(tag: &str) -> Option<ParsedTag> {
    if tag.len() > MAX_TAG_LEN {
        return None;
    }
    let caps = tag_pattern().captures(tag)?;
    let kind = match &caps[1] {
        "manual" => TriggerKind::Manual,
        "pr" => TriggerKind::PullRequest,
        _ => TriggerKind::Push,
    };
    Some(ParsedTag {
        kind,
        build_seq: caps[2].parse().ok()?,
        run_id: RunId(caps[3].to_string()),
    })
}

/// A fully qualified image reference, `registry/repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into().trim_end_matches('/').to_string(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
