//! Artifact and stage result types.
//!
//! An [`Artifact`] is the opaque, serializable payload a stage produces. The
//! `kind` tag is part of the wire format: loading a checkpoint reconstructs
//! the exact variant that was persisted rather than an untyped bag of fields.

use super::{StageDescriptor, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The ternary verdict emitted by a comparison stage.
///
/// The verdict selects which follow-up body a branch stage runs. It is
/// persisted as part of the producing stage's artifact, which makes branch
/// selection deterministic across resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictChoice {
    /// The first candidate is preferred.
    PreferA,
    /// The second candidate is preferred.
    PreferB,
    /// Neither candidate is acceptable; a rework path runs instead.
    RejectBoth,
}

impl std::fmt::Display for VerdictChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferA => write!(f, "prefer_a"),
            Self::PreferB => write!(f, "prefer_b"),
            Self::RejectBoth => write!(f, "reject_both"),
        }
    }
}

/// One branch's contribution inside a merged fan-out artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPart {
    /// The branch key (stable, supplied at plan time).
    pub key: String,
    /// The artifact the branch produced.
    pub artifact: Artifact,
}

/// The payload produced by a stage.
///
/// Serialized with an explicit `kind` tag so a loaded checkpoint picks the
/// right reconstruction path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// Free-form document text, e.g. a drafted report section.
    Document {
        /// Document title.
        title: String,
        /// Document body.
        body: String,
    },
    /// Structured tabular data.
    Table {
        /// Column names, in order.
        columns: Vec<String>,
        /// Rows keyed by column name.
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    },
    /// Arbitrary structured data.
    Data {
        /// The payload.
        value: serde_json::Value,
    },
    /// A ternary verdict used to select a follow-up branch.
    Verdict {
        /// The selected branch.
        choice: VerdictChoice,
        /// Why the choice was made.
        rationale: String,
    },
    /// The merged output of a fan-out group, in task order.
    Merged {
        /// Surviving branch contributions.
        parts: Vec<MergedPart>,
    },
}

impl Artifact {
    /// Creates a document artifact.
    #[must_use]
    pub fn document(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Document {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Creates a tabular artifact.
    #[must_use]
    pub fn table(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self::Table { columns, rows }
    }

    /// Creates a free-form data artifact.
    #[must_use]
    pub fn data(value: serde_json::Value) -> Self {
        Self::Data { value }
    }

    /// Creates a verdict artifact.
    #[must_use]
    pub fn verdict(choice: VerdictChoice, rationale: impl Into<String>) -> Self {
        Self::Verdict {
            choice,
            rationale: rationale.into(),
        }
    }

    /// Creates a merged fan-out artifact.
    #[must_use]
    pub fn merged(parts: Vec<MergedPart>) -> Self {
        Self::Merged { parts }
    }

    /// Returns the `kind` tag used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document { .. } => "document",
            Self::Table { .. } => "table",
            Self::Data { .. } => "data",
            Self::Verdict { .. } => "verdict",
            Self::Merged { .. } => "merged",
        }
    }

    /// Returns the verdict choice if this artifact is a verdict.
    #[must_use]
    pub fn as_verdict(&self) -> Option<VerdictChoice> {
        match self {
            Self::Verdict { choice, .. } => Some(*choice),
            _ => None,
        }
    }

    /// Returns the merged parts if this artifact is a fan-out merge.
    #[must_use]
    pub fn as_merged(&self) -> Option<&[MergedPart]> {
        match self {
            Self::Merged { parts } => Some(parts),
            _ => None,
        }
    }
}

/// The durable result of one stage: the artifact plus its metadata.
///
/// Immutable once persisted. An explicit re-run produces a new version; the
/// checkpoint store archives the previous one rather than editing in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage that produced this result.
    pub stage_id: StageId,
    /// The human-readable stage name.
    pub stage_name: String,
    /// The payload.
    pub artifact: Artifact,
    /// When the result was produced.
    pub produced_at: DateTime<Utc>,
    /// Spend attributed to this stage, in USD.
    pub cost_usd: f64,
    /// Whether the stage body completed successfully.
    pub succeeded: bool,
}

impl StageResult {
    /// Creates a successful stage result.
    #[must_use]
    pub fn new(descriptor: &StageDescriptor, artifact: Artifact, cost_usd: f64) -> Self {
        Self {
            stage_id: descriptor.id,
            stage_name: descriptor.name.clone(),
            artifact,
            produced_at: Utc::now(),
            cost_usd,
            succeeded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_tag_on_wire() {
        let artifact = Artifact::document("Summary", "All clear.");
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["kind"], "document");
        assert_eq!(json["title"], "Summary");
    }

    #[test]
    fn test_kind_tag_drives_reconstruction() {
        let json = r#"{"kind":"verdict","choice":"reject_both","rationale":"weak sourcing"}"#;
        let artifact: Artifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.as_verdict(), Some(VerdictChoice::RejectBoth));
    }

    #[test]
    fn test_unknown_kind_fails_loudly() {
        let json = r#"{"kind":"hologram","title":"x"}"#;
        let result: Result<Artifact, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_merged_round_trip() {
        let merged = Artifact::merged(vec![
            MergedPart {
                key: "alpha".to_string(),
                artifact: Artifact::data(serde_json::json!({"n": 1})),
            },
            MergedPart {
                key: "beta".to_string(),
                artifact: Artifact::document("b", "body"),
            },
        ]);
        let json = serde_json::to_string(&merged).unwrap();
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(merged, back);
        assert_eq!(back.as_merged().unwrap().len(), 2);
    }

    #[test]
    fn test_table_round_trip() {
        let mut row = serde_json::Map::new();
        row.insert("ticker".to_string(), serde_json::json!("GOOGL"));
        row.insert("close".to_string(), serde_json::json!(182.4));
        let table = Artifact::table(vec!["ticker".to_string(), "close".to_string()], vec![row]);
        assert_eq!(table.kind(), "table");
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["kind"], "table");
        assert_eq!(json["rows"][0]["ticker"], "GOOGL");
        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(table, back);
    }

    #[test]
    fn test_stage_result_metadata() {
        let descriptor = StageDescriptor::new(StageId::integer(2), "research");
        let result = StageResult::new(&descriptor, Artifact::data(serde_json::json!(null)), 1.25);
        assert_eq!(result.stage_name, "research");
        assert_eq!(result.cost_usd, 1.25);
        assert!(result.succeeded);
    }
}
