//! Stage identity and per-stage state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Stable stage identifier.
///
/// The declaration order is the execution order. Display text lives in
/// [`StageId::label`] and is never used as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Transcription,
    Diarization,
    Summarization,
    AssetGeneration,
    Assembly,
}

impl StageId {
    /// All stages in execution order
    pub const ALL: [StageId; 5] = [
        StageId::Transcription,
        StageId::Diarization,
        StageId::Summarization,
        StageId::AssetGeneration,
        StageId::Assembly,
    ];

    /// Position in the execution order
    pub fn index(self) -> usize {
        match self {
            StageId::Transcription => 0,
            StageId::Diarization => 1,
            StageId::Summarization => 2,
            StageId::AssetGeneration => 3,
            StageId::Assembly => 4,
        }
    }

    /// Stage at a given position, if any
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Machine key used in configuration files and metrics labels
    pub fn key(self) -> &'static str {
        match self {
            StageId::Transcription => "transcription",
            StageId::Diarization => "diarization",
            StageId::Summarization => "summarization",
            StageId::AssetGeneration => "asset_generation",
            StageId::Assembly => "assembly",
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            StageId::Transcription => "Transcription",
            StageId::Diarization => "Speaker Diarization",
            StageId::Summarization => "Summarization",
            StageId::AssetGeneration => "Asset Generation",
            StageId::Assembly => "Final Assembly",
        }
    }

    /// The stage that runs after this one
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StageId {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.key() == s)
            .ok_or_else(|| {
                ContractError::config_validation(
                    "stage",
                    format!(
                        "unknown stage '{s}', expected one of: {}",
                        Self::ALL.map(StageId::key).join(", ")
                    ),
                )
            })
    }
}

/// Per-stage lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    /// Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

/// Mutable record for one stage of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    /// Which stage this record tracks
    pub id: StageId,

    /// Lifecycle status
    pub status: StageStatus,

    /// Progress in `[0, 100]`; 100 is reserved for `Completed`
    pub progress: f64,

    /// Optional human-readable detail ("Processing...", failure reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageState {
    /// Fresh pending record
    pub fn pending(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            progress: 0.0,
            detail: None,
        }
    }
}
