//! PipelineBlueprint - Config Loader output
//!
//! Describes the complete workspace configuration: the opaque pipeline
//! bundle handed to tools, orchestrator settings, tool wiring, and event sinks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Options consumed by stage adapters
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Which tools back each stage
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Event output routing
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Where generated video assets are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoBackend {
    /// Local generation host
    #[default]
    Local,
    /// Hosted generation API (requires `api_key`)
    Cloud,
}

/// Options bundle passed to stage adapters unmodified.
///
/// The orchestrator never interprets these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub video_backend: VideoBackend,

    /// Model used by the summarization stage
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,

    /// Model used by the transcription stage
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Local asset generation host (host:port)
    #[serde(default = "default_asset_host")]
    pub asset_host: String,

    /// Cloud API endpoint, used when `video_backend = "cloud"`
    #[serde(default)]
    pub cloud_endpoint: String,

    /// Cloud API key, required iff `video_backend = "cloud"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_summarization_model() -> String {
    "llama3".to_string()
}

fn default_transcription_model() -> String {
    "base".to_string()
}

fn default_asset_host() -> String {
    "127.0.0.1:8188".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_backend: VideoBackend::Local,
            summarization_model: default_summarization_model(),
            transcription_model: default_transcription_model(),
            asset_host: default_asset_host(),
            cloud_endpoint: String::new(),
            api_key: None,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Per-stage deadline in seconds (None or 0 = no deadline)
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,

    /// Capacity of the observer event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl OrchestratorSettings {
    /// Per-stage deadline, if any
    pub fn stage_timeout(&self) -> Option<Duration> {
        match self.stage_timeout_secs {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }
}

/// Tool backing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Timed simulation with canned log lines
    #[default]
    Simulated,
    /// External command per stage
    Command,
}

/// Tool wiring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub mode: ToolMode,

    /// Settings for simulated tools
    #[serde(default)]
    pub simulated: SimulatedSettings,

    /// Stage key -> command (used when `mode = "command"`)
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSpec>,
}

/// Simulated tool timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSettings {
    /// Shortest simulated stage duration
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,

    /// Longest simulated stage duration
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Interval between progress reports
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_min_duration_ms() -> u64 {
    1500
}

fn default_max_duration_ms() -> u64 {
    3500
}

fn default_tick_ms() -> u64 {
    100
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            min_duration_ms: default_min_duration_ms(),
            max_duration_ms: default_max_duration_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// External command backing one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable
    pub program: String,

    /// Arguments; `{input}` is replaced by the media path
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Adapter-level retries before the failure is surfaced
    #[serde(default)]
    pub retries: u32,

    /// Initial retry backoff (doubles per attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Sink-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    256
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Mirror events into tracing
    Log,
    /// Append events as JSON lines
    File,
}
