//! Pipeline 指标收集模块
//!
//! 基于 PipelineEvent 收集和统计编排器的运行指标。

use std::collections::BTreeMap;
use std::time::Instant;

use contracts::{LogLevel, PipelineEvent, PipelineStatus, StageId, StageStatus};
use metrics::{counter, gauge, histogram};

/// 从 PipelineEvent 记录指标
///
/// 编排器每发布一个事件时调用此函数。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_event_metrics;
///
/// for event in run.apply(transition)? {
///     record_event_metrics(&event);
///     // ...
/// }
/// ```
pub fn record_event_metrics(event: &PipelineEvent) {
    match event {
        PipelineEvent::StageStatusChanged { state, .. } => {
            let status = stage_status_label(state.status);
            counter!(
                "cinesum_stage_transitions_total",
                "stage" => state.id.key(),
                "status" => status
            )
            .increment(1);

            if state.status == StageStatus::Failed {
                let reason = match state.detail.as_deref() {
                    Some("cancelled") => "cancelled",
                    _ => "error",
                };
                counter!(
                    "cinesum_stage_failures_total",
                    "stage" => state.id.key(),
                    "reason" => reason
                )
                .increment(1);
            }

            gauge!("cinesum_stage_progress", "stage" => state.id.key()).set(state.progress);
        }
        PipelineEvent::ProgressChanged {
            stage, progress, ..
        } => {
            gauge!("cinesum_stage_progress", "stage" => stage.key()).set(*progress);
        }
        PipelineEvent::LogAppended { entry, .. } => {
            counter!("cinesum_log_entries_total", "level" => level_label(entry.level))
                .increment(1);
        }
        PipelineEvent::PipelineStatusChanged { run_id, status } => {
            gauge!("cinesum_pipeline_status").set(status_code(*status));
            gauge!("cinesum_last_run_id").set(*run_id as f64);
            if status.is_terminal() {
                counter!("cinesum_runs_total", "status" => status.as_str()).increment(1);
            }
        }
    }
}

/// 记录单个 stage 的耗时
pub fn record_stage_duration_ms(stage: StageId, duration_ms: f64) {
    histogram!("cinesum_stage_duration_ms", "stage" => stage.key()).record(duration_ms);
}

/// 记录事件分发到 sink
pub fn record_event_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cinesum_events_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

fn stage_status_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Completed => "completed",
        StageStatus::Failed => "failed",
    }
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
        LogLevel::Debug => "debug",
    }
}

fn status_code(status: PipelineStatus) -> f64 {
    match status {
        PipelineStatus::Idle => 0.0,
        PipelineStatus::Processing => 1.0,
        PipelineStatus::Completed => 2.0,
        PipelineStatus::Failed => 3.0,
    }
}

/// 运行指标聚合器
///
/// 在内存中聚合事件，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct RunMetricsAggregator {
    /// 事件总数
    pub total_events: u64,

    /// 进度事件数
    pub progress_events: u64,

    /// 各级别日志条数
    pub log_counts: BTreeMap<String, u64>,

    /// 完成的 stage 数
    pub stages_completed: u64,

    /// 失败的 stage 数
    pub stages_failed: u64,

    /// 最终状态
    pub final_status: Option<PipelineStatus>,

    /// 各 stage 耗时统计 (毫秒)
    pub stage_durations: BTreeMap<StageId, RunningStats>,

    /// 正在运行的 stage 起始时刻
    started: BTreeMap<StageId, Instant>,
}

impl RunMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, event: &PipelineEvent) {
        self.update_at(event, Instant::now());
    }

    /// 使用指定时刻更新（便于测试）
    pub fn update_at(&mut self, event: &PipelineEvent, now: Instant) {
        self.total_events += 1;

        match event {
            PipelineEvent::StageStatusChanged { state, .. } => match state.status {
                StageStatus::Running => {
                    self.started.insert(state.id, now);
                }
                StageStatus::Completed | StageStatus::Failed => {
                    if state.status == StageStatus::Completed {
                        self.stages_completed += 1;
                    } else {
                        self.stages_failed += 1;
                    }
                    if let Some(start) = self.started.remove(&state.id) {
                        let ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
                        self.stage_durations.entry(state.id).or_default().push(ms);
                    }
                }
                StageStatus::Pending => {
                    self.started.remove(&state.id);
                }
            },
            PipelineEvent::ProgressChanged { .. } => {
                self.progress_events += 1;
            }
            PipelineEvent::LogAppended { entry, .. } => {
                *self
                    .log_counts
                    .entry(entry.level.to_string())
                    .or_insert(0) += 1;
            }
            PipelineEvent::PipelineStatusChanged { status, .. } => {
                if status.is_terminal() {
                    self.final_status = Some(*status);
                }
            }
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total_events: self.total_events,
            progress_events: self.progress_events,
            stages_completed: self.stages_completed,
            stages_failed: self.stages_failed,
            final_status: self.final_status,
            log_counts: self.log_counts.clone(),
            stage_durations_ms: self
                .stage_durations
                .iter()
                .map(|(stage, stats)| (*stage, StatsSummary::from(stats)))
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_events: u64,
    pub progress_events: u64,
    pub stages_completed: u64,
    pub stages_failed: u64,
    pub final_status: Option<PipelineStatus>,
    pub log_counts: BTreeMap<String, u64>,
    pub stage_durations_ms: BTreeMap<StageId, StatsSummary>,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Run Metrics Summary ===")?;
        match self.final_status {
            Some(status) => writeln!(f, "Final status: {}", status)?,
            None => writeln!(f, "Final status: (running)")?,
        }
        writeln!(f, "Events: {}", self.total_events)?;
        writeln!(f, "Progress updates: {}", self.progress_events)?;
        writeln!(
            f,
            "Stages: {} completed, {} failed",
            self.stages_completed, self.stages_failed
        )?;

        if !self.stage_durations_ms.is_empty() {
            writeln!(f, "Stage durations (ms):")?;
            for (stage, stats) in &self.stage_durations_ms {
                writeln!(f, "  {}: {}", stage.key(), stats)?;
            }
        }

        if !self.log_counts.is_empty() {
            writeln!(f, "Log entries:")?;
            for (level, count) in &self.log_counts {
                writeln!(f, "  {}: {}", level, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{LogEntry, StageState};
    use std::time::Duration;

    fn stage_event(id: StageId, status: StageStatus) -> PipelineEvent {
        PipelineEvent::StageStatusChanged {
            run_id: 1,
            state: StageState {
                id,
                status,
                progress: if status == StageStatus::Completed { 100.0 } else { 0.0 },
                detail: None,
            },
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);
        stats.push(4.0);
        stats.push(5.0);

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_measures_stage_duration() {
        let mut aggregator = RunMetricsAggregator::new();
        let t0 = Instant::now();

        aggregator.update_at(&stage_event(StageId::Transcription, StageStatus::Running), t0);
        aggregator.update_at(
            &PipelineEvent::ProgressChanged {
                run_id: 1,
                stage: StageId::Transcription,
                progress: 50.0,
            },
            t0 + Duration::from_millis(100),
        );
        aggregator.update_at(
            &stage_event(StageId::Transcription, StageStatus::Completed),
            t0 + Duration::from_millis(250),
        );
        aggregator.update_at(
            &PipelineEvent::LogAppended {
                run_id: 1,
                entry: LogEntry::info("Transcribing audio track..."),
            },
            t0 + Duration::from_millis(260),
        );

        let summary = aggregator.summary();
        assert_eq!(summary.total_events, 4);
        assert_eq!(summary.progress_events, 1);
        assert_eq!(summary.stages_completed, 1);
        assert_eq!(summary.log_counts.get("INFO"), Some(&1));
        let duration = &summary.stage_durations_ms[&StageId::Transcription];
        assert!((duration.mean - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_aggregator_final_status() {
        let mut aggregator = RunMetricsAggregator::new();
        aggregator.update(&PipelineEvent::PipelineStatusChanged {
            run_id: 1,
            status: PipelineStatus::Processing,
        });
        assert_eq!(aggregator.final_status, None);
        aggregator.update(&PipelineEvent::PipelineStatusChanged {
            run_id: 1,
            status: PipelineStatus::Failed,
        });
        assert_eq!(aggregator.final_status, Some(PipelineStatus::Failed));

        aggregator.reset();
        assert_eq!(aggregator.total_events, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut summary = RunSummary {
            total_events: 42,
            progress_events: 30,
            stages_completed: 5,
            stages_failed: 0,
            final_status: Some(PipelineStatus::Completed),
            ..Default::default()
        };
        summary.stage_durations_ms.insert(
            StageId::Assembly,
            StatsSummary {
                count: 1,
                min: 1500.0,
                max: 1500.0,
                mean: 1500.0,
                std_dev: 0.0,
            },
        );

        let output = format!("{}", summary);
        assert!(output.contains("Final status: completed"));
        assert!(output.contains("5 completed, 0 failed"));
        assert!(output.contains("assembly: min=1500.000"));
    }
}
