//! Pipeline statistics and metrics.

use std::time::Duration;

use contracts::{PipelineRun, PipelineStatus, StageId, StageStatus};
use dispatcher::MetricsSnapshot;
use observability::RunSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Run identifier
    pub run_id: u64,

    /// Status the run ended with
    pub status: PipelineStatus,

    /// Final snapshot of the run (stages and log)
    pub run: PipelineRun,

    /// Wall-clock duration including sink shutdown
    pub duration: Duration,

    /// Number of sinks that received events
    pub active_sinks: usize,

    /// Aggregated event metrics
    pub summary: RunSummary,

    /// Final per-sink counters
    pub sink_metrics: Vec<(String, MetricsSnapshot)>,
}

impl PipelineStats {
    /// The failed stage and its reason, if the run failed
    pub fn failed_stage(&self) -> Option<(StageId, String)> {
        self.run
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .map(|s| (s.id, s.detail.clone().unwrap_or_default()))
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        let media = self
            .run
            .input
            .as_ref()
            .map(|m| m.file_name())
            .unwrap_or_else(|| "-".to_string());

        println!("📊 Overview");
        println!("   ├─ Run: #{}", self.run_id);
        println!("   ├─ Media: {}", media);
        println!("   ├─ Status: {}", self.status);
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   └─ Active sinks: {}", self.active_sinks);

        println!("\n🎬 Stages");
        for (i, stage) in self.run.stages.iter().enumerate() {
            let prefix = if i == self.run.stages.len() - 1 { "└─" } else { "├─" };
            let detail = stage.detail.as_deref().unwrap_or("");
            println!(
                "   {} {:<20} {:<10} {:>5.1}%  {}",
                prefix,
                stage.id.label(),
                format!("{:?}", stage.status),
                stage.progress,
                detail
            );
        }

        println!("\n📈 Event Metrics");
        for line in self.summary.to_string().lines().skip(1) {
            println!("   {}", line);
        }

        if !self.sink_metrics.is_empty() {
            println!("\n📤 Sinks");
            for (name, metrics) in &self.sink_metrics {
                println!("   ├─ {}: {}", name, metrics);
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PipelineEvent, StageState};
    use observability::RunMetricsAggregator;

    #[test]
    fn test_failed_stage() {
        let mut run = PipelineRun::new();
        run.status = PipelineStatus::Failed;
        run.stages[2] = StageState {
            id: StageId::Summarization,
            status: StageStatus::Failed,
            progress: 40.0,
            detail: Some("model offline".to_string()),
        };

        let mut aggregator = RunMetricsAggregator::new();
        aggregator.update(&PipelineEvent::PipelineStatusChanged {
            run_id: 1,
            status: PipelineStatus::Failed,
        });

        let stats = PipelineStats {
            run_id: 1,
            status: PipelineStatus::Failed,
            run,
            duration: Duration::from_secs(3),
            active_sinks: 1,
            summary: aggregator.summary(),
            sink_metrics: vec![("console".to_string(), MetricsSnapshot::default())],
        };

        assert_eq!(
            stats.failed_stage(),
            Some((StageId::Summarization, "model offline".to_string()))
        );
        stats.print_summary();
    }
}
