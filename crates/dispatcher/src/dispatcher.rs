//! Dispatcher - main loop for fan-out to sinks

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{PipelineEvent, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sink configurations
    pub sinks: Vec<SinkConfig>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    events: broadcast::Receiver<PipelineEvent>,
}

impl DispatcherBuilder {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig, events: broadcast::Receiver<PipelineEvent>) -> Self {
        Self { config, events }
    }

    /// Build and start the sink workers
    #[instrument(name = "dispatcher_builder_build", skip(self))]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let handles = Self::initialize_handles(&self.config)?;

        Ok(Dispatcher {
            handles,
            events: self.events,
            lagged: 0,
        })
    }

    #[instrument(
        name = "dispatcher_initialize_handles",
        skip(config),
        fields(sink_count = config.sinks.len())
    )]
    fn initialize_handles(config: &DispatcherConfig) -> Result<Vec<SinkHandle>, DispatcherError> {
        let mut handles = Vec::with_capacity(config.sinks.len());
        for sink_config in &config.sinks {
            // On error, workers already spawned stop once their sender is dropped
            handles.push(create_sink_handle(sink_config)?);
        }
        Ok(handles)
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Fans pipeline events out to sinks
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    events: broadcast::Receiver<PipelineEvent>,
    lagged: u64,
}

impl Dispatcher {
    /// Create a dispatcher with custom sink handles (for testing)
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        events: broadcast::Receiver<PipelineEvent>,
    ) -> Self {
        Self {
            handles,
            events,
            lagged: 0,
        }
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run the dispatcher main loop
    ///
    /// Consumes events and fans out to all sinks. Returns the final sink
    /// metrics once the event stream is closed (the orchestrator was dropped).
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> Vec<(String, MetricsSnapshot)> {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut event_count: u64 = 0;
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    event_count += 1;
                    self.dispatch_event(&event);
                    if event.is_terminal() {
                        debug!(events = event_count, run_id = event.run_id(), "Run finished");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    warn!(skipped, "Dispatcher lagged behind orchestrator, events lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!(
            events = event_count,
            lagged = self.lagged,
            "Event stream closed, shutting down"
        );

        let sink_metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        Self::shutdown_handles(self.handles).await;
        info!("Dispatcher shutdown complete");

        // Shutdown drains the queues, so the counters are final only now
        sink_metrics
            .into_iter()
            .map(|(name, metrics)| (name, metrics.snapshot()))
            .collect()
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<Vec<(String, MetricsSnapshot)>> {
        tokio::spawn(self.run())
    }

    fn dispatch_event(&self, event: &PipelineEvent) {
        for handle in &self.handles {
            handle.try_send(event.clone());
        }
    }

    async fn shutdown_handles(handles: Vec<SinkHandle>) {
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Convenience function to create a dispatcher from sink configs
#[instrument(name = "dispatcher_create", skip(sink_configs, events))]
pub fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    events: broadcast::Receiver<PipelineEvent>,
) -> Result<Dispatcher, DispatcherError> {
    let config = DispatcherConfig {
        sinks: sink_configs,
    };
    DispatcherBuilder::new(config, events).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{LogEntry, PipelineStatus};
    use std::collections::HashMap;

    fn events(n: u64) -> Vec<PipelineEvent> {
        let mut events: Vec<_> = (0..n)
            .map(|i| PipelineEvent::LogAppended {
                run_id: 1,
                entry: LogEntry::info(format!("line {i}")),
            })
            .collect();
        events.push(PipelineEvent::PipelineStatusChanged {
            run_id: 1,
            status: PipelineStatus::Completed,
        });
        events
    }

    #[tokio::test]
    async fn test_dispatcher_fanout() {
        let (tx, rx) = broadcast::channel(16);

        let handles = vec![
            SinkHandle::spawn(LogSink::new("sink1"), 10),
            SinkHandle::spawn(LogSink::new("sink2"), 10),
        ];
        let handle = Dispatcher::with_handles(handles, rx).spawn();

        for event in events(4) {
            tx.send(event).unwrap();
        }
        drop(tx);

        let metrics = handle.await.unwrap();
        assert_eq!(metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_create_dispatcher_from_config() {
        let (tx, rx) = broadcast::channel(16);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let configs = vec![
            SinkConfig {
                name: "console".to_string(),
                sink_type: SinkType::Log,
                queue_capacity: 50,
                params: HashMap::new(),
            },
            SinkConfig {
                name: "history".to_string(),
                sink_type: SinkType::File,
                queue_capacity: 50,
                params: HashMap::from([(
                    "path".to_string(),
                    path.display().to_string(),
                )]),
            },
        ];

        let handle = create_dispatcher(configs, rx).unwrap().spawn();
        for event in events(2) {
            tx.send(event).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_file_sink_without_path_fails() {
        let (_tx, rx) = broadcast::channel(4);
        let configs = vec![SinkConfig {
            name: "history".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 10,
            params: HashMap::new(),
        }];

        let err = create_dispatcher(configs, rx).err().unwrap();
        assert!(matches!(err, DispatcherError::SinkCreation { .. }));
        assert!(err.to_string().contains("failed to create sink 'history'"), "got: {err}");
    }
}
