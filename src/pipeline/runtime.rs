//! Worker runtime - wires every stage to its topic.
//!
//! Each stage gets its own consumer task draining its topic; each message is
//! processed end-to-end by a single worker inside the uniform wrapper. The
//! runtime also owns the auto-resume driver. Shutdown is cooperative via a
//! shared cancellation token.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, MemoryBus, Topic};
use crate::enrich::EnricherEngine;
use crate::lag::LagStage;
use crate::pending::AutoResumeDriver;
use crate::pipeline::{RouterStage, SplitterStage};
use crate::services::CoreServices;
use crate::stage::{Stage, StageRunner};
use crate::upload::UploadStage;

/// Running worker pool for all pipeline stages.
#[derive(Debug)]
pub struct PipelineRuntime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineRuntime {
    /// Subscribe every stage to its topic and start the workers.
    ///
    /// Takes the concrete in-process bus: subscription is a transport
    /// concern, publishing stays behind the `MessageBus` trait.
    pub async fn start(services: Arc<CoreServices>, bus: Arc<MemoryBus>) -> Self {
        let cancel = CancellationToken::new();
        let runner = services.stage_runner();
        let mut tasks = Vec::new();

        let raw_rx = bus.subscribe(Topic::Raw).await;
        tasks.push(spawn_worker(
            runner.clone(),
            Arc::new(SplitterStage::new(services.clone())),
            raw_rx,
            cancel.clone(),
        ));

        let pipeline_rx = bus.subscribe(Topic::Pipeline).await;
        tasks.push(spawn_worker(
            runner.clone(),
            Arc::new(EnricherEngine::new(services.clone())),
            pipeline_rx,
            cancel.clone(),
        ));

        let enriched_rx = bus.subscribe(Topic::Enriched).await;
        tasks.push(spawn_worker(
            runner.clone(),
            Arc::new(RouterStage::new(services.clone())),
            enriched_rx,
            cancel.clone(),
        ));

        let lag_rx = bus.subscribe(Topic::Lag).await;
        tasks.push(spawn_worker(
            runner.clone(),
            Arc::new(LagStage::new(services.clone())),
            lag_rx,
            cancel.clone(),
        ));

        for destination in services.uploaders.destinations() {
            if let Some(uploader) = services.uploaders.get(destination) {
                let rx = bus.subscribe(Topic::Destination(destination)).await;
                tasks.push(spawn_worker(
                    runner.clone(),
                    Arc::new(UploadStage::new(services.clone(), uploader)),
                    rx,
                    cancel.clone(),
                ));
            }
        }

        let driver = AutoResumeDriver {
            resumer: services.resumer(),
            scan_interval: services.config.limits.auto_resume_scan_interval,
        };
        tasks.push(tokio::spawn(driver.run(cancel.clone())));

        Self { cancel, tasks }
    }

    /// Stop all workers and wait for them to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::error!(error = %err, "stage worker ended abnormally");
                }
            }
        }
    }
}

/// One consumer loop: drain the topic until cancelled or closed.
fn spawn_worker(
    runner: StageRunner,
    stage: Arc<dyn Stage>,
    mut rx: mpsc::Receiver<BusMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => {
                    match message {
                        // Failures are recorded by the wrapper; the usual
                        // per-topic policy is DO_NOT_RETRY, so the message
                        // is not requeued here.
                        Some(message) => {
                            let _ = runner.run(stage.as_ref(), &message).await;
                        }
                        None => break,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::EnricherRegistry;
    use crate::notify::LogNotifier;
    use crate::stage::LogErrorSink;
    use crate::store::MemoryStore;
    use crate::types::CoreConfig;
    use crate::upload::UploaderRegistry;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = MemoryStore::new_shared();
        let bus = MemoryBus::new();
        let services = CoreServices::new(
            CoreConfig::default(),
            bus.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            EnricherRegistry::standard(),
            UploaderRegistry::standard(),
            Arc::new(LogNotifier),
            Arc::new(LogErrorSink),
        );

        let runtime = PipelineRuntime::start(services, bus).await;
        runtime.shutdown().await;
    }
}
