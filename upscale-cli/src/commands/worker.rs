//! Queue worker command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use upscale_jobs::{
    Collaborators, CoordinatorEvent, FsBlobStore, MemoryStore, QueueSnapshot, UpscaleCoordinator,
};
use upscale_neural::{BackendLoader, OnnxLoader, ResampleLoader};

use crate::settings::WorkerSettings;

/// Process upscale jobs from a queue snapshot.
#[derive(Args, Debug)]
pub struct CmdWorker {
    /// Queue snapshot (JSON) with models, videos and jobs; rewritten on exit.
    #[arg(short, long)]
    pub queue: PathBuf,

    /// Worker settings (JSON).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Blob store root, overriding the settings file.
    #[arg(long)]
    pub media_root: Option<PathBuf>,

    /// Drain eligible jobs and exit instead of polling until Ctrl-C.
    #[arg(long)]
    pub once: bool,

    /// Use the bilinear preview backend instead of ONNX models.
    #[arg(long)]
    pub preview: bool,
}

impl CmdWorker {
    fn settings(&self) -> anyhow::Result<WorkerSettings> {
        let mut settings = match &self.config {
            Some(path) => WorkerSettings::load(path)?,
            None => WorkerSettings::default(),
        };
        if let Some(root) = &self.media_root {
            settings.media_root = root.clone();
        }
        Ok(settings)
    }

    /// Execute the worker command.
    pub fn run(&self) -> anyhow::Result<()> {
        let settings = self.settings()?;
        let snapshot = QueueSnapshot::load(&self.queue)
            .with_context(|| format!("Failed to read queue: {}", self.queue.display()))?;
        let store = Arc::new(MemoryStore::from_snapshot(snapshot));

        let loader: Arc<dyn BackendLoader> = if self.preview {
            Arc::new(ResampleLoader::default())
        } else {
            Arc::new(OnnxLoader::new(settings.inference_config()))
        };
        let coordinator = Arc::new(UpscaleCoordinator::new(
            settings.coordinator_config(),
            Collaborators::from_store(
                store.clone(),
                Arc::new(FsBlobStore::new(&settings.media_root)),
                Arc::new(settings.frame_tool()),
                loader,
            ),
        ));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let processed = runtime.block_on(self.drive(coordinator));

        // Persist whatever happened, even if the loop failed
        store
            .snapshot()
            .save(&self.queue)
            .with_context(|| format!("Failed to write queue: {}", self.queue.display()))?;
        let processed = processed?;

        let stats = store.stats();
        println!(
            "{} {} job(s) processed: {} ready, {} failed, {} queued, {} processing",
            style("Worker finished.").cyan().bold(),
            processed,
            style(stats.ready).green(),
            style(stats.failed).red(),
            stats.queued,
            stats.processing
        );
        Ok(())
    }

    async fn drive(&self, coordinator: Arc<UpscaleCoordinator>) -> anyhow::Result<usize> {
        let reporter = tokio::spawn(report_events(coordinator.subscribe()));

        let run = if self.once {
            coordinator.run_until_idle().await.map(drop).map_err(anyhow::Error::from)
        } else {
            self.run_until_ctrl_c(&coordinator).await
        };

        // Dropping the last sender closes the channel; the reporter drains it and returns
        drop(coordinator);
        let processed = reporter.await?;
        run?;
        Ok(processed)
    }

    async fn run_until_ctrl_c(&self, coordinator: &Arc<UpscaleCoordinator>) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(shutdown_rx).await })
        };

        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested, finishing current job");
        let _ = shutdown_tx.send(true);
        runner.await?;
        Ok(())
    }
}

/// Log published streams until the channel closes. Returns the number of
/// jobs claimed.
async fn report_events(mut events: broadcast::Receiver<CoordinatorEvent>) -> usize {
    let mut claimed = 0;
    loop {
        match events.recv().await {
            Ok(CoordinatorEvent::JobClaimed { .. }) => claimed += 1,
            Ok(CoordinatorEvent::StreamAdded {
                video_id, stream, ..
            }) => {
                info!(
                    video_id = %video_id,
                    label = %stream.label,
                    path = %stream.path,
                    "Stream added"
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event reporter lagged, job count may be low");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    claimed
}
