//! Queue snapshot commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use upscale_jobs::{
    Collaborators, CoordinatorConfig, FfmpegFrameTool, FsBlobStore, JobStatus, MemoryStore,
    QueueSnapshot, UpscaleCoordinator,
};
use upscale_neural::ResampleLoader;
use uuid::Uuid;

fn load_store(path: &Path) -> anyhow::Result<Arc<MemoryStore>> {
    let snapshot = QueueSnapshot::load(path)
        .with_context(|| format!("Failed to read queue: {}", path.display()))?;
    Ok(Arc::new(MemoryStore::from_snapshot(snapshot)))
}

/// Queue an upscale of a video.
#[derive(Args, Debug)]
pub struct CmdEnqueue {
    /// Queue snapshot (JSON).
    #[arg(short, long)]
    pub queue: PathBuf,

    /// Video id.
    #[arg(long)]
    pub video: Uuid,

    /// Model id.
    #[arg(long)]
    pub model: String,

    /// Requesting user.
    #[arg(long, default_value = "cli")]
    pub owner: String,

    /// Retryable failures allowed before the job fails.
    #[arg(long, default_value_t = upscale_jobs::DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
}

impl CmdEnqueue {
    /// Execute the enqueue command.
    pub fn run(&self) -> anyhow::Result<()> {
        let store = load_store(&self.queue)?;
        let config = CoordinatorConfig {
            max_retries: self.max_retries,
            ..Default::default()
        };
        // Only the repositories are touched while queueing
        let coordinator = UpscaleCoordinator::new(
            config,
            Collaborators::from_store(
                store.clone(),
                Arc::new(FsBlobStore::new(".")),
                Arc::new(FfmpegFrameTool::new()),
                Arc::new(ResampleLoader::default()),
            ),
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let job = runtime.block_on(coordinator.enqueue(self.video, &self.model, &self.owner))?;

        store.snapshot().save(&self.queue)?;
        println!("{} {}", style("Queued").green().bold(), job.id);
        Ok(())
    }
}

/// Show jobs in a queue snapshot.
#[derive(Args, Debug)]
pub struct CmdStatus {
    /// Queue snapshot (JSON).
    #[arg(short, long)]
    pub queue: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdStatus {
    /// Execute the status command.
    pub fn run(&self) -> anyhow::Result<()> {
        let store = load_store(&self.queue)?;
        let stats = store.stats();
        let jobs: Vec<_> = store
            .snapshot()
            .jobs
            .into_iter()
            .filter(|job| !job.is_deleted())
            .collect();

        if self.json {
            let output = serde_json::json!({
                "stats": stats,
                "jobs": jobs,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("{}", style("Upscale Queue").cyan().bold());
        for job in &jobs {
            let status = match &job.status {
                JobStatus::Queued => style(job.status.to_string()).white(),
                JobStatus::Processing => style(job.status.to_string()).yellow(),
                JobStatus::Ready => style(job.status.to_string()).green(),
                JobStatus::Failed { .. } => style(job.status.to_string()).red(),
            };
            println!(
                "  {} {:<10} model={} retries={}/{}",
                job.id, status, job.model_id, job.retry_count, job.max_retries
            );
            if let Some(path) = &job.output_path {
                println!("      output: {}", path);
            }
            if let Some(error) = &job.last_error {
                println!("      last error: {}", style(error).dim());
            }
        }
        println!(
            "  {} queued, {} processing, {} ready, {} failed",
            stats.queued, stats.processing, stats.ready, stats.failed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upscale_jobs::{ModelRecord, VideoRecord};
    use upscale_neural::ModelSpec;

    #[test]
    fn test_enqueue_appends_job() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("queue.json");
        let video = VideoRecord::new("videos/a.mp4", 320, 240);
        QueueSnapshot {
            models: vec![ModelRecord::new(ModelSpec::new("x2", "x2", "x2.onnx", 2))],
            videos: vec![video.clone()],
            jobs: Vec::new(),
        }
        .save(&queue)
        .unwrap();

        let cmd = CmdEnqueue {
            queue: queue.clone(),
            video: video.id,
            model: "x2".into(),
            owner: "alice".into(),
            max_retries: 5,
        };
        cmd.run().unwrap();

        let snapshot = QueueSnapshot::load(&queue).unwrap();
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].status, JobStatus::Queued);
        assert_eq!(snapshot.jobs[0].max_retries, 5);
        assert_eq!(snapshot.jobs[0].owner, "alice");

        let unknown = CmdEnqueue {
            model: "x8".into(),
            ..cmd
        };
        assert!(unknown.run().is_err());
    }
}
