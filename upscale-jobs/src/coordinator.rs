//! Upscale job coordinator.
//!
//! Claims one eligible job per tick, drives the video through extraction,
//! per-frame upscaling and re-muxing, and records the outcome. The coordinator
//! is the only place errors stop propagating: every failure ends as a requeue
//! or a terminal `Failed` status, never as a panic or a lost job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rayon::prelude::*;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use upscale_neural::{
    encode_png, save_png, BackendLoader, ImageUpscaler, InferenceEngine, ModelCache, ModelSpec,
    UpscaleTimings,
};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::error::{JobError, Result};
use crate::frames::{frame_file_name, FrameTool, FRAME_PATTERN};
use crate::job::{resolution_label, StreamDescriptor, UpscaleJob, VideoRecord, DEFAULT_MAX_RETRIES};
use crate::store::{JobRepository, MemoryStore, ModelRepository, VideoRepository};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Time between poll ticks.
    pub poll_interval: Duration,
    /// Retry budget for jobs created through [`UpscaleCoordinator::enqueue`].
    pub max_retries: u32,
    /// Scratch directory; each job gets its own subdirectory.
    pub work_dir: PathBuf,
    /// Blob key prefix for upscaled videos.
    pub output_prefix: String,
    /// Frames upscaled concurrently within one job. 1 is sequential.
    pub frame_parallelism: usize,
    /// Claims older than this are returned to the queue before each poll.
    /// A running job renews its claim three times per period.
    pub stale_claim_after: Option<Duration>,
    /// Identity recorded on claimed jobs.
    pub worker_id: String,
    /// Loaded models kept in memory.
    pub model_cache_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: DEFAULT_MAX_RETRIES,
            work_dir: std::env::temp_dir().join("upscale-work"),
            output_prefix: "upscaled".to_string(),
            frame_parallelism: 1,
            stale_claim_after: Some(Duration::from_secs(3600)),
            worker_id: format!("worker-{}", std::process::id()),
            model_cache_size: 4,
        }
    }
}

/// Coordinator events.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A job was claimed by this worker.
    JobClaimed { job_id: Uuid, video_id: Uuid },
    /// A new rendition of a video is available.
    StreamAdded {
        video_id: Uuid,
        job_id: Uuid,
        stream: StreamDescriptor,
    },
    /// A retryable failure sent the job back to the queue.
    JobRequeued {
        job_id: Uuid,
        retry_count: u32,
        error: String,
    },
    /// The job failed for good.
    JobFailed { job_id: Uuid, error: String },
}

/// What one poll did with the job it claimed.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Output written, job `Ready`.
    Ready { job_id: Uuid, stream: StreamDescriptor },
    /// Back in the queue.
    Requeued {
        job_id: Uuid,
        retry_count: u32,
        error: String,
    },
    /// Marked `Failed`.
    Failed { job_id: Uuid, error: String },
    /// The claim was released and taken by another run; nothing recorded.
    ClaimLost { job_id: Uuid },
}

impl JobOutcome {
    /// Job the outcome belongs to.
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Ready { job_id, .. }
            | Self::Requeued { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::ClaimLost { job_id } => *job_id,
        }
    }
}

/// External collaborators the coordinator works through.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub videos: Arc<dyn VideoRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub frames: Arc<dyn FrameTool>,
    pub loader: Arc<dyn BackendLoader>,
}

impl Collaborators {
    /// Use one [`MemoryStore`] for every repository.
    pub fn from_store(
        store: Arc<MemoryStore>,
        blobs: Arc<dyn BlobStore>,
        frames: Arc<dyn FrameTool>,
        loader: Arc<dyn BackendLoader>,
    ) -> Self {
        Self {
            jobs: store.clone(),
            models: store.clone(),
            videos: store,
            blobs,
            frames,
            loader,
        }
    }
}

struct FrameBatch {
    width: u32,
    height: u32,
    timings: UpscaleTimings,
}

/// Drives upscale jobs from the queue to published streams.
pub struct UpscaleCoordinator {
    config: CoordinatorConfig,
    jobs: Arc<dyn JobRepository>,
    models: Arc<dyn ModelRepository>,
    videos: Arc<dyn VideoRepository>,
    blobs: Arc<dyn BlobStore>,
    frames: Arc<dyn FrameTool>,
    cache: Arc<ModelCache>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

impl UpscaleCoordinator {
    /// Create a new coordinator.
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let cache = Arc::new(ModelCache::new(
            collaborators.loader,
            config.model_cache_size,
        ));

        Self {
            config,
            jobs: collaborators.jobs,
            models: collaborators.models,
            videos: collaborators.videos,
            blobs: collaborators.blobs,
            frames: collaborators.frames,
            cache,
            event_tx,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Deterministic output key of a job. Re-runs overwrite the same blob.
    pub fn output_key(&self, job: &UpscaleJob) -> String {
        format!(
            "{}/{}/{}.mp4",
            self.config.output_prefix.trim_end_matches('/'),
            job.video_id,
            job.id
        )
    }

    /// Queue an upscale of a live video with a live model.
    pub async fn enqueue(
        &self,
        video_id: Uuid,
        model_id: &str,
        owner: &str,
    ) -> Result<UpscaleJob> {
        self.resolve_video(video_id).await?;
        self.resolve_model(model_id).await?;

        let job = UpscaleJob::new(video_id, model_id, owner).with_max_retries(self.config.max_retries);
        self.jobs.create_job(&job).await?;
        info!(job_id = %job.id, video_id = %video_id, model = model_id, owner, "Job queued");
        Ok(job)
    }

    async fn resolve_video(&self, id: Uuid) -> Result<VideoRecord> {
        self.videos
            .get_video(id)
            .await?
            .filter(|video| !video.is_deleted())
            .ok_or_else(|| JobError::NotFound(format!("video {}", id)))
    }

    async fn resolve_model(&self, id: &str) -> Result<ModelSpec> {
        self.models
            .get_model(id)
            .await?
            .filter(|model| !model.is_deleted())
            .map(|model| model.spec)
            .ok_or_else(|| JobError::NotFound(format!("model {}", id)))
    }

    async fn load_engine(&self, spec: ModelSpec) -> Result<Arc<InferenceEngine>> {
        let cache = Arc::clone(&self.cache);
        Ok(tokio::task::spawn_blocking(move || cache.get_or_load(&spec)).await??)
    }

    /// Upscale one stored image into `output_key` as PNG.
    pub async fn upscale_image(
        &self,
        model_id: &str,
        input_key: &str,
        output_key: &str,
    ) -> Result<UpscaleTimings> {
        let spec = self.resolve_model(model_id).await?;
        let engine = self.load_engine(spec).await?;
        let bytes = self.blobs.read(input_key).await?;

        let (png, timings) = tokio::task::spawn_blocking(move || {
            let upscaled = ImageUpscaler::new(engine).upscale_bytes(&bytes)?;
            Ok::<_, upscale_neural::NeuralError>((encode_png(&upscaled.image)?, upscaled.timings))
        })
        .await??;

        self.blobs.write(output_key, &png).await?;
        info!(
            model = model_id,
            input = input_key,
            output = output_key,
            total_ms = timings.total().as_secs_f64() * 1000.0,
            "Image upscaled"
        );
        Ok(timings)
    }

    /// Upscale every frame of the job's video and store the re-muxed result.
    ///
    /// Works in a fresh scratch directory that is removed afterwards, whatever
    /// the outcome. Does not touch the job's status.
    pub async fn upscale_video(&self, job: &UpscaleJob) -> Result<StreamDescriptor> {
        let video = self.resolve_video(job.video_id).await?;
        let spec = self.resolve_model(&job.model_id).await?;

        let source = self.blobs.local_path(&video.source_path)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(JobError::SourceNotFound(video.source_path.clone()));
        }

        let work = self.work_dir_for(job);
        remove_dir_if_exists(&work).await?;
        tokio::fs::create_dir_all(&work).await?;

        let result = self.process_video(job, &video, spec, &source, &work).await;

        if let Err(e) = remove_dir_if_exists(&work).await {
            warn!(job_id = %job.id, error = %e, "Failed to clean work directory");
        }
        result
    }

    /// Scratch directory of one run. Separate claims of the same job never
    /// share one.
    fn work_dir_for(&self, job: &UpscaleJob) -> PathBuf {
        match job.claim_id {
            Some(claim) => self.config.work_dir.join(format!("{}.{}", job.id, claim.simple())),
            None => self.config.work_dir.join(job.id.to_string()),
        }
    }

    async fn process_video(
        &self,
        job: &UpscaleJob,
        video: &VideoRecord,
        spec: ModelSpec,
        source: &Path,
        work: &Path,
    ) -> Result<StreamDescriptor> {
        let probe = self.frames.probe(source).await?;
        spec.check_input(probe.width, probe.height)?;
        let engine = self.load_engine(spec).await?;

        let source_frames = work.join("frames");
        let upscaled_frames = work.join("upscaled");
        tokio::fs::create_dir_all(&upscaled_frames).await?;

        let frames = self.frames.extract(source, &source_frames).await?;
        if frames.is_empty() {
            return Err(JobError::FrameTool(format!(
                "no frames extracted from {}",
                video.source_path
            )));
        }
        info!(job_id = %job.id, frames = frames.len(), "Frames extracted");

        let out_dir = upscaled_frames.clone();
        let parallelism = self.config.frame_parallelism;
        let batch = tokio::task::spawn_blocking(move || {
            upscale_frames(engine, &frames, &out_dir, parallelism)
        })
        .await??;

        let frame_rate = video
            .frame_rate
            .filter(|rate| *rate > 0.0)
            .or(probe.frame_rate)
            .ok_or_else(|| {
                JobError::FrameTool(format!("no frame rate known for {}", video.source_path))
            })?;
        let encoded = work.join("output.mp4");
        self.frames
            .assemble(&upscaled_frames, FRAME_PATTERN, frame_rate, source, &encoded)
            .await?;

        let key = self.output_key(job);
        self.blobs.persist_file(&key, &encoded).await?;

        info!(
            job_id = %job.id,
            output = %key,
            width = batch.width,
            height = batch.height,
            inference_ms = batch.timings.inference.as_secs_f64() * 1000.0,
            decode_ms = batch.timings.decode.as_secs_f64() * 1000.0,
            "Video upscaled"
        );

        Ok(StreamDescriptor {
            job_id: job.id,
            model_id: job.model_id.clone(),
            label: resolution_label(batch.width, batch.height),
            width: batch.width,
            height: batch.height,
            path: key,
        })
    }

    /// Claim and run the next eligible job.
    ///
    /// Returns `Ok(None)` when nothing is eligible. Job failures are recorded
    /// on the job and reported through the outcome; `Err` means the queue
    /// itself could not be read or written.
    pub async fn poll_once(&self) -> Result<Option<JobOutcome>> {
        if let Some(after) = self.config.stale_claim_after {
            let after = chrono::Duration::from_std(after)
                .map_err(|e| JobError::Internal(format!("stale claim threshold: {}", e)))?;
            let released = self.jobs.release_stale_claims(Utc::now() - after).await?;
            if !released.is_empty() {
                warn!(count = released.len(), "Released stale claims");
            }
        }

        let Some(mut job) = self.jobs.claim_next_job(&self.config.worker_id).await? else {
            debug!("No eligible jobs");
            return Ok(None);
        };

        info!(
            job_id = %job.id,
            video_id = %job.video_id,
            model = %job.model_id,
            attempt = job.retry_count + 1,
            "Job claimed"
        );
        self.emit(CoordinatorEvent::JobClaimed {
            job_id: job.id,
            video_id: job.video_id,
        });

        let claim = job
            .claim_id
            .ok_or_else(|| JobError::Internal(format!("job {} claimed without a claim id", job.id)))?;

        let outcome = match self.run_claimed(&job, claim).await {
            Err(JobError::ClaimLost(_)) => self.claim_lost(&job),
            Ok(stream) => {
                job.complete(stream.path.clone(), stream.label.clone())?;
                if !self.write_back(&job, claim).await? {
                    return Ok(Some(self.claim_lost(&job)));
                }
                info!(job_id = %job.id, resolution = %stream.label, "Job ready");
                self.emit(CoordinatorEvent::StreamAdded {
                    video_id: job.video_id,
                    job_id: job.id,
                    stream: stream.clone(),
                });
                JobOutcome::Ready {
                    job_id: job.id,
                    stream,
                }
            }
            Err(e) if e.is_retryable() => {
                let error = e.to_string();
                let requeued = job.requeue(error.clone())?;
                if !self.write_back(&job, claim).await? {
                    return Ok(Some(self.claim_lost(&job)));
                }
                if requeued {
                    warn!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        max_retries = job.max_retries,
                        error = %error,
                        "Job requeued"
                    );
                    self.emit(CoordinatorEvent::JobRequeued {
                        job_id: job.id,
                        retry_count: job.retry_count,
                        error: error.clone(),
                    });
                    JobOutcome::Requeued {
                        job_id: job.id,
                        retry_count: job.retry_count,
                        error,
                    }
                } else {
                    error!(job_id = %job.id, retries = job.retry_count, error = %error, "Job failed after retries");
                    self.record_failure(&job, error)
                }
            }
            Err(e) => {
                let error = e.to_string();
                job.fail(error.clone())?;
                if !self.write_back(&job, claim).await? {
                    return Ok(Some(self.claim_lost(&job)));
                }
                error!(job_id = %job.id, error = %error, "Job failed");
                self.record_failure(&job, error)
            }
        };

        Ok(Some(outcome))
    }

    /// Run a claimed job, renewing the claim while it runs.
    ///
    /// Stops the run with [`JobError::ClaimLost`] as soon as a renewal finds
    /// the claim gone.
    async fn run_claimed(&self, job: &UpscaleJob, claim: Uuid) -> Result<StreamDescriptor> {
        let Some(stale_after) = self.config.stale_claim_after else {
            return self.upscale_video(job).await;
        };
        let period = (stale_after / 3).max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let lost = {
            let work = self.upscale_video(job);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    result = &mut work => return result,
                    _ = heartbeat.tick() => match self.jobs.renew_claim(job.id, claim).await {
                        Ok(_) => debug!(job_id = %job.id, "Claim renewed"),
                        Err(JobError::ClaimLost(id)) => break JobError::ClaimLost(id),
                        Err(e) => warn!(job_id = %job.id, error = %e, "Claim renewal failed"),
                    },
                }
            }
        };

        // The cancelled run skipped its own cleanup
        if let Err(e) = remove_dir_if_exists(&self.work_dir_for(job)).await {
            warn!(job_id = %job.id, error = %e, "Failed to clean work directory");
        }
        Err(lost)
    }

    /// Store the job if this run still holds `claim`. Returns `false` when the
    /// claim was lost and nothing was written.
    async fn write_back(&self, job: &UpscaleJob, claim: Uuid) -> Result<bool> {
        match self.jobs.update_claimed_job(job, claim).await {
            Ok(()) => Ok(true),
            Err(JobError::ClaimLost(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn claim_lost(&self, job: &UpscaleJob) -> JobOutcome {
        warn!(job_id = %job.id, "Claim lost to another run, dropping result");
        JobOutcome::ClaimLost { job_id: job.id }
    }

    fn record_failure(&self, job: &UpscaleJob, error: String) -> JobOutcome {
        self.emit(CoordinatorEvent::JobFailed {
            job_id: job.id,
            error: error.clone(),
        });
        JobOutcome::Failed {
            job_id: job.id,
            error,
        }
    }

    /// Poll until no eligible job remains. Returns the number of polls that
    /// processed a job.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        while self.poll_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Poll on a fixed interval until `shutdown` turns `true` or its sender
    /// is dropped.
    ///
    /// A tick awaits its job before the next tick is taken, so jobs never
    /// overlap within one coordinator. Missed ticks are skipped, not replayed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            worker = %self.config.worker_id,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Coordinator started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker = %self.config.worker_id, "Coordinator stopped");
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Upscale `frames` in order, writing frame `i` as `frame_file_name(i)`.
fn upscale_frames(
    engine: Arc<InferenceEngine>,
    frames: &[PathBuf],
    out_dir: &Path,
    parallelism: usize,
) -> Result<FrameBatch> {
    let upscaler = ImageUpscaler::new(engine);
    let run = |(index, frame): (usize, &PathBuf)| -> Result<(u32, u32, UpscaleTimings)> {
        let upscaled = upscaler.upscale_file(frame)?;
        save_png(&upscaled.image, &out_dir.join(frame_file_name(index)))?;
        Ok((upscaled.image.width(), upscaled.image.height(), upscaled.timings))
    };

    let results = if parallelism > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|e| JobError::Internal(format!("frame pool: {}", e)))?;
        pool.install(|| frames.par_iter().enumerate().map(&run).collect::<Result<Vec<_>>>())?
    } else {
        frames.iter().enumerate().map(&run).collect::<Result<Vec<_>>>()?
    };

    let (width, height, _) = results[0];
    let mut timings = UpscaleTimings::default();
    for (index, (w, h, frame_timings)) in results.iter().enumerate() {
        if (*w, *h) != (width, height) {
            return Err(JobError::Internal(format!(
                "frame {} upscaled to {}x{}, expected {}x{}",
                index, w, h, width, height
            )));
        }
        timings.accumulate(frame_timings);
    }

    Ok(FrameBatch {
        width,
        height,
        timings,
    })
}
