//! Repository contracts and the in-memory store.
//!
//! The relational store behind a deployment is an external collaborator; the
//! coordinator sees it only through [`JobRepository`], [`ModelRepository`]
//! and [`VideoRepository`]. [`MemoryStore`] implements all three and can be
//! seeded from, and written back to, a JSON snapshot.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::job::{JobStatus, ModelRecord, UpscaleJob, VideoRecord};

/// Job storage.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a new job.
    async fn create_job(&self, job: &UpscaleJob) -> Result<()>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<UpscaleJob>>;

    /// Update a job unconditionally.
    async fn update_job(&self, job: &UpscaleJob) -> Result<()>;

    /// Write back the result of a claimed run.
    ///
    /// Succeeds only while the stored job is still `Processing` under
    /// `claim_id`; otherwise fails with [`JobError::ClaimLost`] and leaves the
    /// stored job untouched.
    async fn update_claimed_job(&self, job: &UpscaleJob, claim_id: Uuid) -> Result<()>;

    /// Refresh `claimed_at` of a claim that is still held.
    ///
    /// Fails with [`JobError::ClaimLost`] once the claim was released.
    async fn renew_claim(&self, id: Uuid, claim_id: Uuid) -> Result<DateTime<Utc>>;

    /// List all jobs, including soft-deleted ones.
    async fn list_jobs(&self) -> Result<Vec<UpscaleJob>>;

    /// Oldest queued job whose job row, video and model are all live.
    async fn next_eligible_job(&self) -> Result<Option<UpscaleJob>>;

    /// Atomically move the next eligible job to `Processing` for `worker`.
    ///
    /// Two concurrent callers never receive the same job.
    async fn claim_next_job(&self, worker: &str) -> Result<Option<UpscaleJob>>;

    /// Return jobs claimed before `claimed_before` to the queue.
    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

/// Model metadata storage.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Get a model by ID, including soft-deleted ones.
    async fn get_model(&self, id: &str) -> Result<Option<ModelRecord>>;
}

/// Video metadata storage.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Get a video by ID, including soft-deleted ones.
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>>;
}

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Models.
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    /// Videos.
    #[serde(default)]
    pub videos: Vec<VideoRecord>,
    /// Jobs in insertion order.
    #[serde(default)]
    pub jobs: Vec<UpscaleJob>,
}

impl QueueSnapshot {
    /// Read a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write a snapshot file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Job counts by status, excluding soft-deleted jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub ready: usize,
    pub failed: usize,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, (u64, UpscaleJob)>,
    next_seq: u64,
    videos: HashMap<Uuid, VideoRecord>,
    models: HashMap<String, ModelRecord>,
}

impl StoreState {
    fn is_eligible(&self, job: &UpscaleJob) -> bool {
        job.status == JobStatus::Queued
            && !job.is_deleted()
            && self.videos.get(&job.video_id).is_some_and(|v| !v.is_deleted())
            && self.models.get(&job.model_id).is_some_and(|m| !m.is_deleted())
    }

    fn next_eligible(&self) -> Option<Uuid> {
        self.jobs
            .values()
            .filter(|(_, job)| self.is_eligible(job))
            .min_by_key(|(seq, job)| (job.created_at, *seq))
            .map(|(_, job)| job.id)
    }

    fn ordered_jobs(&self) -> Vec<UpscaleJob> {
        let mut jobs: Vec<_> = self.jobs.values().collect();
        jobs.sort_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, job)| job.clone()).collect()
    }
}

/// In-memory implementation of every repository.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a snapshot's records.
    pub fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for model in snapshot.models {
                state.models.insert(model.spec.id.clone(), model);
            }
            for video in snapshot.videos {
                state.videos.insert(video.id, video);
            }
            for job in snapshot.jobs {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.jobs.insert(job.id, (seq, job));
            }
        }
        store
    }

    /// Copy every record out.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.read();
        let mut models: Vec<_> = state.models.values().cloned().collect();
        models.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        let mut videos: Vec<_> = state.videos.values().cloned().collect();
        videos.sort_by_key(|v| v.id);
        QueueSnapshot {
            models,
            videos,
            jobs: state.ordered_jobs(),
        }
    }

    /// Add or replace a model.
    pub fn insert_model(&self, model: ModelRecord) {
        self.state.write().models.insert(model.spec.id.clone(), model);
    }

    /// Add or replace a video.
    pub fn insert_video(&self, video: VideoRecord) {
        self.state.write().videos.insert(video.id, video);
    }

    /// Soft-delete a model.
    pub fn soft_delete_model(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        let model = state
            .models
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(format!("model {}", id)))?;
        model.deleted_at = Some(Utc::now());
        Ok(())
    }

    /// Soft-delete a video.
    pub fn soft_delete_video(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        let video = state
            .videos
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(format!("video {}", id)))?;
        video.deleted_at = Some(Utc::now());
        Ok(())
    }

    /// Soft-delete a job.
    pub fn soft_delete_job(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        let (_, job) = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(format!("job {}", id)))?;
        job.soft_delete();
        Ok(())
    }

    /// Job counts by status.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.read();
        let mut stats = QueueStats::default();
        for (_, job) in state.jobs.values().filter(|(_, job)| !job.is_deleted()) {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Ready => stats.ready += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, job: &UpscaleJob) -> Result<()> {
        let mut state = self.state.write();
        if state.jobs.contains_key(&job.id) {
            return Err(JobError::Storage(format!("job {} already exists", job.id)));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(job.id, (seq, job.clone()));
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<UpscaleJob>> {
        Ok(self.state.read().jobs.get(&id).map(|(_, job)| job.clone()))
    }

    async fn update_job(&self, job: &UpscaleJob) -> Result<()> {
        let mut state = self.state.write();
        let (_, stored) = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| JobError::NotFound(format!("job {}", job.id)))?;
        *stored = job.clone();
        Ok(())
    }

    async fn update_claimed_job(&self, job: &UpscaleJob, claim_id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        let (_, stored) = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| JobError::NotFound(format!("job {}", job.id)))?;
        if !stored.holds_claim(claim_id) {
            return Err(JobError::ClaimLost(job.id));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn renew_claim(&self, id: Uuid, claim_id: Uuid) -> Result<DateTime<Utc>> {
        let mut state = self.state.write();
        let (_, stored) = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(format!("job {}", id)))?;
        if !stored.holds_claim(claim_id) {
            return Err(JobError::ClaimLost(id));
        }
        let now = Utc::now();
        stored.claimed_at = Some(now);
        Ok(now)
    }

    async fn list_jobs(&self) -> Result<Vec<UpscaleJob>> {
        Ok(self.state.read().ordered_jobs())
    }

    async fn next_eligible_job(&self) -> Result<Option<UpscaleJob>> {
        let state = self.state.read();
        Ok(state
            .next_eligible()
            .and_then(|id| state.jobs.get(&id))
            .map(|(_, job)| job.clone()))
    }

    async fn claim_next_job(&self, worker: &str) -> Result<Option<UpscaleJob>> {
        // Selection and status change happen under one write lock
        let mut state = self.state.write();
        let Some(id) = state.next_eligible() else {
            return Ok(None);
        };
        let (_, job) = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::Internal(format!("job {} vanished during claim", id)))?;
        job.claim(worker)?;
        Ok(Some(job.clone()))
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.state.write();
        let mut released = Vec::new();
        for (_, job) in state.jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.claimed_at.is_some_and(|at| at < claimed_before);
            if stale {
                job.release_claim()?;
                released.push(job.id);
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl ModelRepository for MemoryStore {
    async fn get_model(&self, id: &str) -> Result<Option<ModelRecord>> {
        Ok(self.state.read().models.get(id).cloned())
    }
}

#[async_trait]
impl VideoRepository for MemoryStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>> {
        Ok(self.state.read().videos.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use upscale_neural::ModelSpec;

    use super::*;

    fn seeded() -> (MemoryStore, VideoRecord) {
        let store = MemoryStore::new();
        store.insert_model(ModelRecord::new(ModelSpec::new("x2", "x2", "x2.onnx", 2)));
        let video = VideoRecord::new("videos/a.mp4", 640, 360);
        store.insert_video(video.clone());
        (store, video)
    }

    #[tokio::test]
    async fn test_oldest_first() {
        let (store, video) = seeded();
        let now = Utc::now();
        let newer = UpscaleJob::new(video.id, "x2", "u").with_created_at(now);
        let older = UpscaleJob::new(video.id, "x2", "u").with_created_at(now - Duration::minutes(5));
        store.create_job(&newer).await.unwrap();
        store.create_job(&older).await.unwrap();

        let next = store.next_eligible_job().await.unwrap().unwrap();
        assert_eq!(next.id, older.id);
    }

    #[tokio::test]
    async fn test_ties_use_insertion_order() {
        let (store, video) = seeded();
        let now = Utc::now();
        let first = UpscaleJob::new(video.id, "x2", "u").with_created_at(now);
        let second = UpscaleJob::new(video.id, "x2", "u").with_created_at(now);
        store.create_job(&first).await.unwrap();
        store.create_job(&second).await.unwrap();
        assert_eq!(store.next_eligible_job().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_excludes_soft_deleted_model_and_job() {
        let (store, video) = seeded();
        store.insert_model(ModelRecord::new(ModelSpec::new("x4", "x4", "x4.onnx", 4)));

        let deleted_job = UpscaleJob::new(video.id, "x2", "u");
        let deleted_model_job = UpscaleJob::new(video.id, "x4", "u");
        store.create_job(&deleted_job).await.unwrap();
        store.create_job(&deleted_model_job).await.unwrap();
        store.soft_delete_job(deleted_job.id).unwrap();
        store.soft_delete_model("x4").unwrap();

        assert!(store.next_eligible_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_excludes_unknown_references() {
        let (store, _) = seeded();
        store
            .create_job(&UpscaleJob::new(Uuid::new_v4(), "x2", "u"))
            .await
            .unwrap();
        assert!(store.next_eligible_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (store, video) = seeded();
        let store = Arc::new(store);
        for _ in 0..8 {
            store.create_job(&UpscaleJob::new(video.id, "x2", "u")).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_next_job(&format!("w{}", worker)).await.unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                claimed.push(job.id);
            }
        }
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 8);
        assert_eq!(store.stats().processing, 8);
        assert!(store.claim_next_job("late").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let (store, video) = seeded();
        let job = UpscaleJob::new(video.id, "x2", "u");
        store.create_job(&job).await.unwrap();
        store.claim_next_job("w").await.unwrap().unwrap();

        assert!(store
            .release_stale_claims(Utc::now() - Duration::hours(1))
            .await
            .unwrap()
            .is_empty());
        let released = store
            .release_stale_claims(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(released, vec![job.id]);
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_renewed_claim_is_not_stale() {
        let (store, video) = seeded();
        store.create_job(&UpscaleJob::new(video.id, "x2", "u")).await.unwrap();
        let job = store.claim_next_job("w").await.unwrap().unwrap();
        let claimed_at = job.claimed_at.unwrap();

        let renewed = store.renew_claim(job.id, job.claim_id.unwrap()).await.unwrap();
        assert!(renewed >= claimed_at);
        assert!(store
            .release_stale_claims(renewed - Duration::milliseconds(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_released_claim_cannot_write_back() {
        let (store, video) = seeded();
        store.create_job(&UpscaleJob::new(video.id, "x2", "u")).await.unwrap();
        let mut first = store.claim_next_job("a").await.unwrap().unwrap();
        let first_claim = first.claim_id.unwrap();

        store
            .release_stale_claims(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        let second = store.claim_next_job("b").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);

        assert!(matches!(
            store.renew_claim(first.id, first_claim).await,
            Err(JobError::ClaimLost(id)) if id == first.id
        ));
        first.complete("out.mp4".into(), "720p".into()).unwrap();
        assert!(matches!(
            store.update_claimed_job(&first, first_claim).await,
            Err(JobError::ClaimLost(_))
        ));

        let stored = store.get_job(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.claimed_by.as_deref(), Some("b"));
        assert!(stored.output_path.is_none());

        let mut second = second;
        let second_claim = second.claim_id.unwrap();
        second.complete("out.mp4".into(), "720p".into()).unwrap();
        store.update_claimed_job(&second, second_claim).await.unwrap();
        assert_eq!(store.get_job(first.id).await.unwrap().unwrap().status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = MemoryStore::new();
        let err = store
            .update_job(&UpscaleJob::new(Uuid::new_v4(), "x2", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (store, video) = seeded();
        let a = UpscaleJob::new(video.id, "x2", "u");
        let b = UpscaleJob::new(video.id, "x2", "u");
        store.create_job(&a).await.unwrap();
        store.create_job(&b).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        store.snapshot().save(&path).unwrap();

        let restored = MemoryStore::from_snapshot(QueueSnapshot::load(&path).unwrap());
        let jobs = restored.list_jobs().await.unwrap();
        assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert!(restored.get_video(video.id).await.unwrap().is_some());
        assert!(restored.get_model("x2").await.unwrap().is_some());
    }
}
