//! Per-job workspace isolation.
//!
//! Every job owns exactly one directory `<root>/<job_id>/` for its lifetime.
//! [`WorkspaceManager`] keeps a registry of live jobs keyed by [`JobId`];
//! the on-disk path is derived from the id and never handed out as the
//! job's identity.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Extension given to staged model files when the upload carries none.
pub const DEFAULT_INPUT_EXTENSION: &str = "dat";

/// Longest file extension accepted from a client-supplied filename.
const MAX_EXTENSION_LEN: usize = 8;

/// Where the identifier of a new job comes from.
#[derive(Debug, Clone, Copy)]
pub enum JobSource<'a> {
    /// Request/response jobs: a fresh, system-generated identifier.
    Generated,
    /// Streamed jobs: the transport session id, sanitized.
    Session(&'a str),
}

/// Result of a successful [`WorkspaceManager::stage`].
#[derive(Debug, Clone)]
pub struct StagedJob {
    pub job_id: JobId,
    pub workspace: PathBuf,
    pub input_file: PathBuf,
}

struct WorkspaceEntry {
    path: PathBuf,
    created_at: Timestamp,
}

/// Registry of live job workspaces under a shared root directory.
pub struct WorkspaceManager {
    root: PathBuf,
    jobs: Mutex<HashMap<JobId, WorkspaceEntry>>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Create the workspace root and clear out job directories left behind
    /// by an earlier process.
    ///
    /// The registry lives in memory only, so leftover directories can never
    /// be fetched or destroyed through it. Returns the number removed.
    pub async fn init(&self) -> Result<usize, CoreError> {
        let creation_error = |source| CoreError::WorkspaceCreation {
            path: self.root.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(creation_error)?;

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(creation_error)?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(creation_error)? {
            if !entry.file_type().await.map_err(creation_error)?.is_dir() {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale workspace")
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, root = %self.root.display(), "Removed stale workspaces");
        }
        Ok(removed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh workspace and write the model payload into it.
    ///
    /// The directory is created exclusively: an existing directory with the
    /// same name fails with [`CoreError::WorkspaceCreation`]. Line endings of
    /// the payload are normalized before it hits the disk. If writing the
    /// payload fails the half-built workspace is removed again.
    pub async fn stage(
        &self,
        source: JobSource<'_>,
        payload: &[u8],
        filename_hint: Option<&str>,
    ) -> Result<StagedJob, CoreError> {
        let job_id = match source {
            JobSource::Generated => JobId::generate(),
            JobSource::Session(session_id) => JobId::from_session(session_id)?,
        };
        let workspace = self.root.join(job_id.as_str());

        tokio::fs::create_dir(&workspace)
            .await
            .map_err(|source| CoreError::WorkspaceCreation {
                path: workspace.clone(),
                source,
            })?;

        let extension = filename_hint
            .and_then(input_extension)
            .unwrap_or(DEFAULT_INPUT_EXTENSION);
        let input_file = workspace.join(format!("{job_id}.{extension}"));

        if let Err(source) = tokio::fs::write(&input_file, normalize_line_endings(payload)).await {
            let _ = tokio::fs::remove_dir_all(&workspace).await;
            return Err(CoreError::WorkspaceCreation {
                path: input_file,
                source,
            });
        }

        self.jobs.lock().await.insert(
            job_id.clone(),
            WorkspaceEntry {
                path: workspace.clone(),
                created_at: chrono::Utc::now(),
            },
        );
        tracing::debug!(job_id = %job_id, path = %workspace.display(), "Workspace staged");

        Ok(StagedJob {
            job_id,
            workspace,
            input_file,
        })
    }

    /// Find the single output artifact with `extension` in a job's workspace.
    pub async fn locate_output(
        &self,
        job_id: &JobId,
        extension: &str,
    ) -> Result<PathBuf, CoreError> {
        let dir = self
            .workspace_path(job_id)
            .await
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        find_output(&dir, extension).await
    }

    /// Recursively remove a job's workspace.
    ///
    /// Returns `Ok(true)` when this call removed the directory and
    /// `Ok(false)` when the job was unknown or its directory was already
    /// gone. The registry entry is taken under the lock before touching the
    /// filesystem, so of several racing callers exactly one performs the
    /// removal. On a real I/O failure the entry is put back so the removal
    /// can be retried.
    pub async fn destroy(&self, job_id: &JobId) -> Result<bool, CoreError> {
        let Some(entry) = self.jobs.lock().await.remove(job_id) else {
            return Ok(false);
        };

        match tokio::fs::remove_dir_all(&entry.path).await {
            Ok(()) => {
                let age_ms = (chrono::Utc::now() - entry.created_at).num_milliseconds();
                tracing::debug!(job_id = %job_id, age_ms, "Workspace destroyed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => {
                let path = entry.path.clone();
                self.jobs.lock().await.insert(job_id.clone(), entry);
                Err(CoreError::WorkspaceDestruction { path, source })
            }
        }
    }

    /// Destroy every workspace older than `max_age`.
    ///
    /// Reclaims results that were kept for a later fetch that never came,
    /// and workspaces whose earlier removal failed. Returns the number of
    /// directories removed.
    pub async fn reap_expired(&self, max_age: Duration) -> usize {
        let now = chrono::Utc::now();
        let expired: Vec<JobId> = self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| {
                (now - entry.created_at)
                    .to_std()
                    .is_ok_and(|age| age >= max_age)
            })
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let mut removed = 0;
        for job_id in expired {
            match self.destroy(&job_id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to reap workspace"),
            }
        }
        removed
    }

    /// Take ownership of a job's workspace; see [`WorkspaceGuard`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn guard(self: &Arc<Self>, job_id: &JobId) -> WorkspaceGuard {
        WorkspaceGuard {
            manager: Arc::clone(self),
            job_id: job_id.clone(),
            runtime: Handle::current(),
            armed: true,
        }
    }

    pub async fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    pub async fn workspace_path(&self, job_id: &JobId) -> Option<PathBuf> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|entry| entry.path.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

/// Owner of one job's workspace.
///
/// Dropping an armed guard destroys the workspace in the background, so a
/// caller that is cancelled halfway through a job still leaves nothing
/// behind. [`WorkspaceGuard::destroy`] removes it in place and
/// [`WorkspaceGuard::retain`] hands the workspace over to the registry
/// alone.
#[must_use = "dropping the guard destroys the workspace"]
pub struct WorkspaceGuard {
    manager: Arc<WorkspaceManager>,
    job_id: JobId,
    runtime: Handle,
    armed: bool,
}

impl WorkspaceGuard {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Destroy the workspace now. See [`WorkspaceManager::destroy`].
    pub async fn destroy(mut self) -> Result<bool, CoreError> {
        let result = self.manager.destroy(&self.job_id).await;
        self.armed = false;
        result
    }

    /// Keep the workspace after the guard is gone.
    pub fn retain(mut self) -> JobId {
        self.armed = false;
        self.job_id.clone()
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let job_id = self.job_id.clone();
        tracing::debug!(job_id = %job_id, "Workspace guard dropped, destroying in background");
        self.runtime.spawn(async move {
            if let Err(e) = manager.destroy(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove workspace");
            }
        });
    }
}

/// Turn every `\r\n` into `\n`.
///
/// Carriage returns directly in front of a line feed are all dropped, so
/// the result never contains `\r\n` and normalizing twice is a no-op.
/// Lone `\r` bytes elsewhere are kept.
pub fn normalize_line_endings(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if b == b'\n' {
            while out.last() == Some(&b'\r') {
                out.pop();
            }
        }
        out.push(b);
    }
    out
}

/// Scan `dir` (non-recursively) for the single file with `extension`.
///
/// Extension matching is case-insensitive. More than one candidate is an
/// error rather than a silent first-match.
pub async fn find_output(dir: &Path, extension: &str) -> Result<PathBuf, CoreError> {
    let not_found = || CoreError::OutputNotFound {
        path: dir.to_path_buf(),
        extension: extension.to_string(),
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "Failed to read workspace {}: {e}",
                dir.display()
            )))
        }
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::Internal(format!("Failed to read workspace entry: {e}")))?
    {
        let path = entry.path();
        let is_match = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !is_match {
            continue;
        }
        let is_file = entry
            .file_type()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to read workspace entry: {e}")))?
            .is_file();
        if is_file {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(not_found()),
        1 => Ok(matches.remove(0)),
        count => Err(CoreError::AmbiguousOutput {
            path: dir.to_path_buf(),
            extension: extension.to_string(),
            count,
        }),
    }
}

/// Extract a safe extension from a client-supplied filename.
fn input_extension(filename: &str) -> Option<&str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}
