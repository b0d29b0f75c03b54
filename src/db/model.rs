//! Row models used by the repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::model::{JobId, JobStatus, PromptJob};

/// One persisted job. `detail` holds the JSON-encoded [`JobStatus`];
/// `status` duplicates its label so the table is readable by hand.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub position: i64,
    pub prompt: String,
    pub status: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl JobRow {
    pub fn from_job(position: usize, job: &PromptJob) -> Result<Self> {
        Ok(Self {
            id: job.id.0 as i64,
            position: position as i64,
            prompt: job.prompt.clone(),
            status: job.status.label().to_string(),
            detail: serde_json::to_string(&job.status).context("failed to encode job status")?,
            created_at: job.created_at,
        })
    }

    pub fn into_job(self) -> Result<PromptJob> {
        let status: JobStatus = serde_json::from_str(&self.detail)
            .with_context(|| format!("job {} has unreadable status", self.id))?;
        Ok(PromptJob {
            id: JobId(self.id as u64),
            prompt: self.prompt,
            status,
            created_at: self.created_at,
        })
    }
}
