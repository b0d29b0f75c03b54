use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a [`PromptJob`]. Ids are handed out in creation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure ids handed out later are greater than `seen`. Used after a
    /// persisted log is loaded back into a fresh process.
    pub fn observe(seen: JobId) {
        NEXT_JOB_ID.fetch_max(seen.0 + 1, Ordering::Relaxed);
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "IMAGE_ASPECT_RATIO_LANDSCAPE_FOUR_THREE")]
    Landscape43,
    #[serde(rename = "IMAGE_ASPECT_RATIO_LANDSCAPE")]
    Landscape,
    #[serde(rename = "IMAGE_ASPECT_RATIO_PORTRAIT_THREE_FOUR")]
    Portrait34,
    #[serde(rename = "IMAGE_ASPECT_RATIO_PORTRAIT")]
    Portrait,
    #[serde(rename = "IMAGE_ASPECT_RATIO_SQUARE")]
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Landscape43,
        AspectRatio::Landscape,
        AspectRatio::Portrait34,
        AspectRatio::Portrait,
        AspectRatio::Square,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape43 => "IMAGE_ASPECT_RATIO_LANDSCAPE_FOUR_THREE",
            AspectRatio::Landscape => "IMAGE_ASPECT_RATIO_LANDSCAPE",
            AspectRatio::Portrait34 => "IMAGE_ASPECT_RATIO_PORTRAIT_THREE_FOUR",
            AspectRatio::Portrait => "IMAGE_ASPECT_RATIO_PORTRAIT",
            AspectRatio::Square => "IMAGE_ASPECT_RATIO_SQUARE",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            AspectRatio::Landscape43 => "landscape-4-3",
            AspectRatio::Landscape => "landscape",
            AspectRatio::Portrait34 => "portrait-3-4",
            AspectRatio::Portrait => "portrait",
            AspectRatio::Square => "square",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|a| a.as_str() == s || a.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown aspect ratio: {}", s))
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One generated image as returned by the API: a `data:` URI plus the name
/// to save it under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedImage {
    pub filename: String,
    pub url: String,
}

/// Classification of a failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Auth,
    RateLimit,
    Timeout,
    Upstream,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Auth => "auth",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Timeout => "timeout",
            FailureKind::Upstream => "upstream",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Success { images: Vec<GeneratedImage> },
    Error { kind: FailureKind, message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success { .. } => "success",
            JobStatus::Error { .. } => "error",
        }
    }
}

/// One tracked attempt to generate images for one prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptJob {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl PromptJob {
    pub fn pending(prompt: impl Into<String>) -> Self {
        Self {
            id: JobId::next(),
            prompt: prompt.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Move a pending job to `Success`. Returns false (and leaves the job
    /// untouched) if it already reached a terminal status.
    pub fn succeed(&mut self, images: Vec<GeneratedImage>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Success { images };
        true
    }

    /// Move a pending job to `Error`. Same rule as [`PromptJob::succeed`].
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Error {
            kind,
            message: message.into(),
        };
        true
    }

    pub fn images(&self) -> &[GeneratedImage] {
        match &self.status {
            JobStatus::Success { images } => images,
            _ => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            JobStatus::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Error { .. })
    }
}

/// Per-run settings forwarded with every request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunConfig {
    pub aspect_ratio: AspectRatio,
    pub auto_save: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(n: u32) -> GeneratedImage {
        GeneratedImage {
            filename: format!("img_{}.jpg", n),
            url: "data:image/jpeg;base64,AAAA".into(),
        }
    }

    #[test]
    fn ids_increase_in_creation_order() {
        let a = PromptJob::pending("a");
        let b = PromptJob::pending("b");
        assert!(a.id < b.id);
    }

    #[test]
    fn terminal_status_is_never_revisited() {
        let mut job = PromptJob::pending("cat");
        assert!(job.succeed(vec![image(1)]));
        assert!(!job.fail(FailureKind::Upstream, "boom"));
        assert!(!job.succeed(vec![]));
        assert_eq!(job.images().len(), 1);
        assert_eq!(job.error_message(), None);

        let mut job = PromptJob::pending("dog");
        assert!(job.fail(FailureKind::Timeout, "request timed out."));
        assert!(!job.succeed(vec![image(2)]));
        assert_eq!(job.error_message(), Some("request timed out."));
        assert!(job.images().is_empty());
    }

    #[test]
    fn aspect_ratio_parses_short_and_wire_names() {
        assert_eq!("square".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert_eq!(
            "IMAGE_ASPECT_RATIO_PORTRAIT_THREE_FOUR".parse::<AspectRatio>().unwrap(),
            AspectRatio::Portrait34
        );
        assert!("wide".parse::<AspectRatio>().is_err());
        assert_eq!(
            serde_json::to_value(AspectRatio::Landscape43).unwrap(),
            "IMAGE_ASPECT_RATIO_LANDSCAPE_FOUR_THREE"
        );
    }

    #[test]
    fn status_serializes_with_tag() {
        let mut job = PromptJob::pending("cat");
        job.fail(FailureKind::RateLimit, "rate limit exceeded, retry later.");
        let v = serde_json::to_value(&job.status).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["kind"], "RateLimit");
    }
}
