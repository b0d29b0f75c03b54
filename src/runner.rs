//! Sequential batch runner.
//!
//! One remote call per prompt, strictly in order. Every status change is
//! emitted as a full [`PromptJob`] snapshot on the update channel; the runner
//! never reads or mutates the owner's job list.
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::generator::{GenerateError, Generator};
use crate::model::{FailureKind, GeneratedImage, PromptJob, RunConfig};
use crate::sink::ImageSink;

pub type UpdateSender = mpsc::UnboundedSender<PromptJob>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<PromptJob>;

pub const EMPTY_BATCH_MESSAGE: &str = "prompt list is empty";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs created for real prompts.
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct BatchRunner {
    generator: Arc<dyn Generator>,
    sink: Option<Arc<dyn ImageSink>>,
}

impl BatchRunner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ImageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[instrument(skip_all, fields(prompts = prompts.len(), aspect = %config.aspect_ratio))]
    pub async fn run(
        &self,
        prompts: &[String],
        config: &RunConfig,
        cancel: &CancelToken,
        updates: &UpdateSender,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        if prompts.is_empty() {
            let mut advisory = PromptJob::pending("");
            advisory.fail(FailureKind::Validation, EMPTY_BATCH_MESSAGE);
            emit(updates, &advisory);
            summary.failed = 1;
            warn!("empty prompt batch");
            return summary;
        }

        let mut saves: Vec<JoinHandle<()>> = Vec::new();
        for prompt in prompts {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                info!(remaining = prompts.len() - summary.submitted, "batch cancelled");
                break;
            }

            let mut job = PromptJob::pending(prompt.as_str());
            emit(updates, &job);
            summary.submitted += 1;

            // Dropping the generation future aborts the in-flight request.
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GenerateError::Cancelled),
                res = self.generator.generate(prompt, config.aspect_ratio) => res,
            };

            match outcome {
                Ok(generation) => {
                    job.succeed(generation.images);
                    emit(updates, &job);
                    summary.succeeded += 1;
                    info!(id = job.id.0, images = job.images().len(), "job succeeded");

                    if config.auto_save {
                        if let Some(sink) = &self.sink {
                            saves.extend(
                                job.images()
                                    .iter()
                                    .map(|image| spawn_save(Arc::clone(sink), image.clone())),
                            );
                        }
                    }
                }
                Err(err) => {
                    job.fail(err.kind(), err.to_string());
                    emit(updates, &job);
                    summary.failed += 1;
                    warn!(id = job.id.0, error = %err, "job failed");
                    if err == GenerateError::Cancelled {
                        summary.cancelled = true;
                        break;
                    }
                }
            }
        }

        for res in join_all(saves).await {
            if let Err(err) = res {
                warn!(?err, "image save task aborted");
            }
        }

        info!(
            submitted = summary.submitted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        summary
    }
}

fn emit(updates: &UpdateSender, job: &PromptJob) {
    if updates.send(job.clone()).is_err() {
        debug!(id = job.id.0, "update receiver dropped");
    }
}

/// Save one image in the background. Failures are logged and never reach
/// the job.
fn spawn_save(sink: Arc<dyn ImageSink>, image: GeneratedImage) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = sink.save(&image).await {
            warn!(filename = %image.filename, error = %err, "failed to save image");
        }
    })
}
