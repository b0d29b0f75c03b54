//! The visible job log: owner of every [`PromptJob`] produced by the runner.
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::model::{FailureKind, JobId, PromptJob, RunConfig};
use crate::prompt::parse_prompts;
use crate::runner::{BatchRunner, RunSummary, UpdateReceiver};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLog {
    jobs: Vec<PromptJob>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_jobs(jobs: Vec<PromptJob>) -> Self {
        if let Some(max) = jobs.iter().map(|j| j.id).max() {
            JobId::observe(max);
        }
        Self { jobs }
    }

    pub fn jobs(&self) -> &[PromptJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: JobId) -> Option<&PromptJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PromptJob> {
        self.jobs.iter().filter(|j| j.is_failed())
    }

    /// Drop the previous run's jobs. Called before a fresh generation, not
    /// before a retry.
    pub fn begin_run(&mut self) {
        self.jobs.clear();
    }

    /// Apply one runner update: new ids are appended, known ids replaced.
    /// An update that would move a terminal job is ignored.
    pub fn apply(&mut self, job: PromptJob) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) if existing.status.is_terminal() => {
                debug!(id = job.id.0, "ignoring update for terminal job");
                false
            }
            Some(existing) => {
                *existing = job;
                true
            }
            None => {
                self.jobs.push(job);
                true
            }
        }
    }

    /// Apply everything currently queued on `rx` without waiting.
    pub fn drain_updates(&mut self, rx: &mut UpdateReceiver) -> usize {
        let mut applied = 0;
        while let Ok(job) = rx.try_recv() {
            if self.apply(job) {
                applied += 1;
            }
        }
        applied
    }

    /// Remove the failed job `id` and return its prompt for re-submission.
    /// Returns `None` if the job is unknown or not failed. An empty-batch
    /// advisory is removed but yields no prompt.
    pub fn take_failed(&mut self, id: JobId) -> Option<String> {
        let pos = self.jobs.iter().position(|j| j.id == id && j.is_failed())?;
        let job = self.jobs.remove(pos);
        if job.failure_kind() == Some(FailureKind::Validation) {
            return None;
        }
        Some(job.prompt)
    }

    /// Remove every failed job and return their prompts in log order.
    pub fn take_all_failed(&mut self) -> Vec<String> {
        let (failed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.jobs).into_iter().partition(|j| j.is_failed());
        self.jobs = kept;
        failed
            .into_iter()
            .filter(|j| j.failure_kind() != Some(FailureKind::Validation))
            .map(|j| j.prompt)
            .collect()
    }

    /// Run `prompts` and apply updates to this log while the run is in
    /// progress. `on_update` sees every snapshot after it has been applied.
    pub async fn drive<F>(
        &mut self,
        runner: &BatchRunner,
        prompts: &[String],
        config: &RunConfig,
        cancel: &CancelToken,
        mut on_update: F,
    ) -> RunSummary
    where
        F: FnMut(&PromptJob),
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = async move {
            let summary = runner.run(prompts, config, cancel, &tx).await;
            drop(tx);
            summary
        };
        let apply = async {
            while let Some(job) = rx.recv().await {
                if self.apply(job.clone()) {
                    on_update(&job);
                }
            }
        };
        let (summary, ()) = tokio::join!(run, apply);
        summary
    }

    /// Fresh generation from raw user input: clears the log, splits the
    /// input into prompts, runs them.
    pub async fn generate<F>(
        &mut self,
        runner: &BatchRunner,
        input: &str,
        config: &RunConfig,
        cancel: &CancelToken,
        on_update: F,
    ) -> RunSummary
    where
        F: FnMut(&PromptJob),
    {
        self.begin_run();
        let prompts = parse_prompts(input);
        info!(prompts = prompts.len(), "starting generation");
        self.drive(runner, &prompts, config, cancel, on_update).await
    }

    /// Re-run one failed job. `None` if `id` is not a retryable failure.
    pub async fn retry_one<F>(
        &mut self,
        runner: &BatchRunner,
        id: JobId,
        config: &RunConfig,
        cancel: &CancelToken,
        on_update: F,
    ) -> Option<RunSummary>
    where
        F: FnMut(&PromptJob),
    {
        let prompt = self.take_failed(id)?;
        info!(id = id.0, "retrying job");
        Some(self.drive(runner, &[prompt], config, cancel, on_update).await)
    }

    /// Re-run every failed job in the order they appear. `None` if nothing
    /// was retryable.
    pub async fn retry_all_failed<F>(
        &mut self,
        runner: &BatchRunner,
        config: &RunConfig,
        cancel: &CancelToken,
        on_update: F,
    ) -> Option<RunSummary>
    where
        F: FnMut(&PromptJob),
    {
        let prompts = self.take_all_failed();
        if prompts.is_empty() {
            return None;
        }
        info!(prompts = prompts.len(), "retrying failed jobs");
        Some(self.drive(runner, &prompts, config, cancel, on_update).await)
    }
}
