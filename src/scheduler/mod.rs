pub mod tasks;

use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cron-driven housekeeping for the extension background.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<String>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Run `task` on every tick of the six-field cron `schedule`.
    pub async fn every<F>(&mut self, schedule: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let label = name.to_string();
        let job = Job::new_async(schedule, move |_id, _lock| {
            let label = label.clone();
            let run = task();
            Box::pin(async move {
                debug!("Scheduled job '{}' firing", label);
                run.await;
            })
        })
        .with_context(|| format!("Invalid schedule '{}' for job '{}'", schedule, name))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to register job '{}'", name))?;
        self.jobs.push(name.to_string());
        Ok(())
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler running: {}", self.jobs.join(", "));
        Ok(())
    }

    /// Stop every job. The job closures, and whatever they hold, are dropped.
    pub async fn shutdown(mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shut down scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
