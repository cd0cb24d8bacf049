//! Single-worker cron scheduler driving collector ingestion on a schedule.
//!
//! One background task evaluates every registered job on each poll tick;
//! jobs whose `next_run` has elapsed run serially, under a shared ingestion
//! mutex, so two jobs never race to write the catalog at once.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// A callback invoked when a job's schedule fires. Errors are logged and do
/// not stop the scheduler; the job is simply rescheduled for its next tick.
pub type JobFn = Arc<dyn Fn() -> futures_boxed::BoxFuture + Send + Sync>;

/// Local boxed-future alias to avoid pulling in the `futures` crate just for
/// this one type.
mod futures_boxed {
    use std::future::Future;
    use std::pin::Pin;
    pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
}

struct Job {
    name: String,
    schedule: Schedule,
    next_run: DateTime<Utc>,
    callback: JobFn,
}

/// Owns the background polling task. `start`/`stop` are idempotent: calling
/// either twice in a row is a no-op.
pub struct CronScheduler {
    jobs: AsyncMutex<Vec<Job>>,
    ingestion_lock: Arc<AsyncMutex<()>>,
    poll_interval: std::time::Duration,
    running: AtomicBool,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new(poll_interval: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: AsyncMutex::new(Vec::new()),
            ingestion_lock: Arc::new(AsyncMutex::new(())),
            poll_interval,
            running: AtomicBool::new(false),
            handle: AsyncMutex::new(None),
        })
    }

    /// Register a job. `cron_expr` uses standard 5-field cron syntax (minute
    /// hour day-of-month month day-of-week); a leading seconds field is
    /// prepended before parsing, since the underlying `cron` crate only
    /// accepts 6-field (seconds-leading) expressions. A 6-field expression is
    /// passed through unchanged.
    pub async fn register(&self, name: impl Into<String>, cron_expr: &str, callback: JobFn) -> Result<()> {
        let field_count = cron_expr.split_whitespace().count();
        let with_seconds = if field_count == 5 {
            format!("0 {cron_expr}")
        } else {
            cron_expr.to_string()
        };
        let schedule = Schedule::from_str(&with_seconds)
            .with_context(|| format!("invalid cron expression '{cron_expr}'"))?;
        let next_run = schedule
            .upcoming(Utc)
            .next()
            .context("cron schedule has no upcoming occurrences")?;
        self.jobs.lock().await.push(Job {
            name: name.into(),
            schedule,
            next_run,
            callback,
        });
        Ok(())
    }

    /// Start the background poll loop. A second call while already running
    /// is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.poll_interval);
            loop {
                interval.tick().await;
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                this.tick().await;
            }
        });
        // best-effort: if a prior handle exists (shouldn't, given the swap
        // guard above) it is simply dropped and detached.
        if let Ok(mut guard) = self.handle.try_lock() {
            *guard = Some(task);
        }
    }

    /// Stop the poll loop. A second call while already stopped is a no-op.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<(usize, JobFn, String)> = {
            let jobs = self.jobs.lock().await;
            jobs.iter()
                .enumerate()
                .filter(|(_, j)| j.next_run <= now)
                .map(|(i, j)| (i, j.callback.clone(), j.name.clone()))
                .collect()
        };

        for (index, callback, name) in due {
            let _guard = self.ingestion_lock.lock().await;
            if let Err(e) = callback().await {
                tracing::error!(job = %name, error = %e, "scheduled job failed");
            }
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(index) {
                if let Some(next) = job.schedule.upcoming(Utc).next() {
                    job.next_run = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn register_rejects_invalid_expression() {
        let scheduler = CronScheduler::new(std::time::Duration::from_millis(10));
        let result = scheduler
            .register("bad", "not a cron expr", Arc::new(|| Box::pin(async { Ok(()) })))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let scheduler = CronScheduler::new(std::time::Duration::from_millis(10));
        scheduler.start();
        scheduler.start();
        scheduler.stop();
        scheduler.stop();
    }

    #[tokio::test]
    async fn due_job_runs_and_reschedules() {
        let scheduler = CronScheduler::new(std::time::Duration::from_millis(5));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        scheduler
            .register(
                "every-minute",
                "* * * * *",
                Arc::new(move || {
                    let counter = counter_clone.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        {
            let mut jobs = scheduler.jobs.lock().await;
            jobs[0].next_run = Utc::now() - chrono::Duration::seconds(1);
        }
        scheduler.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn six_field_expression_still_parses() {
        let scheduler = CronScheduler::new(std::time::Duration::from_millis(5));
        let result = scheduler
            .register("legacy", "* * * * * *", Arc::new(|| Box::pin(async { Ok(()) })))
            .await;
        assert!(result.is_ok());
    }
}
