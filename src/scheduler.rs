//! Scheduler: one registered job per enabled model, serialized by a single
//! process-wide run lock.
//!
//! The scheduler is an owned instance, not a global; reload and shutdown
//! arrive as explicit control events so the stop/start transition is an
//! observable state change.

use crate::config::{Config, ModelConfig, ScheduleConfig};
use crate::error::{Error, Result};
use crate::model::Model;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Re-read the configuration file and re-register every job.
    Reload,
    /// Stop scheduling; in-flight runs are not interrupted.
    Shutdown,
}

pub struct Scheduler {
    config_path: PathBuf,
    config: Config,
    inner: Option<JobScheduler>,
    /// Serializes every scheduled pipeline execution process-wide.
    run_lock: Arc<Mutex<()>>,
    job_count: usize,
}

impl Scheduler {
    pub fn new(config_path: PathBuf, config: Config) -> Self {
        Self {
            config_path,
            config,
            inner: None,
            run_lock: Arc::new(Mutex::new(())),
            job_count: 0,
        }
    }

    /// Register one job per enabled model and start dispatching.
    pub async fn start(&mut self) -> Result<()> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| Error::Scheduler(e.to_string()))?;

        let mut count = 0;
        for (name, model) in &self.config.models {
            let Some(schedule) = &model.schedule else {
                continue;
            };
            if !schedule.enabled {
                continue;
            }

            info!(model = %name, schedule = %schedule.describe(), "Register");
            let job = self.build_job(name, model, schedule)?;
            sched
                .add(job)
                .await
                .map_err(|e| Error::Scheduler(e.to_string()))?;
            count += 1;
        }

        sched
            .start()
            .await
            .map_err(|e| Error::Scheduler(e.to_string()))?;

        self.inner = Some(sched);
        self.job_count = count;
        info!(count, "Scheduler started");
        Ok(())
    }

    fn build_job(&self, name: &str, model: &ModelConfig, schedule: &ScheduleConfig) -> Result<Job> {
        let job_name = name.to_string();
        let model = model.clone();
        let temp_dir = self.config.temp_dir.clone();
        let state_dir = self.config.state_dir.clone();
        let run_lock = self.run_lock.clone();

        let action = move |_uuid, _sched| {
            let name = job_name.clone();
            let model = model.clone();
            let temp_dir = temp_dir.clone();
            let state_dir = state_dir.clone();
            let run_lock = run_lock.clone();
            Box::pin(async move {
                let _guard = run_lock.lock().await;
                info!(model = %name, "Scheduled run starting");
                // A fresh working tree per run.
                let m = Model::new(&name, model, &temp_dir, &state_dir);
                if let Err(e) = m.perform().await {
                    error!(model = %name, error = %e, "Scheduled run failed");
                } else {
                    info!(model = %name, "Scheduled run done");
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        let job = if let Some(cron) = &schedule.cron {
            Job::new_async(cron.as_str(), action)
                .map_err(|e| Error::Config(format!("model {name}: cron: {e}")))?
        } else if let Some(at) = &schedule.at {
            // Interval plus time-of-day collapses to one run per day at
            // that time.
            let cron = cron_for_time_of_day(at)
                .ok_or_else(|| Error::Config(format!("model {name}: invalid at: {at}")))?;
            Job::new_async(cron.as_str(), action)
                .map_err(|e| Error::Config(format!("model {name}: at: {e}")))?
        } else {
            // No time-of-day given: first run happens one interval from
            // now, never immediately on boot.
            let every = schedule
                .every
                .ok_or_else(|| Error::Config(format!("model {name}: schedule needs cron or every")))?;
            Job::new_repeated_async(every, action)
                .map_err(|e| Error::Scheduler(e.to_string()))?
        };

        Ok(job)
    }

    /// Deregister everything. Idempotent, safe on an unstarted scheduler,
    /// and never interrupts a pipeline already holding the run lock.
    pub async fn stop(&mut self) {
        if let Some(mut sched) = self.inner.take() {
            if let Err(e) = sched.shutdown().await {
                error!(error = %e, "Scheduler shutdown failed");
            }
            self.job_count = 0;
            info!("Scheduler stopped");
        }
    }

    /// Full stop/start cycle against a freshly loaded configuration.
    pub async fn restart(&mut self) -> Result<()> {
        info!("Reloading configuration");
        self.stop().await;
        self.config = Config::from_file(&self.config_path)?;
        self.start().await
    }

    pub fn job_count(&self) -> usize {
        self.job_count
    }

    /// Consume control events until shutdown. A failed reload keeps the
    /// scheduler stopped but the loop alive, so a corrected config can be
    /// reloaded with another event.
    pub async fn run_control_loop(&mut self, mut events: mpsc::Receiver<ControlEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ControlEvent::Reload => {
                    if let Err(e) = self.restart().await {
                        error!(error = %e, "Reload failed");
                    }
                }
                ControlEvent::Shutdown => {
                    self.stop().await;
                    break;
                }
            }
        }
    }
}

/// "HH:MM" → six-field cron expression for a daily run.
fn cron_for_time_of_day(at: &str) -> Option<String> {
    let (hour, minute) = at.split_once(':')?;
    let hour: u8 = hour.parse().ok()?;
    let minute: u8 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("0 {minute} {hour} * * *"))
}
