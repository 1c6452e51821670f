//! The job scheduler: trigger evaluation loop and bounded dispatch.
//!
//! One timer task evaluates due triggers in fire-time order (priority as the
//! tie-break) and dispatches fire-and-forget onto a semaphore-bounded pool.
//! The loop never awaits a job body, and job-body failures are absorbed at
//! the dispatch boundary and recorded in the execution history.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use plughub_core::config::scheduler::SchedulerConfig;
use plughub_core::error::PlatformError;
use plughub_core::result::PlatformResult;

use crate::executor::{JobContext, JobExecutionError, JobHandler};
use crate::history::{ExecutionHistoryLedger, ExecutionStatus};
use crate::job::{JobDefinition, JobDetail, JobKey, JobState};
use crate::trigger::{plan_fire, FireDecision, TriggerDefinition};

/// Runtime state of an attached trigger.
#[derive(Debug, Clone)]
struct TriggerRuntime {
    /// The trigger definition.
    definition: TriggerDefinition,
    /// Next computed fire time; `None` once exhausted.
    next_fire: Option<DateTime<Utc>>,
    /// Missed occurrences banked by IGNORE_MISFIRE_POLICY, replayed one per
    /// tick while the job is idle.
    backlog: u32,
}

/// A job held by the scheduler.
struct ScheduledJob {
    /// The job definition.
    definition: JobDefinition,
    /// The job body.
    handler: Arc<dyn JobHandler>,
    /// Owning plugin key, for plugin-teardown unscheduling.
    owner: Option<String>,
    /// Attached trigger, if any (durable jobs may be dormant).
    trigger: Option<TriggerRuntime>,
    /// Whether dispatch is suspended.
    paused: bool,
    /// Number of times the job has been dispatched.
    times_triggered: u32,
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("key", &self.definition.key())
            .field("paused", &self.paused)
            .field("times_triggered", &self.times_triggered)
            .finish()
    }
}

/// One fire ready for dispatch.
struct DueFire {
    key: JobKey,
    handler: Arc<dyn JobHandler>,
    job_data: HashMap<String, Value>,
    scheduled: DateTime<Utc>,
    priority: i32,
}

/// Trigger-driven job scheduler with misfire and overlap policy.
pub struct JobScheduler {
    /// Scheduler configuration.
    config: SchedulerConfig,
    /// Execution-history ledger.
    history: Arc<ExecutionHistoryLedger>,
    /// Scheduled jobs by key.
    jobs: Mutex<HashMap<JobKey, ScheduledJob>>,
    /// In-flight executions: job key to its cancellation flag.
    running: Arc<Mutex<HashMap<JobKey, Arc<AtomicBool>>>>,
    /// Bounded worker pool.
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("worker_concurrency", &self.config.worker_concurrency)
            .finish()
    }
}

impl JobScheduler {
    /// Create a scheduler over the given history ledger.
    pub fn new(config: SchedulerConfig, history: Arc<ExecutionHistoryLedger>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
        Self {
            config,
            history,
            jobs: Mutex::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            semaphore,
        }
    }

    /// The execution-history ledger backing this scheduler.
    pub fn history(&self) -> &Arc<ExecutionHistoryLedger> {
        &self.history
    }

    /// Schedule a job with an optional trigger.
    ///
    /// A durable job may be stored with no trigger (dormant); a non-durable
    /// job without a trigger is rejected. The composite `(name, group)` key
    /// must be unique among live jobs.
    pub async fn schedule(
        &self,
        definition: JobDefinition,
        trigger: Option<TriggerDefinition>,
        handler: Arc<dyn JobHandler>,
    ) -> PlatformResult<JobKey> {
        self.schedule_owned(None, definition, trigger, handler)
            .await
    }

    /// Schedule a job on behalf of a plugin; the plugin registry removes all
    /// of an owner's jobs on deactivation.
    pub async fn schedule_owned(
        &self,
        owner: Option<&str>,
        definition: JobDefinition,
        trigger: Option<TriggerDefinition>,
        handler: Arc<dyn JobHandler>,
    ) -> PlatformResult<JobKey> {
        let key = definition.key();
        let now = Utc::now();

        let runtime = match trigger {
            Some(mut trigger) => {
                trigger.validate()?;
                // Resolve the fire window anchor once, at scheduling time.
                if trigger.start_time.is_none() {
                    trigger.start_time = Some(now);
                }
                let next_fire = trigger.first_fire(now)?;
                if next_fire.is_none() && !definition.durable {
                    return Err(PlatformError::InvalidTriggerSpec(format!(
                        "trigger '{}' has no future fire times",
                        trigger.trigger_name
                    )));
                }
                next_fire.map(|at| TriggerRuntime {
                    definition: trigger,
                    next_fire: Some(at),
                    backlog: 0,
                })
            }
            None if definition.durable => None,
            None => {
                return Err(PlatformError::InvalidTriggerSpec(format!(
                    "non-durable job '{key}' requires a trigger"
                )));
            }
        };

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&key) {
            return Err(PlatformError::DuplicateJobKey(key.to_string()));
        }

        info!(
            job = %key,
            owner = owner.unwrap_or("-"),
            next_fire = %runtime
                .as_ref()
                .and_then(|r| r.next_fire)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "dormant".to_string()),
            "Job scheduled"
        );

        jobs.insert(
            key.clone(),
            ScheduledJob {
                definition,
                handler,
                owner: owner.map(str::to_string),
                trigger: runtime,
                paused: false,
                times_triggered: 0,
            },
        );
        Ok(key)
    }

    /// Suspend dispatch for a job without losing its trigger computation.
    pub async fn pause(&self, key: &JobKey) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(key) {
            Some(job) => {
                job.paused = true;
                info!(job = %key, "Job paused");
                true
            }
            None => false,
        }
    }

    /// Resume dispatch for a paused job. Fire times that passed while paused
    /// go through regular misfire planning.
    pub async fn resume(&self, key: &JobKey) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(key) {
            Some(job) => {
                job.paused = false;
                info!(job = %key, "Job resumed");
                true
            }
            None => false,
        }
    }

    /// Remove a job and its trigger. An in-flight execution is allowed to
    /// finish.
    pub async fn unschedule(&self, key: &JobKey) -> bool {
        let removed = self.jobs.lock().await.remove(key).is_some();
        if removed {
            info!(job = %key, "Job unscheduled");
        }
        removed
    }

    /// Remove every job owned by a plugin. Returns the number removed.
    pub async fn unschedule_owned(&self, owner: &str) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.owner.as_deref() != Some(owner));
        let removed = before - jobs.len();
        if removed > 0 {
            info!(owner, removed, "Unscheduled plugin-owned jobs");
        }
        removed
    }

    /// Dispatch a job immediately, outside its trigger cadence. Also the
    /// re-fire path for recovery of jobs that were running when the process
    /// terminated. Returns `false` if the job is unknown.
    pub async fn fire_now(&self, key: &JobKey, extra_data: Option<HashMap<String, Value>>) -> bool {
        let fire = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(key) else {
                return false;
            };
            job.times_triggered += 1;
            let mut job_data = job.definition.job_data.clone();
            if let Some(extra) = extra_data {
                job_data.extend(extra);
            }
            DueFire {
                key: key.clone(),
                handler: Arc::clone(&job.handler),
                job_data,
                scheduled: Utc::now(),
                priority: 0,
            }
        };
        info!(job = %key, "Manual fire requested");
        self.dispatch(fire).await;
        true
    }

    /// Request best-effort interruption of a running execution. Returns
    /// whether an execution was in flight to signal.
    pub async fn interrupt(&self, key: &JobKey) -> bool {
        let running = self.running.lock().await;
        match running.get(key) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!(job = %key, "Interruption requested");
                true
            }
            None => false,
        }
    }

    /// Whether a job with this key is currently scheduled.
    pub async fn job_exists(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.contains_key(key)
    }

    /// Snapshot of one job.
    pub async fn job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        let running = self.running.lock().await.contains_key(key);
        let jobs = self.jobs.lock().await;
        jobs.get(key).map(|job| snapshot(job, running))
    }

    /// Snapshot of all jobs, ordered by key.
    pub async fn list_jobs(&self) -> Vec<JobDetail> {
        let running: Vec<JobKey> = self.running.lock().await.keys().cloned().collect();
        let jobs = self.jobs.lock().await;
        let mut details: Vec<JobDetail> = jobs
            .values()
            .map(|job| snapshot(job, running.contains(&job.definition.key())))
            .collect();
        details.sort_by(|a, b| {
            (a.definition.job_group.as_str(), a.definition.job_name.as_str())
                .cmp(&(b.definition.job_group.as_str(), b.definition.job_name.as_str()))
        });
        details
    }

    /// Run the trigger evaluation loop until the cancel signal is received,
    /// then wait (bounded) for in-flight executions to finish.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.worker_concurrency,
            tick_ms = self.config.tick_interval_ms,
            misfire_threshold_ms = self.config.misfire_threshold_ms,
            "Job scheduler started"
        );

        let tick = StdDuration::from_millis(self.config.tick_interval_ms);
        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("Job scheduler received shutdown signal");
                        break;
                    }
                }
                _ = tokio::time::sleep(tick) => {
                    self.tick().await;
                }
            }
        }

        info!("Job scheduler waiting for in-flight executions to complete...");
        let max_permits = self.config.worker_concurrency as u32;
        let _ = tokio::time::timeout(
            StdDuration::from_secs(30),
            self.semaphore.acquire_many(max_permits),
        )
        .await;
        info!("Job scheduler shut down");
    }

    /// Evaluate all triggers once and dispatch what is due.
    async fn tick(&self) {
        let now = Utc::now();
        let misfire_threshold = Duration::milliseconds(self.config.misfire_threshold_ms as i64);
        let running_now: Vec<JobKey> = self.running.lock().await.keys().cloned().collect();

        let mut dues: Vec<DueFire> = Vec::new();
        {
            let mut jobs = self.jobs.lock().await;
            let mut exhausted: Vec<JobKey> = Vec::new();

            for (key, job) in jobs.iter_mut() {
                if job.paused {
                    continue;
                }
                let Some(runtime) = job.trigger.as_mut() else {
                    continue;
                };

                let decision = match runtime.next_fire {
                    Some(next_fire) => {
                        match plan_fire(&runtime.definition, next_fire, now, misfire_threshold) {
                            Ok(decision) => decision,
                            Err(e) => {
                                // A trigger that validated at schedule time
                                // should not fail to plan; drop it rather
                                // than wedge the loop.
                                error!(job = %key, error = %e, "Trigger planning failed; detaching trigger");
                                FireDecision::Skip { next: None }
                            }
                        }
                    }
                    // Exhausted but possibly still draining a backlog.
                    None => FireDecision::Wait,
                };

                match decision {
                    FireDecision::Wait => {
                        // Replay one banked occurrence while the job is idle.
                        if runtime.backlog > 0 && !running_now.contains(key) {
                            runtime.backlog -= 1;
                            job.times_triggered += 1;
                            dues.push(DueFire {
                                key: key.clone(),
                                handler: Arc::clone(&job.handler),
                                job_data: job.definition.job_data.clone(),
                                scheduled: now,
                                priority: runtime.definition.priority,
                            });
                        }
                    }
                    FireDecision::Fire {
                        scheduled,
                        next,
                        banked,
                    } => {
                        if banked > 0 {
                            debug!(job = %key, banked, "Banked missed occurrences for replay");
                        }
                        runtime.next_fire = next;
                        runtime.backlog += banked;
                        job.times_triggered += 1;
                        dues.push(DueFire {
                            key: key.clone(),
                            handler: Arc::clone(&job.handler),
                            job_data: job.definition.job_data.clone(),
                            scheduled,
                            priority: runtime.definition.priority,
                        });
                    }
                    FireDecision::Skip { next } => {
                        if next.is_some() {
                            debug!(job = %key, "Misfired occurrence skipped");
                        }
                        runtime.next_fire = next;
                    }
                }

                let finished = job
                    .trigger
                    .as_ref()
                    .is_some_and(|r| r.next_fire.is_none() && r.backlog == 0);
                if finished {
                    job.trigger = None;
                    if !job.definition.durable {
                        exhausted.push(key.clone());
                    } else {
                        debug!(job = %key, "Trigger exhausted; durable job kept dormant");
                    }
                }
            }

            for key in exhausted {
                jobs.remove(&key);
                info!(job = %key, "Trigger exhausted; non-durable job removed");
            }
        }

        // Fire-time order, higher priority first on ties.
        dues.sort_by(|a, b| {
            a.scheduled
                .cmp(&b.scheduled)
                .then_with(|| b.priority.cmp(&a.priority))
        });

        for fire in dues {
            self.dispatch(fire).await;
        }
    }

    /// Dispatch one fire onto the worker pool, applying the overlap veto.
    async fn dispatch(&self, fire: DueFire) {
        let now = Utc::now();
        let (job_name, job_group) = (fire.key.name.clone(), fire.key.group.clone());

        let cancel_flag = {
            let mut running = self.running.lock().await;
            if running.contains_key(&fire.key) {
                drop(running);
                warn!(job = %fire.key, "Fire vetoed: prior execution still running");
                let id = self.history.record_start(&job_name, &job_group, now).await;
                if let Err(e) = self
                    .history
                    .record_completion(
                        id,
                        now,
                        0,
                        ExecutionStatus::Vetoed,
                        Some("prior execution still running".to_string()),
                    )
                    .await
                {
                    error!(history_id = id, error = %e, "Failed to finalize vetoed record");
                }
                return;
            }
            let flag = Arc::new(AtomicBool::new(false));
            running.insert(fire.key.clone(), Arc::clone(&flag));
            flag
        };

        let history_id = self.history.record_start(&job_name, &job_group, now).await;

        let history = Arc::clone(&self.history);
        let running_map = Arc::clone(&self.running);
        let semaphore = Arc::clone(&self.semaphore);
        let key = fire.key.clone();
        let handler = fire.handler;
        let job_data = fire.job_data;
        let scheduled = fire.scheduled;

        tokio::spawn(async move {
            let _permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    running_map.lock().await.remove(&key);
                    return;
                }
            };

            let fired_at = Utc::now();
            let ctx = JobContext::new(key.clone(), scheduled, fired_at, job_data, cancel_flag);

            debug!(job = %key, "Executing job");
            let outcome = AssertUnwindSafe(handler.execute(&ctx)).catch_unwind().await;

            let completed_at = Utc::now();
            let duration_ms = (completed_at - fired_at).num_milliseconds().max(0) as u64;

            let (status, error_message) = match outcome {
                Ok(Ok(_)) => {
                    info!(job = %key, duration_ms, "Job completed");
                    (ExecutionStatus::Completed, None)
                }
                Ok(Err(JobExecutionError::Cancelled(reason))) => {
                    warn!(job = %key, reason = %reason, "Job cancelled");
                    (
                        ExecutionStatus::Failed,
                        Some(format!("cancelled: {reason}")),
                    )
                }
                Ok(Err(JobExecutionError::Failed(message))) => {
                    error!(job = %key, error = %message, "Job failed");
                    (ExecutionStatus::Failed, Some(message))
                }
                Err(_) => {
                    error!(job = %key, "Job body panicked");
                    (
                        ExecutionStatus::Failed,
                        Some("job body panicked".to_string()),
                    )
                }
            };

            if let Err(e) = history
                .record_completion(history_id, completed_at, duration_ms, status, error_message)
                .await
            {
                error!(history_id, error = %e, "Failed to finalize execution record");
            }
            running_map.lock().await.remove(&key);
        });
    }
}

fn snapshot(job: &ScheduledJob, running: bool) -> JobDetail {
    let state = if job.paused {
        JobState::Paused
    } else if running {
        JobState::Firing
    } else {
        JobState::Scheduled
    };
    JobDetail {
        definition: job.definition.clone(),
        state,
        next_fire_time: job.trigger.as_ref().and_then(|r| r.next_fire),
        times_triggered: job.times_triggered,
    }
}
