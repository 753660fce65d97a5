use crate::pipeline::Pipeline;
use crate::types::{NewsError, Result};
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Work the scheduler fires.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    fn task_name(&self) -> String;

    async fn run_once(&self) -> Result<()>;
}

#[async_trait]
impl ScheduledTask for Pipeline {
    fn task_name(&self) -> String {
        "pipeline".to_string()
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at))
            .unwrap_or(today)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub at: NaiveTime,
    pub next_run: NaiveDateTime,
}

/// Fixed daily times. A time that already passed today is first due
/// tomorrow.
#[derive(Debug, Clone)]
pub struct Schedule {
    jobs: Vec<Job>,
}

impl Schedule {
    pub fn new(times: &[NaiveTime], now: NaiveDateTime) -> Self {
        let jobs = times
            .iter()
            .map(|at| Job {
                at: *at,
                next_run: next_occurrence(*at, now),
            })
            .collect();
        Self { jobs }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Number of jobs due at `now`. Each due job moves to its next
    /// occurrence after `now`.
    pub fn take_due(&mut self, now: NaiveDateTime) -> usize {
        let mut due = 0;
        for job in self.jobs.iter_mut().filter(|j| j.next_run <= now) {
            due += 1;
            job.next_run = next_occurrence(job.at, now);
        }
        due
    }

    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().map(|j| j.next_run).min()
    }
}

pub struct Scheduler {
    times: Vec<NaiveTime>,
    poll: Duration,
    run_at_start: bool,
    clock: Clock,
}

impl Scheduler {
    pub fn new(times: Vec<NaiveTime>, poll: Duration) -> Self {
        Self {
            times,
            poll,
            run_at_start: true,
            clock: local_clock(),
        }
    }

    pub fn without_initial_run(mut self) -> Self {
        self.run_at_start = false;
        self
    }

    /// Replace the wall clock, e.g. with one driven by tokio's test time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start the timer loop in the background.
    pub fn spawn<T: ScheduledTask>(self, task: Arc<T>) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run_loop(task, stop_rx));
        SchedulerHandle { stop_tx, join }
    }

    async fn run_loop<T: ScheduledTask>(self, task: Arc<T>, mut stop_rx: watch::Receiver<bool>) {
        let busy = Arc::new(AtomicBool::new(false));
        let mut schedule = Schedule::new(&self.times, (self.clock)());
        info!(
            "Scheduler started for {} with {} daily job(s), next at {:?}",
            task.task_name(),
            schedule.jobs().len(),
            schedule.next_run()
        );

        if self.run_at_start {
            trigger(&task, &busy);
        }

        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if schedule.take_due((self.clock)()) > 0 {
                        trigger(&task, &busy);
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler for {} stopped", task.task_name());
    }
}

/// Spawn one run unless the previous one is still going.
fn trigger<T: ScheduledTask>(task: &Arc<T>, busy: &Arc<AtomicBool>) {
    if busy.swap(true, Ordering::SeqCst) {
        warn!("Skipping scheduled {} run: previous run still in progress", task.task_name());
        return;
    }
    let task = task.clone();
    let guard = BusyGuard(busy.clone());
    tokio::spawn(async move {
        let _guard = guard;
        info!("Scheduled {} run starting", task.task_name());
        match task.run_once().await {
            Ok(()) => {}
            Err(NewsError::AlreadyRunning) => warn!("Skipped: a {} run was already in progress", task.task_name()),
            Err(e) => error!("Scheduled {} run failed: {}", task.task_name(), e),
        }
    });
}

/// Clears the busy flag when the run ends, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to exit and wait for it. A run already in flight
    /// finishes on its own.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
