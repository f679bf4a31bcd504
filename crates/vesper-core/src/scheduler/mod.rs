//! Consolidation scheduler
//!
//! Arms a single-shot timer for the configured wall-clock time (default
//! 03:00 local), runs the pipeline when it fires, then re-arms for the next
//! occurrence. Pipeline failures are reported through the optional completion
//! callback and never crash the scheduler. `run_now` is a manual trigger that
//! leaves the schedule untouched.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::cache::WorkingMemory;
use crate::consolidation::{ConsolidationPipeline, ConsolidationStats};
use crate::error::{Result, VesperError};

/// Injectable time source so tests can pin "now"
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Completion callback invoked after every cycle (scheduled or manual)
pub type CompletionCallback =
    Arc<dyn Fn(&std::result::Result<ConsolidationStats, String>) + Send + Sync>;

/// Scheduler status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Whether the timer loop is armed
    pub running: bool,
    /// Configured hour (local)
    pub schedule_hour: u32,
    /// Configured minute
    pub schedule_minute: u32,
    /// When the last cycle finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
    /// Stats of the last successful cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_stats: Option<ConsolidationStats>,
    /// Next scheduled fire time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_time: Option<DateTime<Utc>>,
    /// Cycles run since start (scheduled and manual)
    pub run_count: u64,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    last_run_time: Option<DateTime<Utc>>,
    last_run_stats: Option<ConsolidationStats>,
    next_run_time: Option<DateTime<Utc>>,
    run_count: u64,
}

/// The consolidation scheduler (C6)
pub struct ConsolidationScheduler {
    pipeline: Arc<ConsolidationPipeline>,
    working: Arc<WorkingMemory>,
    clock: Arc<dyn Clock>,
    schedule_hour: u32,
    schedule_minute: u32,
    state: Arc<Mutex<SchedulerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl ConsolidationScheduler {
    /// Create a scheduler for the given pipeline
    pub fn new(
        pipeline: Arc<ConsolidationPipeline>,
        working: Arc<WorkingMemory>,
        schedule_hour: u32,
        schedule_minute: u32,
    ) -> Self {
        Self::with_clock(
            pipeline,
            working,
            schedule_hour,
            schedule_minute,
            Arc::new(SystemClock),
        )
    }

    /// Create a scheduler with an injected clock
    pub fn with_clock(
        pipeline: Arc<ConsolidationPipeline>,
        working: Arc<WorkingMemory>,
        schedule_hour: u32,
        schedule_minute: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pipeline,
            working,
            clock,
            schedule_hour: schedule_hour.min(23),
            schedule_minute: schedule_minute.min(59),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            handle: Mutex::new(None),
            on_complete: Mutex::new(None),
        }
    }

    /// Install the completion callback
    pub fn on_completion(&self, callback: CompletionCallback) {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(callback);
        }
    }

    /// Arm the timer loop. Idempotent: a running scheduler is left alone.
    pub fn start(self: Arc<Self>) -> Result<()> {
        let mut handle = self
            .handle
            .lock()
            .map_err(|_| VesperError::Init("Scheduler lock poisoned".to_string()))?;
        if handle.is_some() {
            return Ok(());
        }

        let scheduler = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                let delay = scheduler.delay_until_next();
                if let Ok(mut state) = scheduler.state.lock() {
                    state.next_run_time =
                        Some(scheduler.clock.now() + chrono::Duration::milliseconds(delay as i64));
                }
                tracing::info!(delay_ms = delay, "Consolidation timer armed");
                tokio::time::sleep(Duration::from_millis(delay)).await;

                let _ = scheduler.run_cycle();
            }
        });
        *handle = Some(task);

        if let Ok(mut state) = self.state.lock() {
            state.running = true;
        }
        Ok(())
    }

    /// Cancel the pending timer. An in-flight cycle runs to completion.
    pub fn stop(&self) {
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(task) = handle.take() {
                task.abort();
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.running = false;
            state.next_run_time = None;
        }
    }

    /// Run a cycle immediately without touching the schedule
    pub fn run_now(&self) -> std::result::Result<ConsolidationStats, String> {
        self.run_cycle()
    }

    /// Current status snapshot
    pub fn status(&self) -> SchedulerStatus {
        match self.state.lock() {
            Ok(state) => SchedulerStatus {
                running: state.running,
                schedule_hour: self.schedule_hour,
                schedule_minute: self.schedule_minute,
                last_run_time: state.last_run_time,
                last_run_stats: state.last_run_stats.clone(),
                next_run_time: state.next_run_time,
                run_count: state.run_count,
            },
            Err(_) => SchedulerStatus::default(),
        }
    }

    /// Run the pipeline for every namespace with working-memory content,
    /// aggregate the stats, and report through the callback.
    fn run_cycle(&self) -> std::result::Result<ConsolidationStats, String> {
        let outcome = (|| {
            let mut namespaces = self.working.namespaces().unwrap_or_default();
            if namespaces.is_empty() {
                namespaces.push("default".to_string());
            }

            let mut total = ConsolidationStats::default();
            for namespace in &namespaces {
                let stats = self.pipeline.run(namespace).map_err(|e| e.to_string())?;
                total.memories_processed += stats.memories_processed;
                total.entities_extracted += stats.entities_extracted;
                total.relationships_created += stats.relationships_created;
                total.conflicts_detected += stats.conflicts_detected;
                total.memories_pruned += stats.memories_pruned;
                total.skills_extracted += stats.skills_extracted;
                total.duration_ms += stats.duration_ms;
            }
            Ok::<_, String>(total)
        })();

        if let Ok(mut state) = self.state.lock() {
            state.run_count += 1;
            state.last_run_time = Some(self.clock.now());
            if let Ok(stats) = &outcome {
                state.last_run_stats = Some(stats.clone());
            }
        }

        match &outcome {
            Ok(stats) => tracing::info!(
                duration_ms = stats.duration_ms,
                "Scheduled consolidation finished"
            ),
            Err(e) => tracing::warn!(error = %e, "Scheduled consolidation failed"),
        }

        let callback = self.on_complete.lock().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(&outcome);
        }

        outcome
    }

    /// Milliseconds until the next occurrence of the configured local time
    fn delay_until_next(&self) -> u64 {
        millis_until_next(self.clock.now(), self.schedule_hour, self.schedule_minute)
    }
}

/// Milliseconds from `now` until the next local occurrence of `hour:minute`
pub fn millis_until_next(now: DateTime<Utc>, hour: u32, minute: u32) -> u64 {
    let local = now.with_timezone(&Local);
    let today_target = local
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| local.date_naive().and_hms_opt(3, 0, 0).expect("valid time"));

    let candidate = if today_target > local.naive_local() {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };

    // DST gaps can make a local time unrepresentable; fall back to +24h
    let target = match Local.from_local_datetime(&candidate) {
        chrono::LocalResult::Single(t) => t,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => local + chrono::Duration::days(1),
    };

    (target.with_timezone(&Utc) - now)
        .num_milliseconds()
        .max(0) as u64
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::VesperConfig;
    use crate::consolidation::ConsolidationConfig;
    use crate::embeddings::{Embedder, HashEmbedder};
    use crate::graph::GraphStore;
    use crate::model::{Conversation, MemoryType};
    use crate::skills::SkillLibrary;
    use crate::storage::Database;

    fn scheduler() -> (
        tempfile::TempDir,
        Arc<ConsolidationScheduler>,
        Arc<WorkingMemory>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_dir(dir.path()).unwrap());
        let working = Arc::new(WorkingMemory::new(
            Arc::new(MemoryCache::new()),
            &VesperConfig::default(),
        ));
        let graph = Arc::new(GraphStore::new(Arc::clone(&db)));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let skills = Arc::new(SkillLibrary::new(Arc::clone(&db), Some(embedder), 64));
        let pipeline = Arc::new(ConsolidationPipeline::new(
            Arc::clone(&working),
            graph,
            skills,
            db,
            ConsolidationConfig::default(),
        ));
        let scheduler = Arc::new(ConsolidationScheduler::new(
            pipeline,
            Arc::clone(&working),
            3,
            0,
        ));
        (dir, scheduler, working)
    }

    #[test]
    fn test_millis_until_next_is_within_a_day() {
        let now = Utc::now();
        let delay = millis_until_next(now, 3, 0);
        assert!(delay > 0);
        assert!(delay <= 24 * 3600 * 1000);
    }

    #[test]
    fn test_millis_until_next_rolls_to_tomorrow() {
        use chrono::Timelike;
        let now = Utc::now();
        let local = now.with_timezone(&Local);
        // A time in the local past must schedule roughly a day out
        let past = local - chrono::Duration::minutes(2);
        let delay = millis_until_next(now, past.hour(), past.minute());
        assert!(delay > 23 * 3600 * 1000);
    }

    #[test]
    fn test_run_now_reports_stats_and_counts() {
        let (_dir, scheduler, working) = scheduler();
        let conv = Conversation::new("we shipped the release", MemoryType::Episodic);
        working.put(&conv).unwrap();
        working
            .push_pending("default", &conv.conversation_id)
            .unwrap();

        let stats = scheduler.run_now().unwrap();
        assert_eq!(stats.memories_processed, 1);

        let status = scheduler.status();
        assert_eq!(status.run_count, 1);
        assert!(status.last_run_time.is_some());
        assert!(status.last_run_stats.is_some());
        assert!(!status.running);
    }

    #[test]
    fn test_completion_callback_fires() {
        let (_dir, scheduler, _working) = scheduler();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        scheduler.on_completion(Arc::new(move |outcome| {
            assert!(outcome.is_ok());
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));

        scheduler.run_now().unwrap();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (_dir, scheduler, _working) = scheduler();
        Arc::clone(&scheduler).start().unwrap();
        // Second start is a no-op
        Arc::clone(&scheduler).start().unwrap();

        let status = scheduler.status();
        assert!(status.running);
        assert_eq!(status.schedule_hour, 3);
        assert_eq!(status.schedule_minute, 0);

        scheduler.stop();
        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.next_run_time.is_none());
    }
}
