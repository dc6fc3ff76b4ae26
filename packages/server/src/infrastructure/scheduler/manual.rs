//! 手動実行の Scheduler 実装
//!
//! タスクをキューに溜め、`run_due` / `run_all` が呼ばれたときに実行する。
//! 猶予期間とシグナルの競合を決定的に再現するために使う。

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use kehai_shared::time::Clock;
use uuid::Uuid;

use crate::domain::{ScheduledFuture, ScheduledJob, ScheduledTask, Scheduler, Timestamp};

struct QueuedTask {
    scheduled: ScheduledTask,
    task: ScheduledFuture,
}

/// 手動実行の Scheduler
pub struct ManualScheduler {
    clock: Arc<dyn Clock>,
    queue: Mutex<Vec<QueuedTask>>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(Vec::new()),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<QueuedTask>> {
        // a panicked task never leaves the queue half-written
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// キューに残っているタスク
    pub fn pending(&self) -> Vec<ScheduledTask> {
        self.lock_queue()
            .iter()
            .map(|queued| queued.scheduled.clone())
            .collect()
    }

    /// 実行予定時刻を過ぎたタスクを実行し、実行した数を返す
    pub async fn run_due(&self) -> usize {
        let now = Timestamp::new(self.clock.now_millis());
        let due: Vec<QueuedTask> = {
            let mut queue = self.lock_queue();
            let (due, waiting): (Vec<_>, Vec<_>) = queue
                .drain(..)
                .partition(|queued| queued.scheduled.run_at <= now);
            *queue = waiting;
            due
        };
        Self::run(due).await
    }

    /// 実行予定時刻に関係なく全てのタスクを実行する
    pub async fn run_all(&self) -> usize {
        let all: Vec<QueuedTask> = self.lock_queue().drain(..).collect();
        Self::run(all).await
    }

    async fn run(mut tasks: Vec<QueuedTask>) -> usize {
        tasks.sort_by_key(|queued| queued.scheduled.run_at);
        let count = tasks.len();
        for queued in tasks {
            tracing::debug!("Running scheduled task {}", queued.scheduled.id);
            queued.task.await;
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(
        &self,
        delay: Duration,
        job: ScheduledJob,
        task: ScheduledFuture,
    ) -> ScheduledTask {
        let now = self.clock.now_millis();
        let scheduled = ScheduledTask {
            id: Uuid::new_v4(),
            job,
            run_at: Timestamp::new(now + delay.as_millis() as i64),
            delay,
        };
        self.lock_queue().push(QueuedTask {
            scheduled: scheduled.clone(),
            task,
        });
        scheduled
    }
}
