//! tokio を使った Scheduler 実装

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use kehai_shared::time::Clock;
use uuid::Uuid;

use crate::domain::{ScheduledFuture, ScheduledJob, ScheduledTask, Scheduler, Timestamp};

/// tokio タスクとして遅延実行する Scheduler
///
/// タスクごとに `tokio::spawn` し、`delay` だけ `sleep` してから実行する。
/// 呼び出しは tokio ランタイム上で行う必要がある。
pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    pending: Arc<AtomicUsize>,
}

impl TokioScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// まだ実行されていないタスク数
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Scheduler for TokioScheduler {
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

        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        let task_id = scheduled.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("Running scheduled task {}", task_id);
            task.await;
            pending.fetch_sub(1, Ordering::SeqCst);
        });

        tracing::debug!(
            "Scheduled task {} to run in {:?} ({:?})",
            scheduled.id,
            delay,
            scheduled.job
        );
        scheduled
    }
}
