//! Integration tests for the presence lifecycle through the coordinator.
//!
//! Time and the grace-period queue are driven by hand (`ManualClock`,
//! `ManualScheduler`) so races between signals and finalization are
//! reproduced deterministically.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use kehai_server::{
    config::PresenceConfig,
    domain::{
        Alert, AlertError, Alerter, ClientInfo, ConnectionContext, ConnectionRecord,
        ConnectionRecordRepository, ConnectionStatus, ConnectionType, HistoryQuery,
        RecordTransaction, RecordUpdate, RepositoryError, UserId,
    },
    infrastructure::{
        alerter::LogAlerter,
        repository::{InMemoryConnectionRecordRepository, InMemoryUserDirectory},
        scheduler::ManualScheduler,
    },
    usecase::{LastSeenOutcome, PresenceCoordinator},
};
use kehai_shared::time::ManualClock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

const START: i64 = 1_700_000_000_000;

struct TestPresence {
    coordinator: Arc<PresenceCoordinator>,
    scheduler: Arc<ManualScheduler>,
    clock: Arc<ManualClock>,
}

impl TestPresence {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let coordinator = Arc::new(PresenceCoordinator::with_collaborators(
            Arc::new(InMemoryConnectionRecordRepository::new()),
            Arc::new(InMemoryUserDirectory::new([alice(), bob()])),
            scheduler.clone(),
            Arc::new(LogAlerter),
            PresenceConfig::default(),
            clock.clone(),
        ));
        Self {
            coordinator,
            scheduler,
            clock,
        }
    }

    async fn state(&self, user_id: &UserId, context: &ConnectionContext) -> Option<ConnectionStatus> {
        self.coordinator
            .get_connection_state(user_id, context)
            .await
            .unwrap()
    }
}

fn alice() -> UserId {
    UserId::new("alice".to_string()).unwrap()
}

fn bob() -> UserId {
    UserId::new("bob".to_string()).unwrap()
}

fn debate() -> ConnectionContext {
    ConnectionContext::parse("debate", "d-42").unwrap()
}

fn lobby() -> ConnectionContext {
    ConnectionContext::parse("room", "lobby").unwrap()
}

fn browser() -> ClientInfo {
    ClientInfo {
        user_agent: Some("Mozilla/5.0".to_string()),
        ip_address: Some("192.0.2.10".to_string()),
    }
}

#[tokio::test]
async fn test_round_trip_ends_disconnected() {
    // テスト項目: 接続 → 切断 → 再接続 → 切断 → 最終切断で、各段階の状態が期待通りになる
    // given (前提条件):
    let presence = TestPresence::new();
    let coordinator = &presence.coordinator;

    // when (操作) / then (期待する結果):
    coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Connected)
    );

    coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::TemporarilyDisconnected)
    );

    presence.clock.advance_secs(10);
    assert!(
        coordinator
            .handle_reconnection(&alice(), &debate())
            .await
            .unwrap()
    );
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Connected)
    );

    presence.clock.advance_secs(60);
    coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::TemporarilyDisconnected)
    );

    presence.clock.advance_secs(120);
    coordinator.finalize_disconnection(&alice(), &debate()).await;
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Disconnected)
    );
}

#[tokio::test]
async fn test_reconnection_within_grace_period_wins_race() {
    // テスト項目: 猶予期間内に再接続した場合、猶予期間後に実行される最終切断は何もしない
    // given (前提条件):
    let presence = TestPresence::new();
    presence
        .coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    let task = presence
        .coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await
        .unwrap()
        .unwrap();

    // when (操作):
    presence.clock.advance_secs(45);
    let outcome = presence
        .coordinator
        .update_last_seen(&alice(), &debate(), &browser())
        .await
        .unwrap();
    presence.clock.set_millis(task.run_at.value());
    let executed = presence.scheduler.run_due().await;

    // then (期待する結果):
    assert_eq!(outcome, LastSeenOutcome::Reconnected);
    assert_eq!(executed, 1);
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Connected)
    );
}

#[tokio::test]
async fn test_late_reconnection_before_finalization_still_succeeds() {
    // テスト項目: 猶予期間を過ぎても最終切断タスクの実行前なら再接続が勝つ
    // given (前提条件):
    let presence = TestPresence::new();
    presence
        .coordinator
        .record_initial_connection(&alice(), &lobby(), &browser())
        .await
        .unwrap();
    presence
        .coordinator
        .handle_disconnection(&alice(), &lobby(), &browser())
        .await
        .unwrap();

    // when (操作):
    presence.clock.advance_secs(600);
    let reconnected = presence
        .coordinator
        .handle_reconnection(&alice(), &lobby())
        .await
        .unwrap();
    presence.scheduler.run_all().await;

    // then (期待する結果):
    assert!(reconnected);
    assert_eq!(
        presence.state(&alice(), &lobby()).await,
        Some(ConnectionStatus::Connected)
    );
}

#[tokio::test]
async fn test_finalization_after_grace_period_disconnects() {
    // テスト項目: 再接続がなければ猶予期間後に DISCONNECTED になり、以降の再接続は拒否される
    // given (前提条件):
    let presence = TestPresence::new();
    presence
        .coordinator
        .record_initial_connection(&alice(), &lobby(), &browser())
        .await
        .unwrap();
    presence
        .coordinator
        .handle_disconnection(&alice(), &lobby(), &browser())
        .await
        .unwrap();

    // when (操作):
    presence.clock.advance_secs(300);
    presence.scheduler.run_due().await;
    let reconnected = presence
        .coordinator
        .handle_reconnection(&alice(), &lobby())
        .await
        .unwrap();

    // then (期待する結果):
    assert!(!reconnected);
    assert_eq!(
        presence.state(&alice(), &lobby()).await,
        Some(ConnectionStatus::Disconnected)
    );
}

#[tokio::test]
async fn test_concurrent_disconnection_signals_schedule_once() {
    // テスト項目: 同じキーへの並行した切断シグナルでも、スケジュールされるタスクは 1 つだけ
    // given (前提条件):
    let presence = TestPresence::new();
    presence
        .coordinator
        .record_initial_connection(&bob(), &debate(), &browser())
        .await
        .unwrap();

    // when (操作):
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = presence.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .handle_disconnection(&bob(), &debate(), &ClientInfo::default())
                    .await
                    .unwrap()
            })
        })
        .collect();
    let mut scheduled = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            scheduled += 1;
        }
    }

    // then (期待する結果):
    assert_eq!(scheduled, 1);
    assert_eq!(presence.scheduler.pending().len(), 1);
}

#[tokio::test]
async fn test_contexts_are_tracked_independently() {
    // テスト項目: 同じユーザーでもスコープごとに独立した状態を持つ
    // given (前提条件):
    let presence = TestPresence::new();
    presence
        .coordinator
        .record_initial_connection(&alice(), &lobby(), &browser())
        .await
        .unwrap();
    presence
        .coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();

    // when (操作):
    presence
        .coordinator
        .handle_graceful_disconnection(&alice(), &lobby(), Some("moved to debate".to_string()))
        .await
        .unwrap();

    // then (期待する結果):
    assert_eq!(
        presence.state(&alice(), &lobby()).await,
        Some(ConnectionStatus::GracefullyDisconnected)
    );
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Connected)
    );
}

#[tokio::test]
async fn test_quality_reflects_recorded_history() {
    // テスト項目: 記録した切断と再接続が統計と品質スコアに反映される
    // given (前提条件):
    let presence = TestPresence::new();
    let coordinator = &presence.coordinator;
    coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    for _ in 0..2 {
        presence.clock.advance_secs(120);
        coordinator
            .handle_disconnection(&alice(), &debate(), &browser())
            .await
            .unwrap();
        presence.clock.advance_secs(6);
        coordinator
            .handle_reconnection(&alice(), &debate())
            .await
            .unwrap();
    }

    // when (操作):
    let stats = coordinator.get_connection_quality(&alice(), 24).await.unwrap();
    let reconnections = coordinator
        .get_reconnection_stats(&alice(), &debate(), 24)
        .await
        .unwrap();
    let score = coordinator
        .get_connection_quality_score(&alice(), &debate())
        .await
        .unwrap();

    // then (期待する結果):
    assert_eq!(stats.disconnections, 2);
    assert_eq!(stats.reconnections, 2);
    assert_eq!(stats.reconnection_rate, 100.0);
    assert_eq!(reconnections.reconnection_count, 2);
    assert_eq!(reconnections.average_disconnection_duration, 6.0);
    // frequency penalty 2 / 5 * 20 = 8
    assert_eq!(score.quality_score, 92);
    assert!(score.anomalies.is_empty());
}

/// 全ての操作が失敗するデータストア
struct UnreachableStore;

#[async_trait]
impl ConnectionRecordRepository for UnreachableStore {
    async fn find_current(
        &self,
        _user_id: &UserId,
        _context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("store unreachable".to_string()))
    }

    async fn update_current(
        &self,
        _user_id: &UserId,
        _context: &ConnectionContext,
        _update: RecordUpdate,
    ) -> Result<RecordTransaction, RepositoryError> {
        Err(RepositoryError::Unavailable("store unreachable".to_string()))
    }

    async fn find_history(
        &self,
        _query: HistoryQuery,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("store unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_store_outage_is_contained() {
    // テスト項目: データストア障害時、最終切断はエラーを返さず、他の操作はエラーを返し、分析は空になる
    // given (前提条件):
    let clock = Arc::new(ManualClock::new(START));
    let coordinator = PresenceCoordinator::with_collaborators(
        Arc::new(UnreachableStore),
        Arc::new(InMemoryUserDirectory::permissive()),
        Arc::new(ManualScheduler::new(clock.clone())),
        Arc::new(LogAlerter),
        PresenceConfig::default(),
        clock,
    );

    // when (操作):
    coordinator.finalize_disconnection(&alice(), &debate()).await;
    let disconnection = coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await;
    let last_seen = coordinator
        .update_last_seen(&alice(), &debate(), &browser())
        .await;
    let patterns = coordinator.detect_anomalous_patterns(&alice(), &debate()).await;

    // then (期待する結果):
    assert!(disconnection.is_err());
    assert!(last_seen.is_err());
    assert_eq!(patterns.patterns_detected, 0);
}

#[tokio::test]
async fn test_initial_connection_over_temporary_disconnection_closes_old_record() {
    // テスト項目: 一時切断中に新しいセッションを開始すると古いレコードは閉じられ、後から切断の異常として残らない
    // given (前提条件):
    let presence = TestPresence::new();
    let coordinator = &presence.coordinator;
    coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await
        .unwrap();

    // when (操作):
    presence.clock.advance_secs(2);
    let fresh = coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap()
        .unwrap();
    let ran = presence.scheduler.run_all().await;
    presence.clock.advance_secs(2 * 24 * 3_600);
    let patterns = coordinator.detect_anomalous_patterns(&alice(), &debate()).await;
    let score = coordinator
        .get_connection_quality_score(&alice(), &debate())
        .await
        .unwrap();

    // then (期待する結果):
    assert_eq!(fresh.metadata.connection_type, Some(ConnectionType::Initial));
    assert_eq!(ran, 1);
    assert_eq!(
        presence.state(&alice(), &debate()).await,
        Some(ConnectionStatus::Connected)
    );
    assert_eq!(patterns.patterns_detected, 0);
    assert!(score.anomalies.is_empty());
}

/// 送られたアラートをチャネルに流す Alerter
struct RecordingAlerter {
    sender: UnboundedSender<Alert>,
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        let _ = self.sender.send(alert.clone());
        Ok(())
    }
}

/// `go_down` 以降の全ての操作が失敗するデータストア
struct FlakyStore {
    inner: InMemoryConnectionRecordRepository,
    down: AtomicBool,
}

impl FlakyStore {
    fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("store unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConnectionRecordRepository for FlakyStore {
    async fn find_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<Option<ConnectionRecord>, RepositoryError> {
        self.check()?;
        self.inner.find_current(user_id, context).await
    }

    async fn update_current(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
        update: RecordUpdate,
    ) -> Result<RecordTransaction, RepositoryError> {
        self.check()?;
        self.inner.update_current(user_id, context, update).await
    }

    async fn find_history(
        &self,
        query: HistoryQuery,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError> {
        self.check()?;
        self.inner.find_history(query).await
    }
}

async fn next_alert(alerts: &mut UnboundedReceiver<Alert>) -> Alert {
    tokio::time::timeout(Duration::from_secs(5), alerts.recv())
        .await
        .expect("no alert was sent")
        .expect("alerter dropped")
}

#[tokio::test]
async fn test_failed_scheduled_finalization_in_debate_raises_alert() {
    // テスト項目: 猶予期間後の最終切断がデータストア障害で失敗すると、ディベートではアラートが 1 件送られる
    // given (前提条件):
    let clock = Arc::new(ManualClock::new(START));
    let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
    let store = Arc::new(FlakyStore {
        inner: InMemoryConnectionRecordRepository::new(),
        down: AtomicBool::new(false),
    });
    let (sender, mut alerts) = unbounded_channel();
    let coordinator = PresenceCoordinator::with_collaborators(
        store.clone(),
        Arc::new(InMemoryUserDirectory::new([alice()])),
        scheduler.clone(),
        Arc::new(RecordingAlerter { sender }),
        PresenceConfig::default(),
        clock.clone(),
    );
    coordinator
        .record_initial_connection(&alice(), &debate(), &browser())
        .await
        .unwrap();
    coordinator
        .handle_disconnection(&alice(), &debate(), &browser())
        .await
        .unwrap();

    // when (操作):
    store.go_down();
    clock.advance_secs(121);
    let ran = scheduler.run_due().await;

    // then (期待する結果):
    assert_eq!(ran, 1);
    let alert = next_alert(&mut alerts).await;
    assert_eq!(alert.operation, "finalize_disconnection");
    assert_eq!(alert.user_id, alice());
    assert_eq!(alert.context, debate());
    tokio::task::yield_now().await;
    assert!(alerts.try_recv().is_err());
}
