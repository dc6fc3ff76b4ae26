//! UseCase: 接続品質の分析
//!
//! 履歴レコードの遷移履歴を読み取り専用で集計する。書き込みは一切行わない。
//!
//! - 基本統計（TTL 付きでキャッシュ）
//! - 異常パターンの検知（頻繁な切断、短時間の再接続の繰り返し、長時間の切断）
//! - 0〜100 の品質スコア
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 統計の集計と再接続率の計算
//! - 深刻度と品質レベルの境界値
//! - 各検知器の発火条件
//!
//! ### どのような状況を想定しているか
//! - 正常系：安定した接続、切断と再接続を繰り返す接続
//! - エッジケース：切断のない履歴（再接続率 0）、未終了の切断
//! - 異常系：履歴の取得に失敗（パターン検知は空の結果）

use std::{sync::Arc, time::Duration};

use kehai_shared::time::Clock;
use serde::Serialize;

use crate::{
    config::PresenceConfig,
    domain::{
        ConnectionContext, ConnectionRecord, ConnectionRecordRepository, ConnectionStatus,
        HistoryQuery, Timestamp, UserId,
    },
    infrastructure::cache::TtlCache,
};

use super::error::PresenceError;

/// 品質スコアの計算に使う統計の期間
const QUALITY_STATS_HOURS: u32 = 24;

/// 基本統計
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub disconnections: usize,
    pub reconnections: usize,
    pub final_disconnections: usize,
    pub graceful_disconnections: usize,
    /// 再接続数 / 切断数 * 100（切断がなければ 0）
    pub reconnection_rate: f64,
    /// 再接続までの平均切断時間（秒）
    pub average_disconnection_duration: f64,
    pub analysis_period_hours: u32,
    pub generated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    FrequentDisconnections,
    RapidReconnections,
    ProlongedDisconnections,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 品質スコアから差し引く点数
    fn penalty(&self) -> f64 {
        match self {
            Severity::Low => 5.0,
            Severity::Medium => 10.0,
            Severity::High => 20.0,
            Severity::Critical => 30.0,
        }
    }
}

/// 1 つの検知器の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternFinding {
    pub pattern_type: PatternType,
    pub is_anomalous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub occurrences: usize,
    pub threshold: usize,
    /// 長時間の切断の検知器のみ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_duration_secs: Option<f64>,
}

/// 異常パターンの検知結果（発火した検知器のみ）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternReport {
    pub patterns_detected: usize,
    pub anomalous_patterns: Vec<PatternFinding>,
    pub analyzed_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

/// 品質スコアの内訳
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub base_score: f64,
    pub reconnection_penalty: f64,
    pub frequency_penalty: f64,
    pub anomaly_penalty: f64,
}

/// 品質スコア
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityScore {
    pub quality_score: u8,
    pub quality_level: QualityLevel,
    pub score_breakdown: ScoreBreakdown,
    pub stats: ConnectionStats,
    pub anomalies: Vec<PatternFinding>,
}

type StatsKey = (UserId, Option<ConnectionContext>, u32);

/// 接続品質を分析するユースケース
pub struct ConnectionAnalyzer {
    repository: Arc<dyn ConnectionRecordRepository>,
    config: Arc<PresenceConfig>,
    clock: Arc<dyn Clock>,
    stats_cache: TtlCache<StatsKey, ConnectionStats>,
}

impl ConnectionAnalyzer {
    pub fn new(
        repository: Arc<dyn ConnectionRecordRepository>,
        config: Arc<PresenceConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stats_cache = TtlCache::new(
            Duration::from_secs(config.stats_cache_ttl_secs),
            clock.clone(),
        );
        Self {
            repository,
            config,
            clock,
            stats_cache,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    async fn history(
        &self,
        user_id: &UserId,
        context: Option<&ConnectionContext>,
        since: Timestamp,
    ) -> Result<Vec<ConnectionRecord>, PresenceError> {
        Ok(self
            .repository
            .find_history(HistoryQuery {
                user_id: user_id.clone(),
                context: context.cloned(),
                since,
            })
            .await?)
    }

    /// 直近 `hours` 時間の基本統計
    ///
    /// `context` が `None` の場合は全てのスコープを集計する。
    pub async fn get_basic_connection_stats(
        &self,
        user_id: &UserId,
        context: Option<&ConnectionContext>,
        hours: u32,
    ) -> Result<ConnectionStats, PresenceError> {
        let key = (user_id.clone(), context.cloned(), hours);
        if let Some(stats) = self.stats_cache.get(&key).await {
            return Ok(stats);
        }

        let now = self.now();
        let since = now.minus_secs(u64::from(hours) * 3600);
        let records = self.history(user_id, context, since).await?;
        let stats = aggregate_stats(&records, since, now, hours);

        tracing::debug!(
            "Computed connection stats for '{}' ({} records, {}h)",
            user_id,
            records.len(),
            hours
        );
        self.stats_cache.insert(key, stats.clone()).await;
        Ok(stats)
    }

    /// 分析期間内の異常パターンを検知する
    ///
    /// 履歴の取得に失敗した場合は空の結果を返す。
    pub async fn analyze_connection_patterns(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> PatternReport {
        let now = self.now();
        let since = now.minus_secs(self.config.analysis_window().as_secs());

        let anomalous_patterns = match self.history(user_id, Some(context), since).await {
            Ok(records) => [
                self.detect_frequent_disconnections(&records, since),
                self.detect_rapid_reconnections(&records, since, now),
                self.detect_prolonged_disconnections(&records, context, since, now),
            ]
            .into_iter()
            .filter(|finding| finding.is_anomalous)
            .collect(),
            Err(e) => {
                tracing::warn!(
                    "Failed to analyze connection patterns of '{}' in {}: {}",
                    user_id,
                    context,
                    e
                );
                Vec::new()
            }
        };

        PatternReport {
            patterns_detected: anomalous_patterns.len(),
            anomalous_patterns,
            analyzed_at: now,
        }
    }

    fn detect_frequent_disconnections(
        &self,
        records: &[ConnectionRecord],
        since: Timestamp,
    ) -> PatternFinding {
        let threshold = self.config.disconnection_threshold;
        let occurrences: usize = records
            .iter()
            .map(|record| {
                record.count_transitions_into(ConnectionStatus::TemporarilyDisconnected, since)
            })
            .sum();
        let is_anomalous = occurrences >= threshold;

        PatternFinding {
            pattern_type: PatternType::FrequentDisconnections,
            is_anomalous,
            severity: is_anomalous.then(|| calculate_severity(occurrences, threshold)),
            occurrences,
            threshold,
            longest_duration_secs: None,
        }
    }

    fn detect_rapid_reconnections(
        &self,
        records: &[ConnectionRecord],
        since: Timestamp,
        now: Timestamp,
    ) -> PatternFinding {
        let threshold = self.config.rapid_reconnection_min_count;
        let limit = self.config.rapid_reconnection_secs as f64;
        let occurrences = records
            .iter()
            .flat_map(|record| record.disconnection_episodes())
            .filter(|episode| episode.is_reconnection() && episode.started_at >= since)
            .filter(|episode| episode.duration_secs(now) < limit)
            .count();
        let is_anomalous = occurrences >= threshold;

        PatternFinding {
            pattern_type: PatternType::RapidReconnections,
            is_anomalous,
            severity: is_anomalous.then(|| calculate_severity(occurrences, threshold)),
            occurrences,
            threshold,
            longest_duration_secs: None,
        }
    }

    fn detect_prolonged_disconnections(
        &self,
        records: &[ConnectionRecord],
        context: &ConnectionContext,
        since: Timestamp,
        now: Timestamp,
    ) -> PatternFinding {
        let limit = self.config.grace_period(&context.kind).as_secs()
            * u64::from(self.config.prolonged_disconnection_factor);
        let prolonged: Vec<f64> = records
            .iter()
            .flat_map(|record| record.disconnection_episodes())
            // open episodes count regardless of when they started
            .filter(|episode| episode.ended_at.is_none_or(|ended_at| ended_at >= since))
            .map(|episode| episode.duration_secs(now))
            .filter(|duration| *duration >= limit as f64)
            .collect();
        let longest = prolonged.iter().copied().reduce(f64::max);
        let is_anomalous = !prolonged.is_empty();

        PatternFinding {
            pattern_type: PatternType::ProlongedDisconnections,
            is_anomalous,
            severity: longest.map(|longest| calculate_severity(longest as usize, limit as usize)),
            occurrences: prolonged.len(),
            threshold: limit as usize,
            longest_duration_secs: longest,
        }
    }

    /// 0〜100 の品質スコアを計算する
    ///
    /// 100 点から、再接続率の低さ、切断頻度、検知した異常パターンに応じて減点する。
    pub async fn calculate_connection_quality_score(
        &self,
        user_id: &UserId,
        context: &ConnectionContext,
    ) -> Result<QualityScore, PresenceError> {
        let stats = self
            .get_basic_connection_stats(user_id, Some(context), QUALITY_STATS_HOURS)
            .await?;
        let anomalies = self
            .analyze_connection_patterns(user_id, context)
            .await
            .anomalous_patterns;

        let score_breakdown = score_breakdown(
            &stats,
            &anomalies,
            self.config.disconnection_threshold,
        );
        let total_penalty = score_breakdown.reconnection_penalty
            + score_breakdown.frequency_penalty
            + score_breakdown.anomaly_penalty;
        let quality_score = (score_breakdown.base_score - total_penalty)
            .clamp(0.0, 100.0)
            .round() as u8;

        Ok(QualityScore {
            quality_score,
            quality_level: get_quality_level(quality_score),
            score_breakdown,
            stats,
            anomalies,
        })
    }
}

fn aggregate_stats(
    records: &[ConnectionRecord],
    since: Timestamp,
    now: Timestamp,
    hours: u32,
) -> ConnectionStats {
    let mut stats = ConnectionStats {
        total_connections: 0,
        disconnections: 0,
        reconnections: 0,
        final_disconnections: 0,
        graceful_disconnections: 0,
        reconnection_rate: 0.0,
        average_disconnection_duration: 0.0,
        analysis_period_hours: hours,
        generated_at: now,
    };

    for event in records
        .iter()
        .flat_map(|record| record.metadata.transitions.iter())
        .filter(|event| event.at >= since)
    {
        match (event.from, event.to) {
            (None, ConnectionStatus::Connected) => stats.total_connections += 1,
            (Some(_), ConnectionStatus::Connected) => stats.reconnections += 1,
            (_, ConnectionStatus::TemporarilyDisconnected) => stats.disconnections += 1,
            (_, ConnectionStatus::Disconnected) => stats.final_disconnections += 1,
            (_, ConnectionStatus::GracefullyDisconnected) => stats.graceful_disconnections += 1,
        }
    }

    if stats.disconnections > 0 {
        stats.reconnection_rate =
            stats.reconnections as f64 / stats.disconnections as f64 * 100.0;
    }

    let durations: Vec<f64> = records
        .iter()
        .flat_map(|record| record.disconnection_episodes())
        .filter(|episode| episode.is_reconnection())
        .filter(|episode| episode.ended_at.is_some_and(|ended_at| ended_at >= since))
        .map(|episode| episode.duration_secs(now))
        .collect();
    if !durations.is_empty() {
        stats.average_disconnection_duration = durations.iter().sum::<f64>() / durations.len() as f64;
    }

    stats
}

fn score_breakdown(
    stats: &ConnectionStats,
    anomalies: &[PatternFinding],
    disconnection_threshold: usize,
) -> ScoreBreakdown {
    let reconnection_penalty = if stats.disconnections > 0 {
        (100.0 - stats.reconnection_rate).max(0.0) * 0.3
    } else {
        0.0
    };
    let frequency_penalty =
        (stats.disconnections as f64 / disconnection_threshold as f64 * 20.0).min(40.0);
    let anomaly_penalty = anomalies
        .iter()
        .map(|finding| finding.severity.map_or(0.0, |severity| severity.penalty()))
        .sum::<f64>()
        .min(30.0);

    ScoreBreakdown {
        base_score: 100.0,
        reconnection_penalty,
        frequency_penalty,
        anomaly_penalty,
    }
}

/// 閾値に対する件数の倍率から深刻度を決める
pub fn calculate_severity(count: usize, threshold: usize) -> Severity {
    if count >= threshold.saturating_mul(3) {
        Severity::Critical
    } else if count >= threshold.saturating_mul(2) {
        Severity::High
    } else if count >= threshold {
        Severity::Medium
    } else {
        Severity::Low
    }
}

pub fn get_quality_level(score: u8) -> QualityLevel {
    match score {
        90.. => QualityLevel::Excellent,
        70..=89 => QualityLevel::Good,
        50..=69 => QualityLevel::Fair,
        30..=49 => QualityLevel::Poor,
        _ => QualityLevel::Critical,
    }
}
