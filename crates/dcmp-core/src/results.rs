//! 比对结果模型

use crate::models::{InstanceRef, MatchStrategy, MatchingMode, TagDifference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 一对已匹配实例的比对结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceComparison {
    /// 基线实例的SOP Instance UID
    pub sop_instance_uid: String,
    /// 对比实例的SOP Instance UID (与基线不同时有意义)
    pub comparison_sop_instance_uid: String,
    pub baseline_file: String,
    pub comparison_file: String,
    pub tag_differences: Vec<TagDifference>,
    pub is_perfect_match: bool,
    /// 级联匹配时的命中策略
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_strategy: Option<MatchStrategy>,
    /// 级联匹配时的置信度
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_confidence: Option<f64>,
}

/// 单个策略的尝试/成功计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCounter {
    pub strategy: MatchStrategy,
    /// 对基线实例评估该策略的次数
    pub attempted: usize,
    /// 该策略找到候选实例的次数
    pub successful: usize,
    /// 该策略最终被采纳为配对依据的次数
    pub accepted: usize,
}

impl StrategyCounter {
    /// 成功率 (百分比)
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.successful as f64 / self.attempted as f64 * 100.0
        }
    }
}

/// 级联匹配的策略效果统计 (仅用于诊断，不参与匹配决策)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub counters: Vec<StrategyCounter>,
}

impl Default for StrategyStats {
    fn default() -> Self {
        Self {
            counters: MatchStrategy::CASCADE
                .iter()
                .map(|strategy| StrategyCounter {
                    strategy: *strategy,
                    attempted: 0,
                    successful: 0,
                    accepted: 0,
                })
                .collect(),
        }
    }
}

impl StrategyStats {
    fn counter_mut(&mut self, strategy: MatchStrategy) -> &mut StrategyCounter {
        let index = MatchStrategy::CASCADE
            .iter()
            .position(|s| *s == strategy)
            .unwrap_or_default();
        &mut self.counters[index]
    }

    pub fn record_attempt(&mut self, strategy: MatchStrategy) {
        self.counter_mut(strategy).attempted += 1;
    }

    pub fn record_success(&mut self, strategy: MatchStrategy) {
        self.counter_mut(strategy).successful += 1;
    }

    pub fn record_accepted(&mut self, strategy: MatchStrategy) {
        self.counter_mut(strategy).accepted += 1;
    }

    pub fn get(&self, strategy: MatchStrategy) -> Option<&StrategyCounter> {
        self.counters.iter().find(|c| c.strategy == strategy)
    }

    /// 合并另一份统计
    pub fn merge(&mut self, other: &StrategyStats) {
        for counter in &other.counters {
            let target = self.counter_mut(counter.strategy);
            target.attempted += counter.attempted;
            target.successful += counter.successful;
            target.accepted += counter.accepted;
        }
    }
}

/// 一个 (基线, 对比文件) 组合的比对结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileComparisonResult {
    pub baseline_file: String,
    pub comparison_file: String,
    pub matching_mode: MatchingMode,
    pub matched_instances: Vec<InstanceComparison>,
    /// 基线中存在、对比中缺失
    pub missing_instances: Vec<InstanceRef>,
    /// 对比中存在、基线中没有
    pub extra_instances: Vec<InstanceRef>,
    pub total_instances_baseline: usize,
    pub total_instances_comparison: usize,
    /// 像素处理失败的实例数
    pub pixel_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_stats: Option<StrategyStats>,
}

impl FileComparisonResult {
    pub fn perfect_matches(&self) -> usize {
        self.matched_instances.iter().filter(|c| c.is_perfect_match).count()
    }

    /// 已匹配但存在标签差异的实例数
    pub fn tag_difference_count(&self) -> usize {
        self.matched_instances.len() - self.perfect_matches()
    }

    pub fn missing_count(&self) -> usize {
        self.missing_instances.len()
    }

    pub fn extra_count(&self) -> usize {
        self.extra_instances.len()
    }
}

/// 一次完整比对运行的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub baseline_file: String,
    pub comparison_files: Vec<String>,
    pub matching_mode: MatchingMode,
    pub file_results: Vec<FileComparisonResult>,
    pub total_instances: usize,
    pub total_studies: usize,
    pub total_series: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_stats: Option<StrategyStats>,
}
