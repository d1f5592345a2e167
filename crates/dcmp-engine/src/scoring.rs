//! 完整性评分与汇总统计

use chrono::Utc;
use dcmp_core::{
    ComparisonSummary, DifferenceType, FileComparisonResult, MatchingMode, StrategyStats, StudySet,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 存在标签差异的实例按该权重计分
pub const TAG_DIFF_WEIGHT: f64 = 75.0;

/// 缺失/多余实例占比超过该值时列为主要问题
const INSTANCE_ISSUE_RATIO: f64 = 0.05;
/// 存在标签差异的实例占已匹配实例比例超过该值时列为主要问题
const TAG_ISSUE_RATIO: f64 = 0.10;

/// 数据完整性评分 (0-100)
///
/// 完全一致的实例计满分，有标签差异的实例计75%，缺失实例不计分，多余实例不扣分。
pub fn integrity_score(result: &FileComparisonResult) -> f64 {
    let total = result.total_instances_baseline;
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    result.perfect_matches() as f64 / total * 100.0 + result.tag_difference_count() as f64 / total * TAG_DIFF_WEIGHT
}

/// 已匹配实例占基线实例的百分比
pub fn instance_match_rate(result: &FileComparisonResult) -> f64 {
    percentage(result.matched_instances.len(), result.total_instances_baseline)
}

/// 完全一致的实例占已匹配实例的百分比
pub fn tag_preservation(result: &FileComparisonResult) -> f64 {
    percentage(result.perfect_matches(), result.matched_instances.len())
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// 质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum QualityGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    D,
    F,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 95.0 => QualityGrade::APlus,
            s if s >= 90.0 => QualityGrade::A,
            s if s >= 85.0 => QualityGrade::BPlus,
            s if s >= 80.0 => QualityGrade::B,
            s if s >= 70.0 => QualityGrade::C,
            s if s >= 60.0 => QualityGrade::D,
            _ => QualityGrade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::APlus => "A+",
            QualityGrade::A => "A",
            QualityGrade::BPlus => "B+",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
            QualityGrade::F => "F",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 导出质量的主要问题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum PrimaryIssue {
    MissingInstances(usize),
    ExtraInstances(usize),
    TagChanges(usize),
}

impl fmt::Display for PrimaryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryIssue::MissingInstances(n) => write!(f, "{} 个实例缺失", n),
            PrimaryIssue::ExtraInstances(n) => write!(f, "{} 个多余实例", n),
            PrimaryIssue::TagChanges(n) => write!(f, "{} 个实例标签被修改", n),
        }
    }
}

/// 识别主要问题，空列表表示未发现问题
pub fn primary_issues(result: &FileComparisonResult) -> Vec<PrimaryIssue> {
    let mut issues = Vec::new();

    let missing = result.missing_count();
    if missing as f64 > result.total_instances_baseline as f64 * INSTANCE_ISSUE_RATIO {
        issues.push(PrimaryIssue::MissingInstances(missing));
    }

    let extra = result.extra_count();
    if extra as f64 > result.total_instances_comparison as f64 * INSTANCE_ISSUE_RATIO {
        issues.push(PrimaryIssue::ExtraInstances(extra));
    }

    let changed = result.tag_difference_count();
    if changed as f64 > result.matched_instances.len() as f64 * TAG_ISSUE_RATIO {
        issues.push(PrimaryIssue::TagChanges(changed));
    }

    issues
}

/// 单个对比文件的质量分析
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub comparison_file: String,
    pub integrity_score: f64,
    pub grade: QualityGrade,
    pub instance_match_rate: f64,
    pub tag_preservation: f64,
    pub primary_issues: Vec<PrimaryIssue>,
}

impl QualityBreakdown {
    pub fn from_result(result: &FileComparisonResult) -> Self {
        let score = integrity_score(result);
        Self {
            comparison_file: result.comparison_file.clone(),
            integrity_score: score,
            grade: QualityGrade::from_score(score),
            instance_match_rate: instance_match_rate(result),
            tag_preservation: tag_preservation(result),
            primary_issues: primary_issues(result),
        }
    }
}

/// 影响程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub fn from_count(count: usize) -> Self {
        if count > 100 {
            ImpactLevel::High
        } else if count > 20 {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }
}

/// 按差异类型的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DifferenceCounts {
    pub missing: usize,
    pub extra: usize,
    pub value_diff: usize,
    pub type_diff: usize,
}

impl DifferenceCounts {
    fn record(&mut self, difference_type: DifferenceType) {
        match difference_type {
            DifferenceType::MissingTag => self.missing += 1,
            DifferenceType::ExtraTag => self.extra += 1,
            DifferenceType::ValueDiff => self.value_diff += 1,
            DifferenceType::TypeDiff => self.type_diff += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.missing + self.extra + self.value_diff + self.type_diff
    }

    /// 按类型展开 (类型, 计数)
    pub fn by_type(&self) -> [(DifferenceType, usize); 4] {
        [
            (DifferenceType::MissingTag, self.missing),
            (DifferenceType::ExtraTag, self.extra),
            (DifferenceType::ValueDiff, self.value_diff),
            (DifferenceType::TypeDiff, self.type_diff),
        ]
    }
}

/// 单个标签的差异统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagDifferenceStats {
    pub tag_keyword: String,
    pub counts: DifferenceCounts,
    pub impact: ImpactLevel,
}

/// 全部对比文件的标签差异分析
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagDifferenceAnalysis {
    /// 按影响实例数降序，相同时按关键字升序
    pub tags: Vec<TagDifferenceStats>,
    pub totals: DifferenceCounts,
}

impl TagDifferenceAnalysis {
    pub fn from_results(results: &[FileComparisonResult]) -> Self {
        let mut per_tag: BTreeMap<&str, DifferenceCounts> = BTreeMap::new();
        let mut totals = DifferenceCounts::default();

        let differences = results
            .iter()
            .flat_map(|r| r.matched_instances.iter())
            .flat_map(|c| c.tag_differences.iter());
        for difference in differences {
            per_tag
                .entry(difference.tag_keyword.as_str())
                .or_default()
                .record(difference.difference_type);
            totals.record(difference.difference_type);
        }

        let mut tags: Vec<TagDifferenceStats> = per_tag
            .into_iter()
            .map(|(keyword, counts)| TagDifferenceStats {
                tag_keyword: keyword.to_string(),
                impact: ImpactLevel::from_count(counts.total()),
                counts,
            })
            .collect();
        // BTreeMap 已按关键字排序，稳定排序保留该次序
        tags.sort_by(|a, b| b.counts.total().cmp(&a.counts.total()));

        Self { tags, totals }
    }

    pub fn total_differences(&self) -> usize {
        self.totals.total()
    }

    /// 某标签差异数占全部差异的百分比
    pub fn share(&self, stats: &TagDifferenceStats) -> f64 {
        percentage(stats.counts.total(), self.total_differences())
    }
}

/// 汇总一次比对运行
///
/// 检查数、序列数与实例总数取自基线层级结构。
pub fn summarize(
    baseline: &StudySet,
    file_results: Vec<FileComparisonResult>,
    matching_mode: MatchingMode,
) -> ComparisonSummary {
    let strategy_stats = file_results
        .iter()
        .filter_map(|r| r.strategy_stats.as_ref())
        .fold(None, |acc: Option<StrategyStats>, stats| {
            let mut merged = acc.unwrap_or_default();
            merged.merge(stats);
            Some(merged)
        });

    ComparisonSummary {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        baseline_file: baseline.source_file.clone(),
        comparison_files: file_results.iter().map(|r| r.comparison_file.clone()).collect(),
        matching_mode,
        total_instances: baseline.instance_count(),
        total_studies: baseline.study_count(),
        total_series: baseline.series_count(),
        file_results,
        strategy_stats,
    }
}
