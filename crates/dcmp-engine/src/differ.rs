//! 标签比对器

use dcmp_core::{DifferenceType, Instance, InstanceComparison, MatchStrategy, TagDifference};
use std::collections::BTreeSet;

/// 不同导出间合法变化的标签，完全不参与比对
pub const DEFAULT_IGNORED_TAGS: [&str; 7] = [
    "InstanceCreationDate",
    "InstanceCreationTime",
    "ImplementationVersionName",
    "SourceApplicationEntityTitle",
    "StationName",
    "InstitutionName",
    "InstitutionalDepartmentName",
];

/// 标签比对器
///
/// 忽略列表只能在默认列表基础上追加。
#[derive(Debug, Clone)]
pub struct TagDiffer {
    ignored_tags: BTreeSet<String>,
}

impl Default for TagDiffer {
    fn default() -> Self {
        Self {
            ignored_tags: DEFAULT_IGNORED_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl TagDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加忽略的标签关键字
    pub fn with_extra_ignored<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_tags.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn is_ignored(&self, keyword: &str) -> bool {
        self.ignored_tags.contains(keyword)
    }

    pub fn ignored_tags(&self) -> impl Iterator<Item = &str> {
        self.ignored_tags.iter().map(String::as_str)
    }

    /// 比较两个实例的标签，结果按关键字排序
    pub fn diff(&self, baseline: &Instance, comparison: &Instance) -> Vec<TagDifference> {
        let keywords: BTreeSet<&String> = baseline.tags.keys().chain(comparison.tags.keys()).collect();

        keywords
            .into_iter()
            .filter(|keyword| !self.is_ignored(keyword))
            .filter_map(|keyword| {
                let baseline_value = baseline.tags.get(keyword);
                let comparison_value = comparison.tags.get(keyword);

                let difference_type = match (baseline_value, comparison_value) {
                    (None, Some(_)) => DifferenceType::ExtraTag,
                    (Some(_), None) => DifferenceType::MissingTag,
                    (Some(a), Some(b)) if a != b => {
                        if a.same_kind(b) {
                            DifferenceType::ValueDiff
                        } else {
                            DifferenceType::TypeDiff
                        }
                    }
                    _ => return None,
                };

                Some(TagDifference {
                    tag_keyword: keyword.clone(),
                    baseline_value: baseline_value.cloned(),
                    comparison_value: comparison_value.cloned(),
                    difference_type,
                })
            })
            .collect()
    }

    /// 比较一对已匹配实例并生成比对结果
    pub fn compare(
        &self,
        baseline: &Instance,
        comparison: &Instance,
        provenance: Option<(MatchStrategy, f64)>,
    ) -> InstanceComparison {
        let tag_differences = self.diff(baseline, comparison);
        InstanceComparison {
            sop_instance_uid: baseline.sop_instance_uid.clone(),
            comparison_sop_instance_uid: comparison.sop_instance_uid.clone(),
            baseline_file: baseline.source_file.clone(),
            comparison_file: comparison.source_file.clone(),
            is_perfect_match: tag_differences.is_empty(),
            tag_differences,
            matching_strategy: provenance.map(|(strategy, _)| strategy),
            matching_confidence: provenance.map(|(_, confidence)| confidence),
        }
    }
}
