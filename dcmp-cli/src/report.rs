//! 终端文本输出

use dcmp_core::utils::display_name;
use dcmp_core::{ComparisonSummary, StrategyStats, StudySet};
use dcmp_dicom::ExtractionStats;
use dcmp_engine::scoring::{ImpactLevel, QualityBreakdown};
use dcmp_engine::{ImageComparisonSummary, TagDifferenceAnalysis};
use std::collections::BTreeSet;
use std::fmt::Write;

/// 标签分析最多显示的行数
const MAX_TAG_ROWS: usize = 20;

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// 比对结果：概要、逐文件结果、质量分析、标签分析和策略统计
pub fn render_comparison(summary: &ComparisonSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "== DICOM比对概要 ==");
    let _ = writeln!(out, "基线文件:   {}", display_name(&summary.baseline_file));
    let _ = writeln!(out, "对比文件数: {}", summary.comparison_files.len());
    let _ = writeln!(out, "匹配模式:   {}", summary.matching_mode);
    let _ = writeln!(out, "检查数:     {}", summary.total_studies);
    let _ = writeln!(out, "序列数:     {}", summary.total_series);
    let _ = writeln!(out, "实例总数:   {}", summary.total_instances);

    let _ = writeln!(out, "\n== 详细比对结果 ==");
    let _ = writeln!(
        out,
        "{:<28} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>10}",
        "文件", "完全一致", "标签差异", "差异%", "缺失", "缺失%", "多余", "多余%", "完整性"
    );
    for result in &summary.file_results {
        let breakdown = QualityBreakdown::from_result(result);
        let baseline_total = result.total_instances_baseline;
        let _ = writeln!(
            out,
            "{:<28} {:>8} {:>8} {:>7.1}% {:>8} {:>7.1}% {:>8} {:>7.1}% {:>9.1}%",
            display_name(&result.comparison_file),
            result.perfect_matches(),
            result.tag_difference_count(),
            percent(result.tag_difference_count(), baseline_total),
            result.missing_count(),
            percent(result.missing_count(), baseline_total),
            result.extra_count(),
            percent(result.extra_count(), result.total_instances_comparison),
            breakdown.integrity_score,
        );
    }

    let _ = writeln!(out, "\n== 导出质量分析 ==");
    let _ = writeln!(out, "{:<28} {:>10} {:>10} {:>6}  主要问题", "文件", "实例匹配率", "标签保留率", "等级");
    for result in &summary.file_results {
        let breakdown = QualityBreakdown::from_result(result);
        let issues = if breakdown.primary_issues.is_empty() {
            "未发现".to_string()
        } else {
            breakdown
                .primary_issues
                .iter()
                .take(2)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(
            out,
            "{:<28} {:>9.1}% {:>9.1}% {:>6}  {}",
            display_name(&breakdown.comparison_file),
            breakdown.instance_match_rate,
            breakdown.tag_preservation,
            breakdown.grade.as_str(),
            issues
        );
        if result.pixel_failures > 0 {
            let _ = writeln!(out, "{:<28} {} 个实例像素处理失败，已跳过", "", result.pixel_failures);
        }
    }

    let analysis = TagDifferenceAnalysis::from_results(&summary.file_results);
    if !analysis.tags.is_empty() {
        out.push_str(&render_tag_analysis(&analysis));
    }

    if let Some(stats) = &summary.strategy_stats {
        out.push_str(&render_strategy_stats(stats));
    }

    out
}

fn render_tag_analysis(analysis: &TagDifferenceAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n== 标签差异分析 ==");
    let _ = writeln!(
        out,
        "{:<36} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8} {:>6}",
        "标签", "缺失", "多余", "值变化", "类型", "合计", "占比", "影响"
    );
    for stats in analysis.tags.iter().take(MAX_TAG_ROWS) {
        let impact = match stats.impact {
            ImpactLevel::High => "高",
            ImpactLevel::Medium => "中",
            ImpactLevel::Low => "低",
        };
        let _ = writeln!(
            out,
            "{:<36} {:>6} {:>6} {:>6} {:>6} {:>6} {:>7.1}% {:>6}",
            stats.tag_keyword,
            stats.counts.missing,
            stats.counts.extra,
            stats.counts.value_diff,
            stats.counts.type_diff,
            stats.counts.total(),
            analysis.share(stats),
            impact
        );
    }
    if analysis.tags.len() > MAX_TAG_ROWS {
        let _ = writeln!(out, "... 另有 {} 个标签", analysis.tags.len() - MAX_TAG_ROWS);
    }

    let _ = writeln!(out, "\n差异类型汇总:");
    let total = analysis.total_differences();
    for (difference_type, count) in analysis.totals.by_type() {
        if count > 0 {
            let _ = writeln!(out, "  {:<12} {:>6} ({:.1}%)", difference_type.as_str(), count, percent(count, total));
        }
    }
    out
}

fn render_strategy_stats(stats: &StrategyStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n== 匹配策略统计 ==");
    let _ = writeln!(out, "{:<20} {:>8} {:>8} {:>8} {:>8}", "策略", "尝试", "成功", "采纳", "成功率");
    for counter in &stats.counters {
        let _ = writeln!(
            out,
            "{:<20} {:>8} {:>8} {:>8} {:>7.1}%",
            counter.strategy.as_str(),
            counter.attempted,
            counter.successful,
            counter.accepted,
            counter.success_rate()
        );
    }
    out
}

/// 像素比对结果
pub fn render_image_summary(summary: &ImageComparisonSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== 图像比对概要 ==");
    let _ = writeln!(out, "基线文件: {}", display_name(&summary.baseline_file));
    let _ = writeln!(
        out,
        "容差: {}  归一化: {}",
        summary.tolerance_used,
        if summary.normalization_applied { "是" } else { "否" }
    );
    let _ = writeln!(out, "比对图像数: {}", summary.total_images_compared);

    let _ = writeln!(
        out,
        "\n{:<28} {:>8} {:>8} {:>8} {:>8} {:>10}",
        "文件", "已比对", "完全一致", "像素差异", "缺失", "平均相似度"
    );
    for result in &summary.file_results {
        let _ = writeln!(
            out,
            "{:<28} {:>8} {:>8} {:>8} {:>8} {:>9.2}%",
            display_name(&result.comparison_file),
            result.image_comparisons.len(),
            result.exact_matches(),
            result.pixel_differences(),
            result.missing_instances.len(),
            result.average_similarity() * 100.0
        );
        for comparison in result.image_comparisons.iter().filter(|c| !c.is_exact_match) {
            let _ = writeln!(
                out,
                "    {} {} 相似度 {:.4} 最大差值 {}",
                comparison.sop_instance_uid,
                comparison.difference_type.as_str(),
                comparison.similarity_score,
                comparison
                    .max_difference
                    .map(|d| format!("{:.3}", d))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    let _ = writeln!(
        out,
        "\n总体: {}/{} 完全一致，加权相似度 {:.2}%",
        summary.overall_exact_matches(),
        summary.total_images_compared,
        summary.overall_similarity() * 100.0
    );
    out
}

/// 单个压缩包的内容检查
pub fn render_inspection(source_name: &str, stats: &ExtractionStats, set: &StudySet, tag: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", source_name);
    let _ = writeln!(
        out,
        "文件 {} 个 (DICOM {} 个，非DICOM {} 个)，文件夹 {} 个",
        stats.total_files, stats.dicom_files, stats.non_dicom_files, stats.total_folders
    );
    let _ = writeln!(
        out,
        "患者 {} / 检查 {} / 序列 {} / 实例 {}",
        set.patient_count(),
        set.study_count(),
        set.series_count(),
        set.instance_count()
    );
    if !set.failed_files.is_empty() {
        let _ = writeln!(out, "加载失败 {} 个文件", set.failed_files.len());
    }

    for patient in set.patients.values() {
        let _ = writeln!(
            out,
            "患者 {} {} ({} 个实例)",
            patient.patient_id,
            patient.patient_name,
            patient.instance_count()
        );
        for study in patient.studies.values() {
            let _ = writeln!(
                out,
                "  检查 {} {} {} ({} 个实例)",
                study.study_instance_uid,
                study.study_date,
                study.study_description,
                study.instance_count()
            );
            for series in study.series.values() {
                let _ = writeln!(
                    out,
                    "    序列 {} [{}] {} ({} 个实例)",
                    series.series_instance_uid,
                    series.modality,
                    series.series_description,
                    series.instances.len()
                );

                if let Some(keyword) = tag {
                    let values: BTreeSet<String> = series
                        .instances
                        .values()
                        .map(|instance| match instance.tag(keyword) {
                            Some(value) => value.to_string(),
                            None => "<缺失>".to_string(),
                        })
                        .collect();
                    let _ = writeln!(
                        out,
                        "      {} = {}",
                        keyword,
                        values.into_iter().collect::<Vec<_>>().join(" | ")
                    );
                }
            }
        }
    }
    out
}
