//! 实例配对引擎
//!
//! 在基线与对比实例之间建立一一对应关系，支持四种匹配模式：
//! - `uid`：按SOP Instance UID精确对应；
//! - `hash`：按像素内容哈希对应；
//! - `fingerprint`：按统计指纹的两阶段贪心匹配；
//! - `smart`：像素哈希 → 像素指纹 → 五种元数据键的级联匹配。
//!
//! 所有模式都是贪心的首次命中匹配 (非全局最优)，结果只取决于输入顺序。
//! 分配算法通过 [`AssignmentPolicy`] 隔离，可替换为其它匹配算法。

use crate::differ::TagDiffer;
use crate::metadata_keys::{derive, MatchResult};
use crate::signature::{
    fingerprint_instance, fingerprints_match_with, hash_instance, ContentHash, FingerprintTolerance,
    PixelFingerprint,
};
use dcmp_core::{
    CompareError, FileComparisonResult, Instance, InstanceComparison, InstanceRef, MatchStrategy, MatchingMode,
    PixelDecoder, StrategyStats, StudySet,
};
use std::cell::{Cell, OnceCell};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// 配对过程的事件接收者
///
/// 配对引擎本身不直接输出日志，所有面向用户的消息通过该接口交给编排层。
pub trait MatchObserver {
    /// 实例像素数据无法解码，已从像素策略中排除
    fn pixel_unavailable(&self, instance: &Instance, error: &CompareError);

    /// 元数据策略无法为实例生成匹配键
    fn strategy_failed(&self, _instance: &Instance, _result: &MatchResult) {}

    /// 接受了一对实例
    fn pairing_accepted(&self, _baseline: &Instance, _comparison: &Instance, _strategy: Option<MatchStrategy>) {}

    /// 一次配对结束
    fn run_finished(&self, mode: MatchingMode, pixel_failures: usize);
}

/// 将配对事件转发到 `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MatchObserver for TracingObserver {
    fn pixel_unavailable(&self, instance: &Instance, error: &CompareError) {
        warn!(
            "像素处理失败 {} ({}): {}",
            instance.sop_instance_uid,
            instance.file_path.display(),
            error
        );
    }

    fn strategy_failed(&self, instance: &Instance, result: &MatchResult) {
        debug!("策略 {} 不适用于 {}: {}", result.strategy, instance.sop_instance_uid, result.details);
    }

    fn pairing_accepted(&self, baseline: &Instance, comparison: &Instance, strategy: Option<MatchStrategy>) {
        if let Some(strategy) = strategy {
            debug!(
                "配对 {} -> {} (策略: {})",
                baseline.sop_instance_uid, comparison.sop_instance_uid, strategy
            );
        }
    }

    fn run_finished(&self, mode: MatchingMode, pixel_failures: usize) {
        if pixel_failures > 0 {
            warn!("{} 个实例像素处理失败，已跳过 (模式: {})", pixel_failures, mode);
        } else {
            debug!("配对完成 (模式: {})", mode);
        }
    }
}

/// 单个实例的匹配上下文，按需计算并缓存像素签名
#[derive(Debug)]
pub struct MatchContext<'a> {
    pub instance: &'a Instance,
    hash: OnceCell<Option<ContentHash>>,
    fingerprint: OnceCell<Option<PixelFingerprint>>,
    pixel_failed: Cell<bool>,
}

impl<'a> MatchContext<'a> {
    fn new(instance: &'a Instance) -> Self {
        Self {
            instance,
            hash: OnceCell::new(),
            fingerprint: OnceCell::new(),
            pixel_failed: Cell::new(false),
        }
    }

    /// 像素解码是否已失败
    pub fn pixel_failed(&self) -> bool {
        self.pixel_failed.get()
    }
}

/// 一次配对的工作区：两侧实例的上下文与像素解码依赖
pub struct Workspace<'a> {
    decoder: &'a dyn PixelDecoder,
    observer: &'a dyn MatchObserver,
    tolerance: FingerprintTolerance,
    pub baseline: Vec<MatchContext<'a>>,
    pub comparison: Vec<MatchContext<'a>>,
}

impl<'a> Workspace<'a> {
    fn new(
        decoder: &'a dyn PixelDecoder,
        observer: &'a dyn MatchObserver,
        tolerance: FingerprintTolerance,
        baseline: &'a [Instance],
        comparison: &'a [Instance],
    ) -> Self {
        Self {
            decoder,
            observer,
            tolerance,
            baseline: baseline.iter().map(MatchContext::new).collect(),
            comparison: comparison.iter().map(MatchContext::new).collect(),
        }
    }

    /// 实例的内容哈希，解码失败时返回 `None`
    ///
    /// 同一实例只解码一次；失败只上报一次。
    pub fn hash<'s>(&'s self, context: &'s MatchContext<'a>) -> Option<&'s ContentHash> {
        context
            .hash
            .get_or_init(|| {
                if context.pixel_failed() {
                    return None;
                }
                hash_instance(self.decoder, context.instance)
                    .map_err(|e| self.record_failure(context, &e))
                    .ok()
            })
            .as_ref()
    }

    /// 实例的统计指纹，解码失败时返回 `None`
    pub fn fingerprint<'s>(&'s self, context: &'s MatchContext<'a>) -> Option<&'s PixelFingerprint> {
        context
            .fingerprint
            .get_or_init(|| {
                if context.pixel_failed() {
                    return None;
                }
                fingerprint_instance(self.decoder, context.instance)
                    .map_err(|e| self.record_failure(context, &e))
                    .ok()
            })
            .as_ref()
    }

    /// 两个实例的指纹是否一致，任一方不可解码时为否
    pub fn fingerprints_agree(&self, baseline: &MatchContext<'a>, comparison: &MatchContext<'a>) -> bool {
        match (self.fingerprint(baseline), self.fingerprint(comparison)) {
            (Some(a), Some(b)) => fingerprints_match_with(a, b, &self.tolerance),
            _ => false,
        }
    }

    fn record_failure(&self, context: &MatchContext<'a>, error: &CompareError) {
        context.pixel_failed.set(true);
        self.observer.pixel_unavailable(context.instance, error);
    }

    /// 像素解码失败的实例数 (两侧合计)
    pub fn pixel_failures(&self) -> usize {
        self.baseline
            .iter()
            .chain(self.comparison.iter())
            .filter(|c| c.pixel_failed())
            .count()
    }
}

/// 一对已接受的配对 (基线索引, 对比索引)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pairing {
    pub baseline: usize,
    pub comparison: usize,
    /// 级联匹配的命中策略与置信度
    pub provenance: Option<(MatchStrategy, f64)>,
}

/// 分配算法的输出
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub pairings: Vec<Pairing>,
    pub strategy_stats: Option<StrategyStats>,
}

/// 实例分配算法
///
/// 实现者必须保证每个对比实例最多出现在一个配对中。
pub trait AssignmentPolicy {
    fn assign(&self, workspace: &Workspace<'_>) -> Assignment;
}

/// 对比实例的占用标记
struct UsedSet(Vec<bool>);

impl UsedSet {
    fn new(len: usize) -> Self {
        Self(vec![false; len])
    }

    fn is_used(&self, index: usize) -> bool {
        self.0[index]
    }

    fn take(&mut self, index: usize) {
        self.0[index] = true;
    }

    /// 候选列表中第一个未占用的索引
    fn first_free(&self, candidates: Option<&Vec<usize>>) -> Option<usize> {
        candidates?.iter().copied().find(|j| !self.is_used(*j))
    }

    /// 按原始顺序遍历未占用的索引
    fn free(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.0.len()).filter(move |j| !self.is_used(*j))
    }
}

/// 按键值建立 键 → 对比实例索引列表 (保持原始顺序)
fn index_by<'c, 'a, K, F>(contexts: &'c [MatchContext<'a>], mut key: F) -> HashMap<K, Vec<usize>>
where
    K: std::hash::Hash + Eq,
    F: FnMut(&'c MatchContext<'a>) -> Option<K>,
{
    let mut table: HashMap<K, Vec<usize>> = HashMap::new();
    for (index, context) in contexts.iter().enumerate() {
        if let Some(k) = key(context) {
            table.entry(k).or_default().push(index);
        }
    }
    table
}

/// 按SOP Instance UID对应
#[derive(Debug, Default, Clone, Copy)]
pub struct UidPolicy;

impl AssignmentPolicy for UidPolicy {
    fn assign(&self, workspace: &Workspace<'_>) -> Assignment {
        let table = index_by(&workspace.comparison, |c| Some(c.instance.sop_instance_uid.as_str()));
        let mut used = UsedSet::new(workspace.comparison.len());
        let mut pairings = Vec::new();

        for (i, context) in workspace.baseline.iter().enumerate() {
            if let Some(j) = used.first_free(table.get(context.instance.sop_instance_uid.as_str())) {
                used.take(j);
                pairings.push(Pairing { baseline: i, comparison: j, provenance: None });
            }
        }

        Assignment { pairings, strategy_stats: None }
    }
}

/// 按像素内容哈希对应
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPolicy;

impl AssignmentPolicy for HashPolicy {
    fn assign(&self, workspace: &Workspace<'_>) -> Assignment {
        let table = index_by(&workspace.comparison, |c| workspace.hash(c).copied());
        let mut used = UsedSet::new(workspace.comparison.len());
        let mut pairings = Vec::new();

        for (i, context) in workspace.baseline.iter().enumerate() {
            let Some(hash) = workspace.hash(context) else {
                continue;
            };
            if let Some(j) = used.first_free(table.get(hash)) {
                used.take(j);
                pairings.push(Pairing { baseline: i, comparison: j, provenance: None });
            }
        }

        Assignment { pairings, strategy_stats: None }
    }
}

/// 统计指纹两阶段匹配
///
/// 第一阶段只检查查找键相同的候选，第二阶段线性扫描所有未占用的对比实例。
/// 两个阶段都要求 [`fingerprints_match_with`] 通过，键相同本身不构成匹配。
#[derive(Debug, Default, Clone, Copy)]
pub struct FingerprintPolicy;

impl AssignmentPolicy for FingerprintPolicy {
    fn assign(&self, workspace: &Workspace<'_>) -> Assignment {
        let table = index_by(&workspace.comparison, |c| workspace.fingerprint(c).map(PixelFingerprint::lookup_key));
        let mut used = UsedSet::new(workspace.comparison.len());
        let mut pairings = Vec::new();

        for (i, context) in workspace.baseline.iter().enumerate() {
            let Some(fingerprint) = workspace.fingerprint(context) else {
                continue;
            };

            let agrees = |j: &usize| !used.is_used(*j) && workspace.fingerprints_agree(context, &workspace.comparison[*j]);

            let by_key = table
                .get(&fingerprint.lookup_key())
                .and_then(|candidates| candidates.iter().copied().find(|j| agrees(j)));
            let found = by_key.or_else(|| used.free().find(|j| agrees(j)));

            if let Some(j) = found {
                used.take(j);
                pairings.push(Pairing { baseline: i, comparison: j, provenance: None });
            }
        }

        Assignment { pairings, strategy_stats: None }
    }
}

/// 多策略级联匹配
///
/// 像素策略命中即接受；元数据策略依次评估，后面的策略只有置信度严格更高时才替换候选，
/// 候选置信度达到 [`SmartPolicy::SHORT_CIRCUIT`] 时停止评估。
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartPolicy;

impl SmartPolicy {
    /// 停止继续评估的置信度
    pub const SHORT_CIRCUIT: f64 = 0.95;
}

impl AssignmentPolicy for SmartPolicy {
    fn assign(&self, workspace: &Workspace<'_>) -> Assignment {
        let tables: Vec<(MatchStrategy, HashMap<String, Vec<usize>>)> = MatchStrategy::METADATA
            .iter()
            .map(|strategy| {
                let table = index_by(&workspace.comparison, |c| derive(c.instance, *strategy).match_key);
                (*strategy, table)
            })
            .collect();

        let mut stats = StrategyStats::default();
        let mut used = UsedSet::new(workspace.comparison.len());
        let mut pairings = Vec::new();

        for (i, context) in workspace.baseline.iter().enumerate() {
            // 像素哈希
            stats.record_attempt(MatchStrategy::PixelHash);
            let by_hash = workspace
                .hash(context)
                .and_then(|hash| used.free().find(|j| workspace.hash(&workspace.comparison[*j]) == Some(hash)));
            if let Some(j) = by_hash {
                stats.record_success(MatchStrategy::PixelHash);
                stats.record_accepted(MatchStrategy::PixelHash);
                used.take(j);
                pairings.push(Pairing {
                    baseline: i,
                    comparison: j,
                    provenance: Some((MatchStrategy::PixelHash, MatchStrategy::PixelHash.confidence())),
                });
                continue;
            }

            // 像素指纹
            stats.record_attempt(MatchStrategy::PixelFingerprint);
            let by_fingerprint = workspace
                .fingerprint(context)
                .and_then(|_| used.free().find(|j| workspace.fingerprints_agree(context, &workspace.comparison[*j])));
            if let Some(j) = by_fingerprint {
                stats.record_success(MatchStrategy::PixelFingerprint);
                stats.record_accepted(MatchStrategy::PixelFingerprint);
                used.take(j);
                pairings.push(Pairing {
                    baseline: i,
                    comparison: j,
                    provenance: Some((
                        MatchStrategy::PixelFingerprint,
                        MatchStrategy::PixelFingerprint.confidence(),
                    )),
                });
                continue;
            }

            // 元数据策略
            let mut best: Option<(usize, MatchStrategy, f64)> = None;
            for (strategy, table) in &tables {
                stats.record_attempt(*strategy);
                let result = derive(context.instance, *strategy);
                let Some(key) = result.match_key.as_ref() else {
                    workspace.observer.strategy_failed(context.instance, &result);
                    continue;
                };

                if let Some(j) = used.first_free(table.get(key)) {
                    stats.record_success(*strategy);
                    let best_confidence = best.map(|(_, _, c)| c).unwrap_or(0.0);
                    if result.confidence > best_confidence {
                        best = Some((j, *strategy, result.confidence));
                    }
                }

                if best.map(|(_, _, c)| c >= Self::SHORT_CIRCUIT).unwrap_or(false) {
                    break;
                }
            }

            if let Some((j, strategy, confidence)) = best {
                stats.record_accepted(strategy);
                used.take(j);
                pairings.push(Pairing {
                    baseline: i,
                    comparison: j,
                    provenance: Some((strategy, confidence)),
                });
            }
        }

        Assignment {
            pairings,
            strategy_stats: Some(stats),
        }
    }
}

/// 匹配模式对应的默认分配算法
pub fn policy_for(mode: MatchingMode) -> Box<dyn AssignmentPolicy> {
    match mode {
        MatchingMode::Uid => Box::new(UidPolicy),
        MatchingMode::Hash => Box::new(HashPolicy),
        MatchingMode::Fingerprint => Box::new(FingerprintPolicy),
        MatchingMode::Smart => Box::new(SmartPolicy),
    }
}

/// 一次配对的结果
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub matched: Vec<InstanceComparison>,
    /// 基线中未被任何配对使用的实例
    pub missing: Vec<InstanceRef>,
    /// 对比中未被任何配对使用的实例
    pub extra: Vec<InstanceRef>,
    pub pixel_failures: usize,
    pub strategy_stats: Option<StrategyStats>,
}

impl Reconciliation {
    pub fn matched_uids(&self) -> BTreeSet<&str> {
        self.matched.iter().map(|c| c.sop_instance_uid.as_str()).collect()
    }

    pub fn missing_uids(&self) -> BTreeSet<&str> {
        self.missing.iter().map(|r| r.sop_instance_uid.as_str()).collect()
    }

    pub fn extra_uids(&self) -> BTreeSet<&str> {
        self.extra.iter().map(|r| r.sop_instance_uid.as_str()).collect()
    }
}

/// 实例配对器
pub struct Reconciler<'a> {
    decoder: &'a dyn PixelDecoder,
    observer: &'a dyn MatchObserver,
    differ: TagDiffer,
    tolerance: FingerprintTolerance,
}

impl<'a> Reconciler<'a> {
    pub fn new(decoder: &'a dyn PixelDecoder, observer: &'a dyn MatchObserver) -> Self {
        Self {
            decoder,
            observer,
            differ: TagDiffer::default(),
            tolerance: FingerprintTolerance::default(),
        }
    }

    pub fn with_differ(mut self, differ: TagDiffer) -> Self {
        self.differ = differ;
        self
    }

    pub fn with_tolerance(mut self, tolerance: FingerprintTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn differ(&self) -> &TagDiffer {
        &self.differ
    }

    /// 按匹配模式配对两组实例
    pub fn reconcile(&self, baseline: &[Instance], comparison: &[Instance], mode: MatchingMode) -> Reconciliation {
        let policy = policy_for(mode);
        let result = self.reconcile_with(policy.as_ref(), baseline, comparison);
        self.observer.run_finished(mode, result.pixel_failures);
        result
    }

    /// 使用指定分配算法配对两组实例
    pub fn reconcile_with(
        &self,
        policy: &dyn AssignmentPolicy,
        baseline: &[Instance],
        comparison: &[Instance],
    ) -> Reconciliation {
        let workspace = Workspace::new(self.decoder, self.observer, self.tolerance, baseline, comparison);
        let assignment = policy.assign(&workspace);

        let mut baseline_used = vec![false; baseline.len()];
        let mut comparison_used = vec![false; comparison.len()];
        let mut matched = Vec::with_capacity(assignment.pairings.len());

        for pairing in &assignment.pairings {
            let a = &baseline[pairing.baseline];
            let b = &comparison[pairing.comparison];
            baseline_used[pairing.baseline] = true;
            comparison_used[pairing.comparison] = true;

            self.observer
                .pairing_accepted(a, b, pairing.provenance.map(|(strategy, _)| strategy));
            matched.push(self.differ.compare(a, b, pairing.provenance));
        }

        let unused = |instances: &[Instance], used: &[bool]| -> Vec<InstanceRef> {
            instances
                .iter()
                .zip(used)
                .filter(|(_, used)| !**used)
                .map(|(instance, _)| instance.to_ref())
                .collect()
        };

        Reconciliation {
            matched,
            missing: unused(baseline, &baseline_used),
            extra: unused(comparison, &comparison_used),
            pixel_failures: workspace.pixel_failures(),
            strategy_stats: assignment.strategy_stats,
        }
    }

    /// 比对两个压缩包加载出的数据
    pub fn compare_files(&self, baseline: &StudySet, comparison: &StudySet, mode: MatchingMode) -> FileComparisonResult {
        let baseline_instances = baseline.to_instance_list();
        let comparison_instances = comparison.to_instance_list();

        info!(
            "比对 {} ({} 个实例) 与 {} ({} 个实例)，匹配模式: {}",
            baseline.source_file,
            baseline_instances.len(),
            comparison.source_file,
            comparison_instances.len(),
            mode
        );

        let result = self.reconcile(&baseline_instances, &comparison_instances, mode);

        FileComparisonResult {
            baseline_file: baseline.source_file.clone(),
            comparison_file: comparison.source_file.clone(),
            matching_mode: mode,
            matched_instances: result.matched,
            missing_instances: result.missing,
            extra_instances: result.extra,
            total_instances_baseline: baseline_instances.len(),
            total_instances_comparison: comparison_instances.len(),
            pixel_failures: result.pixel_failures,
            strategy_stats: result.strategy_stats,
        }
    }
}
