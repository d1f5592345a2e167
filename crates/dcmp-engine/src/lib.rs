//! DICOM比对核心引擎
//!
//! 像素签名、元数据匹配键、实例配对、标签比对与完整性评分。

pub mod differ;
pub mod image;
pub mod metadata_keys;
pub mod reconciler;
pub mod scoring;
pub mod signature;

pub use differ::{TagDiffer, DEFAULT_IGNORED_TAGS};
pub use image::{
    ImageComparator, ImageComparisonResult, ImageComparisonSummary, ImageDifferenceType, ImageFileComparisonResult,
};
pub use metadata_keys::{derive, derive_by_name, derive_key, MatchResult};
pub use reconciler::{
    policy_for, AssignmentPolicy, MatchObserver, Reconciler, Reconciliation, TracingObserver,
};
pub use scoring::{
    integrity_score, summarize, PrimaryIssue, QualityBreakdown, QualityGrade, TagDifferenceAnalysis,
};
pub use signature::{fingerprints_match, fingerprints_match_with, ContentHash, FingerprintTolerance, PixelFingerprint};
