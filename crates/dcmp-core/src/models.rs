//! 核心数据模型定义

use crate::error::{CompareError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 单个实例的标签映射 (关键字 -> 值)
pub type TagMap = BTreeMap<String, TagValue>;

/// 序列条目 (截断后的嵌套属性, 关键字 -> 字符串值)
pub type SequenceItem = BTreeMap<String, String>;

/// 标签值
///
/// 单值元素解析为标量，多值元素解析为列表。数值VR (DS/IS/US等) 保留数值类型，
/// 因此同一标签在不同导出中被解析为不同形态时可以被识别为类型差异。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
    Sequence(Vec<SequenceItem>),
}

/// 标签值的运行时类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagValueKind {
    Int,
    Float,
    Text,
    IntList,
    FloatList,
    TextList,
    Sequence,
}

impl TagValue {
    /// 获取运行时类型
    pub fn kind(&self) -> TagValueKind {
        match self {
            TagValue::Int(_) => TagValueKind::Int,
            TagValue::Float(_) => TagValueKind::Float,
            TagValue::Text(_) => TagValueKind::Text,
            TagValue::IntList(_) => TagValueKind::IntList,
            TagValue::FloatList(_) => TagValueKind::FloatList,
            TagValue::TextList(_) => TagValueKind::TextList,
            TagValue::Sequence(_) => TagValueKind::Sequence,
        }
    }

    /// 两个值的运行时类型是否相同
    pub fn same_kind(&self, other: &TagValue) -> bool {
        self.kind() == other.kind()
    }

    /// 值的个数 (标量为1)
    pub fn multiplicity(&self) -> usize {
        match self {
            TagValue::Int(_) | TagValue::Float(_) | TagValue::Text(_) => 1,
            TagValue::IntList(v) => v.len(),
            TagValue::FloatList(v) => v.len(),
            TagValue::TextList(v) => v.len(),
            TagValue::Sequence(v) => v.len(),
        }
    }

    /// 转换为单个浮点数
    ///
    /// 文本值按数字解析，列表与序列视为格式错误。
    pub fn as_f64(&self, keyword: &str) -> Result<f64> {
        match self {
            TagValue::Int(v) => Ok(*v as f64),
            TagValue::Float(v) => Ok(*v),
            TagValue::Text(s) => parse_number(keyword, s),
            other => Err(CompareError::malformed(
                keyword,
                format!("期望单个数值，实际为 {:?}", other.kind()),
            )),
        }
    }

    /// 转换为浮点数列表
    ///
    /// 文本值按DICOM多值分隔符 `\` 拆分后解析；标量视为单元素列表。
    pub fn as_f64_list(&self, keyword: &str) -> Result<Vec<f64>> {
        match self {
            TagValue::Int(v) => Ok(vec![*v as f64]),
            TagValue::Float(v) => Ok(vec![*v]),
            TagValue::Text(s) => s.split('\\').map(|part| parse_number(keyword, part)).collect(),
            TagValue::IntList(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            TagValue::FloatList(v) => Ok(v.clone()),
            TagValue::TextList(v) => v.iter().map(|part| parse_number(keyword, part)).collect(),
            TagValue::Sequence(_) => Err(CompareError::malformed(keyword, "序列无法转换为数值列表")),
        }
    }

    /// 获取文本值 (仅限单值文本)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 获取第一个数值 (标量或列表首元素)
    pub fn first_f64(&self) -> Option<f64> {
        match self {
            TagValue::Int(v) => Some(*v as f64),
            TagValue::Float(v) => Some(*v),
            TagValue::Text(s) => s.split('\\').next().and_then(|p| p.trim().parse().ok()),
            TagValue::IntList(v) => v.first().map(|x| *x as f64),
            TagValue::FloatList(v) => v.first().copied(),
            TagValue::TextList(v) => v.first().and_then(|p| p.trim().parse().ok()),
            TagValue::Sequence(_) => None,
        }
    }

    /// 是否为"假值" (空文本、零、空列表)，用于组合键中的缺省占位
    pub fn is_falsy(&self) -> bool {
        match self {
            TagValue::Int(v) => *v == 0,
            TagValue::Float(v) => *v == 0.0,
            TagValue::Text(s) => s.is_empty(),
            _ => self.multiplicity() == 0,
        }
    }
}

fn parse_number(keyword: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| CompareError::malformed(keyword, format!("无法解析数值 {:?}: {}", raw, e)))
}

fn num_eq(a: f64, b: f64) -> bool {
    a == b
}

/// 结构化相等比较
///
/// 整数与浮点数按数值比较 (512 == 512.0)，列表与序列逐元素比较。
impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        use TagValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => num_eq(*a, *b),
            (Int(a), Float(b)) | (Float(b), Int(a)) => num_eq(*a as f64, *b),
            (Text(a), Text(b)) => a == b,
            (IntList(a), IntList(b)) => a == b,
            (FloatList(a), FloatList(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| num_eq(*x, *y))
            }
            (IntList(a), FloatList(b)) | (FloatList(b), IntList(a)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| num_eq(*x as f64, *y))
            }
            (TextList(a), TextList(b)) => a == b,
            (Sequence(a), Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(items: &[T]) -> String {
            items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("\\")
        }

        match self {
            TagValue::Int(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Text(s) => write!(f, "{}", s),
            TagValue::IntList(v) => write!(f, "[{}]", join(v)),
            TagValue::FloatList(v) => write!(f, "[{}]", join(v)),
            TagValue::TextList(v) => write!(f, "[{}]", join(v)),
            TagValue::Sequence(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}

impl From<Vec<f64>> for TagValue {
    fn from(v: Vec<f64>) -> Self {
        TagValue::FloatList(v)
    }
}

impl From<Vec<i64>> for TagValue {
    fn from(v: Vec<i64>) -> Self {
        TagValue::IntList(v)
    }
}

/// 单个DICOM文件提取出的身份与元数据
///
/// `sop_instance_uid` 是名义主键，但不保证在不同导出之间唯一或一致。
/// 像素数据不预加载，通过 [`crate::PixelDecoder`] 按 `file_path` 按需解码。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub sop_instance_uid: String,
    pub series_instance_uid: String,
    pub study_instance_uid: String,
    pub tags: TagMap,
    pub file_path: PathBuf,
    /// 来源压缩包名称
    pub source_file: String,
}

impl Instance {
    /// 创建新的实例
    pub fn new(
        sop_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        study_instance_uid: impl Into<String>,
    ) -> Self {
        Self {
            sop_instance_uid: sop_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            study_instance_uid: study_instance_uid.into(),
            tags: TagMap::new(),
            file_path: PathBuf::new(),
            source_file: String::new(),
        }
    }

    /// 设置标签 (构建器风格)
    pub fn with_tag(mut self, keyword: &str, value: impl Into<TagValue>) -> Self {
        self.tags.insert(keyword.to_string(), value.into());
        self
    }

    /// 设置文件路径与来源
    pub fn with_source(mut self, file_path: impl Into<PathBuf>, source_file: impl Into<String>) -> Self {
        self.file_path = file_path.into();
        self.source_file = source_file.into();
        self
    }

    /// 按关键字获取标签值
    pub fn tag(&self, keyword: &str) -> Option<&TagValue> {
        self.tags.get(keyword)
    }

    /// 获取文本标签值
    pub fn text_tag(&self, keyword: &str) -> Option<&str> {
        self.tag(keyword).and_then(TagValue::as_text)
    }

    /// 生成轻量引用
    pub fn to_ref(&self) -> InstanceRef {
        InstanceRef {
            sop_instance_uid: self.sop_instance_uid.clone(),
            series_instance_uid: self.series_instance_uid.clone(),
            study_instance_uid: self.study_instance_uid.clone(),
            file_path: self.file_path.clone(),
        }
    }
}

/// 实例的轻量引用，用于缺失/多余实例列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub sop_instance_uid: String,
    pub series_instance_uid: String,
    pub study_instance_uid: String,
    pub file_path: PathBuf,
}

/// 实例匹配模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingMode {
    /// 按SOP Instance UID匹配
    #[default]
    Uid,
    /// 按像素内容哈希匹配
    Hash,
    /// 按像素统计指纹匹配
    Fingerprint,
    /// 多策略级联匹配
    Smart,
}

impl MatchingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingMode::Uid => "uid",
            MatchingMode::Hash => "hash",
            MatchingMode::Fingerprint => "fingerprint",
            MatchingMode::Smart => "smart",
        }
    }
}

impl FromStr for MatchingMode {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uid" => Ok(MatchingMode::Uid),
            "hash" => Ok(MatchingMode::Hash),
            "fingerprint" => Ok(MatchingMode::Fingerprint),
            "smart" => Ok(MatchingMode::Smart),
            _ => Err(CompareError::InvalidMatchingMode(s.to_string())),
        }
    }
}

impl fmt::Display for MatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 匹配策略，按级联优先级排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    PixelHash,
    PixelFingerprint,
    Spatial,
    Acquisition,
    Position,
    Sequence,
    Dimensional,
}

impl MatchStrategy {
    /// 级联匹配的固定优先级顺序
    pub const CASCADE: [MatchStrategy; 7] = [
        MatchStrategy::PixelHash,
        MatchStrategy::PixelFingerprint,
        MatchStrategy::Spatial,
        MatchStrategy::Acquisition,
        MatchStrategy::Position,
        MatchStrategy::Sequence,
        MatchStrategy::Dimensional,
    ];

    /// 元数据策略 (按优先级)
    pub const METADATA: [MatchStrategy; 5] = [
        MatchStrategy::Spatial,
        MatchStrategy::Acquisition,
        MatchStrategy::Position,
        MatchStrategy::Sequence,
        MatchStrategy::Dimensional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::PixelHash => "pixel_hash",
            MatchStrategy::PixelFingerprint => "pixel_fingerprint",
            MatchStrategy::Spatial => "spatial",
            MatchStrategy::Acquisition => "acquisition",
            MatchStrategy::Position => "position",
            MatchStrategy::Sequence => "sequence",
            MatchStrategy::Dimensional => "dimensional",
        }
    }

    /// 策略的固定置信度
    pub fn confidence(&self) -> f64 {
        match self {
            MatchStrategy::PixelHash => 1.0,
            MatchStrategy::PixelFingerprint => 0.95,
            MatchStrategy::Spatial => 0.95,
            MatchStrategy::Acquisition => 0.85,
            MatchStrategy::Position => 0.90,
            MatchStrategy::Sequence => 0.75,
            MatchStrategy::Dimensional => 0.70,
        }
    }

    /// 策略描述
    pub fn description(&self) -> &'static str {
        match self {
            MatchStrategy::PixelHash => "像素内容精确哈希",
            MatchStrategy::PixelFingerprint => "像素统计指纹",
            MatchStrategy::Spatial => "空间位置与方向",
            MatchStrategy::Acquisition => "序列号/实例号与采集时间参数",
            MatchStrategy::Position => "三维空间坐标",
            MatchStrategy::Sequence => "MR序列参数",
            MatchStrategy::Dimensional => "图像尺寸与特征",
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self> {
        MatchStrategy::CASCADE
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| CompareError::InvalidInput(format!("未知的匹配策略: {}", s)))
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 标签差异类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifferenceType {
    ValueDiff,
    MissingTag,
    ExtraTag,
    TypeDiff,
}

impl DifferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifferenceType::ValueDiff => "VALUE_DIFF",
            DifferenceType::MissingTag => "MISSING_TAG",
            DifferenceType::ExtraTag => "EXTRA_TAG",
            DifferenceType::TypeDiff => "TYPE_DIFF",
        }
    }
}

impl fmt::Display for DifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个标签的差异
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDifference {
    pub tag_keyword: String,
    pub baseline_value: Option<TagValue>,
    pub comparison_value: Option<TagValue>,
    pub difference_type: DifferenceType,
}
