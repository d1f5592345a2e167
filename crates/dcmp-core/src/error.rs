//! 错误定义模块

use thiserror::Error;

/// 比对系统统一错误类型
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("无效的匹配模式: {0} (可选: uid, hash, fingerprint, smart)")]
    InvalidMatchingMode(String),

    #[error("输入无效: {0}")]
    InvalidInput(String),

    #[error("压缩包处理错误: {0}")]
    Archive(String),

    #[error("DICOM解析错误: {0}")]
    DicomParse(String),

    #[error("像素数据不可用 ({sop_instance_uid}): {reason}")]
    PixelUnavailable {
        sop_instance_uid: String,
        reason: String,
    },

    #[error("标签值格式错误 {keyword}: {reason}")]
    MalformedTagValue { keyword: String, reason: String },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl CompareError {
    /// 构造像素不可用错误
    pub fn pixel_unavailable(sop_instance_uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PixelUnavailable {
            sop_instance_uid: sop_instance_uid.into(),
            reason: reason.into(),
        }
    }

    /// 构造标签值格式错误
    pub fn malformed(keyword: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTagValue {
            keyword: keyword.into(),
            reason: reason.into(),
        }
    }

    /// 是否为可在单个实例范围内恢复的错误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PixelUnavailable { .. } | Self::MalformedTagValue { .. })
    }
}

/// 比对系统统一结果类型
pub type Result<T> = std::result::Result<T, CompareError>;
