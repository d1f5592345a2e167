//! # DICOM Compare 管理模块
//!
//! 配置加载、校验和日志初始化

pub mod config;
pub mod logging;

pub use config::{CompareConfig, ConfigValidator, DiffConfig, ExtractionConfig, ImageConfig, LoggingConfig, MatchingConfig};
pub use logging::{init_logging, LogFormat};
