//! # DICOM Compare Core
//!
//! 比对系统的核心模块，提供实例/标签数据模型、比对结果结构、错误定义和通用工具。

pub mod error;
pub mod hierarchy;
pub mod models;
pub mod pixels;
pub mod results;
pub mod utils;

pub use error::{CompareError, Result};
pub use hierarchy::*;
pub use models::*;
pub use pixels::{InMemoryPixelDecoder, PixelArray, PixelDecoder};
pub use results::*;
