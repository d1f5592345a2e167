//! # DICOM Compare DICOM
//!
//! DICOM适配层：压缩包解压、DICOM文件识别、标签解析、像素解码和层级加载。

pub mod cleanup;
pub mod extractor;
pub mod loader;
pub mod parser;
pub mod pixels;

pub use cleanup::CleanupRegistry;
pub use extractor::{is_likely_dicom, ArchiveExtractor, ExtractedArchive, ExtractionStats};
pub use loader::HierarchicalLoader;
pub use parser::DicomParser;
pub use pixels::FilePixelDecoder;
