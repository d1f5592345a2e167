//! 像素数据抽象
//!
//! 核心比对逻辑只依赖 [`PixelDecoder`] 接口，具体解码由DICOM适配层提供。

use crate::error::{CompareError, Result};
use crate::models::Instance;
use std::collections::HashMap;

/// 解码后的像素数组
///
/// `bytes` 为原生字节布局 (小端序，不做任何归一化)，`samples` 为逐样本的数值。
#[derive(Debug, Clone, PartialEq)]
pub struct PixelArray {
    shape: Vec<usize>,
    bytes: Vec<u8>,
    samples: Vec<f64>,
}

impl PixelArray {
    /// 由原生字节构建
    ///
    /// 按分配位数与像素表示 (有符号/无符号) 解释小端字节。
    pub fn from_native(shape: Vec<usize>, bytes: Vec<u8>, bits_allocated: u16, signed: bool) -> Result<Self> {
        let samples: Vec<f64> = match (bits_allocated, signed) {
            (8, false) => bytes.iter().map(|b| *b as f64).collect(),
            (8, true) => bytes.iter().map(|b| *b as i8 as f64).collect(),
            (16, false) => bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as f64)
                .collect(),
            (16, true) => bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
                .collect(),
            (32, false) => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            (32, true) => bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            (bits, _) => {
                return Err(CompareError::Internal(format!("不支持的分配位数: {}", bits)));
            }
        };

        let expected: usize = shape.iter().product();
        if expected != samples.len() {
            return Err(CompareError::Internal(format!(
                "像素数量与形状不一致: 形状 {:?} 需要 {} 个样本，实际 {} 个",
                shape,
                expected,
                samples.len()
            )));
        }

        Ok(Self { shape, bytes, samples })
    }

    /// 由8位无符号样本构建
    pub fn from_u8(shape: Vec<usize>, values: &[u8]) -> Result<Self> {
        Self::from_native(shape, values.to_vec(), 8, false)
    }

    /// 由16位无符号样本构建
    pub fn from_u16(shape: Vec<usize>, values: &[u16]) -> Result<Self> {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_native(shape, bytes, 16, false)
    }

    /// 由16位有符号样本构建
    pub fn from_i16(shape: Vec<usize>, values: &[i16]) -> Result<Self> {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_native(shape, bytes, 16, true)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 像素解码器
///
/// 像素数据缺失或损坏时返回 [`CompareError::PixelUnavailable`]。
pub trait PixelDecoder {
    fn decode(&self, instance: &Instance) -> Result<PixelArray>;
}

/// 内存像素解码器，按SOP Instance UID提供像素数组
#[derive(Debug, Default, Clone)]
pub struct InMemoryPixelDecoder {
    arrays: HashMap<String, PixelArray>,
}

impl InMemoryPixelDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册像素数组
    pub fn insert(&mut self, sop_instance_uid: impl Into<String>, pixels: PixelArray) {
        self.arrays.insert(sop_instance_uid.into(), pixels);
    }

    /// 注册像素数组 (构建器风格)
    pub fn with(mut self, sop_instance_uid: impl Into<String>, pixels: PixelArray) -> Self {
        self.insert(sop_instance_uid, pixels);
        self
    }
}

impl PixelDecoder for InMemoryPixelDecoder {
    fn decode(&self, instance: &Instance) -> Result<PixelArray> {
        self.arrays
            .get(&instance.sop_instance_uid)
            .cloned()
            .ok_or_else(|| CompareError::pixel_unavailable(&instance.sop_instance_uid, "未找到像素数据"))
    }
}
