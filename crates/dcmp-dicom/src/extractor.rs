//! 压缩包解压与DICOM文件识别

use crate::cleanup::CleanupRegistry;
use dcmp_core::{CompareError, Result};
use dicom::dictionary_std::tags;
use dicom::object::OpenFileOptions;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// 小于该字节数的文件不可能是DICOM文件
pub const DEFAULT_MIN_FILE_SIZE: u64 = 128;

/// 头部嗅探读取的字节数
const HEADER_PROBE_LEN: usize = 1024;

/// 明显不是DICOM的扩展名
const SKIPPED_EXTENSIONS: [&str; 10] = ["txt", "xml", "json", "log", "zip", "rar", "tar", "gz", "md", "pdf"];

/// 头部中出现即视为DICOM的字节模式
const DICOM_PATTERNS: [&[u8]; 2] = [b"1.2.840.10008", b"DICOM"];

/// 解压统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub total_files: usize,
    pub total_folders: usize,
    pub dicom_files: usize,
    pub non_dicom_files: usize,
}

/// 已解压的压缩包
///
/// 解压目录归本结构所有，结构销毁时目录随之删除。
#[derive(Debug)]
pub struct ExtractedArchive {
    source_name: String,
    dir: TempDir,
    stats: ExtractionStats,
    dicom_files: Vec<PathBuf>,
    registry: Option<CleanupRegistry>,
}

impl Drop for ExtractedArchive {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.unregister(self.dir.path());
        }
    }
}

impl ExtractedArchive {
    /// 来源压缩包的文件名
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// 解压根目录
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn stats(&self) -> ExtractionStats {
        self.stats
    }

    /// 识别出的DICOM文件 (已排序)
    pub fn dicom_files(&self) -> &[PathBuf] {
        &self.dicom_files
    }
}

/// 压缩包解压器
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    min_file_size: u64,
    registry: Option<CleanupRegistry>,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self {
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            registry: None,
        }
    }
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    /// 解压目录同时登记到 `registry`，供中断时清理
    pub fn with_registry(mut self, registry: CleanupRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 解压ZIP文件到独立的临时目录并识别其中的DICOM文件
    pub fn extract(&self, archive_path: &Path) -> Result<ExtractedArchive> {
        let source_name = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| archive_path.display().to_string());
        info!("开始解压: {}", source_name);

        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| CompareError::Archive(format!("无效的ZIP文件 {}: {}", archive_path.display(), e)))?;

        let dir = TempDir::new()?;
        if let Some(registry) = &self.registry {
            registry.register(dir.path());
        }
        let registry = self.registry.clone();
        let mut folders = BTreeSet::new();
        let mut total_files = 0usize;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| CompareError::Archive(format!("读取ZIP条目失败 {}: {}", archive_path.display(), e)))?;

            let relative = match entry.enclosed_name() {
                Some(path) => path.to_path_buf(),
                None => {
                    warn!("跳过不安全的ZIP条目路径: {}", entry.name());
                    continue;
                }
            };

            if entry.is_dir() {
                folders.insert(relative.clone());
                std::fs::create_dir_all(dir.path().join(&relative))?;
                continue;
            }

            total_files += 1;
            if let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) {
                folders.insert(parent.to_path_buf());
            }

            let target = dir.path().join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut output = File::create(&target)?;
            io::copy(&mut entry, &mut output)?;
        }

        info!("{}: {} 个文件夹, {} 个文件", source_name, folders.len(), total_files);

        let dicom_files = self.find_dicom_candidates(dir.path());
        let stats = ExtractionStats {
            total_files,
            total_folders: folders.len(),
            dicom_files: dicom_files.len(),
            non_dicom_files: total_files.saturating_sub(dicom_files.len()),
        };

        if stats.non_dicom_files > 0 {
            info!(
                "发现 {} 个DICOM文件 (跳过 {} 个非DICOM文件)",
                stats.dicom_files, stats.non_dicom_files
            );
        } else {
            info!("发现 {} 个DICOM文件", stats.dicom_files);
        }

        Ok(ExtractedArchive {
            source_name,
            dir,
            stats,
            dicom_files,
            registry,
        })
    }

    /// 递归查找目录下的DICOM文件，结果按路径排序
    pub fn find_dicom_candidates(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_candidate(path))
            .collect();
        files.sort();
        files
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!("无法读取文件信息 {:?}: {}", path, e);
                return false;
            }
        };
        if size < self.min_file_size {
            debug!("跳过过小的文件 {:?} ({} bytes)", path, size);
            return false;
        }
        is_likely_dicom(path)
    }
}

/// 根据文件内容判断是否为DICOM文件
///
/// 依次检查：偏移128处的 `DICM`、前1KB内的 `DICM`、DICOM特征字节、试解析。
pub fn is_likely_dicom(path: &Path) -> bool {
    let skipped = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            SKIPPED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false);
    if skipped {
        debug!("跳过非DICOM扩展名: {:?}", path);
        return false;
    }

    let header = match read_header(path) {
        Ok(header) => header,
        Err(e) => {
            debug!("读取文件头失败 {:?}: {}", path, e);
            return false;
        }
    };

    if header.len() >= 132 && &header[128..132] == b"DICM" {
        return true;
    }
    if contains(&header, b"DICM") {
        return true;
    }
    if DICOM_PATTERNS.iter().any(|pattern| contains(&header, pattern)) {
        return true;
    }

    match OpenFileOptions::new().read_until(tags::PIXEL_DATA).open_file(path) {
        Ok(obj) => {
            obj.element(tags::SOP_INSTANCE_UID).is_ok() || obj.element(tags::STUDY_INSTANCE_UID).is_ok()
        }
        Err(_) => false,
    }
}

fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN);
    File::open(path)?
        .take(HEADER_PROBE_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn dicm_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    fn write_zip(dir: &Path, entries: &[(&str, Option<Vec<u8>>)]) -> PathBuf {
        let path = dir.join("export.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, FileOptions::default()).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => writer.add_directory(*name, FileOptions::default()).unwrap(),
            }
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_sniffing_by_preamble_and_patterns() {
        let dir = tempfile::tempdir().unwrap();

        let preamble = dir.path().join("IM0001");
        std::fs::write(&preamble, dicm_bytes()).unwrap();
        assert!(is_likely_dicom(&preamble));

        let mut with_uid = vec![b'x'; 200];
        with_uid.extend_from_slice(b"1.2.840.10008.5.1.4.1.1.2");
        let pattern = dir.path().join("raw.bin");
        std::fs::write(&pattern, with_uid).unwrap();
        assert!(is_likely_dicom(&pattern));

        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, dicm_bytes()).unwrap();
        assert!(!is_likely_dicom(&notes));

        let noise = dir.path().join("noise.dat");
        std::fs::write(&noise, vec![7u8; 600]).unwrap();
        assert!(!is_likely_dicom(&noise));
    }

    #[test]
    fn test_small_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tiny = dir.path().join("tiny.dcm");
        std::fs::write(&tiny, b"DICM").unwrap();

        let extractor = ArchiveExtractor::new();
        assert!(extractor.find_dicom_candidates(dir.path()).is_empty());
    }

    #[test]
    fn test_extract_counts_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = write_zip(
            dir.path(),
            &[
                ("DICOM/", None),
                ("DICOM/S1/IM2", Some(dicm_bytes())),
                ("DICOM/S1/IM1", Some(dicm_bytes())),
                ("README.txt", Some(b"export notes".to_vec())),
            ],
        );

        let extracted = ArchiveExtractor::new().extract(&zip_path).unwrap();
        assert_eq!(extracted.source_name(), "export.zip");
        assert_eq!(
            extracted.stats(),
            ExtractionStats {
                total_files: 3,
                total_folders: 2,
                dicom_files: 2,
                non_dicom_files: 1,
            }
        );

        let names: Vec<_> = extracted
            .dicom_files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["IM1", "IM2"]);

        let root = extracted.root().to_path_buf();
        assert!(root.exists());
        drop(extracted);
        assert!(!root.exists());
    }

    #[test]
    fn test_registered_roots_follow_archive_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = write_zip(dir.path(), &[("IM1", Some(dicm_bytes()))]);
        let registry = CleanupRegistry::new();
        let extractor = ArchiveExtractor::new().with_registry(registry.clone());

        let kept = extractor.extract(&zip_path).unwrap();
        let interrupted = extractor.extract(&zip_path).unwrap();
        assert_eq!(registry.pending().len(), 2);

        // 中断时析构不执行，目录由登记表删除
        let abandoned = interrupted.root().to_path_buf();
        std::mem::forget(interrupted);
        drop(kept);
        assert_eq!(registry.pending(), vec![abandoned.clone()]);
        assert_eq!(registry.cleanup(), 1);
        assert!(!abandoned.exists());
    }

    #[test]
    fn test_invalid_zip_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.zip");
        std::fs::write(&bogus, b"not a zip at all").unwrap();

        let err = ArchiveExtractor::new().extract(&bogus).unwrap_err();
        assert!(matches!(err, CompareError::Archive(_)));
    }
}
