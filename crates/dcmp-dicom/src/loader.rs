//! 层级加载器
//!
//! 将一个压缩包内的DICOM文件组织为 患者→检查→序列→实例 层级。

use crate::extractor::ExtractedArchive;
use crate::parser::DicomParser;
use dcmp_core::StudySet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 层级加载器
#[derive(Debug, Clone, Default)]
pub struct HierarchicalLoader {
    parser: DicomParser,
}

impl HierarchicalLoader {
    pub fn new(parser: DicomParser) -> Self {
        Self { parser }
    }

    /// 加载已解压压缩包中的全部DICOM文件
    pub fn load(&self, archive: &ExtractedArchive) -> StudySet {
        self.load_files(archive.dicom_files(), archive.source_name())
    }

    /// 加载文件列表
    ///
    /// 单个文件失败只记录在 `failed_files` 中，不中断加载。
    pub fn load_files(&self, files: &[PathBuf], source_name: &str) -> StudySet {
        info!("开始加载 {} 个DICOM文件 ({})", files.len(), source_name);
        let mut study_set = StudySet::new(source_name);

        for path in files {
            match self.parser.parse_file(path, source_name) {
                Ok(Some(instance)) => {
                    if let Some(replaced) = study_set.insert(instance) {
                        debug!(
                            "重复的SOP Instance UID {}，{:?} 被后加载的文件覆盖",
                            replaced.sop_instance_uid, replaced.file_path
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("加载失败 {:?}: {}", path, e);
                    study_set.failed_files.push((path.clone(), e.to_string()));
                }
            }
        }

        if !study_set.failed_files.is_empty() {
            warn!("{} 个文件加载失败", study_set.failed_files.len());
        }
        info!(
            "加载完成 {}: {} 个检查, {} 个序列, {} 个实例",
            source_name,
            study_set.study_count(),
            study_set.series_count(),
            study_set.instance_count()
        );

        study_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::tags;
    use dicom::object::meta::FileMetaTableBuilder;
    use dicom::object::InMemDicomObject;
    use std::path::Path;

    fn write_instance(path: &Path, study: &str, series: &str, sop: &str, description: &str) {
        let obj = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2")),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop)),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study)),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series)),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P001")),
            DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from(description)),
        ]);
        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                .media_storage_sop_instance_uid(sop),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
    }

    #[test]
    fn test_builds_hierarchy_and_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write_instance(&root.join("a1"), "1.1", "1.1.1", "1.1.1.1", "AX");
        write_instance(&root.join("a2"), "1.1", "1.1.1", "1.1.1.2", "AX");
        write_instance(&root.join("b1"), "1.1", "1.1.2", "1.1.2.1", "COR");
        std::fs::write(root.join("broken"), vec![3u8; 400]).unwrap();

        let files: Vec<PathBuf> = ["a1", "a2", "b1", "broken"].iter().map(|n| root.join(n)).collect();
        let set = HierarchicalLoader::default().load_files(&files, "export.zip");

        assert_eq!(set.source_file, "export.zip");
        assert_eq!(set.patient_count(), 1);
        assert_eq!(set.study_count(), 1);
        assert_eq!(set.series_count(), 2);
        assert_eq!(set.instance_count(), 3);
        assert_eq!(set.failed_files.len(), 1);
        assert_eq!(set.failed_files[0].0, root.join("broken"));
        assert!(set.instances().all(|i| i.source_file == "export.zip"));
    }

    #[test]
    fn test_duplicate_sop_uid_last_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write_instance(&root.join("first"), "1.1", "1.1.1", "1.1.1.1", "FIRST");
        write_instance(&root.join("second"), "1.1", "1.1.1", "1.1.1.1", "SECOND");

        let files = vec![root.join("first"), root.join("second")];
        let set = HierarchicalLoader::default().load_files(&files, "dup.zip");

        assert_eq!(set.instance_count(), 1);
        let instance = set.instances().next().unwrap();
        assert_eq!(instance.file_path, root.join("second"));
        assert_eq!(instance.text_tag("SeriesDescription"), Some("SECOND"));
    }
}
