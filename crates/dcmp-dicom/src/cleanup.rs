//! 解压目录登记
//!
//! 正常退出时目录随 [`ExtractedArchive`](crate::ExtractedArchive) 销毁而删除；
//! 进程被中断时析构不会执行，由中断处理函数调用 [`CleanupRegistry::cleanup`] 删除仍在登记中的目录。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// 尚未删除的解压目录集合，可在线程间共享
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    roots: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn roots(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, root: &Path) {
        debug!("登记解压目录: {:?}", root);
        self.roots().insert(root.to_path_buf());
    }

    pub fn unregister(&self, root: &Path) {
        self.roots().remove(root);
    }

    /// 仍在登记中的目录
    pub fn pending(&self) -> Vec<PathBuf> {
        self.roots().iter().cloned().collect()
    }

    /// 删除全部登记的目录，返回成功删除的数量
    pub fn cleanup(&self) -> usize {
        let roots = std::mem::take(&mut *self.roots());
        let mut removed = 0;
        for root in roots {
            match std::fs::remove_dir_all(&root) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("无法删除解压目录 {:?}: {}", root, e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_registered_dirs() {
        let parent = tempfile::tempdir().unwrap();
        let first = parent.path().join("a");
        let second = parent.path().join("b");
        std::fs::create_dir_all(first.join("nested")).unwrap();
        std::fs::write(first.join("nested/IM1"), b"data").unwrap();
        std::fs::create_dir_all(&second).unwrap();

        let registry = CleanupRegistry::new();
        registry.register(&first);
        registry.register(&second);
        registry.register(&parent.path().join("gone"));
        assert_eq!(registry.pending().len(), 3);

        assert_eq!(registry.clone().cleanup(), 2);
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(registry.pending().is_empty());
        assert_eq!(registry.cleanup(), 0);
    }

    #[test]
    fn test_unregistered_dir_is_kept() {
        let parent = tempfile::tempdir().unwrap();
        let kept = parent.path().join("kept");
        std::fs::create_dir_all(&kept).unwrap();

        let registry = CleanupRegistry::new();
        registry.register(&kept);
        registry.unregister(&kept);
        assert_eq!(registry.cleanup(), 0);
        assert!(kept.exists());
    }
}
