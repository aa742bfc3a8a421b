//! Breadth-first discovery of image files under a root directory

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::processing::ImageCodec;

/// Lazy, breadth-first iterator over the images below a root.
///
/// Each directory is listed in full (sorted by file name) before its entries
/// are examined; subdirectories are queued behind every directory already
/// pending. Files are yielded only when the codec can probe them. Unreadable
/// directories and entries are skipped. Symbolic links are never descended,
/// so no path is yielded twice.
pub struct ImageWalker<'a, C: ?Sized> {
    codec: &'a C,
    pending: VecDeque<PathBuf>,
    current: Option<walkdir::IntoIter>,
}

impl<'a, C: ImageCodec + ?Sized> ImageWalker<'a, C> {
    pub fn new<P: Into<PathBuf>>(root: P, codec: &'a C) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(root.into());
        Self {
            codec,
            pending,
            current: None,
        }
    }

    fn list(directory: &Path) -> walkdir::IntoIter {
        WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
    }
}

impl<C: ImageCodec + ?Sized> Iterator for ImageWalker<'_, C> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                for entry in entries.by_ref() {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            debug!("Skipping unreadable entry {:?}: {}", e.path(), e);
                            continue;
                        }
                    };

                    if entry.file_type().is_dir() {
                        self.pending.push_back(entry.into_path());
                    } else if self.codec.probe(entry.path()) {
                        return Some(entry.into_path());
                    }
                }
                self.current = None;
            }

            let directory = self.pending.pop_front()?;
            self.current = Some(Self::list(&directory));
        }
    }
}

/// Count the images below `root` without processing them
pub fn count_images<C: ImageCodec + ?Sized>(root: &Path, codec: &C) -> usize {
    ImageWalker::new(root, codec).count()
}
