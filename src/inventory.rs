//! Read-only survey of the images in a tree

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::processing::ImageCodec;
use crate::walker::ImageWalker;

/// Image counts per size and per embedded DPI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    /// Keyed by (long edge, short edge)
    pub sizes: BTreeMap<(u32, u32), usize>,
    /// `None` when the image carries no density
    pub dpis: BTreeMap<Option<(u32, u32)>, usize>,
    pub total: usize,
    /// Probed as images but failed to decode
    pub unreadable: usize,
}

impl Inventory {
    fn add(&mut self, width: u32, height: u32, dpi: Option<(u32, u32)>) {
        *self.sizes.entry(long_short(width, height)).or_insert(0) += 1;
        *self.dpis.entry(dpi).or_insert(0) += 1;
        self.total += 1;
    }

    fn merge(mut self, other: Inventory) -> Self {
        for (size, count) in other.sizes {
            *self.sizes.entry(size).or_insert(0) += count;
        }
        for (dpi, count) in other.dpis {
            *self.dpis.entry(dpi).or_insert(0) += count;
        }
        self.total += other.total;
        self.unreadable += other.unreadable;
        self
    }

    /// Render the "Sizes:" and "DPIs:" tables
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("Sizes:\n");
        for ((long, short), count) in &self.sizes {
            let _ = writeln!(out, " {:5}x{:<5}: {:6}", long, short, count);
        }

        out.push_str("DPIs:\n");
        for (dpi, count) in &self.dpis {
            let _ = match dpi {
                Some((x, y)) => writeln!(out, " {:3}x{:<3}: {:4}", x, y, count),
                None => writeln!(out, "      - : {:4}", count),
            };
        }

        out
    }
}

/// Edges ordered long first, with width counting as long only when strictly
/// greater
fn long_short(width: u32, height: u32) -> (u32, u32) {
    if width > height {
        (width, height)
    } else {
        (height, width)
    }
}

/// Walk `root` and tally every image it holds. Headers are decoded in
/// parallel; nothing is written.
pub fn survey<C: ImageCodec + ?Sized>(root: &Path, codec: &C) -> Inventory {
    let paths: Vec<PathBuf> = ImageWalker::new(root, codec).collect();
    info!("Surveying {} images under {:?}", paths.len(), root);

    paths
        .par_iter()
        .fold(Inventory::default, |mut inventory, path| {
            match codec.decode(path) {
                Ok(info) => inventory.add(info.width, info.height, info.metadata.dpi),
                Err(e) => {
                    debug!("Cannot read {:?}: {}", path, e);
                    inventory.unreadable += 1;
                }
            }
            inventory
        })
        .reduce(Inventory::default, Inventory::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{apply_metadata, ImageFormat, ProcessingEngine};
    use image::RgbImage;
    use std::fs;
    use tempfile::TempDir;

    fn save_png(path: &Path, width: u32, height: u32, dpi: Option<(u32, u32)>) {
        let mut data = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut std::io::Cursor::new(&mut data), image::ImageOutputFormat::Png)
            .unwrap();
        let data = apply_metadata(data, ImageFormat::Png, None, dpi).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_long_short_ordering() {
        assert_eq!(long_short(1200, 640), (1200, 640));
        assert_eq!(long_short(640, 1200), (1200, 640));
        assert_eq!(long_short(300, 300), (300, 300));
    }

    #[test]
    fn test_survey_counts_sizes_and_dpis() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        save_png(&root.join("a.png"), 40, 20, Some((300, 300)));
        save_png(&root.join("sub/b.png"), 20, 40, Some((300, 300)));
        save_png(&root.join("sub/c.png"), 10, 10, None);
        fs::write(root.join("readme.txt"), "not an image").unwrap();

        let inventory = survey(root, &ProcessingEngine::new());
        assert_eq!(inventory.total, 3);
        assert_eq!(inventory.unreadable, 0);
        assert_eq!(inventory.sizes.get(&(40, 20)), Some(&2));
        assert_eq!(inventory.sizes.get(&(10, 10)), Some(&1));
        assert_eq!(inventory.dpis.get(&Some((300, 300))), Some(&2));
        assert_eq!(inventory.dpis.get(&None), Some(&1));
    }

    #[test]
    fn test_render_layout() {
        let mut inventory = Inventory::default();
        inventory.add(1200, 640, Some((72, 72)));
        inventory.add(640, 1200, None);

        let rendered = inventory.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Sizes:",
                "  1200x640  :      2",
                "DPIs:",
                "      - :    1",
                "  72x72 :    1",
            ]
        );
    }

    #[test]
    fn test_empty_tree() {
        let dir = TempDir::new().unwrap();
        let inventory = survey(dir.path(), &ProcessingEngine::new());
        assert_eq!(inventory.total, 0);
        assert_eq!(inventory.render(), "Sizes:\nDPIs:\n");
    }
}
