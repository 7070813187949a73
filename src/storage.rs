//! On-disk layout for downloaded pages and cropped item images.

use std::path::{Path, PathBuf};

/// Directory under the uploads root holding crawled page images.
pub const FLYER_PAGES_DIR: &str = "flyer_pages";

/// Three-level shard directory for a generated file name.
///
/// Dashes are stripped and the remainder right-padded with `0` to six
/// characters; the first three character pairs become nested directories,
/// e.g. `3fa85f64-...png` -> `base/3f/a8/5f`.
pub fn shard_dir(base: &Path, file_name: &str) -> PathBuf {
    let mut key: String = file_name.chars().filter(|c| *c != '-').take(6).collect();
    while key.chars().count() < 6 {
        key.push('0');
    }
    let chars: Vec<char> = key.chars().collect();
    let level = |i: usize| chars[i..i + 2].iter().collect::<String>();

    base.join(level(0)).join(level(2)).join(level(4))
}

/// Local path for a crawled page image:
/// `<uploads>/flyer_pages/<shop>/<flyer_id>_page_<n>.jpg`.
pub fn page_image_path(uploads_dir: &Path, shop: &str, flyer_id: i64, page_number: u32) -> PathBuf {
    uploads_dir
        .join(FLYER_PAGES_DIR)
        .join(shop)
        .join(format!("{}_page_{}.jpg", flyer_id, page_number))
}
