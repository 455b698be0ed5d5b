//! Image optimization. PNG files go through oxipng; other formats pass
//! through untouched.

use std::ffi::OsStr;
use std::path::Path;

use crate::error::PipelineError;

pub fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

/// Optimize image bytes. Output is never larger than the input.
pub fn optimize(path: &Path, data: &[u8], level: u8) -> Result<Vec<u8>, PipelineError> {
    if !is_png(path) {
        return Ok(data.to_vec());
    }

    let options = oxipng::Options::from_preset(level.min(6));
    let optimized =
        oxipng::optimize_from_memory(data, &options).map_err(|e| PipelineError::Image {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if optimized.len() < data.len() {
        Ok(optimized)
    } else {
        Ok(data.to_vec())
    }
}
