//! Stylesheet transform through lightningcss.

use lightningcss::bundler::{Bundler, FileProvider};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions};
use std::path::Path;

use crate::error::PipelineError;

/// Partials (`_name.css`) are only reachable through `@import`
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

/// Bundle `@import`s of the stylesheet at `path`, optionally minify, and
/// print it back out.
pub fn transform(path: &Path, minify: bool) -> Result<String, PipelineError> {
    let css_error = |message: String| PipelineError::Css {
        path: path.to_path_buf(),
        message,
    };

    let provider = FileProvider::new();
    let mut bundler = Bundler::new(&provider, None, ParserOptions::default());
    let mut sheet = bundler.bundle(path).map_err(|e| css_error(e.to_string()))?;

    if minify {
        sheet
            .minify(MinifyOptions::default())
            .map_err(|e| css_error(e.to_string()))?;
    }

    let printed = sheet
        .to_css(PrinterOptions {
            minify,
            ..PrinterOptions::default()
        })
        .map_err(|e| css_error(e.to_string()))?;

    let mut code = printed.code;
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Ok(code)
}
