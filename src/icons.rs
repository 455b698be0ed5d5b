//! SVG sprite builder: every icon becomes a `<symbol>` of one sprite file.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;

use crate::error::PipelineError;
use crate::paths::to_slash;

/// One parsed icon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub id: String,
    pub view_box: Option<String>,
    /// Markup between the root `<svg>` tags
    pub body: String,
}

/// Symbol id for an icon at `relative` (below the icons folder):
/// `social/Twitter Bird.svg` becomes `{prefix}social-twitter-bird`.
pub fn symbol_id(prefix: &str, relative: &Path) -> String {
    let stem = to_slash(&relative.with_extension(""));
    let slug: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    format!("{prefix}{slug}")
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.to_string()))
}

fn dimension(value: Option<String>) -> Option<String> {
    let value = value?;
    let number = value.trim().trim_end_matches("px");
    number.parse::<f64>().ok().map(|_| number.to_string())
}

fn view_box_of(e: &BytesStart<'_>) -> Option<String> {
    if let Some(vb) = attribute(e, b"viewBox") {
        return Some(vb);
    }
    let width = dimension(attribute(e, b"width"))?;
    let height = dimension(attribute(e, b"height"))?;
    Some(format!("0 0 {width} {height}"))
}

/// Parse the root `<svg>` element of an icon file
pub fn parse_icon(path: &Path, id: String, svg: &str) -> Result<Icon, PipelineError> {
    let invalid = |message: String| PipelineError::Icon {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = Reader::from_str(svg);
    let mut depth = 0usize;
    let mut body_start = None;
    let mut view_box = None;

    loop {
        let before = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if e.local_name().as_ref() != b"svg" {
                        return Err(invalid("root element is not <svg>".into()));
                    }
                    view_box = view_box_of(&e);
                    body_start = Some(reader.buffer_position());
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) if depth == 0 => {
                if e.local_name().as_ref() != b"svg" {
                    return Err(invalid("root element is not <svg>".into()));
                }
                return Ok(Icon {
                    id,
                    view_box: view_box_of(&e),
                    body: String::new(),
                });
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let start = body_start.unwrap_or(before);
                    return Ok(Icon {
                        id,
                        view_box,
                        body: svg[start..before].trim().to_string(),
                    });
                }
            }
            Ok(Event::Eof) => return Err(invalid("no complete <svg> element".into())),
            Err(e) => return Err(invalid(e.to_string())),
            _ => {}
        }
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Render icons as a hidden sprite, symbols sorted by id
pub fn render_sprite(mut icons: Vec<Icon>) -> String {
    icons.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::from(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" style=\"display: none;\">\n",
    );
    for icon in &icons {
        out.push_str("  <symbol id=\"");
        out.push_str(&escape_attr(&icon.id));
        out.push('"');
        if let Some(vb) = &icon.view_box {
            out.push_str(" viewBox=\"");
            out.push_str(&escape_attr(vb));
            out.push('"');
        }
        out.push('>');
        out.push_str(&icon.body);
        out.push_str("</symbol>\n");
    }
    out.push_str("</svg>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_id() {
        assert_eq!(symbol_id("icon-", Path::new("arrow.svg")), "icon-arrow");
        assert_eq!(
            symbol_id("icon-", Path::new("social/Twitter Bird.svg")),
            "icon-social-twitter-bird"
        );
        assert_eq!(symbol_id("", Path::new("a_b.svg")), "a_b");
    }

    #[test]
    fn test_parse_icon_with_view_box() {
        let svg = r#"<?xml version="1.0"?>
<!-- exported -->
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24"><path d="M0 0h24v24H0z"/><g><circle r="2"/></g></svg>"#;

        let icon = parse_icon(Path::new("a.svg"), "icon-a".into(), svg).unwrap();

        assert_eq!(icon.view_box.as_deref(), Some("0 0 24 24"));
        assert_eq!(icon.body, r#"<path d="M0 0h24v24H0z"/><g><circle r="2"/></g>"#);
    }

    #[test]
    fn test_parse_icon_view_box_from_dimensions() {
        let svg = r#"<svg width="16px" height="12"><rect width="1" height="1"/></svg>"#;
        let icon = parse_icon(Path::new("a.svg"), "a".into(), svg).unwrap();
        assert_eq!(icon.view_box.as_deref(), Some("0 0 16 12"));
    }

    #[test]
    fn test_parse_icon_empty_svg() {
        let icon = parse_icon(Path::new("a.svg"), "a".into(), "<svg viewBox=\"0 0 1 1\"/>").unwrap();
        assert_eq!(icon.body, "");
        assert_eq!(icon.view_box.as_deref(), Some("0 0 1 1"));
    }

    #[test]
    fn test_parse_icon_rejects_non_svg() {
        let err = parse_icon(Path::new("a.svg"), "a".into(), "<html></html>").unwrap_err();
        assert!(matches!(err, PipelineError::Icon { .. }));
        assert!(parse_icon(Path::new("a.svg"), "a".into(), "<svg><g>").is_err());
    }

    #[test]
    fn test_render_sprite_sorted() {
        let icons = vec![
            Icon {
                id: "icon-b".into(),
                view_box: None,
                body: "<g/>".into(),
            },
            Icon {
                id: "icon-a".into(),
                view_box: Some("0 0 8 8".into()),
                body: "<path/>".into(),
            },
        ];

        let sprite = render_sprite(icons);
        let a = sprite.find("icon-a").unwrap();
        let b = sprite.find("icon-b").unwrap();
        assert!(a < b);
        assert!(sprite.contains("<symbol id=\"icon-a\" viewBox=\"0 0 8 8\"><path/></symbol>"));
        assert!(sprite.contains("<symbol id=\"icon-b\"><g/></symbol>"));
        assert!(sprite.ends_with("</svg>\n"));
    }
}
