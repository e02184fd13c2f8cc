//! SVG post-processing
//!
//! Graphviz cannot fill the canvas with a pattern, so the diagram is
//! rendered with a placeholder background colour that is swapped for a
//! `<pattern>` reference afterwards.

use crate::config::StyleConfig;
use crate::error::{Error, Result};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

/// Id of the injected background pattern.
pub const BG_PATTERN_ID: &str = "bg_pattern";

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(<a[^>]*>)([\s\S]*?<text[\s\S]*?</text>)([\s\S]*?</a>)")
            .expect("valid anchor regex")
    })
}

/// The tiled background `<pattern>` element.
pub fn background_pattern(style: &StyleConfig) -> String {
    format!(
        concat!(
            r#"<pattern height="40" width="40" id="{id}" patternUnits="userSpaceOnUse">"#,
            r#"<rect x="0" y="0" width="40" height="40" fill="{bg}" />"#,
            r#"<circle cx="15" cy="15" r="14" stroke="{fg}" stroke-width="1" fill="none" />"#,
            r#"<text x="7" y="19" font-family="Arial" font-size="12" fill="{fg}">AG</text>"#,
            r#"</pattern>"#
        ),
        id = BG_PATTERN_ID,
        bg = style.canvas_pattern_bg,
        fg = style.canvas_pattern_color,
    )
}

/// Inject the background pattern, point the canvas at it and highlight links.
///
/// # Errors
///
/// Returns [`Error::InvalidSvg`] when the document has no closing `</svg>`.
pub fn post_process(svg: &str, style: &StyleConfig) -> Result<String> {
    let close = svg
        .rfind("</svg>")
        .ok_or_else(|| Error::InvalidSvg("no closing </svg> tag found".to_string()))?;
    let pattern = background_pattern(style);

    let mut updated = match svg.find("</defs>") {
        Some(defs_end) if svg.contains("<defs") => {
            format!("{}{}{}", &svg[..defs_end], pattern, &svg[defs_end..])
        }
        _ => format!(
            "{}<defs>{}</defs>\n{}",
            &svg[..close],
            pattern,
            &svg[close..]
        ),
    };

    updated = updated.replace(
        &style.canvas_replace_bg,
        &format!("url(#{})", BG_PATTERN_ID),
    );
    Ok(highlight_anchors(&updated))
}

/// Post-process an SVG file in place.
pub fn post_process_file(path: &Path, style: &StyleConfig) -> Result<()> {
    let svg = std::fs::read_to_string(path)?;
    let updated = post_process(&svg, style)?;
    std::fs::write(path, updated)?;
    tracing::debug!(path = %path.display(), "SVG post-processed");
    Ok(())
}

/// Bold the text of every link and give the link a pointer cursor.
pub fn highlight_anchors(svg: &str) -> String {
    anchor_regex()
        .replace_all(svg, |caps: &Captures| {
            let mut a_tag = caps[1].to_string();
            let mut text = caps[2].to_string();

            if !a_tag.contains("style") {
                a_tag = a_tag.replacen('>', r#" style="cursor: pointer;">"#, 1);
            } else if !a_tag.contains("cursor: pointer") {
                a_tag = a_tag.replacen(r#"style=""#, r#"style="cursor: pointer; "#, 1);
            }
            if !text.contains("font-weight") {
                text = text.replacen("<text", r#"<text font-weight="bold""#, 1);
            }
            format!("{}{}{}", a_tag, text, &caps[3])
        })
        .into_owned()
}
