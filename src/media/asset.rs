use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::media::remote::FileNode;

/// Display-ready record for one remote media object. `id` is the platform's
/// opaque identifier and round-trips exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub preview: String,
    pub filename: String,
    pub label: String,
}

impl Asset {
    /// Collapse one node of the remote file union into an `Asset`.
    /// Nodes without a resolvable preview URL are dropped here, so the
    /// picker never sees an unrenderable record.
    pub fn from_node(node: &FileNode) -> Option<Asset> {
        match node {
            FileNode::Image {
                id,
                alt,
                preview_url,
                image_url,
                source_url,
            } => {
                let preview = first_url(&[preview_url, image_url, source_url])?;
                let filename = display_name(&[source_url], &preview, alt);
                Some(Self::build(id, preview, filename))
            }
            FileNode::Generic {
                id,
                alt,
                preview_url,
                file_url,
            } => {
                let preview = first_url(&[preview_url, file_url])?;
                let filename = display_name(&[file_url], &preview, alt);
                Some(Self::build(id, preview, filename))
            }
            FileNode::Video {
                id,
                alt,
                preview_url,
                source_url,
            } => {
                let preview = first_url(&[preview_url, source_url])?;
                let filename = display_name(&[source_url], &preview, alt);
                Some(Self::build(id, preview, filename))
            }
        }
    }

    fn build(id: &str, preview: String, filename: String) -> Asset {
        Asset {
            id: id.to_string(),
            preview,
            label: filename.clone(),
            filename,
        }
    }
}

fn first_url(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|u| !u.is_empty())
        .map(str::to_string)
}

/// Best-effort display name: basename of the original source, then of the
/// preview, then the alt text, then the literal "image".
fn display_name(sources: &[&Option<String>], preview: &str, alt: &Option<String>) -> String {
    sources
        .iter()
        .filter_map(|s| s.as_deref())
        .chain([preview])
        .find_map(basename_from_url)
        .or_else(|| alt.clone().filter(|a| !a.is_empty()))
        .unwrap_or_else(|| "image".to_string())
}

/// Last non-empty path segment of a URL, percent-decoded. Returns `None`
/// for unparseable URLs or URLs without a usable segment.
fn basename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let decoded = percent_decode_str(last).decode_utf8().ok()?.to_string();
    if decoded.is_empty() { None } else { Some(decoded) }
}
