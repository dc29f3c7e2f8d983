//! Folder descriptions.
//!
//! A folder may carry a `description.md`: Markdown text, optionally opened
//! by a YAML front matter block.
//!
//! ```text
//! ---
//! title: Holiday photos
//! enabled: false
//! files:
//!   beach.jpg: The beach at noon
//! ---
//! Pictures from the trip.
//! ```
//!
//! Without the file the folder name is the title and the download is
//! enabled.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const DESCRIPTION_FILE: &str = "description.md";
const FENCE: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct FrontMatter {
    pub title: Option<String>,
    pub enabled: bool,
    /// File name to a short description shown instead of the name.
    pub files: HashMap<String, String>,
}
impl Default for FrontMatter {
    fn default() -> Self {
        Self { title: None, enabled: true, files: HashMap::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Description {
    pub front: FrontMatter,
    /// Markdown after the front matter, trimmed; `None` when blank.
    pub body: Option<String>,
}
impl Description {
    /// Read the folder's description file, if there is one.
    pub fn read(folder: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(folder.join(DESCRIPTION_FILE)) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Io),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let (front, body) = split_front_matter(text);
        let front = match front {
            Some(yaml) if !yaml.trim().is_empty() => {
                serde_yaml::from_str(yaml).or_raise(|| ErrorKind::Description)?
            },
            _ => FrontMatter::default(),
        };
        let body = Some(body.trim()).filter(|body| !body.is_empty()).map(str::to_string);
        Ok(Self { front, body })
    }
}

/// Split `text` into its front matter (between two `---` lines at the very
/// start) and the rest. An unterminated block is treated as plain text.
fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix(FENCE) else {
        return (None, text);
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        return (None, text);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FENCE {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_front_matter_and_body() {
        let description = Description::parse(
            "---\ntitle: Holiday photos\nenabled: false\nfiles:\n  beach.jpg: The beach at noon\n---\n\nPictures from the trip.\n",
        )
        .unwrap();
        assert_eq!(description.front.title.as_deref(), Some("Holiday photos"));
        assert!(!description.front.enabled);
        assert_eq!(description.front.files["beach.jpg"], "The beach at noon");
        assert_eq!(description.body.as_deref(), Some("Pictures from the trip."));
    }

    #[rstest]
    #[case::no_front_matter("Just text.", Some("Just text."))]
    #[case::empty_front_matter("---\n---\nJust text.", Some("Just text."))]
    #[case::unterminated("---\ntitle: x\n", Some("---\ntitle: x"))]
    #[case::crlf("---\r\ntitle: x\r\n---\r\n", None)]
    #[case::blank("", None)]
    fn test_body(#[case] text: &str, #[case] body: Option<&str>) {
        assert_eq!(Description::parse(text).unwrap().body.as_deref(), body);
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let description = Description::parse("---\ntitle: Only a title\n---\n").unwrap();
        assert!(description.front.enabled);
        assert!(description.front.files.is_empty());
    }

    #[test]
    fn test_invalid_yaml_fails() {
        let err = Description::parse("---\ntitle: [unclosed\n---\n").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Description));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Description::read(dir.path()).unwrap(), None);
    }
}
