//! Class label lookup.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

#[derive(Deserialize)]
struct LabelFile {
    labels: Vec<String>,
}

/// Class names indexed by class index.
///
/// Accepts a model info file (`{"labels": [...]}`) or a plain text file with
/// one label per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelInfo {
    labels: Vec<String>,
}

impl LabelInfo {
    pub fn init(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let labels = Self::parse(&raw)
            .with_context(|| format!("failed to parse label file {}", path.display()))?;
        log::info!("loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Line files map line N to class N; blank lines are empty labels.
    pub fn parse(raw: &str) -> Result<Self> {
        let labels: Vec<String> = if raw.trim_start().starts_with('{') {
            let file: LabelFile = serde_json::from_str(raw)?;
            file.labels
        } else {
            raw.lines().map(str::to_string).collect()
        };
        if labels.iter().all(|label| label.trim().is_empty()) {
            return Err(anyhow!("no labels found"));
        }
        Ok(Self { labels })
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Label for `index`, empty when out of range.
    pub fn label(&self, index: u32) -> &str {
        self.labels
            .get(index as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_info_json() {
        let labels = LabelInfo::parse(r#"{"labels": ["person", "bicycle", "car"], "extra": 1}"#)
            .unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.label(2), "car");
        assert_eq!(labels.label(3), "");
    }

    #[test]
    fn parses_line_file() {
        let labels = LabelInfo::parse("tench\r\ngoldfish\ngreat white shark\n").unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.label(1), "goldfish");
        assert_eq!(labels.label(2), "great white shark");
    }

    #[test]
    fn blank_lines_keep_class_indices() {
        let labels = LabelInfo::parse("zero\n\ntwo\nthree").unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.label(1), "");
        assert_eq!(labels.label(2), "two");
        assert_eq!(labels.label(3), "three");
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(LabelInfo::parse("\n \n").is_err());
        assert!(LabelInfo::parse(r#"{"names": ["a"]}"#).is_err());
    }

    #[test]
    fn init_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"labels": ["cat", "dog"]}}"#).unwrap();
        let labels = LabelInfo::init(file.path()).unwrap();
        assert_eq!(labels.label(1), "dog");

        assert!(LabelInfo::init(Path::new("/nonexistent/info.json")).is_err());
    }
}
