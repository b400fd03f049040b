//! Product content: what a buyer gets access to once entitled.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use coursemart_core::DomainError;

/// Identifier of a trackable content unit (a course topic or a downloadable file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentUnitId(String);

impl ContentUnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ContentUnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentUnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
    #[default]
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: ContentUnitId,
    pub title: String,
    pub video_url: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseModule {
    pub title: String,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Book,
    Ebook,
    Template,
    Guide,
    Software,
    Bundle,
    Resource,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFile {
    pub id: ContentUnitId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub preview: bool,
}

/// Product-type specific data.
///
/// `extensions` holds format-specific attributes (page count, ISBN, software
/// version...) that have no common meaning across formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProductKind {
    Course {
        modules: Vec<CourseModule>,
        duration: Option<String>,
        #[serde(default)]
        level: CourseLevel,
        instructor: Option<String>,
    },
    Download {
        format: DownloadFormat,
        files: Vec<DownloadFile>,
        author: Option<String>,
        #[serde(default)]
        extensions: BTreeMap<String, JsonValue>,
    },
}

impl ProductKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ProductKind::Course { .. } => "course",
            ProductKind::Download { .. } => "download",
        }
    }

    /// Ids of every content unit, in declaration order.
    pub fn unit_ids(&self) -> Vec<&ContentUnitId> {
        match self {
            ProductKind::Course { modules, .. } => modules
                .iter()
                .flat_map(|m| m.topics.iter().map(|t| &t.id))
                .collect(),
            ProductKind::Download { files, .. } => files.iter().map(|f| &f.id).collect(),
        }
    }

    /// Topics across all modules for courses, files for downloads.
    pub fn total_units(&self) -> u32 {
        match self {
            ProductKind::Course { modules, .. } => {
                modules.iter().map(|m| m.topics.len() as u32).sum()
            }
            ProductKind::Download { files, .. } => files.len() as u32,
        }
    }

    pub fn contains_unit(&self, unit: &ContentUnitId) -> bool {
        self.unit_ids().into_iter().any(|id| id == unit)
    }

    pub fn file(&self, id: &ContentUnitId) -> Option<&DownloadFile> {
        match self {
            ProductKind::Download { files, .. } => files.iter().find(|f| &f.id == id),
            ProductKind::Course { .. } => None,
        }
    }

    pub fn duration_label(&self) -> Option<&str> {
        match self {
            ProductKind::Course { duration, .. } => duration.as_deref(),
            ProductKind::Download { .. } => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), DomainError> {
        let mut seen = BTreeSet::new();
        for id in self.unit_ids() {
            if id.as_str().trim().is_empty() {
                return Err(DomainError::validation("content unit id cannot be empty"));
            }
            if !seen.insert(id) {
                return Err(DomainError::validation(format!(
                    "duplicate content unit id '{id}'"
                )));
            }
        }

        match self {
            ProductKind::Course { modules, .. } => {
                if modules.iter().any(|m| m.title.trim().is_empty()) {
                    return Err(DomainError::validation("module title cannot be empty"));
                }
            }
            ProductKind::Download { files, .. } => {
                if files.iter().any(|f| f.url.trim().is_empty()) {
                    return Err(DomainError::validation("download file url cannot be empty"));
                }
            }
        }
        Ok(())
    }
}

/// Limits enforced when serving downloadable files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLimits {
    pub max_downloads: Option<u32>,
    pub access_days: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(units: &[&str]) -> ProductKind {
        ProductKind::Course {
            modules: vec![CourseModule {
                title: "Module 1".to_string(),
                topics: units
                    .iter()
                    .map(|id| Topic {
                        id: ContentUnitId::from(*id),
                        title: format!("Topic {id}"),
                        video_url: None,
                        duration: None,
                    })
                    .collect(),
            }],
            duration: Some("3h".to_string()),
            level: CourseLevel::Beginner,
            instructor: None,
        }
    }

    #[test]
    fn counts_topics_across_modules() {
        let mut kind = course(&["a", "b"]);
        if let ProductKind::Course { modules, .. } = &mut kind {
            modules.push(CourseModule {
                title: "Module 2".to_string(),
                topics: vec![Topic {
                    id: ContentUnitId::from("c"),
                    title: "C".to_string(),
                    video_url: None,
                    duration: None,
                }],
            });
        }
        assert_eq!(kind.total_units(), 3);
        assert!(kind.contains_unit(&ContentUnitId::from("c")));
        assert!(!kind.contains_unit(&ContentUnitId::from("z")));
    }

    #[test]
    fn rejects_duplicate_unit_ids() {
        let err = course(&["a", "a"]).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn download_kind_is_tagged() {
        let kind = ProductKind::Download {
            format: DownloadFormat::Ebook,
            files: vec![DownloadFile {
                id: ContentUnitId::from("f1"),
                name: "book.pdf".to_string(),
                url: "https://files.example/book.pdf".to_string(),
                preview: false,
            }],
            author: Some("Ana".to_string()),
            extensions: BTreeMap::from([("pages".to_string(), JsonValue::from(120))]),
        };

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["format"], "ebook");
        assert_eq!(kind.total_units(), 1);
        assert!(kind.file(&ContentUnitId::from("f1")).is_some());
    }
}
