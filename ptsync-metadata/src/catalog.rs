//! The configured metadata catalog: role → document file, rooted at the
//! metadata directory.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use ptsync_core::config::MetadataFiles;

use crate::document::{self, MetadataDocument};

/// Validation status of one catalog document, as shown by dry runs and
/// recorded in execution reports.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub role: String,
    pub filename: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a publication-date rewrite for one catalog document.
#[derive(Debug, Clone, Serialize)]
pub struct DateUpdate {
    pub filename: String,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The role→filename mapping from `settings.json`, resolved against the
/// metadata directory.
#[derive(Debug, Clone)]
pub struct MetadataCatalog {
    dir: PathBuf,
    files: Vec<(String, String)>,
}

impl MetadataCatalog {
    pub fn new(dir: impl Into<PathBuf>, files: &MetadataFiles) -> Self {
        Self {
            dir: dir.into(),
            files: files
                .entries()
                .into_iter()
                .map(|(role, name)| (role.to_owned(), name.to_owned()))
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of the document registered for `role`, if any.
    pub fn document_path(&self, role: &str) -> Option<PathBuf> {
        self.files
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, name)| self.dir.join(name))
    }

    /// Absolute paths of every configured document, in catalog order.
    pub fn document_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|(_, name)| self.dir.join(name))
            .collect()
    }

    /// Validate every configured document. Never fails as a whole; invalid
    /// documents are reported per entry.
    pub fn validate_all(&self) -> Vec<DocumentStatus> {
        self.files
            .iter()
            .map(|(role, name)| match MetadataDocument::load(&self.dir.join(name)) {
                Ok(doc) => DocumentStatus {
                    role: role.clone(),
                    filename: name.clone(),
                    valid: true,
                    title: doc.title,
                    publication_date: doc.publication_date,
                    error: None,
                },
                Err(err) => DocumentStatus {
                    role: role.clone(),
                    filename: name.clone(),
                    valid: false,
                    title: None,
                    publication_date: None,
                    error: Some(err.to_string()),
                },
            })
            .collect()
    }

    /// Rewrite the publication date on every configured document.
    ///
    /// Unless `force` is set, a document whose publication date already
    /// equals `date` is left untouched (no backup, no rewrite) and reported
    /// as current. A document with no date element at all is an error.
    pub fn update_all_dates(&self, date: NaiveDate, force: bool) -> Vec<DateUpdate> {
        let formatted = date.format("%Y-%m-%d").to_string();
        let mut updates = Vec::with_capacity(self.files.len());

        for (_, name) in &self.files {
            let path = self.dir.join(name);

            if !force {
                if let Ok(doc) = MetadataDocument::load(&path) {
                    if doc.publication_date.as_deref() == Some(formatted.as_str()) {
                        tracing::debug!("publication date already current: {name}");
                        updates.push(DateUpdate {
                            filename: name.clone(),
                            updated: false,
                            error: None,
                        });
                        continue;
                    }
                }
            }

            updates.push(match document::set_publication_date(&path, date) {
                Ok(true) => DateUpdate {
                    filename: name.clone(),
                    updated: true,
                    error: None,
                },
                Ok(false) => DateUpdate {
                    filename: name.clone(),
                    updated: false,
                    error: Some("no date elements found to update".into()),
                },
                Err(err) => DateUpdate {
                    filename: name.clone(),
                    updated: false,
                    error: Some(err.to_string()),
                },
            });
        }

        let ok = updates.iter().filter(|u| u.updated).count();
        tracing::info!("updated dates in {ok}/{} metadata files", updates.len());
        updates
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const FGDC_DOC: &str = "<metadata><citeinfo><title>doc</title><pubdate>20200101</pubdate></citeinfo></metadata>";

    fn catalog_with_docs(tmp: &TempDir) -> MetadataCatalog {
        let files = MetadataFiles::default();
        for (_, name) in files.entries() {
            fs::write(tmp.path().join(name), FGDC_DOC).expect("doc");
        }
        MetadataCatalog::new(tmp.path(), &files)
    }

    #[test]
    fn validate_all_reports_every_entry() {
        let tmp = TempDir::new().expect("tmp");
        let catalog = catalog_with_docs(&tmp);
        let report = catalog.validate_all();
        assert_eq!(report.len(), 6);
        assert!(report.iter().all(|s| s.valid));
    }

    #[test]
    fn invalid_entry_is_reported_not_fatal() {
        let tmp = TempDir::new().expect("tmp");
        let catalog = catalog_with_docs(&tmp);
        fs::write(tmp.path().join("WR_PT_Points.xml"), "<bogus/>").expect("overwrite");

        let report = catalog.validate_all();
        let bad: Vec<_> = report.iter().filter(|s| !s.valid).collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].filename, "WR_PT_Points.xml");
        assert!(bad[0].error.is_some());
    }

    #[test]
    fn update_all_dates_touches_every_document() {
        let tmp = TempDir::new().expect("tmp");
        let catalog = catalog_with_docs(&tmp);
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();

        let updates = catalog.update_all_dates(date, false);
        assert_eq!(updates.len(), 6);
        assert!(updates.iter().all(|u| u.updated && u.error.is_none()));

        for path in catalog.document_paths() {
            let doc = MetadataDocument::load(&path).expect("reload");
            assert_eq!(doc.publication_date.as_deref(), Some("2026-08-06"));
        }
    }

    #[test]
    fn current_dates_are_skipped_unless_forced() {
        let tmp = TempDir::new().expect("tmp");
        let catalog = catalog_with_docs(&tmp);
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();

        catalog.update_all_dates(date, false);
        let replay = catalog.update_all_dates(date, false);
        assert!(replay.iter().all(|u| !u.updated && u.error.is_none()));

        let forced = catalog.update_all_dates(date, true);
        assert!(forced.iter().all(|u| u.updated));
    }

    #[test]
    fn document_path_resolves_known_roles() {
        let tmp = TempDir::new().expect("tmp");
        let catalog = catalog_with_docs(&tmp);
        assert_eq!(
            catalog.document_path("lands_active"),
            Some(tmp.path().join("WR_PT_Lands_Active.xml"))
        );
        assert_eq!(catalog.document_path("unknown"), None);
    }
}
