//! Metadata document parsing, validation, and publication-date rewriting.
//!
//! Two formats are recognized structurally: ISO 19139 (root `MD_Metadata`,
//! usually prefix-qualified) and FGDC (root `metadata`). Date rewriting
//! touches every known publication-date element:
//!
//! - FGDC `pubdate`
//! - ISO `dateStamp/Date` and `dateStamp/DateTime`
//! - ISO `CI_Date/date/Date`
//! - ISO `publicationDate/Date`
//!
//! A rewrite always copies the pre-mutation file to a sibling `.bak` first,
//! then writes through a temp file and an atomic rename.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{io_err, xml_err, MetadataError};

/// Recognized metadata document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    Iso19139,
    Fgdc,
}

/// A structurally validated metadata document.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    pub path: PathBuf,
    pub format: MetadataFormat,
    pub title: Option<String>,
    pub publication_date: Option<String>,
}

impl MetadataDocument {
    /// Parse and validate a document, extracting title and publication date
    /// where present.
    pub fn load(path: &Path) -> Result<MetadataDocument, MetadataError> {
        if !path.exists() {
            return Err(MetadataError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;

        let mut reader = Reader::from_reader(contents.as_bytes());
        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut format = None;
        let mut title = None;
        let mut publication_date = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    if format.is_none() {
                        format = Some(root_format(path, &name)?);
                    }
                    stack.push(name);
                }
                Ok(Event::Empty(ref e)) => {
                    if format.is_none() {
                        format = Some(root_format(path, &local_name(e.name().as_ref()))?);
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| xml_err(path, e))?
                        .trim()
                        .to_string();
                    if text.is_empty() {
                        buf.clear();
                        continue;
                    }
                    if title.is_none() && stack.iter().any(|n| n == "title") {
                        title = Some(text);
                    } else if publication_date.is_none() && is_publication_date_path(&stack) {
                        publication_date = Some(text);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(xml_err(path, e)),
                _ => {}
            }
            buf.clear();
        }

        let format = format.ok_or_else(|| MetadataError::Invalid {
            path: path.to_path_buf(),
            reason: "document has no root element".into(),
        })?;

        Ok(MetadataDocument {
            path: path.to_path_buf(),
            format,
            title,
            publication_date,
        })
    }
}

/// Rewrite every publication-date element of a document to `date`.
///
/// Validates first; a document that fails structural validation is never
/// mutated. Returns `false` (and leaves the file untouched, no backup) when
/// no date element exists to rewrite.
pub fn set_publication_date(path: &Path, date: NaiveDate) -> Result<bool, MetadataError> {
    MetadataDocument::load(path)?;

    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let formatted = date.format("%Y-%m-%d").to_string();

    let mut reader = Reader::from_reader(contents.as_bytes());
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut updated = false;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(event) => event,
            Err(e) => return Err(xml_err(path, e)),
        };

        let replace = matches!(event, Event::Text(_)) && is_publication_date_path(&stack);
        match &event {
            Event::Start(e) => stack.push(local_name(e.name().as_ref())),
            Event::End(_) => {
                stack.pop();
            }
            _ => {}
        }

        let result = if replace {
            updated = true;
            writer.write_event(Event::Text(BytesText::new(&formatted)))
        } else {
            writer.write_event(event)
        };
        result.map_err(|e| MetadataError::Rewrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        buf.clear();
    }

    if !updated {
        tracing::warn!("no date elements found to update in {}", path.display());
        return Ok(false);
    }

    // Backup the pre-mutation file, then write through a temp file and an
    // atomic rename.
    let backup = backup_path(path);
    std::fs::copy(path, &backup).map_err(|e| io_err(&backup, e))?;

    let tmp = PathBuf::from(format!("{}.ptsync.tmp", path.display()));
    std::fs::write(&tmp, writer.into_inner()).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("updated publication date in {}", path.display());
    Ok(true)
}

/// `<name>.xml` → `<name>.xml.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.bak", path.display()))
}

fn root_format(path: &Path, name: &str) -> Result<MetadataFormat, MetadataError> {
    match name {
        "MD_Metadata" => Ok(MetadataFormat::Iso19139),
        "metadata" => Ok(MetadataFormat::Fgdc),
        other => Err(MetadataError::Invalid {
            path: path.to_path_buf(),
            reason: format!("unexpected root element <{other}>"),
        }),
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn is_publication_date_path(stack: &[String]) -> bool {
    let depth = stack.len();
    match stack.last().map(String::as_str) {
        Some("pubdate") => true,
        Some("Date") | Some("DateTime") => {
            let parent = depth.checked_sub(2).map(|i| stack[i].as_str());
            match parent {
                Some("dateStamp") | Some("publicationDate") => true,
                Some("date") => depth
                    .checked_sub(3)
                    .map(|i| stack[i] == "CI_Date")
                    .unwrap_or(false),
                _ => false,
            }
        }
        _ => false,
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

    const ISO_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:dateStamp><gco:Date>2019-04-02</gco:Date></gmd:dateStamp>
  <gmd:identificationInfo>
    <gmd:citation>
      <gmd:title><gco:CharacterString>PT Points (All)</gco:CharacterString></gmd:title>
      <gmd:date>
        <gmd:CI_Date>
          <gmd:date><gco:Date>2019-04-02</gco:Date></gmd:date>
        </gmd:CI_Date>
      </gmd:date>
    </gmd:citation>
  </gmd:identificationInfo>
</gmd:MD_Metadata>"#;

    const FGDC_DOC: &str = r#"<metadata>
  <idinfo>
    <citation>
      <citeinfo>
        <title>PT Lands (Active)</title>
        <pubdate>20190402</pubdate>
      </citeinfo>
    </citation>
  </idinfo>
</metadata>"#;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write doc");
        path
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_document_is_recognized() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "points_all.xml", ISO_DOC);
        let doc = MetadataDocument::load(&path).expect("load");
        assert_eq!(doc.format, MetadataFormat::Iso19139);
        assert_eq!(doc.title.as_deref(), Some("PT Points (All)"));
        assert_eq!(doc.publication_date.as_deref(), Some("2019-04-02"));
    }

    #[test]
    fn fgdc_document_is_recognized() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "lands.xml", FGDC_DOC);
        let doc = MetadataDocument::load(&path).expect("load");
        assert_eq!(doc.format, MetadataFormat::Fgdc);
        assert_eq!(doc.title.as_deref(), Some("PT Lands (Active)"));
        assert_eq!(doc.publication_date.as_deref(), Some("20190402"));
    }

    #[test]
    fn unknown_root_is_invalid() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "bogus.xml", "<catalog><title>x</title></catalog>");
        let err = MetadataDocument::load(&path).expect_err("invalid root");
        assert!(matches!(err, MetadataError::Invalid { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = TempDir::new().expect("tmp");
        let err = MetadataDocument::load(&tmp.path().join("nope.xml")).expect_err("missing");
        assert!(matches!(err, MetadataError::MissingFile { .. }));
    }

    #[test]
    fn date_rewrite_updates_every_known_element() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "points_all.xml", ISO_DOC);
        let updated = set_publication_date(&path, date(2026, 8, 6)).expect("rewrite");
        assert!(updated);

        let doc = MetadataDocument::load(&path).expect("reload");
        assert_eq!(doc.publication_date.as_deref(), Some("2026-08-06"));
        let rewritten = fs::read_to_string(&path).expect("read");
        assert!(!rewritten.contains("2019-04-02"), "all date elements rewritten");
    }

    #[test]
    fn date_rewrite_backs_up_the_original() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "lands.xml", FGDC_DOC);
        set_publication_date(&path, date(2026, 8, 6)).expect("rewrite");

        let backup = backup_path(&path);
        assert!(backup.exists());
        let original = fs::read_to_string(&backup).expect("read backup");
        assert!(original.contains("20190402"), "backup keeps pre-mutation bytes");
        assert!(!tmp.path().join("lands.xml.ptsync.tmp").exists());
    }

    #[test]
    fn document_without_dates_is_left_untouched() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(
            &tmp,
            "bare.xml",
            "<metadata><idinfo><citation><citeinfo><title>t</title></citeinfo></citation></idinfo></metadata>",
        );
        let before = fs::read_to_string(&path).expect("read");
        let updated = set_publication_date(&path, date(2026, 8, 6)).expect("rewrite");
        assert!(!updated);
        assert_eq!(fs::read_to_string(&path).expect("read"), before);
        assert!(!backup_path(&path).exists(), "no backup without a mutation");
    }

    #[test]
    fn invalid_document_is_never_mutated() {
        let tmp = TempDir::new().expect("tmp");
        let path = write(&tmp, "bad.xml", "<catalog><pubdate>2019</pubdate></catalog>");
        let before = fs::read_to_string(&path).expect("read");
        set_publication_date(&path, date(2026, 8, 6)).expect_err("must fail validation");
        assert_eq!(fs::read_to_string(&path).expect("read"), before);
    }
}
