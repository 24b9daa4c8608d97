//! File-backed reference implementation of [`GeoStore`].
//!
//! # Storage layout
//!
//! ```text
//! <environment root>/              (one directory per connection target)
//!   WR_PT_Points.json              (dataset: a JSON array of attribute rows)
//!   WR_PT_Points.metadata.xml      (imported metadata sidecar)
//!   ZRC_….rel.json                 (relationship class descriptor)
//! <archive>.gdb/                   (file containers are plain directories)
//! ```
//!
//! Writes go through a temp file and an atomic rename. Store roots are
//! resolved per call from explicit [`StoreId`]s; concurrent workers never
//! share mutable connection state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ptsync_core::config::Connections;
use ptsync_core::types::{
    fields, DatasetRef, Environment, FieldValue, RelationshipSpec, Row, RowFilter, SchemaMode,
    StoreId, StoreStatus,
};
use ptsync_metadata::{MetadataDocument, MetadataError, MetadataStore};

use crate::error::{io_err, missing, StoreError};
use crate::GeoStore;

/// File-backed store over the configured environment roots.
#[derive(Debug, Clone)]
pub struct FileGeoStore {
    roots: HashMap<Environment, PathBuf>,
}

impl FileGeoStore {
    pub fn new(connections: &Connections) -> Self {
        let roots = Environment::all()
            .into_iter()
            .map(|env| (env, connections.root(env).to_path_buf()))
            .collect();
        Self { roots }
    }

    /// Build a store over explicit roots (tests).
    pub fn with_roots(roots: HashMap<Environment, PathBuf>) -> Self {
        Self { roots }
    }

    fn store_root(&self, store: &StoreId) -> Result<PathBuf, StoreError> {
        match store {
            StoreId::Env(env) => self
                .roots
                .get(env)
                .cloned()
                .ok_or_else(|| StoreError::Backend {
                    reason: format!("no connection root configured for {env}"),
                }),
            StoreId::File(path) => Ok(path.clone()),
        }
    }

    fn dataset_path(&self, dataset: &DatasetRef) -> Result<PathBuf, StoreError> {
        Ok(self
            .store_root(&dataset.store)?
            .join(format!("{}.json", dataset.name)))
    }

    fn read_rows(&self, dataset: &DatasetRef) -> Result<Vec<Row>, StoreError> {
        let path = self.dataset_path(dataset)?;
        if !path.exists() {
            return Err(missing(dataset));
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| StoreError::Data {
            path,
            reason: e.to_string(),
        })
    }

    fn write_rows(&self, dataset: &DatasetRef, rows: &[Row]) -> Result<(), StoreError> {
        let root = self.store_root(&dataset.store)?;
        if !root.is_dir() {
            return Err(StoreError::MissingContainer { path: root });
        }
        let path = self.dataset_path(dataset)?;
        let contents = serde_json::to_string_pretty(rows).map_err(|e| StoreError::Backend {
            reason: format!("failed to encode {dataset}: {e}"),
        })?;

        let tmp = PathBuf::from(format!("{}.ptsync.tmp", path.display()));
        std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    fn write_rows_at(&self, path: &Path, rows: &[Row]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let contents = serde_json::to_string_pretty(rows).map_err(|e| StoreError::Backend {
            reason: format!("failed to encode rows for {}: {e}", path.display()),
        })?;
        std::fs::write(path, contents).map_err(|e| io_err(path, e))
    }
}

/// Union of field names across all rows (empty datasets have no schema).
fn field_set(rows: &[Row]) -> std::collections::BTreeSet<String> {
    rows.iter().flat_map(|r| r.keys().cloned()).collect()
}

fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

impl GeoStore for FileGeoStore {
    fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, StoreError> {
        Ok(self.dataset_path(dataset)?.exists())
    }

    fn row_count(&self, dataset: &DatasetRef) -> Result<u64, StoreError> {
        Ok(self.read_rows(dataset)?.len() as u64)
    }

    fn export_rows(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        filter: Option<&RowFilter>,
    ) -> Result<u64, StoreError> {
        let rows = self.read_rows(source)?;
        let exported: Vec<Row> = match filter {
            Some(f) => rows.into_iter().filter(|r| f.matches(r)).collect(),
            None => rows,
        };
        self.write_rows(target, &exported)?;
        tracing::debug!(
            source = %source,
            target = %target,
            rows = exported.len(),
            "exported rows"
        );
        Ok(exported.len() as u64)
    }

    fn truncate(&self, dataset: &DatasetRef) -> Result<(), StoreError> {
        let before = self.read_rows(dataset)?.len();
        self.write_rows(dataset, &[])?;
        tracing::debug!(dataset = %dataset, rows = before, "truncated");
        Ok(())
    }

    fn append_rows(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        mode: SchemaMode,
    ) -> Result<u64, StoreError> {
        let source_rows = self.read_rows(source)?;
        let mut target_rows = self.read_rows(target)?;

        if mode == SchemaMode::Checked && !target_rows.is_empty() && !source_rows.is_empty() {
            let src_fields = field_set(&source_rows);
            let tgt_fields = field_set(&target_rows);
            if src_fields != tgt_fields {
                return Err(StoreError::Data {
                    path: self.dataset_path(target)?,
                    reason: format!(
                        "schema mismatch appending {source} into {target}: {src_fields:?} vs {tgt_fields:?}"
                    ),
                });
            }
        }

        let appended = source_rows.len() as u64;
        target_rows.extend(source_rows);
        self.write_rows(target, &target_rows)?;
        Ok(appended)
    }

    fn create_container(&self, container: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(container).map_err(|e| io_err(container, e))
    }

    fn delete_container(&self, container: &Path) -> Result<(), StoreError> {
        if container.exists() {
            std::fs::remove_dir_all(container).map_err(|e| io_err(container, e))?;
        }
        Ok(())
    }

    fn copy_container(&self, source: &Path, target: &Path) -> Result<(), StoreError> {
        if !source.is_dir() {
            return Err(StoreError::MissingContainer {
                path: source.to_path_buf(),
            });
        }
        copy_dir_recursive(source, target).map_err(|e| io_err(target, e))
    }

    fn rewrite_lookup_field(
        &self,
        dataset: &DatasetRef,
        field: &str,
        lookup: &DatasetRef,
    ) -> Result<u64, StoreError> {
        let lookup_rows = self.read_rows(lookup)?;
        let mapping: HashMap<&str, &str> = lookup_rows
            .iter()
            .filter_map(|r| {
                let code = r.get(fields::CODE_VALUE)?.as_text()?;
                let desc = r.get(fields::DESCRIPTION)?.as_text()?;
                Some((code, desc))
            })
            .collect();

        let mut rows = self.read_rows(dataset)?;
        let mut rewritten = 0u64;
        for row in &mut rows {
            let replacement = row
                .get(field)
                .and_then(FieldValue::as_text)
                .and_then(|code| mapping.get(code))
                .map(|desc| FieldValue::Text((*desc).to_owned()));
            if let Some(value) = replacement {
                row.insert(field.to_owned(), value);
                rewritten += 1;
            }
        }
        self.write_rows(dataset, &rows)?;
        tracing::debug!(dataset = %dataset, field, rewritten, "lookup rewrite");
        Ok(rewritten)
    }

    fn add_year_field(&self, dataset: &DatasetRef) -> Result<u64, StoreError> {
        let mut rows = self.read_rows(dataset)?;
        let mut derived = 0u64;
        for row in &mut rows {
            let year = row
                .get(fields::DATE_ISSUED)
                .and_then(FieldValue::as_date)
                .map(|d| chrono::Datelike::year(&d));
            if let Some(year) = year {
                row.insert(fields::YEAR_ISSUED.to_owned(), FieldValue::Int(i64::from(year)));
                derived += 1;
            }
        }
        self.write_rows(dataset, &rows)?;
        Ok(derived)
    }

    fn distinct_years(&self, dataset: &DatasetRef) -> Result<Vec<i32>, StoreError> {
        let rows = self.read_rows(dataset)?;
        let mut years: Vec<i32> = rows
            .iter()
            .filter_map(|r| r.get(fields::YEAR_ISSUED))
            .filter_map(FieldValue::as_int)
            .map(|y| y as i32)
            .collect();
        years.sort_unstable();
        years.dedup();
        Ok(years)
    }

    fn find_identical(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        filter: &RowFilter,
    ) -> Result<u64, StoreError> {
        let rows = self.read_rows(source)?;

        // Group candidate rows (1-based feature ids) by SHAPE value.
        let mut groups: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            if !filter.matches(row) {
                continue;
            }
            if let Some(shape) = row.get(fields::SHAPE).and_then(FieldValue::as_text) {
                groups.entry(shape.to_owned()).or_default().push(index as i64 + 1);
            }
        }

        let mut out = Vec::new();
        let mut feat_seq = 0i64;
        for (shape, members) in groups {
            if members.len() < 2 {
                continue;
            }
            feat_seq += 1;
            for fid in members {
                let mut row = Row::new();
                row.insert(
                    fields::OBJECT_ID.to_owned(),
                    FieldValue::Int(out.len() as i64 + 1),
                );
                row.insert(fields::IN_FID.to_owned(), FieldValue::Int(fid));
                row.insert("FEAT_SEQ".to_owned(), FieldValue::Int(feat_seq));
                row.insert(fields::SHAPE.to_owned(), FieldValue::Text(shape.clone()));
                out.push(row);
            }
        }

        self.write_rows(target, &out)?;
        Ok(out.len() as u64)
    }

    fn create_relationship(&self, spec: &RelationshipSpec) -> Result<(), StoreError> {
        for dataset in [&spec.origin, &spec.destination] {
            if !self.dataset_exists(dataset)? {
                return Err(missing(dataset));
            }
        }
        let root = self.store_root(&spec.origin.store)?;
        let path = root.join(format!("{}.rel.json", spec.name));
        let contents = serde_json::to_string_pretty(spec).map_err(|e| StoreError::Backend {
            reason: format!("failed to encode relationship {}: {e}", spec.name),
        })?;
        std::fs::write(&path, contents).map_err(|e| io_err(&path, e))?;
        tracing::info!(relationship = %spec.name, "created relationship class");
        Ok(())
    }

    fn export_interchange(&self, source: &DatasetRef, path: &Path) -> Result<u64, StoreError> {
        let rows = self.read_rows(source)?;
        self.write_rows_at(path, &rows)?;
        Ok(rows.len() as u64)
    }

    fn export_table_file(&self, source: &DatasetRef, path: &Path) -> Result<u64, StoreError> {
        let rows = self.read_rows(source)?;
        self.write_rows_at(path, &rows)?;
        Ok(rows.len() as u64)
    }

    fn write_summary_table(
        &self,
        source: &DatasetRef,
        path: &Path,
        year: i32,
    ) -> Result<u64, StoreError> {
        let rows = self.read_rows(source)?;
        let filter = RowFilter::YearEquals { year };

        // (purpose, county) → (permit count, acre-feet total)
        let mut groups: BTreeMap<(String, String), (i64, f64)> = BTreeMap::new();
        for row in rows.iter().filter(|r| filter.matches(r)) {
            let purpose = row
                .get(fields::PURPOSE)
                .and_then(FieldValue::as_text)
                .unwrap_or_default()
                .to_owned();
            let county = row
                .get(fields::COUNTY)
                .and_then(FieldValue::as_text)
                .unwrap_or_default()
                .to_owned();
            let acre_feet = row
                .get(fields::TOTAL_ACRE_FEET)
                .and_then(FieldValue::as_real)
                .unwrap_or(0.0);
            let entry = groups.entry((purpose, county)).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += acre_feet;
        }

        let out: Vec<Row> = groups
            .into_iter()
            .map(|((purpose, county), (count, total))| {
                let mut row = Row::new();
                row.insert(fields::YEAR_ISSUED.to_owned(), FieldValue::Int(i64::from(year)));
                row.insert(fields::PURPOSE.to_owned(), FieldValue::Text(purpose));
                row.insert(fields::COUNTY.to_owned(), FieldValue::Text(county));
                row.insert("FREQUENCY".to_owned(), FieldValue::Int(count));
                row.insert("SUM_TOTAL_ACRE_FEET".to_owned(), FieldValue::Real(total));
                row
            })
            .collect();

        self.write_rows_at(path, &out)?;
        Ok(out.len() as u64)
    }

    fn verify_store(&self, store: &StoreId) -> StoreStatus {
        let root = match self.store_root(store) {
            Ok(root) => root,
            Err(err) => {
                return StoreStatus {
                    store: store.to_string(),
                    connected: false,
                    detail: err.to_string(),
                }
            }
        };
        if !root.is_dir() {
            return StoreStatus {
                store: store.to_string(),
                connected: false,
                detail: format!("root does not exist: {}", root.display()),
            };
        }
        let datasets = std::fs::read_dir(&root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.path().extension().and_then(|x| x.to_str()) == Some("json")
                            && !e
                                .path()
                                .to_string_lossy()
                                .ends_with(".rel.json")
                    })
                    .count()
            })
            .unwrap_or(0);
        StoreStatus {
            store: store.to_string(),
            connected: true,
            detail: format!("{} ({datasets} datasets)", root.display()),
        }
    }
}

impl MetadataStore for FileGeoStore {
    /// Validate, then attach the document as a sidecar of the dataset file.
    fn import_document(&self, dataset: &DatasetRef, document: &Path) -> Result<(), MetadataError> {
        MetadataDocument::load(document)?;

        let exists = self
            .dataset_exists(dataset)
            .map_err(|e| MetadataError::Import {
                target: dataset.to_string(),
                reason: e.to_string(),
            })?;
        if !exists {
            return Err(MetadataError::Import {
                target: dataset.to_string(),
                reason: "target dataset does not exist".into(),
            });
        }

        let root = self
            .store_root(&dataset.store)
            .map_err(|e| MetadataError::Import {
                target: dataset.to_string(),
                reason: e.to_string(),
            })?;
        let sidecar = root.join(format!("{}.metadata.xml", dataset.name));
        std::fs::copy(document, &sidecar).map_err(|e| MetadataError::Io {
            path: sidecar.clone(),
            source: e,
        })?;
        tracing::info!(dataset = %dataset, document = %document.display(), "imported metadata");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
