//! Configuration-derived dataset references and the fixed operation lists
//! each phase runs over.
//!
//! A plan is constructed fresh per run; it has no persisted identity.

use std::path::PathBuf;

use ptsync_core::types::{fields, DatasetRef, Environment, RelationshipSpec, RowFilter};
use ptsync_core::Settings;
use ptsync_metadata::MetadataCatalog;

use crate::ops::SyncOperation;

/// Canonical dataset names.
pub mod datasets {
    pub const PT_POINTS: &str = "WR_PT_Points";
    pub const PT_LANDS: &str = "WR_PT_Lands";
    pub const PT_POINTS_WORKING: &str = "WR_PT_Points_TMP_Legal";
    pub const PT_LANDS_WORKING: &str = "WR_PT_Lands_TMP_Legal";
    pub const PT_POINTS_ALL: &str = "WR_PT_Points_All";
    pub const PT_POINTS_ACTIVE: &str = "WR_PT_Points_Active";
    pub const PT_LANDS_ALL: &str = "WR_PT_Lands_All";
    pub const PT_LANDS_ACTIVE: &str = "WR_PT_Lands_Active";
    pub const PT_LANDS_TABLE: &str = "WR_PT_Lands_Table";
    pub const PERMITS: &str = "WR_STPERMIT";
    pub const PERMITS_STAGED: &str = "D_WR_STPERMIT";
    pub const LEGALS: &str = "WR_STLEGAL";
    pub const LEGALS_STAGED: &str = "D_WR_STLEGAL";
    pub const LOOKUP_VALUES: &str = "WR_LOOKUP_VALUES";
    pub const POINTS_IDENTICAL: &str = "WR_PT_Points_Identical";
    pub const REL_PERMITS_LANDS_ALL: &str = "ZRC_WR_STPERMIT_WR_PT_Lands_All";
    pub const REL_PERMITS_POINTS_ALL: &str = "ZRC_WR_STPERMIT_WR_PT_Points_All";
    pub const REL_POINTS_IDENTICAL: &str = "ZRC_WR_PT_Points_All_WR_PT_Points_Identical";
    pub const PUBLIC_POINTS_FILE: &str = "WR_PT_Wells_and_Diversions_Points.shp";
    pub const PUBLIC_LANDS_FILE: &str = "WR_PT_Lands_Table.dbf";
}

/// The lookup-rewritten code fields, in rewrite order.
pub const LOOKUP_FIELDS: [&str; 3] = [fields::WATER_CODE, fields::PURPOSE_CODE, fields::SIC_CODE];

/// Parameters of one feature-refresh sub-pipeline (points or lands).
#[derive(Debug, Clone)]
pub struct RefreshSpec {
    pub label: &'static str,
    pub source: DatasetRef,
    pub working: DatasetRef,
    pub all_view: DatasetRef,
    pub active_view: DatasetRef,
}

/// All dataset references and operation lists for one run.
#[derive(Debug, Clone)]
pub struct DatasetPlan {
    pub archive: PathBuf,
    pub mirror: PathBuf,
    pub public_download_dir: PathBuf,
    pub summary_tables_dir: PathBuf,
}

impl DatasetPlan {
    pub fn new(settings: &Settings) -> Self {
        Self {
            archive: settings.paths.archive_store.clone(),
            mirror: settings.paths.archive_mirror.clone(),
            public_download_dir: settings.paths.public_download_dir.clone(),
            summary_tables_dir: settings.paths.summary_tables_dir.clone(),
        }
    }

    pub fn staging(&self, name: &str) -> DatasetRef {
        DatasetRef::new(Environment::Staging, name)
    }

    pub fn production(&self, name: &str) -> DatasetRef {
        DatasetRef::new(Environment::Production, name)
    }

    pub fn replicated(&self, name: &str) -> DatasetRef {
        DatasetRef::new(Environment::ReplicatedProduction, name)
    }

    pub fn external(&self, name: &str) -> DatasetRef {
        DatasetRef::new(Environment::ExternalSource, name)
    }

    pub fn archived(&self, name: &str) -> DatasetRef {
        DatasetRef::in_container(&self.archive, name)
    }

    /// The shared code lookup table.
    pub fn lookup_table(&self) -> DatasetRef {
        self.production(datasets::LOOKUP_VALUES)
    }

    /// Phase 2, sub-pipeline (a): raw source pulls into staging.
    pub fn raw_source_exports(&self) -> Vec<SyncOperation> {
        vec![
            SyncOperation::replace(
                self.external(datasets::PERMITS),
                self.staging(datasets::PERMITS_STAGED),
                None,
            ),
            SyncOperation::replace(
                self.production(datasets::LEGALS),
                self.staging(datasets::LEGALS_STAGED),
                None,
            ),
        ]
    }

    pub fn points_refresh(&self) -> RefreshSpec {
        RefreshSpec {
            label: "points_refresh",
            source: self.staging(datasets::PT_POINTS),
            working: self.staging(datasets::PT_POINTS_WORKING),
            all_view: self.staging(datasets::PT_POINTS_ALL),
            active_view: self.staging(datasets::PT_POINTS_ACTIVE),
        }
    }

    pub fn lands_refresh(&self) -> RefreshSpec {
        RefreshSpec {
            label: "lands_refresh",
            source: self.staging(datasets::PT_LANDS),
            working: self.staging(datasets::PT_LANDS_WORKING),
            all_view: self.staging(datasets::PT_LANDS_ALL),
            active_view: self.staging(datasets::PT_LANDS_ACTIVE),
        }
    }

    /// Phase 2 closing step: rebuild the lands table from the active view.
    pub fn lands_table_rebuild(&self) -> SyncOperation {
        SyncOperation::refresh(
            self.staging(datasets::PT_LANDS_ACTIVE),
            self.staging(datasets::PT_LANDS_TABLE),
        )
    }

    /// Phase 3: the fixed staging→downstream replication pairs, in batch
    /// order (replicated-production first, then production).
    pub fn replication_pairs(&self) -> Vec<SyncOperation> {
        let pairs: [(&str, &str); 5] = [
            (datasets::PT_LANDS_TABLE, datasets::PT_LANDS_TABLE),
            (datasets::PT_LANDS_ALL, datasets::PT_LANDS_ALL),
            (datasets::PT_LANDS_ACTIVE, datasets::PT_LANDS),
            (datasets::PT_POINTS_ALL, datasets::PT_POINTS_ALL),
            (datasets::PT_POINTS_ACTIVE, datasets::PT_POINTS),
        ];

        let mut ops = Vec::with_capacity(pairs.len() * 2);
        for (source, target) in pairs {
            ops.push(SyncOperation::refresh(
                self.staging(source),
                self.replicated(target),
            ));
        }
        for (source, target) in pairs {
            ops.push(SyncOperation::refresh(
                self.staging(source),
                self.production(target),
            ));
        }
        ops
    }

    /// Phase 4: exports into the archive container. The permit export
    /// carries the entity redaction filter.
    pub fn archive_exports(&self, redacted_entities: &[String]) -> Vec<SyncOperation> {
        vec![
            SyncOperation::replace(
                self.production(datasets::PT_LANDS_TABLE),
                self.archived(datasets::PT_LANDS_TABLE),
                None,
            ),
            SyncOperation::replace(
                self.staging(datasets::PERMITS_STAGED),
                self.archived(datasets::PERMITS),
                Some(RowFilter::ExcludeEntities {
                    names: redacted_entities.to_vec(),
                }),
            ),
            SyncOperation::replace(
                self.production(datasets::PT_LANDS_ALL),
                self.archived(datasets::PT_LANDS_ALL),
                None,
            ),
            SyncOperation::replace(
                self.production(datasets::PT_LANDS),
                self.archived(datasets::PT_LANDS),
                None,
            ),
            SyncOperation::replace(
                self.production(datasets::PT_POINTS_ALL),
                self.archived(datasets::PT_POINTS_ALL),
                None,
            ),
            SyncOperation::replace(
                self.production(datasets::PT_POINTS),
                self.archived(datasets::PT_POINTS),
                None,
            ),
        ]
    }

    /// Phase 5: the permit relationship classes over the archive.
    pub fn permit_relationships(&self) -> Vec<RelationshipSpec> {
        vec![
            RelationshipSpec {
                origin: self.archived(datasets::PERMITS),
                destination: self.archived(datasets::PT_LANDS_ALL),
                name: datasets::REL_PERMITS_LANDS_ALL.into(),
                origin_key: fields::PERMIT_NUMBER.into(),
                destination_key: fields::PERMIT_NUMBER.into(),
            },
            RelationshipSpec {
                origin: self.archived(datasets::PERMITS),
                destination: self.archived(datasets::PT_POINTS_ALL),
                name: datasets::REL_PERMITS_POINTS_ALL.into(),
                origin_key: fields::PERMIT_NUMBER.into(),
                destination_key: fields::PERMIT_NUMBER.into(),
            },
        ]
    }

    /// Phase 5 (separately invocable): duplicate-location relationship.
    pub fn identical_points_relationship(&self) -> RelationshipSpec {
        RelationshipSpec {
            origin: self.archived(datasets::PT_POINTS_ALL),
            destination: self.archived(datasets::POINTS_IDENTICAL),
            name: datasets::REL_POINTS_IDENTICAL.into(),
            origin_key: fields::OBJECT_ID.into(),
            destination_key: fields::IN_FID.into(),
        }
    }

    /// Phase 7: dataset→metadata-role mapping across all three database
    /// environments. Downstream environments publish the active views under
    /// the base names.
    pub fn metadata_mappings(&self, catalog: &MetadataCatalog) -> Vec<(DatasetRef, PathBuf)> {
        let roles: [(&str, &str); 4] = [
            (datasets::PT_POINTS_ALL, "points_all"),
            (datasets::PT_POINTS_ACTIVE, "points_active"),
            (datasets::PT_LANDS_ALL, "lands_all"),
            (datasets::PT_LANDS_ACTIVE, "lands_active"),
        ];
        let downstream_roles: [(&str, &str); 4] = [
            (datasets::PT_POINTS_ALL, "points_all"),
            (datasets::PT_POINTS, "points_active"),
            (datasets::PT_LANDS_ALL, "lands_all"),
            (datasets::PT_LANDS, "lands_active"),
        ];

        let mut mappings = Vec::new();
        for (name, role) in roles {
            if let Some(doc) = catalog.document_path(role) {
                mappings.push((self.staging(name), doc));
            }
        }
        for (name, role) in downstream_roles {
            if let Some(doc) = catalog.document_path(role) {
                mappings.push((self.production(name), doc));
            }
        }
        for (name, role) in downstream_roles {
            if let Some(doc) = catalog.document_path(role) {
                mappings.push((self.replicated(name), doc));
            }
        }
        mappings
    }

    /// Datasets that must exist before any phase runs.
    pub fn required_sources(&self) -> Vec<DatasetRef> {
        vec![
            self.staging(datasets::PT_POINTS),
            self.staging(datasets::PT_LANDS),
            self.production(datasets::LOOKUP_VALUES),
            self.production(datasets::LEGALS),
            self.external(datasets::PERMITS),
        ]
    }

    /// Datasets whose record counts appear in reports and dry runs.
    pub fn monitored_datasets(&self) -> Vec<(String, DatasetRef)> {
        vec![
            ("staging_pt_points".into(), self.staging(datasets::PT_POINTS)),
            ("staging_pt_lands".into(), self.staging(datasets::PT_LANDS)),
            (
                "production_pt_points".into(),
                self.production(datasets::PT_POINTS),
            ),
            (
                "production_pt_lands".into(),
                self.production(datasets::PT_LANDS),
            ),
            ("external_permits".into(), self.external(datasets::PERMITS)),
        ]
    }

    /// Public download file paths.
    pub fn public_points_file(&self) -> PathBuf {
        self.public_download_dir.join(datasets::PUBLIC_POINTS_FILE)
    }

    pub fn public_lands_file(&self) -> PathBuf {
        self.public_download_dir.join(datasets::PUBLIC_LANDS_FILE)
    }

    pub fn summary_table_file(&self, year: i32) -> PathBuf {
        self.summary_tables_dir
            .join(format!("WR_sum_PT_{year}.dbf"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
