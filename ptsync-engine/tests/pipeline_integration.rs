//! End-to-end workflow runs over a seeded file-backed store.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::TempDir;

use ptsync_core::types::{FieldValue, Row};
use ptsync_engine::{FailureKind, Orchestrator, RetryPolicy};

const RUN_DATE: &str = "2026-08-06";

fn run_date() -> NaiveDate {
    RUN_DATE.parse().expect("run date")
}

fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.to_owned())
}

fn date(y: i32, m: u32, d: u32) -> FieldValue {
    FieldValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn row(pairs: &[(&str, FieldValue)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

fn write_dataset(root: &Path, name: &str, rows: &[Row]) {
    std::fs::write(
        root.join(format!("{name}.json")),
        serde_json::to_string_pretty(rows).expect("encode"),
    )
    .expect("seed dataset");
}

fn read_count(root: &Path, name: &str) -> usize {
    let contents =
        std::fs::read_to_string(root.join(format!("{name}.json"))).expect("dataset file");
    let rows: Vec<Row> = serde_json::from_str(&contents).expect("rows");
    rows.len()
}

/// Permit feature rows: `active` unexpired + `expired` expired rows with an
/// admissible status, plus `inactive` rows with a terminated status.
fn feature_rows(active: usize, expired: usize, inactive: usize) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut n = 0;
    for _ in 0..active {
        n += 1;
        rows.push(row(&[
            ("PERMIT_NUMBER", text(&format!("PT-{n:04}"))),
            ("STATUS_CODE", if n % 7 == 0 { FieldValue::Null } else { text("A") }),
            ("EXP_DATE", date(2027, 3, 1)),
            ("DATE_ISSUED", date(2025, 2, 1)),
            ("WATER_CODE", text("GW")),
            ("PURPOSE_CODE", text("IR")),
            ("SIC_CODE", text("0181")),
            ("SHAPE", text(&format!("{},{}", n % 13, n % 11))),
        ]));
    }
    for _ in 0..expired {
        n += 1;
        rows.push(row(&[
            ("PERMIT_NUMBER", text(&format!("PT-{n:04}"))),
            ("STATUS_CODE", text("E")),
            ("EXP_DATE", date(2020, 3, 1)),
            ("DATE_ISSUED", date(2019, 2, 1)),
            ("WATER_CODE", text("SW")),
            ("PURPOSE_CODE", text("IR")),
            ("SIC_CODE", text("0181")),
            ("SHAPE", text(&format!("{},{}", n % 13, n % 11))),
        ]));
    }
    for _ in 0..inactive {
        n += 1;
        rows.push(row(&[
            ("PERMIT_NUMBER", text(&format!("PT-{n:04}"))),
            ("STATUS_CODE", text("X")),
            ("EXP_DATE", date(2027, 3, 1)),
            ("DATE_ISSUED", date(2025, 2, 1)),
            ("WATER_CODE", text("GW")),
            ("PURPOSE_CODE", text("MU")),
            ("SIC_CODE", text("0181")),
            ("SHAPE", text(&format!("{},{}", n % 13, n % 11))),
        ]));
    }
    rows
}

fn permit_table_rows() -> Vec<Row> {
    let mut rows = Vec::new();
    for i in 0..30u32 {
        let entity = match i {
            0 | 1 => text("The Muppets"),
            2 => FieldValue::Null,
            _ => text(&format!("Entity {i}")),
        };
        let year = 2023 + (i % 3) as i32;
        rows.push(row(&[
            ("PERMIT_NUMBER", text(&format!("PT-{i:04}"))),
            ("ENTITY_NAME", entity),
            ("DATE_ISSUED", date(year, 5, 10)),
            ("PURPOSE", text(if i % 2 == 0 { "Irrigation" } else { "Mining" })),
            ("COUNTY", text(if i % 3 == 0 { "Caddo" } else { "Kay" })),
            ("TOTAL_ACRE_FEET", FieldValue::Real(f64::from(i) + 0.5)),
        ]));
    }
    rows
}

const METADATA_DOC: &str = "<metadata><idinfo><citeinfo><title>PT dataset</title><pubdate>20250101</pubdate></citeinfo></idinfo></metadata>";

struct Fixture {
    tmp: TempDir,
    settings_path: PathBuf,
}

impl Fixture {
    fn new(extra_parameters: &str) -> Fixture {
        let tmp = TempDir::new().expect("tmp");
        let root = tmp.path();

        for env in ["staging", "production", "replicated_production", "external_source"] {
            std::fs::create_dir_all(root.join(env)).expect("env root");
        }

        // Staging sources: 60 active + 20 expired admissible + 20 inactive
        // points, 24 + 6 + 10 lands.
        write_dataset(&root.join("staging"), "WR_PT_Points", &feature_rows(60, 20, 20));
        write_dataset(&root.join("staging"), "WR_PT_Lands", &feature_rows(24, 6, 10));

        write_dataset(
            &root.join("production"),
            "WR_LOOKUP_VALUES",
            &[
                row(&[("CODE_VALUE", text("GW")), ("DESCRIPTION", text("Groundwater"))]),
                row(&[("CODE_VALUE", text("SW")), ("DESCRIPTION", text("Surface Water"))]),
                row(&[("CODE_VALUE", text("IR")), ("DESCRIPTION", text("Irrigation"))]),
                row(&[("CODE_VALUE", text("MU")), ("DESCRIPTION", text("Municipal"))]),
            ],
        );
        write_dataset(
            &root.join("production"),
            "WR_STLEGAL",
            &[row(&[("PERMIT_NUMBER", text("PT-0001")), ("COUNTY", text("Caddo"))])],
        );
        write_dataset(
            &root.join("external_source"),
            "WR_STPERMIT",
            &permit_table_rows(),
        );

        let metadata_dir = root.join("metadata");
        std::fs::create_dir_all(&metadata_dir).expect("metadata dir");
        for name in [
            "WR_PT_Points_All.xml",
            "WR_PT_Points_Active.xml",
            "WR_PT_Points.xml",
            "WR_PT_Lands_All.xml",
            "WR_PT_Lands_Active.xml",
            "WR_PT_Lands.xml",
        ] {
            std::fs::write(metadata_dir.join(name), METADATA_DOC).expect("metadata doc");
        }

        let parameters = format!(
            r#"{{
    "redacted_entities": ["The Muppets", "Pat's Oil and Gas"]{extra}
  }}"#,
            extra = extra_parameters,
        );
        let settings = format!(
            r#"{{
  "connections": {{
    "staging": "{root}/staging",
    "production": "{root}/production",
    "replicated_production": "{root}/replicated_production",
    "external_source": "{root}/external_source"
  }},
  "paths": {{
    "archive_store": "{root}/work/PT_Temp.gdb",
    "archive_mirror": "{root}/mirror/WaterRights.gdb",
    "summary_tables_dir": "{root}/summaries",
    "public_download_dir": "{root}/public",
    "metadata_dir": "{root}/metadata",
    "report_dir": "{root}/reports"
  }},
  "parameters": {parameters}
}}"#,
            root = root.display(),
        );
        let settings_path = root.join("settings.json");
        std::fs::write(&settings_path, settings).expect("settings");

        Fixture { tmp, settings_path }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::initialize(&self.settings_path, run_date())
            .expect("initialize")
            .with_retry_policy(RetryPolicy::immediate())
    }

    fn env(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }
}

#[tokio::test]
async fn full_workflow_moves_data_through_every_environment() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();

    let ok = orchestrator.execute_full_workflow(&[]).await;
    for (key, outcome) in orchestrator.results() {
        assert!(outcome.success(), "{key} failed: {outcome:?}");
    }
    assert!(ok);

    // Phase 2: All = status-admissible rows, Active = unexpired subset.
    let staging = fixture.env("staging");
    assert_eq!(read_count(&staging, "WR_PT_Points_All"), 80);
    assert_eq!(read_count(&staging, "WR_PT_Points_Active"), 60);
    assert_eq!(read_count(&staging, "WR_PT_Lands_All"), 30);
    assert_eq!(read_count(&staging, "WR_PT_Lands_Active"), 24);
    assert_eq!(read_count(&staging, "WR_PT_Lands_Table"), 24);

    // Phase 3: both downstream environments carry the active views under
    // the base names.
    let production = fixture.env("production");
    let replicated = fixture.env("replicated_production");
    assert_eq!(read_count(&production, "WR_PT_Points"), 60);
    assert_eq!(read_count(&production, "WR_PT_Lands"), 24);
    assert_eq!(read_count(&replicated, "WR_PT_Points_All"), 80);
    assert_eq!(read_count(&replicated, "WR_PT_Lands_Table"), 24);

    // Phase 4: the archive holds the redacted permit table.
    let archive = fixture.tmp.path().join("work").join("PT_Temp.gdb");
    assert_eq!(read_count(&archive, "WR_STPERMIT"), 27);
    assert_eq!(read_count(&archive, "WR_PT_Points_All"), 80);

    // Phase 5: relationship descriptors exist.
    assert!(archive.join("ZRC_WR_STPERMIT_WR_PT_Lands_All.rel.json").exists());
    assert!(archive.join("ZRC_WR_STPERMIT_WR_PT_Points_All.rel.json").exists());

    // Phase 6: public files and one summary per distinct issue year.
    let public = fixture.tmp.path().join("public");
    assert!(public.join("WR_PT_Wells_and_Diversions_Points.shp").exists());
    assert!(public.join("WR_PT_Lands_Table.dbf").exists());
    let summaries = fixture.tmp.path().join("summaries");
    for year in [2023, 2024, 2025] {
        assert!(summaries.join(format!("WR_sum_PT_{year}.dbf")).exists());
    }

    // Phase 7: the mirror is a full archive copy, metadata landed as
    // sidecars, and publication dates were rewritten with backups.
    let mirror = fixture.tmp.path().join("mirror").join("WaterRights.gdb");
    assert_eq!(read_count(&mirror, "WR_STPERMIT"), 27);
    assert!(production.join("WR_PT_Points_All.metadata.xml").exists());
    assert!(fixture
        .env("metadata")
        .join("WR_PT_Points_All.xml.bak")
        .exists());

    // The execution report is persisted.
    let reports: Vec<_> = std::fs::read_dir(fixture.tmp.path().join("reports"))
        .expect("report dir")
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn rerunning_the_workflow_is_idempotent() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    assert!(orchestrator.execute_full_workflow(&[]).await);

    let production = fixture.env("production");
    let first_points = read_count(&production, "WR_PT_Points");
    let first_lands_table = read_count(&production, "WR_PT_Lands_Table");

    let mut replay = fixture.orchestrator();
    assert!(replay.execute_full_workflow(&[]).await);

    assert_eq!(read_count(&production, "WR_PT_Points"), first_points);
    assert_eq!(
        read_count(&production, "WR_PT_Lands_Table"),
        first_lands_table
    );
    assert_eq!(first_points, 60, "counts never double on replay");
}

#[tokio::test]
async fn skipped_phases_run_zero_operations() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();

    let ok = orchestrator.execute_full_workflow(&[3, 4, 5, 6, 7]).await;
    assert!(ok, "phase 2 alone succeeds");

    assert_eq!(orchestrator.results().len(), 1);
    assert!(orchestrator.results().contains_key("phase_2_staging_refresh"));

    // No replication target was ever created.
    assert!(!fixture.env("production").join("WR_PT_Points.json").exists());
    assert!(!fixture
        .env("replicated_production")
        .join("WR_PT_Points_All.json")
        .exists());
}

#[tokio::test]
async fn replication_with_missing_sources_attempts_no_partial_work() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();

    // Phase 2 never ran, so every replication source is absent.
    let ok = orchestrator.execute_phase_only(3).await;
    assert!(!ok);

    let outcome = &orchestrator.results()["phase_3_replication"];
    assert!(outcome.operations.is_empty(), "no unit was dispatched");
    assert_eq!(
        outcome.failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Precondition)
    );
    assert!(!fixture.env("production").join("WR_PT_Points_All.json").exists());
}

#[tokio::test]
async fn batch_failure_policy_controls_short_circuiting() {
    // abort_on_batch_failure = true: later batches never start.
    let fixture = Fixture::new(r#",
    "abort_on_batch_failure": true"#);
    let mut orchestrator = fixture.orchestrator();
    assert!(orchestrator.execute_phase_only(2).await);

    // Break the first replication environment wholesale.
    std::fs::remove_dir_all(fixture.env("replicated_production")).expect("break env");

    assert!(!orchestrator.execute_phase_only(3).await);
    let outcome = &orchestrator.results()["phase_3_replication"];
    assert_eq!(outcome.operations.len(), 3, "stopped after the first batch");
    assert!(!fixture
        .env("production")
        .join("WR_PT_Lands_Table.json")
        .exists());

    // abort_on_batch_failure = false: siblings and later batches still run.
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    assert!(orchestrator.execute_phase_only(2).await);
    std::fs::remove_dir_all(fixture.env("replicated_production")).expect("break env");

    assert!(!orchestrator.execute_phase_only(3).await);
    let outcome = &orchestrator.results()["phase_3_replication"];
    assert_eq!(outcome.operations.len(), 10, "every batch was attempted");
    assert!(fixture
        .env("production")
        .join("WR_PT_Lands_Table.json")
        .exists());
}

#[tokio::test]
async fn invalid_phase_number_fails_immediately() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    assert!(!orchestrator.execute_phase_only(1).await);
    assert!(!orchestrator.execute_phase_only(9).await);
    assert!(orchestrator.results().is_empty());
}

#[tokio::test]
async fn duplicate_locations_chain_after_relationships_in_phase_only_mode() {
    let fixture = Fixture::new("");
    let mut orchestrator = fixture.orchestrator();
    assert!(orchestrator.execute_full_workflow(&[]).await);

    // Re-invoke phase 5 in isolation: the duplicate table appears.
    assert!(orchestrator.execute_phase_only(5).await);
    let archive = fixture.tmp.path().join("work").join("PT_Temp.gdb");
    assert!(archive.join("WR_PT_Points_Identical.json").exists());
    assert!(archive
        .join("ZRC_WR_PT_Points_All_WR_PT_Points_Identical.rel.json")
        .exists());
}

#[tokio::test]
async fn dry_run_validates_without_mutating_anything() {
    let fixture = Fixture::new("");
    let orchestrator = fixture.orchestrator();

    assert!(orchestrator.dry_run().await);

    assert!(!fixture.env("staging").join("WR_PT_Points_All.json").exists());
    assert!(!fixture.tmp.path().join("work").join("PT_Temp.gdb").exists());
    let reports = std::fs::read_dir(fixture.tmp.path().join("reports"))
        .expect("report dir")
        .count();
    assert_eq!(reports, 0, "dry run writes no report");
}

#[tokio::test]
async fn initialization_fails_closed_on_missing_sources() {
    let fixture = Fixture::new("");
    std::fs::remove_file(fixture.env("staging").join("WR_PT_Points.json")).expect("rm");

    let err = Orchestrator::initialize(&fixture.settings_path, run_date())
        .expect_err("missing prerequisite");
    assert!(err.to_string().contains("WR_PT_Points"));
}
