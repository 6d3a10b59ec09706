//! End-to-end export runs against a paged repository and the memory store.

mod common;

use chrono::NaiveDate;
use oai_harvest::export::{ExportConfig, ExportOutcome, ExportRequest, Exporter};
use oai_harvest::job::{run_job, JobDescriptor};
use oai_harvest::oai::{MetadataFormat, OaiClient};
use oai_harvest::snapshot::{MemoryStore, SnapshotStore, XML_CONTENT_TYPE};
use tempfile::TempDir;

use common::{identifiers, records, unbound_prefixes, FakeRecord, PagedRepository};

fn config(work: &TempDir, day: u32) -> ExportConfig {
    ExportConfig {
        work_root: work.path().to_path_buf(),
        date: NaiveDate::from_ymd_opt(2016, 3, day),
        ..ExportConfig::default()
    }
}

fn exporter(
    repo: PagedRepository,
    store: &SnapshotStore<MemoryStore>,
    config: ExportConfig,
) -> Exporter<PagedRepository, MemoryStore> {
    Exporter::new(OaiClient::new(repo, MetadataFormat::MarcXml), store.clone(), config).unwrap()
}

fn published(outcome: &ExportOutcome) -> (&str, &str, u64) {
    match outcome {
        ExportOutcome::Published { key, url, size, .. } => (key, url, *size),
        other => panic!("expected a published export, got {other:?}"),
    }
}

fn text(store: &SnapshotStore<MemoryStore>, key: &str) -> String {
    String::from_utf8(store.backend().get(key).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_export_publishes_wrapped_artifact() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    let repo = PagedRepository::new().with_set("sb", records("sb", 0..1200, None));
    let exporter = exporter(repo, &store, config(&work, 1));

    let outcome = exporter.export(&ExportRequest::full("sb")).await.unwrap();
    let (key, url, size) = published(&outcome);

    assert_eq!(key, "ch.nb.sb/records.xml");
    assert!(url.ends_with("ch.nb.sb/records.xml"));

    let body = text(&store, key);
    assert_eq!(size, body.len() as u64);
    assert!(body.starts_with("<records>"));
    assert!(body.trim_end().ends_with("</records>"));
    assert_eq!(body.matches("<records>").count(), 1);
    assert_eq!(identifiers(&body).len(), 1200);
    assert_eq!(identifiers(&body)[0], "sb-0");
    assert_eq!(identifiers(&body)[1199], "sb-1199");

    let stats = outcome.stats();
    assert_eq!(stats.fetched, 1200);
    assert_eq!(stats.accepted, 1200);
    assert_eq!(stats.segments_written, 3);

    // Full mode publishes only the artifact.
    assert_eq!(store.backend().keys(), vec!["ch.nb.sb/records.xml".to_string()]);

    let metadata = store.backend().metadata(key).unwrap();
    assert_eq!(metadata.content_type, XML_CONTENT_TYPE);
    assert_eq!(metadata.content_disposition, "attachment; filename=\"records.xml\"");

    // 12 pages of 100 records.
    assert_eq!(exporter.client().transport().requests().len(), 12);
}

#[tokio::test]
async fn test_incremental_runs_accumulate_baseline() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");

    // Each run sees only the base set's new records; some belong elsewhere.
    let runs = [(0..500, 1), (500..800, 2), (800..850, 3)];
    let mut last = None;
    for (range, day) in runs {
        let mut base = records("sb", range.clone(), Some("sb"));
        base.extend(records("other", range.start..range.start + 20, Some("other")));
        let repo = PagedRepository::new().with_set("NewBib", base);
        let exporter = exporter(repo, &store, config(&work, day));
        last = Some(exporter.export(&ExportRequest::incremental("sb")).await.unwrap());
    }

    let outcome = last.unwrap();
    let (key, _, _) = published(&outcome);
    assert_eq!(key, "ch.nb.sb/records.xml");

    let ids = identifiers(&text(&store, key));
    assert_eq!(ids.len(), 850);
    assert_eq!(ids[0], "sb-0");
    assert_eq!(ids[849], "sb-849");
    assert!(ids.iter().all(|id| id.starts_with("sb-")));
    assert_eq!(outcome.stats().baseline_segments, 2);
    assert_eq!(outcome.stats().filtered, 20);

    let segments: Vec<String> = store
        .backend()
        .keys()
        .into_iter()
        .filter(|k| k.ends_with(".xml_part"))
        .collect();
    assert_eq!(
        segments,
        vec![
            "ch.nb.sb/sb_500_2016-03-01.xml_part".to_string(),
            "ch.nb.sb/sb_800_2016-03-02.xml_part".to_string(),
            "ch.nb.sb/sb_850_2016-03-03.xml_part".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_limit_returns_checkpoint_without_publishing() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    let repo = PagedRepository::new().with_set("sb", records("sb", 0..1200, None));
    let exporter = exporter(repo, &store, config(&work, 1));

    let outcome = exporter
        .export(&ExportRequest::full("sb").with_limit(700))
        .await
        .unwrap();

    let ExportOutcome::Checkpoint {
        segments,
        work_dir,
        next_count,
        stats,
    } = outcome
    else {
        panic!("expected a checkpoint");
    };
    assert_eq!(stats.accepted, 700);
    assert_eq!(next_count, 700);
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(|p| p.starts_with(&work_dir)));
    assert!(store.backend().keys().is_empty());

    let sizes: Vec<usize> = segments
        .iter()
        .map(|p| identifiers(&std::fs::read_to_string(p).unwrap()).len())
        .collect();
    assert_eq!(sizes, vec![500, 200]);
}

#[tokio::test]
async fn test_resume_continues_where_checkpoint_stopped() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    let repo = PagedRepository::new().with_set("sb", records("sb", 0..1200, None));
    let exporter = exporter(repo, &store, config(&work, 1));

    let first = exporter
        .export(&ExportRequest::full("sb").with_limit(300))
        .await
        .unwrap();
    let ExportOutcome::Checkpoint { segments, .. } = &first else {
        panic!("expected a checkpoint");
    };
    let head: Vec<String> = segments
        .iter()
        .flat_map(|p| identifiers(&std::fs::read_to_string(p).unwrap()))
        .collect();

    let second = exporter.resume_export("sb", false, 300, None).await.unwrap();
    let (key, _, _) = published(&second);
    let tail = identifiers(&text(&store, key));

    assert_eq!(head.len(), 300);
    assert_eq!(tail.len(), 900);
    assert!(head.iter().all(|id| !tail.contains(id)));
    assert_eq!(tail[0], "sb-300");

    let requests = exporter.client().transport().requests();
    assert!(requests.iter().any(|r| matches!(
        r,
        oai_harvest::oai::ListRequest::Resume { token } if token == "sb|marcxml|300||"
    )));
}

fn checkpoint_ids(outcome: &ExportOutcome) -> (Vec<String>, u64) {
    let ExportOutcome::Checkpoint {
        segments,
        next_count,
        ..
    } = outcome
    else {
        panic!("expected a checkpoint, got {outcome:?}");
    };
    let ids = segments
        .iter()
        .flat_map(|p| identifiers(&std::fs::read_to_string(p).unwrap()))
        .collect();
    (ids, *next_count)
}

#[tokio::test]
async fn test_limited_filtered_resumes_chain_without_overlap() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");

    // sb-0, other-0, sb-1, other-1, gone, sb-2, other-2, ...
    let mut base = Vec::new();
    for n in 0..30 {
        base.extend(records("sb", n..n + 1, Some("sb")));
        base.extend(records("other", n..n + 1, Some("other")));
    }
    base.insert(
        4,
        FakeRecord {
            identifier: "gone".to_string(),
            set_tag: None,
            deleted: true,
        },
    );
    let repo = PagedRepository::new().with_set("NewBib", base);
    let exporter = exporter(repo, &store, config(&work, 1));

    let first = exporter.resume_export("sb", true, 0, Some(10)).await.unwrap();
    let (head, next) = checkpoint_ids(&first);
    assert_eq!(next, 20);
    assert_eq!(first.stats().filtered, 9);

    let second = exporter.resume_export("sb", true, next, Some(10)).await.unwrap();
    let (tail, next) = checkpoint_ids(&second);
    assert_eq!(next, 40);

    let expected: Vec<String> = (0..20).map(|n| format!("sb-{n}")).collect();
    let mut chained = head;
    chained.extend(tail);
    assert_eq!(chained, expected);
}

#[tokio::test]
async fn test_incremental_baseline_ignores_non_segment_objects() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    store.backend().insert(
        "ch.nb.sb/sb_5_2016-02-01.xml_part",
        r#"<record>
<marc:record xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:controlfield tag="001">old-1</marc:controlfield></marc:record>
</record>
"#,
    );
    store
        .backend()
        .insert("ch.nb.sb/meta.xls", b"PK\x03\x04BINARY-XLS".to_vec());

    let repo = PagedRepository::new().with_set("NewBib", records("sb", 0..3, Some("sb")));
    let exporter = exporter(repo, &store, config(&work, 1));

    let outcome = exporter.export(&ExportRequest::incremental("sb")).await.unwrap();
    let (key, _, _) = published(&outcome);
    let body = text(&store, key);

    assert!(!body.contains("BINARY-XLS"));
    assert_eq!(identifiers(&body), vec!["old-1", "sb-0", "sb-1", "sb-2"]);
    assert_eq!(outcome.stats().baseline_segments, 1);
    assert!(store.backend().get("ch.nb.sb/sb_8_2016-03-01.xml_part").is_some());
    assert_eq!(
        store.backend().get("ch.nb.sb/meta.xls").unwrap(),
        b"PK\x03\x04BINARY-XLS"
    );
}

#[tokio::test]
async fn test_envelope_namespaces_are_declared_in_artifact() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    let repo = PagedRepository::new()
        .with_set("sb", records("sb", 0..150, None))
        .with_marc_namespace_on_root();
    let exporter = exporter(repo, &store, config(&work, 1));

    let outcome = exporter.export(&ExportRequest::full("sb")).await.unwrap();
    let (key, _, _) = published(&outcome);
    let body = text(&store, key);

    assert_eq!(identifiers(&body).len(), 150);
    assert_eq!(body.matches(r#"xmlns:marc="http://www.loc.gov/MARC21/slim""#).count(), 150);
    assert!(unbound_prefixes(&body).is_empty());
}

#[tokio::test]
async fn test_incremental_export_filters_by_set_tag() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");

    let mut base = records("a", 0..120, Some("A"));
    base.extend(records("b", 0..80, Some("B")));
    base.extend(records("u", 0..40, None));
    base.push(FakeRecord {
        identifier: "gone".to_string(),
        set_tag: None,
        deleted: true,
    });
    let repo = PagedRepository::new().with_set("NewBib", base);
    let exporter = exporter(repo, &store, config(&work, 1));

    let outcome = exporter.export(&ExportRequest::incremental("A")).await.unwrap();
    let (key, _, _) = published(&outcome);
    assert_eq!(key, "ch.nb.A/records.xml");

    let ids = identifiers(&text(&store, key));
    assert_eq!(ids.len(), 120);
    assert!(ids.iter().all(|id| id.starts_with("a-")));

    let stats = outcome.stats();
    assert_eq!(stats.fetched, 240);
    assert_eq!(stats.filtered, 120);
    assert_eq!(stats.deleted_skipped, 1);

    // The base set was harvested, never the target.
    let requests = exporter.client().transport().requests();
    assert!(matches!(
        &requests[0],
        oai_harvest::oai::ListRequest::Initial { set, .. } if set == "NewBib"
    ));
}

#[tokio::test]
async fn test_empty_set_publishes_empty_container() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    let exporter = exporter(PagedRepository::new(), &store, config(&work, 1));

    let outcome = exporter.export(&ExportRequest::full("empty")).await.unwrap();
    let (key, _, _) = published(&outcome);
    assert!(identifiers(&text(&store, key)).is_empty());
    assert_eq!(outcome.stats().segments_written, 0);
}

#[tokio::test]
async fn test_job_exports_oai_resource_and_sizes_others() {
    let work = TempDir::new().unwrap();
    let store = SnapshotStore::new(MemoryStore::new("bucket"), "ch.nb");
    store.backend().insert("ch.nb.sb/meta.xls", vec![0u8; 42]);

    let mut job: JobDescriptor = serde_json::from_str(
        r#"{
            "id": "sb",
            "append_data": "False",
            "resources": [
                {"type": "oai", "oai_url": "http://example.org/oai", "export_filename": "records.xml"},
                {"type": "xls", "export_filename": "meta.xls"},
                {"type": "pdf", "export_filename": "missing.pdf"}
            ]
        }"#,
    )
    .unwrap();

    let repo = PagedRepository::new().with_set("sb", records("sb", 0..150, None));
    let report = run_job(&mut job, &store, &config(&work, 1), |_url, format| {
        Ok(OaiClient::new(repo.clone(), format))
    })
    .await
    .unwrap();

    assert_eq!(report.resources, 3);
    assert_eq!(report.exported, 1);
    assert_eq!(report.sized, 2);

    let oai = &job.resources[0];
    assert!(oai.url.as_deref().unwrap().ends_with("ch.nb.sb/records.xml"));
    assert_eq!(oai.size, Some(store.backend().get("ch.nb.sb/records.xml").unwrap().len() as u64));
    assert_eq!(job.resources[1].size, Some(42));
    assert_eq!(job.resources[2].size, None);
}
