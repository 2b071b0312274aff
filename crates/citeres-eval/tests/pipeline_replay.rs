use citeres_core::constants::ALL_FILES_GUID;
use citeres_core::error::EvalError;
use citeres_core::methods::{MethodKind, MethodParameter, TestingMethod};
use citeres_core::types::{Metric, WeightVector};
use citeres_eval::collaborators::NoProgress;
use citeres_eval::pipeline::{Pipeline, PipelineOptions, WeightOverrides};
use citeres_eval::precomputed::{
    PrecomputedQuery, load_files_dict, load_precomputed_queries, load_zone,
    measure_precomputed_resolution,
};
use citeres_eval::replay::{FilesDictStore, ReplayBackend, ReplayStore};
use citeres_eval::report::render_aggregates_csv;
use citeres_eval::score_logger::ScoreLogger;
use std::path::Path;
use tempfile::tempdir;

const PRR: &str = r#"[
    {
        "citation_id": "c1", "file_guid": "j97-3003", "query_method": "window_30_30",
        "az": "OWN", "citation_multi": ["p95-1021"],
        "structured_query": {"terms": ["tagging", "corpus"]},
        "results": [
            {"guid": "w96-0213", "formula": {"AIM": 2.0, "OWN": 1.0}},
            {"guid": "p95-1021", "formula": {"AIM": 1.0, "OWN": 3.0}}
        ]
    },
    {
        "citation_id": "c2", "file_guid": "j97-3003", "query_method": "window_30_30",
        "az": "OWN", "citation_multi": ["w96-0213"],
        "structured_query": {"terms": ["parser"]},
        "results": [
            {"guid": "w96-0213", "formula": {"AIM": 2.0, "OWN": 0.5}},
            {"guid": "p95-1021", "formula": {"AIM": 1.0, "OWN": 3.0}}
        ]
    },
    {
        "citation_id": "c3", "file_guid": "p99-1001", "query_method": "window_30_30",
        "az": "OWN", "citation_multi": ["x00-0000"],
        "structured_query": {"terms": ["semantics"]},
        "results": []
    }
]"#;

const FILES_DICT: &str = r#"{
    "j97-3003": {
        "resolvable_citations": 16,
        "in_collection_references": 10,
        "tfidf_models": [{"method": "az_1_ALL", "actual_dir": "/idx/j97-3003/az_1"}]
    },
    "p99-1001": {
        "resolvable_citations": 4,
        "tfidf_models": [{"method": "az_1_ALL", "actual_dir": "/idx/p99-1001/az_1"}]
    }
}"#;

fn write_inputs(dir: &Path) {
    std::fs::write(dir.join("prr_AZ_OWN.json"), PRR).unwrap();
    std::fs::write(dir.join("files_dict.json"), FILES_DICT).unwrap();
    let queries: Vec<serde_json::Value> = serde_json::from_str::<Vec<serde_json::Value>>(PRR)
        .unwrap()
        .into_iter()
        .map(|mut entry| {
            entry.as_object_mut().unwrap().remove("results");
            entry
        })
        .collect();
    std::fs::write(
        dir.join("precomputed_queries.json"),
        serde_json::to_string(&queries).unwrap(),
    )
    .unwrap();
}

fn method() -> TestingMethod {
    TestingMethod {
        name: "az_1_ALL".to_string(),
        base_method: "az".to_string(),
        kind: MethodKind::AnnotatedBoost,
        parameter: MethodParameter::Int(1),
        ilc_parameter: None,
        index_filename: "az_1".to_string(),
        runtime_parameters: vec!["AIM".to_string(), "OWN".to_string()],
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        max_results: 200,
        max_attempts: 3,
        full_corpus: false,
        add_random_control: false,
        max_queries: None,
    }
}

#[test]
fn replayed_pipeline_matches_offline_reweighting() {
    let temp = tempdir().unwrap();
    write_inputs(temp.path());

    let zone = load_zone(&temp.path().join("prr_AZ_OWN.json"), "OWN").unwrap();
    let files = load_files_dict(&temp.path().join("files_dict.json")).unwrap();
    let queries = load_precomputed_queries(&temp.path().join("precomputed_queries.json")).unwrap();
    let methods = vec![method()];
    let overrides = WeightOverrides::new();
    let mut backend = ReplayBackend::new(ReplayStore::from_precomputed(&zone));

    let results_path = temp.path().join("results.csv");
    let mut logger = ScoreLogger::with_result_stream(&results_path).unwrap();
    let summary = Pipeline {
        backend: &mut backend,
        files: &files,
        methods: &methods,
        store: None,
        overrides: &overrides,
        options: options(),
    }
    .run(&queries, &mut logger, &mut NoProgress)
    .unwrap();

    assert_eq!(summary.queries_processed, 3);
    assert_eq!(summary.empty_retrievals, 1);
    assert_eq!(summary.total_citations, 20);

    let refs: Vec<&PrecomputedQuery> = zone.iter().collect();
    let offline = measure_precomputed_resolution(
        &refs,
        "az_1_ALL",
        &WeightVector::all_ones(["AIM", "OWN"]),
        "OWN",
    )
    .unwrap();
    assert_eq!(summary.rows.len(), 1);
    assert!((summary.rows[0].avg_mrr - offline.value(Metric::Mrr)).abs() < 1e-12);
    // c1 resolves first, c2 second, c3 retrieves nothing
    assert!((summary.rows[0].avg_mrr - 0.5).abs() < 1e-12);

    let streamed = std::fs::read_to_string(&results_path).unwrap();
    assert_eq!(streamed.lines().count(), 4);

    let csv = render_aggregates_csv(&summary.rows);
    assert!(csv.contains("window_30_30,az_1_ALL,OWN,3,0.500000"));
}

#[test]
fn tuned_overrides_and_random_control_in_full_corpus_mode() {
    let temp = tempdir().unwrap();
    write_inputs(temp.path());

    let zone = load_zone(&temp.path().join("prr_AZ_OWN.json"), "OWN").unwrap();
    let mut files = load_files_dict(&temp.path().join("files_dict.json")).unwrap();
    let corpus_entry = files["j97-3003"].clone();
    files.insert(ALL_FILES_GUID.to_string(), corpus_entry);
    let queries = load_precomputed_queries(&temp.path().join("precomputed_queries.json")).unwrap();
    let methods = vec![method()];
    let mut overrides = WeightOverrides::new();
    // OWN=0 puts w96-0213 first for both c1 and c2.
    overrides.set_for_zone("OWN", "az_1_ALL", WeightVector::from_pairs([("AIM", 1.0), ("OWN", 0.0)]));
    let store = FilesDictStore::new(&files);
    let mut backend = ReplayBackend::new(ReplayStore::from_precomputed(&zone));

    let mut logger = ScoreLogger::new();
    let summary = Pipeline {
        backend: &mut backend,
        files: &files,
        methods: &methods,
        store: Some(&store),
        overrides: &overrides,
        options: PipelineOptions {
            full_corpus: true,
            add_random_control: true,
            ..options()
        },
    }
    .run(&queries, &mut logger, &mut NoProgress)
    .unwrap();

    let tuned = summary
        .rows
        .iter()
        .find(|row| row.doc_method == "az_1_ALL")
        .unwrap();
    // c1: target second (0.5), c2: target first (1.0), c3: nothing retrieved
    assert!((tuned.avg_mrr - 0.5).abs() < 1e-12);

    let control = summary
        .rows
        .iter()
        .find(|row| row.doc_method == "RANDOM")
        .unwrap();
    // only j97-3003 has an in-collection reference count
    assert_eq!(control.count, 2);
    assert!((control.avg_precision - 0.1).abs() < 1e-12);
}

fn run_with_overrides(dir: &Path, weights: WeightVector) -> Result<usize, EvalError> {
    let zone = load_zone(&dir.join("prr_AZ_OWN.json"), "OWN")?;
    let files = load_files_dict(&dir.join("files_dict.json"))?;
    let queries = load_precomputed_queries(&dir.join("precomputed_queries.json"))?;
    let methods = vec![method()];
    let mut overrides = WeightOverrides::new();
    overrides.set_for_method("az_1_ALL", weights);
    let mut backend = ReplayBackend::new(ReplayStore::from_precomputed(&zone));
    let mut logger = ScoreLogger::new();
    Pipeline {
        backend: &mut backend,
        files: &files,
        methods: &methods,
        store: None,
        overrides: &overrides,
        options: options(),
    }
    .run(&queries, &mut logger, &mut NoProgress)
    .map(|summary| summary.queries_processed)
}

#[test]
fn weights_missing_a_formula_field_abort_the_run() {
    let temp = tempdir().unwrap();
    write_inputs(temp.path());

    let err = run_with_overrides(temp.path(), WeightVector::from_pairs([("AIM", 2.0)]))
        .expect_err("OWN has no weight");
    assert!(matches!(err, EvalError::InvalidWeightVector { ref field, .. } if field == "OWN"));
    assert!(!err.is_recoverable());
}

#[test]
fn weights_with_an_unknown_field_abort_the_run() {
    let temp = tempdir().unwrap();
    write_inputs(temp.path());

    let weights = WeightVector::from_pairs([("AIM", 1.0), ("OWN", 1.0), ("OWNN", 3.0)]);
    let err = run_with_overrides(temp.path(), weights).expect_err("OWNN is not a formula field");
    assert!(matches!(err, EvalError::InvalidWeightVector { ref field, .. } if field == "OWNN"));

    let processed =
        run_with_overrides(temp.path(), WeightVector::from_pairs([("AIM", 1.0), ("OWN", 2.0)]))
            .unwrap();
    assert_eq!(processed, 3);
}
