use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};

use formata::app::{NoopObserver, PipelineObserver};
use formata::domain::{codes, Dataset, Stage, ValidationError, Value};
use formata::pipeline::processing::denoise::{DenoiseOptions, Denoiser};
use formata::pipeline::processing::filter::{apply_filters, FilterSet};
use formata::pipeline::processing::normalize::{NormalizeOptions, Normalizer};
use formata::pipeline::processing::parser::{parse_file, ParseOptions};
use formata::pipeline::{CancellationToken, Orchestrator, PipelineInput, ProcessingConfig};

#[derive(Default)]
struct RecordingObserver {
    stages: Mutex<Vec<(Stage, usize)>>,
}

#[async_trait]
impl PipelineObserver for RecordingObserver {
    async fn stage_finished(
        &self,
        _job_id: &str,
        stage: Stage,
        issues: &[ValidationError],
    ) -> formata::Result<()> {
        self.stages.lock().unwrap().push((stage, issues.len()));
        Ok(())
    }
}

fn parse(filename: &str, text: &str) -> Dataset {
    parse_file(filename, text.as_bytes(), ParseOptions::default())
        .unwrap()
        .dataset
}

fn filters(raw: serde_json::Value) -> FilterSet {
    serde_json::from_value(raw).unwrap()
}

#[test]
fn test_numeric_inference_with_bad_cell() {
    let ds = parse("ages.json", r#"[{"age":"29"},{"age":"not_a_number"}]"#);
    let out = Normalizer::new(NormalizeOptions::default()).normalize(ds);

    assert_eq!(out.dataset.rows[0][0], Value::Number(29.0));
    assert_eq!(out.dataset.rows[1][0], Value::Null);
    let warning = out
        .issues
        .iter()
        .find(|i| i.code == codes::COERCION_FAILED)
        .expect("coercion warning");
    assert_eq!(warning.row, Some(1));
    assert_eq!(warning.column.as_deref(), Some("age"));
}

#[test]
fn test_gte_filter_excludes_nulls() {
    let ds = parse("ages.csv", "name,age\nA,25\nB,30\nC,35\nD,\n");
    let out = apply_filters(ds, &filters(json!({"age": {"op": ">=", "value": 30}})));
    let names: Vec<String> = out.dataset.rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(names, vec!["B", "C"]);
}

#[test]
fn test_between_on_text_column_matches_nothing() {
    let ds = parse("cities.csv", "city\nOslo\nRome\n");
    let out = apply_filters(ds, &filters(json!({"city": {"op": "between", "min": 10, "max": 20}})));
    assert!(out.dataset.is_empty());
}

#[test]
fn test_filtering_is_idempotent() {
    let ds = parse(
        "people.csv",
        "name,age,joined\nAnn,31,2024-01-05\nBob,17,2023-03-01\nCy,45,2024-07-19\nDi,,2024-02-02\n",
    );
    let rules = filters(json!({
        "age": [{"op": ">", "value": 18}, {"op": "<", "value": 50}],
        "joined": {"op": "range", "start": "2024-01-01"},
        "_textSearch": "n"
    }));
    let once = apply_filters(ds, &rules).dataset;
    let twice = apply_filters(once.clone(), &rules).dataset;
    assert_eq!(once, twice);
    assert_eq!(once.row_count(), 1);
}

#[test]
fn test_dedup_leaves_unique_rows_in_order() {
    let ds = parse("dupes.csv", "a,b\n1,x\n2,y\n1,x\n3,z\n2,y\n");
    let out = Denoiser::new(DenoiseOptions {
        remove_duplicates: true,
        ..DenoiseOptions::default()
    })
    .denoise(ds);
    let firsts: Vec<String> = out.dataset.rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(firsts, vec!["1", "2", "3"]);
    assert_eq!(out.duplicates_removed, 2);
}

#[tokio::test]
async fn test_stages_run_in_order_from_raw_input() {
    let orchestrator = Orchestrator::new(None, ParseOptions::default());
    let observer = RecordingObserver::default();
    let input = PipelineInput::Raw {
        filename: "people.csv".into(),
        bytes: b"Name,Age\nAnn,30\nBob,abc\nAnn,30\n".to_vec(),
    };
    let result = orchestrator
        .execute(
            "job-1",
            "people.csv",
            input,
            &ProcessingConfig::default(),
            &CancellationToken::new(),
            &observer,
            &[],
        )
        .await
        .unwrap();

    let stages: Vec<Stage> = observer.stages.lock().unwrap().iter().map(|(s, _)| *s).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Parse,
            Stage::Normalize,
            Stage::Filter,
            Stage::Denoise,
            Stage::Validate,
            Stage::Finalize
        ]
    );
    let marks: Vec<f64> = stages.iter().map(|s| s.progress_mark()).collect();
    assert!(marks.windows(2).all(|w| w[0] < w[1]));
    assert!(marks.iter().all(|m| *m < 1.0));

    assert_eq!(result.rows_before, 3);
    assert_eq!(result.rows_after, 2);
    assert_eq!(result.after.column_names(), vec!["name", "age"]);
    assert!(result.quality.is_some());
}

#[tokio::test]
async fn test_cancelled_token_stops_before_first_stage() {
    let orchestrator = Orchestrator::new(None, ParseOptions::default());
    let token = CancellationToken::new();
    token.cancel();
    let ds = Arc::new(parse("a.csv", "a\n1\n"));
    let err = orchestrator
        .execute(
            "job-2",
            "a.csv",
            PipelineInput::Parsed(ds),
            &ProcessingConfig::default(),
            &token,
            &NoopObserver,
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cancelled");
}

#[tokio::test]
async fn test_validation_rules_flow_through_config() {
    let orchestrator = Orchestrator::new(None, ParseOptions::default());
    let config: ProcessingConfig = serde_json::from_value(json!({
        "remove_duplicates": false,
        "validation_rules": {"age": {"min": 0, "max": 120, "action": "clip"}}
    }))
    .unwrap();
    let ds = Arc::new(parse("a.csv", "age\n-4\n50\n300\n"));
    let result = orchestrator
        .execute(
            "job-3",
            "a.csv",
            PipelineInput::Parsed(ds),
            &config,
            &CancellationToken::new(),
            &NoopObserver,
            &[],
        )
        .await
        .unwrap();
    let ages: Vec<Value> = result.after.rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(ages, vec![Value::Number(0.0), Value::Number(50.0), Value::Number(120.0)]);
}
