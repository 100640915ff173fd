use super::*;
use crate::cache::context::{RenderScope, with_values_cache};

const PROJECT: &str = r#"{
  "name": "shot_010",
  "writers": {
    "Write1": { "first_frame": 1, "last_frame": 4, "output": "out.jsonl", "views": 2 }
  },
  "knobs": [
    { "id": 1, "name": "enabled", "type": "bool", "value": true },
    { "id": 2, "name": "samples", "type": "int", "value": 8 },
    { "id": 3, "name": "label", "type": "string", "value": "beauty" },
    { "id": 4, "name": "translate", "type": "double", "curves": [
        { "keys": [ { "x": 1.0, "y": 0.0 }, { "x": 4.0, "y": 3.0 } ] },
        { "default": 5.0 }
    ] },
    { "id": 5, "name": "lut", "type": "parametric", "samples": 3, "curves": [
        { "keys": [ { "x": 0.0, "y": 0.0 }, { "x": 1.0, "y": 1.0 } ] }
    ] }
  ]
}"#;

#[test]
fn json_project_validates_with_defaults() {
    let p = Project::from_json_str(PROJECT).unwrap();
    let w = p.writer("Write1").unwrap();
    assert_eq!(w.frame_step, 1);
    assert_eq!(w.frame_delay_ms, 0);
    assert_eq!(w.frame_range().unwrap().len_frames(), 4);
    assert_eq!(p.knobs.len(), 5);
    assert!(p.writer("Write2").is_err());
}

#[test]
fn validate_rejects_inverted_range_and_duplicate_knobs() {
    let mut p = Project::from_json_str(PROJECT).unwrap();
    p.writers.get_mut("Write1").unwrap().last_frame = 0;
    let err = p.validate().unwrap_err();
    assert!(err.to_string().contains("first frame in the sequence is greater"));

    let mut p = Project::from_json_str(PROJECT).unwrap();
    let dup = p.knobs[0].clone();
    p.knobs.push(dup);
    assert!(p.validate().is_err());
}

#[test]
fn malformed_json_is_a_serde_error() {
    let err = Project::from_json_str("{ \"writers\": 3 }").unwrap_err();
    assert!(matches!(err, RenderLinkError::Serde(_)));
}

#[test]
fn knob_reads_produce_json_values() {
    let p = Project::from_json_str(PROJECT).unwrap();
    let t = TimeValue::from_frame(2);
    let v = ViewIdx(0);
    let read = |i: usize| p.knobs[i].read(t, v).unwrap();
    assert_eq!(read(0), serde_json::json!(true));
    assert_eq!(read(1), serde_json::json!(8));
    assert_eq!(read(2), serde_json::json!("beauty"));
    assert_eq!(read(3), serde_json::json!([1.0, 5.0]));
    assert_eq!(read(4), serde_json::json!([[0.0, 0.5, 1.0]]));
}

#[test]
fn knob_reads_populate_the_render_cache() {
    let p = Project::from_json_str(PROJECT).unwrap();
    let scope = RenderScope::enter();
    for knob in &p.knobs {
        knob.read(TimeValue::from_frame(1), ViewIdx(1)).unwrap();
    }
    // bool + int + string + two double dimensions.
    assert_eq!(with_values_cache(|c| c.len()), Some(5));
    assert_eq!(with_values_cache(|c| c.cached_curve_count()), Some(1));
    drop(scope);
}

#[test]
fn relative_outputs_resolve_against_the_project_dir() {
    let mut p = Project::from_json_str(PROJECT).unwrap();
    p.resolve_paths(Path::new("/shots/010"));
    assert_eq!(
        p.writer("Write1").unwrap().output.as_deref(),
        Some(Path::new("/shots/010/out.jsonl"))
    );

    // Absolute paths are kept.
    p.resolve_paths(Path::new("/elsewhere"));
    assert_eq!(
        p.writer("Write1").unwrap().output.as_deref(),
        Some(Path::new("/shots/010/out.jsonl"))
    );
}
