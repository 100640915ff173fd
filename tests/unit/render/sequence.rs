use std::path::PathBuf;

use super::*;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "renderlink_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn project(output: &std::path::Path) -> Project {
    let json = serde_json::json!({
        "writers": {
            "Write1": {
                "first_frame": 1,
                "last_frame": 9,
                "frame_step": 2,
                "views": 2,
                "output": output,
            }
        },
        "knobs": [
            { "id": 1, "name": "gain", "type": "double", "curves": [
                { "keys": [ { "x": 1.0, "y": 0.0 }, { "x": 9.0, "y": 8.0 } ] }
            ] },
            { "id": 2, "name": "label", "type": "string", "value": "beauty" }
        ]
    });
    Project::from_json_str(&json.to_string()).unwrap()
}

fn read_records(path: &std::path::Path) -> Vec<FrameRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn config(thread_count: i32) -> RenderConfig {
    RenderConfig {
        thread_count,
        chunk_size: 2,
        ..RenderConfig::default()
    }
}

#[test]
fn parallel_render_writes_frames_in_order() {
    let dir = temp_dir("seq_parallel");
    let out = dir.join("nested").join("out.jsonl");
    let p = project(&out);
    let cfg = config(3);
    let stats = SequenceRenderer::new(&p, "Write1", &cfg, RenderAbort::new())
        .unwrap()
        .render()
        .unwrap();
    assert_eq!(
        stats,
        SequenceStats {
            frames_total: 5,
            frames_rendered: 5,
            aborted: false
        }
    );

    let records = read_records(&out);
    let order: Vec<_> = records.iter().map(|r| (r.frame, r.view)).collect();
    assert_eq!(
        order,
        vec![(1, 0), (1, 1), (3, 0), (3, 1), (5, 0), (5, 1), (7, 0), (7, 1), (9, 0), (9, 1)]
    );
    assert_eq!(records[4].knobs["gain"], serde_json::json!([4.0]));
    assert_eq!(records[4].knobs["label"], serde_json::json!("beauty"));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn inline_render_matches_parallel_render() {
    let dir = temp_dir("seq_inline");
    let a = dir.join("a.jsonl");
    let b = dir.join("b.jsonl");
    let (pa, pb) = (project(&a), project(&b));
    let (inline, parallel) = (config(-1), config(0));
    SequenceRenderer::new(&pa, "Write1", &inline, RenderAbort::new())
        .unwrap()
        .render()
        .unwrap();
    SequenceRenderer::new(&pb, "Write1", &parallel, RenderAbort::new())
        .unwrap()
        .render()
        .unwrap();
    assert_eq!(read_records(&a), read_records(&b));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn abort_before_start_renders_nothing() {
    let dir = temp_dir("seq_abort");
    let out = dir.join("out.jsonl");
    let p = project(&out);
    let cfg = config(2);
    let abort = RenderAbort::new();
    abort.request();
    let stats = SequenceRenderer::new(&p, "Write1", &cfg, abort)
        .unwrap()
        .render()
        .unwrap();
    assert!(stats.aborted);
    assert_eq!(stats.frames_rendered, 0);
    assert!(read_records(&out).is_empty());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn frame_override_and_unknown_writer() {
    let dir = temp_dir("seq_override");
    let out = dir.join("out.jsonl");
    let p = project(&out);
    let cfg = config(-1);
    let renderer = SequenceRenderer::new(&p, "Write1", &cfg, RenderAbort::new())
        .unwrap()
        .with_frames(FrameRange::new(4, 5, 1).unwrap());
    assert_eq!(renderer.range().len_frames(), 2);
    assert_eq!(renderer.render().unwrap().frames_rendered, 2);
    let frames: Vec<_> = read_records(&out).iter().map(|r| r.frame).collect();
    assert_eq!(frames, vec![4, 4, 5, 5]);

    assert!(SequenceRenderer::new(&p, "Nope", &cfg, RenderAbort::new()).is_err());
    std::fs::remove_dir_all(&dir).ok();
}
