use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use infer_overlay::config::AnnotatorConfig;
use infer_overlay::{OutputMode, ResultKind, VideoFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ANNOTATE_CONFIG",
        "ANNOTATE_MODEL",
        "ANNOTATE_MODE",
        "ANNOTATE_OUTPUT",
        "ANNOTATE_THRESHOLD",
        "ANNOTATE_NUM_INFERENCE",
        "ANNOTATE_FRAME_INTERVAL",
        "ANNOTATE_LABELS",
        "ANNOTATE_MODEL_WIDTH",
        "ANNOTATE_MODEL_HEIGHT",
        "ANNOTATE_SOURCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "inference": {
            "model": "stub://detector",
            "mode": "detector",
            "output": "json",
            "confidence_threshold": 0.4,
            "num_inference": 3,
            "frame_interval": 2,
            "model_width": 320,
            "model_height": 240
        },
        "overlay": { "labels": "/opt/models/coco.txt" },
        "source": {
            "uri": "rtsp://camera-1/stream",
            "format": "RGB16",
            "width": 800,
            "height": 600,
            "target_fps": 15,
            "max_frames": 100
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("ANNOTATE_CONFIG", file.path());
    std::env::set_var("ANNOTATE_THRESHOLD", "0.65");
    std::env::set_var("ANNOTATE_FRAME_INTERVAL", "5");
    std::env::set_var("ANNOTATE_OUTPUT", "overlay");

    let cfg = AnnotatorConfig::load().expect("load config");

    assert_eq!(cfg.inference.model.as_deref().unwrap().to_str(), Some("stub://detector"));
    assert_eq!(cfg.inference.mode, ResultKind::Detector);
    assert_eq!(cfg.inference.output, OutputMode::Overlay);
    assert_eq!(cfg.inference.confidence_threshold, Some(0.65));
    assert_eq!(cfg.inference.num_inference(), 3);
    assert_eq!(cfg.inference.frame_interval, 5);
    assert_eq!((cfg.model_width, cfg.model_height), (320, 240));
    assert_eq!(
        cfg.overlay.labels.as_deref().unwrap().to_str(),
        Some("/opt/models/coco.txt")
    );
    assert_eq!(cfg.source.uri, "rtsp://camera-1/stream");
    assert_eq!(cfg.source.format, VideoFormat::Rgb16);
    assert_eq!((cfg.source.width, cfg.source.height), (800, 600));
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.max_frames, Some(100));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[inference]
model = "stub://classifier"
mode = "classifier"

[overlay]
labels = "labels.txt"
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("ANNOTATE_CONFIG", file.path());

    let cfg = AnnotatorConfig::load().expect("load config");
    assert_eq!(cfg.inference.mode, ResultKind::Classifier);
    assert_eq!(cfg.inference.confidence_threshold(), 11.0);
    assert_eq!(cfg.inference.num_inference(), 2);
    assert!(cfg.overlay.labels.is_some());

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AnnotatorConfig::load().expect("load config");
    assert!(cfg.inference.model.is_none());
    assert_eq!(cfg.inference.mode, ResultKind::None);
    assert_eq!(cfg.inference.frame_interval, 0);
    assert_eq!(cfg.source.uri, "stub://pattern");

    std::env::set_var("ANNOTATE_MODEL", "stub://classifier");
    std::env::set_var("ANNOTATE_MODE", "classifier");
    std::env::set_var("ANNOTATE_MODEL", "   ");
    let cfg = AnnotatorConfig::load().expect("blank values are ignored");
    assert!(cfg.inference.model.is_none());
    assert_eq!(cfg.inference.mode, ResultKind::Classifier);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ANNOTATE_THRESHOLD", "high");
    assert!(AnnotatorConfig::load().is_err());
    clear_env();

    std::env::set_var("ANNOTATE_MODE", "segmenter");
    assert!(AnnotatorConfig::load().is_err());
    clear_env();

    std::env::set_var("ANNOTATE_MODEL_WIDTH", "0");
    assert!(AnnotatorConfig::load().is_err());
    clear_env();

    std::env::set_var("ANNOTATE_CONFIG", "/nonexistent/annotate.json");
    let err = AnnotatorConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
