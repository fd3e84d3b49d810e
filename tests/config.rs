use std::sync::Mutex;

use tempfile::NamedTempFile;

use inspection_kernel::config::InspectorConfig;
use inspection_kernel::detect::SuppressionMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VRS_CONFIG",
        "VRS_SERVER_ADDR",
        "VRS_CAMERA_DEVICE",
        "VRS_CAMERA_INDEX",
        "VRS_CAMERA_WIDTH",
        "VRS_CAMERA_HEIGHT",
        "VRS_CAMERA_FPS",
        "VRS_MODEL_PATH",
        "VRS_CONFIDENCE_THRESHOLD",
        "VRS_IOU_THRESHOLD",
        "VRS_CAPTURES_DIR",
        "VRS_SIMULATE_DETECTIONS",
        "VRS_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "server": { "addr": "127.0.0.1:9100" },
            "camera": { "device": "stub://line-3", "index": 2, "width": 800, "height": 600, "fps": 15 },
            "model": {
                "path": "/opt/models/pcb.onnx",
                "confidence_threshold": 0.6,
                "suppression": "per_class",
                "class_labels": ["crack", "scratch"]
            },
            "stream": { "fps": 5, "jpeg_quality": 60, "square_size": 320, "queue_depth": 2 },
            "captures_dir": "/var/lib/inspection/captures",
            "capture_jpeg_quality": 90
        }"#,
    );

    std::env::set_var("VRS_CONFIG", file.path());
    std::env::set_var("VRS_CAMERA_FPS", "25");
    std::env::set_var("VRS_IOU_THRESHOLD", "0.55");
    std::env::set_var("VRS_SIMULATE_DETECTIONS", "true");

    let cfg = InspectorConfig::load().expect("load config");

    assert_eq!(cfg.server_addr, "127.0.0.1:9100");
    assert_eq!(cfg.camera.device, "stub://line-3");
    assert_eq!(cfg.camera.index, 2);
    assert_eq!(cfg.camera.width, 800);
    assert_eq!(cfg.camera.height, 600);
    assert_eq!(cfg.camera.fps, 25);
    assert_eq!(
        cfg.model.path.as_deref(),
        Some(std::path::Path::new("/opt/models/pcb.onnx"))
    );
    assert_eq!(cfg.model.confidence_threshold, 0.6);
    assert_eq!(cfg.model.iou_threshold, 0.55);
    assert_eq!(cfg.model.suppression, SuppressionMode::PerClass);
    assert_eq!(
        cfg.model.class_labels,
        Some(vec!["crack".to_string(), "scratch".to_string()])
    );
    assert!(cfg.model.simulate_without_model);
    assert_eq!(cfg.stream.fps, 5);
    assert_eq!(cfg.stream.jpeg_quality, 60);
    assert_eq!(cfg.stream.square_size, 320);
    assert_eq!(cfg.stream.queue_depth, 2);
    assert_eq!(
        cfg.captures_dir,
        std::path::PathBuf::from("/var/lib/inspection/captures")
    );
    assert_eq!(cfg.capture_jpeg_quality, 90);

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = InspectorConfig::load().expect("load defaults");
    assert_eq!(cfg.server_addr, "0.0.0.0:8000");
    let expected_device = if cfg!(feature = "ingest-v4l2") {
        "v4l2"
    } else {
        "stub://camera"
    };
    assert_eq!(cfg.camera.device, expected_device);
    assert_eq!(cfg.camera.fps, 30);
    assert!(cfg.model.path.is_none());
    assert_eq!(cfg.stream.fps, 10);
    assert_eq!(cfg.stream.jpeg_quality, 75);
    assert_eq!(cfg.capture_jpeg_quality, 80);

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VRS_CONFIDENCE_THRESHOLD", "1.5");
    assert!(InspectorConfig::load().is_err());
    clear_env();

    std::env::set_var("VRS_CAMERA_WIDTH", "0");
    assert!(InspectorConfig::load().is_err());
    clear_env();

    std::env::set_var("VRS_CAMERA_FPS", "fast");
    assert!(InspectorConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "stream": { "jpeg_quality": 0 } }"#);
    std::env::set_var("VRS_CONFIG", file.path());
    assert!(InspectorConfig::load().is_err());
    clear_env();

    std::env::set_var("VRS_SIMULATE_DETECTIONS", "perhaps");
    assert!(InspectorConfig::load().is_err());
    clear_env();
}

#[test]
fn invalid_json_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("VRS_CONFIG", file.path());
    let err = InspectorConfig::load().expect_err("invalid config");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
