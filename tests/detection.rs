use image::{Rgb, RgbImage};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;

use inspection_kernel::detect::backends::{Candidate, FixedOutputRuntime};
use inspection_kernel::detect::{
    BoundingBox, DetectionEngine, DetectionError, EngineOptions, ModelInfo, SuppressionMode,
};

const INPUT: usize = 64;

fn candidate(cx: f32, cy: f32, size: f32, class_id: usize, score: f32) -> Candidate {
    Candidate {
        cx,
        cy,
        w: size,
        h: size,
        class_id,
        score,
    }
}

fn engine_with(candidates: &[Candidate], suppression: SuppressionMode) -> DetectionEngine {
    DetectionEngine::with_runtime(
        Box::new(FixedOutputRuntime::from_candidates(INPUT, 8, candidates)),
        EngineOptions {
            input_size: INPUT as u32,
            suppression,
            ..EngineOptions::default()
        },
    )
}

fn board(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([30, 90, 40]))
}

#[test]
fn overlapping_same_class_boxes_collapse_to_the_strongest() {
    // IoU of these two is (19 * 20) / (800 - 380) ~= 0.905.
    let engine = engine_with(
        &[
            candidate(33.0, 32.0, 20.0, 0, 0.7),
            candidate(32.0, 32.0, 20.0, 0, 0.9),
        ],
        SuppressionMode::ClassAgnostic,
    );

    let (annotated, batch) = engine.detect(&board(128, 128), 0.4, 0.4).expect("detect");
    assert_eq!(annotated.dimensions(), (128, 128));
    assert_eq!(batch.len(), 1);

    let kept = &batch.detections[0];
    assert_eq!(kept.confidence, 0.9);
    assert_eq!(kept.class_name, "short_circuit");
    // Rescaled from the 64px model input to the 128px frame.
    assert_eq!(kept.bbox, BoundingBox::new(44.0, 44.0, 84.0, 84.0));
    assert!(batch.has_critical_defect);
    assert_eq!(batch.counts_by_class.get("short_circuit"), Some(&1));
}

#[test]
fn per_class_suppression_keeps_overlapping_boxes_of_different_classes() {
    let candidates = [
        candidate(32.0, 32.0, 20.0, 0, 0.9),
        candidate(33.0, 32.0, 20.0, 6, 0.7),
    ];
    let image = board(64, 64);

    let agnostic = engine_with(&candidates, SuppressionMode::ClassAgnostic);
    let (_, batch) = agnostic.detect(&image, 0.4, 0.4).expect("detect");
    assert_eq!(batch.len(), 1);

    let per_class = engine_with(&candidates, SuppressionMode::PerClass);
    let (_, batch) = per_class.detect(&image, 0.4, 0.4).expect("detect");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.detections[0].class_name, "short_circuit");
    assert_eq!(batch.detections[1].class_name, "crack");
}

#[test]
fn boxes_are_clamped_to_the_frame() {
    let engine = engine_with(
        &[candidate(60.0, 4.0, 20.0, 1, 0.8)],
        SuppressionMode::ClassAgnostic,
    );
    let (_, batch) = engine.detect(&board(64, 64), 0.5, 0.4).expect("detect");
    assert_eq!(batch.len(), 1);
    let bbox = batch.detections[0].bbox;
    assert_eq!(bbox, BoundingBox::new(50.0, 0.0, 64.0, 14.0));
    assert!(bbox.x1 <= bbox.x2 && bbox.y1 <= bbox.y2);
}

#[test]
fn negative_and_zero_sizes_keep_corners_ordered() {
    let engine = engine_with(
        &[
            candidate(32.0, 32.0, -10.0, 0, 0.9),
            candidate(8.0, 8.0, 0.0, 1, 0.7),
            Candidate {
                cx: 60.0,
                cy: 2.0,
                w: -20.0,
                h: 6.0,
                class_id: 2,
                score: 0.6,
            },
        ],
        SuppressionMode::PerClass,
    );
    let (_, batch) = engine.detect(&board(64, 64), 0.5, 0.4).expect("detect");
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.detections[0].bbox, BoundingBox::new(27.0, 27.0, 37.0, 37.0));
    for detection in &batch.detections {
        let b = detection.bbox;
        assert!(0.0 <= b.x1 && b.x1 <= b.x2 && b.x2 <= 64.0, "{:?}", b);
        assert!(0.0 <= b.y1 && b.y1 <= b.y2 && b.y2 <= 64.0, "{:?}", b);
    }
}

#[test]
fn random_outputs_stay_inside_the_frame() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..50 {
        let candidates: Vec<Candidate> = (0..rng.gen_range(0..40))
            .map(|_| Candidate {
                cx: rng.gen_range(-40.0..110.0),
                cy: rng.gen_range(-40.0..110.0),
                w: rng.gen_range(-80.0..80.0),
                h: rng.gen_range(-80.0..80.0),
                class_id: rng.gen_range(0..8),
                score: rng.gen_range(0.0..1.0),
            })
            .collect();
        let (width, height) = (rng.gen_range(1..200), rng.gen_range(1..200));
        let engine = engine_with(&candidates, SuppressionMode::ClassAgnostic);
        let (annotated, batch) = engine.detect(&board(width, height), 0.3, 0.45).expect("detect");

        assert_eq!(annotated.dimensions(), (width, height));
        let (w, h) = (width as f32, height as f32);
        for pair in batch.detections.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        for detection in &batch.detections {
            let b = detection.bbox;
            assert!(detection.confidence >= 0.3);
            assert!(0.0 <= b.x1 && b.x1 <= b.x2 && b.x2 <= w, "{:?} in {}x{}", b, width, height);
            assert!(0.0 <= b.y1 && b.y1 <= b.y2 && b.y2 <= h, "{:?} in {}x{}", b, width, height);
        }
    }
}

#[test]
fn one_forward_pass_per_detection() {
    let runtime = Arc::new(FixedOutputRuntime::from_candidates(
        INPUT,
        8,
        &[candidate(32.0, 32.0, 20.0, 0, 0.9)],
    ));
    let engine = DetectionEngine::with_runtime(
        Box::new(runtime.clone()),
        EngineOptions {
            input_size: INPUT as u32,
            ..EngineOptions::default()
        },
    );
    let image = board(64, 64);
    engine.detect(&image, 0.5, 0.4).expect("detect");
    engine.detect(&image, 0.5, 0.4).expect("detect");
    assert_eq!(runtime.calls(), 2);

    // Rejected inputs never reach the model.
    assert!(engine.detect(&image, 2.0, 0.4).is_err());
    assert!(engine.detect(&RgbImage::new(0, 0), 0.5, 0.4).is_err());
    assert_eq!(runtime.calls(), 2);
}

#[test]
fn confidence_threshold_is_inclusive() {
    let engine = engine_with(
        &[
            candidate(16.0, 16.0, 8.0, 2, 0.5),
            candidate(48.0, 48.0, 8.0, 3, 0.25),
        ],
        SuppressionMode::ClassAgnostic,
    );
    let (_, batch) = engine.detect(&board(64, 64), 0.5, 0.4).expect("detect");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.detections[0].confidence, 0.5);
    assert_eq!(batch.detections[0].class_name, "missing_component");
    assert!(!batch.has_critical_defect);
}

#[test]
fn repeated_detection_is_stable() {
    let engine = engine_with(
        &[
            candidate(10.0, 10.0, 8.0, 0, 0.6),
            candidate(30.0, 30.0, 8.0, 1, 0.6),
            candidate(50.0, 50.0, 8.0, 2, 0.95),
            candidate(11.0, 10.0, 8.0, 0, 0.55),
        ],
        SuppressionMode::ClassAgnostic,
    );
    let image = board(64, 64);
    let (_, first) = engine.detect(&image, 0.5, 0.4).expect("detect");
    let (_, second) = engine.detect(&image, 0.5, 0.4).expect("detect");
    assert_eq!(first, second);
    let confidences: Vec<f32> = first.detections.iter().map(|d| d.confidence).collect();
    assert_eq!(confidences, vec![0.95, 0.6, 0.6]);
}

#[test]
fn empty_output_yields_empty_batch() {
    let engine = engine_with(&[], SuppressionMode::ClassAgnostic);
    let (annotated, batch) = engine.detect(&board(32, 24), 0.5, 0.4).expect("detect");
    assert!(batch.is_empty());
    assert_eq!(annotated, board(32, 24));
}

#[test]
fn unexpected_output_shape_is_a_decode_error() {
    let output = ArrayD::<f32>::zeros(vec![1, 3, 5]);
    let engine = DetectionEngine::with_runtime(
        Box::new(FixedOutputRuntime::new(ModelInfo::square(INPUT), output)),
        EngineOptions {
            input_size: INPUT as u32,
            ..EngineOptions::default()
        },
    );
    let err = engine.detect(&board(64, 64), 0.5, 0.4).expect_err("bad shape");
    assert!(matches!(err, DetectionError::Decode(_)));
}

#[test]
fn missing_model_file_is_reported() {
    let err = DetectionEngine::load(
        Path::new("/nonexistent/models/pcb_defects.onnx"),
        EngineOptions::default(),
    )
    .expect_err("missing model");
    assert!(matches!(err, DetectionError::ModelNotFound { .. }));
    assert!(err.to_string().contains("pcb_defects.onnx"));
}

#[test]
fn detects_from_image_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("board.png");
    board(128, 64).save(&path).expect("write png");

    let engine = engine_with(
        &[candidate(32.0, 32.0, 16.0, 7, 0.85)],
        SuppressionMode::ClassAgnostic,
    );
    let (annotated, batch) = engine.detect_file(&path, 0.5, 0.4).expect("detect file");
    assert_eq!(annotated.dimensions(), (128, 64));
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.detections[0].class_name, "scratch");
    assert_eq!(batch.detections[0].bbox, BoundingBox::new(48.0, 24.0, 80.0, 40.0));

    assert!(engine.detect_file(&dir.path().join("missing.png"), 0.5, 0.4).is_err());
}
