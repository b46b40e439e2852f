//! Annotation labeling and mask tests through full sessions.
//!
//! Tests verify:
//! - GeoJSON files load into labeled polygons
//! - Overlap threshold semantics on a 256x256 tile
//! - Holes, class filters and annotation-space placement
//! - Single- and multi-label masks line up with tile pixels

use std::sync::Arc;

use wsi_tiler::annotation::{load_geojson, Annotation, LabelMask, MaskMode, Polygon};
use wsi_tiler::error::AnnotationLoadError;
use wsi_tiler::tile::{
    create_session, AnnotationSpace, LabeledOnly, SessionBuilder, TileCoordinate, TileSpec,
};
use wsi_tiler::TilingError;

use super::test_utils::{memory_slide, temp_dir};

const GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[0, 0], [512, 0], [512, 256], [0, 256], [0, 0]]]
      },
      "properties": { "classification": { "name": "tumor", "color": [200, 0, 0] } }
    },
    {
      "type": "Feature",
      "geometry": {
        "type": "MultiPolygon",
        "coordinates": [
          [[[0, 512], [256, 512], [256, 768], [0, 768], [0, 512]]],
          [[[512, 512], [768, 512], [768, 768], [512, 768], [512, 512]]]
        ]
      },
      "properties": { "classification": "stroma" }
    },
    {
      "type": "Feature",
      "geometry": { "type": "Point", "coordinates": [10, 10] },
      "properties": { "name": "marker" }
    },
    {
      "type": "Feature",
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 0]]]
      },
      "properties": {}
    }
  ]
}"#;

async fn write_geojson(name: &str, text: &str) -> std::path::PathBuf {
    let dir = temp_dir(name);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("annotations.geojson");
    tokio::fs::write(&path, text).await.unwrap();
    path
}

// =============================================================================
// GeoJSON
// =============================================================================

#[tokio::test]
async fn test_load_geojson_file() {
    let path = write_geojson("load", GEOJSON).await;
    let annotations = load_geojson(&path).await.unwrap();

    // Point and unlabeled features are skipped, the MultiPolygon is split
    let labels: Vec<&str> = annotations.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels, vec!["tumor", "stroma", "stroma"]);
    assert_eq!(annotations[0].polygon.area(), 512.0 * 256.0);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_load_geojson_errors() {
    let missing = load_geojson("/definitely/not/here.geojson").await;
    assert!(matches!(missing, Err(AnnotationLoadError::Read { .. })));

    let path = write_geojson("invalid", "{ not json").await;
    let invalid = load_geojson(&path).await;
    assert!(matches!(invalid, Err(AnnotationLoadError::Json(_))));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_geojson_labels_session() {
    let path = write_geojson("session", GEOJSON).await;
    let annotations = load_geojson(&path).await.unwrap();

    let slide = Arc::new(memory_slide(1024, 1024));
    let mut stream = create_session(slide, 0, TileSpec::square(256), Some(&annotations), None).unwrap();

    let mut labeled = Vec::new();
    while let Some(record) = stream.next_tile().await.unwrap() {
        if let Some(label) = record.label {
            labeled.push((record.coordinate.x, record.coordinate.y, label));
        }
    }

    assert_eq!(
        labeled,
        vec![
            (0, 0, "tumor".to_string()),
            (256, 0, "tumor".to_string()),
            (0, 512, "stroma".to_string()),
            (512, 512, "stroma".to_string()),
        ]
    );

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

// =============================================================================
// Threshold
// =============================================================================

async fn first_label(annotations: &[Annotation], threshold: f64) -> Option<String> {
    let slide = Arc::new(memory_slide(256, 256));
    let mut stream =
        create_session(slide, 0, TileSpec::square(256), Some(annotations), Some(threshold)).unwrap();
    stream.next_tile().await.unwrap().unwrap().label
}

#[tokio::test]
async fn test_quarter_coverage_threshold() {
    let annotations = vec![Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 128.0, 128.0))];

    assert_eq!(first_label(&annotations, 0.5).await, None);
    assert_eq!(first_label(&annotations, 0.2).await.as_deref(), Some("tumor"));
    assert_eq!(first_label(&annotations, 0.25).await.as_deref(), Some("tumor"));
}

#[tokio::test]
async fn test_zero_threshold_needs_positive_area() {
    // Touches the tile only along its right edge
    let annotations = vec![Annotation::new("edge", Polygon::rectangle(256.0, 0.0, 64.0, 64.0))];
    assert_eq!(first_label(&annotations, 0.0).await, None);
}

#[tokio::test]
async fn test_largest_overlap_wins() {
    let annotations = vec![
        Annotation::new("small", Polygon::rectangle(0.0, 0.0, 100.0, 256.0)),
        Annotation::new("large", Polygon::rectangle(100.0, 0.0, 156.0, 256.0)),
    ];
    assert_eq!(first_label(&annotations, 0.3).await.as_deref(), Some("large"));
    assert_eq!(first_label(&annotations, 0.7).await, None);
}

#[tokio::test]
async fn test_hole_reduces_coverage() {
    let exterior = Polygon::rectangle(0.0, 0.0, 256.0, 256.0).exterior;
    let hole = Polygon::rectangle(0.0, 0.0, 192.0, 192.0).exterior;
    let annotations = vec![Annotation::new("ring", Polygon::with_holes(exterior, vec![hole]))];

    // Covered fraction is 1 - 0.5625 = 0.4375
    assert_eq!(first_label(&annotations, 0.5).await, None);
    assert_eq!(first_label(&annotations, 0.4).await.as_deref(), Some("ring"));
}

#[tokio::test]
async fn test_invalid_threshold_rejected() {
    let slide = Arc::new(memory_slide(256, 256));
    let result = create_session(slide, 0, TileSpec::square(256), None, Some(1.5));
    assert!(matches!(result, Err(TilingError::Configuration(_))));
}

// =============================================================================
// Session Options
// =============================================================================

#[tokio::test]
async fn test_class_filter_and_labeled_only() {
    let annotations = vec![
        Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 256.0, 256.0)),
        Annotation::new("stroma", Polygon::rectangle(256.0, 0.0, 256.0, 256.0)),
    ];
    let slide = Arc::new(memory_slide(1024, 512));
    let mut stream = SessionBuilder::new(slide, 0, TileSpec::square(256))
        .annotations(&annotations)
        .classes(vec!["stroma".to_string()])
        .filter(LabeledOnly)
        .build()
        .unwrap();

    let record = stream.next_tile().await.unwrap().unwrap();
    assert_eq!(record.coordinate, TileCoordinate::new(0, 256, 0));
    assert_eq!(record.label.as_deref(), Some("stroma"));
    assert!(stream.next_tile().await.unwrap().is_none());
    assert_eq!(stream.tiles_skipped(), 7);
}

#[tokio::test]
async fn test_labels_on_downsampled_level() {
    // Level-0 square 0..1024 covers the first 512px tile of level 1
    let annotations = vec![Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 1024.0, 1024.0))];
    let slide = Arc::new(wsi_tiler::MemorySlide::with_pyramid(
        super::test_utils::gradient_image(2048, 2048),
        &[2],
    ));
    let mut stream = create_session(slide, 1, TileSpec::square(512), Some(&annotations), None).unwrap();

    let first = stream.next_tile().await.unwrap().unwrap();
    assert_eq!(first.label.as_deref(), Some("tumor"));
    let second = stream.next_tile().await.unwrap().unwrap();
    assert_eq!(second.coordinate, TileCoordinate::new(1, 512, 0));
    assert_eq!(second.label, None);
}

#[tokio::test]
async fn test_scaled_annotation_space() {
    // Annotations in units of 4 level-0 pixels, offset by (1000, 0)
    let annotations = vec![Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 64.0, 64.0))];
    let slide = Arc::new(memory_slide(1536, 256));
    let mut stream = SessionBuilder::new(slide, 0, TileSpec::square(256))
        .annotations(&annotations)
        .annotation_space(AnnotationSpace::new(1024.0, 0.0, 4.0).unwrap())
        .filter(LabeledOnly)
        .build()
        .unwrap();

    let record = stream.next_tile().await.unwrap().unwrap();
    assert_eq!(record.coordinate, TileCoordinate::new(0, 1024, 0));
    assert!(stream.next_tile().await.unwrap().is_none());
}

// =============================================================================
// Masks
// =============================================================================

#[tokio::test]
async fn test_single_label_mask() {
    let annotations = vec![
        Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 64.0, 128.0)),
        Annotation::new("stroma", Polygon::rectangle(64.0, 0.0, 64.0, 128.0)),
    ];
    let slide = Arc::new(memory_slide(128, 128));
    let mut stream = SessionBuilder::new(slide, 0, TileSpec::square(128))
        .annotations(&annotations)
        .mask_mode(MaskMode::Single)
        .build()
        .unwrap();

    let record = stream.next_tile().await.unwrap().unwrap();
    let Some(LabelMask::Single(mask)) = record.mask else {
        panic!("expected a single-label mask");
    };
    assert_eq!(mask.dimensions(), record.pixels.dimensions());
    assert_eq!(mask.get_pixel(10, 10).0[0], 1);
    assert_eq!(mask.get_pixel(63, 100).0[0], 1);
    assert_eq!(mask.get_pixel(64, 100).0[0], 2);
    assert_eq!(mask.get_pixel(127, 0).0[0], 2);
}

#[tokio::test]
async fn test_multi_label_mask_overlap() {
    let annotations = vec![
        Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 96.0, 96.0)),
        Annotation::new("necrosis", Polygon::rectangle(32.0, 32.0, 96.0, 96.0)),
    ];
    let slide = Arc::new(memory_slide(128, 128));
    let mut stream = SessionBuilder::new(slide, 0, TileSpec::square(128))
        .annotations(&annotations)
        .mask_mode(MaskMode::Multi)
        .build()
        .unwrap();

    let record = stream.next_tile().await.unwrap().unwrap();
    let Some(LabelMask::Multi(channels)) = record.mask else {
        panic!("expected a multi-label mask");
    };
    assert_eq!(channels.len(), 2);
    // Overlap region is set in both channels
    assert_eq!(channels[0].get_pixel(50, 50).0[0], 1);
    assert_eq!(channels[1].get_pixel(50, 50).0[0], 1);
    assert_eq!(channels[0].get_pixel(120, 120).0[0], 0);
    assert_eq!(channels[1].get_pixel(120, 120).0[0], 1);
    assert_eq!(channels[1].get_pixel(5, 5).0[0], 0);
}

#[tokio::test]
async fn test_invalid_polygon_fails_session_creation() {
    let bowtie = Polygon::new(vec![
        (0.0, 0.0).into(),
        (100.0, 100.0).into(),
        (100.0, 0.0).into(),
        (0.0, 100.0).into(),
    ]);
    let annotations = vec![Annotation::new("bad", bowtie)];
    let slide = Arc::new(memory_slide(256, 256));

    let result = create_session(slide, 0, TileSpec::square(128), Some(&annotations), None);
    assert!(matches!(result, Err(TilingError::AnnotationGeometry(_))));
}
