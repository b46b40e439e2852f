//! End-to-end tiling tests over in-memory and failing decoders.
//!
//! Tests verify:
//! - Boundary policies on a 1000x1000 level
//! - Pixel content of interior and edge tiles
//! - Source read failures halt the stream without a blank tile
//! - Sessions are idempotent and shards partition the grid

use std::collections::BTreeSet;
use std::sync::Arc;

use image::Rgb;
use tokio::task::JoinSet;

use wsi_tiler::annotation::{Annotation, Polygon};
use wsi_tiler::slide::{MemorySlide, SlideDecoder};
use wsi_tiler::tile::{
    create_session, plan, BoundaryPolicy, CoordinateMapper, SessionBuilder, TileCoordinate,
    TileRecord, TileSpec, TileStream,
};
use wsi_tiler::TilingError;

use super::test_utils::{gradient_image, memory_slide, FailingSlide};

async fn collect<S: SlideDecoder + ?Sized>(stream: &mut TileStream<S>) -> Vec<TileRecord> {
    let mut records = Vec::new();
    while let Some(record) = stream.next_tile().await.unwrap() {
        records.push(record);
    }
    records
}

fn xs(records: &[TileRecord]) -> BTreeSet<u32> {
    records.iter().map(|r| r.coordinate.x).collect()
}

// =============================================================================
// Boundary Policies
// =============================================================================

#[tokio::test]
async fn test_pad_policy_1000_square() {
    let slide = Arc::new(memory_slide(1000, 1000));
    let mut stream = create_session(slide, 0, TileSpec::square(256), None, None).unwrap();
    assert_eq!(stream.planned_tiles(), 16);

    let records = collect(&mut stream).await;
    assert_eq!(records.len(), 16);
    assert_eq!(xs(&records), BTreeSet::from([0, 256, 512, 768]));

    let last = records.last().unwrap();
    assert_eq!(last.coordinate, TileCoordinate::new(0, 768, 768));
    assert_eq!(last.pixels.dimensions(), (256, 256));
    assert_eq!((last.content_width, last.content_height), (232, 232));
    assert!(last.is_padded());
    assert_eq!(last.pixels.get_pixel(240, 10), &Rgb([0, 0, 0]));
    assert_eq!(last.pixels.get_pixel(10, 250), &Rgb([0, 0, 0]));
    assert_eq!(stream.tiles_yielded(), 16);
}

#[tokio::test]
async fn test_drop_policy_1000_square() {
    let slide = Arc::new(memory_slide(1000, 1000));
    let spec = TileSpec::square(256).with_policy(BoundaryPolicy::Drop);
    let records = collect(&mut create_session(slide, 0, spec, None, None).unwrap()).await;

    assert_eq!(records.len(), 9);
    assert_eq!(xs(&records), BTreeSet::from([0, 256, 512]));
    assert!(records.iter().all(|r| !r.is_padded()));
    assert!(records.iter().all(|r| r.coordinate.x + 256 <= 1000 && r.coordinate.y + 256 <= 1000));
}

#[tokio::test]
async fn test_fit_policy_1000_square() {
    let slide = Arc::new(memory_slide(1000, 1000));
    let spec = TileSpec::square(256).with_policy(BoundaryPolicy::Fit);
    let records = collect(&mut create_session(slide, 0, spec, None, None).unwrap()).await;

    assert_eq!(records.len(), 16);
    assert_eq!(xs(&records), BTreeSet::from([0, 256, 512, 744]));
    assert!(records.iter().all(|r| !r.is_padded()));
}

#[tokio::test]
async fn test_overlap_stride() {
    let slide = Arc::new(memory_slide(1000, 300));
    let spec = TileSpec::square(256).with_overlap(56).with_policy(BoundaryPolicy::Drop);
    let records = collect(&mut create_session(slide, 0, spec, None, None).unwrap()).await;

    // stride 200: x in 0..=744
    assert_eq!(xs(&records), BTreeSet::from([0, 200, 400, 600]));
    assert!(records.iter().all(|r| r.coordinate.y == 0));
}

// =============================================================================
// Pixels
// =============================================================================

#[tokio::test]
async fn test_tile_pixels_match_source() {
    let source = gradient_image(600, 400);
    let slide = Arc::new(MemorySlide::new(source.clone()));
    let records = collect(&mut create_session(slide, 0, TileSpec::new(200, 150), None, None).unwrap()).await;

    for record in &records {
        let TileCoordinate { x, y, .. } = record.coordinate;
        for (px, py) in [(0, 0), (17, 33), (record.content_width - 1, record.content_height - 1)] {
            assert_eq!(record.pixels.get_pixel(px, py), source.get_pixel(x + px, y + py));
        }
    }
}

#[tokio::test]
async fn test_lower_level_pixels_match_level_raster() {
    let slide = Arc::new(MemorySlide::with_pyramid(gradient_image(1000, 600), &[2, 4]));
    let level1 = slide.level_raster(1).unwrap().clone();
    assert_eq!(level1.dimensions(), (500, 300));

    let records = collect(&mut create_session(slide, 1, TileSpec::square(128), None, None).unwrap()).await;
    assert_eq!(records.len(), 4 * 3);

    let record = &records[5];
    assert_eq!(record.coordinate, TileCoordinate::new(1, 128, 128));
    assert_eq!(record.pixels.get_pixel(3, 4), level1.get_pixel(131, 132));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_corrupt_read_stops_stream() {
    // Index 5 of the 4x4 grid is (256, 256)
    let slide = Arc::new(FailingSlide::new(memory_slide(1000, 1000)).failing_at(0, 256, 256));
    let mut stream = create_session(slide.clone(), 0, TileSpec::square(256), None, None).unwrap();

    let mut produced = Vec::new();
    let error = loop {
        match stream.next_tile().await {
            Ok(Some(record)) => produced.push(record),
            Ok(None) => panic!("stream ended without the injected failure"),
            Err(e) => break e,
        }
    };

    assert_eq!(produced.len(), 5);
    assert!(error.is_source_read());
    assert_eq!(error.coordinate(), Some(TileCoordinate::new(0, 256, 256)));
    assert!(matches!(error, TilingError::SourceRead { .. }));
    assert!(produced.iter().all(|r| r.coordinate != TileCoordinate::new(0, 256, 256)));

    // The stream stays halted until resumed
    assert!(stream.next_tile().await.unwrap().is_none());
    assert_eq!(stream.failed_at(), Some(TileCoordinate::new(0, 256, 256)));
    assert_eq!(slide.read_count(), 6);
}

#[tokio::test]
async fn test_resume_after_corrupt_read() {
    let slide = Arc::new(FailingSlide::new(memory_slide(1000, 1000)).failing_at(0, 256, 256));
    let mut stream = create_session(slide, 0, TileSpec::square(256), None, None).unwrap();

    let mut produced = 0;
    let mut failures = Vec::new();
    loop {
        match stream.next_tile().await {
            Ok(Some(_)) => produced += 1,
            Ok(None) => break,
            Err(e) => {
                failures.push(e.coordinate().unwrap());
                assert_eq!(stream.resume(), e.coordinate());
            }
        }
    }

    assert_eq!(produced, 15);
    assert_eq!(failures, vec![TileCoordinate::new(0, 256, 256)]);
    assert_eq!(stream.tiles_yielded(), 15);
    assert_eq!(stream.tiles_skipped(), 1);
    assert_eq!(stream.resume(), None);
}

#[tokio::test]
async fn test_invalid_level_fails_at_creation() {
    let slide = Arc::new(memory_slide(100, 100));
    let result = create_session(slide, 3, TileSpec::square(32), None, None);
    assert!(matches!(result, Err(TilingError::Configuration(_))));
}

// =============================================================================
// Determinism
// =============================================================================

#[tokio::test]
async fn test_sessions_are_idempotent() {
    let slide = Arc::new(MemorySlide::with_pyramid(gradient_image(700, 500), &[2]));
    let spec = TileSpec::square(160).with_overlap(20);

    let first = collect(&mut create_session(slide.clone(), 0, spec, None, None).unwrap()).await;
    let second = collect(&mut create_session(slide, 0, spec, None, None).unwrap()).await;
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_labeled_sessions_are_idempotent() {
    // Tile (0, 0) is split evenly between two annotations
    let annotations = vec![
        Annotation::new("left", Polygon::rectangle(0.0, 0.0, 128.0, 256.0)),
        Annotation::new("right", Polygon::rectangle(128.0, 0.0, 128.0, 256.0)),
        Annotation::new("tumor", Polygon::rectangle(256.0, 0.0, 512.0, 256.0)),
    ];
    let slide = Arc::new(memory_slide(768, 256));
    let spec = TileSpec::square(256);

    let first = collect(
        &mut create_session(slide.clone(), 0, spec, Some(&annotations), Some(0.3)).unwrap(),
    )
    .await;
    let second = collect(&mut create_session(slide, 0, spec, Some(&annotations), Some(0.3)).unwrap()).await;

    let labels: Vec<Option<&str>> = first.iter().map(|r| r.label.as_deref()).collect();
    assert_eq!(labels, vec![Some("left"), Some("tumor"), Some("tumor")]);
    assert_eq!(first, second);
}

#[test]
fn test_plan_is_deterministic() {
    let spec = TileSpec::new(300, 200).with_policy(BoundaryPolicy::Fit);
    let a: Vec<_> = plan(0, 1234, 777, spec).unwrap().collect();
    let b: Vec<_> = plan(0, 1234, 777, spec).unwrap().collect();
    assert_eq!(a, b);

    // Row-major
    assert!(a.windows(2).all(|w| (w[0].y, w[0].x) < (w[1].y, w[1].x)));
}

#[test]
fn test_round_trip_on_pyramid() {
    let slide = MemorySlide::with_pyramid(gradient_image(1000, 600), &[2, 3, 4]);
    let mapper = CoordinateMapper::new(slide.levels()).unwrap();

    for (level, info) in slide.levels().iter().enumerate() {
        for x in (0..info.width).step_by(7) {
            let y = x % info.height;
            let (x0, y0) = mapper.to_level0(level, x, y).unwrap();
            assert_eq!(mapper.from_level0(level, x0, y0).unwrap(), (x, y));
        }
    }
}

// =============================================================================
// Sharding
// =============================================================================

#[tokio::test]
async fn test_parallel_shards_cover_grid_once() {
    let slide: Arc<dyn SlideDecoder> = Arc::new(memory_slide(900, 700));
    let spec = TileSpec::square(128);
    let expected: BTreeSet<_> = plan(0, 900, 700, spec).unwrap().collect();

    let shards = 3;
    let mut workers = JoinSet::new();
    for shard in 0..shards {
        let mut stream = SessionBuilder::new(slide.clone(), 0, spec)
            .shard(shard, shards)
            .build()
            .unwrap();
        workers.spawn(async move {
            let mut coordinates = Vec::new();
            while let Some(record) = stream.next_tile().await.unwrap() {
                coordinates.push(record.coordinate);
            }
            coordinates
        });
    }

    let mut seen = Vec::new();
    while let Some(joined) = workers.join_next().await {
        seen.extend(joined.unwrap());
    }

    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), expected);
}
