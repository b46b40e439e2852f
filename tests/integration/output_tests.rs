//! Output integration tests: sessions written to disk.
//!
//! Tests verify:
//! - Every produced tile lands as a file named after its coordinate
//! - The manifest maps files to labels and content sizes
//! - Masks are written next to their tiles
//! - Shard workers can share one writer

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use wsi_tiler::annotation::{Annotation, MaskMode, Polygon};
use wsi_tiler::output::{read_manifest, TileEncoder, TileFormat, TileWriter, MANIFEST_FILE};
use wsi_tiler::slide::SlideDecoder;
use wsi_tiler::tile::{create_session, SessionBuilder, TileSpec};

use super::test_utils::{memory_slide, temp_dir};

#[tokio::test]
async fn test_session_to_directory() {
    let dir = temp_dir("output-session");
    let annotations = vec![Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 300.0, 300.0))];
    let slide = Arc::new(memory_slide(600, 500));
    let mut stream = create_session(slide, 0, TileSpec::square(256), Some(&annotations), None).unwrap();

    let writer = TileWriter::create(&dir, TileEncoder::new(TileFormat::Png, 80))
        .await
        .unwrap();
    let mut records = Vec::new();
    while let Some(record) = stream.next_tile().await.unwrap() {
        writer.write(&record).await.unwrap();
        records.push(record);
    }
    writer.finish().await.unwrap();

    let entries = read_manifest(dir.join(MANIFEST_FILE)).await.unwrap();
    assert_eq!(entries.len(), records.len());
    assert_eq!(entries.len(), 3 * 2);

    for (entry, record) in entries.iter().zip(&records) {
        assert_eq!(entry.file, format!("{}.png", record.coordinate.stem()));
        assert_eq!((entry.x, entry.y), (record.coordinate.x, record.coordinate.y));
        assert_eq!(entry.label, record.label);
        assert_eq!(entry.content_width, record.content_width);
        assert!(entry.masks.is_empty());

        // PNG is lossless
        let written = image::open(dir.join(&entry.file)).unwrap().to_rgb8();
        assert_eq!(written, record.pixels);
    }

    assert_eq!(entries[0].label.as_deref(), Some("tumor"));
    assert_eq!(entries[1].label, None);
    assert_eq!(entries[2].file, "L0_x512_y0.png");
    assert_eq!(entries[2].content_width, 88);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_masks_written_with_tiles() {
    let dir = temp_dir("output-masks");
    let annotations = vec![
        Annotation::new("tumor", Polygon::rectangle(0.0, 0.0, 64.0, 128.0)),
        Annotation::new("stroma", Polygon::rectangle(64.0, 0.0, 64.0, 128.0)),
    ];
    let slide = Arc::new(memory_slide(128, 128));

    for (mode, expected) in [
        (MaskMode::Single, vec!["L0_x0_y0_mask.png"]),
        (MaskMode::Multi, vec!["L0_x0_y0_mask_1.png", "L0_x0_y0_mask_2.png"]),
    ] {
        let _ = std::fs::remove_dir_all(&dir);
        let mut stream = SessionBuilder::new(slide.clone(), 0, TileSpec::square(128))
            .annotations(&annotations)
            .mask_mode(mode)
            .build()
            .unwrap();
        let writer = TileWriter::create(&dir, TileEncoder::default()).await.unwrap();
        let record = stream.next_tile().await.unwrap().unwrap();
        let entry = writer.write(&record).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(entry.file, "L0_x0_y0.jpg");
        assert_eq!(entry.masks, expected);
        for name in &entry.masks {
            let mask = image::open(dir.join(name)).unwrap().to_luma8();
            assert_eq!(mask.dimensions(), (128, 128));
        }
    }

    let multi_channel = image::open(dir.join("L0_x0_y0_mask_2.png")).unwrap().to_luma8();
    assert_eq!(multi_channel.get_pixel(100, 10).0[0], 1);
    assert_eq!(multi_channel.get_pixel(10, 10).0[0], 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_shared_writer_across_shards() {
    let dir = temp_dir("output-shards");
    let slide: Arc<dyn SlideDecoder> = Arc::new(memory_slide(800, 600));
    let writer = Arc::new(TileWriter::create(&dir, TileEncoder::default()).await.unwrap());

    let shards = 4;
    let mut workers = JoinSet::new();
    for shard in 0..shards {
        let mut stream = SessionBuilder::new(slide.clone(), 0, TileSpec::square(200))
            .shard(shard, shards)
            .build()
            .unwrap();
        let writer = writer.clone();
        workers.spawn(async move {
            while let Some(record) = stream.next_tile().await.unwrap() {
                writer.write(&record).await.unwrap();
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        joined.unwrap();
    }
    writer.finish().await.unwrap();

    let entries = read_manifest(writer.manifest_path()).await.unwrap();
    let files: BTreeSet<String> = entries.iter().map(|e| e.file.clone()).collect();
    assert_eq!(entries.len(), 12);
    assert_eq!(files.len(), 12);
    assert!(files.iter().all(|f| dir.join(f).exists()));

    let _ = std::fs::remove_dir_all(&dir);
}
