//! Capture → detection → streaming, each stage with its own managers.

use framebus::{
    BusConfig, DType, Frame, FrameDescriptor, FrameManager, MetadataManager, TrackedObject,
};
use std::time::Duration;

fn suffix() -> String {
    format!("{}", std::process::id())
}

fn person(id: u64) -> TrackedObject {
    TrackedObject {
        id,
        bbox: [1.0, 2.0, 30.0, 40.0],
        confidence: 0.9,
        class_name: "person".into(),
        is_trusted: false,
        face_name: None,
        camera_label: "top".into(),
        last_seen: 1_700_000_000.0,
    }
}

#[test]
fn test_overlay_and_metadata_are_paired() {
    let dir = tempfile::tempdir().unwrap();
    let config = BusConfig::default().with_shm_dir(dir.path());
    let raw = format!("camera_raw_{}", suffix());
    let overlay = format!("camera_top_overlay_{}", suffix());
    let meta = format!("metadata_top_{}", suffix());
    let descriptor = FrameDescriptor::new(&[6, 8, 3], DType::U8).unwrap();

    // Capture process
    let capture = FrameManager::new(config.clone());
    capture.register_frame(&raw, descriptor).unwrap();

    // Detection process
    let detection = FrameManager::new(config.clone());
    let detection_meta = MetadataManager::new(config.clone());
    detection.register_frame(&overlay, descriptor).unwrap();
    detection_meta.create_metadata(&meta, 20).unwrap();

    // Streaming process
    let streaming = FrameManager::new(config.clone());
    let streaming_meta = MetadataManager::new(config);

    for n in 1..=3u8 {
        capture
            .write_frame(&raw, &Frame::new(descriptor, vec![n; 144]).unwrap())
            .unwrap();

        let input = detection.force_read_frame(&raw).unwrap().unwrap();
        assert_eq!(input.data[0], n);

        let objects: Vec<TrackedObject> = (0..u64::from(n)).map(person).collect();
        let mut annotated = input.data.clone();
        annotated[0] = n + 100;
        detection
            .write_frame(&overlay, &Frame::new(descriptor, annotated).unwrap())
            .unwrap();
        detection_meta.write_objects(&meta, &objects).unwrap();

        // Same cycle: overlay and metadata describe the same frame
        let shown = streaming.force_read_frame(&overlay).unwrap().unwrap();
        streaming_meta.attach_metadata(&meta).unwrap();
        let listed = streaming_meta.read_objects(&meta).unwrap();
        assert_eq!(shown.data[0], n + 100);
        assert_eq!(listed.len(), usize::from(n));
    }

    streaming.close_all();
    streaming_meta.close_all();
    assert_eq!(detection.cleanup_all(), 0);
    assert_eq!(detection_meta.cleanup_all(), 0);
    assert_eq!(capture.cleanup_all(), 0);
    assert!(framebus::paths::discover(dir.path()).unwrap().is_empty());
}

#[test]
fn test_blocking_reader_in_other_manager_gets_new_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = BusConfig::default().with_shm_dir(dir.path());
    let name = format!("camera_full_raw_{}", suffix());
    let descriptor = FrameDescriptor::new(&[2, 2, 1], DType::U8).unwrap();

    let writer = FrameManager::new(config.clone());
    let reader = FrameManager::new(config);
    writer.register_frame(&name, descriptor).unwrap();
    reader.attach_frame(&name, descriptor).unwrap();

    assert!(
        reader
            .read_frame(&name, Duration::from_millis(20))
            .unwrap()
            .is_none()
    );

    writer
        .write_frame(&name, &Frame::new(descriptor, vec![9, 8, 7, 6]).unwrap())
        .unwrap();
    let frame = reader
        .read_frame(&name, Duration::from_secs(1))
        .unwrap()
        .unwrap();
    assert_eq!(frame.data, vec![9, 8, 7, 6]);

    reader.close_all();
    assert_eq!(writer.cleanup_all(), 0);
}
