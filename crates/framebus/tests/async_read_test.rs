use framebus::{BusConfig, DType, Frame, FrameDescriptor, FrameManager};
use std::sync::Arc;
use std::time::Duration;

fn manager(dir: &tempfile::TempDir) -> Arc<FrameManager> {
    Arc::new(FrameManager::new(
        BusConfig::default().with_shm_dir(dir.path()),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_read_wakes_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let frames = manager(&dir);
    let name = format!("fbasync_wake_{}", std::process::id());
    let descriptor = FrameDescriptor::new(&[4, 4, 3], DType::U8).unwrap();
    frames.register_frame(&name, descriptor).unwrap();

    let writer = {
        let frames = Arc::clone(&frames);
        let name = name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let frame = Frame::new(descriptor, vec![3; descriptor.byte_len()]).unwrap();
            frames.write_frame(&name, &frame).unwrap();
        })
    };

    let frame = frames
        .read_frame_async(&name, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("frame should arrive");
    assert_eq!(frame.data, vec![3; 48]);

    writer.await.unwrap();
    assert_eq!(frames.cleanup_all(), 0);
}

#[tokio::test]
async fn test_async_read_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let frames = manager(&dir);
    let name = format!("fbasync_timeout_{}", std::process::id());
    frames
        .register_frame(&name, FrameDescriptor::new(&[1], DType::U8).unwrap())
        .unwrap();

    let frame = frames
        .read_frame_async(&name, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(frame.is_none());

    assert_eq!(frames.cleanup_all(), 0);
}
