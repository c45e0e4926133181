use framebus::{BusConfig, DType, Frame, FrameBusError, FrameDescriptor, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn setup(tag: &str) -> (TempDir, BusConfig, String) {
    let dir = tempdir().unwrap();
    let config = BusConfig::default().with_shm_dir(dir.path());
    let name = format!(
        "fbit_{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    (dir, config, name)
}

fn vga() -> FrameDescriptor {
    FrameDescriptor::new(&[480, 640, 3], DType::U8).unwrap()
}

/// Frame whose every byte is the low byte of the write number
fn uniform(descriptor: FrameDescriptor, n: u64) -> Frame {
    Frame::new(descriptor, vec![n as u8; descriptor.byte_len()]).unwrap()
}

fn assert_untorn(frame: &Frame) {
    let expected = frame.generation as u8;
    if let Some(pos) = frame.data.iter().position(|&b| b != expected) {
        panic!(
            "Torn frame: generation {} expected byte {} but found {} at offset {}",
            frame.generation, expected, frame.data[pos], pos
        );
    }
}

/// Readers hammering the buffer while a writer alternates slots never see
/// bytes from two different writes in one frame.
#[test]
fn test_no_torn_frames_under_concurrency() {
    let (_dir, config, name) = setup("notear");
    let writer = Arc::new(RingBuffer::register(&config, &name, vga()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for blocking in [false, false, true] {
        let reader = RingBuffer::attach(&config, &name, vga()).unwrap();
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            let mut seen = 0usize;
            // Keep going past the end of the writes until something was seen
            while !done.load(Ordering::Acquire) || seen == 0 {
                let frame = if blocking {
                    reader.read(Duration::from_millis(20)).unwrap()
                } else {
                    reader.force_read().unwrap()
                };
                if let Some(frame) = frame {
                    assert_untorn(&frame);
                    seen += 1;
                }
            }
            seen
        }));
    }

    for n in 1..=300u64 {
        writer.write(&uniform(vga(), n)).unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let seen = reader.join().expect("reader thread panicked");
        assert!(seen > 0, "every reader should observe at least one frame");
    }
    assert_eq!(writer.generation(), 300);

    writer.unlink().unwrap();
}

/// After write N returns, a force_read returns frame N, not N-1.
#[test]
fn test_force_read_is_fresh() {
    let (_dir, config, name) = setup("fresh");
    let descriptor = FrameDescriptor::new(&[16, 16, 3], DType::U8).unwrap();
    let writer = RingBuffer::register(&config, &name, descriptor).unwrap();
    let reader = RingBuffer::attach(&config, &name, descriptor).unwrap();

    for n in 1..=50u64 {
        writer.write(&uniform(descriptor, n)).unwrap();
        let frame = reader.force_read().unwrap().unwrap();
        assert_eq!(frame.generation, n);
        assert_eq!(frame.data[0], n as u8);
    }

    reader.close();
    writer.unlink().unwrap();
}

/// Blocked readers do not slow the writer down.
#[test]
fn test_writer_not_blocked_by_waiting_readers() {
    let (_dir, config, name) = setup("nonblock");
    let descriptor = FrameDescriptor::new(&[64, 64, 3], DType::U8).unwrap();
    let writer = RingBuffer::register(&config, &name, descriptor).unwrap();

    // Readers that wait and never keep up
    let waiting: Vec<_> = (0..4)
        .map(|_| {
            let reader = RingBuffer::attach(&config, &name, descriptor).unwrap();
            thread::spawn(move || {
                for _ in 0..3 {
                    let _ = reader.read(Duration::from_millis(200)).unwrap();
                    thread::sleep(Duration::from_millis(100));
                }
            })
        })
        .collect();

    let start = Instant::now();
    for n in 1..=500u64 {
        writer.write(&uniform(descriptor, n)).unwrap();
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_secs(2),
        "500 writes took {elapsed:?}"
    );

    for handle in waiting {
        handle.join().unwrap();
    }
    writer.unlink().unwrap();
}

#[test]
fn test_read_timeout_returns_none_in_time() {
    let (_dir, config, name) = setup("timeout");
    let ring = RingBuffer::register(&config, &name, vga()).unwrap();

    let start = Instant::now();
    let frame = ring.read(Duration::from_millis(100)).unwrap();
    let elapsed = start.elapsed();

    assert!(frame.is_none());
    assert!(
        elapsed >= Duration::from_millis(90) && elapsed < Duration::from_millis(1000),
        "timeout took {elapsed:?}"
    );

    ring.unlink().unwrap();
}

#[test]
fn test_shape_enforcement() {
    let (_dir, config, name) = setup("shape");
    let ring = RingBuffer::register(&config, &name, vga()).unwrap();

    let hd = Frame::from_pixels(&[720, 1280, 3], vec![0; 720 * 1280 * 3]).unwrap();
    match ring.write(&hd) {
        Err(FrameBusError::ShapeMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, vga());
            assert_eq!(actual.shape.dims(), &[720, 1280, 3]);
        }
        other => panic!("Expected ShapeMismatch, got {other:?}"),
    }

    let float_frame = FrameDescriptor::new(&[480, 640, 3], DType::F32).unwrap();
    assert!(matches!(
        ring.write_bytes(&float_frame, &vec![0; float_frame.byte_len()]),
        Err(FrameBusError::ShapeMismatch { .. })
    ));

    assert!(ring.force_read().unwrap().is_none(), "rejected writes leave no trace");
    ring.unlink().unwrap();
}

#[test]
fn test_idempotent_unlink_across_handles() {
    let (dir, config, name) = setup("unlink");
    let writer = RingBuffer::register(&config, &name, vga()).unwrap();
    let reader = RingBuffer::attach(&config, &name, vga()).unwrap();

    writer.unlink().unwrap();
    writer.unlink().unwrap();
    reader.unlink().unwrap();

    assert!(framebus::paths::discover(dir.path()).unwrap().is_empty());
    assert!(matches!(
        RingBuffer::attach(&config, &name, vga()),
        Err(FrameBusError::NotFound(_))
    ));
}

/// A restarted writer reclaims its leftover segments with the last frame intact.
#[test]
fn test_restart_reattach_keeps_last_frame() {
    let (_dir, config, name) = setup("restart");
    let descriptor = FrameDescriptor::new(&[2, 2, 1], DType::U8).unwrap();

    {
        let first_run = RingBuffer::register(&config, &name, descriptor).unwrap();
        first_run
            .write(&Frame::new(descriptor, vec![1, 2, 3, 4]).unwrap())
            .unwrap();
        first_run.close();
    }

    let second_run = RingBuffer::register(&config, &name, descriptor).unwrap();
    let frame = second_run.force_read().unwrap().unwrap();
    assert_eq!(frame.data, vec![1, 2, 3, 4]);
    assert_eq!(second_run.generation(), 1);

    second_run.close();

    // A different shape is refused, never silently reinterpreted
    let other = FrameDescriptor::new(&[4, 4, 1], DType::U8).unwrap();
    assert!(matches!(
        RingBuffer::register(&config, &name, other),
        Err(FrameBusError::ShapeMismatch { .. })
    ));

    framebus::region::unlink_segments(&config.shm_dir, &name).unwrap();
}

/// One new frame wakes exactly one of several competing blocking readers.
#[test]
fn test_competing_blocking_readers_share_one_frame() {
    let (_dir, config, name) = setup("compete");
    let descriptor = FrameDescriptor::new(&[8], DType::U8).unwrap();
    let writer = RingBuffer::register(&config, &name, descriptor).unwrap();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let reader = RingBuffer::attach(&config, &name, descriptor).unwrap();
            thread::spawn(move || reader.read(Duration::from_millis(400)).unwrap().is_some())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    writer.write(&uniform(descriptor, 1)).unwrap();

    let woken = readers
        .into_iter()
        .map(|r| r.join().unwrap())
        .filter(|&got| got)
        .count();
    assert_eq!(woken, 1);

    writer.unlink().unwrap();
}
