use framebus::{Frame, FrameDescriptor};

/// Moving diagonal gradient, different for every frame number.
///
/// Bytes are generated directly, so the pattern is only meaningful as an image
/// for `uint8` descriptors; other dtypes still get well-formed frames.
pub fn test_pattern(descriptor: FrameDescriptor, frame_number: u64) -> framebus::Result<Frame> {
    let dims = descriptor.shape.dims();
    let width = if dims.len() >= 2 { dims[1] } else { dims[0] };
    let row_bytes = (descriptor.byte_len() / dims[0]).max(1);
    let pixel_bytes = (row_bytes / width).max(1);
    let shift = (frame_number % 256) as usize;

    let data = (0..descriptor.byte_len())
        .map(|i| {
            let row = i / row_bytes;
            let col = (i % row_bytes) / pixel_bytes;
            ((row + col + shift) % 256) as u8
        })
        .collect();

    Frame::new(descriptor, data)
}
