use crate::cli::InspectArgs;
use anyhow::Context;
use framebus::{BufferKind, BufferStatus, BusConfig, RingBuffer, paths};

/// One line per buffer: layout, progress and writer.
pub fn describe(status: &BufferStatus) -> String {
    let kind = match status.layout.kind {
        BufferKind::Frame => "frame",
        BufferKind::Payload => "payload",
    };
    let age = match status.age() {
        Some(age) => format!("{:.3}s ago", age.as_secs_f64()),
        None => "never".to_string(),
    };

    format!(
        "{name:<24} {kind:<7} {descriptor:<24} slot={slot} gen={generation} idx={index} ready={ready} written={age} pid={pid}",
        name = status.name,
        descriptor = status.layout.descriptor.to_string(),
        slot = status.layout.slot_size,
        generation = status.generation,
        index = status.write_index,
        ready = u8::from(status.ready),
        pid = status.writer_pid,
    )
}

/// Describe the requested buffer, or every buffer in the shm directory.
pub fn run(bus: &BusConfig, args: &InspectArgs) -> anyhow::Result<Vec<String>> {
    let names = match &args.name {
        Some(name) => vec![name.clone()],
        None => paths::discover(&bus.shm_dir)
            .with_context(|| format!("Failed to list {}", bus.shm_dir.display()))?,
    };

    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        match RingBuffer::attach_existing(bus, &name) {
            Ok(ring) => {
                if let Some(status) = ring.status() {
                    lines.push(describe(&status));
                }
                ring.close();
            }
            Err(e) if args.name.is_some() => {
                return Err(e).with_context(|| format!("Failed to attach to '{name}'"));
            }
            Err(e) => {
                tracing::warn!(buffer = %name, error = %e, "Skipping unreadable buffer");
                lines.push(format!("{name:<24} unreadable: {e}"));
            }
        }
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framebus::{DType, Frame, FrameDescriptor};

    #[test]
    fn test_inspect_lists_every_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusConfig::default().with_shm_dir(dir.path());
        let pid = std::process::id();
        let written = format!("busctl_insp_a_{pid}");
        let idle = format!("busctl_insp_b_{pid}");

        let descriptor = FrameDescriptor::new(&[2, 2, 3], DType::U8).unwrap();
        let a = RingBuffer::register(&bus, &written, descriptor).unwrap();
        let b = RingBuffer::register(&bus, &idle, descriptor).unwrap();
        a.write(&Frame::new(descriptor, vec![0; 12]).unwrap()).unwrap();

        let lines = run(&bus, &InspectArgs { name: None }).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&written));
        assert!(lines[0].contains("(2, 2, 3) uint8"));
        assert!(lines[0].contains("gen=1 idx=1 ready=1"));
        assert!(lines[0].contains(&format!("pid={pid}")));
        assert!(lines[1].contains("gen=0"));
        assert!(lines[1].contains("written=never"));

        a.unlink().unwrap();
        b.unlink().unwrap();
    }

    #[test]
    fn test_inspect_missing_named_buffer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusConfig::default().with_shm_dir(dir.path());
        let args = InspectArgs {
            name: Some("busctl_insp_missing".to_string()),
        };
        assert!(run(&bus, &args).is_err());
    }
}
