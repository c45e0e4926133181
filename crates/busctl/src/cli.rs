use clap::{Args, Parser, Subcommand};
use framebus::{DType, FrameDescriptor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "busctl",
    version,
    about = "Operate framebus shared-memory buffers",
    arg_required_else_help = true,
    after_help = "Examples:\n  busctl publish camera_raw --shape 480 640 3 --fps 30\n  busctl monitor camera_raw --duration-s 10\n  busctl inspect\n  busctl cleanup camera_raw metadata_top"
)]
pub struct Cli {
    /// Shared memory directory (overrides FRAMEBUS_SHM_DIR).
    #[arg(long = "shm-dir", global = true)]
    pub shm_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a synthetic test pattern, standing in for the capture process.
    Publish(PublishArgs),
    /// Poll a buffer and report how often it changes.
    Monitor(MonitorArgs),
    /// Print the control state of one or all buffers.
    Inspect(InspectArgs),
    /// Remove leftover buffers.
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Buffer name.
    pub name: String,

    /// Frame shape, usually HEIGHT WIDTH CHANNELS.
    #[arg(long, num_args = 1..=4, default_values_t = [480, 640, 3])]
    pub shape: Vec<usize>,

    /// Element type (uint8, float32, ...).
    #[arg(long, default_value = "uint8")]
    pub dtype: DType,

    /// Target frames per second.
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// Stop after this many frames (default: until interrupted).
    #[arg(long)]
    pub frames: Option<u64>,

    /// Leave the buffer in place on exit instead of unlinking it.
    #[arg(long)]
    pub keep: bool,
}

impl PublishArgs {
    pub fn descriptor(&self) -> framebus::Result<FrameDescriptor> {
        FrameDescriptor::new(&self.shape, self.dtype)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Buffer name.
    pub name: String,

    /// Poll interval in milliseconds.
    #[arg(long = "interval-ms", default_value_t = 100)]
    pub interval_ms: u64,

    /// Stop after this many seconds (default: until interrupted).
    #[arg(long = "duration-s")]
    pub duration_s: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Buffer name (default: every buffer in the shared memory directory).
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Buffer names to unlink.
    #[arg(required_unless_present = "all")]
    pub names: Vec<String>,

    /// Unlink every buffer in the shared memory directory.
    #[arg(long, conflicts_with = "names")]
    pub all: bool,
}
