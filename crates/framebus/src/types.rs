use crate::errors::{FrameBusError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum number of dimensions a frame shape may have.
pub const MAX_DIMS: usize = 4;

/// Element type of a frame.
///
/// The numeric codes are stored in the control segment and must stay stable.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    F32 = 7,
    F64 = 8,
}

impl DType {
    pub fn itemsize(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DType::U8),
            2 => Some(DType::I8),
            3 => Some(DType::U16),
            4 => Some(DType::I16),
            5 => Some(DType::U32),
            6 => Some(DType::I32),
            7 => Some(DType::F32),
            8 => Some(DType::F64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint8" | "u8" => Ok(DType::U8),
            "int8" | "i8" => Ok(DType::I8),
            "uint16" | "u16" => Ok(DType::U16),
            "int16" | "i16" => Ok(DType::I16),
            "uint32" | "u32" => Ok(DType::U32),
            "int32" | "i32" => Ok(DType::I32),
            "float32" | "f32" => Ok(DType::F32),
            "float64" | "f64" => Ok(DType::F64),
            other => Err(format!("{other} is not a supported dtype")),
        }
    }
}

/// Frame shape with 1 to [`MAX_DIMS`] non-zero dimensions,
/// usually `(height, width, channels)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    dims: [usize; MAX_DIMS],
    ndim: usize,
}

impl FrameShape {
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.len() > MAX_DIMS {
            return Err(FrameBusError::InvalidShape(format!(
                "expected 1 to {MAX_DIMS} dimensions, got {}",
                dims.len()
            )));
        }
        if dims.contains(&0) {
            return Err(FrameBusError::InvalidShape(format!(
                "zero-sized dimension in {dims:?}"
            )));
        }
        if checked_volume(dims).is_none() {
            return Err(FrameBusError::InvalidShape(format!(
                "{dims:?} has more elements than fit in memory"
            )));
        }

        let mut stored = [0usize; MAX_DIMS];
        stored[..dims.len()].copy_from_slice(dims);
        Ok(Self {
            dims: stored,
            ndim: dims.len(),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.ndim]
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn volume(&self) -> usize {
        self.dims().iter().product()
    }
}

fn checked_volume(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self.dims();
        if dims.len() == 1 {
            return write!(f, "({},)", dims[0]);
        }
        let joined = dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({joined})")
    }
}

/// Shape and element type shared by every frame written to one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDescriptor {
    pub shape: FrameShape,
    pub dtype: DType,
}

impl FrameDescriptor {
    /// Fails with `InvalidShape` if a frame would not fit in the address space.
    pub fn new(dims: &[usize], dtype: DType) -> Result<Self> {
        let shape = FrameShape::new(dims)?;
        let fits = shape
            .volume()
            .checked_mul(dtype.itemsize())
            .is_some_and(|len| len <= isize::MAX as usize);
        if !fits {
            return Err(FrameBusError::InvalidShape(format!(
                "{shape} {dtype} frames are too large"
            )));
        }

        Ok(Self { shape, dtype })
    }

    /// Raw byte buffer of `len` bytes, used for serialized payloads.
    pub fn bytes(len: usize) -> Result<Self> {
        Self::new(&[len], DType::U8)
    }

    pub fn byte_len(&self) -> usize {
        self.shape.volume() * self.dtype.itemsize()
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.shape, self.dtype)
    }
}

/// How the bytes in a slot are interpreted.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Every write fills the whole slot with one frame.
    Frame = 0,
    /// Writes carry a variable-length payload up to the slot size.
    Payload = 1,
}

impl BufferKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(BufferKind::Frame),
            1 => Some(BufferKind::Payload),
            _ => None,
        }
    }
}

/// A frame copied out of a shared buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub descriptor: FrameDescriptor,
    pub data: Vec<u8>,
    /// Number of completed writes when this frame was published (starts at 1).
    pub generation: u64,
    /// Writer wall clock at publication, in nanoseconds since the UNIX epoch.
    pub timestamp_ns: u64,
}

impl Frame {
    /// Build a frame to be written. Fails if `data` does not match the descriptor.
    pub fn new(descriptor: FrameDescriptor, data: Vec<u8>) -> Result<Self> {
        if data.len() != descriptor.byte_len() {
            return Err(FrameBusError::InvalidShape(format!(
                "{} needs {} bytes, got {}",
                descriptor,
                descriptor.byte_len(),
                data.len()
            )));
        }
        Ok(Self {
            descriptor,
            data,
            generation: 0,
            timestamp_ns: 0,
        })
    }

    /// Convenience constructor for `uint8` pixel data.
    pub fn from_pixels(dims: &[usize], data: Vec<u8>) -> Result<Self> {
        Self::new(FrameDescriptor::new(dims, DType::U8)?, data)
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp_ns)
    }
}

pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
