//! The GPU device seam.
//!
//! All calls happen on the presentation thread. [`HostDevice`] keeps buffers
//! in process memory and is what the binary and the tests run against.

use crate::error::DeviceError;
use foldhash::HashMap;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// One `float4` element of a splat buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct Float4(pub [f32; 4]);

pub const FLOAT4_SIZE: usize = size_of::<Float4>();

/// Handle to an allocated device buffer. Handles are never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    id: NonZeroU64,
    elements: u32,
}

impl BufferHandle {
    pub fn id(&self) -> u64 {
        self.id.get()
    }

    pub fn elements(&self) -> u32 {
        self.elements
    }
}

pub trait GpuDevice {
    /// Allocates a shader-readable buffer of `elements` float4 values.
    fn create_buffer(&mut self, label: &str, elements: u32) -> Result<BufferHandle, DeviceError>;

    /// Writes the whole buffer.
    fn upload(&mut self, handle: BufferHandle, data: &[Float4]) -> Result<(), DeviceError>;

    fn release_buffer(&mut self, handle: BufferHandle);
}

#[derive(Debug)]
struct HostBuffer {
    label: String,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct HostMemory {
    next_id: u64,
    budget: Option<usize>,
    used: usize,
    buffers: HashMap<u64, HostBuffer>,
}

/// Device backed by process memory, with an optional byte budget.
///
/// Clones share the same memory so a test can keep one clone for inspection
/// while the presentation thread owns another.
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
    memory: Arc<Mutex<HostMemory>>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(bytes: usize) -> Self {
        let device = Self::default();
        device.lock().budget = Some(bytes);
        device
    }

    fn lock(&self) -> MutexGuard<'_, HostMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_budget(&self, bytes: Option<usize>) {
        self.lock().budget = bytes;
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }

    pub fn label(&self, handle: BufferHandle) -> Option<String> {
        self.lock()
            .buffers
            .get(&handle.id())
            .map(|b| b.label.clone())
    }

    /// Copies a buffer back out, if it is still alive.
    pub fn read(&self, handle: BufferHandle) -> Option<Vec<Float4>> {
        let memory = self.lock();
        let buffer = memory.buffers.get(&handle.id())?;
        buffer
            .data
            .chunks_exact(FLOAT4_SIZE)
            .map(|chunk| Float4::read_from_bytes(chunk).ok())
            .collect()
    }
}

impl GpuDevice for HostDevice {
    fn create_buffer(&mut self, label: &str, elements: u32) -> Result<BufferHandle, DeviceError> {
        let mut memory = self.lock();
        let size = elements as usize * FLOAT4_SIZE;
        if let Some(budget) = memory.budget {
            let available = budget.saturating_sub(memory.used);
            if size > available {
                return Err(DeviceError::OutOfMemory {
                    requested: size,
                    available,
                });
            }
        }

        memory.next_id += 1;
        let id = NonZeroU64::new(memory.next_id).ok_or(DeviceError::Lost)?;
        memory.used += size;
        memory.buffers.insert(
            id.get(),
            HostBuffer {
                label: label.to_string(),
                data: vec![0; size],
            },
        );
        Ok(BufferHandle { id, elements })
    }

    fn upload(&mut self, handle: BufferHandle, data: &[Float4]) -> Result<(), DeviceError> {
        let mut memory = self.lock();
        let buffer = memory
            .buffers
            .get_mut(&handle.id())
            .ok_or(DeviceError::InvalidHandle(handle.id()))?;
        let bytes = data.as_bytes();
        if bytes.len() != buffer.data.len() {
            return Err(DeviceError::SizeMismatch {
                expected: buffer.data.len(),
                actual: bytes.len(),
            });
        }
        buffer.data.copy_from_slice(bytes);
        Ok(())
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        let mut memory = self.lock();
        if let Some(buffer) = memory.buffers.remove(&handle.id()) {
            memory.used -= buffer.data.len();
        }
    }
}
