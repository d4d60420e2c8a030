//! Frame pool — counting allocator for fixed-capacity payload frames.
//!
//! A [`PayloadBuf`] is a credit against its pool plus a `heapless` byte
//! vector; dropping it anywhere returns the credit, so "free" is simply
//! letting the buffer go out of scope. Ownership moves with the frame
//! through the pending, in-flight and delivery queues — it is never shared.

use core::fmt;
use core::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Maximum payload bytes per frame.
pub const FRAME_CAP: usize = 1024;

/// Fixed-capacity frame storage.
pub type FrameBytes = heapless::Vec<u8, FRAME_CAP>;

/// Allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No frame credit available (within the wait bound, if any).
    Exhausted,
    /// Requested payload exceeds [`FRAME_CAP`].
    Oversize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "frame pool exhausted"),
            Self::Oversize => write!(f, "payload exceeds frame capacity"),
        }
    }
}

impl std::error::Error for AllocError {}

/// How long an allocation may block for a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Fail immediately when the pool is dry.
    NoWait,
    /// Block up to the given bound for a credit to be returned.
    Wait(Duration),
}

struct PoolShared {
    free: Mutex<usize>,
    returned: Condvar,
    capacity: usize,
}

/// Counting pool of frame credits.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(frames),
                returned: Condvar::new(),
                capacity: frames,
            }),
        }
    }

    /// Take one frame credit and hand out an empty buffer.
    pub fn allocate(&self, mode: AllocMode) -> Result<PayloadBuf, AllocError> {
        let mut free = self
            .shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if *free == 0 {
            match mode {
                AllocMode::NoWait => return Err(AllocError::Exhausted),
                AllocMode::Wait(limit) => {
                    let deadline = Instant::now() + limit;
                    while *free == 0 {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(AllocError::Exhausted);
                        }
                        let (guard, _) = self
                            .shared
                            .returned
                            .wait_timeout(free, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner);
                        free = guard;
                    }
                }
            }
        }

        *free -= 1;
        Ok(PayloadBuf {
            bytes: FrameBytes::new(),
            pool: Some(self.shared.clone()),
        })
    }

    /// Allocate and copy `data` into the frame.
    pub fn with_payload(&self, data: &[u8], mode: AllocMode) -> Result<PayloadBuf, AllocError> {
        if data.len() > FRAME_CAP {
            return Err(AllocError::Oversize);
        }
        let mut buf = self.allocate(mode)?;
        // Capacity checked above; extend cannot fail.
        let _ = buf.bytes.extend_from_slice(data);
        Ok(buf)
    }

    /// Credits currently available.
    pub fn available(&self) -> usize {
        *self
            .shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// One pooled payload frame. Dropping it returns the credit to its pool.
pub struct PayloadBuf {
    bytes: FrameBytes,
    pool: Option<Arc<PoolShared>>,
}

impl PayloadBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable access to the frame storage (pre-TX hooks stamp headers
    /// through this).
    pub fn bytes_mut(&mut self) -> &mut FrameBytes {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Deref for PayloadBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for PayloadBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadBuf({} bytes)", self.bytes.len())
    }
}

impl Drop for PayloadBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut free = pool.free.lock().unwrap_or_else(PoisonError::into_inner);
            *free += 1;
            drop(free);
            pool.returned.notify_one();
        }
    }
}
