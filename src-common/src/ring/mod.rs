//! Shared-memory frame ring between the capture worker and the console.
//!
//! Memory layout:
//! ```text
//! ┌──────────────────────────────┬──────────┬──────────┬─────┬──────────────┐
//! │ RingHeader (padded to 64 B)  │ slot 0   │ slot 1   │ ... │ slot N-1     │
//! │ shape, flags, slot states    │ W*H*C B  │ W*H*C B  │     │ W*H*C B      │
//! └──────────────────────────────┴──────────┴──────────┴─────┴──────────────┘
//! ```
//!
//! Every slot carries a state word (`FREE`, `WRITING`, `READING`) that the
//! writer and the reader acquire by compare-and-swap before touching the
//! slot's bytes, so a reader never observes a half-written frame. The writer
//! publishes `(sequence << 8) | slot` after each completed write; readers
//! start from that word to find the freshest frame.
//!
//! The header also holds the cross-process flags: the streaming flag
//! (continuation condition of the capture loop), the pending-save word, and
//! the worker's lifecycle status. The pending-save word holds the id of the
//! save request that owns it (0 when free), so only that request's owner can
//! release it.

mod shm;

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::{FrameShape, WorkerStatus};
use shm::SharedMapping;

pub use shm::MAX_NAME_LEN;

/// Upper bound on the number of slots a ring can hold.
pub const MAX_SLOTS: usize = 8;

const RING_MAGIC: u64 = 0x504c_4f54_4341_4d31; // "PLOTCAM1"
const RING_VERSION: u32 = 2;

const SLOT_FREE: u32 = 0;
const SLOT_WRITING: u32 = 1;
const SLOT_READING: u32 = 2;

const SLOT_BITS: u64 = 8;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

#[repr(C)]
struct RingHeader {
    magic: u64,
    version: u32,
    slot_count: u32,
    width: u32,
    height: u32,
    channels: u32,
    streaming: AtomicU32,
    pending_save: AtomicU64,
    worker_status: AtomicU32,
    published: AtomicU64,
    slot_state: [AtomicU32; MAX_SLOTS],
    slot_sequence: [AtomicU64; MAX_SLOTS],
}

/// Offset of slot 0 from the start of the mapping.
const DATA_OFFSET: usize = (size_of::<RingHeader>() + 63) & !63;

/// Error type for frame ring operations.
#[derive(Debug)]
pub enum RingError {
    /// Shared memory could not be created, opened or mapped
    Io(std::io::Error),
    /// Shared memory name is malformed
    InvalidName(String),
    /// Frame shape has a zero dimension
    InvalidShape(FrameShape),
    /// Slot count is zero or above [`MAX_SLOTS`]
    InvalidSlotCount(usize),
    /// The mapped object was not created by a compatible ring
    Incompatible(String),
    /// Slot index is outside the ring
    SlotOutOfRange { slot: usize, slot_count: usize },
    /// Frame buffer length does not match the ring's frame size
    FrameSizeMismatch { expected: usize, actual: usize },
    /// The other side currently holds the slot
    SlotBusy(usize),
    /// Nothing has been written to the slot yet
    SlotEmpty(usize),
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Io(e) => write!(f, "Shared memory error: {}", e),
            RingError::InvalidName(msg) => write!(f, "{}", msg),
            RingError::InvalidShape(shape) => write!(
                f,
                "Invalid frame shape: {}x{}x{}",
                shape.width, shape.height, shape.channels
            ),
            RingError::InvalidSlotCount(count) => {
                write!(f, "Invalid slot count: {} (must be 1..={})", count, MAX_SLOTS)
            }
            RingError::Incompatible(msg) => write!(f, "Incompatible frame ring: {}", msg),
            RingError::SlotOutOfRange { slot, slot_count } => {
                write!(f, "Slot {} out of range (ring has {} slots)", slot, slot_count)
            }
            RingError::FrameSizeMismatch { expected, actual } => write!(
                f,
                "Frame size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            RingError::SlotBusy(slot) => write!(f, "Slot {} is busy", slot),
            RingError::SlotEmpty(slot) => write!(f, "Slot {} holds no frame yet", slot),
        }
    }
}

impl std::error::Error for RingError {}

impl From<std::io::Error> for RingError {
    fn from(e: std::io::Error) -> Self {
        RingError::Io(e)
    }
}

/// A fixed-capacity ring of raw colour frames in shared memory.
pub struct FrameRing {
    map: SharedMapping,
    name: String,
    shape: FrameShape,
    slot_count: usize,
}

impl FrameRing {
    /// Allocate a new ring of `slot_count` frames of `shape`.
    ///
    /// The returned ring owns the shared-memory name and unlinks it on drop.
    pub fn create(name: &str, slot_count: usize, shape: FrameShape) -> Result<Self, RingError> {
        if slot_count == 0 || slot_count > MAX_SLOTS {
            return Err(RingError::InvalidSlotCount(slot_count));
        }
        if shape.bytes_per_frame() == 0 {
            return Err(RingError::InvalidShape(shape));
        }

        let c_name = shm::object_name(name).map_err(RingError::InvalidName)?;
        let len = DATA_OFFSET + slot_count * shape.bytes_per_frame();
        let map = SharedMapping::create(c_name, len)?;

        // The object is zero-filled: every atomic starts at 0 (FREE, not
        // streaming, nothing published). Only the static fields need writing.
        let header = map.as_ptr() as *mut RingHeader;
        unsafe {
            std::ptr::addr_of_mut!((*header).version).write(RING_VERSION);
            std::ptr::addr_of_mut!((*header).slot_count).write(slot_count as u32);
            std::ptr::addr_of_mut!((*header).width).write(shape.width);
            std::ptr::addr_of_mut!((*header).height).write(shape.height);
            std::ptr::addr_of_mut!((*header).channels).write(shape.channels);
            std::ptr::addr_of_mut!((*header).magic).write(RING_MAGIC);
        }

        tracing::debug!(
            "Allocated frame ring {}: {} x {} bytes",
            name,
            slot_count,
            shape.bytes_per_frame()
        );

        Ok(Self {
            name: display_name(&map),
            map,
            shape,
            slot_count,
        })
    }

    /// Attach to a ring created by another process.
    pub fn attach(name: &str) -> Result<Self, RingError> {
        let c_name = shm::object_name(name).map_err(RingError::InvalidName)?;
        let map = SharedMapping::open(c_name)?;

        if map.len() < DATA_OFFSET {
            return Err(RingError::Incompatible(format!(
                "mapping is {} bytes, header needs {}",
                map.len(),
                DATA_OFFSET
            )));
        }

        let header = unsafe { &*(map.as_ptr() as *const RingHeader) };
        if header.magic != RING_MAGIC {
            return Err(RingError::Incompatible("bad magic".to_string()));
        }
        if header.version != RING_VERSION {
            return Err(RingError::Incompatible(format!(
                "version {} (expected {})",
                header.version, RING_VERSION
            )));
        }

        let slot_count = header.slot_count as usize;
        if slot_count == 0 || slot_count > MAX_SLOTS {
            return Err(RingError::InvalidSlotCount(slot_count));
        }
        let shape = FrameShape::new(header.width, header.height, header.channels);
        let expected = DATA_OFFSET + slot_count * shape.bytes_per_frame();
        if map.len() < expected {
            return Err(RingError::Incompatible(format!(
                "mapping is {} bytes, layout needs {}",
                map.len(),
                expected
            )));
        }

        Ok(Self {
            name: display_name(&map),
            map,
            shape,
            slot_count,
        })
    }

    /// Generate a name unlikely to collide with other rings on this host.
    pub fn unique_name() -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("/plotcam-{}-{}", std::process::id(), n)
    }

    /// Whether a shared-memory object with this name exists.
    pub fn exists(name: &str) -> bool {
        match shm::object_name(name) {
            Ok(c_name) => SharedMapping::exists(&c_name),
            Err(_) => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shape.bytes_per_frame()
    }

    /// Whether this handle unlinks the shared memory when dropped.
    pub fn is_owner(&self) -> bool {
        self.map.is_owner()
    }

    // === Flags ===

    /// Set the streaming flag. Clearing it asks the worker to stop.
    pub fn set_streaming(&self, streaming: bool) {
        self.header()
            .streaming
            .store(streaming as u32, Ordering::SeqCst);
    }

    /// Continuation condition of the capture loop.
    pub fn is_streaming(&self) -> bool {
        self.header().streaming.load(Ordering::SeqCst) != 0
    }

    /// Claim the pending-save word for `request_id`.
    ///
    /// Returns `false` if another request holds it. Id 0 marks the word as
    /// free and can never be claimed.
    pub fn try_claim_pending(&self, request_id: u64) -> bool {
        request_id != 0
            && self
                .header()
                .pending_save
                .compare_exchange(0, request_id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Release the pending-save word if `request_id` still holds it.
    ///
    /// Returns `false` when the word is free or held by another request,
    /// which is left untouched.
    pub fn release_pending(&self, request_id: u64) -> bool {
        request_id != 0
            && self
                .header()
                .pending_save
                .compare_exchange(request_id, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Id of the request holding the pending-save word.
    pub fn pending_request(&self) -> Option<u64> {
        match self.header().pending_save.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_request().is_some()
    }

    pub fn set_worker_status(&self, status: WorkerStatus) {
        self.header()
            .worker_status
            .store(status as u32, Ordering::SeqCst);
    }

    pub fn worker_status(&self) -> WorkerStatus {
        let raw = self.header().worker_status.load(Ordering::SeqCst);
        WorkerStatus::from_u32(raw).unwrap_or(WorkerStatus::Starting)
    }

    // === Frames ===

    /// Copy `frame` into `slot` and publish it as the newest frame.
    ///
    /// Returns the frame's sequence number, or [`RingError::SlotBusy`] if the
    /// reader currently holds the slot. Only one process may write.
    pub fn write(&self, slot: usize, frame: &[u8]) -> Result<u64, RingError> {
        self.check_slot(slot)?;
        if frame.len() != self.bytes_per_frame() {
            return Err(RingError::FrameSizeMismatch {
                expected: self.bytes_per_frame(),
                actual: frame.len(),
            });
        }

        let header = self.header();
        let state = &header.slot_state[slot];
        state
            .compare_exchange(SLOT_FREE, SLOT_WRITING, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| RingError::SlotBusy(slot))?;

        unsafe {
            std::ptr::copy_nonoverlapping(frame.as_ptr(), self.slot_ptr(slot), frame.len());
        }

        let sequence = (header.published.load(Ordering::Relaxed) >> SLOT_BITS) + 1;
        header.slot_sequence[slot].store(sequence, Ordering::Relaxed);
        state.store(SLOT_FREE, Ordering::Release);
        header
            .published
            .store((sequence << SLOT_BITS) | slot as u64, Ordering::Release);

        Ok(sequence)
    }

    /// Copy the frame held by `slot` into `out`.
    ///
    /// Returns the frame's sequence number. Fails with
    /// [`RingError::SlotBusy`] while the writer holds the slot.
    pub fn read(&self, slot: usize, out: &mut [u8]) -> Result<u64, RingError> {
        self.check_slot(slot)?;
        if out.len() != self.bytes_per_frame() {
            return Err(RingError::FrameSizeMismatch {
                expected: self.bytes_per_frame(),
                actual: out.len(),
            });
        }

        let header = self.header();
        let state = &header.slot_state[slot];
        state
            .compare_exchange(SLOT_FREE, SLOT_READING, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| RingError::SlotBusy(slot))?;

        let sequence = header.slot_sequence[slot].load(Ordering::Relaxed);
        if sequence != 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(self.slot_ptr(slot), out.as_mut_ptr(), out.len());
            }
        }
        state.store(SLOT_FREE, Ordering::Release);

        if sequence == 0 {
            return Err(RingError::SlotEmpty(slot));
        }
        Ok(sequence)
    }

    /// The most recently published `(sequence, slot)`, if any frame exists.
    pub fn latest(&self) -> Option<(u64, usize)> {
        let word = self.header().published.load(Ordering::Acquire);
        if word == 0 {
            return None;
        }
        Some((word >> SLOT_BITS, (word & SLOT_MASK) as usize))
    }

    /// Copy the most recently published frame into `out`.
    ///
    /// Returns `Ok(None)` if nothing was published yet.
    pub fn read_latest(&self, out: &mut [u8]) -> Result<Option<u64>, RingError> {
        match self.latest() {
            Some((_, slot)) => self.read(slot, out).map(Some),
            None => Ok(None),
        }
    }

    /// Whether the reader or the writer currently holds `slot`.
    pub fn is_slot_busy(&self, slot: usize) -> bool {
        slot < self.slot_count
            && self.header().slot_state[slot].load(Ordering::Acquire) != SLOT_FREE
    }

    fn check_slot(&self, slot: usize) -> Result<(), RingError> {
        if slot >= self.slot_count {
            return Err(RingError::SlotOutOfRange {
                slot,
                slot_count: self.slot_count,
            });
        }
        Ok(())
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*(self.map.as_ptr() as *const RingHeader) }
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        unsafe {
            self.map
                .as_ptr()
                .add(DATA_OFFSET + slot * self.bytes_per_frame())
        }
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("slot_count", &self.slot_count)
            .field("owner", &self.is_owner())
            .finish()
    }
}

fn display_name(map: &SharedMapping) -> String {
    map.name().to_string_lossy().into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_header_fits_before_data() {
        assert!(DATA_OFFSET >= size_of::<RingHeader>());
        assert_eq!(DATA_OFFSET % 64, 0);
    }

    #[test]
    fn test_write_then_read_returns_same_bytes() {
        let shapes = [
            FrameShape::new(1, 1, 1),
            FrameShape::new(4, 3, 3),
            FrameShape::new(17, 9, 3),
            FrameShape::new(64, 48, 4),
        ];
        for slots in 1..=4 {
            for shape in shapes {
                let ring = FrameRing::create(&FrameRing::unique_name(), slots, shape).unwrap();
                let mut out = vec![0u8; shape.bytes_per_frame()];
                for slot in 0..slots {
                    let frame = pattern(shape.bytes_per_frame(), slot as u8);
                    ring.write(slot, &frame).unwrap();
                    ring.read(slot, &mut out).unwrap();
                    assert_eq!(out, frame, "slots={} shape={:?} slot={}", slots, shape, slot);
                }
            }
        }
    }

    #[test]
    fn test_read_latest_follows_publication() {
        let shape = FrameShape::new(8, 8, 3);
        let ring = FrameRing::create(&FrameRing::unique_name(), 2, shape).unwrap();
        let mut out = vec![0u8; shape.bytes_per_frame()];

        assert_eq!(ring.read_latest(&mut out).unwrap(), None);

        let first = pattern(shape.bytes_per_frame(), 1);
        let second = pattern(shape.bytes_per_frame(), 2);
        assert_eq!(ring.write(0, &first).unwrap(), 1);
        assert_eq!(ring.write(1, &second).unwrap(), 2);

        assert_eq!(ring.latest(), Some((2, 1)));
        assert_eq!(ring.read_latest(&mut out).unwrap(), Some(2));
        assert_eq!(out, second);
    }

    #[test]
    fn test_unwritten_slot_is_empty() {
        let shape = FrameShape::new(2, 2, 3);
        let ring = FrameRing::create(&FrameRing::unique_name(), 2, shape).unwrap();
        let mut out = vec![0u8; shape.bytes_per_frame()];
        assert!(matches!(ring.read(1, &mut out), Err(RingError::SlotEmpty(1))));
        assert!(!ring.is_slot_busy(1));
    }

    #[test]
    fn test_busy_slot_rejects_writer() {
        let shape = FrameShape::new(2, 2, 3);
        let ring = FrameRing::create(&FrameRing::unique_name(), 1, shape).unwrap();
        let frame = pattern(shape.bytes_per_frame(), 0);

        // Simulate the reader holding the slot.
        ring.header().slot_state[0].store(SLOT_READING, Ordering::SeqCst);
        assert!(ring.is_slot_busy(0));
        assert!(matches!(ring.write(0, &frame), Err(RingError::SlotBusy(0))));

        ring.header().slot_state[0].store(SLOT_FREE, Ordering::SeqCst);
        assert!(ring.write(0, &frame).is_ok());
    }

    #[test]
    fn test_writer_holding_slot_blocks_reader() {
        let shape = FrameShape::new(2, 2, 3);
        let ring = FrameRing::create(&FrameRing::unique_name(), 1, shape).unwrap();
        ring.write(0, &pattern(shape.bytes_per_frame(), 0)).unwrap();

        ring.header().slot_state[0].store(SLOT_WRITING, Ordering::SeqCst);
        let mut out = vec![0u8; shape.bytes_per_frame()];
        assert!(matches!(ring.read(0, &mut out), Err(RingError::SlotBusy(0))));
    }

    #[test]
    fn test_rejects_wrong_frame_size_and_slot() {
        let shape = FrameShape::new(2, 2, 3);
        let ring = FrameRing::create(&FrameRing::unique_name(), 1, shape).unwrap();
        assert!(matches!(
            ring.write(0, &[0u8; 5]),
            Err(RingError::FrameSizeMismatch { expected: 12, actual: 5 })
        ));
        assert!(matches!(
            ring.write(1, &[0u8; 12]),
            Err(RingError::SlotOutOfRange { slot: 1, slot_count: 1 })
        ));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let name = FrameRing::unique_name();
        assert!(matches!(
            FrameRing::create(&name, 0, FrameShape::new(2, 2, 3)),
            Err(RingError::InvalidSlotCount(0))
        ));
        assert!(matches!(
            FrameRing::create(&name, MAX_SLOTS + 1, FrameShape::new(2, 2, 3)),
            Err(RingError::InvalidSlotCount(_))
        ));
        assert!(matches!(
            FrameRing::create(&name, 1, FrameShape::new(0, 2, 3)),
            Err(RingError::InvalidShape(_))
        ));
        assert!(!FrameRing::exists(&name));
    }

    #[test]
    fn test_attach_shares_frames_and_flags() {
        let shape = FrameShape::new(6, 4, 3);
        let owner = FrameRing::create(&FrameRing::unique_name(), 2, shape).unwrap();
        let attached = FrameRing::attach(owner.name()).unwrap();

        assert!(!attached.is_owner());
        assert_eq!(attached.shape(), shape);
        assert_eq!(attached.slot_count(), 2);

        owner.set_streaming(true);
        assert!(attached.is_streaming());

        let frame = pattern(shape.bytes_per_frame(), 9);
        attached.write(1, &frame).unwrap();
        let mut out = vec![0u8; shape.bytes_per_frame()];
        assert_eq!(owner.read_latest(&mut out).unwrap(), Some(1));
        assert_eq!(out, frame);

        attached.set_worker_status(WorkerStatus::Streaming);
        assert_eq!(owner.worker_status(), WorkerStatus::Streaming);
    }

    #[test]
    fn test_pending_word_is_claimed_once() {
        let ring = FrameRing::create(&FrameRing::unique_name(), 1, FrameShape::new(1, 1, 3)).unwrap();
        assert!(ring.try_claim_pending(1));
        assert!(!ring.try_claim_pending(2));
        assert_eq!(ring.pending_request(), Some(1));
        assert!(ring.release_pending(1));
        assert!(!ring.is_pending());
        assert!(ring.try_claim_pending(2));
        assert!(!ring.try_claim_pending(0));
    }

    #[test]
    fn test_release_by_other_request_keeps_claim() {
        let owner = FrameRing::create(&FrameRing::unique_name(), 1, FrameShape::new(1, 1, 3)).unwrap();
        let worker = FrameRing::attach(owner.name()).unwrap();

        // Request 1 was abandoned and request 2 claimed the word since.
        assert!(owner.try_claim_pending(1));
        assert!(owner.release_pending(1));
        assert!(owner.try_claim_pending(2));

        assert!(!worker.release_pending(1));
        assert_eq!(owner.pending_request(), Some(2));
        assert!(worker.release_pending(2));
        assert!(!owner.is_pending());
    }

    #[test]
    fn test_owner_drop_unlinks() {
        let name = FrameRing::unique_name();
        let owner = FrameRing::create(&name, 1, FrameShape::new(1, 1, 3)).unwrap();
        let attached = FrameRing::attach(&name).unwrap();
        drop(attached);
        assert!(FrameRing::exists(&name));
        drop(owner);
        assert!(!FrameRing::exists(&name));
        assert!(matches!(FrameRing::attach(&name), Err(RingError::Io(_))));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let name = FrameRing::unique_name();
        let _owner = FrameRing::create(&name, 1, FrameShape::new(1, 1, 3)).unwrap();
        assert!(matches!(
            FrameRing::create(&name, 1, FrameShape::new(1, 1, 3)),
            Err(RingError::Io(_))
        ));
    }
}
