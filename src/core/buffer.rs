//! Purpose: Typed access to a shared memory region with explicit memory ordering.
//! Exports: `AtomicBuffer`.
//! Role: The one place raw pointers into the mapped log are dereferenced.
//! Invariants: Scalar offsets are naturally aligned; the base pointer is page-aligned.
//! Invariants: Byte-range copies are only applied to regions not yet published
//! Invariants: to readers; cross-process visibility rides on the ordered accessors.
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU16, AtomicU8, Ordering};

/// A view over a shared region. Copying the view aliases the same bytes;
/// synchronisation is carried entirely by the ordering of the accessors.
#[derive(Clone, Copy, Debug)]
pub struct AtomicBuffer {
    ptr: *mut u8,
    capacity: usize,
}

unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// # Safety
    ///
    /// `ptr..ptr + capacity` must stay valid and mapped for the lifetime of
    /// every copy of this view, and must not be unmapped while any copy lives.
    pub unsafe fn new(ptr: *mut u8, capacity: usize) -> Self {
        Self { ptr, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sub-view over `offset..offset + length`.
    pub fn view(&self, offset: usize, length: usize) -> AtomicBuffer {
        assert!(
            offset.checked_add(length).is_some_and(|end| end <= self.capacity),
            "view out of bounds: offset={offset} length={length} capacity={}",
            self.capacity
        );
        AtomicBuffer {
            // Safety: bounds checked above, same mapping.
            ptr: unsafe { self.ptr.add(offset) },
            capacity: length,
        }
    }

    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        self.check(offset, 4);
        // Safety: in bounds, naturally aligned, mapped for the view's lifetime.
        unsafe { &*(self.ptr.add(offset) as *const AtomicI32) }
    }

    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        self.check(offset, 8);
        // Safety: as above.
        unsafe { &*(self.ptr.add(offset) as *const AtomicI64) }
    }

    fn atomic_u16(&self, offset: usize) -> &AtomicU16 {
        self.check(offset, 2);
        // Safety: as above.
        unsafe { &*(self.ptr.add(offset) as *const AtomicU16) }
    }

    fn atomic_u8(&self, offset: usize) -> &AtomicU8 {
        self.check(offset, 1);
        // Safety: as above.
        unsafe { &*(self.ptr.add(offset) as *const AtomicU8) }
    }

    #[inline]
    fn check(&self, offset: usize, length: usize) {
        debug_assert!(
            offset % length == 0,
            "misaligned access: offset={offset} length={length}"
        );
        debug_assert!(
            offset + length <= self.capacity,
            "access out of bounds: offset={offset} length={length} capacity={}",
            self.capacity
        );
    }

    pub fn get_i32(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Relaxed)
    }

    pub fn put_i32(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Relaxed);
    }

    pub fn get_i32_volatile(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Acquire)
    }

    pub fn put_i32_ordered(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Release);
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Relaxed)
    }

    pub fn put_i64(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Relaxed);
    }

    pub fn get_i64_volatile(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Acquire)
    }

    pub fn put_i64_ordered(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Release);
    }

    /// Linearises concurrent reservations; returns the previous value.
    pub fn get_and_add_i64(&self, offset: usize, delta: i64) -> i64 {
        self.atomic_i64(offset).fetch_add(delta, Ordering::AcqRel)
    }

    pub fn compare_and_set_i32(&self, offset: usize, expected: i32, update: i32) -> bool {
        self.atomic_i32(offset)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn compare_and_set_i64(&self, offset: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(offset)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        self.atomic_u16(offset).load(Ordering::Relaxed)
    }

    pub fn put_u16(&self, offset: usize, value: u16) {
        self.atomic_u16(offset).store(value, Ordering::Relaxed);
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        self.atomic_u8(offset).load(Ordering::Relaxed)
    }

    pub fn put_u8(&self, offset: usize, value: u8) {
        self.atomic_u8(offset).store(value, Ordering::Relaxed);
    }

    /// Copy bytes into an unpublished region.
    pub fn put_bytes(&self, offset: usize, src: &[u8]) {
        assert!(
            offset.checked_add(src.len()).is_some_and(|end| end <= self.capacity),
            "put_bytes out of bounds: offset={offset} length={} capacity={}",
            src.len(),
            self.capacity
        );
        // Safety: bounds checked; region is unpublished so no reader races.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len()) }
    }

    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) {
        assert!(
            offset.checked_add(dst.len()).is_some_and(|end| end <= self.capacity),
            "get_bytes out of bounds: offset={offset} length={} capacity={}",
            dst.len(),
            self.capacity
        );
        // Safety: bounds checked.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Borrow an unpublished byte range for in-place writing.
    pub fn bytes_at_mut(&self, offset: usize, length: usize) -> &mut [u8] {
        assert!(
            offset.checked_add(length).is_some_and(|end| end <= self.capacity),
            "bytes_at_mut out of bounds: offset={offset} length={length} capacity={}",
            self.capacity
        );
        // Safety: bounds checked; callers only hand out ranges they own
        // exclusively between reservation and publish.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(offset), length) }
    }

    pub fn bytes_at(&self, offset: usize, length: usize) -> &[u8] {
        assert!(
            offset.checked_add(length).is_some_and(|end| end <= self.capacity),
            "bytes_at out of bounds: offset={offset} length={length} capacity={}",
            self.capacity
        );
        // Safety: bounds checked.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), length) }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::AlignedStorage;

    #[test]
    fn scalar_round_trips() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        buffer.put_i32(0, -7);
        assert_eq!(buffer.get_i32(0), -7);

        buffer.put_i64(8, i64::MAX - 1);
        assert_eq!(buffer.get_i64_volatile(8), i64::MAX - 1);

        buffer.put_u16(16, 0xBEEF);
        assert_eq!(buffer.get_u16(16), 0xBEEF);

        buffer.put_u8(18, 0xC0);
        assert_eq!(buffer.get_u8(18), 0xC0);
    }

    #[test]
    fn ordered_store_is_visible_to_volatile_load() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        buffer.put_i32_ordered(0, 4096);
        assert_eq!(buffer.get_i32_volatile(0), 4096);
    }

    #[test]
    fn get_and_add_returns_previous_value() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        buffer.put_i64(0, 100);
        assert_eq!(buffer.get_and_add_i64(0, 32), 100);
        assert_eq!(buffer.get_and_add_i64(0, 32), 132);
        assert_eq!(buffer.get_i64(0), 164);
    }

    #[test]
    fn compare_and_set_only_succeeds_on_expected() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        buffer.put_i64(0, 5);
        assert!(!buffer.compare_and_set_i64(0, 4, 9));
        assert_eq!(buffer.get_i64(0), 5);
        assert!(buffer.compare_and_set_i64(0, 5, 9));
        assert_eq!(buffer.get_i64(0), 9);

        buffer.put_i32(16, 2);
        assert!(!buffer.compare_and_set_i32(16, 1, 3));
        assert!(buffer.compare_and_set_i32(16, 2, 3));
        assert_eq!(buffer.get_i32(16), 3);
    }

    #[test]
    fn byte_copies_round_trip() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        buffer.put_bytes(8, b"termlog");
        let mut out = [0u8; 7];
        buffer.get_bytes(8, &mut out);
        assert_eq!(&out, b"termlog");
        assert_eq!(buffer.bytes_at(8, 7), b"termlog");
    }

    #[test]
    fn view_narrows_capacity() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();

        let view = buffer.view(32, 16);
        assert_eq!(view.capacity(), 16);
        view.put_i32(0, 11);
        assert_eq!(buffer.get_i32(32), 11);
    }

    #[test]
    #[should_panic(expected = "view out of bounds")]
    fn view_rejects_overflow() {
        let mut storage = AlignedStorage::<64>::new();
        let buffer = storage.buffer();
        let _ = buffer.view(60, 8);
    }
}
