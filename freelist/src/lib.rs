//! # freelist
//!
//! A fixed-capacity slab allocator over a single contiguous region whose
//! size is chosen at compile time.
//!
//! ## Design Philosophy
//!
//! The container occupies exactly `SIZE` bytes, control header included,
//! and never touches the general heap on the allocation path. Free slots
//! link into a LIFO stack threaded *through the slot memory itself*, so
//! the only bookkeeping is one packed control word:
//! `(next, free, count, tag)`.
//!
//! ## Allocation Priority
//!
//! 1. **Freelist** pop (LIFO, cache-hot)
//! 2. **Bump** from the never-used tail (sequential)
//! 3. [`Exhausted`] - capacity is a hard bound
//!
//! Both paths are a single CAS on the control word. The `tag` field is
//! bumped on every publication and participates in the compare, which
//! defeats the classic free-list ABA without hazard pointers or epochs.
//!
//! ## Example
//!
//! ```rust
//! use freelist::{free_list, FreeList};
//!
//! let list: free_list!(u64, 256) = FreeList::new();
//!
//! let ptr = list.alloc(42).unwrap();
//! assert_eq!(unsafe { *ptr.as_ref() }, 42);
//! assert_eq!(list.len(), 1);
//!
//! // Freeing is unsafe: the pointer must come from this list and must
//! // not be used afterwards.
//! unsafe { list.free(ptr) };
//! assert!(list.is_empty());
//! ```

#![warn(missing_docs)]

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

pub mod layout;

mod alloc;
mod handle;

pub use self::alloc::SlotAlloc;
pub use self::handle::FreeBox;
pub use layout::{IndexWidth, RegionLayout, Width};

use layout::{Ctrl, NIL};

// =============================================================================
// Errors
// =============================================================================

/// Returned when allocating from a full free list.
///
/// Carries back whatever the caller passed in - the value for
/// [`FreeList::alloc`], the initializer for [`FreeList::alloc_with`].
#[derive(Debug)]
pub struct Exhausted<V>(
    /// The value or initializer that could not be placed.
    pub V,
);

// =============================================================================
// Type macro
// =============================================================================

/// Expands to the [`FreeList`] type for `(T, SIZE)` with the index width
/// computed from `SIZE`.
///
/// `SIZE` must be a literal or a non-generic constant expression.
///
/// ```rust
/// use freelist::{free_list, FreeList};
///
/// let list: free_list!(f64, 80) = FreeList::new();
/// assert!(list.capacity() >= 8);
/// ```
#[macro_export]
macro_rules! free_list {
    ($elem:ty, $size:expr) => {
        $crate::FreeList<$elem, { $size }, { $crate::layout::index_width($size) }>
    };
}

// =============================================================================
// FreeList
// =============================================================================

/// A fixed-capacity, lock-free slab allocator occupying exactly `SIZE`
/// bytes.
///
/// `WIDTH` is the index width in bytes and must equal
/// [`layout::index_width`]`(SIZE)`; use the [`free_list!`] macro to spell
/// the type without computing it by hand. Mismatches and impossible
/// layouts (no room for elements, `SIZE` not a multiple of the slot size)
/// are rejected when the type is instantiated.
///
/// [`alloc`](Self::alloc) and [`free`](Self::free) are lock-free and may
/// be called concurrently through a shared reference. [`clear`](Self::clear)
/// requires `&mut self`, so exclusive teardown is enforced by the borrow
/// checker rather than by contract prose.
#[repr(C)]
pub struct FreeList<T, const SIZE: usize, const WIDTH: usize = 2>
where
    Width<WIDTH>: IndexWidth,
{
    _elem_align: [T; 0],
    _control_align: [<Width<WIDTH> as IndexWidth>::Control; 0],
    storage: UnsafeCell<[MaybeUninit<u8>; SIZE]>,
    _owns: PhantomData<T>,
}

// Values move in on one thread and may be dropped on another, so both
// auto-traits bound on T: Send. The container never shares &T itself.
unsafe impl<T: Send, const SIZE: usize, const WIDTH: usize> Send for FreeList<T, SIZE, WIDTH> where
    Width<WIDTH>: IndexWidth
{
}
unsafe impl<T: Send, const SIZE: usize, const WIDTH: usize> Sync for FreeList<T, SIZE, WIDTH> where
    Width<WIDTH>: IndexWidth
{
}

impl<T, const SIZE: usize, const WIDTH: usize> FreeList<T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    /// Memory layout derived for this parameterization.
    ///
    /// Referencing this constant is what triggers the compile-time layout
    /// checks; every constructor does.
    pub const LAYOUT: RegionLayout = RegionLayout::compute(
        SIZE,
        mem::size_of::<T>(),
        mem::align_of::<T>(),
        WIDTH,
        <Width<WIDTH> as IndexWidth>::CONTROL_SIZE,
        <Width<WIDTH> as IndexWidth>::CONTROL_ALIGN,
    );

    const SLOT_SIZE: usize = Self::LAYOUT.slot_size;
    const SLOT_COUNT: usize = Self::LAYOUT.slot_count;
    const HEADER_SLOTS: usize = Self::LAYOUT.header_slots;
    const CAPACITY: usize = Self::LAYOUT.capacity;

    const SIZE_CHECK: () = assert!(
        mem::size_of::<Self>() == SIZE,
        "container size must equal SIZE exactly"
    );

    /// Create an empty free list.
    pub fn new() -> Self {
        let _ = Self::SIZE_CHECK;

        let list = Self {
            _elem_align: [],
            _control_align: [],
            storage: UnsafeCell::new([MaybeUninit::uninit(); SIZE]),
            _owns: PhantomData,
        };

        let word = Ctrl {
            next: Self::HEADER_SLOTS as u64,
            free: 0,
            count: 0,
            tag: 0,
        }
        .pack(WIDTH);
        // Plain write: the value is not shared yet.
        unsafe { Width::<WIDTH>::init_control(list.storage.get() as *mut u8, word) };

        list
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Number of currently live elements.
    ///
    /// Under concurrent use the value was exact at some instant during the
    /// call; callers needing a stable count must provide their own
    /// barrier.
    #[inline]
    pub fn len(&self) -> usize {
        let word = Width::<WIDTH>::load_control(self.control(), Ordering::Acquire);
        Ctrl::unpack(word, WIDTH).count as usize
    }

    /// Returns true if no elements are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if every slot is live.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= Self::CAPACITY
    }

    /// Maximum number of simultaneously live elements (compile-time).
    #[inline]
    pub const fn capacity(&self) -> usize {
        Self::CAPACITY
    }

    // -------------------------------------------------------------------------
    // Typed operations
    // -------------------------------------------------------------------------

    /// Place `value` into a free slot and return a pointer to it.
    ///
    /// On exhaustion the value is handed back in [`Exhausted`]. The
    /// returned pointer stays valid until it is passed to
    /// [`free`](Self::free) or the container is cleared or dropped.
    pub fn alloc(&self, value: T) -> Result<NonNull<T>, Exhausted<T>> {
        let Some(index) = self.acquire_index() else {
            return Err(Exhausted(value));
        };
        let ptr = self.get(index);
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Like [`alloc`](Self::alloc), but the element is built in place by
    /// `init`.
    ///
    /// If `init` panics the slot is released before the panic propagates,
    /// leaving the container as it was (modulo the internal ABA tag).
    pub fn alloc_with<F>(&self, init: F) -> Result<NonNull<T>, Exhausted<F>>
    where
        F: FnOnce() -> T,
    {
        let Some(index) = self.acquire_index() else {
            return Err(Exhausted(init));
        };
        let guard = ReleaseOnDrop { list: self, index };
        let ptr = self.get(index);
        unsafe { ptr.as_ptr().write(init()) };
        mem::forget(guard);
        Ok(ptr)
    }

    /// Drop the element behind `ptr` and return its slot to the free
    /// list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`alloc`](Self::alloc) /
    /// [`alloc_with`](Self::alloc_with) on this same container, must not
    /// have been freed since, and must not be used afterwards. Freeing a
    /// foreign or stale pointer is a contract violation: debug builds
    /// assert, release builds corrupt the free chain.
    pub unsafe fn free(&self, ptr: NonNull<T>) {
        let index = self.index_of(ptr);
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
            self.release_index(index);
        }
    }

    /// Pointer to the slot at `index`.
    ///
    /// Pure address arithmetic; `index` must lie in the user slot range
    /// (debug-asserted). Whether the slot currently holds a live element
    /// is the caller's knowledge.
    #[inline]
    pub fn get(&self, index: usize) -> NonNull<T> {
        debug_assert!(
            index >= Self::HEADER_SLOTS && index < Self::SLOT_COUNT,
            "slot index out of range"
        );
        unsafe { NonNull::new_unchecked(self.slot_ptr(index) as *mut T) }
    }

    /// Slot index of `ptr`.
    ///
    /// Pure address arithmetic; `ptr` must point into this container at a
    /// slot boundary (debug-asserted).
    #[inline]
    pub fn index_of(&self, ptr: NonNull<T>) -> usize {
        let base = self.storage.get() as usize;
        let addr = ptr.as_ptr() as usize;
        debug_assert!(
            addr >= base && addr < base + SIZE,
            "pointer outside the container"
        );
        let offset = addr.wrapping_sub(base);
        debug_assert!(offset % Self::SLOT_SIZE == 0, "pointer not slot-aligned");
        offset / Self::SLOT_SIZE
    }

    /// Drop every live element and reset to the empty state.
    ///
    /// The live set is reconstructed by walking the free chain into a
    /// transient mark table (the only heap allocation in the crate, and a
    /// cold path). The walk is bounded at the slot count; a cycle - the
    /// footprint of a double free - fails hard here.
    pub fn clear(&mut self) {
        let word = Width::<WIDTH>::load_control(self.control(), Ordering::Relaxed);
        let current = Ctrl::unpack(word, WIDTH);

        if mem::needs_drop::<T>() {
            let mut is_free = vec![false; Self::SLOT_COUNT];
            let mut cursor = current.free as usize;
            let mut steps = 0;
            while cursor != NIL {
                assert!(
                    cursor >= Self::HEADER_SLOTS && cursor < Self::SLOT_COUNT,
                    "free chain escaped the slot range"
                );
                assert!(steps < Self::SLOT_COUNT, "free chain does not terminate");
                is_free[cursor] = true;
                steps += 1;
                cursor = Width::<WIDTH>::load_link(self.link(cursor)) as usize;
            }

            for index in Self::HEADER_SLOTS..current.next as usize {
                if !is_free[index] {
                    unsafe { ptr::drop_in_place(self.slot_ptr(index) as *mut T) };
                }
            }
        }

        let fresh = Ctrl {
            next: Self::HEADER_SLOTS as u64,
            free: 0,
            count: 0,
            tag: current.tag.wrapping_add(1),
        };
        Width::<WIDTH>::store_control(self.control(), fresh.pack(WIDTH), Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Raw slot manager
    // -------------------------------------------------------------------------

    /// Take a slot out of the free list without constructing anything in
    /// it.
    ///
    /// Returns `None` when the container is full. The slot's bytes are
    /// whatever they were; pairing with [`release_index`](Self::release_index)
    /// is the caller's job. This is the path the allocator adapter uses.
    pub fn acquire_index(&self) -> Option<usize> {
        let control = self.control();
        let mut word = Width::<WIDTH>::load_control(control, Ordering::Acquire);
        loop {
            let current = Ctrl::unpack(word, WIDTH);
            let (index, fresh) = if current.free != NIL as u64 {
                // Pop the free stack: the head slot stores its successor.
                let next_free = Width::<WIDTH>::load_link(self.link(current.free as usize));
                (
                    current.free,
                    Ctrl {
                        next: current.next,
                        free: next_free,
                        count: current.count + 1,
                        tag: current.tag.wrapping_add(1),
                    },
                )
            } else if (current.next as usize) < Self::SLOT_COUNT {
                // Bump a never-used slot.
                (
                    current.next,
                    Ctrl {
                        next: current.next + 1,
                        free: current.free,
                        count: current.count + 1,
                        tag: current.tag.wrapping_add(1),
                    },
                )
            } else {
                // Only a CAS'ed snapshot may report exhaustion; this one
                // was either freshly loaded or returned by a failed CAS.
                return None;
            };

            match Width::<WIDTH>::cas_control(control, word, fresh.pack(WIDTH)) {
                Ok(_) => return Some(index as usize),
                Err(observed) => word = observed,
            }
        }
    }

    /// Return the slot at `index` to the free list without dropping
    /// anything.
    ///
    /// # Safety
    ///
    /// `index` must have been handed out by
    /// [`acquire_index`](Self::acquire_index) (or be the index of a live
    /// element whose value has already been disposed of) and must not be
    /// released twice. Out-of-range indices are debug-asserted; a double
    /// release cycles the free chain, which is deliberately not detected
    /// here.
    pub unsafe fn release_index(&self, index: usize) {
        debug_assert!(
            index >= Self::HEADER_SLOTS && index < Self::SLOT_COUNT,
            "slot index out of range"
        );
        let control = self.control();
        let mut word = Width::<WIDTH>::load_control(control, Ordering::Acquire);
        loop {
            let current = Ctrl::unpack(word, WIDTH);
            debug_assert!(current.count > 0, "release with no live slots");

            // The link must be in place before the CAS publishes this slot
            // as the new head.
            Width::<WIDTH>::store_link(self.link(index), current.free);
            let fresh = Ctrl {
                next: current.next,
                free: index as u64,
                count: current.count.wrapping_sub(1),
                tag: current.tag.wrapping_add(1),
            };

            match Width::<WIDTH>::cas_control(control, word, fresh.pack(WIDTH)) {
                Ok(_) => return,
                Err(observed) => word = observed,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internal: storage access
    // -------------------------------------------------------------------------

    #[inline]
    fn control(&self) -> &<Width<WIDTH> as IndexWidth>::Control {
        // The header slots are reserved for exactly this overlay and the
        // region carries the control alignment.
        unsafe { &*(self.storage.get() as *const <Width<WIDTH> as IndexWidth>::Control) }
    }

    #[inline]
    pub(crate) fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < Self::SLOT_COUNT);
        unsafe { (self.storage.get() as *mut u8).add(index * Self::SLOT_SIZE) }
    }

    #[inline]
    fn link(&self, index: usize) -> &<Width<WIDTH> as IndexWidth>::Link {
        // Free slots hold their successor in the first WIDTH bytes. The
        // cell is atomic because a releasing thread may rewrite the head
        // link while an acquiring thread reads it; the tag-checked CAS
        // discards the stale read.
        unsafe { &*(self.slot_ptr(index) as *const <Width<WIDTH> as IndexWidth>::Link) }
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> Default for FreeList<T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> Drop for FreeList<T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> fmt::Debug for FreeList<T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("len", &self.len())
            .field("capacity", &Self::CAPACITY)
            .finish_non_exhaustive()
    }
}

/// Releases an acquired slot if the element initializer panics.
struct ReleaseOnDrop<'a, T, const SIZE: usize, const WIDTH: usize>
where
    Width<WIDTH>: IndexWidth,
{
    list: &'a FreeList<T, SIZE, WIDTH>,
    index: usize,
}

impl<T, const SIZE: usize, const WIDTH: usize> Drop for ReleaseOnDrop<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn drop(&mut self) {
        // The slot was acquired but never initialized; raw release only.
        unsafe { self.list.release_index(self.index) };
    }
}

// =============================================================================
// Tests
// =============================================================================
