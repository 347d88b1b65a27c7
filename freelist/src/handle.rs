//! Owning handle over an allocated slot.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::{Exhausted, FreeList, IndexWidth, Width};

/// An owned slot in a [`FreeList`], freed on drop.
///
/// The element analog of `Box`: dereferences to the element and returns
/// the slot (running the element's destructor) when dropped. Because it
/// borrows the list, a handle can never outlive its container.
pub struct FreeBox<'a, T, const SIZE: usize, const WIDTH: usize>
where
    Width<WIDTH>: IndexWidth,
{
    list: &'a FreeList<T, SIZE, WIDTH>,
    ptr: NonNull<T>,
}

impl<T, const SIZE: usize, const WIDTH: usize> FreeList<T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    /// Place `value` into a free slot and return an owning handle to it.
    ///
    /// The handle frees the slot when dropped, so unlike
    /// [`alloc`](Self::alloc) there is no unsafe obligation to discharge.
    pub fn alloc_box(&self, value: T) -> Result<FreeBox<'_, T, SIZE, WIDTH>, Exhausted<T>> {
        let ptr = self.alloc(value)?;
        Ok(FreeBox { list: self, ptr })
    }
}

impl<'a, T, const SIZE: usize, const WIDTH: usize> FreeBox<'a, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    /// The underlying slot pointer.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Move the element out, returning its slot to the list.
    pub fn into_inner(self) -> T {
        let value = unsafe { self.ptr.as_ptr().read() };
        let index = self.list.index_of(self.ptr);
        unsafe { self.list.release_index(index) };
        mem::forget(self);
        value
    }

    /// Give up ownership without freeing the slot.
    ///
    /// The element stays live; the caller takes over the obligation to
    /// eventually pass the pointer to [`FreeList::free`].
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> Deref for FreeBox<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // The handle exclusively owns the slot until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> DerefMut for FreeBox<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, const SIZE: usize, const WIDTH: usize> Drop for FreeBox<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn drop(&mut self) {
        unsafe { self.list.free(self.ptr) };
    }
}

impl<T: fmt::Debug, const SIZE: usize, const WIDTH: usize> fmt::Debug
    for FreeBox<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// Dropping on another thread moves the element there; sharing the handle
// shares &T.
unsafe impl<T: Send, const SIZE: usize, const WIDTH: usize> Send for FreeBox<'_, T, SIZE, WIDTH> where
    Width<WIDTH>: IndexWidth
{
}
unsafe impl<T: Send + Sync, const SIZE: usize, const WIDTH: usize> Sync
    for FreeBox<'_, T, SIZE, WIDTH>
where
    Width<WIDTH>: IndexWidth,
{
}
