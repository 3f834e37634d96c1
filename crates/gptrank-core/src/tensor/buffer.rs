use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{Result, ScoreError};

use super::LogitsView;

/// Byte alignment of every allocation (one cache line, two AVX registers).
pub const ALIGNMENT: usize = 64;

/// Contiguous, cache-line aligned `rows x cols` block of `f32`.
///
/// The allocation always holds exactly `rows * cols` elements. Reshaping to a
/// shape with the same element count reuses the allocation in place; any other
/// shape frees it and allocates fresh storage. The buffer is move-only.
pub struct AlignedBuffer {
    ptr: NonNull<f32>,
    len: usize,
    rows: usize,
    cols: usize,
}

// SAFETY: the buffer exclusively owns its allocation; no aliasing pointers escape
// except through borrows tied to `&self` / `&mut self`.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// An empty buffer with no allocation.
    pub const fn new() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            rows: 0,
            cols: 0,
        }
    }

    /// Allocate a `rows x cols` buffer, copying `source` into it when given.
    pub fn with_shape(rows: usize, cols: usize, source: Option<&[f32]>) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.copy_from(rows, cols, source)?;
        Ok(buffer)
    }

    /// Ensure storage for `rows * cols` elements and adopt that shape.
    ///
    /// Reallocates only when the element count changes. Freshly allocated
    /// storage is zeroed; reused storage keeps its previous contents. On
    /// failure the buffer keeps its previous allocation and shape.
    pub fn reserve(&mut self, rows: usize, cols: usize) -> Result<&mut [f32]> {
        let count = rows
            .checked_mul(cols)
            .ok_or(ScoreError::Allocation { rows, cols })?;
        if count != self.len {
            let fresh = allocate(count).ok_or(ScoreError::Allocation { rows, cols })?;
            self.release();
            self.ptr = fresh;
            self.len = count;
        }
        self.rows = rows;
        self.cols = cols;
        Ok(self.as_mut_slice())
    }

    /// Reserve `rows x cols` and bulk-copy `source` into the buffer.
    ///
    /// With `source == None` this only reserves. A source whose length is not
    /// `rows * cols` is rejected before the buffer is touched.
    pub fn copy_from(&mut self, rows: usize, cols: usize, source: Option<&[f32]>) -> Result<()> {
        if let Some(src) = source {
            let count = rows
                .checked_mul(cols)
                .ok_or(ScoreError::Allocation { rows, cols })?;
            if src.len() != count {
                return Err(ScoreError::mismatch("buffer source", count, src.len()));
            }
        }
        let dst = self.reserve(rows, cols)?;
        if let Some(src) = source {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Move the contents out, leaving `self` empty.
    pub fn take(&mut self) -> AlignedBuffer {
        std::mem::take(self)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the storage; stable for as long as no reallocation happens.
    pub fn as_ptr(&self) -> *const f32 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: `ptr` is valid for `len` initialized elements (zeroed on
        // allocation), or dangling with `len == 0`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: as in `as_slice`; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Row `index`, or `None` past the last row.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.as_slice()[start..start + self.cols])
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        let cols = self.cols;
        Some(&mut self.as_mut_slice()[start..start + cols])
    }

    /// Window of `width` scores starting at element `offset`.
    pub fn view(&self, offset: usize, width: usize) -> Result<LogitsView<'_>> {
        let end = offset
            .checked_add(width)
            .ok_or(ScoreError::mismatch("logits view", self.len, usize::MAX))?;
        if end > self.len {
            return Err(ScoreError::mismatch("logits view", self.len, end));
        }
        Ok(LogitsView::new(self.as_slice(), offset, end))
    }

    fn release(&mut self) {
        if self.len > 0 {
            if let Some(layout) = layout_for(self.len) {
                // SAFETY: `ptr` was returned by `alloc_zeroed` with this exact layout.
                unsafe { alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), layout) };
            }
        }
        self.ptr = NonNull::dangling();
        self.len = 0;
        self.rows = 0;
        self.cols = 0;
    }
}

impl Default for AlignedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("len", &self.len)
            .finish()
    }
}

fn layout_for(count: usize) -> Option<Layout> {
    let size = count.checked_mul(std::mem::size_of::<f32>())?;
    Layout::from_size_align(size, ALIGNMENT).ok()
}

fn allocate(count: usize) -> Option<NonNull<f32>> {
    if count == 0 {
        return Some(NonNull::dangling());
    }
    let layout = layout_for(count)?;
    // SAFETY: `layout` has a non-zero size.
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(raw.cast::<f32>())
}
