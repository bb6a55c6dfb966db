//! Scatter-gather view of a sub-operation's slice of the caller buffer.
//!
//! A list always holds exactly one data element followed by a zero-length
//! terminator.

use std::ptr::{self, NonNull};
use std::slice;

/// One address/length pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SgElement {
    address: *mut u8,
    count: usize,
}

impl SgElement {
    /// Zero-length entry that ends a list.
    pub const TERMINATOR: SgElement = SgElement {
        address: ptr::null_mut(),
        count: 0,
    };

    pub const fn count(&self) -> usize {
        self.count
    }

    pub fn address(&self) -> *const u8 {
        self.address
    }

    pub fn is_terminator(&self) -> bool {
        self.count == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SgList {
    elements: [SgElement; 2],
}

// Safety: the list only ever points into a caller buffer that outlives the
// split request, and each list covers a range no other list covers.
unsafe impl Send for SgList {}

impl Default for SgList {
    fn default() -> Self {
        Self::empty()
    }
}

impl SgList {
    pub const fn empty() -> Self {
        Self {
            elements: [SgElement::TERMINATOR, SgElement::TERMINATOR],
        }
    }

    /// Point the data element at `len` bytes starting `offset` bytes into
    /// the buffer at `base`.
    pub(crate) fn point_at(&mut self, base: NonNull<u8>, offset: usize, len: usize) {
        // Safety: callers keep `offset + len` within the buffer behind `base`.
        let address = unsafe { base.as_ptr().add(offset) };
        self.elements = [SgElement { address, count: len }, SgElement::TERMINATOR];
    }

    pub(crate) fn clear(&mut self) {
        self.elements = [SgElement::TERMINATOR, SgElement::TERMINATOR];
    }

    pub fn elements(&self) -> &[SgElement; 2] {
        &self.elements
    }

    /// Bytes described by the list.
    pub fn data_len(&self) -> usize {
        self.elements
            .iter()
            .take_while(|element| !element.is_terminator())
            .map(SgElement::count)
            .sum()
    }

    /// # Safety
    ///
    /// The list must point into a live buffer that nobody mutates for `'a`.
    pub(crate) unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        let data = self.elements[0];
        if data.is_terminator() {
            return &[];
        }
        unsafe { slice::from_raw_parts(data.address, data.count) }
    }

    /// # Safety
    ///
    /// The list must point into a live, writable buffer range owned
    /// exclusively by the caller for `'a`.
    pub(crate) unsafe fn as_mut_slice<'a>(&mut self) -> &'a mut [u8] {
        let data = self.elements[0];
        if data.is_terminator() {
            return &mut [];
        }
        unsafe { slice::from_raw_parts_mut(data.address, data.count) }
    }
}
