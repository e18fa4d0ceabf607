use super::{vlong::decode_vlong, PageBuf};
use crate::types::{Address, MappedId};
use std::convert::TryInto;

/// Immutable paged storage of per-node relationship runs.
///
/// A node's run starts at the address recorded in its offset array entry
/// and never crosses a page boundary. Adjacency and property runs share
/// one layout:
///
/// ```text
/// +-----------------------------------------+
/// |              degree: u32 LE             |
/// +-----------------------------------------+
/// +-----------------------------------------+
/// |   adjacency payload: `degree` vlong     |
/// |   deltas of the ascending target list   |
/// +-----------------------------------------+
///            - or, for properties -
/// +-----------------------------------------+
/// |   `degree * key_count` u64 LE values,   |
/// |   row-major per target                  |
/// +-----------------------------------------+
/// ```
pub struct AdjacencyList {
    pages: Vec<PageBuf>,
    page_shift: u32,
}

impl AdjacencyList {
    pub(super) fn new(pages: Vec<PageBuf>, page_shift: u32) -> Self {
        Self { pages, page_shift }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The bytes from `address` to the end of its page.
    pub fn slice_at(&self, address: Address) -> &[u8] {
        let page = (address >> self.page_shift) as usize;
        let offset = (address & ((1u64 << self.page_shift) - 1)) as usize;
        &self.pages[page].as_slice()[offset..]
    }

    /// The degree stored at `address`.
    pub fn degree(&self, address: Address) -> u32 {
        let data = self.slice_at(address);
        u32::from_le_bytes(data[..4].try_into().unwrap())
    }

    /// A decoding cursor over the target list stored at `address`.
    pub fn cursor(&self, address: Address) -> AdjacencyCursor {
        let data = self.slice_at(address);
        let degree = u32::from_le_bytes(data[..4].try_into().unwrap());
        AdjacencyCursor {
            data,
            pos: 4,
            remaining: degree,
            degree,
            value: 0,
        }
    }

    /// A cursor over the property rows stored at `address`.
    pub fn property_cursor(&self, address: Address, key_count: usize) -> PropertyCursor {
        let data = self.slice_at(address);
        let degree = u32::from_le_bytes(data[..4].try_into().unwrap());
        PropertyCursor {
            data,
            pos: 4,
            remaining: degree,
            key_count,
        }
    }
}

/// Iterates the targets of one adjacency run in ascending order.
pub struct AdjacencyCursor<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u32,
    degree: u32,
    value: u64,
}

impl<'a> AdjacencyCursor<'a> {
    pub fn degree(&self) -> u32 {
        self.degree
    }
}

impl<'a> Iterator for AdjacencyCursor<'a> {
    type Item = MappedId;

    fn next(&mut self) -> Option<MappedId> {
        if self.remaining == 0 {
            return None;
        }
        let (delta, pos) = decode_vlong(self.data, self.pos);
        self.pos = pos;
        self.value += delta;
        self.remaining -= 1;
        Some(self.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl<'a> ExactSizeIterator for AdjacencyCursor<'a> {}

/// Reads the property rows of one run, `key_count` raw `u64` bit patterns
/// per target.
pub struct PropertyCursor<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u32,
    key_count: usize,
}

impl<'a> PropertyCursor<'a> {
    pub fn remaining(&self) -> usize {
        self.remaining as usize
    }

    /// Copies the next row into `out`, returning false once exhausted.
    pub fn next_row(&mut self, out: &mut [u64]) -> bool {
        if self.remaining == 0 {
            return false;
        }
        assert_eq!(out.len(), self.key_count);
        for slot in out.iter_mut() {
            *slot = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
            self.pos += 8;
        }
        self.remaining -= 1;
        true
    }
}
