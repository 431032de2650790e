use alloc::vec::Vec;

use super::{MIN_SPLIT_THRESHOLD, block::Block};
use crate::header::{Cursor, HEADER_SIZE, Header};

/// Singly linked list of freed spans, threaded through their headers.
///
/// The list only stores the head; every node lives inside a block, which is
/// why all operations borrow the block list.
#[derive(Debug, Default)]
pub(super) struct FreeList {
    head: Option<Cursor>,
}

impl FreeList {
    pub(super) const fn new() -> Self {
        Self { head: None }
    }

    pub(super) const fn clear(&mut self) {
        self.head = None;
    }

    /// Nodes in list order.
    pub(super) fn iter<'a>(&self, blocks: &'a [Block]) -> Iter<'a> {
        Iter {
            blocks,
            next: self.head,
        }
    }

    /// Returns the free node whose span contains the header at `at`, if any.
    pub(super) fn find_covering(&self, blocks: &[Block], at: Cursor) -> Option<Cursor> {
        self.iter(blocks)
            .find(|(cursor, header)| {
                cursor.block == at.block
                    && (cursor.offset..header.end(cursor.offset)).contains(&at.offset)
            })
            .map(|(cursor, _)| cursor)
    }

    /// Links `header` in at the head, writing it at `at`.
    pub(super) fn push(&mut self, blocks: &[Block], at: Cursor, header: Header) {
        header
            .with_next(self.head)
            .write(blocks[at.block].region(), at.offset);
        self.head = Some(at);
    }

    /// Removes the first node that can hold `size` bytes aligned to `align`.
    ///
    /// The payload is placed at the first aligned address inside the node.
    /// The bytes skipped in front of the new header become its `padding`,
    /// so freeing it gives the whole node back. When enough is left behind
    /// the payload, the rest is pushed back as a new node.
    ///
    /// Returns the position of the new header and the header itself.
    pub(super) fn take_first_fit(
        &mut self,
        blocks: &[Block],
        size: usize,
        align: usize,
    ) -> Option<(Cursor, Header)> {
        let mut prev = None;
        let mut current = self.head;
        while let Some(cursor) = current {
            let block = &blocks[cursor.block];
            let header = Header::read(block.region(), cursor.offset);
            let user = block.user_addr(cursor.offset);
            let shift = user
                .checked_next_multiple_of(align)
                .map(|aligned| aligned - user)
                .filter(|shift| shift.checked_add(size).is_some_and(|need| need <= header.size));
            let Some(shift) = shift else {
                prev = current;
                current = header.next();
                continue;
            };

            self.unlink(blocks, prev, header.next());
            let at = Cursor::new(cursor.block, cursor.offset + shift);
            let room = header.size - shift;
            let mut taken = Header::new(room, shift);
            if room - size >= HEADER_SIZE + MIN_SPLIT_THRESHOLD {
                taken.size = size;
                let rest = Header::new(room - size - HEADER_SIZE, 0);
                self.push(blocks, Cursor::new(at.block, at.user_offset() + size), rest);
            }
            taken.write(block.region(), at.offset);
            return Some((at, taken));
        }
        None
    }

    fn unlink(&mut self, blocks: &[Block], prev: Option<Cursor>, next: Option<Cursor>) {
        match prev {
            None => self.head = next,
            Some(prev) => {
                let region = blocks[prev.block].region();
                Header::read(region, prev.offset)
                    .with_next(next)
                    .write(region, prev.offset);
            }
        }
    }

    /// Merges every run of physically adjacent nodes in the same block and
    /// relinks the list in address order.
    ///
    /// Returns the number of nodes that disappeared.
    pub(super) fn coalesce(&mut self, blocks: &[Block]) -> usize {
        let mut nodes = self.iter(blocks).collect::<Vec<_>>();
        let before = nodes.len();
        nodes.sort_unstable_by_key(|(cursor, _)| *cursor);

        let mut merged = Vec::<(Cursor, Header)>::with_capacity(before);
        for (cursor, header) in nodes {
            match merged.last_mut() {
                Some((last_cursor, last))
                    if last_cursor.block == cursor.block
                        && last.end(last_cursor.offset) == cursor.offset =>
                {
                    last.size += HEADER_SIZE + header.size;
                }
                _ => merged.push((cursor, header)),
            }
        }

        self.head = None;
        for &(cursor, header) in merged.iter().rev() {
            self.push(blocks, cursor, header);
        }
        before - merged.len()
    }
}

pub(super) struct Iter<'a> {
    blocks: &'a [Block],
    next: Option<Cursor>,
}

impl Iterator for Iter<'_> {
    type Item = (Cursor, Header);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.next?;
        let header = Header::read(self.blocks[cursor.block].region(), cursor.offset);
        self.next = header.next();
        Some((cursor, header))
    }
}
