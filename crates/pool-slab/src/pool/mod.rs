//! Growable pool allocator.
//!
//! Requests are served in three steps: first-fit search of the free list
//! (splitting oversized nodes), bump allocation from the existing blocks in
//! acquisition order, and finally a new block from the provider.
//!
//! Two locks protect the pool. A coarse [`spin::Mutex`] guards the block list,
//! the bump marks and the counters for the whole call. A narrow [`SpinLock`]
//! guards the free list and gives up after [`FREE_LIST_SPIN_LIMIT`] spins.
//! Every free-list operation borrows the block list, which can only be
//! reached through the coarse guard, so the two are always taken in that
//! order.

use alloc::vec::Vec;
use core::ptr::NonNull;

use memory_provider::{
    BulkFill, LayoutSnafu, MemoryProvider, PAGE_SIZE, SystemProvider, WideFill, ZeroSizeSnafu,
};
use snafu::{IntoError as _, OptionExt as _, ResultExt as _, ensure};

use self::{
    block::{Block, Bumped},
    free_list::FreeList,
};
use crate::{
    error::{AllocError, InvalidArgumentSnafu, Misuse, OutOfMemorySnafu},
    header::{Cursor, HEADER_SIZE, Header},
    state::State,
    sync::SpinLock,
};

mod block;
mod free_list;

/// Smallest payload worth splitting off a free node as a node of its own.
pub const MIN_SPLIT_THRESHOLD: usize = 16;

/// Spins allowed on the free-list lock before a call gives up with
/// [`AllocError::LockTimeout`].
pub const FREE_LIST_SPIN_LIMIT: usize = 1 << 20;

/// Point-in-time accounting of a pool.
///
/// `capacity == live_bytes + padding_bytes + free_bytes + header_bytes +
/// unused_bytes` holds whenever no call is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub blocks: usize,
    pub capacity: usize,
    pub live_allocations: usize,
    pub live_bytes: usize,
    /// Alignment gaps in front of live allocations.
    pub padding_bytes: usize,
    pub free_entries: usize,
    pub free_bytes: usize,
    /// One header per live allocation and per free entry.
    pub header_bytes: usize,
    /// Bytes past the bump mark of every block.
    pub unused_bytes: usize,
}

/// A free-list node as seen from outside: its payload and payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeEntry {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

#[derive(Debug)]
struct Blocks {
    state: State,
    blocks: Vec<Block>,
    live_allocations: usize,
    live_bytes: usize,
    padding_bytes: usize,
}

impl Blocks {
    fn note_alloc(&mut self, header: Header) {
        self.live_allocations += 1;
        self.live_bytes += header.size;
        self.padding_bytes += header.padding;
    }

    fn note_free(&mut self, header: Header) {
        self.live_allocations -= 1;
        self.live_bytes -= header.size;
        self.padding_bytes -= header.padding;
    }

    fn try_bump(&mut self, size: usize, align: usize) -> Option<(Cursor, Header)> {
        self.blocks.iter_mut().enumerate().find_map(|(index, block)| {
            let Bumped { offset, header } = block.try_bump(size, align)?;
            Some((Cursor::new(index, offset), header))
        })
    }

    /// Acquires a block that can hold the request and bump allocates from it.
    ///
    /// Nothing is modified unless the whole operation succeeds.
    fn grow<P>(
        &mut self,
        provider: &P,
        initial_capacity: usize,
        size: usize,
        align: usize,
    ) -> Result<(Cursor, Header), AllocError>
    where
        P: MemoryProvider,
    {
        let Some(capacity) = growth_capacity(initial_capacity, size, align) else {
            return Err(unrepresentable(size));
        };
        let region = provider
            .reserve(capacity)
            .context(OutOfMemorySnafu { size: capacity })?;

        let mut block = Block::new(region, capacity);
        let Some(Bumped { offset, header }) = block.try_bump(size, align) else {
            unsafe { provider.release(block.into_region()) };
            return Err(unrepresentable(size));
        };

        self.blocks.push(block);
        log::debug!(
            "pool grew to {} blocks with a {capacity:#x}-byte block",
            self.blocks.len()
        );
        Ok((Cursor::new(self.blocks.len() - 1, offset), header))
    }

    /// Finds the live allocation whose payload starts at `ptr`.
    fn locate(&self, free_list: &FreeList, ptr: *mut u8) -> Result<(Cursor, Header), AllocError> {
        let addr = ptr.addr();
        let foreign = || InvalidArgumentSnafu {
            misuse: Misuse::ForeignPointer { addr },
        };

        let cursor = self
            .blocks
            .iter()
            .enumerate()
            .find_map(|(index, block)| Some(Cursor::new(index, block.header_offset_of(ptr)?)))
            .with_context(foreign)?;
        ensure!(
            free_list.find_covering(&self.blocks, cursor).is_none(),
            InvalidArgumentSnafu {
                misuse: Misuse::DoubleFree { addr },
            }
        );

        let block = &self.blocks[cursor.block];
        let header = Header::read(block.region(), cursor.offset);
        let in_bounds = header.padding <= cursor.offset
            && header
                .size
                .checked_add(cursor.user_offset())
                .is_some_and(|end| end <= block.bump());
        ensure!(in_bounds, foreign());
        Ok((cursor, header))
    }
}

fn unrepresentable(size: usize) -> AllocError {
    OutOfMemorySnafu { size }.into_error(LayoutSnafu { size }.build())
}

/// Size of the block to acquire for a request no existing block can hold.
fn growth_capacity(initial_capacity: usize, size: usize, align: usize) -> Option<usize> {
    // offset of the first payload byte in a fresh, page-aligned block
    let lead = if align > PAGE_SIZE {
        HEADER_SIZE.checked_add(align - 1)?
    } else {
        HEADER_SIZE.checked_next_multiple_of(align)?
    };
    Some(initial_capacity.max(lead.checked_add(size)?))
}

/// A thread-safe pool of variable-sized allocations carved out of blocks
/// obtained from a [`MemoryProvider`].
///
/// # Examples
///
/// ```rust
/// use pool_slab::PoolAllocator;
///
/// let pool = PoolAllocator::init(1024)?;
/// let p = pool.alloc(100, 16)?;
/// assert_eq!(p.as_ptr().addr() % 16, 0);
/// unsafe { pool.free(p.as_ptr())? };
/// pool.destroy()?;
/// # Ok::<(), pool_slab::AllocError>(())
/// ```
#[derive(Debug)]
pub struct PoolAllocator<P = SystemProvider, F = WideFill>
where
    P: MemoryProvider,
{
    provider: P,
    fill: F,
    initial_capacity: usize,
    inner: spin::Mutex<Blocks>,
    free_list: SpinLock<FreeList>,
}

impl PoolAllocator {
    /// Creates a pool backed by the global allocator.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if `capacity` is zero or the
    /// region cannot be reserved.
    pub fn init(capacity: usize) -> Result<Self, AllocError> {
        Self::with_collaborators(SystemProvider::new(), WideFill, capacity)
    }
}

impl<P, F> PoolAllocator<P, F>
where
    P: MemoryProvider,
    F: BulkFill,
{
    /// Creates a pool whose first block holds `capacity` bytes.
    ///
    /// `capacity` is also the minimum size of every block acquired later.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if `capacity` is zero or
    /// `provider` cannot reserve it.
    pub fn with_collaborators(provider: P, fill: F, capacity: usize) -> Result<Self, AllocError> {
        let reserved = if capacity == 0 {
            ZeroSizeSnafu.fail()
        } else {
            provider.reserve(capacity)
        };
        let region = reserved.context(OutOfMemorySnafu { size: capacity })?;
        log::info!("pool created with a {capacity:#x}-byte block at {region:?}");

        Ok(Self {
            provider,
            fill,
            initial_capacity: capacity,
            inner: spin::Mutex::new(Blocks {
                state: State::Initialized,
                blocks: alloc::vec![Block::new(region, capacity)],
                live_allocations: 0,
                live_bytes: 0,
                padding_bytes: 0,
            }),
            free_list: SpinLock::new(FreeList::new()),
        })
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub const fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if `size` is zero, `align` is not a
    ///   power of two, or the pool has been destroyed.
    /// - [`AllocError::OutOfMemory`] if a new block was needed and could not
    ///   be acquired. The pool is left unchanged.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(
            size > 0,
            InvalidArgumentSnafu {
                misuse: Misuse::ZeroSize,
            }
        );
        ensure!(
            align.is_power_of_two(),
            InvalidArgumentSnafu {
                misuse: Misuse::BadAlignment { align },
            }
        );

        let mut inner = self.inner.lock();
        inner.state.ensure_initialized()?;

        let reused = self
            .free_list
            .lock_bounded(FREE_LIST_SPIN_LIMIT)?
            .take_first_fit(&inner.blocks, size, align);
        let (cursor, header) = if let Some(taken) = reused {
            log::trace!("alloc({size}, {align}) reused free node {:?}", taken.0);
            taken
        } else if let Some(bumped) = inner.try_bump(size, align) {
            log::trace!("alloc({size}, {align}) bumped at {:?}", bumped.0);
            bumped
        } else {
            inner.grow(&self.provider, self.initial_capacity, size, align)?
        };

        let ptr = inner.blocks[cursor.block].user_ptr(cursor.offset);
        inner.note_alloc(header);
        Ok(ptr)
    }

    /// Returns an allocation to the free list and coalesces adjacent nodes.
    ///
    /// The alignment gap left in front of the allocation is returned with it.
    /// Freeing a null pointer does nothing.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if `ptr` was not returned by
    ///   [`alloc`](Self::alloc) on this pool, is already free, or the pool
    ///   has been destroyed.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    ///
    /// # Safety
    ///
    /// `ptr` must not be used after this call returns `Ok`.
    pub unsafe fn free(&self, ptr: *mut u8) -> Result<(), AllocError> {
        if ptr.is_null() {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        inner.state.ensure_initialized()?;
        let mut free_list = self.free_list.lock_bounded(FREE_LIST_SPIN_LIMIT)?;
        let (cursor, header) = inner.locate(&free_list, ptr)?;

        inner.note_free(header);
        let anchor = Cursor::new(cursor.block, cursor.offset - header.padding);
        free_list.push(
            &inner.blocks,
            anchor,
            Header::new(header.size + header.padding, 0),
        );
        let merged = free_list.coalesce(&inner.blocks);
        log::trace!("free({ptr:p}) at {anchor:?}, {merged} nodes merged");
        Ok(())
    }

    /// Forgets every allocation and zero-fills all blocks.
    ///
    /// Blocks stay reserved; the next allocation starts at the front of the
    /// first block again.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if the pool has been destroyed.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    pub fn reset(&self) -> Result<(), AllocError> {
        let mut inner = self.inner.lock();
        inner.state.ensure_initialized()?;
        self.free_list.lock_bounded(FREE_LIST_SPIN_LIMIT)?.clear();

        for block in &mut inner.blocks {
            block.reset(&self.fill);
        }
        inner.live_allocations = 0;
        inner.live_bytes = 0;
        inner.padding_bytes = 0;
        log::debug!("pool reset, {} blocks kept", inner.blocks.len());
        Ok(())
    }

    /// Releases every block to the provider.
    ///
    /// Every later call fails with [`AllocError::InvalidArgument`].
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if the pool was already destroyed.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    pub fn destroy(&self) -> Result<(), AllocError> {
        let mut inner = self.inner.lock();
        inner.state.ensure_initialized()?;
        self.free_list.lock_bounded(FREE_LIST_SPIN_LIMIT)?.clear();

        inner.state = State::Destroyed;
        let count = inner.blocks.len();
        for block in inner.blocks.drain(..) {
            unsafe { self.provider.release(block.into_region()) };
        }
        log::info!("pool destroyed, {count} blocks released");
        Ok(())
    }

    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if the pool has been destroyed.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    pub fn stats(&self) -> Result<PoolStats, AllocError> {
        let inner = self.inner.lock();
        inner.state.ensure_initialized()?;
        let free_list = self.free_list.lock_bounded(FREE_LIST_SPIN_LIMIT)?;

        let (free_entries, free_bytes) = free_list
            .iter(&inner.blocks)
            .fold((0, 0), |(count, bytes), (_, header)| {
                (count + 1, bytes + header.size)
            });
        Ok(PoolStats {
            blocks: inner.blocks.len(),
            capacity: inner.blocks.iter().map(Block::capacity).sum(),
            live_allocations: inner.live_allocations,
            live_bytes: inner.live_bytes,
            padding_bytes: inner.padding_bytes,
            free_entries,
            free_bytes,
            header_bytes: (inner.live_allocations + free_entries) * HEADER_SIZE,
            unused_bytes: inner.blocks.iter().map(Block::unused).sum(),
        })
    }

    /// Free-list nodes in list order.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if the pool has been destroyed.
    /// - [`AllocError::LockTimeout`] if the free list stayed locked.
    pub fn free_entries(&self) -> Result<Vec<FreeEntry>, AllocError> {
        let inner = self.inner.lock();
        inner.state.ensure_initialized()?;
        let free_list = self.free_list.lock_bounded(FREE_LIST_SPIN_LIMIT)?;

        Ok(free_list
            .iter(&inner.blocks)
            .map(|(cursor, header)| FreeEntry {
                ptr: inner.blocks[cursor.block].user_ptr(cursor.offset),
                size: header.size,
            })
            .collect())
    }
}

impl<P, F> Drop for PoolAllocator<P, F>
where
    P: MemoryProvider,
{
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state.is_destroyed() {
            return;
        }
        inner.state = State::Destroyed;
        for block in inner.blocks.drain(..) {
            unsafe { self.provider.release(block.into_region()) };
        }
    }
}
