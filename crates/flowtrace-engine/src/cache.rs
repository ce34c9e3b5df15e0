//! Shared window of fetched block contents.
//!
//! Cache-populating jobs write the blocks they fetch; every other native scan
//! reads from here before touching the network. Jobs may complete in any
//! order and may be retried, so writes are clipped to the current boundary
//! instead of being trusted to arrive in sequence.

use std::collections::HashMap;
use std::sync::Arc;

use flowtrace_data::BlockContents;

#[derive(Debug, Default)]
pub struct RangeCache {
    blocks: HashMap<u64, Arc<BlockContents>>,
    /// Lowest cacheable block. `None` until the scan window is known, in
    /// which case nothing is cached.
    boundary: Option<u64>,
}

impl RangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(boundary: u64) -> Self {
        Self {
            blocks: HashMap::new(),
            boundary: Some(boundary),
        }
    }

    /// Cached contents of `number`. Never fetches.
    pub fn get(&self, number: u64) -> Option<Arc<BlockContents>> {
        self.blocks.get(&number).cloned()
    }

    /// Stores `blocks` as consecutive entries starting at `start`.
    ///
    /// Positions below the boundary are skipped. Returns how many entries were written.
    pub fn put(&mut self, start: u64, blocks: impl IntoIterator<Item = Arc<BlockContents>>) -> usize {
        let Some(boundary) = self.boundary else {
            return 0;
        };

        let mut written = 0;
        for (offset, block) in blocks.into_iter().enumerate() {
            let number = start + offset as u64;
            if number < boundary {
                continue;
            }
            self.blocks.insert(number, block);
            written += 1;
        }
        written
    }

    /// Moves the boundary and evicts entries that fall below it.
    pub fn set_boundary(&mut self, boundary: u64) {
        self.boundary = Some(boundary);
        self.blocks.retain(|number, _| *number >= boundary);
    }

    pub fn boundary(&self) -> Option<u64> {
        self.boundary
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drops every entry and forgets the boundary.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.boundary = None;
    }
}
