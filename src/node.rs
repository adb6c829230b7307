//! The node aggregate: one file or directory assembled from every MFT
//! entry sharing its uid.
//!
//! A node is plain data. It references no image state, cloning it is
//! cheap, and only the node manager turns one into on-disk bytes. Holding
//! a `Node` does not pin its resources: an unsaved node can lose its uid,
//! entries and clusters to the next allocation.

use crate::error::{FsError, Result};
use crate::layout::{Extent, MftSlot};

#[derive(Debug, Clone)]
pub struct Node {
    /// The node's MFT slots, sorted by entry order.
    slots: Vec<MftSlot>,
}

impl Node {
    /// Wrap a sorted, fully populated slot list.
    ///
    /// Every slot must already agree on uid, name, flag, size and count;
    /// the accessors below read the first one under that invariant.
    pub(crate) fn new(slots: Vec<MftSlot>) -> Result<Self> {
        if slots.is_empty() {
            return Err(FsError::NodeConstruct);
        }
        Ok(Self { slots })
    }

    pub fn uid(&self) -> i32 {
        self.slots[0].entry.uid
    }

    pub fn name(&self) -> String {
        self.slots[0].entry.name_str()
    }

    pub fn is_directory(&self) -> bool {
        self.slots[0].entry.is_directory
    }

    /// Payload size in bytes.
    pub fn size(&self) -> i32 {
        self.slots[0].entry.size
    }

    /// Number of MFT entries the node spans.
    pub fn entry_count(&self) -> i32 {
        self.slots[0].entry.count
    }

    pub fn slots(&self) -> &[MftSlot] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [MftSlot] {
        &mut self.slots
    }

    /// The used extents of every entry, concatenated in entry order. The
    /// first unused slot terminates the list within each entry.
    pub fn extents(&self) -> Vec<Extent> {
        let mut extents = Vec::new();
        for slot in &self.slots {
            for extent in &slot.entry.extents {
                if extent.is_unused() {
                    break;
                }
                extents.push(*extent);
            }
        }
        extents
    }

    /// Every cluster index the node owns, in extent order.
    pub fn clusters(&self) -> Vec<i32> {
        let mut clusters = Vec::new();
        for extent in self.extents() {
            for i in 0..extent.count {
                clusters.push(extent.start + i);
            }
        }
        clusters
    }

    /// Total byte capacity of the owned clusters.
    pub fn capacity(&self, cluster_size: i32) -> i64 {
        self.clusters().len() as i64 * cluster_size as i64
    }
}
