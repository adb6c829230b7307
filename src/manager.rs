//! The node manager: allocator and lifecycle controller for nodes.
//!
//! It owns the image, hands out uids, extents and MFT entries, and is the
//! only writer of a node's persisted form. It keeps no cache; every
//! operation reads the backing store, so the state observed is always the
//! saved one.

use std::io::{Read, Write};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::image::Image;
use crate::layout::{Extent, MftEntry, MftSlot, UID_FREE};
use crate::node::Node;

/// Clusters an allocation of `size` bytes receives: enough to hold the
/// payload plus one reserve cluster. Existing images depend on this
/// over-allocation, so it must not change.
pub fn clusters_needed(size: i32, cluster_size: i32) -> i32 {
    ((size as i64 + cluster_size as i64 - 1) / cluster_size as i64 + 1) as i32
}

/// Assemble the node with the given uid from the MFT.
///
/// Free fn rather than a method so the read-only checker can share it
/// across threads without touching the manager's rng.
pub fn load_node<D: Disk>(image: &Image<D>, uid: i32) -> Result<Node> {
    if uid == UID_FREE {
        return Err(FsError::NodeNotFound(uid));
    }
    let slots = image.read_entries_by_uid(uid)?;
    if slots.is_empty() {
        return Err(FsError::NodeNotFound(uid));
    }
    Node::new(slots)
}

pub struct NodeManager<D: Disk> {
    image: Image<D>,
    rng: StdRng,
}

impl<D: Disk> NodeManager<D> {
    pub fn new(image: Image<D>) -> Self {
        Self {
            image,
            rng: StdRng::from_entropy(),
        }
    }

    /// A manager with a deterministic uid sequence, for tests.
    pub fn with_seed(image: Image<D>, seed: u64) -> Self {
        Self {
            image,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn image(&self) -> &Image<D> {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Image<D> {
        &mut self.image
    }

    /// Total byte capacity of the node's clusters.
    pub fn capacity(&self, node: &Node) -> Result<i64> {
        Ok(node.capacity(self.image.cluster_size()?))
    }

    /// Create a node: reserve clusters and MFT entries, draw a fresh uid,
    /// fill the entries and persist everything.
    pub fn create(&mut self, name: &str, is_directory: bool, size: i32) -> Result<Node> {
        let extents = self.find_free_extents(size)?;
        let slots = self.find_free_entries(extents.len())?;
        let uid = self.fresh_uid()?;

        let slots = self.setup(slots, uid, name, is_directory, size, &extents)?;
        let node = Node::new(slots)?;
        self.save(&node)?;

        debug!(
            "created node {uid} ({name}) size {size}: {} extents, {} entries",
            extents.len(),
            node.entry_count()
        );
        Ok(node)
    }

    /// Persist the node: mark its clusters allocated, then write its
    /// entries into their slots.
    pub fn save(&self, node: &Node) -> Result<()> {
        for cluster in node.clusters() {
            self.image.write_bit(cluster, true)?;
        }
        for slot in node.slots() {
            self.image.write_entry(slot)?;
        }
        Ok(())
    }

    /// Free the node's resources: clear its bitmap bits and write a free
    /// record into each of its slots. Cluster contents stay as they are.
    pub fn release(&self, node: &Node) -> Result<()> {
        for cluster in node.clusters() {
            self.image.write_bit(cluster, false)?;
        }
        for slot in node.slots() {
            self.image.write_entry(&MftSlot {
                index: slot.index,
                entry: MftEntry::free(),
            })?;
        }
        debug!("released node {}", node.uid());
        Ok(())
    }

    /// Give the node capacity for `size` bytes.
    ///
    /// If the current clusters already fit the new size without a whole
    /// spare cluster beyond the reserve, only the size field changes.
    /// Otherwise the node is released and reallocated; failure to
    /// reallocate restores the original layout before propagating.
    pub fn resize(&mut self, node: Node, size: i32) -> Result<Node> {
        let cluster_size = self.image.cluster_size()?;
        let capacity = node.capacity(cluster_size);

        if size as i64 <= capacity && capacity - (size as i64) < (cluster_size as i64) {
            let mut resized = node;
            for slot in resized.slots_mut() {
                slot.entry.size = size;
            }
            self.save(&resized)?;
            return Ok(resized);
        }

        self.release(&node)?;

        let reallocated = (|| {
            let extents = self.find_free_extents(size)?;
            let slots = self.find_free_entries(extents.len())?;
            self.setup(slots, node.uid(), &node.name(), node.is_directory(), size, &extents)
        })();

        match reallocated {
            Ok(slots) => {
                let resized = Node::new(slots)?;
                self.save(&resized)?;
                Ok(resized)
            }
            Err(err) => {
                // put the old layout back so the caller sees no change
                self.save(&node)?;
                Err(err)
            }
        }
    }

    /// Rename the node in every entry. The name is truncated to the
    /// on-disk field like everywhere else.
    pub fn rename(&self, node: Node, name: &str) -> Result<Node> {
        let mut renamed = node;
        for slot in renamed.slots_mut() {
            slot.entry.set_name(name);
        }
        self.save(&renamed)?;
        Ok(renamed)
    }

    /// Copy the node into a fresh allocation under a new uid and name.
    /// The clone is not linked into any directory here.
    pub fn clone_node(&mut self, node: &Node, name: &str) -> Result<Node> {
        let clone = self.create(name, node.is_directory(), node.size())?;

        let cluster_size = self.image.cluster_size()? as usize;
        let mut remaining = node.size() as usize;
        let mut chunk = vec![0u8; cluster_size];

        for (&src, &dst) in node.clusters().iter().zip(clone.clusters().iter()) {
            if remaining == 0 {
                break;
            }
            let take = cluster_size.min(remaining);
            self.image.read_cluster(src, &mut chunk[..take])?;
            self.image.write_cluster(dst, &chunk[..take])?;
            remaining -= take;
        }
        Ok(clone)
    }

    /// Find the node with the given uid.
    pub fn find(&self, uid: i32) -> Result<Node> {
        load_node(&self.image, uid)
    }

    /// Write the node's payload from a contiguous buffer. The transferred
    /// length is exactly the node size.
    pub fn write_into(&self, node: &Node, data: &[u8]) -> Result<()> {
        if data.len() != node.size() as usize {
            return Err(FsError::ClusterOverflow);
        }
        self.image.write_clusters(&node.clusters(), data)
    }

    /// Write the node's payload from a stream, node-size bytes of it.
    pub fn write_into_stream<R: Read>(&self, node: &Node, source: &mut R) -> Result<()> {
        self.image
            .write_clusters_from(&node.clusters(), node.size() as usize, source)
    }

    /// Read the node's payload into a fresh buffer.
    pub fn read_from(&self, node: &Node) -> Result<Vec<u8>> {
        let mut data = vec![0u8; node.size() as usize];
        self.image.read_clusters(&node.clusters(), &mut data)?;
        Ok(data)
    }

    /// Stream the node's payload out.
    pub fn read_from_stream<W: Write>(&self, node: &Node, dest: &mut W) -> Result<()> {
        self.image
            .read_clusters_to(&node.clusters(), node.size() as usize, dest)
    }

    /// Draw a random uid no live entry uses. Uniform over `[1, i32::MAX]`;
    /// collisions are rejected by scanning the table again.
    fn fresh_uid(&mut self) -> Result<i32> {
        loop {
            let uid = self.rng.gen_range(1..=i32::MAX);

            let mut taken = false;
            for index in 0..self.image.mft_entry_count()? {
                if self.image.read_entry(index)?.entry.uid == uid {
                    taken = true;
                    break;
                }
            }
            if !taken {
                return Ok(uid);
            }
        }
    }

    /// Find clusters for a node of `size` bytes.
    ///
    /// Phase one looks for a single run holding all needed clusters; phase
    /// two falls back to collecting maximal free runs in ascending order
    /// until the total is reached.
    fn find_free_extents(&self, size: i32) -> Result<Vec<Extent>> {
        let cluster_count = self.image.cluster_count()?;
        let needed = clusters_needed(size, self.image.cluster_size()?);

        // phase 1: one undivided run
        let mut run = Extent::UNUSED;
        for index in 0..cluster_count {
            if !self.image.read_bit(index)? {
                if run.is_unused() {
                    run = Extent {
                        start: index,
                        count: 0,
                    };
                }
                run.count += 1;
                if run.count == needed {
                    return Ok(vec![run]);
                }
            } else {
                run = Extent::UNUSED;
            }
        }

        // phase 2: collect maximal runs until the total is reached
        let mut extents = Vec::new();
        let mut found = 0;
        let mut run = Extent::UNUSED;

        for index in 0..cluster_count {
            if !self.image.read_bit(index)? {
                if run.is_unused() {
                    run = Extent {
                        start: index,
                        count: 0,
                    };
                }
                run.count += 1;
                found += 1;

                if found == needed {
                    extents.push(run);
                    return Ok(extents);
                }
            } else if !run.is_unused() {
                extents.push(run);
                run = Extent::UNUSED;
            }
        }

        Err(FsError::NotEnoughClusters(size))
    }

    /// Find free MFT slots for `extent_count` extents, ascending.
    fn find_free_entries(&self, extent_count: usize) -> Result<Vec<MftSlot>> {
        let max_extents = self.image.max_extents_per_entry()? as usize;
        let needed = extent_count.div_ceil(max_extents);

        let mut slots = Vec::with_capacity(needed);
        for index in 0..self.image.mft_entry_count()? {
            let slot = self.image.read_entry(index)?;
            if slot.entry.is_free() {
                slots.push(slot);
                if slots.len() == needed {
                    return Ok(slots);
                }
            }
        }

        Err(FsError::NotEnoughMftEntries(extent_count))
    }

    /// Fill the chosen slots with the node's values, consuming the extent
    /// list in order; leftover extent slots stay unused.
    fn setup(
        &self,
        mut slots: Vec<MftSlot>,
        uid: i32,
        name: &str,
        is_directory: bool,
        size: i32,
        extents: &[Extent],
    ) -> Result<Vec<MftSlot>> {
        let max_extents = self.image.max_extents_per_entry()? as usize;
        let count = slots.len() as i32;
        let mut next_extent = extents.iter();

        for (order, slot) in slots.iter_mut().enumerate() {
            let entry = &mut slot.entry;
            entry.uid = uid;
            entry.is_directory = is_directory;
            entry.size = size;
            entry.order = order as i32;
            entry.count = count;
            entry.set_name(name);

            for extent_slot in entry.extents.iter_mut().take(max_extents) {
                *extent_slot = next_extent.next().copied().unwrap_or(Extent::UNUSED);
            }
        }
        Ok(slots)
    }
}
