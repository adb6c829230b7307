//! Fixed on-disk record types and their little-endian codec.
//!
//! Every record has a single canonical byte size used for all offset
//! arithmetic. Serialization is manual, field by field, so no struct
//! padding can leak into the image.

use byteorder::{ByteOrder, LittleEndian};

/// Size of one cluster in bytes.
pub const CLUSTER_SIZE: i32 = 1024;
/// Max number of extents one MFT entry holds inline.
pub const MAX_EXTENTS_PER_ENTRY: usize = 32;
/// Size of the node name field, terminator included.
pub const NODE_NAME_SIZE: usize = 12;
/// Size of the boot record signature field, terminator included.
pub const SIGNATURE_SIZE: usize = 9;
/// Size of the boot record description field, terminator included.
pub const DESCRIPTION_SIZE: usize = 251;

/// Start index marking an unused extent slot.
pub const EXTENT_UNUSED_START: i32 = -1;
/// Uid of a free MFT entry.
pub const UID_FREE: i32 = 0;
/// Uid of the root directory.
pub const UID_ROOT: i32 = 1;
/// Share of the partition reserved for the MFT.
pub const MFT_SHARE: f64 = 0.1;

/// On-disk size of an extent descriptor.
pub const EXTENT_SIZE: usize = 8;
/// On-disk size of one MFT entry.
pub const MFT_ENTRY_SIZE: usize = 29 + MAX_EXTENTS_PER_ENTRY * EXTENT_SIZE;
/// On-disk size of the boot record.
pub const BOOT_RECORD_SIZE: usize = SIGNATURE_SIZE + DESCRIPTION_SIZE + 7 * 4;

/// Smallest partition that still fits the header, two MFT entries, one
/// bitmap byte and one cluster.
pub const MIN_PARTITION_SIZE: i32 =
    BOOT_RECORD_SIZE as i32 + 2 * MFT_ENTRY_SIZE as i32 + 1 + CLUSTER_SIZE;
/// Largest supported partition.
pub const MAX_PARTITION_SIZE: i32 = i32::MAX;

/// Copy `src` into the fixed text field `dst`, truncating to the field
/// capacity and always leaving the last byte as the NUL terminator.
pub fn put_text(dst: &mut [u8], src: &str) {
    dst.fill(0);
    let take = src.len().min(dst.len() - 1);
    dst[..take].copy_from_slice(&src.as_bytes()[..take]);
}

/// Read a NUL-terminated text field back into a `String`.
pub fn get_text(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// What `put_text` would keep of `src` in a field of `field_size` bytes.
/// Name comparisons go through this so a long name matches its stored form.
pub fn clip_text(src: &str, field_size: usize) -> String {
    let take = src.len().min(field_size - 1);
    String::from_utf8_lossy(&src.as_bytes()[..take]).into_owned()
}

/// A contiguous run of clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Index of the first cluster, or `EXTENT_UNUSED_START` for a free slot.
    pub start: i32,
    /// Number of clusters in the run.
    pub count: i32,
}

impl Extent {
    pub const UNUSED: Self = Self {
        start: EXTENT_UNUSED_START,
        count: 0,
    };

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.start == EXTENT_UNUSED_START
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            start: LittleEndian::read_i32(&buf[0..4]),
            count: LittleEndian::read_i32(&buf[4..8]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.start);
        LittleEndian::write_i32(&mut buf[4..8], self.count);
    }
}

/// The fixed header at offset 0 describing the image layout.
///
/// All start fields are absolute byte offsets from the beginning of the
/// image; the regions follow each other without gaps: boot record, MFT,
/// bitmap, data.
#[derive(Debug, Clone)]
pub struct BootRecord {
    pub signature: [u8; SIGNATURE_SIZE],
    pub description: [u8; DESCRIPTION_SIZE],
    pub partition_size: i32,
    pub cluster_size: i32,
    pub cluster_count: i32,
    pub mft_start: i32,
    pub bitmap_start: i32,
    pub data_start: i32,
    pub max_extents_per_entry: i32,
}

impl BootRecord {
    pub fn signature_str(&self) -> String {
        get_text(&self.signature)
    }

    pub fn description_str(&self) -> String {
        get_text(&self.description)
    }

    /// Number of MFT entries, derived from the region the MFT occupies.
    pub fn mft_entry_count(&self) -> i32 {
        (self.bitmap_start - self.mft_start) / MFT_ENTRY_SIZE as i32
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&buf[0..SIGNATURE_SIZE]);
        let mut description = [0u8; DESCRIPTION_SIZE];
        description.copy_from_slice(&buf[SIGNATURE_SIZE..SIGNATURE_SIZE + DESCRIPTION_SIZE]);

        let ints = SIGNATURE_SIZE + DESCRIPTION_SIZE;
        Self {
            signature,
            description,
            partition_size: LittleEndian::read_i32(&buf[ints..ints + 4]),
            cluster_size: LittleEndian::read_i32(&buf[ints + 4..ints + 8]),
            cluster_count: LittleEndian::read_i32(&buf[ints + 8..ints + 12]),
            mft_start: LittleEndian::read_i32(&buf[ints + 12..ints + 16]),
            bitmap_start: LittleEndian::read_i32(&buf[ints + 16..ints + 20]),
            data_start: LittleEndian::read_i32(&buf[ints + 20..ints + 24]),
            max_extents_per_entry: LittleEndian::read_i32(&buf[ints + 24..ints + 28]),
        }
    }

    pub fn encode(&self) -> [u8; BOOT_RECORD_SIZE] {
        let mut buf = [0u8; BOOT_RECORD_SIZE];
        buf[0..SIGNATURE_SIZE].copy_from_slice(&self.signature);
        buf[SIGNATURE_SIZE..SIGNATURE_SIZE + DESCRIPTION_SIZE].copy_from_slice(&self.description);

        let ints = SIGNATURE_SIZE + DESCRIPTION_SIZE;
        LittleEndian::write_i32(&mut buf[ints..ints + 4], self.partition_size);
        LittleEndian::write_i32(&mut buf[ints + 4..ints + 8], self.cluster_size);
        LittleEndian::write_i32(&mut buf[ints + 8..ints + 12], self.cluster_count);
        LittleEndian::write_i32(&mut buf[ints + 12..ints + 16], self.mft_start);
        LittleEndian::write_i32(&mut buf[ints + 16..ints + 20], self.bitmap_start);
        LittleEndian::write_i32(&mut buf[ints + 20..ints + 24], self.data_start);
        LittleEndian::write_i32(&mut buf[ints + 24..ints + 28], self.max_extents_per_entry);
        buf
    }

    /// Field-level sanity check. Returns the reason for the first field
    /// that fails, `None` when everything holds.
    pub fn validate(&self) -> Option<String> {
        if self.signature[SIGNATURE_SIZE - 1] != 0 {
            return Some("signature is not NUL-terminated".into());
        }
        if self.description[DESCRIPTION_SIZE - 1] != 0 {
            return Some("description is not NUL-terminated".into());
        }
        if self.partition_size < MIN_PARTITION_SIZE {
            return Some(format!("partition size {} is too small", self.partition_size));
        }
        if self.cluster_size <= 0 || self.cluster_size % 4 != 0 {
            return Some(format!("invalid cluster size {}", self.cluster_size));
        }
        if self.cluster_count < 1 {
            return Some(format!("invalid cluster count {}", self.cluster_count));
        }
        if self.mft_start <= 0 {
            return Some(format!("invalid mft start address {}", self.mft_start));
        }
        if self.bitmap_start <= 0 {
            return Some(format!("invalid bitmap start address {}", self.bitmap_start));
        }
        if self.data_start <= 0 {
            return Some(format!("invalid data start address {}", self.data_start));
        }
        if self.max_extents_per_entry <= 0 {
            return Some(format!(
                "invalid max extents per entry {}",
                self.max_extents_per_entry
            ));
        }
        None
    }
}

/// One record of the Master File Table.
///
/// A node spans `count` entries sharing the same uid; each entry carries a
/// slice of the node's extent list. The first unused extent slot terminates
/// the list within an entry.
#[derive(Debug, Clone)]
pub struct MftEntry {
    pub uid: i32,
    pub is_directory: bool,
    /// Order of this entry within the node, 0-based.
    pub order: i32,
    /// Total number of entries of the node.
    pub count: i32,
    pub name: [u8; NODE_NAME_SIZE],
    /// Payload size of the node in bytes.
    pub size: i32,
    pub extents: [Extent; MAX_EXTENTS_PER_ENTRY],
}

impl MftEntry {
    /// A free MFT slot.
    pub fn free() -> Self {
        Self {
            uid: UID_FREE,
            is_directory: false,
            order: 0,
            count: 0,
            name: [0; NODE_NAME_SIZE],
            size: 0,
            extents: [Extent::UNUSED; MAX_EXTENTS_PER_ENTRY],
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.uid == UID_FREE
    }

    pub fn name_str(&self) -> String {
        get_text(&self.name)
    }

    pub fn set_name(&mut self, name: &str) {
        put_text(&mut self.name, name);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NODE_NAME_SIZE];
        name.copy_from_slice(&buf[13..13 + NODE_NAME_SIZE]);

        let mut extents = [Extent::UNUSED; MAX_EXTENTS_PER_ENTRY];
        for (i, extent) in extents.iter_mut().enumerate() {
            let at = 29 + i * EXTENT_SIZE;
            *extent = Extent::decode(&buf[at..at + EXTENT_SIZE]);
        }

        Self {
            uid: LittleEndian::read_i32(&buf[0..4]),
            is_directory: buf[4] != 0,
            order: LittleEndian::read_i32(&buf[5..9]),
            count: LittleEndian::read_i32(&buf[9..13]),
            name,
            size: LittleEndian::read_i32(&buf[25..29]),
            extents,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.uid);
        buf[4] = self.is_directory as u8;
        LittleEndian::write_i32(&mut buf[5..9], self.order);
        LittleEndian::write_i32(&mut buf[9..13], self.count);
        buf[13..13 + NODE_NAME_SIZE].copy_from_slice(&self.name);
        LittleEndian::write_i32(&mut buf[25..29], self.size);
        for (i, extent) in self.extents.iter().enumerate() {
            let at = 29 + i * EXTENT_SIZE;
            extent.encode(&mut buf[at..at + EXTENT_SIZE]);
        }
    }
}

/// An MFT entry together with its index in the table, so a later write
/// lands in the slot it was read from.
#[derive(Debug, Clone)]
pub struct MftSlot {
    pub index: i32,
    pub entry: MftEntry,
}
