//! The image container: owns the backing disk, loads and validates the
//! boot record, and exposes the typed accessors everything above it uses.
//!
//! No region is cached in memory except the boot record itself; every MFT,
//! bitmap and cluster access goes to the backing store, so writes from one
//! operation are visible to the next without any invalidation protocol.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::layout::{
    put_text, BootRecord, Extent, MftEntry, MftSlot, BOOT_RECORD_SIZE, CLUSTER_SIZE,
    DESCRIPTION_SIZE, MAX_EXTENTS_PER_ENTRY, MAX_PARTITION_SIZE, MFT_ENTRY_SIZE, MFT_SHARE,
    MIN_PARTITION_SIZE, SIGNATURE_SIZE, UID_ROOT,
};

pub struct Image<D: Disk> {
    disk: D,
    /// `None` while the image is not formatted.
    boot: Option<BootRecord>,
}

impl<D: Disk> Image<D> {
    /// Bind an image to a disk.
    ///
    /// An empty disk leaves the image closed (every typed operation fails
    /// with `NotFormatted` until `format` runs). A non-empty disk must
    /// carry a readable, valid boot record or the call fails `Corrupted`.
    pub fn open(disk: D) -> Result<Self> {
        if disk.len()? == 0 {
            return Ok(Self { disk, boot: None });
        }

        let mut buf = [0u8; BOOT_RECORD_SIZE];
        disk.read_at(0, &mut buf)
            .map_err(|_| FsError::Corrupted("can't read the partition boot record".into()))?;

        let boot = BootRecord::decode(&buf);
        if let Some(reason) = boot.validate() {
            return Err(FsError::Corrupted(reason));
        }

        Ok(Self {
            disk,
            boot: Some(boot),
        })
    }

    pub fn is_opened(&self) -> bool {
        self.boot.is_some()
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn boot_record(&self) -> Result<&BootRecord> {
        self.boot.as_ref().ok_or(FsError::NotFormatted)
    }

    pub fn partition_size(&self) -> Result<i32> {
        Ok(self.boot_record()?.partition_size)
    }

    pub fn cluster_size(&self) -> Result<i32> {
        Ok(self.boot_record()?.cluster_size)
    }

    pub fn cluster_count(&self) -> Result<i32> {
        Ok(self.boot_record()?.cluster_count)
    }

    pub fn mft_entry_count(&self) -> Result<i32> {
        Ok(self.boot_record()?.mft_entry_count())
    }

    pub fn max_extents_per_entry(&self) -> Result<i32> {
        Ok(self.boot_record()?.max_extents_per_entry)
    }

    /// Actual length of the backing store, for the consistency checker.
    pub fn disk_len(&self) -> Result<u64> {
        Ok(self.disk.len()?)
    }

    /// Lay down a fresh filesystem over whatever the disk held before.
    ///
    /// The resulting partition is of equal or slightly smaller size than
    /// `size`: the MFT takes its fixed share, and the remainder is split
    /// between the bitmap and as many whole clusters as fit.
    pub fn format(&mut self, size: i32, signature: &str, description: &str) -> Result<()> {
        if size > MAX_PARTITION_SIZE {
            return Err(FsError::BadFormat(format!(
                "max partition size {MAX_PARTITION_SIZE} exceeded"
            )));
        }
        if size < MIN_PARTITION_SIZE {
            return Err(FsError::BadFormat(format!(
                "min partition size {MIN_PARTITION_SIZE} not reached"
            )));
        }
        if signature.len() > SIGNATURE_SIZE - 1 {
            return Err(FsError::BadFormat(format!(
                "max signature length is {}",
                SIGNATURE_SIZE - 1
            )));
        }
        if description.len() > DESCRIPTION_SIZE - 1 {
            return Err(FsError::BadFormat(format!(
                "max description length is {}",
                DESCRIPTION_SIZE - 1
            )));
        }

        let mft_entry_count = (MFT_SHARE * size as f64) as i32 / MFT_ENTRY_SIZE as i32;
        let mft_bytes = mft_entry_count * MFT_ENTRY_SIZE as i32;
        let cluster_count =
            (8i64 * (size - BOOT_RECORD_SIZE as i32 - mft_bytes) as i64 / (1 + 8 * CLUSTER_SIZE as i64)) as i32;
        let bitmap_bytes = (cluster_count + 7) / 8;
        let partition_size =
            BOOT_RECORD_SIZE as i32 + mft_bytes + bitmap_bytes + cluster_count * CLUSTER_SIZE;

        if mft_entry_count < 2 || cluster_count < 1 {
            return Err(FsError::BadFormat(format!(
                "size {size} leaves no room for the mft and data regions"
            )));
        }

        let mut boot = BootRecord {
            signature: [0; SIGNATURE_SIZE],
            description: [0; DESCRIPTION_SIZE],
            partition_size,
            cluster_size: CLUSTER_SIZE,
            cluster_count,
            mft_start: BOOT_RECORD_SIZE as i32,
            bitmap_start: BOOT_RECORD_SIZE as i32 + mft_bytes,
            data_start: BOOT_RECORD_SIZE as i32 + mft_bytes + bitmap_bytes,
            max_extents_per_entry: MAX_EXTENTS_PER_ENTRY as i32,
        };
        put_text(&mut boot.signature, signature);
        put_text(&mut boot.description, description);

        // Truncate, zero-extend to the final size (bitmap and clusters are
        // all-zero), then fill in the header and the free MFT entries.
        self.disk.set_len(0)?;
        self.disk.set_len(partition_size as u64)?;
        self.disk.write_at(0, &boot.encode())?;

        let mut mft = vec![0u8; mft_bytes as usize];
        let free = MftEntry::free();
        for i in 0..mft_entry_count as usize {
            free.encode(&mut mft[i * MFT_ENTRY_SIZE..(i + 1) * MFT_ENTRY_SIZE]);
        }
        self.disk.write_at(boot.mft_start as u64, &mft)?;

        self.boot = Some(boot);

        // The root directory occupies MFT index 0 and cluster 0; its
        // payload is a single uid, the parent link pointing at itself.
        let mut root = MftEntry::free();
        root.uid = UID_ROOT;
        root.is_directory = true;
        root.order = 0;
        root.count = 1;
        root.size = 4;
        root.set_name("/");
        root.extents[0] = Extent { start: 0, count: 1 };
        self.write_entry(&MftSlot {
            index: 0,
            entry: root,
        })?;
        self.write_bit(0, true)?;

        let mut payload = [0u8; 4];
        LittleEndian::write_i32(&mut payload, UID_ROOT);
        self.write_cluster(0, &payload)?;

        info!(
            "formatted partition: {partition_size} bytes, {mft_entry_count} mft entries, \
             {cluster_count} clusters"
        );
        Ok(())
    }

    /// Bounded raw read at an absolute image offset.
    fn read(&self, pos: i64, buf: &mut [u8]) -> Result<()> {
        let partition_size = self.partition_size()? as i64;
        if pos < 0 || pos + buf.len() as i64 > partition_size {
            return Err(FsError::OutOfBounds);
        }
        self.disk.read_at(pos as u64, buf)?;
        Ok(())
    }

    /// Bounded raw write at an absolute image offset.
    fn write(&self, pos: i64, buf: &[u8]) -> Result<()> {
        let partition_size = self.partition_size()? as i64;
        if pos < 0 || pos + buf.len() as i64 > partition_size {
            return Err(FsError::OutOfBounds);
        }
        self.disk.write_at(pos as u64, buf)?;
        Ok(())
    }

    // --- MFT access ---

    pub fn read_entry(&self, index: i32) -> Result<MftSlot> {
        if index < 0 || index >= self.mft_entry_count()? {
            return Err(FsError::MftOutOfBounds(index));
        }

        let pos = self.boot_record()?.mft_start as i64 + index as i64 * MFT_ENTRY_SIZE as i64;
        let mut buf = [0u8; MFT_ENTRY_SIZE];
        self.read(pos, &mut buf)?;

        Ok(MftSlot {
            index,
            entry: MftEntry::decode(&buf),
        })
    }

    pub fn write_entry(&self, slot: &MftSlot) -> Result<()> {
        if slot.index < 0 || slot.index >= self.mft_entry_count()? {
            return Err(FsError::MftOutOfBounds(slot.index));
        }

        let pos = self.boot_record()?.mft_start as i64 + slot.index as i64 * MFT_ENTRY_SIZE as i64;
        let mut buf = [0u8; MFT_ENTRY_SIZE];
        slot.entry.encode(&mut buf);
        self.write(pos, &buf)
    }

    /// All entries carrying `uid`, sorted ascending by their order field.
    /// The scan is linear over the whole table and the sort is stable.
    pub fn read_entries_by_uid(&self, uid: i32) -> Result<Vec<MftSlot>> {
        let mut slots = Vec::new();
        for index in 0..self.mft_entry_count()? {
            let slot = self.read_entry(index)?;
            if slot.entry.uid == uid {
                slots.push(slot);
            }
        }
        slots.sort_by_key(|slot| slot.entry.order);
        Ok(slots)
    }

    // --- bitmap access ---

    pub fn read_bit(&self, index: i32) -> Result<bool> {
        if index < 0 || index >= self.cluster_count()? {
            return Err(FsError::BitmapOutOfBounds(index));
        }

        let pos = self.boot_record()?.bitmap_start as i64 + index as i64 / 8;
        let mut byte = [0u8; 1];
        self.read(pos, &mut byte)?;
        Ok(byte[0] & (1 << (index % 8)) != 0)
    }

    pub fn write_bit(&self, index: i32, value: bool) -> Result<()> {
        if index < 0 || index >= self.cluster_count()? {
            return Err(FsError::BitmapOutOfBounds(index));
        }

        let pos = self.boot_record()?.bitmap_start as i64 + index as i64 / 8;
        let mut byte = [0u8; 1];
        self.read(pos, &mut byte)?;

        if value {
            byte[0] |= 1 << (index % 8);
        } else {
            byte[0] &= !(1 << (index % 8));
        }
        self.write(pos, &byte)
    }

    // --- cluster access ---

    fn cluster_pos(&self, index: i32) -> Result<i64> {
        let boot = self.boot_record()?;
        Ok(boot.data_start as i64 + index as i64 * boot.cluster_size as i64)
    }

    /// Read `buf.len()` bytes from the front of cluster `index`.
    pub fn read_cluster(&self, index: i32, buf: &mut [u8]) -> Result<()> {
        if index < 0 || index >= self.cluster_count()? {
            return Err(FsError::DataOutOfBounds(index));
        }
        if buf.len() > self.cluster_size()? as usize {
            return Err(FsError::ClusterOverflow);
        }
        self.read(self.cluster_pos(index)?, buf)
    }

    /// Write `buf` into the front of cluster `index`.
    pub fn write_cluster(&self, index: i32, buf: &[u8]) -> Result<()> {
        if index < 0 || index >= self.cluster_count()? {
            return Err(FsError::DataOutOfBounds(index));
        }
        if buf.len() > self.cluster_size()? as usize {
            return Err(FsError::ClusterOverflow);
        }
        self.write(self.cluster_pos(index)?, buf)
    }

    /// Gather `buf.len()` bytes laid out contiguously across `clusters`, in
    /// list order. The last cluster may be read partially; clusters beyond
    /// the used prefix are not touched.
    pub fn read_clusters(&self, clusters: &[i32], buf: &mut [u8]) -> Result<()> {
        let cluster_size = self.cluster_size()? as usize;
        if buf.len() > cluster_size * clusters.len() {
            return Err(FsError::ClusterOverflow);
        }

        let mut at = 0;
        for &index in clusters {
            if at >= buf.len() {
                break;
            }
            let take = cluster_size.min(buf.len() - at);
            self.read_cluster(index, &mut buf[at..at + take])?;
            at += take;
        }
        Ok(())
    }

    /// Scatter `buf` contiguously across `clusters`, in list order.
    pub fn write_clusters(&self, clusters: &[i32], buf: &[u8]) -> Result<()> {
        let cluster_size = self.cluster_size()? as usize;
        if buf.len() > cluster_size * clusters.len() {
            return Err(FsError::ClusterOverflow);
        }

        let mut at = 0;
        for &index in clusters {
            if at >= buf.len() {
                break;
            }
            let take = cluster_size.min(buf.len() - at);
            self.write_cluster(index, &buf[at..at + take])?;
            at += take;
        }
        Ok(())
    }

    /// Stream `len` bytes out of `clusters` into `dest`, one cluster-sized
    /// chunk at a time.
    pub fn read_clusters_to<W: Write>(
        &self,
        clusters: &[i32],
        len: usize,
        dest: &mut W,
    ) -> Result<()> {
        let cluster_size = self.cluster_size()? as usize;
        if len > cluster_size * clusters.len() {
            return Err(FsError::ClusterOverflow);
        }

        let mut chunk = vec![0u8; cluster_size];
        let mut remaining = len;
        for &index in clusters {
            if remaining == 0 {
                break;
            }
            let take = cluster_size.min(remaining);
            self.read_cluster(index, &mut chunk[..take])?;
            dest.write_all(&chunk[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    /// Stream `len` bytes from `source` into `clusters`, one cluster-sized
    /// chunk at a time.
    pub fn write_clusters_from<R: Read>(
        &self,
        clusters: &[i32],
        len: usize,
        source: &mut R,
    ) -> Result<()> {
        let cluster_size = self.cluster_size()? as usize;
        if len > cluster_size * clusters.len() {
            return Err(FsError::ClusterOverflow);
        }

        let mut chunk = vec![0u8; cluster_size];
        let mut remaining = len;
        for &index in clusters {
            if remaining == 0 {
                break;
            }
            let take = cluster_size.min(remaining);
            source.read_exact(&mut chunk[..take])?;
            self.write_cluster(index, &chunk[..take])?;
            remaining -= take;
        }
        debug!("streamed {len} bytes into {} clusters", clusters.len());
        Ok(())
    }
}
