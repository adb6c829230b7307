//! Consistency checks: boot record against the actual file, per-node size
//! against cluster count, and tree reachability against the MFT.
//!
//! Everything here only reads the image. The size check is the one
//! parallel code path of the engine: workers pull uids from a shared
//! cursor behind one mutex and funnel their warnings through a second
//! mutex around the output sink.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;
use std::thread;

use crate::disk::Disk;
use crate::error::Result;
use crate::image::Image;
use crate::layout::{MFT_ENTRY_SIZE, UID_ROOT};
use crate::manager::{clusters_needed, load_node};
use crate::node::Node;

/// Verify the boot record against the backing file and its own derived
/// region sizes. One warning line per failed probe; true when silent.
pub fn check_boot_record<D: Disk, W: Write>(image: &Image<D>, output: &mut W) -> Result<bool> {
    let boot = image.boot_record()?;
    let mut ok = true;

    let actual_len = image.disk_len()?;
    if actual_len != boot.partition_size as u64 {
        writeln!(
            output,
            "WARNING: the partition file has {actual_len} bytes but the boot record \
             states {}",
            boot.partition_size
        )?;
        ok = false;
    }

    let mft_bytes = boot.bitmap_start - boot.mft_start;
    if mft_bytes % MFT_ENTRY_SIZE as i32 != 0 {
        writeln!(
            output,
            "WARNING: the mft region of {mft_bytes} bytes is not a whole number of entries"
        )?;
        ok = false;
    }

    let bitmap_bytes = boot.data_start - boot.bitmap_start;
    if bitmap_bytes != (boot.cluster_count + 7) / 8 {
        writeln!(
            output,
            "WARNING: the bitmap region has {bitmap_bytes} bytes but {} clusters need {}",
            boot.cluster_count,
            (boot.cluster_count + 7) / 8
        )?;
        ok = false;
    }

    let data_bytes = boot.partition_size - boot.data_start;
    if data_bytes != boot.cluster_count * boot.cluster_size {
        writeln!(
            output,
            "WARNING: the data region has {data_bytes} bytes but {} clusters of {} need {}",
            boot.cluster_count,
            boot.cluster_size,
            boot.cluster_count * boot.cluster_size
        )?;
        ok = false;
    }

    Ok(ok)
}

/// Shared scan state of the size-check workers.
struct SizeCheckCursor {
    next_index: i32,
    visited: HashSet<i32>,
}

/// Hand the calling worker the next unvisited live uid, or `None` when the
/// table is exhausted.
fn next_uid<D: Disk>(image: &Image<D>, cursor: &Mutex<SizeCheckCursor>) -> Result<Option<i32>> {
    let mut cursor = cursor.lock().unwrap();
    let entry_count = image.mft_entry_count()?;

    while cursor.next_index < entry_count {
        let slot = image.read_entry(cursor.next_index)?;
        cursor.next_index += 1;

        if slot.entry.is_free() {
            continue;
        }
        if cursor.visited.insert(slot.entry.uid) {
            return Ok(Some(slot.entry.uid));
        }
    }
    Ok(None)
}

/// Check every node's cluster count against its size, with `workers`
/// threads. A node warns when its clusters cannot hold the payload, or
/// when it holds more clusters than an allocation of its size would get.
pub fn check_node_sizes<D: Disk, W: Write + Send>(
    image: &Image<D>,
    workers: usize,
    output: &mut W,
) -> Result<bool> {
    let cluster_size = image.cluster_size()?;
    let cursor = Mutex::new(SizeCheckCursor {
        next_index: 0,
        visited: HashSet::new(),
    });
    let sink: Mutex<&mut W> = Mutex::new(output);
    let ok = Mutex::new(true);
    let failure: Mutex<Option<crate::error::FsError>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| {
                let result = size_check_worker(image, cluster_size, &cursor, &sink, &ok);
                if let Err(err) = result {
                    failure.lock().unwrap().get_or_insert(err);
                }
            });
        }
    });

    if let Some(err) = failure.into_inner().unwrap() {
        return Err(err);
    }
    Ok(ok.into_inner().unwrap())
}

fn size_check_worker<D: Disk, W: Write>(
    image: &Image<D>,
    cluster_size: i32,
    cursor: &Mutex<SizeCheckCursor>,
    sink: &Mutex<&mut W>,
    ok: &Mutex<bool>,
) -> Result<()> {
    while let Some(uid) = next_uid(image, cursor)? {
        let node = load_node(image, uid)?;
        let clusters = node.clusters().len() as i64;
        let size = node.size();

        if clusters * (cluster_size as i64) < (size as i64) {
            writeln!(
                sink.lock().unwrap(),
                "WARNING: the node {uid} has {clusters} clusters - fewer than is needed \
                 for the node size {size} bytes"
            )?;
            *ok.lock().unwrap() = false;
        } else if clusters > clusters_needed(size, cluster_size) as i64 {
            writeln!(
                sink.lock().unwrap(),
                "WARNING: the node {uid} has {clusters} clusters - more than is needed \
                 for the node size {size} bytes"
            )?;
            *ok.lock().unwrap() = false;
        }
    }
    Ok(())
}

/// Walk the directory tree from the root and compare against the MFT:
/// every live uid must be reached exactly once.
pub fn check_tree<D: Disk, W: Write>(image: &Image<D>, output: &mut W) -> Result<bool> {
    let mut ok = true;

    let mut reachable = HashSet::new();
    let mut reachable_twice = HashSet::new();

    let mut stack = vec![load_node(image, UID_ROOT)?];
    while let Some(node) = stack.pop() {
        if !reachable.insert(node.uid()) {
            reachable_twice.insert(node.uid());
            continue;
        }
        if !node.is_directory() {
            continue;
        }
        // children of this directory, skipping the parent link
        for uid in directory_child_uids(image, &node)?.into_iter().skip(1) {
            stack.push(load_node(image, uid)?);
        }
    }

    let mut checked = HashSet::new();
    for index in 0..image.mft_entry_count()? {
        let slot = image.read_entry(index)?;
        if slot.entry.is_free() || !checked.insert(slot.entry.uid) {
            continue;
        }

        if !reachable.contains(&slot.entry.uid) {
            writeln!(
                output,
                "WARNING: the node {} is not reachable from the directory structure",
                slot.entry.uid
            )?;
            ok = false;
        } else if reachable_twice.contains(&slot.entry.uid) {
            writeln!(
                output,
                "WARNING: the node {} is present in multiple directories",
                slot.entry.uid
            )?;
            ok = false;
        }
    }

    Ok(ok)
}

/// Raw uid list of a directory payload, parent link first. Kept local so
/// the checker does not depend on the directory layer it is auditing.
fn directory_child_uids<D: Disk>(image: &Image<D>, dir: &Node) -> Result<Vec<i32>> {
    let mut payload = vec![0u8; dir.size() as usize];
    image.read_clusters(&dir.clusters(), &mut payload)?;

    let mut uids = Vec::with_capacity(payload.len() / 4);
    for chunk in payload.chunks_exact(4) {
        uids.push(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(uids)
}

/// Run all three checks in order. True when every one stays silent.
pub fn check_all<D: Disk, W: Write + Send>(
    image: &Image<D>,
    workers: usize,
    output: &mut W,
) -> Result<bool> {
    let boot_ok = check_boot_record(image, output)?;
    let sizes_ok = check_node_sizes(image, workers, output)?;
    let tree_ok = check_tree(image, output)?;
    Ok(boot_ok && sizes_ok && tree_ok)
}
