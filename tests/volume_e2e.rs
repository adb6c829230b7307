//! End-to-end tests of the engine: format, the directory layer, the
//! allocator and the consistency checks, driven through the public API
//! over in-memory and file-backed disks.

use std::io::Read;

use ntfslite::check::check_all;
use ntfslite::layout::{UID_FREE, UID_ROOT};
use ntfslite::manager::{clusters_needed, load_node};
use ntfslite::{Disk, FileDisk, FsError, Image, MemDisk, NodeManager, Volume};

fn fresh_volume(seed: u64) -> Volume<MemDisk> {
    let mut image = Image::open(MemDisk::new()).unwrap();
    image.format(600_000, "alice", "demo").unwrap();
    Volume::new(NodeManager::with_seed(image, seed))
}

/// Assert the allocation invariants: every bitmap bit is set iff exactly
/// one live node owns that cluster, and every node's entries carry orders
/// `0..count`.
fn audit<D: Disk>(image: &Image<D>) {
    let cluster_count = image.cluster_count().unwrap();
    let cluster_size = image.cluster_size().unwrap();
    let mut owners = vec![0u32; cluster_count as usize];

    let mut seen = std::collections::HashSet::new();
    for index in 0..image.mft_entry_count().unwrap() {
        let slot = image.read_entry(index).unwrap();
        if slot.entry.uid == UID_FREE || !seen.insert(slot.entry.uid) {
            continue;
        }

        let node = load_node(image, slot.entry.uid).unwrap();

        // orders 0..count, all entries agreeing on the shared fields
        let slots = node.slots();
        assert_eq!(slots.len() as i32, node.entry_count());
        for (order, slot) in slots.iter().enumerate() {
            assert_eq!(slot.entry.order, order as i32);
            assert_eq!(slot.entry.uid, node.uid());
            assert_eq!(slot.entry.size, node.size());
        }

        // capacity covers the payload
        assert!(node.capacity(cluster_size) >= node.size() as i64);

        for cluster in node.clusters() {
            owners[cluster as usize] += 1;
        }
    }

    for (cluster, &count) in owners.iter().enumerate() {
        assert!(count <= 1, "cluster {cluster} owned {count} times");
        assert_eq!(
            image.read_bit(cluster as i32).unwrap(),
            count == 1,
            "bitmap bit {cluster} disagrees with ownership"
        );
    }
}

// ============================================================================
// Test Group A: format and reopen
// ============================================================================

#[test]
fn test_format_then_reopen_preserves_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("part.img");

    {
        let disk = FileDisk::open(&path).unwrap();
        let mut image = Image::open(disk).unwrap();
        assert!(!image.is_opened());
        image.format(600_000, "alice", "demo").unwrap();
    }

    let disk = FileDisk::open(&path).unwrap();
    let image = Image::open(disk).unwrap();
    assert!(image.is_opened());
    let boot = image.boot_record().unwrap();
    assert_eq!(boot.signature_str(), "alice");
    assert_eq!(boot.description_str(), "demo");
    assert_eq!(boot.cluster_count, 527);
    assert_eq!(boot.mft_entry_count(), 210);
}

#[test]
fn test_fresh_root_lists_empty() {
    let vol = fresh_volume(1);
    assert!(vol.ls("/").unwrap().is_empty());
    audit(vol.image());
}

#[test]
fn test_truncated_image_refuses_to_open() {
    let disk = MemDisk::with_data(vec![1u8; 64]);
    assert!(matches!(Image::open(disk), Err(FsError::Corrupted(_))));
}

// ============================================================================
// Test Group B: files and directories
// ============================================================================

#[test]
fn test_mkfile_cat_round_trip() {
    let mut vol = fresh_volume(2);
    vol.mkdir("/a").unwrap();

    let data: Vec<u8> = (0..3000u32).map(|i| (i * 13 % 256) as u8).collect();
    vol.mkfile("/a/f", &mut data.as_slice(), data.len() as i32)
        .unwrap();

    let mut out = Vec::new();
    vol.cat("/a/f", &mut out).unwrap();
    assert_eq!(out, data);

    // 3000 bytes -> ceil(3000/1024) + 1 = 4 clusters in one extent
    let info = vol.info("/a/f").unwrap();
    assert_eq!(info.size, 3000);
    assert_eq!(info.extents.len(), 1);
    assert_eq!(info.clusters.len(), 4);
    audit(vol.image());
}

#[test]
fn test_nested_directories_and_pwd() {
    let mut vol = fresh_volume(3);
    vol.mkdir("/a").unwrap();
    vol.mkdir("/a/b").unwrap();

    let children = vol.ls("/a").unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "b");
    assert!(children[0].is_directory());

    vol.cd("/a/b").unwrap();
    assert_eq!(vol.pwd().unwrap(), "/a/b/");
    audit(vol.image());
}

#[test]
fn test_exact_cluster_multiple_gets_reserve() {
    let mut vol = fresh_volume(4);
    let data = vec![7u8; 2048];
    vol.mkfile("/f", &mut data.as_slice(), 2048).unwrap();

    let info = vol.info("/f").unwrap();
    assert_eq!(info.clusters.len(), 3);
    assert_eq!(clusters_needed(2048, 1024), 3);
    audit(vol.image());
}

#[test]
fn test_mkdir_rmdir_round_trip_restores_image() {
    let mut vol = fresh_volume(5);
    let before = {
        let data_start = vol.image().boot_record().unwrap().data_start as usize;
        let mut snapshot = vol.image().disk().snapshot();
        snapshot.truncate(data_start);
        snapshot
    };

    vol.mkdir("/a").unwrap();
    vol.rmdir("/a").unwrap();

    // boot record, MFT and bitmap are byte-identical again; released
    // cluster contents are allowed to differ
    let after = {
        let data_start = vol.image().boot_record().unwrap().data_start as usize;
        let mut snapshot = vol.image().disk().snapshot();
        snapshot.truncate(data_start);
        snapshot
    };
    assert_eq!(before, after);
    audit(vol.image());
}

// ============================================================================
// Test Group C: fragmentation
// ============================================================================

#[test]
fn test_fragmented_allocation_uses_maximal_runs() {
    let mut vol = fresh_volume(6);

    // Fill the data region: five 1 KiB files (two clusters each, clusters
    // 1..=10) and one plug consuming every remaining cluster.
    for name in ["f1", "f2", "f3", "f4", "f5"] {
        let data = vec![1u8; 1024];
        vol.mkfile(&format!("/{name}"), &mut data.as_slice(), 1024)
            .unwrap();
    }
    let remaining = 527 - 1 - 10;
    let plug_size = (remaining - 1) * 1024;
    vol.mkfile(
        "/plug",
        &mut std::io::repeat(9).take(plug_size as u64),
        plug_size,
    )
    .unwrap();

    // Free alternating files: free runs {1,2}, {5,6}, {9,10}.
    vol.rm("/f1").unwrap();
    vol.rm("/f3").unwrap();
    vol.rm("/f5").unwrap();

    // 5000 bytes needs 6 clusters; no contiguous run is big enough, so
    // the allocation falls back to collecting runs in ascending order.
    let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    vol.mkfile("/frag", &mut data.as_slice(), 5000).unwrap();

    let info = vol.info("/frag").unwrap();
    assert!(info.extents.len() >= 2);
    assert_eq!(info.clusters.len(), 6);
    for pair in info.extents.windows(2) {
        assert!(pair[0].start < pair[1].start);
    }

    let mut out = Vec::new();
    vol.cat("/frag", &mut out).unwrap();
    assert_eq!(out, data);
    audit(vol.image());
}

#[test]
fn test_allocation_failures_leave_no_trace() {
    let mut vol = fresh_volume(7);
    vol.mkdir("/a").unwrap();

    let before = vol.image().disk().snapshot();
    let err = vol
        .mkfile("/a/huge", &mut std::io::repeat(0).take(600_000), 600_000)
        .unwrap_err();
    assert!(matches!(err, FsError::NotEnoughClusters(_)));
    assert_eq!(vol.image().disk().snapshot(), before);
    audit(vol.image());
}

// ============================================================================
// Test Group D: move and copy
// ============================================================================

#[test]
fn test_mv_rename_preserves_uid_and_content() {
    let mut vol = fresh_volume(8);
    vol.mkdir("/a").unwrap();
    vol.mkfile("/a/f", &mut &b"payload"[..], 7).unwrap();
    let uid = vol.info("/a/f").unwrap().uid;

    vol.mv("/a/f", "/a/g").unwrap();

    assert!(matches!(vol.info("/a/f"), Err(FsError::FileNotFound(_))));
    assert_eq!(vol.info("/a/g").unwrap().uid, uid);
    let mut out = Vec::new();
    vol.cat("/a/g", &mut out).unwrap();
    assert_eq!(out, b"payload");
    audit(vol.image());
}

#[test]
fn test_mv_round_trip_restores_original_place() {
    let mut vol = fresh_volume(9);
    vol.mkdir("/a").unwrap();
    vol.mkdir("/dst").unwrap();
    vol.mkfile("/a/f", &mut &b"x"[..], 1).unwrap();

    vol.mv("/a/f", "/dst/").unwrap();
    assert!(vol.ls("/a").unwrap().is_empty());
    assert_eq!(vol.ls("/dst").unwrap()[0].name(), "f");

    vol.mv("/dst/f", "/a/").unwrap();
    assert_eq!(vol.ls("/a").unwrap()[0].name(), "f");
    assert!(vol.ls("/dst").unwrap().is_empty());
    audit(vol.image());
}

#[test]
fn test_cp_then_rm_copy_leaves_source_alone() {
    let mut vol = fresh_volume(10);
    let data: Vec<u8> = (0..2500u32).map(|i| (i * 3 % 256) as u8).collect();
    vol.mkfile("/src", &mut data.as_slice(), data.len() as i32)
        .unwrap();
    let src_info = vol.info("/src").unwrap();

    vol.cp("/src", "/copy").unwrap();
    vol.rm("/copy").unwrap();

    let again = vol.info("/src").unwrap();
    assert_eq!(again.uid, src_info.uid);
    assert_eq!(again.size, src_info.size);
    assert_eq!(again.clusters, src_info.clusters);
    let mut out = Vec::new();
    vol.cat("/src", &mut out).unwrap();
    assert_eq!(out, data);
    audit(vol.image());
}

#[test]
fn test_cp_refuses_directories() {
    let mut vol = fresh_volume(11);
    vol.mkdir("/a").unwrap();
    assert!(matches!(vol.cp("/a", "/b"), Err(FsError::NotAFile(_))));
}

// ============================================================================
// Test Group E: consistency checks
// ============================================================================

#[test]
fn test_check_silent_after_ordinary_traffic() {
    let mut vol = fresh_volume(12);
    vol.mkdir("/docs").unwrap();
    vol.mkfile("/docs/f", &mut &[5u8; 3000][..], 3000).unwrap();
    vol.mkfile("/g", &mut &[6u8; 100][..], 100).unwrap();
    vol.mv("/g", "/docs/").unwrap();
    vol.cp("/docs/f", "/f2").unwrap();
    vol.rm("/docs/g").unwrap();

    let mut out = Vec::new();
    assert!(check_all(vol.image(), 4, &mut out).unwrap());
    assert!(out.is_empty(), "{}", String::from_utf8_lossy(&out));
    audit(vol.image());
}

#[test]
fn test_check_runs_on_file_backed_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("part.img");

    let disk = FileDisk::open(&path).unwrap();
    let mut image = Image::open(disk).unwrap();
    image.format(600_000, "alice", "demo").unwrap();
    let mut vol = Volume::new(NodeManager::with_seed(image, 13));

    vol.mkdir("/a").unwrap();
    vol.mkfile("/a/f", &mut &[1u8; 4000][..], 4000).unwrap();

    let mut out = Vec::new();
    assert!(check_all(vol.image(), 8, &mut out).unwrap());
    assert!(out.is_empty());
}

// ============================================================================
// Test Group F: tree structure
// ============================================================================

#[test]
fn test_every_live_node_has_one_parent() {
    let mut vol = fresh_volume(14);
    vol.mkdir("/a").unwrap();
    vol.mkdir("/a/b").unwrap();
    vol.mkfile("/a/b/f", &mut &b"z"[..], 1).unwrap();

    // collect every live uid from the MFT
    let image = vol.image();
    let mut live = std::collections::HashSet::new();
    for index in 0..image.mft_entry_count().unwrap() {
        let slot = image.read_entry(index).unwrap();
        if slot.entry.uid != UID_FREE {
            live.insert(slot.entry.uid);
        }
    }

    // count memberships across all directories
    let mut membership: std::collections::HashMap<i32, u32> = std::collections::HashMap::new();
    for &uid in &live {
        let node = load_node(image, uid).unwrap();
        if !node.is_directory() {
            continue;
        }
        for child in vol.read_children(&node).unwrap().iter().skip(1) {
            *membership.entry(child.uid()).or_default() += 1;
        }
    }

    for &uid in &live {
        let expected = if uid == UID_ROOT { 0 } else { 1 };
        assert_eq!(
            membership.get(&uid).copied().unwrap_or(0),
            expected,
            "uid {uid} membership"
        );
    }
}

#[test]
fn test_root_parent_link_is_root() {
    let vol = fresh_volume(15);
    let root = vol.resolve("/").unwrap();
    let children = vol.read_children(&root).unwrap();
    assert_eq!(children[0].uid(), UID_ROOT);
}
