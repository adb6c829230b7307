//! The directory layer: directory payloads, the path resolver and the
//! top-level operations the shell calls.
//!
//! A directory's payload is a packed sequence of 32-bit uids. Element 0 is
//! the parent link (the root points at itself); the rest are the children
//! in insertion order. Everything that iterates "children" skips that
//! first element.
//!
//! Failed operations leave the image as it was: allocations happen before
//! linkage, and every partial step is undone in reverse on error.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::image::Image;
use crate::layout::{clip_text, Extent, NODE_NAME_SIZE, UID_ROOT};
use crate::manager::NodeManager;
use crate::node::Node;
use crate::path::{parse, split_leaf, Component, ParsedPath};

/// Node metadata reported by the `info` command.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub uid: i32,
    pub is_directory: bool,
    pub size: i32,
    pub extents: Vec<Extent>,
    pub clusters: Vec<i32>,
}

pub struct Volume<D: Disk> {
    mgr: NodeManager<D>,
    /// Uid of the current working directory.
    cwd: i32,
}

impl<D: Disk> Volume<D> {
    pub fn new(mgr: NodeManager<D>) -> Self {
        Self {
            mgr,
            cwd: UID_ROOT,
        }
    }

    pub fn manager(&self) -> &NodeManager<D> {
        &self.mgr
    }

    pub fn image(&self) -> &Image<D> {
        self.mgr.image()
    }

    pub fn is_opened(&self) -> bool {
        self.image().is_opened()
    }

    pub fn format(&mut self, size: i32, signature: &str, description: &str) -> Result<()> {
        self.mgr.image_mut().format(size, signature, description)?;
        self.cwd = UID_ROOT;
        Ok(())
    }

    // --- directory payload ---

    /// The raw uid list of a directory, parent link included.
    fn child_uids(&self, dir: &Node) -> Result<Vec<i32>> {
        if !dir.is_directory() {
            return Err(FsError::NotADirectory(dir.name()));
        }

        let payload = self.mgr.read_from(dir)?;
        let mut uids = Vec::with_capacity(payload.len() / 4);
        for chunk in payload.chunks_exact(4) {
            uids.push(LittleEndian::read_i32(chunk));
        }
        Ok(uids)
    }

    /// All children of a directory as nodes, in storage order. Element 0
    /// is the parent link.
    pub fn read_children(&self, dir: &Node) -> Result<Vec<Node>> {
        let mut children = Vec::new();
        for uid in self.child_uids(dir)? {
            children.push(self.mgr.find(uid)?);
        }
        Ok(children)
    }

    /// The uid of a directory's parent.
    fn parent_uid(&self, dir: &Node) -> Result<i32> {
        let uids = self.child_uids(dir)?;
        uids.first()
            .copied()
            .ok_or_else(|| FsError::Corrupted(format!("directory {} has no parent link", dir.uid())))
    }

    /// Resize the directory to the new uid list and rewrite its payload.
    fn write_child_uids(&mut self, dir: Node, uids: &[i32]) -> Result<Node> {
        let mut payload = vec![0u8; uids.len() * 4];
        for (chunk, uid) in payload.chunks_exact_mut(4).zip(uids) {
            LittleEndian::write_i32(chunk, *uid);
        }

        let resized = self.mgr.resize(dir, payload.len() as i32)?;
        self.mgr.write_into(&resized, &payload)?;
        Ok(resized)
    }

    /// Link `child_uid` under the directory `dir_uid`. Adding a child that
    /// is already present under the same name succeeds silently; a name
    /// held by a different uid fails `AlreadyExists`.
    fn add_child(&mut self, dir_uid: i32, child_uid: i32, child_name: &str) -> Result<()> {
        let dir = self.mgr.find(dir_uid)?;
        let mut uids = self.child_uids(&dir)?;

        let stored = clip_text(child_name, NODE_NAME_SIZE);
        for &uid in uids.iter().skip(1) {
            if self.mgr.find(uid)?.name() == stored {
                if uid == child_uid {
                    return Ok(());
                }
                return Err(FsError::AlreadyExists(stored));
            }
        }

        uids.push(child_uid);
        self.write_child_uids(dir, &uids)?;
        Ok(())
    }

    /// Unlink `child_uid` from the directory `dir_uid`. At most one entry
    /// matches; a uid that is not present leaves the directory untouched.
    fn remove_child(&mut self, dir_uid: i32, child_uid: i32) -> Result<()> {
        let dir = self.mgr.find(dir_uid)?;
        let mut uids = self.child_uids(&dir)?;

        match uids.iter().skip(1).position(|&uid| uid == child_uid) {
            Some(at) => {
                uids.remove(at + 1);
                self.write_child_uids(dir, &uids)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    // --- resolver ---

    fn root(&self) -> Result<Node> {
        self.mgr.find(UID_ROOT).map_err(|err| match err {
            FsError::NodeNotFound(_) => FsError::RootNotFound,
            other => other,
        })
    }

    /// Walk a parsed path from its anchor to the node it names.
    fn resolve_parsed(&self, parsed: &ParsedPath) -> Result<Node> {
        let mut node = if parsed.absolute {
            self.root()?
        } else {
            self.mgr.find(self.cwd)?
        };

        for component in &parsed.components {
            match component {
                Component::Stay => {}
                Component::RequireDir => {
                    if !node.is_directory() {
                        return Err(FsError::PathNotFound(node.name()));
                    }
                }
                Component::Up => {
                    if node.uid() != UID_ROOT {
                        let parent = self.parent_uid(&node)?;
                        node = self.mgr.find(parent)?;
                    }
                }
                Component::Named(name) => {
                    if !node.is_directory() {
                        return Err(FsError::NotADirectory(node.name()));
                    }

                    let stored = clip_text(name, NODE_NAME_SIZE);
                    let uids = self.child_uids(&node)?;
                    let mut next = None;
                    for &uid in uids.iter().skip(1) {
                        let child = self.mgr.find(uid)?;
                        if child.name() == stored {
                            next = Some(child);
                            break;
                        }
                    }
                    node = next.ok_or_else(|| FsError::PathNotFound(name.clone()))?;
                }
            }
        }

        Ok(node)
    }

    /// Resolve a path string to its node.
    pub fn resolve(&self, path: &str) -> Result<Node> {
        self.resolve_parsed(&parse(path))
    }

    /// Resolve a path and require a directory.
    fn resolve_dir(&self, parsed: &ParsedPath) -> Result<Node> {
        let node = self.resolve_parsed(parsed)?;
        if !node.is_directory() {
            return Err(FsError::NotADirectory(node.name()));
        }
        Ok(node)
    }

    // --- top-level operations ---

    /// Absolute path of the current working directory, `/a/b/` style.
    pub fn pwd(&self) -> Result<String> {
        let mut names = Vec::new();
        let mut uid = self.cwd;

        while uid != UID_ROOT {
            let node = self.mgr.find(uid)?;
            names.push(node.name());
            uid = self.parent_uid(&node)?;
        }

        let mut path = String::from("/");
        for name in names.iter().rev() {
            path.push_str(name);
            path.push('/');
        }
        Ok(path)
    }

    pub fn cd(&mut self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        if !node.is_directory() {
            return Err(FsError::NotADirectory(node.name()));
        }
        self.cwd = node.uid();
        Ok(())
    }

    /// Children of the directory at `path`, parent link excluded.
    pub fn ls(&self, path: &str) -> Result<Vec<Node>> {
        let dir = self.resolve(path)?;
        if !dir.is_directory() {
            return Err(FsError::NotADirectory(dir.name()));
        }
        let mut children = self.read_children(&dir)?;
        children.remove(0);
        Ok(children)
    }

    pub fn info(&self, path: &str) -> Result<NodeInfo> {
        let node = self.resolve(path)?;
        Ok(NodeInfo {
            name: node.name(),
            uid: node.uid(),
            is_directory: node.is_directory(),
            size: node.size(),
            extents: node.extents(),
            clusters: node.clusters(),
        })
    }

    /// Create a directory at `path`. The new payload is the parent link
    /// alone; the parent gains one child entry.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (parent_path, leaf) =
            split_leaf(path).ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
        let parent = self.resolve_dir(&parent_path)?;
        let parent_uid = parent.uid();

        let node = self.mgr.create(&leaf, true, 4)?;
        let uid = node.uid();

        if let Err(err) = self.add_child(parent_uid, uid, &leaf) {
            self.mgr.release(&node)?;
            return Err(err);
        }

        let mut payload = [0u8; 4];
        LittleEndian::write_i32(&mut payload, parent_uid);
        if let Err(err) = self.mgr.write_into(&node, &payload) {
            self.remove_child(parent_uid, uid)?;
            self.mgr.release(&node)?;
            return Err(err);
        }

        debug!("mkdir {path}: uid {uid} under {parent_uid}");
        Ok(())
    }

    /// Remove the empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        if !node.is_directory() {
            return Err(FsError::NotADirectory(node.name()));
        }
        if node.uid() == UID_ROOT {
            return Err(FsError::PathNotFound(path.to_string()));
        }
        if node.size() != 4 {
            return Err(FsError::DirectoryNotEmpty(node.name()));
        }

        let parent_uid = self.parent_uid(&node)?;
        self.remove_child(parent_uid, node.uid())?;
        self.mgr.release(&node)?;
        debug!("rmdir {path}");
        Ok(())
    }

    /// Create a file of `size` bytes at `path`, filling it from `source`.
    pub fn mkfile<R: Read>(&mut self, path: &str, source: &mut R, size: i32) -> Result<()> {
        let (parent_path, leaf) =
            split_leaf(path).ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
        let parent = self.resolve_dir(&parent_path)?;
        let parent_uid = parent.uid();

        let node = self.mgr.create(&leaf, false, size)?;
        let uid = node.uid();

        if let Err(err) = self.add_child(parent_uid, uid, &leaf) {
            self.mgr.release(&node)?;
            return Err(err);
        }

        if let Err(err) = self.mgr.write_into_stream(&node, source) {
            self.remove_child(parent_uid, uid)?;
            self.mgr.release(&node)?;
            return Err(err);
        }

        debug!("mkfile {path}: uid {uid}, {size} bytes");
        Ok(())
    }

    /// Remove the file at `path`.
    pub fn rm(&mut self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        if node.is_directory() {
            return Err(FsError::NotAFile(node.name()));
        }

        let (parent_path, _) =
            split_leaf(path).ok_or_else(|| FsError::FileNotFound(path.to_string()))?;
        let parent = self.resolve_dir(&parent_path)?;

        self.remove_child(parent.uid(), node.uid())?;
        self.mgr.release(&node)?;
        debug!("rm {path}");
        Ok(())
    }

    /// Interpret a move/copy destination: a trailing `/` names the target
    /// directory and keeps the leaf name, anything else splits into the
    /// target directory and a new name.
    fn destination(&self, dst: &str, keep_name: &str) -> Result<(Node, String)> {
        if dst.ends_with('/') {
            let dir = self
                .resolve_dir(&parse(dst))
                .map_err(|err| Self::as_path_not_found(err, dst))?;
            return Ok((dir, keep_name.to_string()));
        }

        let (dir_path, leaf) =
            split_leaf(dst).ok_or_else(|| FsError::PathNotFound(dst.to_string()))?;
        let dir = self
            .resolve_dir(&dir_path)
            .map_err(|err| Self::as_path_not_found(err, dst))?;
        Ok((dir, leaf))
    }

    fn as_path_not_found(err: FsError, path: &str) -> FsError {
        match err {
            FsError::PathNotFound(_) | FsError::NotADirectory(_) => {
                FsError::PathNotFound(path.to_string())
            }
            other => other,
        }
    }

    fn as_file_not_found(err: FsError, path: &str) -> FsError {
        match err {
            FsError::PathNotFound(_) | FsError::NotADirectory(_) | FsError::NodeNotFound(_) => {
                FsError::FileNotFound(path.to_string())
            }
            other => other,
        }
    }

    /// Does `dir` live inside the subtree rooted at `uid` (or is it that
    /// node itself)? Walks the parent links up to the root.
    fn is_within(&self, dir: &Node, uid: i32) -> Result<bool> {
        let mut current = dir.clone();
        loop {
            if current.uid() == uid {
                return Ok(true);
            }
            if current.uid() == UID_ROOT {
                return Ok(false);
            }
            let parent = self.parent_uid(&current)?;
            current = self.mgr.find(parent)?;
        }
    }

    /// Move or rename. The rename happens first, also when source and
    /// destination directory coincide; directory membership changes only
    /// when they differ. Any failure mid-flight is undone in reverse.
    pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
        let node = self
            .resolve(src)
            .map_err(|err| Self::as_file_not_found(err, src))?;
        let (src_parent_path, _) =
            split_leaf(src).ok_or_else(|| FsError::FileNotFound(src.to_string()))?;
        let src_parent = self
            .resolve_dir(&src_parent_path)
            .map_err(|err| Self::as_file_not_found(err, src))?;

        let (dest_dir, new_name) = self.destination(dst, &node.name())?;

        // moving a directory under itself would cut it loose from the tree
        if node.is_directory() && self.is_within(&dest_dir, node.uid())? {
            return Err(FsError::PathNotFound(dst.to_string()));
        }

        let stored = clip_text(&new_name, NODE_NAME_SIZE);
        for child in &self.ls_children(&dest_dir)? {
            if child.name() == stored && child.uid() != node.uid() {
                return Err(FsError::AlreadyExists(stored));
            }
        }

        let uid = node.uid();
        let old_name = node.name();
        let src_parent_uid = src_parent.uid();
        let dest_uid = dest_dir.uid();

        let renamed = self.mgr.rename(node, &new_name)?;

        if dest_uid != src_parent_uid {
            if let Err(err) = self.remove_child(src_parent_uid, uid) {
                self.mgr.rename(renamed, &old_name)?;
                return Err(err);
            }
            if let Err(err) = self.add_child(dest_uid, uid, &new_name) {
                let reverted = self.mgr.rename(renamed, &old_name)?;
                self.add_child(src_parent_uid, uid, &reverted.name())?;
                return Err(err);
            }
        }

        debug!("mv {src} -> {dst}");
        Ok(())
    }

    /// Copy a file. Directories are refused; the copy is a fresh uid
    /// cloned from the source and linked into the destination directory.
    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        let node = self
            .resolve(src)
            .map_err(|err| Self::as_file_not_found(err, src))?;
        if node.is_directory() {
            return Err(FsError::NotAFile(node.name()));
        }

        let (dest_dir, new_name) = self.destination(dst, &node.name())?;

        let stored = clip_text(&new_name, NODE_NAME_SIZE);
        for child in &self.ls_children(&dest_dir)? {
            if child.name() == stored {
                return Err(FsError::AlreadyExists(stored));
            }
        }

        let clone = self.mgr.clone_node(&node, &new_name)?;
        if let Err(err) = self.add_child(dest_dir.uid(), clone.uid(), &new_name) {
            self.mgr.release(&clone)?;
            return Err(err);
        }

        debug!("cp {src} -> {dst}");
        Ok(())
    }

    /// Stream the file at `path` into `dest`.
    pub fn cat<W: Write>(&self, path: &str, dest: &mut W) -> Result<()> {
        let node = self
            .resolve(path)
            .map_err(|err| Self::as_file_not_found(err, path))?;
        if node.is_directory() {
            return Err(FsError::NotAFile(node.name()));
        }
        self.mgr.read_from_stream(&node, dest)
    }

    /// Children minus the parent link, as nodes.
    fn ls_children(&self, dir: &Node) -> Result<Vec<Node>> {
        let mut children = self.read_children(dir)?;
        children.remove(0);
        Ok(children)
    }
}
