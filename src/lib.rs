//! ntfslite is a small single-file NTFS-inspired filesystem: a disk image
//! holding a boot record, a Master File Table of fixed-size entries, a
//! cluster allocation bitmap and a data region of fixed-size clusters.
//!
//! The layers, bottom to top:
//! 1. `disk` — positional byte stores (host file, in-memory).
//! 2. `image` — the image container: layout, raw I/O, typed accessors.
//! 3. `node` / `manager` — the node aggregate and its allocator.
//! 4. `path` / `volume` — the directory layer and the path resolver.
//! 5. `check` — consistency checks over a read-only view.
//! 6. `shell` — the interactive command loop of the binary.

pub mod check;
pub mod disk;
pub mod error;
pub mod image;
pub mod layout;
pub mod manager;
pub mod node;
pub mod path;
pub mod shell;
pub mod volume;

pub use disk::{Disk, FileDisk, MemDisk};
pub use error::{FsError, Result};
pub use image::Image;
pub use manager::NodeManager;
pub use node::Node;
pub use shell::Shell;
pub use volume::Volume;
