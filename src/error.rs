use thiserror::Error;

/// Errors produced by the filesystem engine.
///
/// The taxonomy is closed: the shell either maps a variant to one of its
/// short replies (`PATH NOT FOUND`, `EXISTS`, ...) or prints it verbatim as
/// `ERROR: <message>`.
#[derive(Error, Debug)]
pub enum FsError {
    // --- image container ---
    #[error("partition file is not opened, probably not formatted")]
    NotFormatted,

    #[error("partition is corrupted: {0}")]
    Corrupted(String),

    #[error("bad format arguments: {0}")]
    BadFormat(String),

    #[error("trying to access data outside of the partition")]
    OutOfBounds,

    #[error("mft entry index {0} is out of bounds")]
    MftOutOfBounds(i32),

    #[error("bitmap bit index {0} is out of bounds")]
    BitmapOutOfBounds(i32),

    #[error("cluster index {0} is out of bounds")]
    DataOutOfBounds(i32),

    #[error("data does not fit into the cluster capacity")]
    ClusterOverflow,

    // --- node manager ---
    #[error("not enough free clusters for a node of size {0}")]
    NotEnoughClusters(i32),

    #[error("not enough free mft entries for {0} extents")]
    NotEnoughMftEntries(usize),

    #[error("the node with uid {0} does not exist")]
    NodeNotFound(i32),

    #[error("no mft entries given for the node construction")]
    NodeConstruct,

    // --- directory layer ---
    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("the root directory is missing")]
    RootNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
