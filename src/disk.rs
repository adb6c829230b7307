//! Byte stores backing an image.
//!
//! The engine mutates single-threaded, but the consistency checker shares
//! one image across reader threads, so the access methods take `&self` and
//! every implementation must be safe for concurrent reads.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::RwLock;

/// A positional byte store of a fixed, resizable length.
pub trait Disk: Send + Sync {
    /// Read exactly `buf.len()` bytes starting at `pos`.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` starting at `pos`. The write must be visible to
    /// a subsequent `read_at` before this returns.
    fn write_at(&self, pos: u64, buf: &[u8]) -> io::Result<()>;

    /// Current store length in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Truncate or zero-extend the store to `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;
}

/// A host file as a disk.
///
/// The file is opened once for the whole engine lifetime; a missing file is
/// created empty, which the image layer treats as "not formatted".
pub struct FileDisk {
    file: File,
}

impl FileDisk {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Disk for FileDisk {
    #[cfg(unix)]
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, pos)
    }

    #[cfg(unix)]
    fn write_at(&self, pos: u64, buf: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, pos)
    }

    #[cfg(windows)]
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.seek_read(&mut buf[done..], pos + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of image file",
                ));
            }
            done += n;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn write_at(&self, pos: u64, buf: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.seek_write(&buf[done..], pos + done as u64)?;
            done += n;
        }
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// An in-memory disk for tests.
pub struct MemDisk {
    data: RwLock<Vec<u8>>,
}

impl MemDisk {
    /// An empty (unformatted) disk.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
        }
    }

    /// A disk preloaded with `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy out the whole store.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().unwrap().clone()
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl Disk for MemDisk {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.read().unwrap();
        let start = pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of memory disk",
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.write().unwrap();
        let start = pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "write past end of memory disk",
            ));
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().unwrap().len() as u64)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.data.write().unwrap().resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_disk_round_trip() {
        let disk = MemDisk::new();
        disk.set_len(16).unwrap();
        disk.write_at(4, b"abcd").unwrap();

        let mut buf = [0u8; 4];
        disk.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(disk.len().unwrap(), 16);
    }

    #[test]
    fn test_mem_disk_rejects_out_of_range() {
        let disk = MemDisk::new();
        disk.set_len(8).unwrap();
        assert!(disk.write_at(5, b"abcd").is_err());
        let mut buf = [0u8; 4];
        assert!(disk.read_at(6, &mut buf).is_err());
    }

    #[test]
    fn test_mem_disk_set_len_zero_extends() {
        let disk = MemDisk::with_data(vec![0xFF; 4]);
        disk.set_len(8).unwrap();
        let mut buf = [0u8; 8];
        disk.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_file_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.len().unwrap(), 0);
        disk.set_len(32).unwrap();
        disk.write_at(10, b"hello").unwrap();

        let mut buf = [0u8; 5];
        disk.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        // reopen and observe the same bytes
        drop(disk);
        let disk = FileDisk::open(&path).unwrap();
        disk.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
