use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("write of {len} bytes at offset {offset} exceeds output length {total_len}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        total_len: u64,
    },

    // Usually relating to poisoned locks.
    #[error("sync error: {0}")]
    SyncError(String),

}

impl<T> From<std::sync::PoisonError<T>> for DiskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DiskError::SyncError(e.to_string())
    }
}

type Result<T> = std::result::Result<T, DiskError>;

// Destination for verified pieces. Writes from different pieces never overlap,
// but may arrive from any thread in any order.
pub trait Output: Send + Sync + std::fmt::Debug {

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    fn total_len(&self) -> u64;

}

fn check_bounds(offset: u64, len: usize, total_len: u64) -> Result<()> {
    if offset + len as u64 > total_len {
        return Err(DiskError::OutOfBounds { offset, len, total_len });
    }
    Ok(())
}

// A single file, preallocated to the full torrent length.
#[derive(Debug)]
pub struct FileOutput {

    file_lock: Mutex<File>,

    len: u64,

}

impl FileOutput {

    pub fn create<P: AsRef<Path>>(path: P, len: u64) -> Result<Self> {
        let path = path.as_ref();

        // Create the output directory if it doesn't exist.
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                std::fs::create_dir_all(dir)?;
                tracing::info!("created missing output directory: {:?}", dir);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(len)?;

        Ok(Self {
            file_lock: Mutex::new(file),
            len,
        })
    }
}

impl Output for FileOutput {

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.len)?;
        let mut f = self.file_lock.lock()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    fn total_len(&self) -> u64 {
        self.len
    }
}

// Holds the whole torrent in memory, for embedding and tests.
#[derive(Debug)]
pub struct MemoryOutput(Mutex<Vec<u8>>);

impl MemoryOutput {

    pub fn new(len: usize) -> Self {
        Self(Mutex::new(vec![0; len]))
    }

    // Copy of everything written so far.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.lock()?.clone())
    }
}

impl Output for MemoryOutput {

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut buf = self.0.lock()?;
        check_bounds(offset, data.len(), buf.len() as u64)?;
        let start = offset as usize;
        buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn total_len(&self) -> u64 {
        self.0.lock().map(|buf| buf.len() as u64).unwrap_or(0)
    }
}
