use crate::error::{Error, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

/// Writes segments into the output container in playlist order while a
/// worker pool delivers them in completion order. Out-of-order segments
/// are buffered in memory until their predecessors arrive; segment sizes
/// are a few MiB so the buffer stays bounded by the pool width.
pub struct Merger {
    file: File,
    path: PathBuf,
    pending: HashMap<usize, Vec<u8>>,
    next: usize,
    total: usize,
    stored_bytes: usize,
}

impl Merger {
    pub fn create(path: &Path, total: usize) -> Result<Self> {
        Ok(Self {
            file: File::create(path).map_err(|e| Error::io(path, e))?,
            path: path.to_owned(),
            pending: HashMap::new(),
            next: 0,
            total,
            stored_bytes: 0,
        })
    }

    pub fn write(&mut self, pos: usize, data: Vec<u8>) -> Result<()> {
        self.stored_bytes += data.len();

        if pos == self.next {
            self.write_through(&data)?;

            while let Some(buffered) = self.pending.remove(&self.next) {
                self.write_through(&buffered)?;
            }
        } else {
            self.pending.insert(pos, data);
        }

        Ok(())
    }

    fn write_through(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .and_then(|_| self.file.flush())
            .map_err(|e| Error::io(&self.path, e))?;
        self.next += 1;
        Ok(())
    }

    pub fn stored_bytes(&self) -> usize {
        self.stored_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.next >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn out_of_order_writes_land_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");

        let mut merger = Merger::create(&path, 3).unwrap();
        merger.write(2, b"c".to_vec()).unwrap();
        merger.write(0, b"a".to_vec()).unwrap();
        assert!(!merger.is_complete());
        merger.write(1, b"b".to_vec()).unwrap();
        assert!(merger.is_complete());
        assert_eq!(merger.stored_bytes(), 3);

        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }
}
