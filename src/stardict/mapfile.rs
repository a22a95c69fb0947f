//! Read-only memory mapping helper.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::error::{DictError, Result};

/// A bounded read-only byte view over a whole file.
pub struct MapFile {
    map: Mmap,
}

impl MapFile {
    /// Map `path` read-only, verifying it is exactly `size` bytes long.
    pub fn open(path: &Path, size: u64) -> Result<MapFile> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len != size {
            return Err(DictError::CorruptIndex(format!(
                "{} is {} bytes, expected {}",
                path.display(),
                len,
                size
            )));
        }
        let map = unsafe { Mmap::map(&file)? };
        Ok(MapFile { map })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }
}
