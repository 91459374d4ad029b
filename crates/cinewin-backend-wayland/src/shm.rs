//! Anonymous shared memory for `wl_shm_pool`s.

use std::env;
use std::fs::File;
use std::io;

use memmap2::MmapMut;

use cinewin_core::wire::ShmMemory;

/// A mapped, already unlinked temporary file.
pub(crate) struct MappedFile {
    file: File,
    map: MmapMut,
}

impl MappedFile {
    /// Allocate `size` zeroed bytes, preferring `XDG_RUNTIME_DIR` (tmpfs on
    /// most systems) over the default temp dir.
    pub fn allocate(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty shm pool"));
        }
        let file = match env::var_os("XDG_RUNTIME_DIR") {
            Some(dir) => tempfile::tempfile_in(dir).or_else(|_| tempfile::tempfile())?,
            None => tempfile::tempfile()?,
        };
        file.set_len(size as u64)?;
        // SAFETY: the file is unlinked and private to this process; nothing
        // truncates it while the mapping lives.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map })
    }

    pub const fn file(&self) -> &File {
        &self.file
    }
}

impl ShmMemory for MappedFile {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn test_writes_reach_the_file() {
        let mut memory = MappedFile::allocate(16).unwrap();
        assert_eq!(memory.len(), 16);
        memory.as_mut_slice()[3] = 0xab;
        memory.map.flush().unwrap();

        let mut file = memory.file().try_clone().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), 16);
        assert_eq!(contents[3], 0xab);
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(MappedFile::allocate(0).is_err());
    }
}
