use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Input image backed by a physical file on disk
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Create a new physical backend
    ///
    /// ## Arguments
    /// * 'path' - The file path to use
    pub fn new(path: &Path) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        let data = unsafe { Mmap::map(&file) }.map_err(|error| Error(error.to_string()))?;

        Ok(Physical { data })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}
