//! Paged file access. [`PagedFile`] is the seam between the container and
//! the bytes on disk: whole-page reads and writes against a file whose
//! length is always a multiple of the page size. The production
//! implementation memory-maps the file; an in-memory implementation backs
//! the tests.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{bail, ensure, Context, Result};
use memmap2::MmapMut;

pub trait PagedFile: Send {
    fn page_size(&self) -> usize;

    fn page_count(&self) -> u32;

    /// Grows or shrinks the file to exactly `pages` pages. New pages read
    /// as zeroes.
    fn set_page_count(&mut self, pages: u32) -> Result<()>;

    fn read_page(&self, page_no: u32, out: &mut [u8]) -> Result<()>;

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()>;

    /// Flushes all written pages to durable storage.
    fn sync(&mut self) -> Result<()>;
}

/// Memory-mapped [`PagedFile`]. The mapping is rebuilt whenever the file
/// length changes; an empty file carries no mapping at all.
pub struct MmapPagedFile {
    file: File,
    map: Option<MmapMut>,
    page_size: usize,
    page_count: u32,
}

impl MmapPagedFile {
    pub fn create(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            file,
            map: None,
            page_size,
            page_count: 0,
        })
    }

    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open {}", path.display()))?;
        let len = file.metadata()?.len();
        ensure!(
            len % page_size as u64 == 0,
            "file length {} is not a multiple of the page size {}",
            len,
            page_size
        );
        let page_count = (len / page_size as u64) as u32;
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the file is opened read-write and stays open for the
            // lifetime of the mapping. The container serializes all access,
            // so no other mapping of this file is mutated concurrently.
            Some(unsafe { MmapMut::map_mut(&file)? })
        };
        Ok(Self {
            file,
            map,
            page_size,
            page_count,
        })
    }

    fn page_range(&self, page_no: u32) -> Result<std::ops::Range<usize>> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds ({} pages)",
            page_no,
            self.page_count
        );
        let start = page_no as usize * self.page_size;
        Ok(start..start + self.page_size)
    }
}

impl PagedFile for MmapPagedFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn set_page_count(&mut self, pages: u32) -> Result<()> {
        if pages == self.page_count {
            return Ok(());
        }
        // Drop the mapping before resizing the file under it.
        if let Some(map) = self.map.take() {
            map.flush()?;
            drop(map);
        }
        self.file
            .set_len(pages as u64 * self.page_size as u64)?;
        if pages > 0 {
            // SAFETY: same conditions as in `open`; the previous mapping
            // has been dropped above.
            self.map = Some(unsafe { MmapMut::map_mut(&self.file)? });
        }
        self.page_count = pages;
        Ok(())
    }

    fn read_page(&self, page_no: u32, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.page_size,
            "read buffer is {} bytes, page size is {}",
            out.len(),
            self.page_size
        );
        let range = self.page_range(page_no)?;
        let Some(map) = &self.map else {
            bail!("page {} out of bounds (empty file)", page_no);
        };
        out.copy_from_slice(&map[range]);
        Ok(())
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "write buffer is {} bytes, page size is {}",
            data.len(),
            self.page_size
        );
        let range = self.page_range(page_no)?;
        let Some(map) = &mut self.map else {
            bail!("page {} out of bounds (empty file)", page_no);
        };
        map[range].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory [`PagedFile`] for tests and throwaway containers.
pub struct MemPagedFile {
    data: Vec<u8>,
    page_size: usize,
}

impl MemPagedFile {
    pub fn new(page_size: usize) -> Self {
        Self {
            data: Vec::new(),
            page_size,
        }
    }
}

impl PagedFile for MemPagedFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        (self.data.len() / self.page_size) as u32
    }

    fn set_page_count(&mut self, pages: u32) -> Result<()> {
        self.data.resize(pages as usize * self.page_size, 0);
        Ok(())
    }

    fn read_page(&self, page_no: u32, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.page_size,
            "read buffer is {} bytes, page size is {}",
            out.len(),
            self.page_size
        );
        ensure!(
            page_no < self.page_count(),
            "page {} out of bounds ({} pages)",
            page_no,
            self.page_count()
        );
        let start = page_no as usize * self.page_size;
        out.copy_from_slice(&self.data[start..start + self.page_size]);
        Ok(())
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "write buffer is {} bytes, page size is {}",
            data.len(),
            self.page_size
        );
        ensure!(
            page_no < self.page_count(),
            "page {} out of bounds ({} pages)",
            page_no,
            self.page_count()
        );
        let start = page_no as usize * self.page_size;
        self.data[start..start + self.page_size].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAGE_SIZE;

    #[test]
    fn mem_file_grows_zeroed_and_roundtrips() {
        let mut file = MemPagedFile::new(DEFAULT_PAGE_SIZE);
        file.set_page_count(3).unwrap();

        let mut page = vec![0xABu8; DEFAULT_PAGE_SIZE];
        file.write_page(1, &page).unwrap();

        let mut out = vec![0u8; DEFAULT_PAGE_SIZE];
        file.read_page(1, &mut out).unwrap();
        assert_eq!(out, page);

        file.read_page(2, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 0));

        assert!(file.read_page(3, &mut page).is_err());
    }

    #[test]
    fn mmap_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.db");

        let mut file = MmapPagedFile::create(&path, DEFAULT_PAGE_SIZE).unwrap();
        file.set_page_count(2).unwrap();
        let page = vec![0x5Au8; DEFAULT_PAGE_SIZE];
        file.write_page(1, &page).unwrap();
        file.sync().unwrap();
        drop(file);

        let reopened = MmapPagedFile::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(reopened.page_count(), 2);
        let mut out = vec![0u8; DEFAULT_PAGE_SIZE];
        reopened.read_page(1, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn mmap_file_rejects_misaligned_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.db");
        std::fs::write(&path, [0u8; 100]).unwrap();

        assert!(MmapPagedFile::open(&path, DEFAULT_PAGE_SIZE).is_err());
    }
}
