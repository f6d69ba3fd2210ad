//! Purpose: Map the shared counters file and expose position counters over it.
//! Exports: `CountersFile`, `ReadablePosition`, `OwnedPosition`, `COUNTER_LENGTH`.
//! Role: Carrier for the publication-limit counter the driver maintains.
//! Invariants: One counter per cache-line-sized slot; the value is the first
//! Invariants: eight bytes of the slot.
//! Invariants: Readers load-acquire, the owning writer stores-release.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};

pub const COUNTER_LENGTH: usize = 64;

#[derive(Debug)]
pub struct CountersFile {
    path: PathBuf,
    _file: File,
    mmap: MmapMut,
}

impl CountersFile {
    pub fn create(path: impl AsRef<Path>, counter_count: usize) -> Result<Self, Error> {
        if counter_count == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("counter count must be positive"));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        file.set_len((counter_count * COUNTER_LENGTH) as u64)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };
        Ok(Self { path, _file: file, mmap })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let length = file
            .metadata()
            .map(|meta| meta.len() as usize)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
        if length == 0 || length % COUNTER_LENGTH != 0 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&path)
                .with_message("counters file length is not a whole number of slots"));
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };
        Ok(Self { path, _file: file, mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counter_count(&self) -> usize {
        self.mmap.len() / COUNTER_LENGTH
    }

    pub fn reader(&self, counter_id: usize) -> Result<ReadablePosition, Error> {
        Ok(ReadablePosition {
            buffer: self.slot(counter_id)?,
            counter_id,
        })
    }

    pub fn writer(&self, counter_id: usize) -> Result<OwnedPosition, Error> {
        Ok(OwnedPosition {
            buffer: self.slot(counter_id)?,
            counter_id,
        })
    }

    fn slot(&self, counter_id: usize) -> Result<AtomicBuffer, Error> {
        if counter_id >= self.counter_count() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("counter id {counter_id} out of range")));
        }
        // Safety: the mapping lives as long as self; slots are disjoint.
        let buffer = unsafe { AtomicBuffer::new(self.mmap.as_ptr() as *mut u8, self.mmap.len()) };
        Ok(buffer.view(counter_id * COUNTER_LENGTH, COUNTER_LENGTH))
    }
}

/// Publisher-side view of a counter maintained elsewhere.
#[derive(Clone, Copy, Debug)]
pub struct ReadablePosition {
    buffer: AtomicBuffer,
    counter_id: usize,
}

impl ReadablePosition {
    pub fn counter_id(&self) -> usize {
        self.counter_id
    }

    pub fn get_volatile(&self) -> i64 {
        self.buffer.get_i64_volatile(0)
    }
}

/// Owning writer side; in production the driver, in tests the harness.
#[derive(Clone, Copy, Debug)]
pub struct OwnedPosition {
    buffer: AtomicBuffer,
    counter_id: usize,
}

impl OwnedPosition {
    pub fn counter_id(&self) -> usize {
        self.counter_id
    }

    pub fn get(&self) -> i64 {
        self.buffer.get_i64(0)
    }

    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(0, value);
    }
}

#[cfg(test)]
mod tests {
    use super::{CountersFile, COUNTER_LENGTH};
    use crate::core::error::ErrorKind;

    #[test]
    fn writer_updates_are_visible_to_reader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counters.termlog");
        let counters = CountersFile::create(&path, 4).expect("create");

        let writer = counters.writer(2).expect("writer");
        let reader = counters.reader(2).expect("reader");

        assert_eq!(reader.get_volatile(), 0);
        writer.set_ordered(128 * 1024);
        assert_eq!(reader.get_volatile(), 128 * 1024);
        assert_eq!(writer.get(), 128 * 1024);
    }

    #[test]
    fn counters_are_independent_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let counters =
            CountersFile::create(dir.path().join("counters.termlog"), 3).expect("create");

        counters.writer(0).expect("writer").set_ordered(1);
        counters.writer(1).expect("writer").set_ordered(2);
        assert_eq!(counters.reader(0).expect("reader").get_volatile(), 1);
        assert_eq!(counters.reader(1).expect("reader").get_volatile(), 2);
        assert_eq!(counters.reader(2).expect("reader").get_volatile(), 0);
    }

    #[test]
    fn open_shares_the_same_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counters.termlog");
        let created = CountersFile::create(&path, 2).expect("create");
        let opened = CountersFile::open(&path).expect("open");

        created.writer(1).expect("writer").set_ordered(77);
        assert_eq!(opened.reader(1).expect("reader").get_volatile(), 77);
        assert_eq!(opened.counter_count(), 2);
    }

    #[test]
    fn out_of_range_counter_id_is_a_usage_fault() {
        let dir = tempfile::tempdir().expect("tempdir");
        let counters =
            CountersFile::create(dir.path().join("counters.termlog"), 1).expect("create");
        assert_eq!(
            counters.reader(1).expect_err("range").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn open_rejects_ragged_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counters.termlog");
        std::fs::write(&path, vec![0u8; COUNTER_LENGTH + 7]).expect("write");
        assert_eq!(
            CountersFile::open(&path).expect_err("ragged").kind(),
            ErrorKind::Corrupt
        );
    }
}
