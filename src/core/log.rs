//! Purpose: Create/open the file-backed log region and hand out typed views.
//! Exports: `LogBuffers`, `LogOptions`.
//! Role: Lifecycle boundary for the shared mapping; all validation happens
//! Role: here so the append path can run without checks or syscalls.
//! Invariants: Layout is three equal term partitions then the metadata section.
//! Invariants: Creation initialises metadata under an exclusive file lock;
//! Invariants: the mapping itself is shared and lock-free thereafter.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::MmapMut;

use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame;
use crate::core::layout::{self, LogMetaData};

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub term_length: usize,
    pub mtu_length: usize,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
}

impl LogOptions {
    pub fn new(term_length: usize, mtu_length: usize) -> Self {
        Self {
            term_length,
            mtu_length,
            initial_term_id: 0,
            session_id: 0,
            stream_id: 0,
        }
    }

    pub fn with_initial_term_id(mut self, initial_term_id: i32) -> Self {
        self.initial_term_id = initial_term_id;
        self
    }

    pub fn with_session_id(mut self, session_id: i32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_stream_id(mut self, stream_id: i32) -> Self {
        self.stream_id = stream_id;
        self
    }
}

#[derive(Debug)]
pub struct LogBuffers {
    path: PathBuf,
    _file: File,
    mmap: MmapMut,
    term_length: usize,
}

impl LogBuffers {
    pub fn create(path: impl AsRef<Path>, options: LogOptions) -> Result<Self, Error> {
        layout::check_term_length(options.term_length)?;
        layout::check_mtu_length(options.mtu_length, options.term_length)?;

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let log_length = layout::compute_log_length(options.term_length);
        file.set_len(log_length as u64)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        // Hold the initialisation window exclusively so a concurrent open
        // never observes half-written metadata.
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_path(&path)
                .with_source(err)
        })?;

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };

        let log = Self {
            path,
            _file: file,
            mmap,
            term_length: options.term_length,
        };
        log.initialise_meta_data(options)?;

        let _ = log._file.unlock();
        Ok(log)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(open_error_kind(&err)).with_path(&path).with_source(err))?;

        let actual_length = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;

        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?
        };

        if (actual_length as usize) < layout::LOG_META_DATA_LENGTH {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_path(&path)
                .with_message("log file smaller than the metadata section"));
        }

        let term_length =
            (actual_length as usize - layout::LOG_META_DATA_LENGTH) / layout::PARTITION_COUNT;
        let log = Self {
            path,
            _file: file,
            mmap,
            term_length,
        };
        log.validate(actual_length as usize)?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn term_buffer(&self, partition_index: usize) -> AtomicBuffer {
        debug_assert!(partition_index < layout::PARTITION_COUNT);
        self.buffer()
            .view(partition_index * self.term_length, self.term_length)
    }

    pub fn meta_data(&self) -> LogMetaData {
        let view = self.buffer().view(
            layout::LOG_META_DATA_SECTION_INDEX * self.term_length,
            layout::LOG_META_DATA_LENGTH,
        );
        // Capacity was validated at create/open time.
        LogMetaData::new(view).unwrap_or_else(|_| unreachable!("metadata section validated"))
    }

    fn buffer(&self) -> AtomicBuffer {
        // Safety: the mapping lives as long as self, and views are only handed
        // to components owned by (or outlived by) self's owner.
        unsafe { AtomicBuffer::new(self.mmap.as_ptr() as *mut u8, self.mmap.len()) }
    }

    fn initialise_meta_data(&self, options: LogOptions) -> Result<(), Error> {
        let meta = LogMetaData::new(self.buffer().view(
            layout::LOG_META_DATA_SECTION_INDEX * self.term_length,
            layout::LOG_META_DATA_LENGTH,
        ))?;

        meta.set_initial_term_id(options.initial_term_id);
        meta.set_term_length(options.term_length);
        meta.set_mtu_length(options.mtu_length);
        meta.set_raw_tail(0, layout::pack_tail(options.initial_term_id, 0));
        meta.set_active_partition_index_ordered(0);

        let template = meta.default_frame_header();
        template.put_i32(frame::LENGTH_FIELD_OFFSET, 0);
        template.put_u8(frame::VERSION_FIELD_OFFSET, frame::CURRENT_VERSION);
        template.put_u8(frame::FLAGS_FIELD_OFFSET, frame::UNFRAGMENTED);
        template.put_u16(frame::TYPE_FIELD_OFFSET, frame::HDR_TYPE_DATA);
        template.put_i32(frame::SESSION_ID_FIELD_OFFSET, options.session_id);
        template.put_i32(frame::STREAM_ID_FIELD_OFFSET, options.stream_id);
        Ok(())
    }

    fn validate(&self, actual_length: usize) -> Result<(), Error> {
        let corrupt = |message: &str| {
            Err(Error::new(ErrorKind::Corrupt)
                .with_path(&self.path)
                .with_message(message.to_string()))
        };

        if layout::check_term_length(self.term_length).is_err() {
            return corrupt("derived term length is invalid");
        }
        if layout::compute_log_length(self.term_length) != actual_length {
            return corrupt("file length does not match the log layout");
        }

        let meta = self.meta_data();
        if meta.term_length() != self.term_length {
            return corrupt("metadata term length disagrees with file length");
        }
        if layout::check_mtu_length(meta.mtu_length(), self.term_length).is_err() {
            return corrupt("metadata mtu length is invalid");
        }
        if meta.active_partition_index_volatile() >= layout::PARTITION_COUNT {
            return corrupt("active partition index out of range");
        }
        Ok(())
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn open_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{LogBuffers, LogOptions};
    use crate::core::error::ErrorKind;
    use crate::core::frame;
    use crate::core::layout;

    const TERM_LENGTH: usize = layout::TERM_MIN_LENGTH;

    fn options() -> LogOptions {
        LogOptions::new(TERM_LENGTH, 4096)
            .with_initial_term_id(31)
            .with_session_id(555)
            .with_stream_id(12)
    }

    #[test]
    fn create_initialises_metadata_and_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");
        let log = LogBuffers::create(&path, options()).expect("create");

        assert_eq!(log.term_length(), TERM_LENGTH);
        let meta = log.meta_data();
        assert_eq!(meta.initial_term_id(), 31);
        assert_eq!(meta.term_length(), TERM_LENGTH);
        assert_eq!(meta.mtu_length(), 4096);
        assert_eq!(meta.active_partition_index_volatile(), 0);
        assert_eq!(meta.raw_tail_volatile(0), layout::pack_tail(31, 0));

        let template = meta.default_frame_header();
        assert_eq!(template.get_i32(frame::SESSION_ID_FIELD_OFFSET), 555);
        assert_eq!(template.get_i32(frame::STREAM_ID_FIELD_OFFSET), 12);
        assert_eq!(template.get_u16(frame::TYPE_FIELD_OFFSET), frame::HDR_TYPE_DATA);
    }

    #[test]
    fn open_round_trips_a_created_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");
        drop(LogBuffers::create(&path, options()).expect("create"));

        let reopened = LogBuffers::open(&path).expect("open");
        assert_eq!(reopened.term_length(), TERM_LENGTH);
        assert_eq!(reopened.meta_data().initial_term_id(), 31);
    }

    #[test]
    fn writes_through_one_mapping_are_seen_through_another() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");
        let writer = LogBuffers::create(&path, options()).expect("create");
        let reader = LogBuffers::open(&path).expect("open");

        writer.term_buffer(1).put_i32_ordered(256, 99);
        assert_eq!(reader.term_buffer(1).get_i32_volatile(256), 99);
    }

    #[test]
    fn create_rejects_invalid_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");

        let err = LogBuffers::create(&path, LogOptions::new(48 * 1024, 4096))
            .expect_err("non power of two term");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let err = LogBuffers::create(&path, LogOptions::new(TERM_LENGTH, 4095))
            .expect_err("unaligned mtu");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn open_rejects_truncated_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");
        std::fs::write(&path, vec![0u8; 1024]).expect("write");

        let err = LogBuffers::open(&path).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn open_rejects_inconsistent_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream.termlog");
        {
            let log = LogBuffers::create(&path, options()).expect("create");
            log.meta_data().set_term_length(TERM_LENGTH * 2);
        }

        let err = LogBuffers::open(&path).expect_err("mismatched term length");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn missing_log_maps_to_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LogBuffers::open(dir.path().join("absent.termlog")).expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
