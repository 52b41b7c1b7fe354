use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, FixedOffset};

use crate::directory::Record;
use crate::susp::{self, SuspEntry};
use crate::types::{self, BothEndianMismatch, NameEncoding, VdDateTime};
use crate::volume::VolumeDescriptor;

/// The logical sector length: the addressable unit everywhere in this crate.
pub const SECTOR_LENGTH: u64 = 2048;

/// The physical sector length of MODE1 BIN/CUE raw dumps.
pub const RAW_SECTOR_LENGTH: u64 = 2352;

/// Raw-dump bytes between one sector's payload and the next: 288 bytes of
/// EDC/ECC plus the 16-byte sync/header of the following sector.
const RAW_TRAILER: u64 = 304;

/// How many sectors a cached fetch is inflated to at minimum.
const MIN_FETCH: u64 = 16;

/// Fatal errors in the mandatory on-disk layout or the backing I/O.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source buffer under-run: needed {needed} bytes, {remaining} remain")]
    Underrun { needed: usize, remaining: usize },

    #[error("rewind past the start of the buffer")]
    RewindUnderrun,

    #[error("both-endian value mismatch (le {le}, be {be})")]
    BothEndianMismatch { le: u64, be: u64 },

    #[error("wrong volume descriptor identifier")]
    WrongIdentifier,

    #[error("wrong volume descriptor version: {0}")]
    WrongVersion(u8),

    #[error("unknown volume descriptor type: {0}")]
    UnknownDescriptorType(u8),

    #[error("logical block size {0} is not supported")]
    UnsupportedBlockSize(u16),

    #[error("short fetch: needed {requested} bytes, got {returned}")]
    ShortFetch { requested: u64, returned: u64 },

    #[error("directory record length {0} is too small for its fixed fields")]
    BadRecordLength(usize),

    #[error("volume descriptor carries no root directory record")]
    MissingRootRecord,

    #[error("directory extent {0} has no self entry")]
    MissingSelfRecord(u32),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(feature = "http")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "http")]
    #[error("range request rejected with HTTP status {0}")]
    RangeNotSupported(u16),
}

impl From<BothEndianMismatch> for SourceError {
    fn from(err: BothEndianMismatch) -> Self {
        SourceError::BothEndianMismatch {
            le: err.le,
            be: err.be,
        }
    }
}

/// The capability a storage backend provides: positioned bulk reads for
/// metadata and a byte stream for file content. The image is one contiguous
/// byte stream; sector 0 is byte 0.
pub trait Backend {
    /// Returns up to `count * sector_length` bytes starting at byte offset
    /// `sector * sector_length`. May return less only when the image ends.
    fn fetch(&mut self, sector: u64, count: u64, sector_length: u64)
    -> Result<Vec<u8>, SourceError>;

    /// Returns a read-only stream over `length` bytes starting at `offset`.
    fn stream(&mut self, offset: u64, length: u64) -> Result<Box<dyn Read>, SourceError>;
}

/// Whether SUSP parsing applies to record system-use areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SuspMode {
    /// Before mount has inspected the root: tag loops start at index 0.
    Undetected,
    /// The root carried an `SP` entry publishing this `len_skp`.
    Enabled { skip: u8 },
    /// No `SP` on the root: system use areas are opaque padding.
    Disabled,
}

/// SUSP state detected at mount, shared by every record decode.
#[derive(Debug, Clone)]
pub(crate) struct SuspState {
    pub mode: SuspMode,
    /// `(ext_id, ext_ver)` pairs from the root's `ER` entries.
    pub extensions: Vec<(String, u8)>,
    /// Whether any extension matched the Rock Ridge registry.
    pub rockridge: bool,
}

impl Default for SuspState {
    fn default() -> Self {
        Self {
            mode: SuspMode::Undetected,
            extensions: Vec::new(),
            rockridge: false,
        }
    }
}

impl SuspState {
    /// Bytes to skip before a record's tag loop, or `None` when SUSP is off.
    pub fn area_skip(&self) -> Option<u8> {
        match self.mode {
            SuspMode::Undetected => Some(0),
            SuspMode::Enabled { skip } => Some(skip),
            SuspMode::Disabled => None,
        }
    }
}

/// Opaque token capturing the buffer and cursor, so callers can read
/// speculatively and roll back.
pub struct SavedCursor {
    buf: Vec<u8>,
    cursor: usize,
}

/// A cached, seekable byte window over an image.
///
/// All unpacking goes through one cursor-addressed buffer, recreated by each
/// [`Source::seek`]; the sector cache survives across seeks. When
/// `sector_length` is 2352 each physical sector is trimmed to its 2048-byte
/// payload as it is fetched.
pub struct Source {
    backend: Box<dyn Backend>,
    sectors: HashMap<u64, Vec<u8>>,
    buf: Vec<u8>,
    cursor: usize,
    sector_start: u64,
    sector_length: u64,
    cache_content: bool,
    min_fetch: u64,
    pub(crate) susp: SuspState,
}

impl Source {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            sectors: HashMap::new(),
            buf: Vec::new(),
            cursor: 0,
            sector_start: 0,
            sector_length: SECTOR_LENGTH,
            cache_content: false,
            min_fetch: MIN_FETCH,
            susp: SuspState::default(),
        }
    }

    /// Also inserts file-content sectors into the cache.
    pub fn with_cache_content(mut self, cache_content: bool) -> Self {
        self.cache_content = cache_content;
        self
    }

    pub fn with_min_fetch(mut self, min_fetch: u64) -> Self {
        self.min_fetch = min_fetch.max(1);
        self
    }

    /// Drops all derived state and switches the physical sector geometry.
    /// Used once, when a 2048-byte mount attempt turns out to be a raw dump.
    pub fn reinit(&mut self, sector_start: u64, sector_length: u64) {
        log::debug!("re-initialising source: sector_start={sector_start} sector_length={sector_length}");
        self.sectors.clear();
        self.buf.clear();
        self.cursor = 0;
        self.sector_start = sector_start;
        self.sector_length = sector_length;
        self.susp = SuspState::default();
    }

    pub fn sector_length(&self) -> u64 {
        self.sector_length
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Resets the cursor and fills the buffer with `length` bytes starting at
    /// `sector`. Cached sectors are served from memory; contiguous gaps are
    /// coalesced into single backend fetches, inflated to at least
    /// `min_fetch` sectors whenever the result is going to be cached.
    pub fn seek(&mut self, sector: u64, length: u64, is_content: bool) -> Result<(), SourceError> {
        self.cursor = 0;
        self.buf.clear();
        if length == 0 {
            return Ok(());
        }
        let do_caching = !is_content || self.cache_content;
        let n_sectors = 1 + (length - 1) / SECTOR_LENGTH;
        let fetch_sectors = if do_caching {
            self.min_fetch.max(n_sectors)
        } else {
            n_sectors
        };

        let mut need_start = None;
        for s in sector..sector + fetch_sectors {
            if self.sectors.contains_key(&s) {
                if let Some(start) = need_start.take() {
                    self.fetch_range(start, s - start, do_caching)?;
                }
                // Past the sectors actually needed: stop instead of touring
                // the rest of the prefetch window.
                if s >= sector + n_sectors {
                    break;
                }
                self.buf.extend_from_slice(&self.sectors[&s]);
            } else if need_start.is_none() {
                need_start = Some(s);
            }
        }
        if let Some(start) = need_start {
            self.fetch_range(start, sector + fetch_sectors - start, do_caching)?;
        }

        self.buf.truncate(length as usize);
        if (self.buf.len() as u64) < length {
            return Err(SourceError::ShortFetch {
                requested: length,
                returned: self.buf.len() as u64,
            });
        }
        Ok(())
    }

    /// Fetches one contiguous run of sectors, appending payloads to the
    /// buffer and (optionally) the cache. A fetch may come back short at the
    /// end of the image; whether that matters is decided by `seek` once the
    /// buffer is assembled.
    fn fetch_range(&mut self, start: u64, count: u64, do_caching: bool) -> Result<(), SourceError> {
        log::trace!("fetching {count} sectors at {start}");
        let data = self.backend.fetch(start, count, self.sector_length)?;
        let full = (data.len() as u64 / self.sector_length).min(count);
        for idx in 0..full {
            let off = (idx * self.sector_length + self.sector_start) as usize;
            let payload = &data[off..off + SECTOR_LENGTH as usize];
            self.buf.extend_from_slice(payload);
            if do_caching {
                self.sectors.insert(start + idx, payload.to_vec());
            }
        }
        Ok(())
    }

    /// Returns the next `n` bytes and advances the cursor.
    pub fn unpack_raw(&mut self, n: usize) -> Result<Vec<u8>, SourceError> {
        Ok(self.take(n)?.to_vec())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], SourceError> {
        if n > self.remaining() {
            return Err(SourceError::Underrun {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(out)
    }

    pub fn unpack_array<const N: usize>(&mut self) -> Result<[u8; N], SourceError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn unpack_u8(&mut self) -> Result<u8, SourceError> {
        Ok(self.unpack_array::<1>()?[0])
    }

    pub fn unpack_i8(&mut self) -> Result<i8, SourceError> {
        Ok(self.unpack_u8()? as i8)
    }

    pub fn unpack_u16_le(&mut self) -> Result<u16, SourceError> {
        Ok(u16::from_le_bytes(self.unpack_array()?))
    }

    pub fn unpack_u16_be(&mut self) -> Result<u16, SourceError> {
        Ok(u16::from_be_bytes(self.unpack_array()?))
    }

    pub fn unpack_u32_le(&mut self) -> Result<u32, SourceError> {
        Ok(u32::from_le_bytes(self.unpack_array()?))
    }

    pub fn unpack_u32_be(&mut self) -> Result<u32, SourceError> {
        Ok(u32::from_be_bytes(self.unpack_array()?))
    }

    /// Reads a little-endian then a big-endian copy of the same value,
    /// failing on disagreement.
    pub fn unpack_both_u16(&mut self) -> Result<u16, SourceError> {
        let le = self.unpack_u16_le()?;
        let be = self.unpack_u16_be()?;
        if le != be {
            return Err(SourceError::BothEndianMismatch {
                le: le.into(),
                be: be.into(),
            });
        }
        Ok(le)
    }

    pub fn unpack_both_u32(&mut self) -> Result<u32, SourceError> {
        let le = self.unpack_u32_le()?;
        let be = self.unpack_u32_be()?;
        if le != be {
            return Err(SourceError::BothEndianMismatch {
                le: le.into(),
                be: be.into(),
            });
        }
        Ok(le)
    }

    /// `unpack_raw` with trailing ASCII spaces stripped.
    pub fn unpack_string(&mut self, n: usize) -> Result<Vec<u8>, SourceError> {
        let mut out = self.unpack_raw(n)?;
        while out.last() == Some(&b' ') {
            out.pop();
        }
        Ok(out)
    }

    /// Consumes up to the next 2048-byte boundary (a whole sector when the
    /// cursor already sits on one), clamped to the end of the buffer.
    pub fn unpack_boundary(&mut self) -> Result<Vec<u8>, SourceError> {
        let gap = (SECTOR_LENGTH as usize) - self.cursor % (SECTOR_LENGTH as usize);
        self.unpack_raw(gap.min(self.remaining()))
    }

    /// The raw 17-byte decimal-digit volume-descriptor timestamp.
    pub fn unpack_vd_datetime(&mut self) -> Result<VdDateTime, SourceError> {
        Ok(VdDateTime::from_bytes(self.unpack_array()?))
    }

    /// The 7-byte directory timestamp, as an absolute instant when valid.
    pub fn unpack_dir_datetime(&mut self) -> Result<Option<DateTime<FixedOffset>>, SourceError> {
        Ok(types::dir_datetime(&self.unpack_array()?))
    }

    /// Reads the descriptor header (type, `CD001`, version) and dispatches
    /// to the decoder for the type.
    pub fn unpack_volume_descriptor(&mut self) -> Result<VolumeDescriptor, SourceError> {
        let ty = self.unpack_u8()?;
        let identifier = self.unpack_string(5)?;
        let version = self.unpack_u8()?;
        if identifier != b"CD001" {
            return Err(SourceError::WrongIdentifier);
        }
        if version != 1 {
            return Err(SourceError::WrongVersion(version));
        }
        VolumeDescriptor::decode(self, ty)
    }

    /// Reads one directory record; a zero length byte means "end of this
    /// sector's records" and is left in place.
    pub fn unpack_record(
        &mut self,
        encoding: NameEncoding,
    ) -> Result<Option<Record>, SourceError> {
        let start = self.cursor;
        let length = self.unpack_u8()?;
        if length == 0 {
            self.rewind(1)?;
            return Ok(None);
        }
        let record = Record::decode(self, usize::from(length) - 1, encoding)?;
        debug_assert_eq!(self.cursor, start + usize::from(length));
        Ok(Some(record))
    }

    /// Reads one SUSP entry out of a system use area with `maxlen` bytes
    /// left. Returns `None` (cursor unmoved) when no further entry fits.
    /// Malformed entries degrade to [`SuspEntry::Unknown`] spanning exactly
    /// their declared length, so the tag loop stays aligned.
    pub fn unpack_susp(&mut self, maxlen: usize) -> Result<Option<SuspEntry>, SourceError> {
        if maxlen < 4 || self.remaining() < 4 {
            return Ok(None);
        }
        let start = self.cursor;
        let signature = self.unpack_array::<2>()?;
        let length = usize::from(self.unpack_u8()?);
        let version = self.unpack_u8()?;
        if maxlen < length {
            self.rewind(4)?;
            return Ok(None);
        }
        if length < 4 {
            log::warn!(
                "SUSP entry {} declares impossible length {length}; stopping tag loop",
                String::from_utf8_lossy(&signature)
            );
            self.rewind(4)?;
            return Ok(None);
        }

        let entry = match susp::decode(self, signature, version, length - 4) {
            Ok(entry) if self.cursor == start + length => entry,
            Err(susp::SuspError::Source(err)) => return Err(err),
            Ok(_) | Err(susp::SuspError::Malformed(_)) => {
                log::warn!(
                    "malformed SUSP entry {} v{version}; keeping raw payload",
                    String::from_utf8_lossy(&signature)
                );
                self.cursor = start + 4;
                SuspEntry::Unknown {
                    signature,
                    version,
                    data: self.unpack_raw(length - 4)?,
                }
            }
        };
        debug_assert_eq!(self.cursor, start + length);
        Ok(Some(entry))
    }

    /// Moves the cursor back `n` bytes.
    pub fn rewind(&mut self, n: usize) -> Result<(), SourceError> {
        if self.cursor < n {
            return Err(SourceError::RewindUnderrun);
        }
        self.cursor -= n;
        Ok(())
    }

    pub fn save_cursor(&self) -> SavedCursor {
        SavedCursor {
            buf: self.buf.clone(),
            cursor: self.cursor,
        }
    }

    pub fn restore_cursor(&mut self, saved: SavedCursor) {
        self.buf = saved.buf;
        self.cursor = saved.cursor;
    }

    /// A byte stream over file content, independent of the cursor buffer.
    /// For raw 2352 images the stream unwraps sectors on the fly.
    pub fn get_stream(&mut self, sector: u64, length: u64) -> Result<ContentStream, SourceError> {
        let (offset, phys_len) = if self.sector_length == SECTOR_LENGTH {
            (sector * SECTOR_LENGTH, length)
        } else {
            let full = length / SECTOR_LENGTH;
            let rem = length % SECTOR_LENGTH;
            let mut phys = full * self.sector_length + rem;
            if rem == 0 && full > 0 {
                phys -= RAW_TRAILER;
            }
            (sector * self.sector_length + self.sector_start, phys)
        };
        let inner = self.backend.stream(offset, phys_len)?;
        Ok(ContentStream {
            inner,
            remaining: length,
            raw: self.sector_length != SECTOR_LENGTH,
            within_sector: 0,
        })
    }
}

impl core::fmt::Debug for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Source")
            .field("sector_start", &self.sector_start)
            .field("sector_length", &self.sector_length)
            .field("cached_sectors", &self.sectors.len())
            .field("cursor", &self.cursor)
            .field("buffer_len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

/// File-content reader returned by [`Source::get_stream`].
///
/// Every inner read is clamped to the bytes remaining in the current logical
/// sector, so for raw images the 304 trailer bytes are skipped exactly when a
/// payload boundary is reached and never mid-read.
pub struct ContentStream {
    inner: Box<dyn Read>,
    remaining: u64,
    raw: bool,
    within_sector: u64,
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let sector_left = SECTOR_LENGTH - self.within_sector;
        let want = (buf.len() as u64).min(self.remaining).min(sector_left) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Ok(0);
        }
        self.remaining -= n as u64;
        self.within_sector += n as u64;
        if self.within_sector == SECTOR_LENGTH {
            self.within_sector = 0;
            if self.raw && self.remaining > 0 {
                io::copy(&mut self.inner.by_ref().take(RAW_TRAILER), &mut io::sink())?;
            }
        }
        Ok(n)
    }
}

/// Backend over a local file, using positioned reads.
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl Backend for FileBackend {
    fn fetch(
        &mut self,
        sector: u64,
        count: u64,
        sector_length: u64,
    ) -> Result<Vec<u8>, SourceError> {
        self.file.seek(SeekFrom::Start(sector * sector_length))?;
        let mut data = vec![0u8; (count * sector_length) as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = self.file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }

    fn stream(&mut self, offset: u64, length: u64) -> Result<Box<dyn Read>, SourceError> {
        Ok(Box::new(FileRange {
            file: self.file.try_clone()?,
            offset,
            remaining: length,
        }))
    }
}

/// A bounded reader that re-seeks before every read, so streams stay valid
/// while the shared file handle is used for other fetches.
struct FileRange {
    file: File,
    offset: u64,
    remaining: u64,
}

impl Read for FileRange {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        self.file.seek(SeekFrom::Start(self.offset))?;
        let n = self.file.read(&mut buf[..want])?;
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Backend over an HTTP(S) URL; every fetch is one `Range` request.
#[cfg(feature = "http")]
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    url: String,
}

#[cfg(feature = "http")]
impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            url: url.into(),
        }
    }
}

#[cfg(feature = "http")]
impl Backend for HttpBackend {
    fn fetch(
        &mut self,
        sector: u64,
        count: u64,
        sector_length: u64,
    ) -> Result<Vec<u8>, SourceError> {
        let mut reader = self.stream(sector * sector_length, count * sector_length)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    fn stream(&mut self, offset: u64, length: u64) -> Result<Box<dyn Read>, SourceError> {
        if length == 0 {
            return Ok(Box::new(io::empty()));
        }
        let response = self
            .client
            .get(&self.url)
            .header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", offset, offset + length - 1),
            )
            .send()?;
        if response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(SourceError::RangeNotSupported(response.status().as_u16()));
        }
        Ok(Box::new(response))
    }
}
