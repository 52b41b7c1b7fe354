//! Isolens
//!
//! A read-only parser and random-access navigator for ISO 9660 (ECMA-119)
//! optical-disc images, including the Joliet supplementary descriptors
//! (UCS-2BE identifiers) and the SUSP/Rock Ridge extension family (long
//! names, POSIX attributes). Images may be plain 2048-byte-per-sector
//! streams or raw 2352-byte MODE1 BIN/CUE dumps, local files or HTTP URLs
//! served with `Range` support.
//!
//! ```no_run
//! use std::io::Read;
//!
//! let mut image = isolens::open("disc.iso", true)?;
//! for child in image.children(&image.root().clone())? {
//!     println!("{} ({} bytes)", child.name(), child.data_length);
//! }
//! let record = image.record(&["docs", "readme.txt"])?;
//! let mut text = String::new();
//! image.content(&record)?.read_to_string(&mut text)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

pub use directory::{FileFlags, PosixAttributes, Record};
pub use path::{PathTable, PathTableEntry};
#[cfg(feature = "http")]
pub use source::HttpBackend;
pub use source::{
    Backend, ContentStream, FileBackend, RAW_SECTOR_LENGTH, SECTOR_LENGTH, SavedCursor, Source,
    SourceError,
};
use source::SuspMode;
pub use susp::{NmFlags, ROCK_RIDGE_EXTENSIONS, SuspEntry};
pub use types::{NameEncoding, VdDateTime, decode_ucs2be, joliet_key};
pub use volume::{
    BootRecordDescriptor, PartitionDescriptor, VolumeDescriptor, VolumeDescriptorBody,
};

mod directory;
mod path;
mod source;
mod susp;
mod types;
mod volume;

/// Errors surfaced by a mounted image.
#[derive(Debug, thiserror::Error)]
pub enum IsoError {
    /// A structural error in the image or the backing I/O; fatal to the
    /// operation that hit it.
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("image has no primary volume descriptor")]
    NoPrimaryDescriptor,

    /// A lookup miss; the image stays usable.
    #[error("no such path: {0}")]
    NotFound(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),
}

/// A mounted image: the descriptor set, the active hierarchy's path table
/// and root record, and the source everything reads through.
#[derive(Debug)]
pub struct Iso {
    source: Source,
    descriptors: Vec<VolumeDescriptor>,
    path_table: PathTable,
    root: Record,
    encoding: NameEncoding,
    children_cache: HashMap<u32, Vec<Record>>,
}

/// Opens and mounts a local image file.
pub fn open<P: AsRef<Path>>(path: P, joliet: bool) -> Result<Iso, IsoError> {
    let backend = FileBackend::open(path)?;
    Iso::mount(Source::new(Box::new(backend)), joliet)
}

/// Mounts an image served over HTTP(S) with `Range` support.
#[cfg(feature = "http")]
pub fn open_url(url: &str, joliet: bool) -> Result<Iso, IsoError> {
    Iso::mount(Source::new(Box::new(HttpBackend::new(url))), joliet)
}

impl Iso {
    /// Walks the volume descriptor set, selects the hierarchy (Supplementary
    /// when `joliet` is set and one exists), loads the path table and
    /// detects SUSP/Rock Ridge on the root.
    pub fn mount(mut source: Source, joliet: bool) -> Result<Self, IsoError> {
        let mut descriptors = Vec::new();
        let mut sector = 16u64;
        loop {
            source.seek(sector, SECTOR_LENGTH, false)?;
            let vd = match source.unpack_volume_descriptor() {
                Ok(vd) => vd,
                Err(SourceError::WrongIdentifier)
                    if source.sector_length() == SECTOR_LENGTH =>
                {
                    // No CD001 where one belongs: possibly a raw MODE1 dump
                    // (16-byte sync/header before each 2048-byte payload).
                    log::debug!("no descriptor identifier; retrying with 2352-byte sectors");
                    source.reinit(16, RAW_SECTOR_LENGTH);
                    source.seek(sector, SECTOR_LENGTH, false)?;
                    source.unpack_volume_descriptor()?
                }
                Err(err) => return Err(err.into()),
            };
            sector += 1;
            let terminator = matches!(vd, VolumeDescriptor::Terminator);
            descriptors.push(vd);
            if terminator {
                break;
            }
        }

        let (encoding, root, table_loc, table_size) = {
            let mut primary = None;
            let mut supplementary = None;
            for vd in &descriptors {
                match vd {
                    VolumeDescriptor::Primary(body) if primary.is_none() => primary = Some(body),
                    VolumeDescriptor::Supplementary(body) if supplementary.is_none() => {
                        supplementary = Some(body)
                    }
                    _ => {}
                }
            }
            let primary = primary.ok_or(IsoError::NoPrimaryDescriptor)?;
            let active = match supplementary {
                Some(body) if joliet => body,
                _ => primary,
            };
            log::debug!(
                "mounting {:?} hierarchy of volume {:?}",
                active.encoding,
                active.volume_id
            );
            (
                active.encoding,
                active.root_record.clone(),
                active.path_table_l_loc,
                active.path_table_size,
            )
        };

        source.seek(u64::from(table_loc), u64::from(table_size), false)?;
        let path_table = PathTable::decode(&mut source)?;

        // The directory's own first entry (the `\x00` self record) is where
        // SUSP introduces itself.
        source.seek(u64::from(root.extent), u64::from(root.data_length), false)?;
        let mut self_record = source
            .unpack_record(encoding)?
            .ok_or(SourceError::MissingRootRecord)?;
        self_record.resolve_continuations(&mut source)?;
        if let Some(SuspEntry::Sp { len_skp }) = self_record.susp_entries().first() {
            source.susp.mode = SuspMode::Enabled { skip: *len_skp };
            source.susp.extensions = self_record
                .susp_entries()
                .iter()
                .filter_map(|entry| match entry {
                    SuspEntry::Er { id, version, .. } => Some((id.clone(), *version)),
                    _ => None,
                })
                .collect();
            source.susp.rockridge = source
                .susp
                .extensions
                .iter()
                .any(|(id, version)| susp::is_rock_ridge(id, *version));
            log::debug!(
                "SUSP active (skip {}), extensions {:?}, rock ridge: {}",
                *len_skp,
                source.susp.extensions,
                source.susp.rockridge
            );
        } else {
            source.susp.mode = SuspMode::Disabled;
        }

        Ok(Self {
            source,
            descriptors,
            path_table,
            root,
            encoding,
            children_cache: HashMap::new(),
        })
    }

    /// The root directory record of the active hierarchy.
    pub fn root(&self) -> &Record {
        &self.root
    }

    pub fn volume_descriptors(&self) -> &[VolumeDescriptor] {
        &self.descriptors
    }

    pub fn primary(&self) -> Option<&VolumeDescriptorBody> {
        self.descriptors.iter().find_map(|vd| match vd {
            VolumeDescriptor::Primary(body) => Some(body),
            _ => None,
        })
    }

    pub fn supplementary(&self) -> Option<&VolumeDescriptorBody> {
        self.descriptors.iter().find_map(|vd| match vd {
            VolumeDescriptor::Supplementary(body) => Some(body),
            _ => None,
        })
    }

    pub fn path_table(&self) -> &PathTable {
        &self.path_table
    }

    /// Whether the mounted hierarchy uses Joliet UCS-2BE identifiers.
    pub fn is_joliet(&self) -> bool {
        self.encoding == NameEncoding::Joliet
    }

    /// Whether the root announced a Rock Ridge extension set.
    pub fn is_rockridge(&self) -> bool {
        self.source.susp.rockridge
    }

    /// `(ext_id, ext_ver)` pairs announced by the root's `ER` entries.
    pub fn susp_extensions(&self) -> &[(String, u8)] {
        &self.source.susp.extensions
    }

    /// Resolves a path, component by component, from the root.
    ///
    /// As much of the path as possible is resolved through the path table
    /// (longest matching prefix); the remainder is resolved by walking
    /// directory children. Under Rock Ridge the path table is bypassed
    /// entirely, since it only knows the short ISO identifiers.
    pub fn record<S: AsRef<str>>(&mut self, path: &[S]) -> Result<Record, IsoError> {
        let rockridge = self.source.susp.rockridge;
        let keys: Vec<Vec<u8>> = if rockridge {
            path.iter().map(|p| p.as_ref().as_bytes().to_vec()).collect()
        } else {
            path.iter().map(|p| self.encoding.key(p.as_ref())).collect()
        };

        let mut record = None;
        let mut pivot = if rockridge { 0 } else { keys.len() };
        while pivot > 0 {
            let hit = self
                .path_table
                .lookup(&keys[..pivot])
                .map(|(extent, name)| (extent, name.to_vec()));
            if let Some((extent, name)) = hit {
                record = Some(self.directory_record_at(extent, &name)?);
                break;
            }
            pivot -= 1;
        }
        let mut record = record.unwrap_or_else(|| self.root.clone());

        for key in &keys[pivot..] {
            let children = self.children(&record)?;
            record = children
                .into_iter()
                .find(|child| child.key() == *key)
                .ok_or_else(|| IsoError::NotFound(join_path(path)))?;
        }
        Ok(record)
    }

    /// Reads a directory's self entry, taking the display name from the
    /// path table node that led here.
    fn directory_record_at(&mut self, extent: u32, name: &[u8]) -> Result<Record, IsoError> {
        self.source
            .seek(u64::from(extent), SECTOR_LENGTH, false)?;
        let mut record = self
            .source
            .unpack_record(self.encoding)?
            .ok_or(SourceError::MissingSelfRecord(extent))?;
        record.resolve_continuations(&mut self.source)?;
        record.rename(name);
        Ok(record)
    }

    /// The non-synthetic entries of a directory, in on-disk order. Child
    /// lists are memoised per extent for the lifetime of the mount.
    pub fn children(&mut self, record: &Record) -> Result<Vec<Record>, IsoError> {
        if !record.is_directory() {
            return Err(IsoError::NotADirectory(record.name()));
        }
        if let Some(cached) = self.children_cache.get(&record.extent) {
            return Ok(cached.clone());
        }
        let records = directory::read_children(
            &mut self.source,
            record.extent,
            record.data_length,
            record.encoding,
        )?;
        let children: Vec<Record> = records
            .into_iter()
            .filter(|child| !child.is_synthetic())
            .collect();
        self.children_cache.insert(record.extent, children.clone());
        Ok(children)
    }

    /// A byte stream over a file's content.
    pub fn content(&mut self, record: &Record) -> Result<ContentStream, IsoError> {
        Ok(self
            .source
            .get_stream(u64::from(record.extent), u64::from(record.data_length))?)
    }

    /// The whole content of a file.
    pub fn read(&mut self, record: &Record) -> Result<Vec<u8>, IsoError> {
        let mut data = Vec::with_capacity(record.data_length as usize);
        self.content(record)?
            .read_to_end(&mut data)
            .map_err(SourceError::from)?;
        Ok(data)
    }

    /// Releases the image and its backend handle.
    pub fn close(self) {}
}

fn join_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join("/")
}
