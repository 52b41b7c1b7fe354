use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, FixedOffset};

use crate::source::{Source, SourceError};
use crate::susp::{NmFlags, SuspEntry};
use crate::types::{self, NameEncoding, U16Both, U32Both};

/// The fixed part of a directory record after the leading length byte.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RecordHeader {
    extended_attr_len: u8,
    extent: U32Both,
    data_len: U32Both,
    recorded_at: [u8; 7],
    flags: u8,
    file_unit_size: u8,
    interleave_gap: u8,
    volume_sequence: U16Both,
    name_len: u8,
}

const _: () = assert!(core::mem::size_of::<RecordHeader>() == 32);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0b0000_0001;
        const DIRECTORY = 0b0000_0010;
        const ASSOCIATED_FILE = 0b0000_0100;
        const EXTENDED_ATTRIBUTES = 0b0000_1000;
        const EXTENDED_PERMISSIONS = 0b0001_0000;
        const NOT_FINAL = 0b1000_0000;
    }
}

/// One directory record: a file or directory entry with its extent, size,
/// flags, identifier and any system-use (SUSP) entries found in its tail.
#[derive(Debug, Clone)]
pub struct Record {
    pub extent: u32,
    pub data_length: u32,
    pub recorded_at: Option<DateTime<FixedOffset>>,
    pub flags: FileFlags,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub volume_sequence: u16,
    name: Vec<u8>,
    pub(crate) encoding: NameEncoding,
    susp_entries: Vec<SuspEntry>,
    susp_resolved: bool,
}

impl Record {
    /// Decodes one record, consuming exactly `len` bytes (the declared record
    /// length minus the length byte the caller has already read).
    pub(crate) fn decode(
        source: &mut Source,
        len: usize,
        encoding: NameEncoding,
    ) -> Result<Self, SourceError> {
        let budget_start = source.remaining();
        let header_bytes = source.unpack_array::<32>()?;
        let header: &RecordHeader = bytemuck::from_bytes(&header_bytes);

        let extent = header.extent.get()?;
        let data_length = header.data_len.get()?;
        let volume_sequence = header.volume_sequence.get()?;
        let recorded_at = types::dir_datetime(&header.recorded_at);

        let name = source.unpack_raw(usize::from(header.name_len))?;
        if header.name_len % 2 == 0 {
            // Pad byte keeping the next field at an even offset.
            source.unpack_u8()?;
        }

        let consumed = budget_start - source.remaining();
        let mut tail = len
            .checked_sub(consumed)
            .ok_or(SourceError::BadRecordLength(len + 1))?;

        let mut susp_entries = Vec::new();
        if tail > 0 {
            if let Some(skip) = source.susp.area_skip() {
                let skip = usize::from(skip).min(tail);
                source.unpack_raw(skip)?;
                tail -= skip;
                while tail > 0 {
                    let before = source.remaining();
                    let Some(entry) = source.unpack_susp(tail)? else {
                        break;
                    };
                    tail -= before - source.remaining();
                    let terminated = matches!(entry, SuspEntry::St);
                    susp_entries.push(entry);
                    if terminated {
                        break;
                    }
                }
            }
        }
        // Whatever is left of the declared length is padding or unparsed
        // system-use data; consume it so the record ends where it claims to.
        source.unpack_raw(tail)?;

        Ok(Self {
            extent,
            data_length,
            recorded_at,
            flags: FileFlags::from_bits_retain(header.flags),
            file_unit_size: header.file_unit_size,
            interleave_gap: header.interleave_gap,
            volume_sequence,
            name,
            encoding,
            susp_entries,
            susp_resolved: false,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    /// The raw on-disk identifier, version suffix included.
    pub fn name_bytes(&self) -> &[u8] {
        &self.name
    }

    pub(crate) fn is_synthetic(&self) -> bool {
        self.name == [0x00] || self.name == [0x01]
    }

    /// Replaces the identifier; used when a directory record is produced
    /// from its own `\x00` self entry but the real name is known.
    pub(crate) fn rename(&mut self, name: &[u8]) {
        self.name = name.to_vec();
    }

    /// The identifier bytes used for name comparison: the Rock Ridge
    /// alternate name when one is recorded, otherwise the ISO identifier
    /// with its `;version` suffix removed.
    pub fn key(&self) -> Vec<u8> {
        if let Some(nm) = self.rockridge_name() {
            return nm.into_bytes();
        }
        self.stripped_name().to_vec()
    }

    /// The decoded display name.
    pub fn name(&self) -> String {
        if let Some(nm) = self.rockridge_name() {
            return nm;
        }
        self.encoding.decode(self.stripped_name())
    }

    fn stripped_name(&self) -> &[u8] {
        if self.is_directory() || self.is_synthetic() {
            return &self.name;
        }
        match self.encoding {
            NameEncoding::Primary => match self.name.iter().rposition(|&b| b == b';') {
                Some(pos) => &self.name[..pos],
                None => &self.name,
            },
            NameEncoding::Joliet => {
                let pairs: Vec<&[u8]> = self.name.chunks_exact(2).collect();
                match pairs.iter().rposition(|pair| *pair == [0x00, b';']) {
                    Some(pos) => &self.name[..pos * 2],
                    None => &self.name,
                }
            }
        }
    }

    /// Concatenated `NM` payloads, decoded as UTF-8; `None` when the record
    /// carries no alternate name.
    pub fn rockridge_name(&self) -> Option<String> {
        let mut parts: Vec<u8> = Vec::new();
        let mut found = false;
        for entry in &self.susp_entries {
            if let SuspEntry::Nm { flags, name } = entry {
                if flags.intersects(NmFlags::CURRENT | NmFlags::PARENT) {
                    continue;
                }
                found = true;
                parts.extend_from_slice(name);
                if !flags.contains(NmFlags::CONTINUE) {
                    break;
                }
            }
        }
        found.then(|| String::from_utf8_lossy(&parts).into_owned())
    }

    /// POSIX attributes from a `PX` entry, when one is recorded.
    pub fn posix(&self) -> Option<PosixAttributes> {
        self.susp_entries.iter().find_map(|entry| match entry {
            SuspEntry::Px {
                mode,
                links,
                uid,
                gid,
            } => Some(PosixAttributes {
                mode: *mode,
                links: *links,
                uid: *uid,
                gid: *gid,
            }),
            _ => None,
        })
    }

    /// Every system-use entry of the record, continuation areas included
    /// once they have been resolved.
    pub fn susp_entries(&self) -> &[SuspEntry] {
        &self.susp_entries
    }

    pub(crate) fn has_pending_continuations(&self) -> bool {
        !self.susp_resolved
            && self
                .susp_entries
                .iter()
                .any(|entry| matches!(entry, SuspEntry::Ce { .. }))
    }

    /// Follows every `CE` continuation exactly once (work-list, revisits
    /// refused), appending the entries found there. Seeks the source.
    pub(crate) fn resolve_continuations(&mut self, source: &mut Source) -> Result<(), SourceError> {
        if self.susp_resolved {
            return Ok(());
        }
        self.susp_resolved = true;

        let mut queue: VecDeque<(u32, u32, u32)> = self
            .susp_entries
            .iter()
            .filter_map(|entry| match entry {
                SuspEntry::Ce {
                    sector,
                    offset,
                    length,
                } => Some((*sector, *offset, *length)),
                _ => None,
            })
            .collect();
        let mut visited = HashSet::new();

        while let Some((sector, offset, length)) = queue.pop_front() {
            if !visited.insert((sector, offset, length)) {
                log::warn!("continuation area at sector {sector} revisited; ignoring");
                continue;
            }
            source.seek(u64::from(sector), u64::from(offset) + u64::from(length), false)?;
            source.unpack_raw(offset as usize)?;
            let mut remaining = length as usize;
            while remaining > 0 {
                let before = source.remaining();
                let Some(entry) = source.unpack_susp(remaining)? else {
                    break;
                };
                remaining -= before - source.remaining();
                match entry {
                    SuspEntry::Ce {
                        sector,
                        offset,
                        length,
                    } => queue.push_back((sector, offset, length)),
                    SuspEntry::St => break,
                    entry => self.susp_entries.push(entry),
                }
            }
        }
        Ok(())
    }
}

/// POSIX attributes carried by a Rock Ridge `PX` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixAttributes {
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Enumerates every record in a directory extent, synthetic entries
/// included. Records whose system use area continues elsewhere have their
/// continuations chased immediately; the directory buffer is saved around
/// the excursion so enumeration carries on where it left off.
pub(crate) fn read_children(
    source: &mut Source,
    extent: u32,
    data_length: u32,
    encoding: NameEncoding,
) -> Result<Vec<Record>, SourceError> {
    source.seek(u64::from(extent), u64::from(data_length), false)?;
    let mut records = Vec::new();
    while source.remaining() > 0 {
        match source.unpack_record(encoding)? {
            Some(mut record) => {
                if record.has_pending_continuations() {
                    let saved = source.save_cursor();
                    record.resolve_continuations(source)?;
                    source.restore_cursor(saved);
                }
                records.push(record);
            }
            None => {
                // Zero length byte: the record list resumes at the next
                // sector boundary.
                source.unpack_boundary()?;
            }
        }
    }
    Ok(records)
}
