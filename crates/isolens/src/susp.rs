//! System Use Sharing Protocol entries and the Rock Ridge registry.
//!
//! Directory records carry a system use area after the identifier; SUSP fills
//! it with length-prefixed tagged entries. The tag loop itself lives in
//! [`Source::unpack_susp`](crate::Source::unpack_susp); this module holds the
//! entry sum type, the per-signature decoders and the table of extension
//! identifiers that mark Rock Ridge.

use bitflags::bitflags;

use crate::source::{Source, SourceError};

/// `(ext_id, ext_ver)` pairs announcing the Rock Ridge Interchange Protocol.
pub const ROCK_RIDGE_EXTENSIONS: &[(&str, u8)] = &[("RRIP_1991A", 1), ("IEEE_P1282", 1)];

pub fn is_rock_ridge(id: &str, version: u8) -> bool {
    ROCK_RIDGE_EXTENSIONS
        .iter()
        .any(|&(known_id, known_ver)| known_id == id && known_ver == version)
}

bitflags! {
    /// Flags of an `NM` alternate-name entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NmFlags: u8 {
        /// The name continues in the next `NM` entry.
        const CONTINUE = 0b0000_0001;
        /// The entry refers to the current directory.
        const CURRENT = 0b0000_0010;
        /// The entry refers to the parent directory.
        const PARENT = 0b0000_0100;
    }
}

/// One decoded system-use entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspEntry {
    /// `SP`: SUSP is in use; `len_skp` bytes lead every system use area.
    Sp { len_skp: u8 },
    /// `CE`: the system use area continues elsewhere on the disc.
    Ce { sector: u32, offset: u32, length: u32 },
    /// `ER`: reference identifying an active extension set.
    Er {
        id: String,
        version: u8,
        descriptor: String,
        source: String,
    },
    /// `ST`: terminates the system use area.
    St,
    /// `NM`: alternate name, possibly one piece of several.
    Nm { flags: NmFlags, name: Vec<u8> },
    /// `PX`: POSIX file attributes.
    Px { mode: u32, links: u32, uid: u32, gid: u32 },
    /// Anything unrecognised, with the raw payload preserved.
    Unknown {
        signature: [u8; 2],
        version: u8,
        data: Vec<u8>,
    },
}

/// Extension-level decode failure; always recovered by the caller into
/// [`SuspEntry::Unknown`], unlike structural source errors.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SuspError {
    #[error("malformed SUSP entry: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// A both-endian read where disagreement means a corrupt extension entry,
/// not a corrupt image.
fn both_u32(source: &mut Source) -> Result<u32, SuspError> {
    source.unpack_both_u32().map_err(|err| match err {
        SourceError::BothEndianMismatch { .. } => SuspError::Malformed("both-endian mismatch"),
        other => SuspError::Source(other),
    })
}

/// Decodes the payload of one entry; `len` is the declared length minus the
/// 4-byte header, which the caller has already consumed.
pub(crate) fn decode(
    source: &mut Source,
    signature: [u8; 2],
    version: u8,
    len: usize,
) -> Result<SuspEntry, SuspError> {
    match (&signature, version) {
        (b"SP", 1) => {
            if len != 3 {
                return Err(SuspError::Malformed("bad SP length"));
            }
            if source.unpack_array::<2>()? != [0xBE, 0xEF] {
                return Err(SuspError::Malformed("bad SP check bytes"));
            }
            Ok(SuspEntry::Sp {
                len_skp: source.unpack_u8()?,
            })
        }
        (b"CE", 1) => {
            if len != 24 {
                return Err(SuspError::Malformed("bad CE length"));
            }
            Ok(SuspEntry::Ce {
                sector: both_u32(source)?,
                offset: both_u32(source)?,
                length: both_u32(source)?,
            })
        }
        (b"ER", 1) => {
            if len < 4 {
                return Err(SuspError::Malformed("bad ER length"));
            }
            let len_id = usize::from(source.unpack_u8()?);
            let len_des = usize::from(source.unpack_u8()?);
            let len_src = usize::from(source.unpack_u8()?);
            let ext_ver = source.unpack_u8()?;
            if 4 + len_id + len_des + len_src != len {
                return Err(SuspError::Malformed("ER field lengths disagree"));
            }
            Ok(SuspEntry::Er {
                id: String::from_utf8_lossy(&source.unpack_raw(len_id)?).into_owned(),
                version: ext_ver,
                descriptor: String::from_utf8_lossy(&source.unpack_raw(len_des)?).into_owned(),
                source: String::from_utf8_lossy(&source.unpack_raw(len_src)?).into_owned(),
            })
        }
        (b"ST", 1) => {
            if len != 0 {
                return Err(SuspError::Malformed("bad ST length"));
            }
            Ok(SuspEntry::St)
        }
        (b"NM", 1) => {
            if len < 1 {
                return Err(SuspError::Malformed("bad NM length"));
            }
            Ok(SuspEntry::Nm {
                flags: NmFlags::from_bits_retain(source.unpack_u8()?),
                name: source.unpack_raw(len - 1)?,
            })
        }
        (b"PX", 1) => {
            // RRIP 1.09 records four both-endian fields; 1.12 appends a
            // both-endian file serial number.
            if len != 32 && len != 40 {
                return Err(SuspError::Malformed("bad PX length"));
            }
            let entry = SuspEntry::Px {
                mode: both_u32(source)?,
                links: both_u32(source)?,
                uid: both_u32(source)?,
                gid: both_u32(source)?,
            };
            if len == 40 {
                let _serial = both_u32(source)?;
            }
            Ok(entry)
        }
        _ => Ok(SuspEntry::Unknown {
            signature,
            version,
            data: source.unpack_raw(len)?,
        }),
    }
}
