use core::marker::PhantomData;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

/// A both-endian integer: the value is recorded twice, little-endian first.
///
/// ECMA-119 uses this encoding for most numeric fields so that readers on
/// either architecture can use the half they prefer. We read both halves and
/// treat a mismatch as image corruption.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BothEndian<T: BothEndianValue> {
    lsb: T::Bytes,
    msb: T::Bytes,
    _marker: PhantomData<T>,
}

unsafe impl<T: BothEndianValue> bytemuck::Zeroable for BothEndian<T> {}
unsafe impl<T: BothEndianValue> bytemuck::Pod for BothEndian<T> {}

/// The two halves of a [`BothEndian`] field disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BothEndianMismatch {
    pub le: u64,
    pub be: u64,
}

pub trait BothEndianValue: Copy + 'static {
    type Bytes: bytemuck::Pod + bytemuck::Zeroable;

    fn from_le(bytes: Self::Bytes) -> Self;
    fn from_be(bytes: Self::Bytes) -> Self;
    fn widen(self) -> u64;
}

impl BothEndianValue for u16 {
    type Bytes = [u8; 2];

    fn from_le(bytes: [u8; 2]) -> u16 {
        u16::from_le_bytes(bytes)
    }

    fn from_be(bytes: [u8; 2]) -> u16 {
        u16::from_be_bytes(bytes)
    }

    fn widen(self) -> u64 {
        self.into()
    }
}

impl BothEndianValue for u32 {
    type Bytes = [u8; 4];

    fn from_le(bytes: [u8; 4]) -> u32 {
        u32::from_le_bytes(bytes)
    }

    fn from_be(bytes: [u8; 4]) -> u32 {
        u32::from_be_bytes(bytes)
    }

    fn widen(self) -> u64 {
        self.into()
    }
}

impl<T: BothEndianValue + PartialEq> BothEndian<T> {
    /// Reads the field, cross-checking the two on-disk encodings.
    pub fn get(&self) -> Result<T, BothEndianMismatch> {
        let le = T::from_le(self.lsb);
        let be = T::from_be(self.msb);
        if le != be {
            return Err(BothEndianMismatch {
                le: le.widen(),
                be: be.widen(),
            });
        }
        Ok(le)
    }
}

impl<T: BothEndianValue + PartialEq + core::fmt::Debug> core::fmt::Debug for BothEndian<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get() {
            Ok(v) => write!(f, "{v:?}"),
            Err(e) => write!(f, "<mismatch le={} be={}>", e.le, e.be),
        }
    }
}

pub type U16Both = BothEndian<u16>;
pub type U32Both = BothEndian<u32>;

/// The 17-byte decimal-digit timestamp used in volume descriptors.
///
/// Kept raw; most fields on real images are either all-zero ("unset") or
/// printable digits, and callers rarely need more than the year.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VdDateTime {
    digits: [u8; 16],
    gmt_offset: u8,
}

impl VdDateTime {
    pub fn from_bytes(bytes: [u8; 17]) -> Self {
        let mut digits = [0u8; 16];
        digits.copy_from_slice(&bytes[..16]);
        Self {
            digits,
            gmt_offset: bytes[16],
        }
    }

    pub fn raw(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        out[..16].copy_from_slice(&self.digits);
        out[16] = self.gmt_offset;
        out
    }

    pub fn is_unset(&self) -> bool {
        self.digits == *b"0000000000000000"
    }

    /// Interprets the digit form, if it is well-formed.
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        if self.is_unset() {
            return None;
        }
        let s = core::str::from_utf8(&self.digits).ok()?;
        let year: i32 = s[0..4].parse().ok()?;
        let month: u32 = s[4..6].parse().ok()?;
        let day: u32 = s[6..8].parse().ok()?;
        let hour: u32 = s[8..10].parse().ok()?;
        let minute: u32 = s[10..12].parse().ok()?;
        let second: u32 = s[12..14].parse().ok()?;
        let offset = FixedOffset::east_opt(i32::from(self.gmt_offset as i8) * 15 * 60)?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
        offset.from_local_datetime(&date).single()
    }
}

impl core::fmt::Debug for VdDateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", String::from_utf8_lossy(&self.digits))
    }
}

/// Decodes the 7-byte directory-record timestamp.
///
/// Fields are years-since-1900, month, day, hour, minute, second and a GMT
/// offset in signed 15-minute steps. Out-of-range fields (zeroed records are
/// common in the wild) decode to `None` instead of failing the record.
pub fn dir_datetime(bytes: &[u8; 7]) -> Option<DateTime<FixedOffset>> {
    let year = 1900 + i32::from(bytes[0]);
    let offset = FixedOffset::east_opt(i32::from(bytes[6] as i8) * 15 * 60)?;
    let date = NaiveDate::from_ymd_opt(year, bytes[1].into(), bytes[2].into())?.and_hms_opt(
        bytes[3].into(),
        bytes[4].into(),
        bytes[5].into(),
    )?;
    offset.from_local_datetime(&date).single()
}

/// The name-comparison policy of the active volume descriptor.
///
/// This is the only difference between navigating a Primary and a
/// Supplementary (Joliet) hierarchy: how path components are normalised for
/// byte-wise comparison with on-disk identifiers, and how identifiers decode
/// back into strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    /// Upper-case ASCII identifiers (ECMA-119 d-characters).
    Primary,
    /// UCS-2 big-endian identifiers (Joliet).
    Joliet,
}

/// Characters Joliet forbids in identifiers; encoders substitute `_`.
const JOLIET_FORBIDDEN: [char; 3] = ['?', ';', '\\'];

/// The longest identifier Joliet permits, in bytes.
const JOLIET_MAX_NAME: usize = 128;

impl NameEncoding {
    /// Normalises a path component into on-disk key bytes.
    pub fn key(&self, component: &str) -> Vec<u8> {
        match self {
            NameEncoding::Primary => component.to_ascii_uppercase().into_bytes(),
            NameEncoding::Joliet => joliet_key(component),
        }
    }

    /// Decodes an on-disk identifier for display.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            NameEncoding::Primary => String::from_utf8_lossy(bytes).into_owned(),
            NameEncoding::Joliet => decode_ucs2be(bytes),
        }
    }
}

/// Re-encodes a UTF-8 component the way Joliet mastering tools do: forbidden
/// characters become `_`, the UCS-2BE form is cut at 128 bytes, and trailing
/// whitespace left by the cut is stripped.
pub fn joliet_key(component: &str) -> Vec<u8> {
    let substituted: String = component
        .chars()
        .map(|c| if JOLIET_FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    let mut out = Vec::with_capacity(substituted.len() * 2);
    for unit in substituted.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    if out.len() > JOLIET_MAX_NAME {
        out.truncate(JOLIET_MAX_NAME);
        let trimmed: String = decode_ucs2be(&out).trim_end().to_string();
        out.clear();
        for unit in trimmed.encode_utf16() {
            out.extend_from_slice(&unit.to_be_bytes());
        }
    }
    out
}

pub fn decode_ucs2be(bytes: &[u8]) -> String {
    char::decode_utf16(
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
    )
    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
    .collect()
}
