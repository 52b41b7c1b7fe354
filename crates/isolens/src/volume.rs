use crate::directory::Record;
use crate::source::{SECTOR_LENGTH, Source, SourceError};
use crate::types::{NameEncoding, VdDateTime};

/// One descriptor from the volume descriptor set starting at sector 16.
#[derive(Debug)]
pub enum VolumeDescriptor {
    /// Type 0: a boot record (El Torito); identified but not interpreted.
    Boot(BootRecordDescriptor),
    /// Type 1: the mandatory primary descriptor.
    Primary(VolumeDescriptorBody),
    /// Type 2: a supplementary descriptor, usually Joliet.
    Supplementary(VolumeDescriptorBody),
    /// Type 3: a volume partition descriptor.
    Partition(PartitionDescriptor),
    /// Type 255: ends the descriptor set.
    Terminator,
}

impl VolumeDescriptor {
    /// Decodes the body for the given type byte; the `CD001` header has
    /// already been consumed by the caller.
    pub(crate) fn decode(source: &mut Source, ty: u8) -> Result<Self, SourceError> {
        match ty {
            0 => Ok(Self::Boot(BootRecordDescriptor::decode(source)?)),
            1 => Ok(Self::Primary(VolumeDescriptorBody::decode(source, false)?)),
            2 => Ok(Self::Supplementary(VolumeDescriptorBody::decode(
                source, true,
            )?)),
            3 => Ok(Self::Partition(PartitionDescriptor::decode(source)?)),
            255 => Ok(Self::Terminator),
            ty => Err(SourceError::UnknownDescriptorType(ty)),
        }
    }
}

/// The shared layout of Primary and Supplementary descriptors.
#[derive(Debug)]
pub struct VolumeDescriptorBody {
    /// Volume flags; reserved (zero) in the primary descriptor.
    pub flags: u8,
    pub system_id: String,
    pub volume_id: String,
    pub volume_space_size: u32,
    pub escape_sequences: [u8; 32],
    /// Joliet UCS-2 level (1..=3) claimed by the escape sequences.
    pub joliet_level: Option<u8>,
    pub volume_set_size: u16,
    pub volume_sequence_number: u16,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    pub path_table_l_loc: u32,
    pub opt_path_table_l_loc: u32,
    pub path_table_m_loc: u32,
    pub opt_path_table_m_loc: u32,
    pub root_record: Record,
    pub volume_set_id: String,
    pub publisher_id: String,
    pub preparer_id: String,
    pub application_id: String,
    pub copyright_file_id: String,
    pub abstract_file_id: String,
    pub bibliographic_file_id: String,
    pub created_at: VdDateTime,
    pub modified_at: VdDateTime,
    pub expires_at: VdDateTime,
    pub effective_at: VdDateTime,
    pub file_structure_version: u8,
    /// Name handling implied by the descriptor: UCS-2BE when the escape
    /// sequences claim Joliet, upper-case ASCII otherwise.
    pub encoding: NameEncoding,
}

fn joliet_level(escapes: &[u8; 32]) -> Option<u8> {
    if escapes[0] != 0x25 || escapes[1] != 0x2F {
        return None;
    }
    match escapes[2] {
        0x40 => Some(1),
        0x43 => Some(2),
        0x45 => Some(3),
        _ => None,
    }
}

impl VolumeDescriptorBody {
    fn decode(source: &mut Source, supplementary: bool) -> Result<Self, SourceError> {
        let flags = source.unpack_u8()?;
        let system_id_raw = source.unpack_raw(32)?;
        let volume_id_raw = source.unpack_raw(32)?;
        source.unpack_raw(8)?;
        let volume_space_size = source.unpack_both_u32()?;
        let escape_sequences: [u8; 32] = source.unpack_array()?;

        let level = if supplementary {
            joliet_level(&escape_sequences)
        } else {
            None
        };
        let encoding = if level.is_some() {
            NameEncoding::Joliet
        } else {
            NameEncoding::Primary
        };
        let text = |raw: Vec<u8>| encoding.decode(&raw).trim_end().to_string();

        let volume_set_size = source.unpack_both_u16()?;
        let volume_sequence_number = source.unpack_both_u16()?;
        let logical_block_size = source.unpack_both_u16()?;
        if u64::from(logical_block_size) != SECTOR_LENGTH {
            return Err(SourceError::UnsupportedBlockSize(logical_block_size));
        }
        let path_table_size = source.unpack_both_u32()?;
        let path_table_l_loc = source.unpack_u32_le()?;
        let opt_path_table_l_loc = source.unpack_u32_le()?;
        let path_table_m_loc = source.unpack_u32_be()?;
        let opt_path_table_m_loc = source.unpack_u32_be()?;

        let root_record = source
            .unpack_record(encoding)?
            .ok_or(SourceError::MissingRootRecord)?;

        Ok(Self {
            flags,
            system_id: text(system_id_raw),
            volume_id: text(volume_id_raw),
            volume_space_size,
            escape_sequences,
            joliet_level: level,
            volume_set_size,
            volume_sequence_number,
            logical_block_size,
            path_table_size,
            path_table_l_loc,
            opt_path_table_l_loc,
            path_table_m_loc,
            opt_path_table_m_loc,
            root_record,
            volume_set_id: text(source.unpack_raw(128)?),
            publisher_id: text(source.unpack_raw(128)?),
            preparer_id: text(source.unpack_raw(128)?),
            application_id: text(source.unpack_raw(128)?),
            copyright_file_id: text(source.unpack_raw(37)?),
            abstract_file_id: text(source.unpack_raw(37)?),
            bibliographic_file_id: text(source.unpack_raw(37)?),
            created_at: source.unpack_vd_datetime()?,
            modified_at: source.unpack_vd_datetime()?,
            expires_at: source.unpack_vd_datetime()?,
            effective_at: source.unpack_vd_datetime()?,
            file_structure_version: source.unpack_u8()?,
            encoding,
        })
    }
}

/// An El Torito boot record; recognised so mounting can skip past it.
#[derive(Debug)]
pub struct BootRecordDescriptor {
    pub boot_system_id: String,
    pub boot_id: String,
}

impl BootRecordDescriptor {
    fn decode(source: &mut Source) -> Result<Self, SourceError> {
        Ok(Self {
            boot_system_id: String::from_utf8_lossy(&source.unpack_string(32)?).into_owned(),
            boot_id: String::from_utf8_lossy(&source.unpack_string(32)?).into_owned(),
        })
    }
}

#[derive(Debug)]
pub struct PartitionDescriptor {
    pub system_id: String,
    pub partition_id: String,
    pub partition_location: u32,
    pub partition_size: u32,
}

impl PartitionDescriptor {
    fn decode(source: &mut Source) -> Result<Self, SourceError> {
        source.unpack_u8()?;
        Ok(Self {
            system_id: String::from_utf8_lossy(&source.unpack_string(32)?).into_owned(),
            partition_id: String::from_utf8_lossy(&source.unpack_string(32)?).into_owned(),
            partition_location: source.unpack_both_u32()?,
            partition_size: source.unpack_both_u32()?,
        })
    }
}
