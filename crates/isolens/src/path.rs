use std::collections::HashMap;

use crate::source::{Source, SourceError};

/// The fixed prefix of an L-path-table entry (all fields little-endian).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PathTableEntryHeader {
    len_di: u8,
    len_xa: u8,
    extent: [u8; 4],
    parent_index: [u8; 2],
}

#[derive(Debug, Clone)]
pub struct PathTableEntry {
    pub len_xa: u8,
    pub extent: u32,
    /// 1-based index of the parent entry; entry 1 is the root.
    pub parent_index: u16,
    /// Raw on-disk directory identifier, zero-padded to an even length.
    pub name: Vec<u8>,
}

impl PathTableEntry {
    fn decode(source: &mut Source) -> Result<Self, SourceError> {
        let header_bytes = source.unpack_array::<8>()?;
        let header: &PathTableEntryHeader = bytemuck::from_bytes(&header_bytes);
        let name = source.unpack_raw(usize::from(header.len_di))?;
        if header.len_di % 2 == 1 {
            source.unpack_u8()?;
        }
        Ok(Self {
            len_xa: header.len_xa,
            extent: u32::from_le_bytes(header.extent),
            parent_index: u16::from_le_bytes(header.parent_index),
            name,
        })
    }
}

struct PathNode {
    name: Vec<u8>,
    extent: u32,
    children: HashMap<Vec<u8>, usize>,
}

/// The L path table as a trie over raw directory identifiers.
///
/// Gives the extent of any directory without walking the tree. Keys are
/// compared byte-for-byte; callers normalise components first (upper-case
/// ASCII for Primary, UCS-2BE for Joliet).
pub struct PathTable {
    nodes: Vec<PathNode>,
}

impl PathTable {
    /// Parses entries until the buffer (seeked to `path_table_size` bytes by
    /// the caller) is exhausted and links them into a trie through their
    /// 1-based parent indices.
    pub(crate) fn decode(source: &mut Source) -> Result<Self, SourceError> {
        let mut nodes: Vec<PathNode> = Vec::new();
        while source.remaining() > 0 {
            let entry = PathTableEntry::decode(source)?;
            if entry.name.is_empty() {
                log::warn!("path table entry {} has an empty identifier; stopping", nodes.len() + 1);
                break;
            }
            let index = nodes.len();
            nodes.push(PathNode {
                name: entry.name.clone(),
                extent: entry.extent,
                children: HashMap::new(),
            });
            if index == 0 {
                continue;
            }
            let parent = usize::from(entry.parent_index);
            if parent == 0 || parent > index {
                log::warn!(
                    "path table entry {} has out-of-order parent {parent}; skipping",
                    index + 1
                );
                continue;
            }
            nodes[parent - 1].children.insert(entry.name, index);
        }
        log::debug!("path table holds {} directories", nodes.len());
        Ok(Self { nodes })
    }

    /// Exact lookup of a normalised component path; the empty path is the
    /// root. Returns the directory's extent and its on-disk identifier.
    pub fn lookup(&self, path: &[Vec<u8>]) -> Option<(u32, &[u8])> {
        let mut index = 0;
        if self.nodes.is_empty() {
            return None;
        }
        for component in path {
            index = *self.nodes[index].children.get(component)?;
        }
        let node = &self.nodes[index];
        Some((node.extent, &node.name))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl core::fmt::Debug for PathTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PathTable")
            .field("directories", &self.nodes.len())
            .finish()
    }
}
