//! A sector-level image builder: enough of a mastering tool to produce the
//! fixture images the integration suites mount.
#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

pub const SECTOR: usize = 2048;

pub fn both16(value: u16) -> Vec<u8> {
    let mut out = value.to_le_bytes().to_vec();
    out.extend_from_slice(&value.to_be_bytes());
    out
}

pub fn both32(value: u32) -> Vec<u8> {
    let mut out = value.to_le_bytes().to_vec();
    out.extend_from_slice(&value.to_be_bytes());
    out
}

pub fn padded(text: &[u8], len: usize) -> Vec<u8> {
    let mut out = text.to_vec();
    out.resize(len, b' ');
    out
}

pub fn ucs2(text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// One directory record, padding and system use area included.
pub fn record(extent: u32, size: u32, flags: u8, name: &[u8], susp: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8]; // extended attribute length
    body.extend(both32(extent));
    body.extend(both32(size));
    body.extend([124, 6, 1, 12, 0, 0, 0]); // 2024-06-01 12:00:00 UTC
    body.push(flags);
    body.extend([0, 0]);
    body.extend(both16(1));
    body.push(name.len() as u8);
    body.extend_from_slice(name);
    if name.len() % 2 == 0 {
        body.push(0);
    }
    body.extend_from_slice(susp);
    let mut out = vec![(body.len() + 1) as u8];
    out.extend(body);
    assert!(out.len() <= 255, "record too long for its length byte");
    out
}

/// A Primary (type 1) or Supplementary (type 2) volume descriptor sector.
pub fn volume_descriptor(
    ty: u8,
    volume_id: &[u8],
    total_sectors: u32,
    root_extent: u32,
    root_size: u32,
    pt_loc: u32,
    pt_size: u32,
    escapes: &[u8],
) -> Vec<u8> {
    let mut sector = vec![ty];
    sector.extend_from_slice(b"CD001\x01");
    sector.push(0);
    sector.extend(padded(b"TESTSYS", 32));
    sector.extend(padded(volume_id, 32));
    sector.extend([0u8; 8]);
    sector.extend(both32(total_sectors));
    let mut escape_field = escapes.to_vec();
    escape_field.resize(32, 0);
    sector.extend(escape_field);
    sector.extend(both16(1));
    sector.extend(both16(1));
    sector.extend(both16(SECTOR as u16));
    sector.extend(both32(pt_size));
    sector.extend(pt_loc.to_le_bytes());
    sector.extend(0u32.to_le_bytes());
    sector.extend(0u32.to_be_bytes());
    sector.extend(0u32.to_be_bytes());
    sector.extend(record(root_extent, root_size, 0x02, &[0x00], &[]));
    for len in [128usize, 128, 128, 128, 37, 37, 37] {
        sector.extend(padded(b"", len));
    }
    for _ in 0..4 {
        sector.extend_from_slice(b"0000000000000000\x00");
    }
    sector.push(1);
    sector
}

pub fn terminator() -> Vec<u8> {
    let mut sector = vec![255u8];
    sector.extend_from_slice(b"CD001\x01");
    sector
}

/// L-path-table bytes for `(name, extent, parent_index)` entries.
pub fn path_table(entries: &[(&[u8], u32, u16)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(name, extent, parent) in entries {
        out.push(name.len() as u8);
        out.push(0);
        out.extend(extent.to_le_bytes());
        out.extend(parent.to_le_bytes());
        out.extend_from_slice(name);
        if name.len() % 2 == 1 {
            out.push(0);
        }
    }
    out
}

/// Assembles numbered sectors into one image.
pub struct ImageBuilder {
    sectors: Vec<Vec<u8>>,
}

impl ImageBuilder {
    pub fn new(total: usize) -> Self {
        Self {
            sectors: vec![Vec::new(); total],
        }
    }

    pub fn set(&mut self, index: usize, data: Vec<u8>) {
        assert!(data.len() <= SECTOR, "sector {index} overflows");
        self.sectors[index] = data;
    }

    /// Spreads `data` over consecutive sectors starting at `index`.
    pub fn set_span(&mut self, index: usize, data: &[u8]) {
        for (n, chunk) in data.chunks(SECTOR).enumerate() {
            self.set(index + n, chunk.to_vec());
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sectors.len() * SECTOR);
        for sector in &self.sectors {
            let mut padded = sector.clone();
            padded.resize(SECTOR, 0);
            out.extend(padded);
        }
        out
    }
}

/// Wraps a plain image into MODE1 BIN/CUE framing: 16 bytes of sync/header
/// before each payload, 288 bytes of EDC/ECC after it.
pub fn wrap_mode1(image: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in image.chunks(SECTOR) {
        out.push(0x00);
        out.extend([0xFF; 10]);
        out.push(0x00);
        out.extend([0, 0, 0, 1]); // MSF address + mode byte
        out.extend_from_slice(payload);
        out.extend([0u8; 288]);
    }
    out
}

pub fn write_temp_image(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp image");
    file.write_all(data).expect("write temp image");
    file.flush().expect("flush temp image");
    file
}

// Sector map of the basic fixture image.
pub const PVD: usize = 16;
pub const SVD: usize = 17;
pub const PT_PRIMARY: usize = 19;
pub const PT_JOLIET: usize = 20;
pub const ROOT_PRIMARY: usize = 21;
pub const SUB_PRIMARY: usize = 22;
pub const ROOT_JOLIET: usize = 23;
pub const SUB_JOLIET: usize = 24;
pub const HELLO: usize = 25;
pub const DATA: usize = 26;
pub const NESTED: usize = 29;
pub const WEIRD: usize = 30;
pub const LONGNAME: usize = 31;
pub const TOTAL: usize = 32;

pub fn hello_content() -> Vec<u8> {
    b"hello, world\n".to_vec()
}

pub fn data_content() -> Vec<u8> {
    (0..5000u32).map(|i| (i % 251) as u8).collect()
}

pub fn nested_content() -> Vec<u8> {
    b"nested\n".to_vec()
}

pub fn weird_content() -> Vec<u8> {
    b"question?\n".to_vec()
}

pub fn long_content() -> Vec<u8> {
    b"long\n".to_vec()
}

/// The >64-character filename whose UCS-2BE form overflows 128 bytes: the
/// cut lands after character 64, leaving a trailing space to strip.
pub fn long_name() -> String {
    format!("{} overflowing tail", "a".repeat(63))
}

pub fn truncated_long_name() -> String {
    "a".repeat(63)
}

/// A dual-hierarchy (Primary + Joliet) image:
///
/// ```text
/// hello.txt   HELLO.TXT;1    "hello, world\n"
/// data.bin    DATA.BIN;1     5000 patterned bytes
/// we?ird.txt  WEIRD.TXT;1    (Joliet name carries a forbidden '?')
/// <long>      LONGFILE.TXT;1 (Joliet name truncated at 128 bytes)
/// sub/        SUB
///   nested.txt NESTED.TXT;1  "nested\n"
/// ```
pub fn basic_image() -> Vec<u8> {
    let mut image = ImageBuilder::new(TOTAL);

    image.set(
        PVD,
        volume_descriptor(
            1,
            b"BASIC",
            TOTAL as u32,
            ROOT_PRIMARY as u32,
            SECTOR as u32,
            PT_PRIMARY as u32,
            path_table_primary().len() as u32,
            &[],
        ),
    );
    image.set(
        SVD,
        volume_descriptor(
            2,
            b"BASIC",
            TOTAL as u32,
            ROOT_JOLIET as u32,
            SECTOR as u32,
            PT_JOLIET as u32,
            path_table_joliet().len() as u32,
            &[0x25, 0x2F, 0x45],
        ),
    );
    image.set(SVD + 1, terminator());

    image.set(PT_PRIMARY, path_table_primary());
    image.set(PT_JOLIET, path_table_joliet());

    let mut root = Vec::new();
    root.extend(record(ROOT_PRIMARY as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    root.extend(record(ROOT_PRIMARY as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    root.extend(record(DATA as u32, 5000, 0, b"DATA.BIN;1", &[]));
    root.extend(record(HELLO as u32, 13, 0, b"HELLO.TXT;1", &[]));
    root.extend(record(LONGNAME as u32, 5, 0, b"LONGFILE.TXT;1", &[]));
    root.extend(record(SUB_PRIMARY as u32, SECTOR as u32, 0x02, b"SUB", &[]));
    root.extend(record(WEIRD as u32, 10, 0, b"WEIRD.TXT;1", &[]));
    image.set(ROOT_PRIMARY, root);

    let mut sub = Vec::new();
    sub.extend(record(SUB_PRIMARY as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    sub.extend(record(ROOT_PRIMARY as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    sub.extend(record(NESTED as u32, 7, 0, b"NESTED.TXT;1", &[]));
    image.set(SUB_PRIMARY, sub);

    let mut root_j = Vec::new();
    root_j.extend(record(ROOT_JOLIET as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    root_j.extend(record(ROOT_JOLIET as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    root_j.extend(record(DATA as u32, 5000, 0, &ucs2("data.bin"), &[]));
    root_j.extend(record(HELLO as u32, 13, 0, &ucs2("hello.txt"), &[]));
    root_j.extend(record(
        LONGNAME as u32,
        5,
        0,
        &ucs2(&truncated_long_name()),
        &[],
    ));
    root_j.extend(record(SUB_JOLIET as u32, SECTOR as u32, 0x02, &ucs2("sub"), &[]));
    root_j.extend(record(WEIRD as u32, 10, 0, &ucs2("we_ird.txt"), &[]));
    image.set(ROOT_JOLIET, root_j);

    let mut sub_j = Vec::new();
    sub_j.extend(record(SUB_JOLIET as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    sub_j.extend(record(ROOT_JOLIET as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    sub_j.extend(record(NESTED as u32, 7, 0, &ucs2("nested.txt"), &[]));
    image.set(SUB_JOLIET, sub_j);

    image.set(HELLO, hello_content());
    image.set_span(DATA, &data_content());
    image.set(NESTED, nested_content());
    image.set(WEIRD, weird_content());
    image.set(LONGNAME, long_content());

    image.build()
}

fn path_table_primary() -> Vec<u8> {
    path_table(&[
        (&[0x00], ROOT_PRIMARY as u32, 1),
        (b"SUB", SUB_PRIMARY as u32, 1),
    ])
}

fn path_table_joliet() -> Vec<u8> {
    let sub = ucs2("sub");
    path_table(&[(&[0x00], ROOT_JOLIET as u32, 1), (&sub, SUB_JOLIET as u32, 1)])
}

// Sector map of the Rock Ridge fixture image.
pub const RR_PVD: usize = 16;
pub const RR_PT: usize = 18;
pub const RR_ROOT: usize = 19;
pub const RR_DEEPLY: usize = 20;
pub const RR_NESTED: usize = 21;
pub const RR_FILE: usize = 22;
pub const RR_CONT: usize = 23;
pub const RR_TOTAL: usize = 24;

pub fn rr_file_content() -> Vec<u8> {
    b"deep payload\n".to_vec()
}

fn nm(flags: u8, name: &[u8]) -> Vec<u8> {
    let mut out = vec![b'N', b'M', (5 + name.len()) as u8, 1, flags];
    out.extend_from_slice(name);
    out
}

fn ce(sector: u32, offset: u32, length: u32) -> Vec<u8> {
    let mut out = vec![b'C', b'E', 28, 1];
    out.extend(both32(sector));
    out.extend(both32(offset));
    out.extend(both32(length));
    out
}

fn px(mode: u32, links: u32, uid: u32, gid: u32) -> Vec<u8> {
    let mut out = vec![b'P', b'X', 36, 1];
    for value in [mode, links, uid, gid] {
        out.extend(both32(value));
    }
    out
}

fn er_rrip() -> Vec<u8> {
    let id = b"RRIP_1991A";
    let mut out = vec![b'E', b'R', (8 + id.len()) as u8, 1];
    out.extend([id.len() as u8, 0, 0, 1]);
    out.extend_from_slice(id);
    out
}

fn st() -> Vec<u8> {
    vec![b'S', b'T', 4, 1]
}

/// A Rock Ridge image with a deep hierarchy and a long filename split across
/// an `NM` chain whose tail lives in a `CE` continuation area:
///
/// ```text
/// deeply/nested/long-filename.txt   "deep payload\n"
/// ```
pub fn rockridge_image() -> Vec<u8> {
    let mut image = ImageBuilder::new(RR_TOTAL);

    let table = path_table(&[
        (&[0x00], RR_ROOT as u32, 1),
        (b"DEEPLY", RR_DEEPLY as u32, 1),
        (b"NESTED", RR_NESTED as u32, 2),
    ]);
    image.set(
        RR_PVD,
        volume_descriptor(
            1,
            b"ROCKRIDGE",
            RR_TOTAL as u32,
            RR_ROOT as u32,
            SECTOR as u32,
            RR_PT as u32,
            table.len() as u32,
            &[],
        ),
    );
    image.set(RR_PVD + 1, terminator());
    image.set(RR_PT, table);

    // Root: SP introduces SUSP; a CE chains to the ER announcing Rock Ridge.
    let er_area: Vec<u8> = [er_rrip(), st()].concat();
    let mut root_susp = vec![b'S', b'P', 7, 1, 0xBE, 0xEF, 0];
    root_susp.extend(ce(RR_CONT as u32, 0, er_area.len() as u32));
    let mut root = Vec::new();
    root.extend(record(RR_ROOT as u32, SECTOR as u32, 0x02, &[0x00], &root_susp));
    root.extend(record(RR_ROOT as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    root.extend(record(
        RR_DEEPLY as u32,
        SECTOR as u32,
        0x02,
        b"DEEPLY",
        &nm(0, b"deeply"),
    ));
    image.set(RR_ROOT, root);

    let mut deeply = Vec::new();
    deeply.extend(record(RR_DEEPLY as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    deeply.extend(record(RR_ROOT as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    deeply.extend(record(
        RR_NESTED as u32,
        SECTOR as u32,
        0x02,
        b"NESTED",
        &nm(0, b"nested"),
    ));
    image.set(RR_DEEPLY, deeply);

    // The filename finishes in the continuation area at offset 100.
    let name_tail: Vec<u8> = [nm(0, b"name.txt"), st()].concat();
    let mut file_susp = nm(0x01, b"long-file");
    file_susp.extend(ce(RR_CONT as u32, 100, name_tail.len() as u32));
    file_susp.extend(px(0o100644, 1, 1000, 100));
    let mut nested = Vec::new();
    nested.extend(record(RR_NESTED as u32, SECTOR as u32, 0x02, &[0x00], &[]));
    nested.extend(record(RR_DEEPLY as u32, SECTOR as u32, 0x02, &[0x01], &[]));
    nested.extend(record(
        RR_FILE as u32,
        rr_file_content().len() as u32,
        0,
        b"LONGFI~1.TXT;1",
        &file_susp,
    ));
    image.set(RR_NESTED, nested);

    let mut cont = er_area;
    cont.resize(100, 0);
    cont.extend(name_tail);
    image.set(RR_CONT, cont);

    image.set(RR_FILE, rr_file_content());

    image.build()
}
