//! The BIT "d" index and its DP INFO sub-table: DisplayPort
//! voltage-swing and pre-emphasis calibration records.
//!
//! The index is a packed array of little-endian u16 pointers; only
//! slot 0 (DP INFO) is recognised here, further slots are left to the
//! printer. DP INFO itself is versioned: 0x40/0x41 carry a 9-byte
//! header and four-byte level entries, 0x42 a 13-byte header and
//! three-byte level entries. Any other version fails the sub-table as
//! a whole; a short read only invalidates the record it hit.

use tracing::{error, warn};

use crate::bios::{BiosImage, BitEntry};
use crate::error::Error;

/// Sub-tables the index walk recognises: byte offset into the index
/// and display name.
const KNOWN_TABLES: &[(u32, &str)] = &[(0x0, "DP INFO")];

/// The decoded "d" table group: the framing entry plus every
/// recognised sub-table.
#[derive(Clone, Debug, Default)]
pub struct DTable {
    pub bit: BitEntry,
    pub dp_info: DpInfo,
}

impl DTable {
    /// Walk the "d" index and decode the sub-tables it points at.
    ///
    /// The walk stops at the first slot that is not recognised or does
    /// not fit inside the index; a sub-table that fails to decode is
    /// left with `valid == false` and the rest of the group survives.
    pub fn parse(image: &(impl BiosImage + ?Sized), bit: BitEntry) -> DTable {
        let mut table = DTable {
            bit,
            ..Default::default()
        };
        for (slot, (offset, _)) in KNOWN_TABLES.iter().enumerate() {
            if offset + 2 > u32::from(bit.t_len) {
                break;
            }
            let Some(pointer) = image.read_u16(bit.t_offset.saturating_add(*offset)) else {
                break;
            };
            if slot == 0 {
                table.dp_info.offset = u32::from(pointer);
            }
        }
        if table.dp_info.offset != 0 {
            match DpInfo::parse(image, table.dp_info.offset) {
                Ok(dp_info) => table.dp_info = dp_info,
                Err(err) => error!("{err}"),
            }
        }
        table
    }

    /// Display name of the sub-table behind an index slot, for the
    /// printer walking unrecognised pointers.
    pub fn table_name(slot: usize) -> Option<&'static str> {
        KNOWN_TABLES.get(slot).map(|(_, name)| *name)
    }
}

/// DP INFO header and records. `valid` covers the header decode only;
/// every level entry carries its own flag.
#[derive(Clone, Debug, Default)]
pub struct DpInfo {
    pub offset: u32,
    pub version: u8,
    pub hlen: u8,
    pub rlen: u8,
    pub entriesnum: u8,
    pub target_size: u8,
    pub levelentrytables_count: u8,
    pub levelentry_size: u8,
    pub levelentry_count: u8,
    pub flags: u8,
    pub regular_vswing: u16,
    pub low_vswing: u16,
    pub valid: bool,
    pub entries: Vec<DpInfoEntry>,
    pub level_entry_tables: Vec<LevelEntryTable>,
}

/// One calibration entry; the body bytes stay in the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DpInfoEntry {
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelEntryTable {
    pub offset: u32,
    pub level_entries: Vec<LevelEntry>,
}

/// Drive settings for one link level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelEntry {
    pub offset: u32,
    /// Always 0 for version 0x42, which has no post-cursor byte.
    pub post_cursor_2: u8,
    pub drive_current: u8,
    pub pre_emphasis: u8,
    pub tx_pu: u8,
    pub valid: bool,
}

fn read8(image: &(impl BiosImage + ?Sized), offset: u32, short: &mut bool) -> u8 {
    match image.read_u8(offset) {
        Some(byte) => byte,
        None => {
            warn!("{}", Error::BinaryBounds { offset });
            *short = true;
            0
        }
    }
}

fn read16(image: &(impl BiosImage + ?Sized), offset: u32, short: &mut bool) -> u16 {
    match image.read_u16(offset) {
        Some(word) => word,
        None => {
            warn!("{}", Error::BinaryBounds { offset });
            *short = true;
            0
        }
    }
}

impl DpInfo {
    /// Decode a DP INFO table at `offset`.
    ///
    /// An unknown version is fatal for the sub-table. Short reads are
    /// diagnosed, mark the affected record (the header, or a single
    /// level entry) invalid, and decoding continues.
    pub fn parse(image: &(impl BiosImage + ?Sized), offset: u32) -> Result<DpInfo, Error> {
        let mut dp = DpInfo {
            offset,
            ..Default::default()
        };
        dp.version = image.read_u8(offset).unwrap_or(0);

        let mut short = false;
        match dp.version {
            0x40 | 0x41 | 0x42 => {
                dp.hlen = read8(image, offset.saturating_add(0x1), &mut short);
                dp.rlen = read8(image, offset.saturating_add(0x2), &mut short);
                dp.entriesnum = read8(image, offset.saturating_add(0x3), &mut short);
                dp.target_size = read8(image, offset.saturating_add(0x4), &mut short);
                dp.levelentrytables_count = read8(image, offset.saturating_add(0x5), &mut short);
                dp.levelentry_size = read8(image, offset.saturating_add(0x6), &mut short);
                dp.levelentry_count = read8(image, offset.saturating_add(0x7), &mut short);
                dp.flags = read8(image, offset.saturating_add(0x8), &mut short);
                if dp.version == 0x42 {
                    dp.regular_vswing = read16(image, offset.saturating_add(0x9), &mut short);
                    dp.low_vswing = read16(image, offset.saturating_add(0xb), &mut short);
                }
                dp.valid = !short;
            }
            version => return Err(Error::UnknownVersion { offset, version }),
        }

        let expected_size = if dp.version == 0x42 { 3 } else { 4 };
        if dp.levelentry_size != expected_size {
            warn!(
                "DP INFO table at {offset:#x} advertises level entry size {}, decoding {expected_size} bytes",
                dp.levelentry_size
            );
        }

        for i in 0..u32::from(dp.entriesnum) {
            dp.entries.push(DpInfoEntry {
                offset: offset
                    .saturating_add(u32::from(dp.hlen))
                    .saturating_add(i * u32::from(dp.rlen)),
            });
        }

        let tables_base = offset
            .saturating_add(u32::from(dp.hlen))
            .saturating_add(u32::from(dp.entriesnum) * u32::from(dp.rlen));
        for k in 0..u32::from(dp.levelentrytables_count) {
            let table_offset = tables_base
                .saturating_add(k * u32::from(dp.levelentry_count) * u32::from(dp.levelentry_size));
            let mut table = LevelEntryTable {
                offset: table_offset,
                level_entries: Vec::new(),
            };
            for j in 0..u32::from(dp.levelentry_count) {
                let entry_offset = table_offset.saturating_add(j * u32::from(dp.levelentry_size));
                let mut entry = LevelEntry {
                    offset: entry_offset,
                    ..Default::default()
                };
                let mut short = false;
                if dp.version == 0x42 {
                    entry.drive_current = read8(image, entry_offset, &mut short);
                    entry.pre_emphasis = read8(image, entry_offset.saturating_add(0x1), &mut short);
                    entry.tx_pu = read8(image, entry_offset.saturating_add(0x2), &mut short);
                } else {
                    entry.post_cursor_2 = read8(image, entry_offset, &mut short);
                    entry.drive_current = read8(image, entry_offset.saturating_add(0x1), &mut short);
                    entry.pre_emphasis = read8(image, entry_offset.saturating_add(0x2), &mut short);
                    entry.tx_pu = read8(image, entry_offset.saturating_add(0x3), &mut short);
                }
                entry.valid = !short;
                table.level_entries.push(entry);
            }
            dp.level_entry_tables.push(table);
        }

        Ok(dp)
    }
}
