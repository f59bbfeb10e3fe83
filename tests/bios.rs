//! DP INFO decoding against hand-built images.

use anyhow::Result;
use regdb::Error;
use regdb::bios::BitEntry;
use regdb::bios::dp::{DTable, DpInfo};

/// Header bytes from a v0x42 table: hlen 9, rlen 4, two entries, three
/// level tables of two entries each, vswing words trailing.
const V42_HEADER: [u8; 13] = [
    0x42, 0x09, 0x04, 0x02, 0x01, 0x03, 0x04, 0x02, 0x05, 0x11, 0x22, 0x33, 0x44,
];

#[test]
fn v42_header_fields() -> Result<()> {
    let mut image = vec![0u8; 0x100];
    image.extend_from_slice(&V42_HEADER);
    image.resize(0x200, 0);

    let dp = DpInfo::parse(&image[..], 0x100).expect("version 0x42 is supported");
    assert_eq!(dp.version, 0x42);
    assert_eq!(dp.hlen, 9);
    assert_eq!(dp.rlen, 4);
    assert_eq!(dp.entriesnum, 2);
    assert_eq!(dp.target_size, 1);
    assert_eq!(dp.levelentrytables_count, 3);
    assert_eq!(dp.levelentry_size, 4);
    assert_eq!(dp.levelentry_count, 2);
    assert_eq!(dp.flags, 5);
    assert_eq!(dp.regular_vswing, 0x2211);
    assert_eq!(dp.low_vswing, 0x4433);
    assert!(dp.valid);
    Ok(())
}

#[test]
fn record_offsets_follow_the_header_arithmetic() -> Result<()> {
    let mut image = vec![0u8; 0x100];
    image.extend_from_slice(&V42_HEADER);
    image.resize(0x200, 0);

    let dp = DpInfo::parse(&image[..], 0x100)?;

    // Entry i sits at offset + hlen + i*rlen.
    assert_eq!(dp.entries.len(), 2);
    assert_eq!(dp.entries[0].offset, 0x109);
    assert_eq!(dp.entries[1].offset, 0x10d);

    // Table k starts past the entries; level entry j steps by the
    // advertised levelentry_size.
    assert_eq!(dp.level_entry_tables.len(), 3);
    for (k, table) in dp.level_entry_tables.iter().enumerate() {
        assert_eq!(table.offset, 0x111 + k as u32 * 2 * 4);
        assert_eq!(table.level_entries.len(), 2);
        for (j, entry) in table.level_entries.iter().enumerate() {
            assert_eq!(entry.offset, table.offset + j as u32 * 4);
        }
    }
    Ok(())
}

#[test]
fn v42_level_entries_have_no_post_cursor() -> Result<()> {
    let mut image = vec![0u8; 0x100];
    image.extend_from_slice(&V42_HEADER);
    image.resize(0x200, 0);
    // Level records start at 0x111; make every byte distinct.
    for (i, off) in (0x111..0x129).enumerate() {
        image[off] = i as u8;
    }

    let dp = DpInfo::parse(&image[..], 0x100)?;
    let le = &dp.level_entry_tables[0].level_entries[0];
    assert!(le.valid);
    assert_eq!(le.post_cursor_2, 0);
    assert_eq!(le.drive_current, 0);
    assert_eq!(le.pre_emphasis, 1);
    assert_eq!(le.tx_pu, 2);

    // Stride is the advertised 4 bytes even though only 3 decode.
    let le = &dp.level_entry_tables[0].level_entries[1];
    assert_eq!(le.drive_current, 4);
    assert_eq!(le.pre_emphasis, 5);
    assert_eq!(le.tx_pu, 6);
    Ok(())
}

#[test]
fn v40_level_entries_carry_four_fields() -> Result<()> {
    let mut image = vec![0u8; 0x40];
    // hlen 9, rlen 4, one entry, one table of two 4-byte levels.
    image.extend_from_slice(&[0x40, 0x09, 0x04, 0x01, 0x01, 0x01, 0x04, 0x02, 0xaa]);
    image.resize(0x60, 0);
    // Entries end at 0x4d; level records follow.
    for (i, off) in (0x4d..0x55).enumerate() {
        image[off] = 0x10 + i as u8;
    }

    let dp = DpInfo::parse(&image[..], 0x40)?;
    assert_eq!(dp.version, 0x40);
    assert_eq!(dp.flags, 0xaa);
    assert_eq!(dp.regular_vswing, 0);
    assert_eq!(dp.low_vswing, 0);
    assert!(dp.valid);

    assert_eq!(dp.entries.len(), 1);
    assert_eq!(dp.entries[0].offset, 0x49);

    let le = &dp.level_entry_tables[0].level_entries[0];
    assert!(le.valid);
    assert_eq!(le.post_cursor_2, 0x10);
    assert_eq!(le.drive_current, 0x11);
    assert_eq!(le.pre_emphasis, 0x12);
    assert_eq!(le.tx_pu, 0x13);
    Ok(())
}

#[test]
fn a_short_read_invalidates_only_the_affected_record() -> Result<()> {
    let mut image = vec![0u8; 0x10];
    // No entries; one table of two 4-byte levels right after the header.
    image.extend_from_slice(&[0x40, 0x09, 0x00, 0x00, 0x00, 0x01, 0x04, 0x02, 0x00]);
    // First level record fits (0x19..=0x1c); the second does not.
    image.resize(0x1d, 0x7f);

    let dp = DpInfo::parse(&image[..], 0x10)?;
    assert!(dp.valid);
    let levels = &dp.level_entry_tables[0].level_entries;
    assert!(levels[0].valid);
    assert_eq!(levels[0].post_cursor_2, 0x7f);
    assert!(!levels[1].valid);
    Ok(())
}

#[test]
fn a_truncated_header_is_invalid_but_not_fatal() -> Result<()> {
    let image = [0x40u8, 0x09, 0x04];
    let dp = DpInfo::parse(&image[..], 0x0)?;
    assert!(!dp.valid);
    assert_eq!(dp.hlen, 9);
    // Counts past the end read as zero, so no records get allocated.
    assert!(dp.entries.is_empty());
    assert!(dp.level_entry_tables.is_empty());
    Ok(())
}

#[test]
fn unknown_versions_fail_the_sub_table() {
    let image = [0x13u8, 0x09, 0x04, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00];
    match DpInfo::parse(&image[..], 0x0) {
        Err(Error::UnknownVersion { offset, version }) => {
            assert_eq!(offset, 0);
            assert_eq!(version, 0x13);
        }
        other => panic!("expected UnknownVersion, got {other:?}"),
    }
}

#[test]
fn the_index_walk_discovers_dp_info() -> Result<()> {
    let mut image = vec![0u8; 0x60];
    // Index at 0x20: one little-endian pointer to 0x30.
    image[0x20] = 0x30;
    image[0x21] = 0x00;
    // An empty v0x41 table at 0x30.
    image[0x30..0x39].copy_from_slice(&[0x41, 0x09, 0x04, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00]);

    let bit = BitEntry {
        offset: 0x18,
        version: 1,
        t_offset: 0x20,
        t_len: 2,
    };
    let d = DTable::parse(&image[..], bit);
    assert_eq!(d.bit, bit);
    assert_eq!(d.dp_info.offset, 0x30);
    assert_eq!(d.dp_info.version, 0x41);
    assert!(d.dp_info.valid);
    Ok(())
}

#[test]
fn an_index_too_short_for_its_slot_yields_nothing() {
    let image = vec![0u8; 0x60];
    let bit = BitEntry {
        offset: 0x18,
        version: 1,
        t_offset: 0x20,
        t_len: 1,
    };
    let d = DTable::parse(&image[..], bit);
    assert_eq!(d.dp_info.offset, 0);
    assert!(!d.dp_info.valid);
}

#[test]
fn a_zero_pointer_skips_the_sub_table() {
    let image = vec![0u8; 0x60];
    let bit = BitEntry {
        offset: 0x18,
        version: 1,
        t_offset: 0x20,
        t_len: 2,
    };
    let d = DTable::parse(&image[..], bit);
    assert_eq!(d.dp_info.offset, 0);
    assert!(!d.dp_info.valid);
}

#[test]
fn an_unknown_version_leaves_the_sub_table_invalid() {
    let mut image = vec![0u8; 0x40];
    image[0x20] = 0x30;
    image[0x30] = 0x77;

    let bit = BitEntry {
        offset: 0x18,
        version: 1,
        t_offset: 0x20,
        t_len: 2,
    };
    let d = DTable::parse(&image[..], bit);
    assert_eq!(d.dp_info.offset, 0x30);
    assert!(!d.dp_info.valid);
}

#[test]
fn index_slots_map_to_table_names() {
    assert_eq!(DTable::table_name(0), Some("DP INFO"));
    assert_eq!(DTable::table_name(1), None);
}
