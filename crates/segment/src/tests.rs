use super::*;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn make_put(ts: u64, key: &[u8], value: &[u8]) -> Record {
    Record::put(ts, key.to_vec(), value.to_vec())
}

fn scan_all(path: &Path) -> Result<Vec<ScannedRecord>, SegmentError> {
    let mut iter = RecordIter::open(path)?;
    let mut recs = Vec::new();
    while let Some(s) = iter.next_record()? {
        recs.push(s);
    }
    Ok(recs)
}

fn scan_bytes(data: &[u8]) -> Result<Vec<ScannedRecord>, SegmentError> {
    let mut iter = RecordIter::from_reader(Cursor::new(data.to_vec()));
    let mut recs = Vec::new();
    while let Some(s) = iter.next_record()? {
        recs.push(s);
    }
    Ok(recs)
}

// -------------------- Codec layout --------------------

#[test]
fn encoded_layout_is_big_endian() {
    let rec = make_put(0x0102_0304_0506_0708, b"k", b"v");
    let mut buf = Vec::new();
    rec.encode_into(&mut buf);

    assert_eq!(buf.len(), HEADER_LEN + 2);
    // timestamp
    assert_eq!(&buf[4..12], &0x0102_0304_0506_0708u64.to_be_bytes());
    // key_size
    assert_eq!(&buf[12..14], &1u16.to_be_bytes());
    // value_size
    assert_eq!(&buf[14..18], &1u32.to_be_bytes());
    assert_eq!(&buf[18..19], b"k");
    assert_eq!(&buf[19..20], b"v");

    // crc covers everything after itself
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..]);
    assert_eq!(&buf[0..4], &hasher.finalize().to_be_bytes());
}

#[test]
fn tombstone_uses_sentinel_and_omits_value() {
    let rec = Record::tombstone(7, b"gone".to_vec());
    let mut buf = Vec::new();
    rec.encode_into(&mut buf);

    assert_eq!(buf.len(), HEADER_LEN + 4);
    assert_eq!(&buf[14..18], &TOMBSTONE.to_be_bytes());

    let recs = scan_bytes(&buf).unwrap();
    assert_eq!(recs.len(), 1);
    assert!(recs[0].record.is_tombstone());
    assert_eq!(recs[0].record.key, b"gone");
}

#[test]
fn roundtrip_in_memory() {
    let mut buf = Vec::new();
    make_put(1, b"alpha", b"1").encode_into(&mut buf);
    Record::tombstone(2, b"alpha".to_vec()).encode_into(&mut buf);
    make_put(3, b"beta", b"22").encode_into(&mut buf);

    let recs = scan_bytes(&buf).unwrap();
    assert_eq!(recs.len(), 3);
    assert_eq!(recs[0].record, make_put(1, b"alpha", b"1"));
    assert_eq!(recs[1].record, Record::tombstone(2, b"alpha".to_vec()));
    assert_eq!(recs[2].record, make_put(3, b"beta", b"22"));

    // offsets chain: each record starts where the previous ended
    assert_eq!(recs[0].record_offset, 0);
    assert_eq!(
        recs[1].record_offset,
        recs[0].record.encoded_len() as u64
    );
    assert_eq!(
        recs[2].value_offset,
        recs[2].record_offset + (HEADER_LEN + 4) as u64
    );
}

#[test]
fn empty_value_roundtrip() {
    let mut buf = Vec::new();
    make_put(1, b"k", b"").encode_into(&mut buf);

    let recs = scan_bytes(&buf).unwrap();
    assert_eq!(recs[0].record.value.as_deref(), Some(&b""[..]));
}

#[test]
fn binary_key_and_value() {
    let key = vec![0x00u8, 0xFF, 0x80];
    let val = vec![0xDEu8, 0xAD, 0xBE, 0xEF];
    let mut buf = Vec::new();
    Record::put(9, key.clone(), val.clone()).encode_into(&mut buf);

    let recs = scan_bytes(&buf).unwrap();
    assert_eq!(recs[0].record.key, key);
    assert_eq!(recs[0].record.value.as_deref(), Some(val.as_slice()));
}

// -------------------- Corruption detection --------------------

#[test]
fn crc_mismatch_is_corrupt() {
    let mut buf = Vec::new();
    make_put(1, b"k", b"v").encode_into(&mut buf);
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;

    assert!(matches!(scan_bytes(&buf), Err(SegmentError::Corrupt)));
}

#[test]
fn zero_key_size_is_corrupt() {
    let mut buf = Vec::new();
    make_put(1, b"k", b"v").encode_into(&mut buf);
    // zero out key_size; the CRC check would also fail, but the size check
    // fires first and avoids reading a nonsense body
    buf[12] = 0;
    buf[13] = 0;

    assert!(matches!(scan_bytes(&buf), Err(SegmentError::Corrupt)));
}

#[test]
fn truncated_header_is_corrupt() {
    let mut buf = Vec::new();
    make_put(1, b"k", b"v").encode_into(&mut buf);
    buf.truncate(10);

    assert!(matches!(scan_bytes(&buf), Err(SegmentError::Corrupt)));
}

#[test]
fn truncated_value_is_corrupt() {
    let mut buf = Vec::new();
    make_put(1, b"key", b"a longer value").encode_into(&mut buf);
    buf.truncate(buf.len() - 3);

    assert!(matches!(scan_bytes(&buf), Err(SegmentError::Corrupt)));
}

#[test]
fn scanner_reports_valid_prefix_after_corruption() {
    let mut buf = Vec::new();
    let first = make_put(1, b"k1", b"v1");
    first.encode_into(&mut buf);
    let good = buf.len() as u64;
    make_put(2, b"k2", b"v2").encode_into(&mut buf);
    buf.truncate(buf.len() - 1);

    let mut iter = RecordIter::from_reader(Cursor::new(buf));
    assert_eq!(iter.next_record().unwrap().unwrap().record, first);
    assert!(matches!(iter.next_record(), Err(SegmentError::Corrupt)));
    assert_eq!(iter.pos(), good);
}

#[test]
fn empty_input_is_clean_eof() {
    assert!(scan_bytes(b"").unwrap().is_empty());
}

#[test]
fn partial_first_field_is_corrupt_not_eof() {
    // fewer bytes than the CRC field: a torn write, not a record boundary
    let mut buf = Vec::new();
    make_put(1, b"k", b"v").encode_into(&mut buf);
    let good = buf.len() as u64;
    buf.extend_from_slice(&[0xAB, 0xCD]);

    let mut iter = RecordIter::from_reader(Cursor::new(buf));
    assert!(iter.next_record().unwrap().is_some());
    assert!(matches!(iter.next_record(), Err(SegmentError::Corrupt)));
    assert_eq!(iter.pos(), good);
}

// -------------------- Active segment --------------------

#[test]
fn append_tracks_size_and_offsets() {
    let dir = tempdir().unwrap();
    let mut seg = ActiveSegment::create(dir.path(), 0).unwrap();
    assert_eq!(seg.size(), 0);

    let a = seg.append(&make_put(1, b"key", b"value")).unwrap();
    assert_eq!(a.record_offset, 0);
    assert_eq!(a.value_offset, (HEADER_LEN + 3) as u64);
    assert_eq!(a.len, (HEADER_LEN + 3 + 5) as u64);
    assert_eq!(seg.size(), a.len);

    let b = seg.append(&make_put(2, b"k2", b"v2")).unwrap();
    assert_eq!(b.record_offset, a.len);
    assert_eq!(seg.size(), a.len + b.len);
}

#[test]
fn read_value_returns_exact_bytes() {
    let dir = tempdir().unwrap();
    let mut seg = ActiveSegment::create(dir.path(), 3).unwrap();
    let a = seg.append(&make_put(1, b"name", b"cask")).unwrap();
    seg.seal().unwrap();

    let reader = SegmentReader::open(dir.path(), 3).unwrap();
    assert_eq!(reader.read_value(a.value_offset, 4).unwrap(), b"cask");
    assert_eq!(reader.size(), a.len);
}

#[test]
fn create_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let seg = ActiveSegment::create(dir.path(), 0).unwrap();
    drop(seg);
    assert!(ActiveSegment::create(dir.path(), 0).is_err());
}

#[test]
fn reopen_continues_at_end() {
    let dir = tempdir().unwrap();
    {
        let mut seg = ActiveSegment::create(dir.path(), 1).unwrap();
        seg.append(&make_put(1, b"a", b"1")).unwrap();
        seg.seal().unwrap();
    }

    let mut seg = ActiveSegment::reopen(dir.path(), 1).unwrap();
    let size_before = seg.size();
    assert!(size_before > 0);
    seg.append(&make_put(2, b"b", b"2")).unwrap();
    seg.sync().unwrap();

    let recs = scan_all(&data_path(dir.path(), 1)).unwrap();
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[1].record_offset, size_before);
}

#[test]
fn append_rejects_empty_key() {
    let dir = tempdir().unwrap();
    let mut seg = ActiveSegment::create(dir.path(), 0).unwrap();
    assert!(seg.append(&make_put(1, b"", b"v")).is_err());
    assert_eq!(seg.size(), 0);
}

#[test]
fn scan_stops_at_torn_file_tail() {
    let dir = tempdir().unwrap();
    let path = data_path(dir.path(), 0);
    {
        let mut seg = ActiveSegment::create(dir.path(), 0).unwrap();
        seg.append(&make_put(1, b"k1", b"v1")).unwrap();
        seg.append(&make_put(2, b"k2", b"v2")).unwrap();
        seg.seal().unwrap();
    }

    let mut data = fs::read(&path).unwrap();
    data.truncate(data.len() - 3);
    fs::write(&path, &data).unwrap();

    let mut iter = RecordIter::open(&path).unwrap();
    assert!(iter.next_record().unwrap().is_some());
    assert!(matches!(iter.next_record(), Err(SegmentError::Corrupt)));
}

// -------------------- Hint files --------------------

#[test]
fn hint_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0000000000000002.hint");

    let entries = vec![
        HintRecord {
            timestamp: 10,
            value_size: 5,
            value_offset: 21,
            key: b"alpha".to_vec(),
        },
        HintRecord {
            timestamp: 11,
            value_size: 0,
            value_offset: 70,
            key: b"beta".to_vec(),
        },
    ];

    {
        let mut w = HintWriter::create(&path).unwrap();
        for e in &entries {
            w.append(e).unwrap();
        }
        w.sync().unwrap();
    }

    let mut iter = HintIter::open(&path).unwrap();
    let mut got = Vec::new();
    while let Some(e) = iter.next_record().unwrap() {
        got.push(e);
    }
    assert_eq!(got, entries);
}

#[test]
fn truncated_hint_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0000000000000001.hint");
    {
        let mut w = HintWriter::create(&path).unwrap();
        w.append(&HintRecord {
            timestamp: 1,
            value_size: 3,
            value_offset: 20,
            key: b"key".to_vec(),
        })
        .unwrap();
        w.sync().unwrap();
    }

    let mut data = fs::read(&path).unwrap();
    data.truncate(data.len() - 2);

    let mut iter = HintIter::from_reader(Cursor::new(data));
    assert!(matches!(iter.next_record(), Err(SegmentError::Corrupt)));
}

#[test]
fn hint_tombstone_sentinel_is_corrupt() {
    let mut data = Vec::new();
    data.extend_from_slice(&1u64.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&TOMBSTONE.to_be_bytes());
    data.extend_from_slice(&0u64.to_be_bytes());
    data.extend_from_slice(b"k");

    let mut iter = HintIter::from_reader(Cursor::new(data));
    assert!(matches!(iter.next_record(), Err(SegmentError::Corrupt)));
}

// -------------------- File naming --------------------

#[test]
fn data_names_are_sixteen_hex_digits() {
    let dir = Path::new("db");
    assert_eq!(
        data_path(dir, 0x2a),
        dir.join("000000000000002a.data")
    );
    assert_eq!(hint_path(dir, 1), dir.join("0000000000000001.hint"));
}

#[test]
fn parse_accepts_only_well_formed_names() {
    assert_eq!(parse_data_name("000000000000002a.data"), Some(0x2a));
    assert_eq!(parse_hint_name("0000000000000001.hint"), Some(1));
    assert_eq!(
        parse_data_name("ffffffffffffffff.data"),
        Some(u64::MAX)
    );

    assert_eq!(parse_data_name("2a.data"), None);
    assert_eq!(parse_data_name("000000000000002a.hint"), None);
    assert_eq!(parse_data_name("000000000000002a.data.tmp"), None);
    assert_eq!(parse_data_name("000000000000zz2a.data"), None);
    assert_eq!(parse_data_name(".lock"), None);
    assert_eq!(parse_hint_name("notes.txt"), None);
}
