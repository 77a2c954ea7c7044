//! CSV store for face databases.
//!
//! Four columns: `name`, `img path`, `bounding box`, `face descriptor`. The
//! bounding box and descriptor are space-separated lists inside a single
//! field, so the table keeps four columns regardless of descriptor length.

use crate::types::{BoundingBox, Database, Descriptor, FaceRecord};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Header row of every database file.
pub const HEADER: [&str; 4] = ["name", "img path", "bounding box", "face descriptor"];

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

fn malformed(line: u64, reason: impl Into<String>) -> CodecError {
    CodecError::MalformedRecord { line, reason: reason.into() }
}

/// Write `database` as CSV, header first.
pub fn encode<W: Write>(database: &Database, writer: W) -> Result<(), CodecError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;
    for record in database {
        let bbox = format_bounding_box(&record.bounding_box);
        let descriptor = format_descriptor(&record.descriptor);
        wtr.write_record([
            record.name.as_str(),
            record.image_path.as_str(),
            bbox.as_str(),
            descriptor.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Parse a database from CSV. Any bad row fails the whole decode.
pub fn decode<R: Read>(reader: R) -> Result<Database, CodecError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut rows = rdr.records();

    let header = match rows.next() {
        Some(row) => row.map_err(read_error)?,
        None => return Err(malformed(1, "missing header row")),
    };
    let header_line = line_of(&header);
    let fields: Vec<&str> = header.iter().map(str::trim).collect();
    if fields != HEADER {
        return Err(malformed(
            header_line,
            format!("expected header {HEADER:?}, found {fields:?}"),
        ));
    }

    let mut lines = Vec::new();
    let mut records = Vec::new();
    for row in rows {
        let row = row.map_err(read_error)?;
        let line = line_of(&row);
        records.push(parse_row(&row).map_err(|reason| malformed(line, reason))?);
        lines.push(line);
    }

    Database::new(records).map_err(|e| malformed(lines[e.index()], e.to_string()))
}

/// Encode into a `String`.
pub fn encode_to_string(database: &Database) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    encode(database, &mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

/// Decode from an in-memory string.
pub fn decode_str(text: &str) -> Result<Database, CodecError> {
    decode(text.as_bytes())
}

/// Write `database` to `path`, replacing any existing file.
pub fn save(database: &Database, path: impl AsRef<Path>) -> Result<(), CodecError> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode(database, &mut writer)?;
    writer.flush()?;
    tracing::info!(path = %path.display(), records = database.len(), "saved face database");
    Ok(())
}

/// Read a database previously written by [`save`].
pub fn load(path: impl AsRef<Path>) -> Result<Database, CodecError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let database = decode(BufReader::new(file))?;
    tracing::info!(
        path = %path.display(),
        records = database.len(),
        descriptor_len = ?database.descriptor_len(),
        "loaded face database"
    );
    Ok(database)
}

fn line_of(row: &csv::StringRecord) -> u64 {
    row.position().map_or(0, |p| p.line())
}

fn read_error(err: csv::Error) -> CodecError {
    match err.kind() {
        csv::ErrorKind::Utf8 { pos, err: utf8 } => {
            malformed(pos.as_ref().map_or(0, |p| p.line()), format!("invalid UTF-8: {utf8}"))
        }
        _ => CodecError::Csv(err),
    }
}

fn parse_row(row: &csv::StringRecord) -> Result<FaceRecord, String> {
    if row.len() != HEADER.len() {
        return Err(format!("expected {} fields, found {}", HEADER.len(), row.len()));
    }
    Ok(FaceRecord {
        name: row[0].to_string(),
        image_path: row[1].to_string(),
        bounding_box: parse_bounding_box(&row[2])?,
        descriptor: parse_descriptor(&row[3])?,
    })
}

/// Split a sub-list field. Accepts `1 2 3` as written by [`encode`] and the
/// bracketed `[1, 2, 3]` form found in older files.
fn split_values(field: &str) -> impl Iterator<Item = &str> {
    let trimmed = field.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

fn parse_bounding_box(field: &str) -> Result<BoundingBox, String> {
    let coords = split_values(field)
        .map(|v| {
            v.parse::<i32>()
                .map_err(|e| format!("bounding box value '{v}': {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let coords: [i32; 4] = coords
        .try_into()
        .map_err(|v: Vec<i32>| format!("bounding box needs 4 integers, found {}", v.len()))?;
    BoundingBox::try_from(coords).map_err(|e| e.to_string())
}

fn parse_descriptor(field: &str) -> Result<Descriptor, String> {
    let values = split_values(field)
        .map(|v| match v.parse::<f32>() {
            Ok(x) if x.is_finite() => Ok(x),
            Ok(_) => Err(format!("descriptor value '{v}' is not finite")),
            Err(e) => Err(format!("descriptor value '{v}': {e}")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err("face descriptor is empty".to_string());
    }
    Ok(Descriptor::new(values))
}

fn format_bounding_box(bbox: &BoundingBox) -> String {
    let [l, t, r, b] = bbox.to_array();
    format!("{l} {t} {r} {b}")
}

// `Display` for f32 is the shortest string that parses back to the same bits.
fn format_descriptor(descriptor: &Descriptor) -> String {
    descriptor
        .values()
        .iter()
        .map(f32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, path: &str, bbox: [i32; 4], values: Vec<f32>) -> FaceRecord {
        FaceRecord {
            name: name.into(),
            image_path: path.into(),
            bounding_box: BoundingBox::try_from(bbox).unwrap(),
            descriptor: Descriptor::new(values),
        }
    }

    fn sample_db() -> Database {
        Database::new(vec![
            record("alice", "database/alice/1.jpg", [10, 20, 110, 140], vec![0.1, -0.25, 1e-7]),
            record("bob", "database/bob/a.png", [0, 0, 64, 64], vec![-0.0, 3.4028235e38, 0.333_333_34]),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip_exact() {
        let db = sample_db();
        let text = encode_to_string(&db).unwrap();
        assert_eq!(decode_str(&text).unwrap(), db);
    }

    #[test]
    fn test_encode_layout() {
        let db = Database::new(vec![record("alice", "a.jpg", [1, 2, 3, 4], vec![0.5, -1.0])]).unwrap();
        let text = encode_to_string(&db).unwrap();
        assert_eq!(
            text,
            "name,img path,bounding box,face descriptor\nalice,a.jpg,1 2 3 4,0.5 -1\n"
        );
    }

    #[test]
    fn test_roundtrip_quoted_fields() {
        let db = Database::new(vec![record(
            "O'Brien, \"Pat\"",
            "db/pat\nline.jpg",
            [1, 2, 3, 4],
            vec![0.25],
        )])
        .unwrap();
        let text = encode_to_string(&db).unwrap();
        assert_eq!(decode_str(&text).unwrap(), db);
    }

    #[test]
    fn test_unloadable_descriptors_never_reach_a_file() {
        // every Database is checked on construction, so encode only ever sees loadable rows
        for values in [vec![], vec![f32::NAN, 0.5], vec![f32::NEG_INFINITY]] {
            let err = Database::new(vec![record("alice", "a.jpg", [1, 2, 3, 4], values)]).unwrap_err();
            assert!(matches!(err, crate::types::InvalidRecord::Descriptor { index: 0, .. }), "{err}");
        }
    }

    #[test]
    fn test_roundtrip_empty_database() {
        let text = encode_to_string(&Database::default()).unwrap();
        assert_eq!(text, "name,img path,bounding box,face descriptor\n");
        assert!(decode_str(&text).unwrap().is_empty());
    }

    #[test]
    fn test_decode_legacy_bracketed_lists() {
        let text = "name,img path,bounding box,face descriptor\n\
                    alice,/db/alice.jpg,\"[12, 34, 56, 78]\",\"[0.125, -0.5, 2.0]\"\n";
        let db = decode_str(text).unwrap();
        let rec = &db.records()[0];
        assert_eq!(rec.bounding_box.to_array(), [12, 34, 56, 78]);
        assert_eq!(rec.descriptor.values(), &[0.125, -0.5, 2.0]);
    }

    fn assert_malformed(text: &str, expected_line: u64) -> String {
        match decode_str(text) {
            Err(CodecError::MalformedRecord { line, reason }) => {
                assert_eq!(line, expected_line, "reason: {reason}");
                reason
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_three_fields() {
        let text = "name,img path,bounding box,face descriptor\nalice,a.jpg,1 2 3 4\n";
        let reason = assert_malformed(text, 2);
        assert!(reason.contains("4 fields"), "{reason}");
    }

    #[test]
    fn test_decode_five_fields() {
        let text = "name,img path,bounding box,face descriptor\nalice,a.jpg,1 2 3 4,0.1,extra\n";
        assert_malformed(text, 2);
    }

    #[test]
    fn test_decode_bad_bounding_box() {
        let header = "name,img path,bounding box,face descriptor\n";
        assert_malformed(&format!("{header}a,a.jpg,1 2 3,0.1\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1 2 3 4 5,0.1\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1 2 x 4,0.1\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1.5 2 3 4,0.1\n"), 2);
        // right < left
        assert_malformed(&format!("{header}a,a.jpg,9 2 3 4,0.1\n"), 2);
    }

    #[test]
    fn test_decode_bad_descriptor() {
        let header = "name,img path,bounding box,face descriptor\n";
        let reason = assert_malformed(&format!("{header}a,a.jpg,1 2 3 4,\n"), 2);
        assert!(reason.contains("empty"), "{reason}");
        assert_malformed(&format!("{header}a,a.jpg,1 2 3 4,[]\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1 2 3 4,0.1 abc\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1 2 3 4,0.1 NaN\n"), 2);
        assert_malformed(&format!("{header}a,a.jpg,1 2 3 4,inf\n"), 2);
    }

    #[test]
    fn test_decode_inconsistent_lengths() {
        let text = "name,img path,bounding box,face descriptor\n\
                    a,a.jpg,1 2 3 4,0.1 0.2\n\
                    b,b.jpg,1 2 3 4,0.1 0.2\n\
                    c,c.jpg,1 2 3 4,0.1\n";
        assert_malformed(text, 4);
    }

    #[test]
    fn test_decode_header_checks() {
        assert_malformed("", 1);
        assert_malformed("name,path,bbox,descriptor\n", 1);
        assert_malformed("alice,a.jpg,1 2 3 4,0.1\n", 1);
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut bytes = b"name,img path,bounding box,face descriptor\n".to_vec();
        bytes.extend_from_slice(b"al\xffce,a.jpg,1 2 3 4,0.1\n");
        assert!(matches!(
            decode(bytes.as_slice()),
            Err(CodecError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        let db = sample_db();
        save(&db, &path).unwrap();
        assert_eq!(load(&path).unwrap(), db);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path().join("missing.csv")),
            Err(CodecError::Io(_))
        ));
    }
}
