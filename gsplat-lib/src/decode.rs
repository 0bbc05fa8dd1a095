use crate::common::{convert_opacity, convert_orientation, convert_position, convert_scale};
use crate::error::SplatError;
use crate::header::{next_line, Encoding, FieldKind, FieldRoles, ScalarType, Schema};
use crate::structures::SplatRecord;
use glam::Vec3;

/// Decodes `schema.record_count` records from the payload starting at `offset`.
pub fn decode_records(
    schema: &Schema,
    raw: &[u8],
    offset: usize,
) -> Result<Vec<SplatRecord>, SplatError> {
    match schema.encoding {
        Encoding::Ascii => decode_ascii(schema, raw, offset),
        Encoding::BinaryLittleEndian => decode_binary(schema, raw, offset, false),
        Encoding::BinaryBigEndian => decode_binary(schema, raw, offset, true),
    }
}

/// Invalid tokens read as 0.0 rather than failing the row.
#[inline]
fn parse_token(token: &str) -> f32 {
    token.parse().unwrap_or(0.0)
}

fn decode_ascii(
    schema: &Schema,
    raw: &[u8],
    offset: usize,
) -> Result<Vec<SplatRecord>, SplatError> {
    let field_count = schema.fields.len();
    let remaining = raw.len().saturating_sub(offset);
    let mut records = Vec::with_capacity(schema.record_count.min(remaining / 2));
    let mut row = vec![0.0f32; field_count];
    let mut cursor = offset;

    for row_index in 0..schema.record_count {
        // Blank lines between rows are skipped
        let line = loop {
            let line = next_line(raw, &mut cursor).ok_or(SplatError::TruncatedRow(row_index))?;
            if !line.iter().all(u8::is_ascii_whitespace) {
                break line;
            }
        };

        let text = String::from_utf8_lossy(line);
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < field_count {
            return Err(SplatError::TruncatedRow(row_index));
        }

        let mut tokens = tokens.into_iter();
        for (field, value) in schema.fields.iter().zip(row.iter_mut()) {
            let token = tokens.next().ok_or(SplatError::TruncatedRow(row_index))?;
            match field.kind {
                FieldKind::Scalar(_) => *value = parse_token(token),
                FieldKind::List { .. } => {
                    let len: usize = token.parse().unwrap_or(0);
                    for _ in 0..len {
                        tokens.next().ok_or(SplatError::TruncatedRow(row_index))?;
                    }
                    *value = 0.0;
                }
            }
        }

        records.push(build_record(&schema.roles, &row));
    }

    log::debug!("Decoded {} ASCII rows", records.len());
    Ok(records)
}

#[inline]
fn read_f32(bytes: &[u8], big_endian: bool) -> f32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(bytes);
    if big_endian {
        f32::from_be_bytes(b)
    } else {
        f32::from_le_bytes(b)
    }
}

#[inline]
fn read_f64(bytes: &[u8], big_endian: bool) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(bytes);
    if big_endian {
        f64::from_be_bytes(b)
    } else {
        f64::from_le_bytes(b)
    }
}

fn decode_binary(
    schema: &Schema,
    raw: &[u8],
    offset: usize,
    big_endian: bool,
) -> Result<Vec<SplatRecord>, SplatError> {
    let data = raw.get(offset..).unwrap_or(&[]);
    let stride = schema.record_stride();
    let mut records = Vec::with_capacity(schema.record_count.min(data.len() / stride.max(1)));
    let mut row = vec![0.0f32; schema.fields.len()];
    let mut cursor = 0;

    for record_index in 0..schema.record_count {
        // The whole record must be present before any field is read
        let vertex_data = data
            .get(cursor..cursor + stride)
            .ok_or(SplatError::TruncatedBinary(record_index))?;

        let mut field_offset = 0;
        for (field, value) in schema.fields.iter().zip(row.iter_mut()) {
            let size = field.byte_size as usize;
            let bytes = &vertex_data[field_offset..field_offset + size];
            *value = match field.kind {
                FieldKind::Scalar(ScalarType::Float32) => read_f32(bytes, big_endian),
                FieldKind::Scalar(ScalarType::Float64) => read_f64(bytes, big_endian) as f32,
                // Integer properties are stepped over
                _ => 0.0,
            };
            field_offset += size;
        }

        records.push(build_record(&schema.roles, &row));
        cursor += stride;
    }

    log::debug!(
        "Decoded {} binary records ({} bytes each)",
        records.len(),
        stride
    );
    Ok(records)
}

/// Builds one normalized record from a row of raw values indexed by field.
pub(crate) fn build_record(roles: &FieldRoles, row: &[f32]) -> SplatRecord {
    let [ix, iy, iz] = roles.position;
    let mut splat = SplatRecord {
        position: convert_position(row[ix], row[iy], row[iz]),
        ..Default::default()
    };

    if let Some([a, b, c]) = roles.normal {
        splat.normal = Vec3::new(row[a], row[b], row[c]);
    }
    if let Some([a, b, c]) = roles.scale {
        splat.scale = convert_scale(row[a], row[b], row[c]);
    }
    if let Some([w, x, y, z]) = roles.rotation {
        splat.orientation = convert_orientation(row[w], row[x], row[y], row[z]);
    }
    if let Some(i) = roles.opacity {
        splat.opacity = convert_opacity(row[i]);
    }
    if let Some([r, g, b]) = roles.sh_dc {
        splat.sh_dc = Vec3::new(row[r], row[g], row[b]);
    }
    splat.sh_rest = roles
        .sh_rest
        .iter()
        .map(|&[r, g, b]| Vec3::new(row[r], row[g], row[b]))
        .collect();

    splat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_header;
    use glam::Quat;

    const FIELDS: [&str; 14] = [
        "x", "y", "z", "opacity", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2",
        "rot_3", "f_dc_0", "f_dc_1", "f_dc_2",
    ];

    #[rustfmt::skip]
    const ROWS: [[f32; 14]; 2] = [
        [0.5, 1.25, -2.0, 0.0, -1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.1, 0.2, 0.3],
        [-3.0, 0.125, 4.5, 2.0, -4.0, -3.5, -3.0, 0.5, 0.5, 0.5, 0.5, -1.0, 0.0, 1.0],
    ];

    fn header(format: &str, count: usize) -> String {
        let mut text = format!("ply\nformat {} 1.0\nelement vertex {}\n", format, count);
        for name in FIELDS {
            text.push_str(&format!("property float {}\n", name));
        }
        text.push_str("end_header\n");
        text
    }

    fn binary_file(big_endian: bool, rows: &[[f32; 14]]) -> Vec<u8> {
        let format = if big_endian {
            "binary_big_endian"
        } else {
            "binary_little_endian"
        };
        let mut raw = header(format, rows.len()).into_bytes();
        for &v in rows.iter().flatten() {
            if big_endian {
                raw.extend_from_slice(&v.to_be_bytes());
            } else {
                raw.extend_from_slice(&v.to_le_bytes());
            }
        }
        raw
    }

    fn ascii_file(rows: &[[f32; 14]]) -> Vec<u8> {
        let mut text = header("ascii", rows.len());
        for row in rows {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            text.push_str(&line.join(" "));
            text.push('\n');
        }
        text.into_bytes()
    }

    fn decode(raw: &[u8]) -> Result<Vec<SplatRecord>, SplatError> {
        let (schema, offset) = parse_header(raw)?;
        decode_records(&schema, raw, offset)
    }

    #[test]
    fn binary_records_are_converted() {
        let splats = decode(&binary_file(false, &ROWS)).expect("decode failed");
        assert_eq!(splats.len(), 2);
        for (splat, row) in splats.iter().zip(ROWS) {
            let expected = Vec3::new(row[0], -row[2], -row[1]) * 100.0;
            assert_eq!(splat.position, expected);
            assert!((splat.orientation.length() - 1.0).abs() < 1e-5);
            assert!(splat.opacity > 0.0 && splat.opacity < 1.0);
            assert_eq!(splat.sh_dc, Vec3::new(row[11], row[12], row[13]));
            assert!(splat.sh_rest.is_empty());
            assert_eq!(splat.normal, Vec3::ZERO);
        }
        assert_eq!(splats[0].opacity, 0.5);
        assert_eq!(splats[0].orientation, Quat::IDENTITY);
        assert_eq!(splats[0].scale.y, 50.0);
    }

    #[test]
    fn encodings_decode_identically() {
        let le = decode(&binary_file(false, &ROWS)).unwrap();
        let be = decode(&binary_file(true, &ROWS)).unwrap();
        let ascii = decode(&ascii_file(&ROWS)).unwrap();
        assert_eq!(le, be);
        assert_eq!(le, ascii);
    }

    #[test]
    fn truncated_binary_reports_first_incomplete_record() {
        let mut raw = binary_file(false, &ROWS);
        raw.truncate(raw.len() - 3);
        assert!(matches!(decode(&raw), Err(SplatError::TruncatedBinary(1))));

        let raw = header("binary_little_endian", 2).into_bytes();
        assert!(matches!(decode(&raw), Err(SplatError::TruncatedBinary(0))));
    }

    #[test]
    fn short_ascii_row_is_rejected() {
        let mut raw = ascii_file(&ROWS[..1]);
        raw.extend_from_slice(b"1 2 3\n");
        let text = String::from_utf8(raw).unwrap().replace("vertex 1", "vertex 2");
        assert!(matches!(
            decode(text.as_bytes()),
            Err(SplatError::TruncatedRow(1))
        ));

        let raw = header("ascii", 1).into_bytes();
        assert!(matches!(decode(&raw), Err(SplatError::TruncatedRow(0))));
    }

    #[test]
    fn invalid_ascii_tokens_read_as_zero() {
        let raw = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n\
                    property float y\nproperty float z\nend_header\n\n  abc 1,5 0.5  \n";
        let splats = decode(raw).unwrap();
        assert_eq!(splats[0].position, Vec3::new(0.0, -50.0, 0.0));
    }

    #[test]
    fn ascii_lists_are_consumed() {
        let raw = b"ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\n\
                    property list uchar int ids\nproperty float y\nproperty float z\nend_header\n\
                    1 3 7 8 9 2 3\n4 0 5 6\n";
        let splats = decode(raw).unwrap();
        assert_eq!(splats[0].position, Vec3::new(100.0, -300.0, -200.0));
        assert_eq!(splats[1].position, Vec3::new(400.0, -600.0, -500.0));
    }

    #[test]
    fn unsupported_scalars_are_stepped_over() {
        let mut raw = b"ply\nformat binary_big_endian 1.0\nelement vertex 1\n\
                        property uchar red\nproperty double x\nproperty short flags\n\
                        property float y\nproperty float z\nend_header\n"
            .to_vec();
        raw.push(255);
        raw.extend_from_slice(&2.0f64.to_be_bytes());
        raw.extend_from_slice(&7i16.to_be_bytes());
        raw.extend_from_slice(&3.0f32.to_be_bytes());
        raw.extend_from_slice(&4.0f32.to_be_bytes());
        let splats = decode(&raw).unwrap();
        assert_eq!(splats[0].position, Vec3::new(200.0, -400.0, -300.0));
    }

    #[test]
    fn empty_vertex_element_yields_no_records() {
        let splats = decode(header("binary_little_endian", 0).as_bytes()).unwrap();
        assert!(splats.is_empty());
        let splats = decode(header("ascii", 0).as_bytes()).unwrap();
        assert!(splats.is_empty());
    }

    #[test]
    fn higher_order_coefficients_are_grouped_in_triples() {
        let mut text = String::from(
            "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
             property float z\n",
        );
        for i in 0..6 {
            text.push_str(&format!("property float f_rest_{}\n", i));
        }
        text.push_str("end_header\n0 0 0 1 2 3 4 5 6\n");
        let splats = decode(text.as_bytes()).unwrap();
        assert_eq!(
            splats[0].sh_rest,
            vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]
        );
    }

    #[test]
    fn gaps_in_higher_order_coefficients_are_skipped() {
        let mut text = String::from(
            "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
             property float z\n",
        );
        for i in [0, 1, 2, 4, 5, 6] {
            text.push_str(&format!("property float f_rest_{}\n", i));
        }
        text.push_str("end_header\n0 0 0 1 2 3 4 5 6\n");
        let splats = decode(text.as_bytes()).unwrap();
        assert_eq!(
            splats[0].sh_rest,
            vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]
        );
    }
}
