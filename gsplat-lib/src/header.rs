//! PLY header parsing.
//!
//! The header is a block of ASCII lines starting with `ply` and ending with
//! `end_header`. It declares the payload encoding, the element counts and the
//! ordered property list of each element. Only the `vertex` element is kept;
//! its property order defines the byte layout of a binary record.

use crate::common::MAX_SH_REST;
use crate::error::SplatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl Encoding {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "ascii" => Some(Encoding::Ascii),
            "binary_little_endian" => Some(Encoding::BinaryLittleEndian),
            "binary_big_endian" => Some(Encoding::BinaryBigEndian),
            _ => None,
        }
    }

    pub fn is_binary(self) -> bool {
        !matches!(self, Encoding::Ascii)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "char" | "int8" => Some(ScalarType::Int8),
            "uchar" | "uint8" => Some(ScalarType::UInt8),
            "short" | "int16" => Some(ScalarType::Int16),
            "ushort" | "uint16" => Some(ScalarType::UInt16),
            "int" | "int32" => Some(ScalarType::Int32),
            "uint" | "uint32" => Some(ScalarType::UInt32),
            "float" | "float32" => Some(ScalarType::Float32),
            "double" | "float64" => Some(ScalarType::Float64),
            _ => None,
        }
    }

    pub const fn byte_size(self) -> u32 {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    List {
        count: ScalarType,
        element: ScalarType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDeclaration {
    pub name: String,
    pub kind: FieldKind,
    /// Fixed byte size inside a binary record, 0 for list properties.
    pub byte_size: u32,
}

impl FieldDeclaration {
    pub fn is_list(&self) -> bool {
        matches!(self.kind, FieldKind::List { .. })
    }
}

/// Indices into the field list for each recognized semantic role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRoles {
    pub position: [usize; 3],
    pub normal: Option<[usize; 3]>,
    pub sh_dc: Option<[usize; 3]>,
    pub opacity: Option<usize>,
    pub scale: Option<[usize; 3]>,
    pub rotation: Option<[usize; 4]>,
    /// One (r, g, b) index triple per higher-order coefficient.
    pub sh_rest: Vec<[usize; 3]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub encoding: Encoding,
    pub record_count: usize,
    pub fields: Vec<FieldDeclaration>,
    pub roles: FieldRoles,
}

impl Schema {
    /// Bytes per binary record. List properties do not contribute.
    pub fn record_stride(&self) -> usize {
        self.fields.iter().map(|f| f.byte_size as usize).sum()
    }
}

#[inline]
pub(crate) fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

fn header_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Result<Option<&'b str>, SplatError> {
    let Some(line) = next_line(buffer, offset) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(line)
        .map_err(|e| SplatError::InvalidHeader(format!("UTF-8 error: {}", e)))?;
    Ok(Some(text.trim()))
}

fn scalar_type(token: Option<&str>, line: &str) -> Result<ScalarType, SplatError> {
    let token = token
        .ok_or_else(|| SplatError::InvalidHeader(format!("Incomplete property line: '{}'", line)))?;
    ScalarType::from_token(&token.to_ascii_lowercase())
        .ok_or_else(|| SplatError::InvalidHeader(format!("Unknown property type '{}'", token)))
}

fn parse_property(line: &str) -> Result<FieldDeclaration, SplatError> {
    let mut tokens = line.split_whitespace().skip(1);
    let first = tokens.next();
    let decl = if first.is_some_and(|t| t.eq_ignore_ascii_case("list")) {
        let count = scalar_type(tokens.next(), line)?;
        let element = scalar_type(tokens.next(), line)?;
        FieldDeclaration {
            name: String::new(),
            kind: FieldKind::List { count, element },
            byte_size: 0,
        }
    } else {
        let ty = scalar_type(first, line)?;
        FieldDeclaration {
            name: String::new(),
            kind: FieldKind::Scalar(ty),
            byte_size: ty.byte_size(),
        }
    };
    let name = tokens
        .next()
        .ok_or_else(|| SplatError::InvalidHeader(format!("Property without a name: '{}'", line)))?;
    Ok(FieldDeclaration {
        name: name.to_string(),
        ..decl
    })
}

#[derive(PartialEq)]
enum CurrentElement {
    None,
    Vertex,
    Other,
}

/// Parses the header at the start of `raw`.
///
/// Returns the vertex schema and the byte offset at which the payload starts.
pub fn parse_header(raw: &[u8]) -> Result<(Schema, usize), SplatError> {
    let mut offset = 0;

    let magic = header_line(raw, &mut offset)?.ok_or(SplatError::MissingMagic)?;
    if !magic.eq_ignore_ascii_case("ply") {
        return Err(SplatError::MissingMagic);
    }

    let mut encoding = None;
    let mut record_count = 0;
    let mut seen_vertex = false;
    let mut current = CurrentElement::None;
    let mut fields = Vec::new();

    loop {
        let line = header_line(raw, &mut offset)?.ok_or(SplatError::MissingTerminator)?;
        let keyword = line.split_whitespace().next().unwrap_or("");

        if keyword.eq_ignore_ascii_case("end_header") {
            break;
        }

        match keyword.to_ascii_lowercase().as_str() {
            "format" => {
                let token = line.split_whitespace().nth(1).unwrap_or("");
                encoding = Some(
                    Encoding::from_token(&token.to_ascii_lowercase())
                        .ok_or_else(|| SplatError::UnknownFormat(Some(token.to_string())))?,
                );
            }
            "element" => {
                let mut tokens = line.split_whitespace().skip(1);
                let (Some(name), Some(count)) = (tokens.next(), tokens.next()) else {
                    return Err(SplatError::InvalidHeader(format!(
                        "Incomplete element line: '{}'",
                        line
                    )));
                };
                let count: usize = count.parse().map_err(|e| {
                    SplatError::InvalidHeader(format!("Bad element count '{}': {}", count, e))
                })?;
                if name.eq_ignore_ascii_case("vertex") {
                    seen_vertex = true;
                    record_count = count;
                    current = CurrentElement::Vertex;
                } else {
                    if !seen_vertex && count > 0 {
                        return Err(SplatError::UnsupportedLayout(format!(
                            "element '{}' precedes the vertex element",
                            name
                        )));
                    }
                    current = CurrentElement::Other;
                }
            }
            "property" => match current {
                CurrentElement::Vertex => fields.push(parse_property(line)?),
                CurrentElement::Other => {}
                CurrentElement::None => {
                    return Err(SplatError::InvalidHeader(format!(
                        "Property declared before any element: '{}'",
                        line
                    )));
                }
            },
            _ => {
                // comment, obj_info and anything else carry no layout information
            }
        }
    }

    let encoding = encoding.ok_or(SplatError::UnknownFormat(None))?;
    let roles = resolve_roles(&fields)?;

    if encoding.is_binary() {
        if let Some(list) = fields.iter().find(|f| f.is_list()) {
            return Err(SplatError::UnsupportedListProperty(list.name.clone()));
        }
    }

    Ok((
        Schema {
            encoding,
            record_count,
            fields,
            roles,
        },
        offset,
    ))
}

fn find_field(fields: &[FieldDeclaration], name: &str) -> Option<usize> {
    fields
        .iter()
        .position(|f| !f.is_list() && f.name.eq_ignore_ascii_case(name))
}

fn find_all<const N: usize>(fields: &[FieldDeclaration], names: [&str; N]) -> Option<[usize; N]> {
    let mut out = [0; N];
    for (slot, name) in out.iter_mut().zip(names) {
        *slot = find_field(fields, name)?;
    }
    Some(out)
}

fn resolve_roles(fields: &[FieldDeclaration]) -> Result<FieldRoles, SplatError> {
    let required = |name: &'static str| {
        find_field(fields, name).ok_or(SplatError::MissingRequiredField(name))
    };
    let position = [required("x")?, required("y")?, required("z")?];

    // Every f_rest_N present is collected in index order, gaps skipped, and
    // grouped into consecutive triples. A trailing partial triple is dropped.
    let rest: Vec<usize> = (0..MAX_SH_REST)
        .filter_map(|i| find_field(fields, &format!("f_rest_{}", i)))
        .collect();
    let sh_rest = rest
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();

    Ok(FieldRoles {
        position,
        normal: find_all(fields, ["nx", "ny", "nz"]),
        sh_dc: find_all(fields, ["f_dc_0", "f_dc_1", "f_dc_2"]),
        opacity: find_field(fields, "opacity"),
        scale: find_all(fields, ["scale_0", "scale_1", "scale_2"]),
        rotation: find_all(fields, ["rot_0", "rot_1", "rot_2", "rot_3"]),
        sh_rest,
    })
}
