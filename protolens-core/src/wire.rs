//! # Wire Format
//!
//! Low-level reading of raw protobuf bytes, without any schema.
//!
//! `prost` discards unknown fields when decoding into generated types, which means custom
//! options attached to a `FieldOptions` message are lost by the time a `prost_types`
//! descriptor is built. This module walks the original bytes instead, so that:
//!
//! * reflection responses can be keyed by file name (and their imports read) without a full decode,
//! * the serialized `FieldOptions` of every field can be handed to the
//!   [`constraints`](crate::constraints) extractor untouched.
use bytes::Buf;
use prost::encoding::{WireType, decode_key, decode_varint};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Malformed protobuf data: '{0}'")]
    Decode(#[from] prost::DecodeError),

    #[error("Field {field} is truncated: needs {needed} bytes but only {remaining} remain")]
    Truncated {
        field: u32,
        needed: usize,
        remaining: usize,
    },

    #[error("Field {0} uses the group encoding, which is not supported")]
    UnsupportedGroup(u32),

    #[error("Descriptor is missing its '{0}' field")]
    MissingField(&'static str),
}

/// A single decoded field payload, borrowing from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireValue<'a> {
    Varint(u64),
    Fixed64(u64),
    LengthDelimited(&'a [u8]),
    Fixed32(u32),
}

/// Iterator over the `(field number, value)` pairs of an encoded message.
///
/// Iteration stops after the first error.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn read_field(&mut self) -> Result<(u32, WireValue<'a>), WireError> {
        let (number, wire_type) = decode_key(&mut self.buf)?;

        let value = match wire_type {
            WireType::Varint => WireValue::Varint(decode_varint(&mut self.buf)?),
            WireType::SixtyFourBit => {
                self.ensure(number, 8)?;
                WireValue::Fixed64(self.buf.get_u64_le())
            }
            WireType::ThirtyTwoBit => {
                self.ensure(number, 4)?;
                WireValue::Fixed32(self.buf.get_u32_le())
            }
            WireType::LengthDelimited => {
                let len = decode_varint(&mut self.buf)? as usize;
                self.ensure(number, len)?;
                let buf: &'a [u8] = self.buf;
                let (payload, rest) = buf.split_at(len);
                self.buf = rest;
                WireValue::LengthDelimited(payload)
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(WireError::UnsupportedGroup(number));
            }
        };

        Ok((number, value))
    }

    fn ensure(&self, field: u32, needed: usize) -> Result<(), WireError> {
        if self.buf.len() < needed {
            return Err(WireError::Truncated {
                field,
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }
}

impl<'a> Iterator for WireReader<'a> {
    type Item = Result<(u32, WireValue<'a>), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        let item = self.read_field();
        if item.is_err() {
            self.buf = &[];
        }
        Some(item)
    }
}

/// Returns every length-delimited payload stored under `number`, in wire order.
pub fn length_delimited(bytes: &[u8], number: u32) -> Result<Vec<&[u8]>, WireError> {
    let mut out = Vec::new();
    for field in WireReader::new(bytes) {
        if let (n, WireValue::LengthDelimited(payload)) = field?
            && n == number
        {
            out.push(payload);
        }
    }
    Ok(out)
}

/// Returns the last string stored under `number` (protobuf "last one wins" semantics).
pub fn last_string(bytes: &[u8], number: u32) -> Result<Option<String>, WireError> {
    Ok(length_delimited(bytes, number)?
        .last()
        .map(|raw| String::from_utf8_lossy(raw).into_owned()))
}

/// Returns every string stored under `number`, in wire order.
pub fn repeated_strings(bytes: &[u8], number: u32) -> Result<Vec<String>, WireError> {
    Ok(length_delimited(bytes, number)?
        .into_iter()
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .collect())
}

/// Returns every varint stored under `number`, accepting both packed and unpacked encodings.
pub fn varints(bytes: &[u8], number: u32) -> Result<Vec<u64>, WireError> {
    let mut out = Vec::new();
    for field in WireReader::new(bytes) {
        match field? {
            (n, WireValue::Varint(v)) if n == number => out.push(v),
            (n, WireValue::LengthDelimited(mut packed)) if n == number => {
                while packed.has_remaining() {
                    out.push(decode_varint(&mut packed)?);
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

// FileDescriptorProto
const FILE_NAME: u32 = 1;
const FILE_PACKAGE: u32 = 2;
const FILE_DEPENDENCY: u32 = 3;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_OPTIONS: u32 = 8;

// DescriptorProto
const MESSAGE_NAME: u32 = 1;
const MESSAGE_FIELD: u32 = 2;
const MESSAGE_NESTED_TYPE: u32 = 3;

// FieldDescriptorProto
const FIELD_NAME: u32 = 1;
const FIELD_OPTIONS: u32 = 8;

/// The identity of an encoded `FileDescriptorProto`, read without a full decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub package: String,
    pub dependencies: Vec<String>,
    /// The serialized `FileOptions`, empty when the file declares none.
    pub options: Vec<u8>,
}

impl FileHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let mut name = None;
        let mut package = String::new();
        let mut dependencies = Vec::new();
        let mut options = Vec::new();

        for field in WireReader::new(bytes) {
            match field? {
                (FILE_NAME, WireValue::LengthDelimited(raw)) => {
                    name = Some(String::from_utf8_lossy(raw).into_owned())
                }
                (FILE_PACKAGE, WireValue::LengthDelimited(raw)) => {
                    package = String::from_utf8_lossy(raw).into_owned()
                }
                (FILE_DEPENDENCY, WireValue::LengthDelimited(raw)) => {
                    dependencies.push(String::from_utf8_lossy(raw).into_owned())
                }
                (FILE_OPTIONS, WireValue::LengthDelimited(raw)) => options.extend_from_slice(raw),
                _ => {}
            }
        }

        Ok(Self {
            name: name.ok_or(WireError::MissingField("name"))?,
            package,
            dependencies,
            options,
        })
    }
}

/// The serialized `FieldOptions` of one field, as found in the original descriptor bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFieldOptions<'a> {
    /// Fully-qualified name of the declaring message.
    pub message: String,
    pub field: String,
    pub options: &'a [u8],
}

/// Walks every message (nested ones included) of an encoded `FileDescriptorProto` and
/// collects the raw options of each field that declares some.
pub fn field_options_index(file: &[u8]) -> Result<Vec<RawFieldOptions<'_>>, WireError> {
    let header = FileHeader::parse(file)?;
    let mut out = Vec::new();

    for message in length_delimited(file, FILE_MESSAGE_TYPE)? {
        walk_message(message, &header.package, &mut out)?;
    }

    Ok(out)
}

fn walk_message<'a>(
    message: &'a [u8],
    scope: &str,
    out: &mut Vec<RawFieldOptions<'a>>,
) -> Result<(), WireError> {
    let name = last_string(message, MESSAGE_NAME)?.ok_or(WireError::MissingField("name"))?;
    let full_name = if scope.is_empty() {
        name
    } else {
        format!("{scope}.{name}")
    };

    for field in length_delimited(message, MESSAGE_FIELD)? {
        let Some(options) = length_delimited(field, FIELD_OPTIONS)?.pop() else {
            continue;
        };
        let field_name = last_string(field, FIELD_NAME)?.ok_or(WireError::MissingField("name"))?;
        out.push(RawFieldOptions {
            message: full_name.clone(),
            field: field_name,
            options,
        });
    }

    for nested in length_delimited(message, MESSAGE_NESTED_TYPE)? {
        walk_message(nested, &full_name, out)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use prost::Message;
    use prost::encoding::{encode_key, encode_varint};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn append_bytes(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
        encode_key(number, WireType::LengthDelimited, buf);
        encode_varint(payload.len() as u64, buf);
        buf.extend_from_slice(payload);
    }

    fn field_with_options(name: &str, number: i32, options: &[u8]) -> Vec<u8> {
        let mut buf = FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut buf, FIELD_OPTIONS, options);
        buf
    }

    #[test]
    fn reads_scalar_and_length_delimited_fields() {
        let mut buf = Vec::new();
        encode_key(1, WireType::Varint, &mut buf);
        encode_varint(300, &mut buf);
        append_bytes(&mut buf, 2, b"hi");
        encode_key(3, WireType::ThirtyTwoBit, &mut buf);
        buf.extend_from_slice(&7u32.to_le_bytes());
        encode_key(4, WireType::SixtyFourBit, &mut buf);
        buf.extend_from_slice(&9u64.to_le_bytes());

        let fields: Vec<_> = WireReader::new(&buf).collect::<Result<_, _>>().unwrap();

        assert_eq!(
            fields,
            vec![
                (1, WireValue::Varint(300)),
                (2, WireValue::LengthDelimited(b"hi")),
                (3, WireValue::Fixed32(7)),
                (4, WireValue::Fixed64(9)),
            ]
        );
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut buf = Vec::new();
        encode_key(2, WireType::LengthDelimited, &mut buf);
        encode_varint(10, &mut buf);
        buf.extend_from_slice(b"abc");

        let result: Result<Vec<_>, _> = WireReader::new(&buf).collect();

        assert!(matches!(
            result,
            Err(WireError::Truncated {
                field: 2,
                needed: 10,
                remaining: 3
            })
        ));
    }

    #[test]
    fn groups_are_rejected() {
        let mut buf = Vec::new();
        encode_key(5, WireType::StartGroup, &mut buf);

        let result: Result<Vec<_>, _> = WireReader::new(&buf).collect();
        assert!(matches!(result, Err(WireError::UnsupportedGroup(5))));
    }

    #[test]
    fn varints_accept_packed_and_unpacked() {
        let mut buf = Vec::new();
        encode_key(7, WireType::Varint, &mut buf);
        encode_varint(1, &mut buf);

        let mut packed = Vec::new();
        encode_varint(2, &mut packed);
        encode_varint(3, &mut packed);
        append_bytes(&mut buf, 7, &packed);

        assert_eq!(varints(&buf, 7).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn file_header_reads_name_package_and_dependencies() {
        let file = FileDescriptorProto {
            name: Some("a/b.proto".to_string()),
            package: Some("a.b".to_string()),
            dependency: vec!["c.proto".to_string(), "d.proto".to_string()],
            ..Default::default()
        };

        let header = FileHeader::parse(&file.encode_to_vec()).unwrap();

        assert_eq!(header.name, "a/b.proto");
        assert_eq!(header.package, "a.b");
        assert_eq!(header.dependencies, vec!["c.proto", "d.proto"]);
    }

    #[test]
    fn file_header_keeps_file_options_with_unknown_extensions() {
        let mut options = Vec::new();
        append_bytes(&mut options, 50_000, b"\x12\x031.0");
        let mut file = FileDescriptorProto {
            name: Some("anchor.proto".to_string()),
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut file, FILE_OPTIONS, &options);

        let header = FileHeader::parse(&file).unwrap();

        assert_eq!(header.options, options);
        assert_eq!(length_delimited(&header.options, 50_000).unwrap(), vec![b"\x12\x031.0"]);
    }

    #[test]
    fn file_header_requires_a_name() {
        let file = FileDescriptorProto {
            package: Some("a.b".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            FileHeader::parse(&file.encode_to_vec()),
            Err(WireError::MissingField("name"))
        ));
    }

    #[test]
    fn field_options_index_walks_nested_messages() {
        let mut inner = DescriptorProto {
            name: Some("Inner".to_string()),
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut inner, MESSAGE_FIELD, &field_with_options("note", 1, b"\x08\x01"));

        let mut outer = DescriptorProto {
            name: Some("Outer".to_string()),
            field: vec![FieldDescriptorProto {
                name: Some("plain".to_string()),
                number: Some(1),
                ..Default::default()
            }],
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut outer, MESSAGE_FIELD, &field_with_options("id", 2, b"\x10\x02"));
        append_bytes(&mut outer, MESSAGE_NESTED_TYPE, &inner);

        let mut file = FileDescriptorProto {
            name: Some("pkg/outer.proto".to_string()),
            package: Some("pkg".to_string()),
            ..Default::default()
        }
        .encode_to_vec();
        append_bytes(&mut file, FILE_MESSAGE_TYPE, &outer);

        let index = field_options_index(&file).unwrap();

        assert_eq!(
            index,
            vec![
                RawFieldOptions {
                    message: "pkg.Outer".to_string(),
                    field: "id".to_string(),
                    options: b"\x10\x02",
                },
                RawFieldOptions {
                    message: "pkg.Outer.Inner".to_string(),
                    field: "note".to_string(),
                    options: b"\x08\x01",
                },
            ]
        );
    }
}
