// ============================================
// File: crates/gatesplice-core/src/protocol/tables.rs
// ============================================
//! # Table-Driven Codec
//!
//! ## Creation Reason
//! Provides the in-tree implementation of the [`ProtocolCodec`] contract:
//! a codec driven entirely by a JSON protocol description, so the proxy
//! can speak any game build whose tables are available without code
//! changes.
//!
//! ## Table Format
//! ```json
//! {
//!   "maps": {
//!     "361000": { "S_LOGIN": 10001, "C_CHECK_VERSION": 19900 }
//!   },
//!   "messages": {
//!     "S_LOGIN": {
//!       "1": [
//!         { "name": "id",   "type": "u32" },
//!         { "name": "name", "type": "string" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! ## Encoding Rules
//! - All integers little-endian
//! - `string`: u16 byte length followed by UTF-8 bytes
//! - `bytes`: u16 length followed by raw bytes (events carry them hex-encoded)
//! - `array`: u16 element count followed by the elements, each encoded as
//!   the concatenation of its `fields`
//! - Trailing payload bytes are tolerated on parse: newer game builds
//!   append fields, and in-band version detection must still read the old
//!   prefix
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keep parse and write exactly inverse for every field kind; the
//!   dispatcher re-serializes events that hooks did not touch
//!
//! ## Last Modified
//! v0.1.0 - Initial table codec

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::trace;

use gatesplice_common::error::CommonError;

use crate::error::{CoreError, Result};
use crate::framing::FRAME_HEADER_SIZE;
use crate::protocol::codec::{DefVersion, Event, ProtocolCodec};

// ============================================
// Table Description (serde side)
// ============================================

/// On-disk protocol description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolTable {
    /// Protocol version (as a decimal string key) → name → opcode.
    pub maps: BTreeMap<String, BTreeMap<String, u16>>,
    /// Message name → definition version (decimal string key) → fields.
    pub messages: BTreeMap<String, BTreeMap<String, Vec<FieldDef>>>,
}

/// One field of a message schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, the key hooks see on the event.
    pub name: String,
    /// Encoded type.
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Element fields, for `array` kinds only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,
}

/// Encodable field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// One byte, zero = false.
    Bool,
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit LE.
    U16,
    /// Unsigned 32-bit LE.
    U32,
    /// Unsigned 64-bit LE.
    U64,
    /// Signed 32-bit LE.
    I32,
    /// IEEE-754 single LE.
    F32,
    /// u16 byte length + UTF-8.
    String,
    /// u16 length + raw bytes, hex-encoded on the event.
    Bytes,
    /// u16 count + elements described by `fields`.
    Array,
}

// ============================================
// TableCodec
// ============================================

struct VersionMap {
    name_to_code: HashMap<String, u16>,
    code_to_name: HashMap<u16, String>,
}

/// A [`ProtocolCodec`] driven by loaded tables.
pub struct TableCodec {
    maps: BTreeMap<u32, VersionMap>,
    messages: BTreeMap<String, BTreeMap<u32, Vec<FieldDef>>>,
}

impl TableCodec {
    /// Builds a codec from an in-memory table description.
    ///
    /// # Errors
    /// Rejects non-numeric version keys and array fields without element
    /// fields.
    pub fn from_table(table: ProtocolTable) -> Result<Self> {
        let mut maps = BTreeMap::new();
        for (version_key, entries) in table.maps {
            let version: u32 = version_key.parse().map_err(|_| {
                CommonError::invalid_input("maps", format!("non-numeric version '{version_key}'"))
            })?;
            let mut name_to_code = HashMap::with_capacity(entries.len());
            let mut code_to_name = HashMap::with_capacity(entries.len());
            for (name, code) in entries {
                code_to_name.insert(code, name.clone());
                name_to_code.insert(name, code);
            }
            maps.insert(
                version,
                VersionMap {
                    name_to_code,
                    code_to_name,
                },
            );
        }

        let mut messages = BTreeMap::new();
        for (name, defs) in table.messages {
            let mut parsed_defs = BTreeMap::new();
            for (def_key, fields) in defs {
                let def: u32 = def_key.parse().map_err(|_| {
                    CommonError::invalid_input(
                        "messages",
                        format!("non-numeric definition '{def_key}' for '{name}'"),
                    )
                })?;
                Self::validate_fields(&name, &fields)?;
                parsed_defs.insert(def, fields);
            }
            messages.insert(name, parsed_defs);
        }

        Ok(Self { maps, messages })
    }

    /// Builds a codec from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: ProtocolTable = serde_json::from_str(json).map_err(|e| {
            CommonError::invalid_input("protocol table", e.to_string())
        })?;
        Self::from_table(table)
    }

    /// Loads a codec from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CommonError::io(format!("read {}", path.display()), e))?;
        Self::from_json_str(&content)
    }

    fn validate_fields(name: &str, fields: &[FieldDef]) -> Result<()> {
        for field in fields {
            match field.kind {
                FieldKind::Array => {
                    if field.fields.is_empty() {
                        return Err(CommonError::invalid_input(
                            "messages",
                            format!("array field '{}' of '{name}' has no element fields", field.name),
                        )
                        .into());
                    }
                    Self::validate_fields(name, &field.fields)?;
                }
                _ => {
                    if !field.fields.is_empty() {
                        return Err(CommonError::invalid_input(
                            "messages",
                            format!(
                                "scalar field '{}' of '{name}' must not have element fields",
                                field.name
                            ),
                        )
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_definition<'a>(
        &'a self,
        name: &str,
        definition: DefVersion,
    ) -> Result<(u32, &'a [FieldDef])> {
        let defs = self
            .messages
            .get(name)
            .ok_or_else(|| CoreError::UnknownMessage { name: name.into() })?;

        match definition {
            DefVersion::Raw => Err(CoreError::parse(
                name,
                definition,
                "raw hooks are never parsed",
            )),
            DefVersion::Latest => defs
                .iter()
                .next_back()
                .map(|(v, fields)| (*v, fields.as_slice()))
                .ok_or_else(|| CoreError::parse(name, definition, "no definitions")),
            DefVersion::Exact(v) => defs
                .get(&v)
                .map(|fields| (v, fields.as_slice()))
                .ok_or_else(|| {
                    CoreError::parse(name, definition, format!("definition {v} not in tables"))
                }),
        }
    }

    fn display_name(&self, version: u32, code: u16) -> String {
        self.code_to_name(version, code)
            .unwrap_or_else(|| format!("opcode 0x{code:04x}"))
    }
}

impl ProtocolCodec for TableCodec {
    fn protocol_versions(&self) -> Vec<u32> {
        self.maps.keys().copied().collect()
    }

    fn name_to_code(&self, version: u32, name: &str) -> Option<u16> {
        self.maps.get(&version)?.name_to_code.get(name).copied()
    }

    fn code_to_name(&self, version: u32, code: u16) -> Option<String> {
        self.maps.get(&version)?.code_to_name.get(&code).cloned()
    }

    fn latest_definition(&self, name: &str) -> Option<u32> {
        self.messages.get(name)?.keys().next_back().copied()
    }

    fn earliest_definition(&self, name: &str) -> Option<u32> {
        self.messages.get(name)?.keys().next().copied()
    }

    fn parse(
        &self,
        version: u32,
        code: u16,
        definition: DefVersion,
        data: &[u8],
    ) -> Result<Event> {
        if !self.maps.contains_key(&version) {
            return Err(CoreError::UnknownProtocolVersion { version });
        }
        let name = self
            .code_to_name(version, code)
            .ok_or_else(|| {
                CoreError::parse(
                    format!("opcode 0x{code:04x}"),
                    definition,
                    format!("no name mapped under protocol version {version}"),
                )
            })?;
        let (_, fields) = self.resolve_definition(&name, definition)?;

        if data.len() < FRAME_HEADER_SIZE {
            return Err(CoreError::parse(name.as_str(), definition, "frame below header size"));
        }
        let framed_len = usize::from(u16::from_le_bytes([data[0], data[1]]));
        if framed_len != data.len() {
            return Err(CoreError::parse(
                &name,
                definition,
                format!("length field {framed_len} disagrees with frame size {}", data.len()),
            ));
        }

        let mut reader = Reader {
            buf: &data[FRAME_HEADER_SIZE..],
            pos: 0,
        };
        let object = read_fields(&mut reader, fields)
            .map_err(|reason| CoreError::parse(name.as_str(), definition, reason))?;

        if reader.remaining() > 0 {
            trace!(
                message = %name,
                trailing = reader.remaining(),
                "trailing payload bytes ignored"
            );
        }

        Ok(Value::Object(object))
    }

    fn write(
        &self,
        version: u32,
        code: u16,
        definition: DefVersion,
        event: &Event,
    ) -> Result<Vec<u8>> {
        if !self.maps.contains_key(&version) {
            return Err(CoreError::UnknownProtocolVersion { version });
        }
        let name = self.display_name(version, code);
        let (_, fields) = self
            .resolve_definition(&name, definition)
            .map_err(|e| match e {
                CoreError::Parse {
                    name, definition, reason,
                } => CoreError::Write { name, definition, reason },
                other => other,
            })?;

        let object = event
            .as_object()
            .ok_or_else(|| CoreError::write(name.as_str(), definition, "event is not an object"))?;

        let mut payload = Vec::new();
        write_fields(&mut payload, fields, object)
            .map_err(|reason| CoreError::write(name.as_str(), definition, reason))?;

        let total = payload.len() + FRAME_HEADER_SIZE;
        let length = u16::try_from(total).map_err(|_| {
            CoreError::write(name.as_str(), definition, format!("frame of {total} bytes overflows u16"))
        })?;

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&code.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

impl std::fmt::Debug for TableCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCodec")
            .field("protocol_versions", &self.maps.keys().collect::<Vec<_>>())
            .field("messages", &self.messages.len())
            .finish()
    }
}

// ============================================
// Field Encoding
// ============================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> std::result::Result<&'a [u8], String> {
        if self.remaining() < n {
            return Err(format!(
                "truncated while reading {what}: need {n} bytes, have {}",
                self.remaining()
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self, what: &str) -> std::result::Result<u16, String> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

fn read_fields(
    reader: &mut Reader<'_>,
    fields: &[FieldDef],
) -> std::result::Result<Map<String, Value>, String> {
    let mut object = Map::new();
    for field in fields {
        let value = read_field(reader, field)?;
        object.insert(field.name.clone(), value);
    }
    Ok(object)
}

fn read_field(reader: &mut Reader<'_>, field: &FieldDef) -> std::result::Result<Value, String> {
    let what = field.name.as_str();
    let value = match field.kind {
        FieldKind::Bool => json!(reader.take(1, what)?[0] != 0),
        FieldKind::U8 => json!(reader.take(1, what)?[0]),
        FieldKind::U16 => json!(reader.read_u16(what)?),
        FieldKind::U32 => {
            let b = reader.take(4, what)?;
            json!(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        FieldKind::U64 => {
            let b = reader.take(8, what)?;
            json!(u64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
            ]))
        }
        FieldKind::I32 => {
            let b = reader.take(4, what)?;
            json!(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        FieldKind::F32 => {
            let b = reader.take(4, what)?;
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            serde_json::Number::from_f64(f64::from(v))
                .map(Value::Number)
                .ok_or_else(|| format!("non-finite float in field '{what}'"))?
        }
        FieldKind::String => {
            let len = usize::from(reader.read_u16(what)?);
            let bytes = reader.take(len, what)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| format!("invalid UTF-8 in field '{what}'"))?;
            json!(s)
        }
        FieldKind::Bytes => {
            let len = usize::from(reader.read_u16(what)?);
            json!(hex::encode(reader.take(len, what)?))
        }
        FieldKind::Array => {
            let count = usize::from(reader.read_u16(what)?);
            let mut elements = Vec::with_capacity(count);
            for _ in 0..count {
                elements.push(Value::Object(read_fields(reader, &field.fields)?));
            }
            Value::Array(elements)
        }
    };
    Ok(value)
}

fn write_fields(
    out: &mut Vec<u8>,
    fields: &[FieldDef],
    object: &Map<String, Value>,
) -> std::result::Result<(), String> {
    for field in fields {
        let value = object
            .get(&field.name)
            .ok_or_else(|| format!("missing field '{}'", field.name))?;
        write_field(out, field, value)?;
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn write_field(
    out: &mut Vec<u8>,
    field: &FieldDef,
    value: &Value,
) -> std::result::Result<(), String> {
    let what = field.name.as_str();
    match field.kind {
        FieldKind::Bool => {
            let v = value
                .as_bool()
                .ok_or_else(|| format!("field '{what}' is not a bool"))?;
            out.push(u8::from(v));
        }
        FieldKind::U8 => out.push(unsigned(value, what, u64::from(u8::MAX))? as u8),
        FieldKind::U16 => {
            let v = unsigned(value, what, u64::from(u16::MAX))? as u16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldKind::U32 => {
            let v = unsigned(value, what, u64::from(u32::MAX))? as u32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldKind::U64 => {
            let v = unsigned(value, what, u64::MAX)?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldKind::I32 => {
            let v = value
                .as_i64()
                .ok_or_else(|| format!("field '{what}' is not an integer"))?;
            let v = i32::try_from(v).map_err(|_| format!("field '{what}' overflows i32"))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        FieldKind::F32 => {
            let v = value
                .as_f64()
                .ok_or_else(|| format!("field '{what}' is not a number"))?;
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }
        FieldKind::String => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("field '{what}' is not a string"))?;
            let len = u16::try_from(s.len())
                .map_err(|_| format!("field '{what}' exceeds u16 length"))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        FieldKind::Bytes => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("field '{what}' is not a hex string"))?;
            let raw = hex::decode(s).map_err(|_| format!("field '{what}' is not valid hex"))?;
            let len = u16::try_from(raw.len())
                .map_err(|_| format!("field '{what}' exceeds u16 length"))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&raw);
        }
        FieldKind::Array => {
            let elements = value
                .as_array()
                .ok_or_else(|| format!("field '{what}' is not an array"))?;
            let count = u16::try_from(elements.len())
                .map_err(|_| format!("field '{what}' exceeds u16 element count"))?;
            out.extend_from_slice(&count.to_le_bytes());
            for element in elements {
                let object = element
                    .as_object()
                    .ok_or_else(|| format!("element of '{what}' is not an object"))?;
                write_fields(out, &field.fields, object)?;
            }
        }
    }
    Ok(())
}

fn unsigned(value: &Value, what: &str, max: u64) -> std::result::Result<u64, String> {
    let v = value
        .as_u64()
        .ok_or_else(|| format!("field '{what}' is not an unsigned integer"))?;
    if v > max {
        return Err(format!("field '{what}' value {v} exceeds maximum {max}"));
    }
    Ok(v)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{
        "maps": {
            "100": { "S_LOGIN": 10001, "C_CHECK_VERSION": 19900 },
            "200": { "S_LOGIN": 10099, "C_CHECK_VERSION": 19900 }
        },
        "messages": {
            "S_LOGIN": {
                "1": [
                    { "name": "id",   "type": "u32" },
                    { "name": "name", "type": "string" }
                ],
                "2": [
                    { "name": "id",    "type": "u32" },
                    { "name": "name",  "type": "string" },
                    { "name": "level", "type": "u16" }
                ]
            },
            "C_CHECK_VERSION": {
                "1": [
                    { "name": "version", "type": "array", "fields": [
                        { "name": "index", "type": "u32" },
                        { "name": "value", "type": "u32" }
                    ]}
                ]
            }
        }
    }"#;

    fn codec() -> TableCodec {
        TableCodec::from_json_str(TABLE).unwrap()
    }

    #[test]
    fn test_maps() {
        let codec = codec();
        assert_eq!(codec.protocol_versions(), vec![100, 200]);
        assert_eq!(codec.earliest_protocol_version(), Some(100));
        assert_eq!(codec.name_to_code(100, "S_LOGIN"), Some(10001));
        assert_eq!(codec.name_to_code(200, "S_LOGIN"), Some(10099));
        assert_eq!(codec.code_to_name(100, 10001).as_deref(), Some("S_LOGIN"));
        assert_eq!(codec.name_to_code(100, "S_UNKNOWN_THING"), None);
        assert_eq!(codec.latest_definition("S_LOGIN"), Some(2));
        assert_eq!(codec.earliest_definition("S_LOGIN"), Some(1));
    }

    #[test]
    fn test_write_parse_roundtrip() {
        let codec = codec();
        let event = json!({ "id": 77, "name": "arborea" });

        let frame = codec
            .write(100, 10001, DefVersion::Exact(1), &event)
            .unwrap();
        assert_eq!(frame[2..4], 10001u16.to_le_bytes());
        assert_eq!(
            usize::from(u16::from_le_bytes([frame[0], frame[1]])),
            frame.len()
        );

        let parsed = codec
            .parse(100, 10001, DefVersion::Exact(1), &frame)
            .unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_latest_resolves_newest_definition() {
        let codec = codec();
        let event = json!({ "id": 1, "name": "x", "level": 65 });

        let frame = codec.write(100, 10001, DefVersion::Latest, &event).unwrap();
        let parsed = codec.parse(100, 10001, DefVersion::Latest, &frame).unwrap();
        assert_eq!(parsed["level"], json!(65));
    }

    #[test]
    fn test_old_definition_reads_prefix_of_new_frame() {
        // A v1 hook parsing a v2 frame sees the v1 fields; the trailing
        // bytes are tolerated.
        let codec = codec();
        let event = json!({ "id": 9, "name": "n", "level": 3 });
        let frame = codec.write(100, 10001, DefVersion::Exact(2), &event).unwrap();

        let parsed = codec.parse(100, 10001, DefVersion::Exact(1), &frame).unwrap();
        assert_eq!(parsed, json!({ "id": 9, "name": "n" }));
    }

    #[test]
    fn test_check_version_array() {
        let codec = codec();
        let event = json!({ "version": [
            { "index": 0, "value": 361000 },
            { "index": 1, "value": 362000 }
        ]});

        let frame = codec
            .write(100, 19900, DefVersion::Exact(1), &event)
            .unwrap();
        let parsed = codec.parse(100, 19900, DefVersion::Exact(1), &frame).unwrap();
        assert_eq!(parsed["version"][0]["value"], json!(361000));
        assert_eq!(parsed["version"][1]["index"], json!(1));
    }

    #[test]
    fn test_unknown_protocol_version() {
        let codec = codec();
        let err = codec
            .parse(999, 10001, DefVersion::Latest, &[4, 0, 0, 0])
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownProtocolVersion { version: 999 }));
    }

    #[test]
    fn test_unknown_opcode() {
        let codec = codec();
        let err = codec
            .parse(100, 0xBEEF, DefVersion::Latest, &[4, 0, 0xEF, 0xBE])
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn test_truncated_payload() {
        let codec = codec();
        // Header says 6 bytes total but the u32 field needs 4 payload bytes.
        let frame = [6u8, 0, 0x11, 0x27, 0x01, 0x02];
        let err = codec.parse(100, 10001, DefVersion::Exact(1), &frame).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_length_field_mismatch() {
        let codec = codec();
        let event = json!({ "id": 1, "name": "" });
        let mut frame = codec.write(100, 10001, DefVersion::Exact(1), &event).unwrap();
        frame[0] = frame[0].wrapping_add(1);
        assert!(codec.parse(100, 10001, DefVersion::Exact(1), &frame).is_err());
    }

    #[test]
    fn test_write_missing_field() {
        let codec = codec();
        let err = codec
            .write(100, 10001, DefVersion::Exact(1), &json!({ "id": 1 }))
            .unwrap_err();
        assert!(matches!(err, CoreError::Write { .. }));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_write_range_check() {
        let codec = codec();
        let err = codec
            .write(
                100,
                10001,
                DefVersion::Exact(2),
                &json!({ "id": 1, "name": "x", "level": 70000 }),
            )
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_raw_definition_rejected() {
        let codec = codec();
        let err = codec
            .parse(100, 10001, DefVersion::Raw, &[4, 0, 0x11, 0x27])
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn test_invalid_table_rejected() {
        let bad = r#"{ "maps": { "abc": {} }, "messages": {} }"#;
        assert!(TableCodec::from_json_str(bad).is_err());

        let bad_array = r#"{
            "maps": {},
            "messages": { "X": { "1": [ { "name": "a", "type": "array" } ] } }
        }"#;
        assert!(TableCodec::from_json_str(bad_array).is_err());
    }
}
