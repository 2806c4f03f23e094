//! Wire field model
//!
//! A message is an ordered list of [`FieldSpec`]s. Each spec knows its
//! width, which sibling field it carries the length of, an optional custom
//! codec for encodings that depend on other fields, and the values it
//! accepts when decoding.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::error::ProtocolError;

/// Field identifier
pub type FieldKey = &'static str;

/// A decoded or to-be-encoded field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    List(Vec<u8>),
    Text(String),
}

impl Value {
    /// Numeric view of `U8`/`U16` values
    pub fn as_number(&self) -> Option<u16> {
        match self {
            Value::U8(v) => Some(u16::from(*v)),
            Value::U16(v) => Some(*v),
            _ => None,
        }
    }

    fn byte_len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Text(text) => Some(text.len()),
            _ => None,
        }
    }
}

/// Primitive encoding of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// One byte
    U8,
    /// Two bytes, big-endian
    U16,
    /// Raw bytes, count taken from a `length_of` sibling
    List,
    /// UTF-8 text, byte length taken from a `length_of` sibling
    Text,
}

impl Width {
    fn describe(self) -> &'static str {
        match self {
            Width::U8 => "a one-byte number",
            Width::U16 => "a two-byte number",
            Width::List => "a byte sequence",
            Width::Text => "text",
        }
    }
}

/// Values accepted when decoding
#[derive(Debug, Clone, Copy)]
pub enum Allowed {
    Any,
    Values(&'static [u16]),
}

impl Allowed {
    fn permits(&self, value: u16) -> bool {
        match self {
            Allowed::Any => true,
            Allowed::Values(set) => set.contains(&value),
        }
    }
}

pub type ReadFn = fn(&Fields, &mut &[u8]) -> Result<Value, ProtocolError>;
pub type WriteFn = fn(&Fields, &Value, &mut BytesMut) -> Result<(), ProtocolError>;
pub type ValidateFn = fn(&Fields, &Value) -> Result<(), ProtocolError>;

/// Custom codec for a field whose layout depends on earlier fields.
///
/// `read` sees every field decoded so far. A reader must come with a
/// `validate` routine; decoding refuses a custom field without one.
#[derive(Debug, Clone, Copy)]
pub struct Custom {
    pub read: ReadFn,
    pub write: WriteFn,
    pub validate: Option<ValidateFn>,
}

/// Descriptor of a single wire field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub width: Width,
    /// This field's number is the length of the named field
    pub length_of: Option<FieldKey>,
    pub custom: Option<Custom>,
    pub allowed: Allowed,
}

impl FieldSpec {
    fn new(key: FieldKey, width: Width) -> Self {
        Self {
            key,
            width,
            length_of: None,
            custom: None,
            allowed: Allowed::Any,
        }
    }

    pub fn u8(key: FieldKey) -> Self {
        Self::new(key, Width::U8)
    }

    pub fn u16(key: FieldKey) -> Self {
        Self::new(key, Width::U16)
    }

    pub fn list(key: FieldKey) -> Self {
        Self::new(key, Width::List)
    }

    pub fn text(key: FieldKey) -> Self {
        Self::new(key, Width::Text)
    }

    pub fn length_of(mut self, target: FieldKey) -> Self {
        self.length_of = Some(target);
        self
    }

    pub fn allow(mut self, values: &'static [u16]) -> Self {
        self.allowed = Allowed::Values(values);
        self
    }

    pub fn custom(mut self, custom: Custom) -> Self {
        self.custom = Some(custom);
        self
    }
}

/// Field values in message order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(FieldKey, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: FieldKey, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: FieldKey, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: FieldKey) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &Value)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, key: FieldKey) -> Result<&Value, ProtocolError> {
        self.get(key).ok_or(ProtocolError::MissingField(key))
    }

    pub fn u8(&self, key: FieldKey) -> Result<u8, ProtocolError> {
        match self.require(key)? {
            Value::U8(v) => Ok(*v),
            _ => Err(mismatch(key, Width::U8)),
        }
    }

    pub fn u16(&self, key: FieldKey) -> Result<u16, ProtocolError> {
        match self.require(key)? {
            Value::U16(v) => Ok(*v),
            _ => Err(mismatch(key, Width::U16)),
        }
    }

    pub fn list(&self, key: FieldKey) -> Result<&[u8], ProtocolError> {
        match self.require(key)? {
            Value::List(items) => Ok(items),
            _ => Err(mismatch(key, Width::List)),
        }
    }

    pub fn text(&self, key: FieldKey) -> Result<&str, ProtocolError> {
        match self.require(key)? {
            Value::Text(text) => Ok(text),
            _ => Err(mismatch(key, Width::Text)),
        }
    }
}

fn mismatch(field: FieldKey, width: Width) -> ProtocolError {
    ProtocolError::TypeMismatch {
        field,
        expected: width.describe(),
    }
}

/// Split `n` bytes off the front of `buf`
pub fn take<'a>(buf: &mut &'a [u8], n: usize, field: FieldKey) -> Result<&'a [u8], ProtocolError> {
    if buf.len() < n {
        return Err(ProtocolError::Truncated(field));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Serialize `fields` in descriptor order.
///
/// `length_of` fields are computed from their target, so callers never
/// supply them.
pub fn to_bytes(specs: &[FieldSpec], fields: &Fields, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    for spec in specs {
        if let Some(custom) = spec.custom {
            let value = fields.require(spec.key)?;
            (custom.write)(fields, value, dst)?;
            continue;
        }

        if let Some(target) = spec.length_of {
            let len = fields
                .require(target)?
                .byte_len()
                .ok_or(ProtocolError::TypeMismatch {
                    field: target,
                    expected: "a byte sequence or text",
                })?;
            write_length(spec, target, len, dst)?;
            continue;
        }

        match (spec.width, fields.require(spec.key)?) {
            (Width::U8, Value::U8(v)) => dst.put_u8(*v),
            (Width::U16, Value::U16(v)) => dst.put_u16(*v),
            (Width::List, Value::List(items)) => dst.extend_from_slice(items),
            (Width::Text, Value::Text(text)) => dst.extend_from_slice(text.as_bytes()),
            (width, _) => return Err(mismatch(spec.key, width)),
        }
    }
    Ok(())
}

fn write_length(spec: &FieldSpec, target: FieldKey, len: usize, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let max = match spec.width {
        Width::U8 => usize::from(u8::MAX),
        Width::U16 => usize::from(u16::MAX),
        width => return Err(mismatch(spec.key, width)),
    };
    if len > max {
        return Err(ProtocolError::TooLong {
            field: target,
            len,
            max,
        });
    }
    match spec.width {
        Width::U8 => dst.put_u8(len as u8),
        _ => dst.put_u16(len as u16),
    }
    Ok(())
}

/// Parse one complete message from `buf`
pub fn from_bytes(specs: &[FieldSpec], mut buf: &[u8]) -> Result<Fields, ProtocolError> {
    let mut fields = Fields::new();
    let mut lengths: HashMap<FieldKey, usize> = HashMap::new();

    for spec in specs {
        let value = match spec.custom {
            Some(custom) => {
                let validate = custom.validate.ok_or_else(|| {
                    warn!(field = spec.key, "Custom field reader has no validator");
                    ProtocolError::Unvalidated(spec.key)
                })?;
                let value = (custom.read)(&fields, &mut buf)?;
                validate(&fields, &value)?;
                value
            }
            None => read_plain(spec, &lengths, &mut buf)?,
        };

        check_allowed(spec, &value)?;

        if let Some(target) = spec.length_of {
            let len = value.as_number().ok_or(mismatch(spec.key, spec.width))?;
            lengths.insert(target, usize::from(len));
        }

        fields.insert(spec.key, value);
    }

    if !buf.is_empty() {
        return Err(ProtocolError::TrailingBytes(buf.len()));
    }
    Ok(fields)
}

fn read_plain(spec: &FieldSpec, lengths: &HashMap<FieldKey, usize>, buf: &mut &[u8]) -> Result<Value, ProtocolError> {
    let value = match spec.width {
        Width::U8 => Value::U8(take(buf, 1, spec.key)?[0]),
        Width::U16 => {
            let raw = take(buf, 2, spec.key)?;
            Value::U16(u16::from_be_bytes([raw[0], raw[1]]))
        }
        Width::List | Width::Text => {
            let len = *lengths
                .get(spec.key)
                .ok_or(ProtocolError::MissingLength(spec.key))?;
            let raw = take(buf, len, spec.key)?;
            if spec.width == Width::List {
                Value::List(raw.to_vec())
            } else {
                let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidText(spec.key))?;
                Value::Text(text.to_owned())
            }
        }
    };
    Ok(value)
}

fn check_allowed(spec: &FieldSpec, value: &Value) -> Result<(), ProtocolError> {
    let rejected = match value {
        Value::U8(_) | Value::U16(_) => value.as_number().filter(|v| !spec.allowed.permits(*v)),
        Value::List(items) => items
            .iter()
            .map(|item| u16::from(*item))
            .find(|v| !spec.allowed.permits(*v)),
        Value::Text(_) => None,
    };
    match rejected {
        Some(value) => Err(ProtocolError::InvalidValue {
            field: spec.key,
            value,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting() -> Vec<FieldSpec> {
        vec![
            FieldSpec::u8("version").allow(&[5]),
            FieldSpec::u8("count").length_of("items"),
            FieldSpec::list("items"),
            FieldSpec::u8("name_len").length_of("name"),
            FieldSpec::text("name"),
            FieldSpec::u16("port"),
        ]
    }

    fn sample() -> Fields {
        Fields::new()
            .with("version", Value::U8(5))
            .with("items", Value::List(vec![1, 2, 3]))
            .with("name", Value::Text("abc".into()))
            .with("port", Value::U16(0x1f90))
    }

    #[test]
    fn test_length_fields_are_derived() {
        let mut buf = BytesMut::new();
        to_bytes(&greeting(), &sample(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[5, 3, 1, 2, 3, 3, b'a', b'b', b'c', 0x1f, 0x90]);
    }

    #[test]
    fn test_decode_uses_length_source() {
        let fields = from_bytes(&greeting(), &[5, 2, 9, 8, 1, b'z', 0, 80]).unwrap();
        assert_eq!(fields.list("items").unwrap(), &[9, 8]);
        assert_eq!(fields.text("name").unwrap(), "z");
        assert_eq!(fields.u16("port").unwrap(), 80);
        assert_eq!(fields.u8("count").unwrap(), 2);
    }

    #[test]
    fn test_missing_field() {
        let fields = sample().with("port", Value::U8(1));
        let mut buf = BytesMut::new();
        let err = to_bytes(&greeting(), &fields, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::TypeMismatch { field: "port", .. }));

        let fields = Fields::new().with("version", Value::U8(5));
        let err = to_bytes(&greeting(), &fields, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("items")));
    }

    #[test]
    fn test_length_source_must_be_sequence() {
        let fields = sample().with("items", Value::U8(1));
        let mut buf = BytesMut::new();
        let err = to_bytes(&greeting(), &fields, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::TypeMismatch { field: "items", .. }));
    }

    #[test]
    fn test_too_long_text() {
        let fields = sample().with("name", Value::Text("x".repeat(256)));
        let mut buf = BytesMut::new();
        let err = to_bytes(&greeting(), &fields, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLong { len: 256, .. }));
    }

    #[test]
    fn test_allow_set_rejects() {
        let err = from_bytes(&greeting(), &[4, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: "version", value: 4 }));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let err = from_bytes(&greeting(), &[5, 3, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated("items")));

        let err = from_bytes(&greeting(), &[5, 0, 0, 0, 1, 0xAA]).unwrap_err();
        assert!(matches!(err, ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn test_custom_reader_requires_validator() {
        fn read(_: &Fields, buf: &mut &[u8]) -> Result<Value, ProtocolError> {
            Ok(Value::U8(take(buf, 1, "raw")?[0]))
        }
        fn write(_: &Fields, _: &Value, _: &mut BytesMut) -> Result<(), ProtocolError> {
            Ok(())
        }
        let specs = [FieldSpec::u8("raw").custom(Custom {
            read,
            write,
            validate: None,
        })];
        let err = from_bytes(&specs, &[1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Unvalidated("raw")));
    }
}
