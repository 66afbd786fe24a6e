//! Byte layout of the typed graph: vertex prefixes, edge infixes, and the
//! order-preserving value codec. Everything here is deterministic; decoding a
//! well-formed key never fails and never allocates more than the value needs.

mod iid;

pub use iid::{
    edge_scan_prefix, instance_scan_prefix, thing_iid_len, EdgeIid, ThingIid, TypeIid,
    THING_IID_LEN, TYPE_IID_LEN,
};

use crate::error::{MotifError, Result};

pub const STRING_MAX_LENGTH: usize = 255;

/// Partition of a type vertex, encoded as its prefix byte.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Entity = 0x20,
    Attribute = 0x21,
    Relation = 0x22,
    Role = 0x23,
}

impl TypeKind {
    pub const fn prefix(self) -> u8 {
        self as u8
    }

    pub fn from_prefix(byte: u8) -> Result<Self> {
        match byte {
            0x20 => Ok(TypeKind::Entity),
            0x21 => Ok(TypeKind::Attribute),
            0x22 => Ok(TypeKind::Relation),
            0x23 => Ok(TypeKind::Role),
            _ => Err(MotifError::EncodingViolation("unknown type vertex prefix")),
        }
    }

    /// Prefix of the instance partition this type describes.
    pub const fn instance_prefix(self) -> u8 {
        match self {
            TypeKind::Entity => ThingKind::Entity.prefix(),
            TypeKind::Attribute => ThingKind::Attribute.prefix(),
            TypeKind::Relation => ThingKind::Relation.prefix(),
            TypeKind::Role => ThingKind::Role.prefix(),
        }
    }
}

/// Partition of a thing vertex, encoded as its prefix byte.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ThingKind {
    Entity = 0x30,
    Attribute = 0x31,
    Relation = 0x32,
    Role = 0x33,
}

impl ThingKind {
    pub const fn prefix(self) -> u8 {
        self as u8
    }

    pub fn from_prefix(byte: u8) -> Result<Self> {
        match byte {
            0x30 => Ok(ThingKind::Entity),
            0x31 => Ok(ThingKind::Attribute),
            0x32 => Ok(ThingKind::Relation),
            0x33 => Ok(ThingKind::Role),
            _ => Err(MotifError::EncodingViolation("unknown thing vertex prefix")),
        }
    }
}

/// Prefix byte of the scoped-label index (label bytes follow the prefix).
pub const LABEL_INDEX_PREFIX: u8 = 0x01;

/// Edge infixes. Even code points are the forward (outward) direction, odd
/// the backward; `forward ^ 1 == backward` for every kind.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Infix {
    SubForward = 0x40,
    SubBackward = 0x41,
    OwnsForward = 0x42,
    OwnsBackward = 0x43,
    OwnsKeyForward = 0x44,
    OwnsKeyBackward = 0x45,
    PlaysForward = 0x46,
    PlaysBackward = 0x47,
    RelatesForward = 0x48,
    RelatesBackward = 0x49,
    IsaForward = 0x4A,
    IsaBackward = 0x4B,
    HasForward = 0x50,
    HasBackward = 0x51,
    PlayingForward = 0x52,
    PlayingBackward = 0x53,
    RelatingForward = 0x54,
    RelatingBackward = 0x55,
    RolePlayerForward = 0x56,
    RolePlayerBackward = 0x57,
}

impl Infix {
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub const fn is_forward(self) -> bool {
        (self as u8) & 1 == 0
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        use Infix::*;
        Ok(match byte {
            0x40 => SubForward,
            0x41 => SubBackward,
            0x42 => OwnsForward,
            0x43 => OwnsBackward,
            0x44 => OwnsKeyForward,
            0x45 => OwnsKeyBackward,
            0x46 => PlaysForward,
            0x47 => PlaysBackward,
            0x48 => RelatesForward,
            0x49 => RelatesBackward,
            0x4A => IsaForward,
            0x4B => IsaBackward,
            0x50 => HasForward,
            0x51 => HasBackward,
            0x52 => PlayingForward,
            0x53 => PlayingBackward,
            0x54 => RelatingForward,
            0x55 => RelatingBackward,
            0x56 => RolePlayerForward,
            0x57 => RolePlayerBackward,
            _ => return Err(MotifError::EncodingViolation("unknown edge infix")),
        })
    }

    pub fn reversed(self) -> Self {
        // forward and backward code points differ only in the low bit
        Self::from_byte(self.byte() ^ 1).expect("infix table is closed under reversal")
    }
}

/// Kind of an edge between thing vertices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ThingEdge {
    Has,
    Playing,
    Relating,
    RolePlayer,
}

impl ThingEdge {
    pub const fn forward(self) -> Infix {
        match self {
            ThingEdge::Has => Infix::HasForward,
            ThingEdge::Playing => Infix::PlayingForward,
            ThingEdge::Relating => Infix::RelatingForward,
            ThingEdge::RolePlayer => Infix::RolePlayerForward,
        }
    }

    pub const fn backward(self) -> Infix {
        match self {
            ThingEdge::Has => Infix::HasBackward,
            ThingEdge::Playing => Infix::PlayingBackward,
            ThingEdge::Relating => Infix::RelatingBackward,
            ThingEdge::RolePlayer => Infix::RolePlayerBackward,
        }
    }
}

/// Kind of an edge between type vertices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeEdge {
    Sub,
    Owns,
    OwnsKey,
    Plays,
    Relates,
}

impl TypeEdge {
    pub const fn forward(self) -> Infix {
        match self {
            TypeEdge::Sub => Infix::SubForward,
            TypeEdge::Owns => Infix::OwnsForward,
            TypeEdge::OwnsKey => Infix::OwnsKeyForward,
            TypeEdge::Plays => Infix::PlaysForward,
            TypeEdge::Relates => Infix::RelatesForward,
        }
    }

    pub const fn backward(self) -> Infix {
        match self {
            TypeEdge::Sub => Infix::SubBackward,
            TypeEdge::Owns => Infix::OwnsBackward,
            TypeEdge::OwnsKey => Infix::OwnsKeyBackward,
            TypeEdge::Plays => Infix::PlaysBackward,
            TypeEdge::Relates => Infix::RelatesBackward,
        }
    }
}

/// Value kind of an attribute type, encoded as one byte inside attribute IIDs.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ValueType {
    Bool = 0x01,
    Long = 0x02,
    Double = 0x03,
    String = 0x04,
    DateTime = 0x05,
}

impl ValueType {
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Bool),
            0x02 => Ok(ValueType::Long),
            0x03 => Ok(ValueType::Double),
            0x04 => Ok(ValueType::String),
            0x05 => Ok(ValueType::DateTime),
            _ => Err(MotifError::EncodingViolation("unknown value type byte")),
        }
    }

    /// Two value kinds are comparable when a predicate between them is
    /// well-defined. Long and Double compare across kinds.
    pub fn comparable_to(self, other: ValueType) -> bool {
        match (self, other) {
            (ValueType::Long, ValueType::Double) | (ValueType::Double, ValueType::Long) => true,
            (a, b) => a == b,
        }
    }
}

/// A typed attribute value. DateTime is canonical epoch-milliseconds (UTC),
/// which keeps the byte encoding zone-independent and order-comparable.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(i64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    /// Order-preserving byte encoding within this value's kind.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Value::Bool(v) => vec![u8::from(*v)],
            Value::Long(v) => encode_i64(*v).to_vec(),
            Value::Double(v) => encode_f64(*v).to_vec(),
            Value::String(v) => {
                let bytes = v.as_bytes();
                if bytes.len() > STRING_MAX_LENGTH {
                    return Err(MotifError::ValueTooLong {
                        max: STRING_MAX_LENGTH,
                    });
                }
                let mut out = Vec::with_capacity(1 + bytes.len());
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
                out
            }
            Value::DateTime(millis) => encode_i64(*millis).to_vec(),
        })
    }

    pub fn decode(value_type: ValueType, bytes: &[u8]) -> Result<Self> {
        match value_type {
            ValueType::Bool => match bytes {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                _ => Err(MotifError::EncodingViolation("malformed bool value")),
            },
            ValueType::Long => Ok(Value::Long(decode_i64(take8(bytes)?))),
            ValueType::Double => Ok(Value::Double(decode_f64(take8(bytes)?))),
            ValueType::String => {
                let len = *bytes
                    .first()
                    .ok_or(MotifError::EncodingViolation("empty string value"))?
                    as usize;
                if bytes.len() != 1 + len {
                    return Err(MotifError::EncodingViolation("string length mismatch"));
                }
                let s = std::str::from_utf8(&bytes[1..])
                    .map_err(|_| MotifError::EncodingViolation("string value not utf-8"))?;
                Ok(Value::String(s.to_owned()))
            }
            ValueType::DateTime => Ok(Value::DateTime(decode_i64(take8(bytes)?))),
        }
    }

    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Long(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn take8(bytes: &[u8]) -> Result<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| MotifError::EncodingViolation("expected 8 value bytes"))
}

/// Big-endian with the sign bit flipped, so lexicographic order equals
/// numeric order across negative and positive values.
fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_i64(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

/// IEEE-754 total-order transform: positives get the sign bit flipped,
/// negatives get every bit flipped.
fn encode_f64(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let transformed = if bits >> 63 == 0 {
        bits ^ (1 << 63)
    } else {
        !bits
    };
    transformed.to_be_bytes()
}

fn decode_f64(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let restored = if bits >> 63 == 1 { bits ^ (1 << 63) } else { !bits };
    f64::from_bits(restored)
}

/// Key of the scoped-label index entry pointing at a type IID.
pub fn label_index_key(label: &str, scope: Option<&str>) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + label.len() + 1 + scope.map_or(0, str::len));
    key.push(LABEL_INDEX_PREFIX);
    if let Some(scope) = scope {
        key.extend_from_slice(scope.as_bytes());
        key.push(b':');
    }
    key.extend_from_slice(label.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infix_direction_parity() {
        for kind in [
            ThingEdge::Has,
            ThingEdge::Playing,
            ThingEdge::Relating,
            ThingEdge::RolePlayer,
        ] {
            assert!(kind.forward().is_forward());
            assert!(!kind.backward().is_forward());
            assert_eq!(kind.forward().reversed(), kind.backward());
            assert_eq!(kind.backward().reversed(), kind.forward());
        }
    }

    #[test]
    fn long_encoding_orders_negatives_before_positives() {
        let values = [i64::MIN, -17, -1, 0, 1, 42, i64::MAX];
        let mut encoded: Vec<[u8; 8]> = values.iter().map(|v| encode_i64(*v)).collect();
        encoded.sort();
        let decoded: Vec<i64> = encoded.into_iter().map(decode_i64).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn double_encoding_orders_like_floats() {
        let values = [f64::NEG_INFINITY, -3.5, -0.0, 0.0, 1e-9, 2.25, f64::INFINITY];
        let mut encoded: Vec<[u8; 8]> = values.iter().map(|v| encode_f64(*v)).collect();
        encoded.sort();
        let decoded: Vec<f64> = encoded.into_iter().map(decode_f64).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn string_encoding_enforces_length_limit() {
        let ok = Value::String("a".repeat(STRING_MAX_LENGTH));
        assert!(ok.encode().is_ok());
        let too_long = Value::String("a".repeat(STRING_MAX_LENGTH + 1));
        assert_eq!(
            too_long.encode(),
            Err(MotifError::ValueTooLong {
                max: STRING_MAX_LENGTH
            })
        );
    }

    #[test]
    fn value_roundtrip_every_kind() {
        let samples = [
            Value::Bool(true),
            Value::Long(-123456789),
            Value::Double(2.718281828),
            Value::String("hello".into()),
            Value::DateTime(1_600_000_000_000),
        ];
        for value in samples {
            let encoded = value.encode().unwrap();
            let decoded = Value::decode(value.value_type(), &encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }
}
