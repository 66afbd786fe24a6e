//! Identifier layouts. Type IIDs are three bytes (prefix + key), thing IIDs
//! embed their type IID, and attribute IIDs are content-addressed by their
//! typed value bytes. Edge IIDs join two vertex IIDs around an infix byte.

use crate::encoding::{Infix, ThingKind, TypeKind, Value, ValueType};
use crate::error::{MotifError, Result};

pub const TYPE_IID_LEN: usize = 3;
/// Length of a non-attribute thing IID: prefix + type IID + 8-byte key.
pub const THING_IID_LEN: usize = 1 + TYPE_IID_LEN + 8;

const ATTR_VALUE_OFFSET: usize = 1 + TYPE_IID_LEN + 1;

/// Identifier of a type vertex: `prefix(1) ‖ key(2)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeIid([u8; TYPE_IID_LEN]);

impl TypeIid {
    pub fn new(kind: TypeKind, key: u16) -> Self {
        let k = key.to_be_bytes();
        Self([kind.prefix(), k[0], k[1]])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; TYPE_IID_LEN] = bytes
            .try_into()
            .map_err(|_| MotifError::EncodingViolation("type iid must be 3 bytes"))?;
        TypeKind::from_prefix(raw[0])?;
        Ok(Self(raw))
    }

    pub fn kind(&self) -> TypeKind {
        TypeKind::from_prefix(self.0[0]).expect("validated on construction")
    }

    pub fn key(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }

    pub fn bytes(&self) -> &[u8; TYPE_IID_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TypeIid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeIid({:?}:{})", self.kind(), self.key())
    }
}

/// Identifier of a thing vertex. Entities, relations, and roles are
/// `prefix(1) ‖ type-IID(3) ‖ key(8)`; attributes are
/// `prefix(1) ‖ type-IID(3) ‖ value-type(1) ‖ value-bytes` and therefore
/// content-addressed.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ThingIid(Vec<u8>);

impl ThingIid {
    pub fn object(kind: ThingKind, type_iid: TypeIid, key: u64) -> Self {
        debug_assert_ne!(kind, ThingKind::Attribute);
        let mut bytes = Vec::with_capacity(THING_IID_LEN);
        bytes.push(kind.prefix());
        bytes.extend_from_slice(type_iid.bytes());
        bytes.extend_from_slice(&key.to_be_bytes());
        Self(bytes)
    }

    pub fn attribute(type_iid: TypeIid, value: &Value) -> Result<Self> {
        let value_bytes = value.encode()?;
        let mut bytes = Vec::with_capacity(ATTR_VALUE_OFFSET + value_bytes.len());
        bytes.push(ThingKind::Attribute.prefix());
        bytes.extend_from_slice(type_iid.bytes());
        bytes.push(value.value_type().byte());
        bytes.extend_from_slice(&value_bytes);
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let len = thing_iid_len(bytes)?;
        if bytes.len() != len {
            return Err(MotifError::EncodingViolation("thing iid length mismatch"));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn kind(&self) -> ThingKind {
        ThingKind::from_prefix(self.0[0]).expect("validated on construction")
    }

    pub fn is_attribute(&self) -> bool {
        self.kind() == ThingKind::Attribute
    }

    pub fn type_iid(&self) -> TypeIid {
        TypeIid::from_bytes(&self.0[1..1 + TYPE_IID_LEN]).expect("embedded type iid")
    }

    /// 8-byte key of a non-attribute thing.
    pub fn key(&self) -> u64 {
        debug_assert!(!self.is_attribute());
        u64::from_be_bytes(self.0[1 + TYPE_IID_LEN..].try_into().expect("fixed layout"))
    }

    pub fn value_type(&self) -> Result<ValueType> {
        if !self.is_attribute() {
            return Err(MotifError::EncodingViolation("value type of a non-attribute iid"));
        }
        ValueType::from_byte(self.0[1 + TYPE_IID_LEN])
    }

    /// Decode the embedded value of an attribute IID.
    pub fn value(&self) -> Result<Value> {
        Value::decode(self.value_type()?, &self.0[ATTR_VALUE_OFFSET..])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ThingIid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_attribute() {
            write!(f, "ThingIid(attr {:?} {:?})", self.type_iid(), self.value())
        } else {
            write!(f, "ThingIid({:?} {:?}:{})", self.kind(), self.type_iid(), self.key())
        }
    }
}

/// Byte length of the thing IID at the head of `bytes`. O(1): attribute
/// value lengths are fixed per kind, strings carry a length byte.
pub fn thing_iid_len(bytes: &[u8]) -> Result<usize> {
    let kind = ThingKind::from_prefix(
        *bytes
            .first()
            .ok_or(MotifError::EncodingViolation("empty thing iid"))?,
    )?;
    if kind != ThingKind::Attribute {
        return Ok(THING_IID_LEN);
    }
    if bytes.len() < ATTR_VALUE_OFFSET + 1 {
        return Err(MotifError::EncodingViolation("attribute iid truncated"));
    }
    let value_len = match ValueType::from_byte(bytes[1 + TYPE_IID_LEN])? {
        ValueType::Bool => 1,
        ValueType::Long | ValueType::Double | ValueType::DateTime => 8,
        ValueType::String => 1 + bytes[ATTR_VALUE_OFFSET] as usize,
    };
    Ok(ATTR_VALUE_OFFSET + value_len)
}

/// Identifier of a persisted thing edge:
/// `start-IID ‖ infix(1) [‖ role-type-IID(3)] ‖ end-IID`. The optional role
/// type is present only on role-player edges.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EdgeIid(Vec<u8>);

impl EdgeIid {
    pub fn new(start: &ThingIid, infix: Infix, end: &ThingIid) -> Self {
        let mut bytes =
            Vec::with_capacity(start.bytes().len() + 1 + end.bytes().len());
        bytes.extend_from_slice(start.bytes());
        bytes.push(infix.byte());
        bytes.extend_from_slice(end.bytes());
        Self(bytes)
    }

    pub fn role_player(start: &ThingIid, infix: Infix, role_type: TypeIid, end: &ThingIid) -> Self {
        let mut bytes =
            Vec::with_capacity(start.bytes().len() + 1 + TYPE_IID_LEN + end.bytes().len());
        bytes.extend_from_slice(start.bytes());
        bytes.push(infix.byte());
        bytes.extend_from_slice(role_type.bytes());
        bytes.extend_from_slice(end.bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // validate the start IID and infix eagerly; the tail is validated by end()
        let start_len = thing_iid_len(bytes)?;
        if bytes.len() <= start_len {
            return Err(MotifError::EncodingViolation("edge iid truncated"));
        }
        Infix::from_byte(bytes[start_len])?;
        Ok(Self(bytes.to_vec()))
    }

    fn start_len(&self) -> usize {
        thing_iid_len(&self.0).expect("validated on construction")
    }

    pub fn infix(&self) -> Infix {
        Infix::from_byte(self.0[self.start_len()]).expect("validated on construction")
    }

    pub fn is_outward(&self) -> bool {
        self.infix().is_forward()
    }

    pub fn start(&self) -> Result<ThingIid> {
        ThingIid::from_bytes(&self.0[..self.start_len()])
    }

    pub fn end(&self) -> Result<ThingIid> {
        let mut offset = self.start_len() + 1;
        if self.has_role_type() {
            offset += TYPE_IID_LEN;
        }
        ThingIid::from_bytes(&self.0[offset..])
    }

    fn has_role_type(&self) -> bool {
        matches!(self.infix(), Infix::RolePlayerForward | Infix::RolePlayerBackward)
    }

    /// Role type of a role-player edge.
    pub fn role_type(&self) -> Result<TypeIid> {
        if !self.has_role_type() {
            return Err(MotifError::EncodingViolation("edge carries no role type"));
        }
        let offset = self.start_len() + 1;
        TypeIid::from_bytes(&self.0[offset..offset + TYPE_IID_LEN])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for EdgeIid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdgeIid({:?} {:?} -> {:?})", self.infix(), self.start(), self.end())
    }
}

/// Scan prefix selecting every edge of `infix` leaving `start`.
pub fn edge_scan_prefix(start: &ThingIid, infix: Infix) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(start.bytes().len() + 1);
    prefix.extend_from_slice(start.bytes());
    prefix.push(infix.byte());
    prefix
}

/// Scan prefix selecting every instance of a type: the thing prefix byte
/// followed by the type IID.
pub fn instance_scan_prefix(kind: ThingKind, type_iid: TypeIid) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + TYPE_IID_LEN);
    prefix.push(kind.prefix());
    prefix.extend_from_slice(type_iid.bytes());
    prefix
}
