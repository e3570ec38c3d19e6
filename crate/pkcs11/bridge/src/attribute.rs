//! Attribute templates and their native `CK_ATTRIBUTE` encoding.
//!
//! An [`Attribute`] is an attribute type tag plus a closed [`AttributeValue`].
//! Values are immutable once built: there is no way to obtain a mutable
//! reference to the value of an attribute, which makes the shared flag
//! constants of [`shared`] safe to reuse in any number of templates.

use std::{mem::size_of, ptr, slice};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_PTR, CK_ATTRIBUTE_TYPE, CK_BBOOL, CK_FALSE, CK_TRUE, CK_ULONG,
    CKA_ALWAYS_AUTHENTICATE, CKA_ALWAYS_SENSITIVE, CKA_APPLICATION, CKA_CERTIFICATE_CATEGORY,
    CKA_CERTIFICATE_TYPE, CKA_CLASS, CKA_COPYABLE, CKA_DECRYPT, CKA_DERIVE, CKA_DERIVE_TEMPLATE,
    CKA_DESTROYABLE, CKA_ENCRYPT, CKA_EXTRACTABLE, CKA_KEY_GEN_MECHANISM, CKA_KEY_TYPE,
    CKA_LABEL, CKA_LOCAL, CKA_MODIFIABLE, CKA_MODULUS_BITS, CKA_NEVER_EXTRACTABLE, CKA_PRIVATE,
    CKA_SENSITIVE, CKA_SIGN, CKA_SIGN_RECOVER, CKA_TOKEN, CKA_TRUSTED, CKA_UNWRAP,
    CKA_UNWRAP_TEMPLATE, CKA_VALUE_BITS, CKA_VALUE_LEN, CKA_VERIFY, CKA_VERIFY_RECOVER, CKA_WRAP,
    CKA_WRAP_TEMPLATE, CKA_WRAP_WITH_TRUSTED,
};
use num_bigint_dig::{BigInt, BigUint};
use tracing::trace;

use crate::{P11Error, P11Result};

/// The value shape an attribute type carries on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Ulong,
    Bytes,
    Chars,
    Template,
}

impl ValueKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Ulong => "integer",
            Self::Bytes => "byte sequence",
            Self::Chars => "char sequence",
            Self::Template => "template",
        }
    }
}

/// Wire shape of a well-known attribute type.
/// Unknown and vendor-defined types are treated as byte sequences.
#[must_use]
pub const fn value_kind(type_: CK_ATTRIBUTE_TYPE) -> ValueKind {
    match type_ {
        CKA_TOKEN | CKA_PRIVATE | CKA_TRUSTED | CKA_SENSITIVE | CKA_ENCRYPT | CKA_DECRYPT
        | CKA_WRAP | CKA_UNWRAP | CKA_SIGN | CKA_SIGN_RECOVER | CKA_VERIFY
        | CKA_VERIFY_RECOVER | CKA_DERIVE | CKA_EXTRACTABLE | CKA_LOCAL
        | CKA_NEVER_EXTRACTABLE | CKA_ALWAYS_SENSITIVE | CKA_MODIFIABLE
        | CKA_ALWAYS_AUTHENTICATE | CKA_WRAP_WITH_TRUSTED | CKA_COPYABLE | CKA_DESTROYABLE => {
            ValueKind::Bool
        }
        CKA_CLASS | CKA_KEY_TYPE | CKA_CERTIFICATE_TYPE | CKA_CERTIFICATE_CATEGORY
        | CKA_MODULUS_BITS | CKA_VALUE_BITS | CKA_VALUE_LEN | CKA_KEY_GEN_MECHANISM => {
            ValueKind::Ulong
        }
        CKA_LABEL | CKA_APPLICATION => ValueKind::Chars,
        CKA_WRAP_TEMPLATE | CKA_UNWRAP_TEMPLATE | CKA_DERIVE_TEMPLATE => ValueKind::Template,
        _ => ValueKind::Bytes,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// No value: a search wildcard, or an attribute the token would not reveal.
    /// Distinct from an empty byte sequence.
    Absent,
    Bool(bool),
    Ulong(CK_ULONG),
    Bytes(Vec<u8>),
    Chars(String),
    Template(Vec<Attribute>),
}

impl AttributeValue {
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Absent => "absent value",
            Self::Bool(_) => ValueKind::Bool.name(),
            Self::Ulong(_) => ValueKind::Ulong.name(),
            Self::Bytes(_) => ValueKind::Bytes.name(),
            Self::Chars(_) => ValueKind::Chars.name(),
            Self::Template(_) => ValueKind::Template.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    type_: CK_ATTRIBUTE_TYPE,
    value: AttributeValue,
}

impl Attribute {
    #[must_use]
    pub const fn new(type_: CK_ATTRIBUTE_TYPE, value: AttributeValue) -> Self {
        Self { type_, value }
    }

    #[must_use]
    pub const fn bool(type_: CK_ATTRIBUTE_TYPE, value: bool) -> Self {
        Self::new(type_, AttributeValue::Bool(value))
    }

    #[must_use]
    pub const fn ulong(type_: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Self {
        Self::new(type_, AttributeValue::Ulong(value))
    }

    #[must_use]
    pub const fn absent(type_: CK_ATTRIBUTE_TYPE) -> Self {
        Self::new(type_, AttributeValue::Absent)
    }

    pub fn bytes(type_: CK_ATTRIBUTE_TYPE, value: impl Into<Vec<u8>>) -> Self {
        Self::new(type_, AttributeValue::Bytes(value.into()))
    }

    pub fn chars(type_: CK_ATTRIBUTE_TYPE, value: impl Into<String>) -> Self {
        Self::new(type_, AttributeValue::Chars(value.into()))
    }

    #[must_use]
    pub const fn template(type_: CK_ATTRIBUTE_TYPE, value: Vec<Self>) -> Self {
        Self::new(type_, AttributeValue::Template(value))
    }

    /// Unsigned big-endian magnitude, without leading zero bytes
    /// (zero itself is the single byte `0x00`).
    #[must_use]
    pub fn big_integer(type_: CK_ATTRIBUTE_TYPE, value: &BigUint) -> Self {
        Self::bytes(type_, value.to_bytes_be())
    }

    /// Same as [`Self::big_integer`] for a signed integer: the sign is dropped.
    #[must_use]
    pub fn big_integer_magnitude(type_: CK_ATTRIBUTE_TYPE, value: &BigInt) -> Self {
        let (_sign, magnitude) = value.to_bytes_be();
        Self::bytes(type_, magnitude)
    }

    #[must_use]
    pub const fn attribute_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.type_
    }

    #[must_use]
    pub const fn value(&self) -> &AttributeValue {
        &self.value
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self.value, AttributeValue::Absent)
    }

    fn mismatch(&self, expected: ValueKind) -> P11Error {
        P11Error::TypeMismatch {
            attribute: self.type_,
            expected: expected.name(),
            found: self.value.kind_name(),
        }
    }

    pub fn as_bool(&self) -> P11Result<bool> {
        match self.value {
            AttributeValue::Bool(v) => Ok(v),
            _ => Err(self.mismatch(ValueKind::Bool)),
        }
    }

    pub fn as_ulong(&self) -> P11Result<CK_ULONG> {
        match self.value {
            AttributeValue::Ulong(v) => Ok(v),
            _ => Err(self.mismatch(ValueKind::Ulong)),
        }
    }

    pub fn as_bytes(&self) -> P11Result<&[u8]> {
        match &self.value {
            AttributeValue::Bytes(v) => Ok(v),
            _ => Err(self.mismatch(ValueKind::Bytes)),
        }
    }

    pub fn as_chars(&self) -> P11Result<&str> {
        match &self.value {
            AttributeValue::Chars(v) => Ok(v),
            _ => Err(self.mismatch(ValueKind::Chars)),
        }
    }

    pub fn as_template(&self) -> P11Result<&[Self]> {
        match &self.value {
            AttributeValue::Template(v) => Ok(v),
            _ => Err(self.mismatch(ValueKind::Template)),
        }
    }

    pub fn as_big_uint(&self) -> P11Result<BigUint> {
        Ok(BigUint::from_bytes_be(self.as_bytes()?))
    }

    /// The native byte representation of a scalar value.
    /// `None` for absent values and nested templates.
    fn scalar_bytes(&self) -> Option<Vec<u8>> {
        match &self.value {
            AttributeValue::Absent | AttributeValue::Template(_) => None,
            AttributeValue::Bool(b) => {
                let v: CK_BBOOL = if *b { CK_TRUE } else { CK_FALSE };
                Some(v.to_ne_bytes().to_vec())
            }
            AttributeValue::Ulong(v) => Some(v.to_ne_bytes().to_vec()),
            AttributeValue::Bytes(v) => Some(v.clone()),
            AttributeValue::Chars(v) => Some(v.as_bytes().to_vec()),
        }
    }

    /// Decode a native value of `type_`.
    /// `None` means the token reported the value as unavailable.
    pub fn decode(type_: CK_ATTRIBUTE_TYPE, raw: Option<&[u8]>) -> P11Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::absent(type_));
        };
        let value = match value_kind(type_) {
            ValueKind::Bool => {
                let b: [u8; size_of::<CK_BBOOL>()] = raw.try_into().map_err(|_| {
                    P11Error::Default(format!(
                        "attribute 0x{type_:08X}: invalid boolean length {}",
                        raw.len()
                    ))
                })?;
                AttributeValue::Bool(CK_BBOOL::from_ne_bytes(b) != CK_FALSE)
            }
            ValueKind::Ulong => {
                let b: [u8; size_of::<CK_ULONG>()] = raw.try_into().map_err(|_| {
                    P11Error::Default(format!(
                        "attribute 0x{type_:08X}: invalid integer length {}",
                        raw.len()
                    ))
                })?;
                AttributeValue::Ulong(CK_ULONG::from_ne_bytes(b))
            }
            ValueKind::Bytes => AttributeValue::Bytes(raw.to_vec()),
            ValueKind::Chars => AttributeValue::Chars(String::from_utf8(raw.to_vec())?),
            ValueKind::Template => {
                return Err(P11Error::Default(format!(
                    "attribute 0x{type_:08X}: nested templates cannot be decoded from a flat \
                     buffer"
                )));
            }
        };
        Ok(Self::new(type_, value))
    }
}

/// Canonical flag attributes shared by many templates.
///
/// These are `const` items: every use is a fresh value, so no template can
/// alter what another one observes.
pub mod shared {
    use cosmian_pkcs11_sys::{
        CK_ATTRIBUTE_TYPE, CKA_DECRYPT, CKA_DERIVE, CKA_ENCRYPT, CKA_EXTRACTABLE, CKA_PRIVATE,
        CKA_SENSITIVE, CKA_SIGN, CKA_TOKEN, CKA_UNWRAP, CKA_VERIFY, CKA_WRAP,
    };

    use super::Attribute;

    pub const TOKEN_FALSE: Attribute = Attribute::bool(CKA_TOKEN, false);
    pub const TOKEN_TRUE: Attribute = Attribute::bool(CKA_TOKEN, true);
    pub const PRIVATE_FALSE: Attribute = Attribute::bool(CKA_PRIVATE, false);
    pub const SENSITIVE_FALSE: Attribute = Attribute::bool(CKA_SENSITIVE, false);
    pub const EXTRACTABLE_TRUE: Attribute = Attribute::bool(CKA_EXTRACTABLE, true);
    pub const ENCRYPT_TRUE: Attribute = Attribute::bool(CKA_ENCRYPT, true);
    pub const DECRYPT_TRUE: Attribute = Attribute::bool(CKA_DECRYPT, true);
    pub const SIGN_TRUE: Attribute = Attribute::bool(CKA_SIGN, true);
    pub const VERIFY_TRUE: Attribute = Attribute::bool(CKA_VERIFY, true);
    pub const WRAP_TRUE: Attribute = Attribute::bool(CKA_WRAP, true);
    pub const UNWRAP_TRUE: Attribute = Attribute::bool(CKA_UNWRAP, true);
    pub const DERIVE_TRUE: Attribute = Attribute::bool(CKA_DERIVE, true);

    /// A boolean flag attribute, returned by value.
    #[must_use]
    pub const fn shared_flag(type_: CK_ATTRIBUTE_TYPE, value: bool) -> Attribute {
        Attribute::bool(type_, value)
    }
}

/// A template laid out as a native `CK_ATTRIBUTE` array.
///
/// The value buffers (and nested arrays) are owned here, so the array stays
/// valid for as long as this value is alive.
pub struct NativeTemplate {
    attributes: Vec<CK_ATTRIBUTE>,
    _buffers: Vec<Vec<u8>>,
    _nested: Vec<NativeTemplate>,
}

impl NativeTemplate {
    pub fn encode(template: &[Attribute]) -> P11Result<Self> {
        let mut attributes = Vec::with_capacity(template.len());
        let mut buffers = Vec::new();
        let mut nested = Vec::new();
        for attribute in template {
            let (p_value, len) = match &attribute.value {
                AttributeValue::Absent => (ptr::null_mut(), 0),
                AttributeValue::Template(inner) => {
                    let mut inner = Self::encode(inner)?;
                    let len = inner.attributes.len() * size_of::<CK_ATTRIBUTE>();
                    let p_value = inner.as_mut_ptr().cast::<std::ffi::c_void>();
                    nested.push(inner);
                    (p_value, len)
                }
                _ => {
                    let mut buffer = attribute.scalar_bytes().unwrap_or_default();
                    let len = buffer.len();
                    let p_value = buffer.as_mut_ptr().cast::<std::ffi::c_void>();
                    buffers.push(buffer);
                    (p_value, len)
                }
            };
            attributes.push(CK_ATTRIBUTE {
                type_: attribute.type_,
                pValue: p_value,
                ulValueLen: CK_ULONG::try_from(len)?,
            });
        }
        trace!("Encoded template of {} attributes", attributes.len());
        Ok(Self {
            attributes,
            _buffers: buffers,
            _nested: nested,
        })
    }

    pub fn as_mut_ptr(&mut self) -> CK_ATTRIBUTE_PTR {
        self.attributes.as_mut_ptr()
    }

    pub fn count(&self) -> P11Result<CK_ULONG> {
        Ok(CK_ULONG::try_from(self.attributes.len())?)
    }

    #[must_use]
    pub fn raw(&self) -> &[CK_ATTRIBUTE] {
        &self.attributes
    }

    /// Read the template back from its native layout.
    pub fn decode(&self) -> P11Result<Vec<Attribute>> {
        // SAFETY: every pointer in `attributes` targets a buffer owned by `self`
        unsafe { decode_native(&self.attributes) }
    }
}

/// Decode a native attribute array.
///
/// # Safety
/// Every non-null `pValue` must point to `ulValueLen` readable bytes, and
/// template-kind values to an array of `CK_ATTRIBUTE` satisfying the same.
pub(crate) unsafe fn decode_native(attributes: &[CK_ATTRIBUTE]) -> P11Result<Vec<Attribute>> {
    attributes
        .iter()
        .map(|attribute| {
            let type_ = attribute.type_;
            let p_value = attribute.pValue;
            let len = usize::try_from(attribute.ulValueLen)?;
            if p_value.is_null() {
                return Ok(Attribute::absent(type_));
            }
            if value_kind(type_) == ValueKind::Template {
                let count = len / size_of::<CK_ATTRIBUTE>();
                let inner = unsafe {
                    slice::from_raw_parts(p_value.cast::<CK_ATTRIBUTE>().cast_const(), count)
                };
                return Ok(Attribute::template(type_, unsafe { decode_native(inner)? }));
            }
            let raw = unsafe { slice::from_raw_parts(p_value.cast::<u8>().cast_const(), len) };
            Attribute::decode(type_, Some(raw))
        })
        .collect()
}
