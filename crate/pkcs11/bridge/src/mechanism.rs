//! Mechanisms and the lifecycle of their native parameter buffers.
//!
//! Simple parameters (an integer, an IV) are passed by pointer to the value
//! held by the [`Mechanism`] itself. Structured parameters (RSA-PSS, RSA-OAEP,
//! AES-GCM) must be laid out as a C structure: that buffer is a
//! [`NativeParameterHandle`], materialized on first use and released exactly
//! once, either when the parameter changes, on [`Mechanism::free_handle`], or
//! when the mechanism is dropped.

use std::{ffi::c_void, marker::PhantomData, mem::size_of, ptr};

use cosmian_pkcs11_sys::{
    CK_MECHANISM, CK_MECHANISM_PTR, CK_MECHANISM_TYPE, CK_RSA_PKCS_MGF_TYPE,
    CK_RSA_PKCS_OAEP_PARAMS, CK_RSA_PKCS_PSS_PARAMS, CK_ULONG, CK_VOID_PTR, CKZ_DATA_SPECIFIED,
};
use tracing::{debug, trace};

use crate::P11Result;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MechanismParameter {
    #[default]
    None,
    Ulong(CK_ULONG),
    /// Raw bytes, typically an IV
    Bytes(Vec<u8>),
    RsaPss {
        hash_alg: CK_MECHANISM_TYPE,
        mgf: CK_RSA_PKCS_MGF_TYPE,
        salt_len: CK_ULONG,
    },
    RsaOaep {
        hash_alg: CK_MECHANISM_TYPE,
        mgf: CK_RSA_PKCS_MGF_TYPE,
        source_data: Vec<u8>,
    },
    Gcm {
        iv: Vec<u8>,
        aad: Vec<u8>,
        tag_bits: CK_ULONG,
    },
}

impl MechanismParameter {
    /// Whether this parameter is passed as a native structure
    #[must_use]
    pub const fn needs_native_buffer(&self) -> bool {
        matches!(
            self,
            Self::RsaPss { .. } | Self::RsaOaep { .. } | Self::Gcm { .. }
        )
    }
}

/// `CK_GCM_PARAMS`
#[repr(C)]
struct GcmParams {
    p_iv: *mut u8,
    ul_iv_len: CK_ULONG,
    ul_iv_bits: CK_ULONG,
    p_aad: *mut u8,
    ul_aad_len: CK_ULONG,
    ul_tag_bits: CK_ULONG,
}

enum ParameterBuffer {
    Pss(Box<CK_RSA_PKCS_PSS_PARAMS>),
    Oaep {
        params: Box<CK_RSA_PKCS_OAEP_PARAMS>,
        _source_data: Vec<u8>,
    },
    Gcm {
        params: Box<GcmParams>,
        _iv: Vec<u8>,
        _aad: Vec<u8>,
    },
}

/// An owned native parameter structure.
///
/// The buffer is freed when the handle is dropped; since the handle cannot be
/// cloned, it is released exactly once.
pub struct NativeParameterHandle {
    buffer: ParameterBuffer,
}

// SAFETY: the raw pointers inside the native structures only target buffers
// owned by the handle itself; nothing else aliases them.
unsafe impl Send for NativeParameterHandle {}

impl NativeParameterHandle {
    fn materialize(parameter: &MechanismParameter) -> P11Result<Option<Self>> {
        let buffer = match parameter {
            MechanismParameter::RsaPss {
                hash_alg,
                mgf,
                salt_len,
            } => ParameterBuffer::Pss(Box::new(CK_RSA_PKCS_PSS_PARAMS {
                hashAlg: *hash_alg,
                mgf: *mgf,
                sLen: *salt_len,
            })),
            MechanismParameter::RsaOaep {
                hash_alg,
                mgf,
                source_data,
            } => {
                let mut source_data = source_data.clone();
                let (p_source, source_len) = if source_data.is_empty() {
                    (ptr::null_mut(), 0)
                } else {
                    (
                        source_data.as_mut_ptr().cast::<c_void>(),
                        CK_ULONG::try_from(source_data.len())?,
                    )
                };
                ParameterBuffer::Oaep {
                    params: Box::new(CK_RSA_PKCS_OAEP_PARAMS {
                        hashAlg: *hash_alg,
                        mgf: *mgf,
                        source: CKZ_DATA_SPECIFIED,
                        pSourceData: p_source,
                        ulSourceDataLen: source_len,
                    }),
                    _source_data: source_data,
                }
            }
            MechanismParameter::Gcm { iv, aad, tag_bits } => {
                let mut iv = iv.clone();
                let mut aad = aad.clone();
                let p_iv = if iv.is_empty() {
                    ptr::null_mut()
                } else {
                    iv.as_mut_ptr()
                };
                let p_aad = if aad.is_empty() {
                    ptr::null_mut()
                } else {
                    aad.as_mut_ptr()
                };
                ParameterBuffer::Gcm {
                    params: Box::new(GcmParams {
                        p_iv,
                        ul_iv_len: CK_ULONG::try_from(iv.len())?,
                        ul_iv_bits: CK_ULONG::try_from(iv.len() * 8)?,
                        p_aad,
                        ul_aad_len: CK_ULONG::try_from(aad.len())?,
                        ul_tag_bits: *tag_bits,
                    }),
                    _iv: iv,
                    _aad: aad,
                }
            }
            MechanismParameter::None
            | MechanismParameter::Ulong(_)
            | MechanismParameter::Bytes(_) => return Ok(None),
        };
        let handle = Self { buffer };
        trace!(
            "Materialized native mechanism parameters at {:#x}",
            handle.address()
        );
        Ok(Some(handle))
    }

    fn as_ptr(&self) -> CK_VOID_PTR {
        match &self.buffer {
            ParameterBuffer::Pss(params) => ptr::from_ref(params.as_ref()).cast_mut().cast(),
            ParameterBuffer::Oaep { params, .. } => {
                ptr::from_ref(params.as_ref()).cast_mut().cast()
            }
            ParameterBuffer::Gcm { params, .. } => ptr::from_ref(params.as_ref()).cast_mut().cast(),
        }
    }

    fn len(&self) -> usize {
        match &self.buffer {
            ParameterBuffer::Pss(_) => size_of::<CK_RSA_PKCS_PSS_PARAMS>(),
            ParameterBuffer::Oaep { .. } => size_of::<CK_RSA_PKCS_OAEP_PARAMS>(),
            ParameterBuffer::Gcm { .. } => size_of::<GcmParams>(),
        }
    }

    /// Address of the native structure; never zero.
    #[must_use]
    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }
}

impl Drop for NativeParameterHandle {
    fn drop(&mut self) {
        trace!(
            "Releasing native mechanism parameters at {:#x}",
            self.address()
        );
    }
}

/// A mechanism type plus its parameter, ready to be passed to the native module.
pub struct Mechanism {
    mechanism: CK_MECHANISM_TYPE,
    parameter: MechanismParameter,
    handle: Option<NativeParameterHandle>,
    /// Number of native buffers built for this mechanism so far
    materializations: usize,
}

impl Mechanism {
    #[must_use]
    pub const fn new(mechanism: CK_MECHANISM_TYPE) -> Self {
        Self::with_parameter(mechanism, MechanismParameter::None)
    }

    #[must_use]
    pub const fn with_parameter(
        mechanism: CK_MECHANISM_TYPE,
        parameter: MechanismParameter,
    ) -> Self {
        Self {
            mechanism,
            parameter,
            handle: None,
            materializations: 0,
        }
    }

    #[must_use]
    pub const fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        self.mechanism
    }

    #[must_use]
    pub const fn parameter(&self) -> &MechanismParameter {
        &self.parameter
    }

    /// Set the mechanism and its parameter.
    ///
    /// A parameter equal to the current one keeps the materialized native
    /// buffer, if any. A different parameter releases it first; the new buffer
    /// is only built on next use.
    pub fn set_parameter(&mut self, mechanism: CK_MECHANISM_TYPE, parameter: MechanismParameter) {
        self.mechanism = mechanism;
        if self.parameter == parameter {
            trace!("Mechanism parameter unchanged, keeping native buffer");
            return;
        }
        self.free_handle();
        self.parameter = parameter;
    }

    /// Release the native parameter buffer. Returns whether one was released;
    /// calling it again is a no-op.
    pub fn free_handle(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                debug!(
                    "Freeing native parameters of mechanism {:#x}",
                    self.mechanism
                );
                drop(handle);
                true
            }
            None => false,
        }
    }

    /// Address of the materialized native parameter buffer, if any.
    #[must_use]
    pub fn native_handle(&self) -> Option<usize> {
        self.handle.as_ref().map(NativeParameterHandle::address)
    }

    #[cfg(test)]
    pub(crate) const fn materializations(&self) -> usize {
        self.materializations
    }

    /// Lay the mechanism out as a `CK_MECHANISM`, materializing the
    /// native parameter buffer if needed.
    pub fn to_native(&mut self) -> P11Result<NativeMechanism<'_>> {
        if self.handle.is_none() && self.parameter.needs_native_buffer() {
            self.handle = NativeParameterHandle::materialize(&self.parameter)?;
            self.materializations += 1;
            trace!(
                "Mechanism {:#x}: native parameters built {} time(s)",
                self.mechanism, self.materializations
            );
        }
        let (p_parameter, len): (CK_VOID_PTR, usize) = match (&self.handle, &self.parameter) {
            (Some(handle), _) => (handle.as_ptr(), handle.len()),
            (None, MechanismParameter::Ulong(value)) => {
                (ptr::from_ref(value).cast_mut().cast(), size_of::<CK_ULONG>())
            }
            (None, MechanismParameter::Bytes(bytes)) if !bytes.is_empty() => {
                (bytes.as_ptr().cast_mut().cast(), bytes.len())
            }
            (None, _) => (ptr::null_mut(), 0),
        };
        Ok(NativeMechanism {
            raw: CK_MECHANISM {
                mechanism: self.mechanism,
                pParameter: p_parameter,
                ulParameterLen: CK_ULONG::try_from(len)?,
            },
            _mechanism: PhantomData,
        })
    }
}

impl From<CK_MECHANISM_TYPE> for Mechanism {
    fn from(mechanism: CK_MECHANISM_TYPE) -> Self {
        Self::new(mechanism)
    }
}

impl std::fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mechanism")
            .field("mechanism", &format_args!("{:#x}", self.mechanism))
            .field("parameter", &self.parameter)
            .field("native_handle", &self.native_handle())
            .finish()
    }
}

/// A `CK_MECHANISM` borrowing the [`Mechanism`] whose buffers it points to.
pub struct NativeMechanism<'a> {
    raw: CK_MECHANISM,
    _mechanism: PhantomData<&'a mut Mechanism>,
}

impl NativeMechanism<'_> {
    pub fn as_mut_ptr(&mut self) -> CK_MECHANISM_PTR {
        ptr::from_mut(&mut self.raw)
    }

    #[must_use]
    pub const fn raw(&self) -> &CK_MECHANISM {
        &self.raw
    }
}
