use core::fmt;

/// Every fallible operation in the engine returns this type. The C-ABI
/// boundary (see [`crate::ffi`]) is the only place it gets flattened down to
/// the integer codes from the registration/progress surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatatypeError {
    /// A registration call supplied a callback combination the strategy
    /// table in the registry forbids, or an invalid handle.
    InvalidArgument(&'static str),
    /// `release` was called on a descriptor some live transfer still
    /// references.
    InUse,
    /// A feature of the contract the engine does not implement (reserved
    /// for future strategies).
    Unsupported(&'static str),
    /// A user callback returned a non-zero status.
    UserCallback,
    /// `pack-step`/`unpack-step` reported `used == 0` before the transfer
    /// reached `total`.
    StalledCallback,
    /// The declared `packed_size` disagreed with the bytes actually
    /// produced or the sum of region lengths.
    SizeMismatch,
    /// Building a `MemoryRegions` region plan failed (region-count and
    /// region-list disagreed, or a region referenced a non-primitive type).
    RegionPlanFailed,
    /// The transport closed the request before the driver reached `total`.
    TransportClosed,
    /// An internal invariant was violated; this indicates an engine bug
    /// rather than caller misuse.
    Internal(&'static str),
}

impl fmt::Display for DatatypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InUse => write!(f, "descriptor is still referenced by a live transfer"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::UserCallback => write!(f, "user callback returned an error"),
            Self::StalledCallback => write!(
                f,
                "pack-step/unpack-step reported zero bytes before the transfer completed"
            ),
            Self::SizeMismatch => write!(f, "packed size disagreed with bytes actually produced"),
            Self::RegionPlanFailed => write!(f, "failed to build the memory-region plan"),
            Self::TransportClosed => write!(f, "transport closed the request mid-transfer"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DatatypeError {}

/// Integer error codes surfaced across the C-ABI boundary (`0` is success).
#[repr(i32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    Success = 0,
    InvalidArgument = 1,
    InUse = 2,
    Unsupported = 3,
    UserCallback = 4,
    StalledCallback = 5,
    SizeMismatch = 6,
    RegionPlanFailed = 7,
    TransportClosed = 8,
    Internal = 9,
}

impl From<DatatypeError> for ErrorCode {
    fn from(err: DatatypeError) -> Self {
        match err {
            DatatypeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            DatatypeError::InUse => ErrorCode::InUse,
            DatatypeError::Unsupported(_) => ErrorCode::Unsupported,
            DatatypeError::UserCallback => ErrorCode::UserCallback,
            DatatypeError::StalledCallback => ErrorCode::StalledCallback,
            DatatypeError::SizeMismatch => ErrorCode::SizeMismatch,
            DatatypeError::RegionPlanFailed => ErrorCode::RegionPlanFailed,
            DatatypeError::TransportClosed => ErrorCode::TransportClosed,
            DatatypeError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl ErrorCode {
    /// Returns the raw C-ABI status code.
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}
