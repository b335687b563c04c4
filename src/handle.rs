use core::fmt;

/// A stable integer identifier for a registered datatype descriptor.
///
/// Handle `0` is reserved: it always denotes the engine's built-in
/// raw-bytes primitive (width 1, trivial driver). A small contiguous range
/// above it (`1..=63`) is reserved for other built-in primitives a future
/// version of the engine may add; [`TypeRegistry::register`] never hands
/// those out to user registrations.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DatatypeHandle(u32);

impl DatatypeHandle {
    /// The reserved raw-bytes primitive: width 1, `memcpy` driver.
    pub const RAW_BYTES: Self = Self(0);

    /// First handle value available for user registrations.
    pub(crate) const FIRST_USER_HANDLE: u32 = 64;

    #[inline]
    pub(crate) const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_raw_bytes(self) -> bool {
        self.0 == Self::RAW_BYTES.0
    }
}

impl fmt::Debug for DatatypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatatypeHandle({})", self.0)
    }
}

impl fmt::Display for DatatypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for DatatypeHandle {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(any(test, feature = "generator"))]
impl bolero_generator::TypeGenerator for DatatypeHandle {
    fn generate<D: bolero_generator::Driver>(driver: &mut D) -> Option<Self> {
        Some(Self(driver.gen()?))
    }
}
