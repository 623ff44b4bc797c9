use crate::SymAddr;

/// Errors surfaced synchronously by runtime calls.
///
/// Every variant is a local, immediately detectable condition. Mismatched
/// participation in a barrier or collective is not an error: it blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XbrtimeError {
    /// The PE id lies outside `[0, num_pes)`
    InvalidPe { pe: usize, num_pes: usize },
    /// The topology (or the segment bounds) deny access to `addr` on `pe`
    UnreachableAddress { addr: SymAddr, pe: usize },
    /// The symmetric arena (or its allocation table) cannot satisfy the request
    OutOfSymmetricMemory { requested: usize },
    /// `addr` does not name a live allocation on this PE
    InvalidFree(SymAddr),
    /// A count, stride, size or table argument is unusable
    InvalidArgument(String),
    /// The group is larger than the barrier slot banks can serve
    TooManyPes { num_pes: usize, max: usize },
}

pub type XbrtimeResult<T> = Result<T, XbrtimeError>;

impl std::fmt::Display for XbrtimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            XbrtimeError::InvalidPe { pe, num_pes } => {
                write!(f, "invalid pe {} (num_pes: {})", pe, num_pes)
            }
            XbrtimeError::UnreachableAddress { addr, pe } => {
                write!(f, "address {:#x} is not accessible on pe {}", addr.0, pe)
            }
            XbrtimeError::OutOfSymmetricMemory { requested } => {
                write!(
                    f,
                    "not enough symmetric memory to allocate {} bytes",
                    requested
                )
            }
            XbrtimeError::InvalidFree(addr) => {
                write!(f, "illegal free, addr not currently allocated: {:#x}", addr.0)
            }
            XbrtimeError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            XbrtimeError::TooManyPes { num_pes, max } => {
                write!(f, "{} pes requested, at most {} are supported", num_pes, max)
            }
        }
    }
}

impl std::error::Error for XbrtimeError {}

pub(crate) fn invalid_arg(msg: impl Into<String>) -> XbrtimeError {
    XbrtimeError::InvalidArgument(msg.into())
}
