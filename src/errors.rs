use std::io;
use thiserror::Error;

/// Everything that can go wrong while decoding a dump or querying the
/// resulting snapshot.
///
/// Decode errors inside a single heap-dump segment are recoverable: the
/// segment is abandoned and ingest resumes at the next top-level record.
/// Any other decode error aborts ingest.
#[derive(Debug, Error)]
pub enum HprofError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The underlying stream ended in the middle of a value.
    #[error("unexpected end of input in the middle of a value")]
    UnexpectedEof,

    /// The file does not start with the hprof magic.
    #[error("not an hprof file (bad header magic)")]
    BadMagic,

    #[error("unsupported identifier size {0} (must be 4 or 8)")]
    UnsupportedIdSize(u32),

    /// A bounded record body ran out before its decoder finished.
    #[error("record body exhausted before decoding finished")]
    ShortRecord,

    /// An unknown sub-tag or inconsistent length inside a heap-dump segment.
    #[error("corrupt heap dump segment: {0}")]
    CorruptHeapSegment(String),

    /// An id that was expected to resolve did not.
    #[error("unresolved reference to object id {0:#x}")]
    UnresolvedReference(u64),

    /// An instance payload was shorter than its class chain declares.
    #[error("instance {0:#x} payload too short for its declared fields")]
    TruncatedInstance(u64),

    /// Content past the last framed record.
    #[error("{0} trailing bytes after the last framed record")]
    TrailingBytes(usize),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T, E = HprofError> = std::result::Result<T, E>;

// nom plumbing failures all amount to "the input ran out"; context decides
// whether that is `UnexpectedEof` (unbounded input) or `ShortRecord`
// (a bounded record body).
impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for HprofError {
    fn from(_: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        HprofError::UnexpectedEof
    }
}

impl HprofError {
    /// Reinterpret an EOF inside a bounded body as a short record.
    pub(crate) fn in_bounded_body(self) -> Self {
        match self {
            HprofError::UnexpectedEof => HprofError::ShortRecord,
            other => other,
        }
    }
}
