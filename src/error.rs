//! Errors returned by the strict read path and by writers.

use crate::binary::linked::Stake;
use crate::binary::read::ReadEof;
use std::fmt;
use std::num::TryFromIntError;

/// Why a strict parse stopped. The first problem found aborts the parse.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ParseError {
    BadEof,
    BadValue,
    BadVersion,
    BadOffset,
    BadIndex,
    LimitExceeded,
    MissingValue,
    NotImplemented,
}

impl From<ReadEof> for ParseError {
    fn from(_: ReadEof) -> Self {
        ParseError::BadEof
    }
}

impl From<TryFromIntError> for ParseError {
    fn from(_: TryFromIntError) -> Self {
        ParseError::BadValue
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ParseError::BadEof => "data ended early",
            ParseError::BadValue => "field holds an invalid value",
            ParseError::BadVersion => "unsupported format or version",
            ParseError::BadOffset => "offset out of range or out of order",
            ParseError::BadIndex => "index out of range",
            ParseError::LimitExceeded => "structure exceeds a size limit",
            ParseError::MissingValue => "required value is absent",
            ParseError::NotImplemented => "format is not supported",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ParseError {}

/// Why a write failed. These report misuse of a writer or values a format cannot hold.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum WriteError {
    BadValue,
    NotImplemented,
    PlaceholderMismatch,
    /// An offset refers to a stake that was never bound to a position.
    UnboundStake(Stake),
    /// A stake was bound to a position more than once.
    DuplicateStake(Stake),
    /// A deferred value was reserved but never filled in.
    DeferredValueUnset,
    /// A resolved offset does not fit in the field reserved for it.
    OffsetOverflow,
    /// A resolved offset is negative and negative offsets were not permitted.
    NegativeOffset,
    /// Data or an offset endpoint does not fall on the required boundary.
    Misaligned,
    /// Variable width offsets never settled on a stable layout.
    ResizeLoop,
}

impl From<TryFromIntError> for WriteError {
    fn from(_: TryFromIntError) -> Self {
        WriteError::BadValue
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::BadValue => write!(f, "value cannot be written in this format"),
            WriteError::NotImplemented => write!(f, "operation not supported by this writer"),
            WriteError::PlaceholderMismatch => {
                write!(f, "value written does not fill its reserved space exactly")
            }
            WriteError::UnboundStake(stake) => write!(f, "stake {} was never bound", stake.id()),
            WriteError::DuplicateStake(stake) => {
                write!(f, "stake {} was bound more than once", stake.id())
            }
            WriteError::DeferredValueUnset => write!(f, "deferred value was never set"),
            WriteError::OffsetOverflow => write!(f, "offset does not fit in its field"),
            WriteError::NegativeOffset => write!(f, "impermissible negative offset"),
            WriteError::Misaligned => write!(f, "data is not on the required boundary"),
            WriteError::ResizeLoop => write!(f, "offset layout did not converge"),
        }
    }
}

impl std::error::Error for WriteError {}

/// Either a read or a write error, for operations that do both.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ReadWriteError {
    Read(ParseError),
    Write(WriteError),
}

impl From<ParseError> for ReadWriteError {
    fn from(error: ParseError) -> Self {
        ReadWriteError::Read(error)
    }
}

impl From<WriteError> for ReadWriteError {
    fn from(error: WriteError) -> Self {
        ReadWriteError::Write(error)
    }
}

impl fmt::Display for ReadWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadWriteError::Read(error) => write!(f, "reading: {}", error),
            ReadWriteError::Write(error) => write!(f, "writing: {}", error),
        }
    }
}

impl std::error::Error for ReadWriteError {}
