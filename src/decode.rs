//! Shared `nom` plumbing for the binary formats handled by this crate:
//! certificates (COER), credential files, revocation blobs and chain files.
//!
//! All parsers run in streaming mode, so running out of input surfaces as
//! `nom::Err::Incomplete` and is reported as [`DecodeError::TooShort`] instead of
//! reading past the buffer.

use nom::{
    bytes::streaming::take,
    error::{ErrorKind, FromExternalError, ParseError},
    number::streaming::{be_u16, be_u32, be_u8},
    Needed,
};
use thiserror::Error;

use crate::error::ErrorKind as EngineErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    TooShort { needed: Option<usize> },
    #[error("invalid certificate id type {0}")]
    InvalidCertIdType(u8),
    #[error("invalid region type {0}")]
    InvalidRegionType(u8),
    #[error("invalid choice index {tag:#04x} for {field}")]
    InvalidChoice { field: &'static str, tag: u8 },
    #[error("{count} certificates exceed the maximum of {max}")]
    TooManyCert { count: usize, max: usize },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("{0} trailing bytes after end of structure")]
    TrailingData(usize),
    #[error("parser error: {0:?}")]
    Nom(ErrorKind),
}

impl DecodeError {
    #[must_use]
    pub fn kind(&self) -> EngineErrorKind {
        EngineErrorKind::Malformed
    }
}

impl<I> ParseError<I> for DecodeError {
    fn from_error_kind(_: I, kind: ErrorKind) -> Self {
        DecodeError::Nom(kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I, E> FromExternalError<I, E> for DecodeError {
    fn from_external_error(_: I, kind: ErrorKind, _: E) -> Self {
        DecodeError::Nom(kind)
    }
}

impl From<nom::Err<DecodeError>> for DecodeError {
    fn from(value: nom::Err<DecodeError>) -> Self {
        match value {
            nom::Err::Incomplete(Needed::Size(n)) => DecodeError::TooShort {
                needed: Some(n.get()),
            },
            nom::Err::Incomplete(Needed::Unknown) => DecodeError::TooShort { needed: None },
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
        }
    }
}

pub(crate) type IResult<'i, T> = nom::IResult<&'i [u8], T, DecodeError>;

/// Aborts the parse with a semantic error that must not be backtracked over
pub(crate) fn fail<T>(error: DecodeError) -> Result<T, nom::Err<DecodeError>> {
    Err(nom::Err::Failure(error))
}

pub(crate) fn uint8(input: &[u8]) -> IResult<'_, u8> {
    be_u8(input)
}

pub(crate) fn uint16(input: &[u8]) -> IResult<'_, u16> {
    be_u16(input)
}

pub(crate) fn uint32(input: &[u8]) -> IResult<'_, u32> {
    be_u32(input)
}

pub(crate) fn array<const SIZE: usize>(input: &[u8]) -> IResult<'_, [u8; SIZE]> {
    let (input, bytes) = take(SIZE)(input)?;
    let mut out = [0u8; SIZE];
    out.copy_from_slice(bytes);
    Ok((input, out))
}

/// Reads a one byte length followed by that many bytes
pub(crate) fn short_octets(input: &[u8]) -> IResult<'_, &[u8]> {
    let (input, length) = uint8(input)?;
    take(length)(input)
}

/// OER length determinant: short form below 128, otherwise `0x80 | n`
/// followed by an `n` byte big-endian length
pub(crate) fn length_determinant(input: &[u8]) -> IResult<'_, usize> {
    let (input, first) = uint8(input)?;
    if first < 0x80 {
        return Ok((input, usize::from(first)));
    }
    let count = usize::from(first & 0x7f);
    if count == 0 || count > core::mem::size_of::<usize>() {
        return fail(DecodeError::InvalidValue {
            field: "length determinant",
            reason: format!("{count} length octets are not supported"),
        });
    }
    let (input, octets) = take(count)(input)?;
    let length = octets
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
    Ok((input, length))
}

/// Context-specific CHOICE tag `0x80 | index`
pub(crate) fn choice_tag(field: &'static str) -> impl Fn(&[u8]) -> IResult<'_, u8> {
    move |input| {
        let (input, tag) = uint8(input)?;
        if tag & 0xc0 != 0x80 {
            return fail(DecodeError::InvalidChoice { field, tag });
        }
        Ok((input, tag & 0x3f))
    }
}

/// Runs a parser over the whole input, rejecting leftovers
pub(crate) fn complete<'i, T>(
    input: &'i [u8],
    parser: impl FnOnce(&'i [u8]) -> IResult<'i, T>,
) -> Result<T, DecodeError> {
    let (remaining, value) = parser(input)?;
    if remaining.is_empty() {
        Ok(value)
    } else {
        Err(DecodeError::TrailingData(remaining.len()))
    }
}
