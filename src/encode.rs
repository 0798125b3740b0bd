use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{field} does not fit into {max} ({found})")]
    TooLong {
        field: &'static str,
        max: usize,
        found: usize,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub trait Encode {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError>;

    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut output = BytesMut::new();
        self.encode(&mut output)?;
        Ok(output.to_vec())
    }
}

/// Writes a one byte count, failing if `count` does not fit
pub(crate) fn put_count(
    output: &mut BytesMut,
    field: &'static str,
    count: usize,
) -> Result<(), EncodeError> {
    let count = u8::try_from(count).map_err(|_| EncodeError::TooLong {
        field,
        max: usize::from(u8::MAX),
        found: count,
    })?;
    output.put_u8(count);
    Ok(())
}

/// Writes a two byte size, failing if `size` does not fit
pub(crate) fn put_size(
    output: &mut BytesMut,
    field: &'static str,
    size: usize,
) -> Result<(), EncodeError> {
    let size = u16::try_from(size).map_err(|_| EncodeError::TooLong {
        field,
        max: usize::from(u16::MAX),
        found: size,
    })?;
    output.put_u16(size);
    Ok(())
}

/// OER length determinant
pub(crate) fn put_length_determinant(output: &mut BytesMut, length: usize) {
    if length < 0x80 {
        // `length` fits into seven bits here
        output.put_u8(length as u8);
        return;
    }
    let octets = length.to_be_bytes();
    let skip = octets.iter().take_while(|b| **b == 0).count();
    let significant = &octets[skip..];
    output.put_u8(0x80 | significant.len() as u8);
    output.put_slice(significant);
}
