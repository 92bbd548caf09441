//! String framing shared by the history record codec.
//!
//! Strings are a `u32` byte length followed by UTF-8. Optional strings carry a presence byte.

use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, ReadExt, Write};

/// Size of the length prefix in front of every string.
const LEN_PREFIX: usize = u32::SIZE;

pub fn write_string(value: &str, writer: &mut impl BufMut) {
    (value.len() as u32).write(writer);
    writer.put_slice(value.as_bytes());
}

/// Reads a string of at most `max_len` bytes.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    match len {
        len if len > max_len => Err(Error::Invalid("String", "too long")),
        len if reader.remaining() < len => Err(Error::EndOfBuffer),
        len => String::from_utf8(reader.copy_to_bytes(len).to_vec())
            .map_err(|_| Error::Invalid("String", "invalid UTF-8")),
    }
}

pub fn string_encode_size(value: &str) -> usize {
    LEN_PREFIX + value.len()
}

pub fn write_opt_string(value: Option<&str>, writer: &mut impl BufMut) {
    match value {
        Some(value) => {
            1u8.write(writer);
            write_string(value, writer);
        }
        None => 0u8.write(writer),
    }
}

/// Inverse of [write_opt_string].
pub fn read_opt_string(reader: &mut impl Buf, max_len: usize) -> Result<Option<String>, Error> {
    match u8::read(reader)? {
        0 => Ok(None),
        1 => read_string(reader, max_len).map(Some),
        i => Err(Error::InvalidEnum(i)),
    }
}

pub fn opt_string_encode_size(value: Option<&str>) -> usize {
    1 + value.map_or(0, string_encode_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn oversized_and_truncated_strings_fail() {
        let mut buf = BytesMut::new();
        write_string("player-7", &mut buf);
        let err = read_string(&mut buf.as_ref(), 4).unwrap_err();
        assert!(matches!(err, Error::Invalid("String", "too long")));

        // Claims eight bytes, carries three.
        let truncated = &buf[..LEN_PREFIX + 3];
        let err = read_string(&mut &truncated[..], 16).unwrap_err();
        assert!(matches!(err, Error::EndOfBuffer));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf = BytesMut::new();
        2u32.write(&mut buf);
        buf.extend_from_slice(&[0xff, 0xfe]);
        let err = read_string(&mut buf.as_ref(), 16).unwrap_err();
        assert!(matches!(err, Error::Invalid("String", "invalid UTF-8")));
    }

    #[test]
    fn optional_strings_keep_absence() {
        let mut buf = BytesMut::new();
        write_opt_string(None, &mut buf);
        write_opt_string(Some("p-2"), &mut buf);
        assert_eq!(
            buf.len(),
            opt_string_encode_size(None) + opt_string_encode_size(Some("p-2"))
        );

        let mut reader = buf.as_ref();
        assert_eq!(read_opt_string(&mut reader, 8).unwrap(), None);
        assert_eq!(
            read_opt_string(&mut reader, 8).unwrap(),
            Some("p-2".to_string())
        );
    }
}
