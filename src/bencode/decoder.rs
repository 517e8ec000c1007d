use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use super::Dictionary;

use std::io::{self, Read};
use std::iter::Peekable;
use tracing::instrument;

fn next_byte<R: Read>(reader: &mut Peekable<io::Bytes<R>>) -> BencodeResult<u8> {
    reader
        .next()
        .ok_or(BencodeError::UnexpectedEOI)?
        .map_err(BencodeError::Io)
}

fn peek_byte<R: Read>(reader: &mut Peekable<io::Bytes<R>>) -> BencodeResult<u8> {
    match reader.peek() {
        Some(Ok(byte)) => Ok(*byte),
        // consume the pending error so we can own it
        Some(Err(_)) => match reader.next() {
            Some(Err(err)) => Err(BencodeError::Io(err)),
            _ => Err(BencodeError::UnexpectedEOI),
        },
        None => Err(BencodeError::UnexpectedEOI),
    }
}

/// Reads bytes until `delimiter`, consuming it, and returns the collected
/// bytes as a string. Used for the ASCII-decimal length and integer bodies.
fn read_until<R: Read>(
    reader: &mut Peekable<io::Bytes<R>>,
    delimiter: u8,
) -> BencodeResult<String> {
    let mut buffer = Vec::new();
    loop {
        let byte = next_byte(reader)?;
        if byte == delimiter {
            break;
        }
        buffer.push(byte);
    }
    String::from_utf8(buffer).map_err(|e| {
        BencodeError::InvalidFormat(format!("non-ASCII bytes in length/integer: {}", e))
    })
}

/// Decodes a byte string in the form `<length>:<bytes>`.
///
/// The bytes after the colon are copied verbatim; a bencode string is a
/// binary blob, not UTF-8 text.
#[instrument(skip(reader), level = "trace")]
pub fn decode_string<R: Read>(
    reader: &mut Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<u8>> {
    let length_str = read_until(reader, b':')?;
    let length = length_str
        .parse::<usize>()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    // capped preallocation: a corrupt length must not commit memory upfront
    let mut string_bytes = Vec::with_capacity(length.min(8 * 1024));
    for _ in 0..length {
        string_bytes.push(next_byte(reader)?);
    }
    Ok(string_bytes)
}

/// Decodes an integer in the form `i<decimal>e`.
///
/// Strict: rejects an empty body, `-0`, and leading zeros other than `0`
/// itself. Values must fit a signed 64-bit integer.
#[instrument(skip(reader), level = "trace")]
pub fn decode_integer<R: Read>(reader: &mut Peekable<io::Bytes<R>>) -> BencodeResult<i64> {
    let first_byte = next_byte(reader)?;
    if first_byte != b'i' {
        return Err(BencodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }

    let num_str = read_until(reader, b'e')?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.starts_with("-0") {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.len() > 1 && num_str.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }

    num_str
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger)
}

/// Decodes a list in the form `l<items>e`.
#[instrument(skip(reader), level = "trace")]
fn decode_list<R: Read>(
    reader: &mut Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<BencodeValue>> {
    let first_byte = next_byte(reader)?;
    if first_byte != b'l' {
        return Err(BencodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }

    let mut list = Vec::new();
    while peek_byte(reader)? != b'e' {
        list.push(decode_value(reader)?);
    }
    next_byte(reader)?; // consume the 'e'

    Ok(list)
}

/// Decodes a dictionary in the form `d<key><value>...e`.
///
/// Keys must be byte strings. Entries are recorded in the order they appear
/// so that re-encoding reproduces the source bytes.
#[instrument(skip(reader), level = "trace")]
fn decode_dict<R: Read>(reader: &mut Peekable<io::Bytes<R>>) -> BencodeResult<Dictionary> {
    let first_byte = next_byte(reader)?;
    if first_byte != b'd' {
        return Err(BencodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }

    let mut dict = Dictionary::new();
    loop {
        let current_byte = peek_byte(reader)?;
        if current_byte == b'e' {
            next_byte(reader)?;
            break;
        }
        if !current_byte.is_ascii_digit() {
            return Err(BencodeError::DictKeyNotString);
        }

        let key = decode_string(reader)?;
        let value = decode_value(reader)?;
        dict.insert(key, value);
    }

    Ok(dict)
}

/// Decodes the next value in the stream; the first byte selects the kind.
#[instrument(skip(reader), level = "trace")]
pub fn decode_value<R: Read>(
    reader: &mut Peekable<io::Bytes<R>>,
) -> BencodeResult<BencodeValue> {
    match peek_byte(reader)? {
        b'0'..=b'9' => decode_string(reader).map(BencodeValue::String),
        b'i' => decode_integer(reader).map(BencodeValue::Integer),
        b'l' => decode_list(reader).map(BencodeValue::List),
        b'd' => decode_dict(reader).map(BencodeValue::Dict),
        other => Err(BencodeError::InvalidFormat(format!(
            "unexpected byte: 0x{:02x}",
            other
        ))),
    }
}

/// Decodes a single value from a byte slice.
pub fn decode_bytes(data: &[u8]) -> BencodeResult<BencodeValue> {
    let mut reader = data.bytes().peekable();
    decode_value(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_byte_string() {
        assert_eq!(
            decode_bytes(b"5:hello").unwrap(),
            BencodeValue::String(b"hello".to_vec())
        );
    }

    #[test]
    fn decodes_binary_string_with_nul_bytes() {
        assert_eq!(
            decode_bytes(b"4:\x00\xff\x00\x01").unwrap(),
            BencodeValue::String(vec![0x00, 0xff, 0x00, 0x01])
        );
    }

    #[test]
    fn decodes_integers() {
        assert_eq!(decode_bytes(b"i52e").unwrap(), BencodeValue::Integer(52));
        assert_eq!(decode_bytes(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode_bytes(b"i0e").unwrap(), BencodeValue::Integer(0));
        assert_eq!(
            decode_bytes(b"i9223372036854775807e").unwrap(),
            BencodeValue::Integer(i64::MAX)
        );
    }

    #[test]
    fn rejects_malformed_integers() {
        assert!(matches!(
            decode_bytes(b"i-0e"),
            Err(BencodeError::InvalidInteger)
        ));
        assert!(matches!(
            decode_bytes(b"i03e"),
            Err(BencodeError::InvalidInteger)
        ));
        assert!(matches!(
            decode_bytes(b"i-042e"),
            Err(BencodeError::InvalidInteger)
        ));
        assert!(matches!(
            decode_bytes(b"ie"),
            Err(BencodeError::InvalidInteger)
        ));
        // one past i64::MAX
        assert!(matches!(
            decode_bytes(b"i9223372036854775808e"),
            Err(BencodeError::InvalidInteger)
        ));
    }

    #[test]
    fn decodes_list() {
        assert_eq!(
            decode_bytes(b"l5:helloi52ee").unwrap(),
            BencodeValue::List(vec![
                BencodeValue::String(b"hello".to_vec()),
                BencodeValue::Integer(52),
            ])
        );
    }

    #[test]
    fn decodes_dict_preserving_order() {
        let value = decode_bytes(b"d3:foo3:bar5:helloi52ee").unwrap();
        let BencodeValue::Dict(dict) = value else {
            panic!("expected a dictionary");
        };
        assert_eq!(dict.get(b"foo"), Some(&BencodeValue::String(b"bar".to_vec())));
        assert_eq!(dict.get(b"hello"), Some(&BencodeValue::Integer(52)));
        assert_eq!(dict.entries()[0].0, b"foo".to_vec());
        assert_eq!(dict.entries()[1].0, b"hello".to_vec());
    }

    #[test]
    fn decodes_unsorted_dict_as_seen() {
        let value = decode_bytes(b"d1:b1:x1:a1:ye").unwrap();
        let BencodeValue::Dict(dict) = value else {
            panic!("expected a dictionary");
        };
        let keys: Vec<&[u8]> = dict.entries().iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b".as_slice(), b"a".as_slice()]);
    }

    #[test]
    fn rejects_non_string_dict_key() {
        assert!(matches!(
            decode_bytes(b"di1e3:fooe"),
            Err(BencodeError::DictKeyNotString)
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(matches!(
            decode_bytes(b"5:hel"),
            Err(BencodeError::UnexpectedEOI)
        ));
        assert!(matches!(
            decode_bytes(b"l5:hello"),
            Err(BencodeError::UnexpectedEOI)
        ));
        assert!(matches!(
            decode_bytes(b"d3:foo"),
            Err(BencodeError::UnexpectedEOI)
        ));
    }

    #[test]
    fn rejects_unexpected_leading_byte() {
        assert!(matches!(
            decode_bytes(b"x"),
            Err(BencodeError::InvalidFormat(_))
        ));
    }
}
