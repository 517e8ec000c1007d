use super::TorrentResult;
use crate::bencode::{encoder, BencodeValue, Dictionary};
use sha1::Digest;
use sha1::Sha1;

/// Computes the 20-byte infohash of an `info` dictionary.
///
/// The digest is SHA-1 over the bencoded form of the dictionary. Because the
/// encoder emits entries in decoded order, the re-encoded bytes match the
/// `info` value as it appeared in the metainfo, which is what trackers and
/// peers hash.
pub fn calculate_info_hash(info_dict: &Dictionary) -> TorrentResult<[u8; 20]> {
    let encoded = encoder::encode_to_vec(&BencodeValue::Dict(info_dict.clone()))?;

    let mut hasher = Sha1::new();
    hasher.update(&encoded);

    Ok(hasher.finalize().into())
}

/// Lowercase hex rendering of a 20-byte digest.
pub fn to_hex(hash: &[u8; 20]) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode_bytes;

    // SHA-1 of the bencoded dictionary below, computed with sha1sum.
    const EXPECTED: &str = "e357b6f4f8e76987339c212a518fa35a5b9bb543";
    const INFO_BYTES: &[u8] = b"d6:lengthi32768e4:name8:test.txt12:piece lengthi16384e\
                                6:pieces40:aaaaabbbbbcccccdddddeeeeefffffggggghhhhhe";

    #[test]
    fn hashes_reencoded_info_bytes() {
        let BencodeValue::Dict(dict) = decode_bytes(INFO_BYTES).unwrap() else {
            panic!("expected a dictionary");
        };
        let hash = calculate_info_hash(&dict).unwrap();
        assert_eq!(to_hex(&hash), EXPECTED);
    }

    #[test]
    fn hash_is_deterministic() {
        let BencodeValue::Dict(dict) = decode_bytes(INFO_BYTES).unwrap() else {
            panic!("expected a dictionary");
        };
        assert_eq!(
            calculate_info_hash(&dict).unwrap(),
            calculate_info_hash(&dict).unwrap()
        );
    }
}
