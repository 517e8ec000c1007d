//! Torrent file structure and parsing logic.
use crate::bencode::{decoder, BencodeValue, Dictionary};
use crate::torrent::info_hash;

use super::{TorrentError, TorrentResult};
use std::path::Path;

/// A parsed single-file metainfo.
#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub length: i64,
}

/// Splits the concatenated `pieces` blob into 20-byte SHA-1 digests.
///
/// The digest order corresponds directly to the piece index.
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_info_dict(dict: &Dictionary) -> TorrentResult<InfoDict> {
    let name = match dict.get(b"name") {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::InvalidFormat(format!("name is not UTF-8: {}", e)))?,
        Some(_) => return Err(TorrentError::InvalidFieldType("name".to_string())),
        None => return Err(TorrentError::MissingField("name".to_string())),
    };

    let piece_length = match dict.get(b"piece length") {
        Some(BencodeValue::Integer(i)) if *i > 0 => *i,
        Some(BencodeValue::Integer(_)) => {
            return Err(TorrentError::InvalidFormat(
                "piece length must be positive".to_string(),
            ));
        }
        Some(_) => return Err(TorrentError::InvalidFieldType("piece length".to_string())),
        None => return Err(TorrentError::MissingField("piece length".to_string())),
    };

    let pieces = match dict.get(b"pieces") {
        Some(BencodeValue::String(s)) => s.clone(),
        Some(_) => return Err(TorrentError::InvalidFieldType("pieces".to_string())),
        None => return Err(TorrentError::MissingField("pieces".to_string())),
    };

    // single-file mode only; a `files` list instead of `length` is unsupported
    let length = match dict.get(b"length") {
        Some(BencodeValue::Integer(i)) if *i > 0 => *i,
        Some(BencodeValue::Integer(_)) => {
            return Err(TorrentError::InvalidFormat(
                "length must be positive".to_string(),
            ));
        }
        Some(_) => return Err(TorrentError::InvalidFieldType("length".to_string())),
        None => return Err(TorrentError::MissingField("length".to_string())),
    };

    Ok(InfoDict {
        name,
        piece_length,
        pieces,
        length,
    })
}

impl TorrentFile {
    /// Reads and parses a `.torrent` file from disk.
    pub fn load(path: impl AsRef<Path>) -> TorrentResult<TorrentFile> {
        let data = std::fs::read(path)?;
        let decoded = decoder::decode_bytes(&data)?;
        Self::parse(decoded)
    }

    /// Parses a decoded metainfo tree into a `TorrentFile`.
    #[tracing::instrument(level = "debug", skip(data))]
    pub fn parse(data: BencodeValue) -> TorrentResult<TorrentFile> {
        let BencodeValue::Dict(dict) = data else {
            return Err(TorrentError::InvalidFormat(
                "root is not a dictionary".to_string(),
            ));
        };

        let announce = match dict.get(b"announce") {
            Some(BencodeValue::String(s)) => String::from_utf8(s.clone()).map_err(|e| {
                TorrentError::InvalidFormat(format!("announce URL is not UTF-8: {}", e))
            })?,
            Some(_) => return Err(TorrentError::InvalidFieldType("announce".to_string())),
            None => return Err(TorrentError::MissingField("announce".to_string())),
        };

        let info_dict = match dict.get(b"info") {
            Some(BencodeValue::Dict(d)) => d,
            Some(_) => return Err(TorrentError::InvalidFieldType("info".to_string())),
            None => return Err(TorrentError::MissingField("info".to_string())),
        };

        let info = parse_info_dict(info_dict)?;
        let info_hash = info_hash::calculate_info_hash(info_dict)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        // every piece is piece_length long except possibly the last
        let expected_pieces = (info.length + info.piece_length - 1) / info.piece_length;
        if expected_pieces != pieces_hash.len() as i64 {
            return Err(TorrentError::InvalidFormat(format!(
                "{} piece hashes for a {}-byte file with {}-byte pieces",
                pieces_hash.len(),
                info.length,
                info.piece_length
            )));
        }

        Ok(TorrentFile {
            announce,
            info,
            info_hash,
            pieces_hash,
        })
    }

    pub fn total_length(&self) -> i64 {
        self.info.length
    }

    /// Number of pieces, derived from the 20-byte digests in `pieces`.
    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Actual size of piece `index`; the last piece may be shorter than
    /// `piece length`. Returns 0 for an out-of-range index.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        let start = index as i64 * self.info.piece_length;
        self.info.piece_length.min(self.info.length - start)
    }

    pub fn info_hash_hex(&self) -> String {
        info_hash::to_hex(&self.info_hash)
    }
}
