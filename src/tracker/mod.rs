//! HTTP tracker client.
//!
//! Builds the announce request, performs the GET, and parses the peer list
//! out of the bencoded response. Compact (6 bytes per peer) and dictionary
//! peer lists are both accepted.
use crate::torrent::file::TorrentFile;
use rand::Rng;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid announce URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracker returned HTTP {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Tracker reported failure: {0}")]
    Failure(String),

    #[error("Malformed tracker response: {0}")]
    Protocol(String),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Represents a client communicating with a BitTorrent tracker.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// Contains the parameters for a tracker announce request.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub compact: bool,
}

/// Contains the parsed response from a tracker.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<SocketAddrV4>,
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Option<Peers>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(serde_bytes::ByteBuf),
    NonCompact(Vec<PeerDict>),
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker to get a list of peers.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub fn announce(&self, torrent: &TorrentFile) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash: torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            left: torrent.total_length(),
            compact: true,
        };
        let url = announce_url(&torrent.announce, &request)?;
        tracing::debug!(%url, "announcing to tracker");

        let response = reqwest::blocking::get(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::HttpStatus(status));
        }
        let body = response.bytes()?;
        parse_announce_response(&body)
    }
}

/// Builds the announce URL with its query parameters.
///
/// The raw-byte parameters are percent-encoded by hand and the query string
/// is attached pre-built: query-pair APIs would escape the `%` signs of the
/// already-encoded info hash a second time.
fn announce_url(announce: &str, request: &AnnounceRequest) -> TrackerResult<Url> {
    let mut url = Url::parse(announce)?;
    let params = [
        ("info_hash", url_encode(&request.info_hash)),
        ("peer_id", url_encode(&request.peer_id)),
        ("port", request.port.to_string()),
        ("uploaded", request.uploaded.to_string()),
        ("downloaded", request.downloaded.to_string()),
        ("left", request.left.to_string()),
        ("compact", (request.compact as u8).to_string()),
    ];
    let query = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&query));
    Ok(url)
}

fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
    let response: TrackerResponse = serde_bencode::from_bytes(bytes)
        .map_err(|e| TrackerError::Protocol(e.to_string()))?;

    if let Some(reason) = response.failure_reason {
        return Err(TrackerError::Failure(reason));
    }

    let peers = match response.peers {
        Some(Peers::Compact(bytes)) => parse_compact_peers(&bytes)?,
        Some(Peers::NonCompact(dicts)) => dicts
            .iter()
            .filter_map(|peer| {
                peer.ip
                    .parse::<Ipv4Addr>()
                    .ok()
                    .map(|ip| SocketAddrV4::new(ip, peer.port))
            })
            .collect(),
        None => {
            return Err(TrackerError::Protocol(
                "response carries no peers".to_string(),
            ));
        }
    };

    Ok(AnnounceResponse {
        interval: response.interval,
        peers,
    })
}

/// Parses the compact peer list: 6 bytes per peer, a 4-byte IPv4 address
/// followed by a big-endian port.
pub fn parse_compact_peers(bytes: &[u8]) -> TrackerResult<Vec<SocketAddrV4>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::Protocol(format!(
            "compact peer list of {} bytes is not a multiple of 6",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

/// Generates a unique peer ID for this client: an ASCII client prefix
/// followed by random bytes, regenerated every run.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-TL0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// URL-encodes a byte slice according to RFC 3986.
///
/// Unreserved characters (a-z, A-Z, 0-9, -, ., _, ~) are left as-is, all
/// other bytes become %XX with uppercase hex.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}
