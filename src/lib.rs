//! Library root for torrlet, a minimal single-file BitTorrent client.
//!
//! Re-exports core modules: bencode, torrent, tracker, and peer for use in binaries and other libraries.
pub mod bencode;
pub mod peer;
pub mod torrent;
pub mod tracker;
