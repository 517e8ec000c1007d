//! Peer wire protocol: handshake, message framing, and the piece-download
//! session.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

/// Transfer unit within a piece: peers exchange 16 KiB blocks.
pub const BLOCK_SIZE: usize = 1 << 14;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed mid-message")]
    Framing,

    #[error("Frame of {0} bytes is too large")]
    FrameTooLarge(u32),

    #[error("Handshake rejected: {0}")]
    HandshakeReject(String),

    #[error("Peer protocol violation: {0}")]
    Protocol(String),

    #[error("Piece {0} failed SHA-1 verification")]
    PieceCorrupt(u32),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
