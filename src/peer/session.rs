//! One blocking session against one peer.
//!
//! The session owns the socket from connect until the piece is verified,
//! then closes. Suspension points are only the blocking reads and writes on
//! the stream; there is no event loop and no second peer.
use super::handshake::Handshake;
use super::message::{self, Frame, Message, MessageTag, PieceBlock};
use super::{PeerError, PeerResult, BLOCK_SIZE};
use sha1::{Digest, Sha1};
use std::io::{Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// A dead peer should fail the invocation, not hang it.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakePending,
    AwaitingBitfield,
    AwaitingUnchoke,
    Downloading,
    Closed,
}

pub struct PeerSession {
    stream: TcpStream,
    state: SessionState,
    remote_peer_id: [u8; 20],
}

impl PeerSession {
    /// Connects to the peer and completes the 68-byte handshake exchange.
    ///
    /// On return the session is waiting for the peer's bitfield. The remote
    /// peer id is captured; nothing is required of it.
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub fn connect(
        addr: SocketAddrV4,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut session = Self {
            stream,
            state: SessionState::Connecting,
            remote_peer_id: [0u8; 20],
        };
        session.exchange_handshake(info_hash, peer_id)?;
        Ok(session)
    }

    fn exchange_handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) -> PeerResult<()> {
        let ours = Handshake::new(info_hash, peer_id);
        self.stream.write_all(&ours.serialize())?;
        self.state = SessionState::HandshakePending;

        let mut buf = [0u8; 68];
        self.stream.read_exact(&mut buf)?;
        let theirs = Handshake::parse(&buf)?;
        theirs.validate(&info_hash)?;

        self.remote_peer_id = theirs.peer_id;
        self.state = SessionState::AwaitingBitfield;
        debug!(remote = %hex::encode(theirs.peer_id), "handshake complete");
        Ok(())
    }

    pub fn remote_peer_id(&self) -> [u8; 20] {
        self.remote_peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reads frames until one carries `expected`, skipping keep-alives and
    /// messages the session is not waiting on.
    fn wait_for(&mut self, expected: MessageTag) -> PeerResult<Message> {
        loop {
            match message::read_frame(&mut self.stream)? {
                Frame::KeepAlive => trace!("keep-alive"),
                Frame::Unknown(id) => trace!(id, "skipping message with unknown id"),
                Frame::Message(message) if message.tag == expected => return Ok(message),
                Frame::Message(message) => {
                    trace!(tag = ?message.tag, "skipping message")
                }
            }
        }
    }

    /// Downloads one piece of `length` bytes and verifies it against
    /// `expected_hash`. The session is closed afterwards either way.
    #[instrument(level = "debug", skip(self, expected_hash))]
    pub fn download_piece(
        &mut self,
        index: u32,
        length: usize,
        expected_hash: [u8; 20],
    ) -> PeerResult<Vec<u8>> {
        let result = self.run_download(index, length, expected_hash);
        self.state = SessionState::Closed;
        result
    }

    fn run_download(
        &mut self,
        index: u32,
        length: usize,
        expected_hash: [u8; 20],
    ) -> PeerResult<Vec<u8>> {
        // The bitfield payload is not interpreted: this client targets one
        // piece on a peer the tracker just advertised for the torrent.
        if self.state == SessionState::AwaitingBitfield {
            self.wait_for(MessageTag::Bitfield)?;
            message::write_message(&mut self.stream, &Message::interested())?;
            self.state = SessionState::AwaitingUnchoke;
        }
        if self.state == SessionState::AwaitingUnchoke {
            self.wait_for(MessageTag::Unchoke)?;
            self.state = SessionState::Downloading;
            debug!("unchoked, starting block requests");
        }
        if self.state != SessionState::Downloading {
            return Err(PeerError::Protocol(format!(
                "session cannot download in state {:?}",
                self.state
            )));
        }

        let mut piece = vec![0u8; length];
        let block_count = (length + BLOCK_SIZE - 1) / BLOCK_SIZE;
        for block_index in 0..block_count {
            let begin = block_index * BLOCK_SIZE;
            let block_length = BLOCK_SIZE.min(length - begin);

            message::write_message(
                &mut self.stream,
                &Message::request(index, begin as u32, block_length as u32),
            )?;

            let response = self.wait_for(MessageTag::Piece)?;
            let block = PieceBlock::parse(&response.payload)?;
            if block.index != index || block.begin != begin as u32 {
                return Err(PeerError::Protocol(format!(
                    "got block {}:{} while waiting for {}:{}",
                    block.index, block.begin, index, begin
                )));
            }
            if block.block.len() != block_length {
                return Err(PeerError::Protocol(format!(
                    "block of {} bytes, requested {}",
                    block.block.len(),
                    block_length
                )));
            }

            piece[begin..begin + block_length].copy_from_slice(block.block);
            trace!(block_index, block_length, "block received");
        }

        let digest: [u8; 20] = Sha1::digest(&piece).into();
        if digest != expected_hash {
            return Err(PeerError::PieceCorrupt(index));
        }
        debug!(index, length, "piece verified");
        Ok(piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
    use std::thread;

    const INFO_HASH: [u8; 20] = [0x11; 20];
    const REMOTE_ID: [u8; 20] = *b"-XX0001-qrstuvwxyz12";
    const LOCAL_ID: [u8; 20] = *b"-TL0001-abcdefghijkl";

    /// Runs a scripted peer on loopback and returns its address. `serve`
    /// gets the accepted stream after our side's handshake was read.
    fn scripted_peer(
        handshake_reply: Vec<u8>,
        serve: impl FnOnce(TcpStream) + Send + 'static,
    ) -> SocketAddrV4 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut ours = [0u8; 68];
            stream.read_exact(&mut ours).unwrap();
            assert_eq!(ours[0], 19);
            assert_eq!(&ours[28..48], &INFO_HASH);
            stream.write_all(&handshake_reply).unwrap();
            serve(stream);
        });
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    fn frame(tag: MessageTag, payload: &[u8]) -> Vec<u8> {
        Message {
            tag,
            payload: payload.to_vec(),
        }
        .to_bytes()
        .to_vec()
    }

    #[test]
    fn handshake_echo_succeeds() {
        let reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize().to_vec();
        let addr = scripted_peer(reply, |_stream| {});
        let session = PeerSession::connect(addr, INFO_HASH, LOCAL_ID).unwrap();
        assert_eq!(session.remote_peer_id(), REMOTE_ID);
        assert_eq!(session.state(), SessionState::AwaitingBitfield);
    }

    #[test]
    fn foreign_info_hash_is_rejected() {
        let reply = Handshake::new([0x22; 20], REMOTE_ID).serialize().to_vec();
        let addr = scripted_peer(reply, |_stream| {});
        assert!(matches!(
            PeerSession::connect(addr, INFO_HASH, LOCAL_ID),
            Err(PeerError::HandshakeReject(_))
        ));
    }

    #[test]
    fn foreign_protocol_string_is_rejected() {
        let mut reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize().to_vec();
        reply[1..20].copy_from_slice(b"BitTorrent protocoL");
        let addr = scripted_peer(reply, |_stream| {});
        assert!(matches!(
            PeerSession::connect(addr, INFO_HASH, LOCAL_ID),
            Err(PeerError::HandshakeReject(_))
        ));
    }

    /// Serves a whole piece block by block, reading each request and
    /// answering it from `piece`, optionally corrupting the payload.
    fn serve_piece(piece: Vec<u8>, corrupt: bool) -> impl FnOnce(TcpStream) + Send + 'static {
        move |mut stream: TcpStream| {
            // keep-alive first so the client has something to skip
            stream.write_all(&[0, 0, 0, 0]).unwrap();
            stream
                .write_all(&frame(MessageTag::Bitfield, &[0b1000_0000]))
                .unwrap();

            let mut interested = [0u8; 5];
            stream.read_exact(&mut interested).unwrap();
            assert_eq!(interested, [0, 0, 0, 1, 2]);
            stream.write_all(&frame(MessageTag::Unchoke, &[])).unwrap();

            let block_count = (piece.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
            for _ in 0..block_count {
                let mut request = [0u8; 17];
                stream.read_exact(&mut request).unwrap();
                assert_eq!(&request[0..5], &[0, 0, 0, 13, 6]);
                let begin =
                    u32::from_be_bytes([request[9], request[10], request[11], request[12]])
                        as usize;
                let length =
                    u32::from_be_bytes([request[13], request[14], request[15], request[16]])
                        as usize;

                let mut payload = Vec::with_capacity(8 + length);
                payload.extend_from_slice(&request[5..9]); // echo the piece index
                payload.extend_from_slice(&(begin as u32).to_be_bytes());
                payload.extend_from_slice(&piece[begin..begin + length]);
                if corrupt {
                    let last = payload.len() - 1;
                    payload[last] ^= 0xFF;
                }
                stream
                    .write_all(&frame(MessageTag::Piece, &payload))
                    .unwrap();
            }
        }
    }

    fn patterned_piece(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn downloads_and_verifies_a_piece() {
        // three blocks, the last one short
        let piece = patterned_piece(2 * BLOCK_SIZE + 1000);
        let expected: [u8; 20] = Sha1::digest(&piece).into();

        let reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize().to_vec();
        let addr = scripted_peer(reply, serve_piece(piece.clone(), false));

        let mut session = PeerSession::connect(addr, INFO_HASH, LOCAL_ID).unwrap();
        let downloaded = session.download_piece(0, piece.len(), expected).unwrap();
        assert_eq!(downloaded, piece);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn downloads_a_piece_shorter_than_one_block() {
        let piece = patterned_piece(1000);
        let expected: [u8; 20] = Sha1::digest(&piece).into();

        let reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize().to_vec();
        let addr = scripted_peer(reply, serve_piece(piece.clone(), false));

        let mut session = PeerSession::connect(addr, INFO_HASH, LOCAL_ID).unwrap();
        assert_eq!(
            session.download_piece(0, piece.len(), expected).unwrap(),
            piece
        );
    }

    #[test]
    fn corrupted_piece_is_detected() {
        let piece = patterned_piece(BLOCK_SIZE + 500);
        let expected: [u8; 20] = Sha1::digest(&piece).into();

        let reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize().to_vec();
        let addr = scripted_peer(reply, serve_piece(piece.clone(), true));

        let mut session = PeerSession::connect(addr, INFO_HASH, LOCAL_ID).unwrap();
        assert!(matches!(
            session.download_piece(0, piece.len(), expected),
            Err(PeerError::PieceCorrupt(0))
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
