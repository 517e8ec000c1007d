//! Length-prefixed peer messages.
//!
//! Every message is a 4-byte big-endian length prefix followed by that many
//! payload bytes; non-empty payloads start with a 1-byte id. A zero length
//! is a keep-alive. Reads and writes run to completion over the blocking
//! socket.
use super::{PeerError, PeerResult};
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::{Read, Write};

/// Ceiling on inbound frames. The largest legitimate message is a `piece`
/// carrying one 16 KiB block plus its 9-byte header.
const MAX_FRAME: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageTag::Choke),
            1 => Ok(MessageTag::Unchoke),
            2 => Ok(MessageTag::Interested),
            3 => Ok(MessageTag::NotInterested),
            4 => Ok(MessageTag::Have),
            5 => Ok(MessageTag::Bitfield),
            6 => Ok(MessageTag::Request),
            7 => Ok(MessageTag::Piece),
            8 => Ok(MessageTag::Cancel),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

/// One frame off the wire: a keep-alive, a message with an id this client
/// does not speak (payload drained so the stream stays aligned), or a
/// proper message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    KeepAlive,
    Unknown(u8),
    Message(Message),
}

impl Message {
    pub fn interested() -> Self {
        Self {
            tag: MessageTag::Interested,
            payload: Vec::new(),
        }
    }

    /// A `request` for one block: piece index, offset within the piece, and
    /// block length, all big-endian.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.put_u32(length);
        Self {
            tag: MessageTag::Request,
            payload: payload.to_vec(),
        }
    }

    /// The full frame: length prefix, id, payload.
    pub fn to_bytes(&self) -> BytesMut {
        let mut frame = BytesMut::with_capacity(4 + 1 + self.payload.len());
        frame.put_u32(self.payload.len() as u32 + 1);
        frame.put_u8(self.tag as u8);
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Payload of a `piece` message: piece index, block offset, block bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct PieceBlock<'a> {
    pub index: u32,
    pub begin: u32,
    pub block: &'a [u8],
}

impl<'a> PieceBlock<'a> {
    pub fn parse(payload: &'a [u8]) -> PeerResult<Self> {
        if payload.len() < 8 {
            return Err(PeerError::Protocol(format!(
                "piece payload of {} bytes is too short for its header",
                payload.len()
            )));
        }
        let mut index = [0u8; 4];
        index.copy_from_slice(&payload[0..4]);
        let mut begin = [0u8; 4];
        begin.copy_from_slice(&payload[4..8]);
        Ok(Self {
            index: u32::from_be_bytes(index),
            begin: u32::from_be_bytes(begin),
            block: &payload[8..],
        })
    }
}

fn eof_as_framing(err: std::io::Error) -> PeerError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        PeerError::Framing
    } else {
        PeerError::Io(err)
    }
}

/// Reads one complete frame, looping on short reads until the declared
/// length is assembled.
pub fn read_frame<R: Read>(reader: &mut R) -> PeerResult<Frame> {
    let length = reader.read_u32::<BigEndian>().map_err(eof_as_framing)?;
    if length == 0 {
        return Ok(Frame::KeepAlive);
    }
    if length > MAX_FRAME {
        return Err(PeerError::FrameTooLarge(length));
    }

    let id = reader.read_u8().map_err(eof_as_framing)?;
    let mut payload = vec![0u8; length as usize - 1];
    reader.read_exact(&mut payload).map_err(eof_as_framing)?;

    match MessageTag::try_from(id) {
        Ok(tag) => Ok(Frame::Message(Message { tag, payload })),
        Err(id) => Ok(Frame::Unknown(id)),
    }
}

/// Writes one complete frame.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> PeerResult<()> {
    writer.write_all(&message.to_bytes())?;
    writer.flush()?;
    Ok(())
}
