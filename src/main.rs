use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use torrlet::bencode::decoder;
use torrlet::peer::session::PeerSession;
use torrlet::torrent::file::TorrentFile;
use torrlet::tracker::Client;
use tracing_subscriber::EnvFilter;

/// Port announced to the tracker. Nothing listens on it; this client only
/// makes outbound connections.
const CLIENT_PORT: u16 = 6881;

#[derive(Debug, Parser)]
#[command(name = "torrlet", about = "A minimal single-file BitTorrent client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "snake_case")]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode { value: String },
    /// Print tracker URL, length, infohash and piece hashes of a torrent
    Info { torrent: PathBuf },
    /// Ask the tracker for peers and print their endpoints
    Peers { torrent: PathBuf },
    /// Handshake with one peer and print its peer id
    Handshake { torrent: PathBuf, peer: String },
    /// Download a single verified piece to a file
    DownloadPiece {
        #[arg(short = 'o', value_name = "OUT")]
        output: PathBuf,
        torrent: PathBuf,
        piece: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decode { value } => {
            let decoded = decoder::decode_bytes(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }
        Command::Info { torrent } => {
            let torrent = TorrentFile::load(&torrent)?;
            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.total_length());
            println!("Info Hash: {}", torrent.info_hash_hex());
            println!("Piece Length: {}", torrent.info.piece_length);
            println!("Piece Hashes:");
            for hash in &torrent.pieces_hash {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = TorrentFile::load(&torrent)?;
            let client = Client::new(CLIENT_PORT);
            let response = client.announce(&torrent)?;
            for peer in response.peers {
                println!("{peer}");
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = TorrentFile::load(&torrent)?;
            let addr: SocketAddrV4 = peer
                .parse()
                .with_context(|| format!("peer must be <ip>:<port>, got {peer:?}"))?;
            let client = Client::new(CLIENT_PORT);
            let session = PeerSession::connect(addr, torrent.info_hash, client.peer_id())?;
            println!("Peer ID: {}", hex::encode(session.remote_peer_id()));
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let torrent = TorrentFile::load(&torrent)?;
            anyhow::ensure!(
                (piece as usize) < torrent.num_pieces(),
                "piece {piece} out of range: torrent has {} pieces",
                torrent.num_pieces()
            );

            let client = Client::new(CLIENT_PORT);
            let response = client.announce(&torrent)?;
            let addr = response
                .peers
                .first()
                .context("tracker returned no peers")?;

            let mut session = PeerSession::connect(*addr, torrent.info_hash, client.peer_id())?;
            let length = torrent.piece_size(piece as usize) as usize;
            let expected = torrent.pieces_hash[piece as usize];
            let bytes = session.download_piece(piece, length, expected)?;

            // bytes only reach disk after the hash check passed
            std::fs::write(&output, &bytes)
                .with_context(|| format!("write piece to {}", output.display()))?;
            println!("Piece {piece} downloaded to {}.", output.display());
        }
    }
    Ok(())
}
