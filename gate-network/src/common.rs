use std::net::SocketAddr;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use tokio::{
    net::TcpStream,
    sync::mpsc::{Receiver, Sender},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

pub type FrameWriter = SplitSink<FramedStream, Bytes>;
pub type FrameReader = SplitStream<FramedStream>;

pub type Channel = (Sender<(SocketAddr, Bytes)>, Receiver<(SocketAddr, Bytes)>);

pub(crate) const CHANNEL_CAPACITY: usize = 1000;
/// Frames kept while a link is down; the oldest `DROP_ON_OVERFLOW` go first.
pub(crate) const MAX_BUFFERED: usize = 1000;
pub(crate) const DROP_ON_OVERFLOW: usize = 400;
pub(crate) const INITIAL_RETRY_DELAY_MS: u64 = 200;
pub(crate) const MAX_RETRY_DELAY_MS: u64 = 60_000;
