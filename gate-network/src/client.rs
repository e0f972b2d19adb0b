use crate::common::{
    Channel, CHANNEL_CAPACITY, DROP_ON_OVERFLOW, INITIAL_RETRY_DELAY_MS, MAX_BUFFERED,
    MAX_RETRY_DELAY_MS,
};

use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::result::Result;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{trace, warn};
use tokio::{
    net::TcpStream,
    sync::mpsc::{channel, Receiver, Sender},
    time,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub struct Client {
    sender: Sender<(SocketAddr, Bytes)>,
    receiver: Receiver<(SocketAddr, Bytes)>,
    sender_workers: HashMap<SocketAddr, Sender<Bytes>>,
}

impl Client {
    pub fn spawn() -> Channel {
        let (sender, ret_receiver) = channel(CHANNEL_CAPACITY);
        let (ret_sender, receiver) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            Self {
                sender,
                receiver,
                sender_workers: Default::default(),
            }
            .run()
            .await;
        });
        (ret_sender, ret_receiver)
    }

    async fn run(&mut self) {
        while let Some((dest_addr, data)) = self.receiver.recv().await {
            let sender = self
                .sender_workers
                .entry(dest_addr)
                .or_insert_with(|| Connection::spawn(dest_addr, self.sender.clone()));
            if sender.send(data).await.is_err() {
                warn!("connection worker for {} is gone", dest_addr);
                self.sender_workers.remove(&dest_addr);
            }
        }
        trace!("client handle dropped, stopping");
    }
}

/// Outbound link to one remote node. A spawned link reconnects with
/// exponential backoff, buffering frames meanwhile, and lives until every
/// handle to its sender is dropped.
pub struct Connection {
    remote_addr: SocketAddr,
    sender: Sender<(SocketAddr, Bytes)>,
    receiver: Receiver<Bytes>,
    buffer: VecDeque<Bytes>,
}

impl Connection {
    pub fn spawn(remote_addr: SocketAddr, sender: Sender<(SocketAddr, Bytes)>) -> Sender<Bytes> {
        let (ret_sender, receiver) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move { Self::new(remote_addr, sender, receiver).run().await });
        ret_sender
    }

    /// Dials once and serves only that socket: no reconnect, and frames not
    /// yet written when it fails are dropped rather than replayed. The
    /// returned sender reports closed once the socket is gone.
    pub async fn connect(
        remote_addr: SocketAddr,
    ) -> Result<(Sender<Bytes>, Receiver<(SocketAddr, Bytes)>), Error> {
        let stream = TcpStream::connect(remote_addr).await?;
        let (ret_sender, receiver) = channel(CHANNEL_CAPACITY);
        let (sender, ret_receiver) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut link = Self::new(remote_addr, sender, receiver);
            match link.keep_alive(stream).await {
                Ok(()) => trace!("closing connection with {}", remote_addr),
                Err(e) => warn!("{}: {}", remote_addr, e),
            }
        });
        Ok((ret_sender, ret_receiver))
    }

    fn new(
        remote_addr: SocketAddr,
        sender: Sender<(SocketAddr, Bytes)>,
        receiver: Receiver<Bytes>,
    ) -> Self {
        Self {
            remote_addr,
            sender,
            receiver,
            buffer: Default::default(),
        }
    }

    async fn run(&mut self) {
        let mut delay = INITIAL_RETRY_DELAY_MS;
        let mut retry = 0;
        loop {
            match TcpStream::connect(self.remote_addr).await {
                Ok(stream) => {
                    trace!("Outgoing connection established with {}", self.remote_addr);

                    // Reset the delay.
                    delay = INITIAL_RETRY_DELAY_MS;
                    retry = 0;

                    // Returns Ok only once the owner has dropped its handle.
                    match self.keep_alive(stream).await {
                        Ok(()) => {
                            trace!("closing connection with {}", self.remote_addr);
                            return;
                        }
                        Err(e) => warn!("{}: {}", self.remote_addr, e),
                    }
                }
                Err(e) => {
                    warn!(
                        "connect to {}, retry {} times, reason {}",
                        self.remote_addr, retry, e
                    );
                    let timer = time::sleep(Duration::from_millis(delay));
                    tokio::pin!(timer);

                    'waiter: loop {
                        tokio::select! {
                            // Wait an increasing delay before attempting to reconnect.
                            () = &mut timer => {
                                delay = std::cmp::min(2 * delay, MAX_RETRY_DELAY_MS);
                                retry += 1;
                                break 'waiter;
                            },

                            // Drain the channel into the buffer to not saturate the channel and block the caller task.
                            request = self.receiver.recv() => match request {
                                Some(request) => {
                                    self.buffer.push_back(request);
                                    if self.buffer.len() > MAX_BUFFERED {
                                        warn!("{}: {} msg dropped", self.remote_addr, DROP_ON_OVERFLOW);
                                        self.buffer.drain(0..DROP_ON_OVERFLOW);
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }

    async fn keep_alive(&mut self, stream: TcpStream) -> Result<(), Error> {
        let (mut writer, mut reader) = Framed::new(stream, LengthDelimitedCodec::new()).split();
        while let Some(data) = self.buffer.pop_front() {
            trace!("send buffered msg to {} in keep_alive", self.remote_addr);
            writer.send(data).await?;
        }
        loop {
            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(data) => {
                        trace!("send msg to {} in keep_alive", self.remote_addr);
                        writer.send(data).await?;
                    }
                    None => return Ok(()),
                },
                frame = reader.next() => match frame {
                    Some(data) => {
                        let data = data?.freeze();
                        if self.sender.send((self.remote_addr, data)).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => {
                        return Err(Error::new(
                            ErrorKind::ConnectionReset,
                            "connection closed by remote",
                        ))
                    }
                },
            }
        }
    }
}
