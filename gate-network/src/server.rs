use crate::common::{Channel, FrameReader, FrameWriter, CHANNEL_CAPACITY};

use std::collections::{hash_map::Entry, HashMap};
use std::io::Error;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{error, trace, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{channel, Receiver, Sender},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Accept loop that multiplexes every inbound connection onto one channel.
pub struct Server {
    listener: TcpListener,
    sender: Sender<(SocketAddr, Bytes)>,
    receiver: Receiver<(SocketAddr, Bytes)>,
    connections: HashMap<SocketAddr, Sender<Bytes>>,
}

impl Server {
    /// Binds `host_addr` and starts serving; returns the bound address, which
    /// differs from `host_addr` when port 0 was requested.
    pub async fn bind(host_addr: SocketAddr) -> Result<(Channel, SocketAddr), Error> {
        let listener = TcpListener::bind(host_addr).await?;
        let local_addr = listener.local_addr()?;
        let (sender, ret_receiver) = channel(CHANNEL_CAPACITY);
        let (ret_sender, receiver) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            Self {
                listener,
                sender,
                receiver,
                connections: Default::default(),
            }
            .run()
            .await;
        });
        trace!("listening on {}", local_addr);
        Ok(((ret_sender, ret_receiver), local_addr))
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                connection = self.listener.accept() => {
                    match connection {
                        Ok((socket, addr)) => {
                            trace!("accept connection from {}", addr);
                            let (sender, receiver) = channel(CHANNEL_CAPACITY);
                            self.connections.insert(addr, sender);
                            Connection::spawn(addr, socket, self.sender.clone(), receiver);
                        }
                        Err(e) => error!("couldn't get client: {e:?}"),
                    }
                }
                outbound = self.receiver.recv() => {
                    let Some((addr, msg)) = outbound else {
                        trace!("server handle dropped, stopping");
                        return;
                    };
                    match self.connections.entry(addr) {
                        Entry::Occupied(entry) => {
                            trace!("sending msg to {}", addr);
                            if let Err(e) = entry.get().send(msg).await {
                                warn!("Disconnected from {}: {}", addr, e);
                                entry.remove();
                            }
                        }
                        Entry::Vacant(_) => warn!("No connection from {}", addr),
                    }
                }
            }
        }
    }
}

struct Connection {
    sender: Sender<(SocketAddr, Bytes)>,
    receiver: Receiver<Bytes>,
    remote_addr: SocketAddr,
    reader: FrameReader,
    writer: FrameWriter,
}

impl Connection {
    fn spawn(
        remote_addr: SocketAddr,
        socket: TcpStream,
        sender: Sender<(SocketAddr, Bytes)>,
        receiver: Receiver<Bytes>,
    ) {
        let (writer, reader) = Framed::new(socket, LengthDelimitedCodec::new()).split();
        tokio::spawn(async move {
            Self {
                sender,
                receiver,
                remote_addr,
                reader,
                writer,
            }
            .run()
            .await
        });
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                framed_data = self.reader.next() => {
                    match framed_data {
                        Some(Ok(data)) => {
                            trace!("received msg from: {}", self.remote_addr);
                            if self.sender.send((self.remote_addr, data.freeze())).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            error!("{}: {}", self.remote_addr, e);
                            return;
                        }
                        None => {
                            trace!("{} closed the connection", self.remote_addr);
                            return;
                        }
                    }
                },
                outbound = self.receiver.recv() => {
                    let Some(data) = outbound else { return };
                    if let Err(e) = self.writer.send(data).await {
                        warn!("Disconnected from {}: {}", self.remote_addr, e);
                        return;
                    }
                }
            }
        }
    }
}
