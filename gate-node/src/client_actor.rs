use crate::config::{NodeConfig, NodeRole};
use crate::orderer::Sequencer;
use crate::peer::Peer;

use gate_common::{NodeId, NodeRequest, NodeResponse};
use gate_network::{Channel, Client, Server};

use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender};

enum Service {
    Peer(Peer),
    Orderer {
        sequencer: Sequencer,
        deliver_to: Vec<SocketAddr>,
        network: Channel,
    },
}

pub struct NodeActor {
    name: NodeId,
    service: Service,
    net_sender: Sender<(SocketAddr, Bytes)>,
    net_receiver: Receiver<(SocketAddr, Bytes)>,
}

impl NodeActor {
    /// Binds the listen address and starts serving; returns the bound address.
    pub async fn spawn(config: NodeConfig) -> Result<SocketAddr> {
        let service = match config.role {
            NodeRole::Peer => {
                let keypair = config
                    .keypair
                    .ok_or_else(|| anyhow!("{}: peer keypair not loaded", config.name))?;
                Service::Peer(Peer::new(
                    config.name.clone(),
                    keypair,
                    config.reject_functions,
                ))
            }
            NodeRole::Orderer => Service::Orderer {
                sequencer: Sequencer::default(),
                deliver_to: config.deliver_to,
                network: Client::spawn(),
            },
        };
        let ((net_sender, net_receiver), addr) = Server::bind(config.listen_addr).await?;
        info!("{} serving as {:?} on {}", config.name, config.role, addr);
        tokio::spawn(async move {
            Self {
                name: config.name,
                service,
                net_sender,
                net_receiver,
            }
            .run()
            .await
        });
        Ok(addr)
    }

    async fn run(&mut self) {
        while let Some((addr, frame)) = self.net_receiver.recv().await {
            let request = match NodeRequest::try_from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!("{}: undecodable frame from {}: {}", self.name, addr, e);
                    continue;
                }
            };
            for (to, response) in self.handle(addr, request).await {
                self.reply(to, response).await;
            }
        }
        trace!("{}: server stopped", self.name);
    }

    async fn handle(
        &mut self,
        addr: SocketAddr,
        request: NodeRequest,
    ) -> Vec<(SocketAddr, NodeResponse)> {
        match (&mut self.service, request) {
            (Service::Peer(peer), NodeRequest::Propose { id, proposal }) => {
                let endorsement = peer.endorse(&proposal);
                vec![(addr, NodeResponse::ProposalResponse { id, endorsement })]
            }
            (Service::Peer(peer), NodeRequest::RegisterTx { tx_id }) => {
                trace!("{}: {} waits for {}", peer.name(), addr, tx_id);
                peer.register(addr, tx_id)
                    .map(|event| vec![(addr, event)])
                    .unwrap_or_default()
            }
            (Service::Peer(peer), NodeRequest::UnregisterTx { tx_id }) => {
                peer.unregister(addr, &tx_id);
                Vec::new()
            }
            (Service::Peer(peer), NodeRequest::Deliver { envelope }) => {
                let (code, events) = peer.commit(&envelope);
                debug!("{}: block from {} validated as {}", peer.name(), addr, code);
                events
            }
            (
                Service::Orderer {
                    sequencer,
                    deliver_to,
                    network,
                },
                NodeRequest::Broadcast { id, envelope },
            ) => {
                let (status, info) = sequencer.order(&envelope);
                if status.is_success() {
                    match (NodeRequest::Deliver { envelope }).try_to_vec() {
                        Ok(frame) => {
                            let frame = Bytes::from(frame);
                            for peer in deliver_to.iter() {
                                if network.0.send((*peer, frame.clone())).await.is_err() {
                                    error!("{}: delivery network is gone", self.name);
                                }
                            }
                        }
                        Err(e) => error!("{}: encode delivery: {}", self.name, e),
                    }
                }
                vec![(addr, NodeResponse::BroadcastResponse { id, status, info })]
            }
            (_, NodeRequest::Propose { id, .. }) | (_, NodeRequest::Broadcast { id, .. }) => {
                warn!("{}: {} sent a request this role does not serve", self.name, addr);
                let message = format!("{} does not serve this request", self.name);
                vec![(addr, NodeResponse::Failure { id, message })]
            }
            (_, request) => {
                warn!("{}: ignoring {:?} from {}", self.name, request, addr);
                Vec::new()
            }
        }
    }

    async fn reply(&self, to: SocketAddr, response: NodeResponse) {
        let frame = match response.try_to_vec() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                error!("{}: encode reply: {}", self.name, e);
                return;
            }
        };
        if self.net_sender.send((to, frame)).await.is_err() {
            warn!("{}: server is gone, reply to {} dropped", self.name, to);
        }
    }
}
