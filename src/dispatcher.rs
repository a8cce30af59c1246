//! The command dispatcher: the single task that owns the `Inventory`
//! and turns inbound datagrams into replies and spawned transfer
//! tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::inventory::Inventory;
use crate::multicast::MulticastEndpoint;
use crate::pending::PendingUploads;
use crate::transfer;
use crate::wire::{self, tags, ComplexCmd, SimpleCmd, MAX_SIMPL_DATA_LEN};

/// Receive buffer size: one `MAX_SIMPL`-sized datagram is the largest
/// this protocol ever sends or expects.
const RECV_BUF_LEN: usize = wire::MAX_SIMPL;

pub struct Dispatcher {
    cmd: Arc<MulticastEndpoint>,
    inventory: Mutex<Inventory>,
    pending: Arc<PendingUploads>,
    timeout_secs: u64,
}

impl Dispatcher {
    pub fn new(cmd: Arc<MulticastEndpoint>, inventory: Inventory, config: &ServerConfig) -> Self {
        Dispatcher {
            cmd,
            inventory: Mutex::new(inventory),
            pending: Arc::new(PendingUploads::new()),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn pending_uploads(&self) -> Arc<PendingUploads> {
        self.pending.clone()
    }

    /// Run the dispatch loop until a fatal socket error occurs or
    /// `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            tokio::select! {
                result = self.cmd.recv_from(&mut buf) => {
                    let (n, peer) = result?;
                    self.handle_datagram(&buf[..n], peer, &cancel).await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("dispatcher cancelled, shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr, cancel: &CancellationToken) {
        let simple = match wire::decode_simple(bytes) {
            Ok(cmd) => cmd,
            Err(_) => {
                self.diagnostic(peer, ProtocolError::DatagramTooShort(bytes.len()))
                    .await;
                return;
            }
        };

        if simple.tag.matches("HELLO") {
            self.handle_hello(&simple, peer).await;
        } else if simple.tag.matches("LIST") {
            self.handle_list(&simple, peer).await;
        } else if simple.tag.matches("GET") {
            self.handle_get(&simple, peer, cancel).await;
        } else if simple.tag.matches("DEL") {
            self.handle_del(&simple).await;
        } else if simple.tag.matches("ADD") {
            self.handle_add(bytes, &simple, peer, cancel).await;
        } else {
            self.diagnostic(peer, ProtocolError::UnknownCommand).await;
        }
    }

    async fn handle_hello(&self, cmd: &SimpleCmd, peer: SocketAddr) {
        if !cmd.data.is_empty() {
            self.diagnostic(peer, ProtocolError::HelloPayloadNotEmpty)
                .await;
            return;
        }
        let available = self.inventory.lock().await.available_space();
        let reply = wire::encode_complex(
            tags::GOOD_DAY,
            cmd.seq,
            available,
            self.cmd.group().to_string().as_bytes(),
        );
        self.reply(peer, &reply).await;
    }

    async fn handle_list(&self, cmd: &SimpleCmd, peer: SocketAddr) {
        let substring = String::from_utf8_lossy(&cmd.data).into_owned();
        let inventory = self.inventory.lock().await;
        let matches: Vec<&str> = inventory.search(&substring);

        let mut current = String::new();
        for name in matches {
            let addition_len = if current.is_empty() {
                name.len()
            } else {
                name.len() + 1
            };
            if current.len() + addition_len > MAX_SIMPL_DATA_LEN && !current.is_empty() {
                self.reply(
                    peer,
                    &wire::encode_simple(tags::MY_LIST, cmd.seq, current.as_bytes()),
                )
                .await;
                current.clear();
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(name);
        }
        if !current.is_empty() {
            self.reply(
                peer,
                &wire::encode_simple(tags::MY_LIST, cmd.seq, current.as_bytes()),
            )
            .await;
        }
    }

    async fn handle_get(&self, cmd: &SimpleCmd, peer: SocketAddr, cancel: &CancellationToken) {
        if cmd.data.is_empty() {
            self.diagnostic(peer, ProtocolError::EmptyBasename("GET"))
                .await;
            return;
        }
        let Ok(basename) = String::from_utf8(cmd.data.clone()) else {
            self.diagnostic(peer, ProtocolError::EmptyBasename("GET"))
                .await;
            return;
        };

        let path = {
            let inventory = self.inventory.lock().await;
            match inventory.find(&basename) {
                Some(_) => inventory.dir().join(&basename),
                None => {
                    tracing::warn!(basename = %basename, peer = %peer, "GET for unknown basename");
                    return;
                }
            }
        };

        let cmd_socket = self.cmd.clone();
        let seq = cmd.seq;
        let timeout_secs = self.timeout_secs;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            transfer::run_send_worker(cmd_socket, peer, seq, basename, path, timeout_secs, cancel)
                .await;
        });
    }

    async fn handle_del(&self, cmd: &SimpleCmd) {
        if cmd.data.is_empty() {
            return;
        }
        let Ok(basename) = std::str::from_utf8(&cmd.data) else {
            return;
        };
        let mut inventory = self.inventory.lock().await;
        if let Err(e) = inventory.remove(basename) {
            tracing::warn!(basename = %basename, error = %e, "failed to remove file during DEL");
        }
    }

    async fn handle_add(
        &self,
        raw: &[u8],
        simple: &SimpleCmd,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) {
        let complex: ComplexCmd = match wire::decode_complex(raw) {
            Ok(c) => c,
            Err(_) => {
                self.diagnostic(peer, ProtocolError::AddMissingComplexForm)
                    .await;
                return;
            }
        };

        let Ok(basename) = String::from_utf8(complex.data.clone()) else {
            self.reject_add(peer, simple.seq, &complex.data).await;
            return;
        };

        let valid_name = !basename.is_empty() && !basename.contains('/');

        let accepted = {
            let mut inventory = self.inventory.lock().await;
            if !valid_name || inventory.find(&basename).is_some() {
                false
            } else if inventory.reserve(complex.param) {
                inventory.register_basename(basename.clone(), complex.param);
                true
            } else {
                false
            }
        };

        if !accepted {
            self.reject_add(peer, simple.seq, &complex.data).await;
            return;
        }

        let dest_path = {
            let inventory = self.inventory.lock().await;
            inventory.dir().join(&basename)
        };

        let cmd_socket = self.cmd.clone();
        let pending = self.pending.clone();
        let seq = simple.seq;
        let param = complex.param;
        let timeout_secs = self.timeout_secs;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            transfer::run_receive_worker(
                cmd_socket,
                peer,
                seq,
                dest_path,
                param,
                timeout_secs,
                pending,
                cancel,
            )
            .await;
        });
    }

    async fn reject_add(&self, peer: SocketAddr, seq: u64, basename: &[u8]) {
        let reply = wire::encode_simple(tags::NO_WAY, seq, basename);
        self.reply(peer, &reply).await;
    }

    async fn reply(&self, peer: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.cmd.send_to(bytes, peer).await {
            tracing::warn!(peer = %peer, error = %e, "failed to send reply");
        }
    }

    async fn diagnostic(&self, peer: SocketAddr, err: ProtocolError) {
        tracing::warn!(peer = %peer, error = %err, "protocol error");
    }
}
