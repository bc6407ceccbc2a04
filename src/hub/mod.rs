//! The single-writer routing actor: owns the Subscription Index and fans
//! pre-serialised envelope frames out to per-connection outbound queues.
//!
//! Mutations (register/unregister/subscribe/unsubscribe) are linearised
//! through an unbounded command channel; broadcasts arrive on a separate
//! bounded channel so a backed-up producer can never starve lifecycle
//! commands. Fan-out into per-connection queues is always a non-blocking
//! `try_send` — a slow consumer only ever loses its own events.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Capacity of the Hub's inbound broadcast channel and of every per-connection
/// outbound queue (§3.1 / §5).
pub const QUEUE_CAPACITY: usize = 256;

/// Where a [`Broadcast`] should be delivered. Resolution is mutually
/// exclusive and tried in this order: a single user, then a channel's
/// subscribers, then a server's members (§4.2).
#[derive(Debug, Clone)]
pub enum Target {
    User(Uuid),
    Channel(Uuid),
    Server(Uuid),
}

/// A fully-serialised event frame awaiting fan-out.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub frame: String,
    pub target: Target,
    pub exclude_user_id: Option<Uuid>,
}

struct Connection {
    seq: u64,
    username: String,
    outbound: mpsc::Sender<String>,
    channels: HashSet<Uuid>,
    servers: HashSet<Uuid>,
}

enum Command {
    Register {
        user_id: Uuid,
        username: String,
        seq: u64,
        outbound: mpsc::Sender<String>,
        ready_frame: String,
        presence_frame: String,
    },
    Unregister {
        user_id: Uuid,
        seq: u64,
        offline_frame: String,
    },
    SubscribeChannel {
        user_id: Uuid,
        channel_id: Uuid,
    },
    UnsubscribeChannel {
        user_id: Uuid,
        channel_id: Uuid,
    },
    SubscribeServer {
        user_id: Uuid,
        server_id: Uuid,
    },
}

/// Handle shared by connection actors and HTTP handlers to talk to the Hub.
/// Cheap to clone — every clone shares the same two channel senders.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    broadcasts: mpsc::Sender<Broadcast>,
}

impl HubHandle {
    pub fn register(
        &self,
        user_id: Uuid,
        username: String,
        seq: u64,
        outbound: mpsc::Sender<String>,
        ready_frame: String,
        presence_frame: String,
    ) {
        let _ = self.commands.send(Command::Register {
            user_id,
            username,
            seq,
            outbound,
            ready_frame,
            presence_frame,
        });
    }

    pub fn unregister(&self, user_id: Uuid, seq: u64, offline_frame: String) {
        let _ = self.commands.send(Command::Unregister {
            user_id,
            seq,
            offline_frame,
        });
    }

    pub fn subscribe_channel(&self, user_id: Uuid, channel_id: Uuid) {
        let _ = self
            .commands
            .send(Command::SubscribeChannel { user_id, channel_id });
    }

    pub fn unsubscribe_channel(&self, user_id: Uuid, channel_id: Uuid) {
        let _ = self
            .commands
            .send(Command::UnsubscribeChannel { user_id, channel_id });
    }

    pub fn subscribe_server(&self, user_id: Uuid, server_id: Uuid) {
        let _ = self
            .commands
            .send(Command::SubscribeServer { user_id, server_id });
    }

    /// Post a broadcast for fan-out. This is the one point where a producer
    /// may suspend: the channel is bounded so a pathologically fast producer
    /// is backpressured, but the Hub's own delivery into connection queues
    /// downstream of this never blocks.
    pub async fn broadcast(&self, broadcast: Broadcast) {
        if self.broadcasts.send(broadcast).await.is_err() {
            tracing::warn!("hub broadcast channel closed; dropping broadcast");
        }
    }
}

/// The Hub's event loop state. Not `Clone` — only [`HubHandle`] is shared.
pub struct Hub {
    connections: HashMap<Uuid, Connection>,
    channel_index: HashMap<Uuid, HashSet<Uuid>>,
    commands: mpsc::UnboundedReceiver<Command>,
    broadcasts: mpsc::Receiver<Broadcast>,
}

impl Hub {
    /// Spawn the Hub's event loop task and return a handle for producers.
    pub fn spawn() -> HubHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(QUEUE_CAPACITY);

        let hub = Hub {
            connections: HashMap::new(),
            channel_index: HashMap::new(),
            commands: command_rx,
            broadcasts: broadcast_rx,
        };

        tokio::spawn(hub.run());

        HubHandle {
            commands: command_tx,
            broadcasts: broadcast_tx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                b = self.broadcasts.recv() => {
                    match b {
                        Some(b) => self.handle_broadcast(b),
                        None => break,
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                user_id,
                username,
                seq,
                outbound,
                ready_frame,
                presence_frame,
            } => self.register(user_id, username, seq, outbound, ready_frame, presence_frame),
            Command::Unregister {
                user_id,
                seq,
                offline_frame,
            } => self.unregister(user_id, seq, offline_frame),
            Command::SubscribeChannel { user_id, channel_id } => {
                if let Some(conn) = self.connections.get_mut(&user_id) {
                    conn.channels.insert(channel_id);
                    self.channel_index
                        .entry(channel_id)
                        .or_default()
                        .insert(user_id);
                }
            }
            Command::UnsubscribeChannel { user_id, channel_id } => {
                if let Some(conn) = self.connections.get_mut(&user_id) {
                    conn.channels.remove(&channel_id);
                }
                if let Some(subs) = self.channel_index.get_mut(&channel_id) {
                    subs.remove(&user_id);
                    if subs.is_empty() {
                        self.channel_index.remove(&channel_id);
                    }
                }
            }
            Command::SubscribeServer { user_id, server_id } => {
                if let Some(conn) = self.connections.get_mut(&user_id) {
                    conn.servers.insert(server_id);
                }
            }
        }
    }

    fn register(
        &mut self,
        user_id: Uuid,
        username: String,
        seq: u64,
        outbound: mpsc::Sender<String>,
        ready_frame: String,
        presence_frame: String,
    ) {
        let conn = Connection {
            seq,
            username,
            outbound,
            channels: HashSet::new(),
            servers: HashSet::new(),
        };
        self.connections.insert(user_id, conn);

        if let Some(conn) = self.connections.get(&user_id) {
            if conn.outbound.try_send(ready_frame).is_err() {
                tracing::debug!(%user_id, "dropped READY frame on registration");
            }
        }

        for (id, conn) in self.connections.iter() {
            if *id == user_id {
                continue;
            }
            if conn.outbound.try_send(presence_frame.clone()).is_err() {
                tracing::debug!(user_id = %id, "dropped online PRESENCE_UPDATE (queue full)");
            }
        }

        tracing::info!(%user_id, seq, "connection registered");
    }

    fn unregister(&mut self, user_id: Uuid, seq: u64, offline_frame: String) {
        // A stale unregister (from a connection superseded by a newer one for
        // the same user) must not tear down the live connection's state.
        let is_current = matches!(self.connections.get(&user_id), Some(c) if c.seq == seq);
        if !is_current {
            tracing::debug!(%user_id, seq, "ignoring stale unregister");
            return;
        }

        if let Some(conn) = self.connections.remove(&user_id) {
            for channel_id in conn.channels {
                if let Some(subs) = self.channel_index.get_mut(&channel_id) {
                    subs.remove(&user_id);
                    if subs.is_empty() {
                        self.channel_index.remove(&channel_id);
                    }
                }
            }
        }

        for conn in self.connections.values() {
            if conn.outbound.try_send(offline_frame.clone()).is_err() {
                tracing::debug!("dropped offline PRESENCE_UPDATE (queue full)");
            }
        }

        tracing::info!(%user_id, seq, "connection unregistered");
    }

    fn handle_broadcast(&mut self, broadcast: Broadcast) {
        let Broadcast {
            frame,
            target,
            exclude_user_id,
        } = broadcast;

        match target {
            Target::User(user_id) => {
                if let Some(conn) = self.connections.get(&user_id) {
                    if conn.outbound.try_send(frame).is_err() {
                        tracing::debug!(%user_id, "dropped direct broadcast (queue full)");
                    }
                }
            }
            Target::Channel(channel_id) => {
                let Some(subscribers) = self.channel_index.get(&channel_id) else {
                    return;
                };
                for user_id in subscribers {
                    if Some(*user_id) == exclude_user_id {
                        continue;
                    }
                    if let Some(conn) = self.connections.get(user_id) {
                        if conn.outbound.try_send(frame.clone()).is_err() {
                            tracing::debug!(%user_id, %channel_id, "dropped channel broadcast (queue full)");
                        }
                    }
                }
            }
            Target::Server(server_id) => {
                for (user_id, conn) in self.connections.iter() {
                    if Some(*user_id) == exclude_user_id {
                        continue;
                    }
                    if conn.servers.contains(&server_id) && conn.outbound.try_send(frame.clone()).is_err() {
                        tracing::debug!(%user_id, %server_id, "dropped server broadcast (queue full)");
                    }
                }
            }
        }
    }
}
