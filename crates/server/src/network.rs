//! TCP front end and the simulation thread.
//!
//! Each connection gets a reader task (bytes -> [`FrameDecoder`] -> inbound
//! queue) and a writer task fed by a bounded per-client queue. The simulation
//! runs on its own OS thread, drains the inbound queue at tick boundaries and
//! hands frames to writers with `try_send`, so a slow client never stalls a
//! tick; a client whose queue is full is disconnected instead.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use ironworks_net::{encode_server_message, ClientId, FrameDecoder};
use ironworks_world::{RegionStore, World};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::host::{GameHost, HostEvent, Outgoing};
use crate::timestep::FixedTimestep;

/// Steps the simulation may run back to back before dropping backlog.
const MAX_CATCH_UP_STEPS: u32 = 8;

const READ_BUFFER_LEN: usize = 4096;

enum NetEvent {
    Connected {
        client: ClientId,
        outbound: mpsc::Sender<Vec<u8>>,
    },
    Host(HostEvent),
}

/// A bound listener plus the world it will serve.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    world: World,
}

impl Server {
    /// Open (or create) the saved world under `save_dir` and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let store = RegionStore::new(&config.save_dir)
            .with_context(|| format!("Failed to open save directory {}", config.save_dir.display()))?;
        let world = World::open(config.seed, config.max_resident_chunks, Box::new(store))
            .context("Failed to open world")?;
        Self::bind_with_world(config, world).await
    }

    /// Bind the listener for an already constructed world.
    pub async fn bind_with_world(config: ServerConfig, world: World) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;
        Ok(Self {
            config,
            listener,
            world,
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `shutdown` resolves, then stop the simulation and
    /// flush the world to disk.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Server {
            config,
            listener,
            world,
        } = self;
        info!(addr = %listener.local_addr()?, seed = world.seed(), tick = world.tick().0, "server listening");

        let (events_tx, events_rx) = std_mpsc::channel::<NetEvent>();
        let stop = Arc::new(AtomicBool::new(false));
        let host = GameHost::new(world, &config);
        let simulation = {
            let stop = Arc::clone(&stop);
            let tick_rate = config.tick_rate;
            thread::Builder::new()
                .name("simulation".into())
                .spawn(move || run_simulation(host, events_rx, stop, tick_rate))
                .context("Failed to spawn simulation thread")?
        };

        let mut next_client: ClientId = 1;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let client = next_client;
                        next_client += 1;
                        spawn_connection(client, stream, peer, events_tx.clone(), config.client_queue_depth);
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        stop.store(true, Ordering::Relaxed);
        drop(events_tx);
        let joined = tokio::task::spawn_blocking(move || simulation.join())
            .await
            .context("Failed to wait for simulation thread")?;
        joined.map_err(|_| anyhow::anyhow!("simulation thread panicked"))?
    }
}

fn spawn_connection(
    client: ClientId,
    stream: TcpStream,
    peer: SocketAddr,
    events: std_mpsc::Sender<NetEvent>,
    queue_depth: usize,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(client, error = %err, "failed to disable Nagle");
    }
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(queue_depth.max(1));
    if events
        .send(NetEvent::Connected {
            client,
            outbound: outbound_tx,
        })
        .is_err()
    {
        return;
    }
    info!(client, %peer, "client connected");

    let closed = Arc::new(Notify::new());
    tokio::spawn(write_loop(client, writer, outbound_rx, Arc::clone(&closed)));
    tokio::spawn(read_loop(client, reader, events, closed));
}

#[instrument(skip(reader, events, closed))]
async fn read_loop(
    client: ClientId,
    mut reader: OwnedReadHalf,
    events: std_mpsc::Sender<NetEvent>,
    closed: Arc<Notify>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    let reason = 'conn: loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => Some(read),
            _ = closed.notified() => None,
        };
        let n = match read {
            None => break "closed by server",
            Some(Ok(0)) => break "peer closed",
            Some(Ok(n)) => n,
            Some(Err(err)) => {
                debug!(error = %err, "read failed");
                break "read error";
            }
        };

        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_client_message() {
                Ok(Some(message)) => {
                    let event = NetEvent::Host(HostEvent::Message(client, message));
                    if events.send(event).is_err() {
                        break 'conn "server stopping";
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "protocol error; dropping connection");
                    break 'conn "protocol error";
                }
            }
        }
    };

    info!(reason, "client disconnected");
    let _ = events.send(NetEvent::Host(HostEvent::Disconnected(client)));
}

async fn write_loop(
    client: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    closed: Arc<Notify>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            debug!(client, error = %err, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
    closed.notify_one();
}

fn run_simulation(
    mut host: GameHost,
    events: Receiver<NetEvent>,
    stop: Arc<AtomicBool>,
    tick_rate: u32,
) -> Result<()> {
    let mut timestep = FixedTimestep::new(tick_rate, MAX_CATCH_UP_STEPS);
    let mut writers: BTreeMap<ClientId, mpsc::Sender<Vec<u8>>> = BTreeMap::new();
    let mut last = Instant::now();
    info!(tick_rate, "simulation loop started");

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        let steps = timestep.accumulate(now.saturating_duration_since(last));
        last = now;

        for _ in 0..steps {
            drain_events(&events, &mut host, &mut writers);
            let outgoing = host.step();
            dispatch(outgoing, &mut writers);
        }
        thread::sleep(timestep.until_next());
    }

    drop(writers);
    host.shutdown()
}

fn drain_events(
    events: &Receiver<NetEvent>,
    host: &mut GameHost,
    writers: &mut BTreeMap<ClientId, mpsc::Sender<Vec<u8>>>,
) {
    while let Ok(event) = events.try_recv() {
        match event {
            NetEvent::Connected { client, outbound } => {
                writers.insert(client, outbound);
                host.enqueue(HostEvent::Connected(client));
            }
            NetEvent::Host(event) => {
                if let HostEvent::Disconnected(client) = &event {
                    writers.remove(client);
                }
                host.enqueue(event);
            }
        }
    }
}

/// Hand frames to writer tasks without blocking. Dropping a client's sender
/// lets its writer flush what is queued and close the socket.
fn dispatch(outgoing: Vec<Outgoing>, writers: &mut BTreeMap<ClientId, mpsc::Sender<Vec<u8>>>) {
    for item in outgoing {
        match item {
            Outgoing::Send(client, message) => {
                let Some(writer) = writers.get(&client) else {
                    continue;
                };
                let frame = match encode_server_message(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(client, tag = ?message.tag(), error = %err, "failed to encode message");
                        continue;
                    }
                };
                match writer.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(client, "client queue full; disconnecting");
                        writers.remove(&client);
                    }
                    Err(TrySendError::Closed(_)) => {
                        writers.remove(&client);
                    }
                }
            }
            Outgoing::Close(client) => {
                writers.remove(&client);
            }
        }
    }
}
