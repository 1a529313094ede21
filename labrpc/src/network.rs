use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::executor::ThreadPool;
use futures::future::FutureExt;
use futures::select;
use futures::stream::StreamExt;
use futures_timer::Delay;
use log::debug;
use rand::{thread_rng, Rng};

use crate::client::{Client, Rpc};
use crate::error::{Error, Result};
use crate::server::Server;

/// How often a pending call re-checks whether its destination was removed.
const SERVER_DEAD_POLL: Duration = Duration::from_millis(100);

/// Snapshot of everything `process_rpc` needs to know about one link.
#[derive(Debug)]
struct LinkInfo {
    enabled: bool,
    reliable: bool,
    long_reordering: bool,
    server: Option<Server>,
}

#[derive(Default)]
struct Endpoints {
    // by client name
    enabled: HashMap<String, bool>,
    // by server name; `None` once deleted
    servers: HashMap<String, Option<Server>>,
    // client name -> server name
    connections: HashMap<String, Option<String>>,
}

struct NetworkCore {
    reliable: AtomicBool,
    // pause a long time on send on a disabled link
    long_delays: AtomicBool,
    // sometimes delay replies a long time
    long_reordering: AtomicBool,
    stopped: AtomicBool,
    endpoints: Mutex<Endpoints>,
    count: AtomicUsize,
    bytes: AtomicU64,
    sender: UnboundedSender<Rpc>,
    poller: ThreadPool,
    worker: ThreadPool,
}

/// A simulated network of named clients and servers.
///
/// Links are per client: each client is connected to one server and can be
/// enabled or disabled independently. Cloning yields another handle to the
/// same network.
#[derive(Clone)]
pub struct Network {
    core: Arc<NetworkCore>,
}

impl Network {
    pub fn new() -> Network {
        let (net, incoming) = Network::create();
        net.start(incoming);
        net
    }

    /// Builds a network without starting its dispatch loop; the caller
    /// receives every request from `incoming` instead.
    pub fn create() -> (Network, UnboundedReceiver<Rpc>) {
        let (sender, incoming) = unbounded();
        let net = Network {
            core: Arc::new(NetworkCore {
                reliable: AtomicBool::new(true),
                long_delays: AtomicBool::new(false),
                long_reordering: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                endpoints: Mutex::default(),
                count: AtomicUsize::new(0),
                bytes: AtomicU64::new(0),
                poller: ThreadPool::builder()
                    .pool_size(2)
                    .name_prefix("labrpc-poller-")
                    .create()
                    .expect("failed to build the network poller pool"),
                worker: ThreadPool::builder()
                    .name_prefix("labrpc-worker-")
                    .create()
                    .expect("failed to build the network worker pool"),
                sender,
            }),
        };

        (net, incoming)
    }

    fn start(&self, mut incoming: UnboundedReceiver<Rpc>) {
        let network = self.clone();
        self.core.poller.spawn_ok(async move {
            while let Some(mut rpc) = incoming.next().await {
                let resp = match rpc.take_resp_sender() {
                    Some(resp) => resp,
                    None => continue,
                };
                let net = network.clone();
                network.core.poller.spawn_ok(async move {
                    let res = net.process_rpc(rpc).await;
                    if resp.send(res).is_err() {
                        debug!("caller went away before the reply arrived");
                    }
                })
            }
            debug!("network dispatch loop exits");
        });
    }

    pub fn add_server(&self, server: Server) {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.servers.insert(server.core.name.clone(), Some(server));
    }

    /// Removes a server; calls to it, including ones already in flight, fail
    /// with `Stopped`.
    pub fn delete_server(&self, name: &str) {
        let mut eps = self.core.endpoints.lock().unwrap();
        if let Some(s) = eps.servers.get_mut(name) {
            *s = None;
        }
    }

    pub fn create_client(&self, name: String) -> Client {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.enabled.insert(name.clone(), false);
        eps.connections.insert(name.clone(), None);
        Client {
            name,
            sender: self.core.sender.clone(),
            worker: self.core.worker.clone(),
        }
    }

    /// Connects a client to a server.
    pub fn connect(&self, client_name: &str, server_name: &str) {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.connections
            .insert(client_name.to_owned(), Some(server_name.to_owned()));
    }

    /// Enables or disables a client's link.
    pub fn enable(&self, client_name: &str, enabled: bool) {
        debug!(
            "client {} is {}",
            client_name,
            if enabled { "enabled" } else { "disabled" }
        );
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.enabled.insert(client_name.to_owned(), enabled);
    }

    pub fn set_reliable(&self, yes: bool) {
        self.core.reliable.store(yes, Ordering::Release);
    }

    pub fn set_long_reordering(&self, yes: bool) {
        self.core.long_reordering.store(yes, Ordering::Release);
    }

    pub fn set_long_delays(&self, yes: bool) {
        self.core.long_delays.store(yes, Ordering::Release);
    }

    /// Requests dispatched to the named server; 0 if it was never added or
    /// has been deleted.
    pub fn count(&self, server_name: &str) -> usize {
        let eps = self.core.endpoints.lock().unwrap();
        eps.servers
            .get(server_name)
            .and_then(Option::as_ref)
            .map_or(0, Server::count)
    }

    /// Requests submitted to the network, delivered or not.
    pub fn total_count(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    /// Payload bytes carried: every request, plus every reply delivered.
    pub fn total_bytes(&self) -> u64 {
        self.core.bytes.load(Ordering::Relaxed)
    }

    /// Tears the network down. Queued and future calls fail with `Stopped`.
    pub fn cleanup(&self) {
        self.core.stopped.store(true, Ordering::Release);
        self.core.sender.close_channel();
    }

    fn is_stopped(&self) -> bool {
        self.core.stopped.load(Ordering::Acquire)
    }

    fn link_info(&self, client_name: &str) -> LinkInfo {
        let eps = self.core.endpoints.lock().unwrap();
        let server = match eps.connections.get(client_name) {
            Some(Some(server_name)) => eps.servers.get(server_name).cloned().flatten(),
            _ => None,
        };
        LinkInfo {
            enabled: eps.enabled.get(client_name).copied().unwrap_or(false),
            reliable: self.core.reliable.load(Ordering::Acquire),
            long_reordering: self.core.long_reordering.load(Ordering::Acquire),
            server,
        }
    }

    fn is_server_dead(&self, client_name: &str, server_name: &str, server_id: usize) -> bool {
        if self.is_stopped() {
            return true;
        }
        let eps = self.core.endpoints.lock().unwrap();
        !eps.enabled.get(client_name).copied().unwrap_or(false)
            || eps
                .servers
                .get(server_name)
                .and_then(Option::as_ref)
                .map_or(true, |s| s.core.id != server_id)
    }

    async fn process_rpc(&self, rpc: Rpc) -> Result<Vec<u8>> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        self.core.count.fetch_add(1, Ordering::Relaxed);
        if let Some(req) = rpc.req.as_ref() {
            self.core.bytes.fetch_add(req.len() as u64, Ordering::Relaxed);
        }
        let link = self.link_info(&rpc.client_name);
        debug!("{:?} process with {:?}", rpc, link);

        match link {
            LinkInfo {
                enabled: true,
                reliable,
                long_reordering,
                server: Some(server),
            } => {
                // ThreadRng is not Send; draw everything before the first await.
                let (short_delay, drop_request, drop_reply, reordering) = {
                    let mut rng = thread_rng();
                    let short_delay = if reliable {
                        None
                    } else {
                        Some(rng.gen_range(0..27))
                    };
                    let drop_request = !reliable && rng.gen_range(0..1000) < 100;
                    let drop_reply = !reliable && rng.gen_range(0..1000) < 100;
                    let reordering = if long_reordering && rng.gen_range(0..900) < 600 {
                        // delay the reply for a while
                        let upper_bound: u64 = 1 + rng.gen_range(0..2000);
                        Some(200 + rng.gen_range(0..upper_bound))
                    } else {
                        None
                    };
                    (short_delay, drop_request, drop_reply, reordering)
                };

                if drop_request {
                    // as if the request timed out
                    Delay::new(Duration::from_millis(short_delay.unwrap_or(0))).await;
                    return Err(Error::Timeout);
                }

                let reply = deliver(short_delay, drop_reply, reordering, rpc, self.clone(), server).await?;
                self.core
                    .bytes
                    .fetch_add(reply.len() as u64, Ordering::Relaxed);
                Ok(reply)
            }
            _ => {
                // simulate no reply and an eventual timeout.
                let ms: u64 = if self.core.long_delays.load(Ordering::Acquire) {
                    // lets tests check that peers don't send RPCs synchronously.
                    thread_rng().gen_range(0..7000)
                } else {
                    // clients retrying servers in rapid succession need short timeouts.
                    thread_rng().gen_range(0..100)
                };

                debug!("{:?} delay {}ms then timeout", rpc, ms);
                Delay::new(Duration::from_millis(ms)).await;
                Err(Error::Timeout)
            }
        }
    }

    /// Spawns a future on the network's worker pool.
    pub fn spawn<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.core.worker.spawn_ok(f);
    }

    /// Spawns a future on the network's poller pool.
    pub fn spawn_poller<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.core.poller.spawn_ok(f);
    }
}

async fn deliver(
    delay: Option<u64>,
    drop_reply: bool,
    reordering: Option<u64>,
    mut rpc: Rpc,
    network: Network,
    server: Server,
) -> Result<Vec<u8>> {
    if let Some(delay) = delay {
        Delay::new(Duration::from_millis(delay)).await;
    }

    let fq_name = rpc.fq_name;
    let req = rpc.req.take().unwrap_or_default();
    let client_name = rpc.client_name.clone();

    // Race the handler against the server being deleted, so that a caller
    // never gets a positive reply from an instance whose persister has
    // already been superseded.
    let resp = select! {
        res = server.dispatch(fq_name, &req).fuse() => res,
        _ = server_dead(
            network.clone(),
            &client_name,
            &server.core.name,
            server.core.id,
        ).fuse() => Err(Error::Stopped),
    }?;

    if network.is_server_dead(&client_name, &server.core.name, server.core.id) {
        return Err(Error::Stopped);
    }
    if drop_reply {
        // as if the reply timed out
        return Err(Error::Timeout);
    }

    if let Some(reordering) = reordering {
        debug!("{:?} next long reordering {}ms", rpc, reordering);
        Delay::new(Duration::from_millis(reordering)).await;
    }
    Ok(resp)
}

/// Resolves once the server is deleted, replaced, or unreachable from the client.
async fn server_dead(net: Network, client_name: &str, server_name: &str, server_id: usize) {
    loop {
        Delay::new(SERVER_DEAD_POLL).await;
        if net.is_server_dead(client_name, server_name, server_id) {
            debug!("{:?} is dead", server_name);
            return;
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}
