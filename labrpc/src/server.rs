use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::error::{Error, Result};

static ID_ALLOC: AtomicUsize = AtomicUsize::new(0);

pub type RpcFuture<T> = BoxFuture<'static, T>;

/// A set of RPC methods registered under one service name.
///
/// `dispatch` receives the method part of a `service.method` name and the
/// encoded request, and resolves to the encoded reply.
pub trait Service: Send + Sync + 'static {
    fn dispatch(&self, method: &str, req: &[u8]) -> RpcFuture<Result<Vec<u8>>>;
}

pub struct ServerBuilder {
    name: String,
    pub(crate) services: HashMap<&'static str, Box<dyn Service>>,
}

impl ServerBuilder {
    pub fn new(name: String) -> ServerBuilder {
        ServerBuilder {
            name,
            services: HashMap::new(),
        }
    }

    pub fn add_service(&mut self, service_name: &'static str, service: Box<dyn Service>) -> Result<()> {
        match self.services.entry(service_name) {
            Entry::Occupied(_) => Err(Error::Other(format!(
                "{} has already registered",
                service_name
            ))),
            Entry::Vacant(entry) => {
                entry.insert(service);
                Ok(())
            }
        }
    }

    pub fn build(self) -> Server {
        Server {
            core: Arc::new(ServerCore {
                name: self.name,
                services: self.services,
                id: ID_ALLOC.fetch_add(1, Ordering::Relaxed),
                count: AtomicUsize::new(0),
            }),
        }
    }
}

pub(crate) struct ServerCore {
    pub(crate) name: String,
    // distinguishes a re-added server from the one it replaced
    pub(crate) id: usize,
    services: HashMap<&'static str, Box<dyn Service>>,
    count: AtomicUsize,
}

/// A network-addressable bundle of services.
#[derive(Clone)]
pub struct Server {
    pub(crate) core: Arc<ServerCore>,
}

impl Server {
    /// Number of requests dispatched to this server.
    pub fn count(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub(crate) fn dispatch(&self, fq_name: &'static str, req: &[u8]) -> RpcFuture<Result<Vec<u8>>> {
        self.core.count.fetch_add(1, Ordering::Relaxed);
        let (service_name, method_name) = match fq_name.split_once('.') {
            Some(names) => names,
            None => {
                return Box::pin(future::err(Error::Unimplemented(format!(
                    "unknown {}",
                    fq_name
                ))))
            }
        };
        match self.core.services.get(service_name) {
            Some(service) => service.dispatch(method_name, req),
            None => Box::pin(future::err(Error::Unimplemented(format!(
                "unknown {}",
                fq_name
            )))),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .finish()
    }
}
