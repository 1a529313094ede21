use std::fmt;
use std::future::Future;

use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;
use futures::executor::ThreadPool;
use futures::future::{self, FutureExt};

use crate::codec::{self, Message};
use crate::error::{Error, Result};
use crate::server::RpcFuture;

/// A request in flight from a client to the network core.
pub struct Rpc {
    pub(crate) client_name: String,
    pub(crate) fq_name: &'static str,
    pub(crate) req: Option<Vec<u8>>,
    pub(crate) resp: Option<oneshot::Sender<Result<Vec<u8>>>>,
}

impl Rpc {
    pub(crate) fn take_resp_sender(&mut self) -> Option<oneshot::Sender<Result<Vec<u8>>>> {
        self.resp.take()
    }
}

impl fmt::Debug for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("client_name", &self.client_name)
            .field("fq_name", &self.fq_name)
            .finish()
    }
}

/// One outgoing end of a link. A client is connected to at most one server
/// and is disabled until the network enables it.
#[derive(Clone)]
pub struct Client {
    pub(crate) name: String,
    pub(crate) sender: UnboundedSender<Rpc>,
    pub(crate) worker: ThreadPool,
}

impl Client {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `req` to `service.method` on whatever server this client is
    /// connected to. Resolves with an error if the request or reply is lost,
    /// the link is disabled, or the destination is gone.
    pub fn call<Req, Rsp>(&self, fq_name: &'static str, req: &Req) -> RpcFuture<Result<Rsp>>
    where
        Req: Message,
        Rsp: Message + 'static,
    {
        let mut buf = vec![];
        if let Err(e) = codec::encode(req, &mut buf) {
            return Box::pin(future::err(Error::Encode(e)));
        }

        let (tx, rx) = oneshot::channel();
        let rpc = Rpc {
            client_name: self.name.clone(),
            fq_name,
            req: Some(buf),
            resp: Some(tx),
        };

        if self.sender.unbounded_send(rpc).is_err() {
            return Box::pin(future::err(Error::Stopped));
        }

        Box::pin(rx.then(|res| async move {
            match res {
                Ok(Ok(resp)) => codec::decode(&resp).map_err(Error::Decode),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Recv(e)),
            }
        }))
    }

    /// Runs `f` on the network's worker pool.
    pub fn spawn<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.worker.spawn_ok(f);
    }
}
