use crate::error::Result;
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod http_server;
pub mod redis;
pub mod retry;
pub mod runtime;
pub mod websocket;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportKind {
    HttpIn,
    RedisSubscriber,
    Sweeper,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::HttpIn => f.write_str("http-in"),
            TransportKind::RedisSubscriber => f.write_str("redis-subscriber"),
            TransportKind::Sweeper => f.write_str("pending-sweeper"),
        }
    }
}

/// Completion future of a started transport, supervised by the application.
pub struct TransportRun {
    kind: TransportKind,
    name: &'static str,
    future: Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>,
}

impl TransportRun {
    pub fn new<F>(kind: TransportKind, name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            kind,
            name,
            future: Box::pin(future),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn wait(self) -> Result<()> {
        self.future.await
    }
}

/// Background component owned by the application: the HTTP listener, the pub/sub
/// subscription and the pending-request sweeper all run behind this interface.
#[async_trait]
pub trait TransportRuntime: Send {
    fn kind(&self) -> TransportKind;
    fn name(&self) -> &'static str;
    async fn start(&mut self, shutdown: CancellationToken) -> Result<()>;
    /// Must be called after `start`; resolves once every task of the transport has ended.
    fn run(&mut self) -> TransportRun;
    async fn shutdown(&mut self) -> Result<()>;
}

type RuntimeSpawner = Box<dyn FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send>;

/// Transport made of spawned tokio tasks that watch the shared shutdown token.
pub struct TaskTransportRuntime {
    kind: TransportKind,
    name: &'static str,
    spawner: Option<RuntimeSpawner>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: Option<CancellationToken>,
}

impl TaskTransportRuntime {
    pub fn new<F>(kind: TransportKind, name: &'static str, spawner: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Vec<JoinHandle<()>> + Send + 'static,
    {
        Self {
            kind,
            name,
            spawner: Some(Box::new(spawner)),
            tasks: Vec::new(),
            shutdown: None,
        }
    }
}

#[async_trait]
impl TransportRuntime for TaskTransportRuntime {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        let Some(spawner) = self.spawner.take() else {
            crate::bail_err!("transport `{}` already started", self.name);
        };
        self.tasks = spawner(shutdown.clone());
        self.shutdown = Some(shutdown);
        Ok(())
    }

    fn run(&mut self) -> TransportRun {
        let name = self.name;
        let tasks = std::mem::take(&mut self.tasks);

        TransportRun::new(self.kind, name, async move {
            for task in tasks {
                if let Err(join_err) = task.await {
                    crate::bail_err!("transport `{name}` worker terminated unexpectedly: {join_err}");
                }
            }
            Ok(())
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(token) = self.shutdown.as_ref() {
            token.cancel();
        }
        Ok(())
    }
}
