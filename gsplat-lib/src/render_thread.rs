//! The presentation thread and the handle the content side talks to it with.
//!
//! Commands are processed strictly in the order they were sent. Calls that
//! wait for a reply use `blocking_recv`, so they must not be made from inside
//! an async runtime worker.

use crate::device::GpuDevice;
use crate::error::ProxyError;
use crate::proxy::{InstanceId, InstanceStatus, ShaderParameters, SplatProxy};
use crate::structures::SplatStore;
use glam::Vec3;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, ProxyError>>;

pub(crate) enum RenderCommand {
    Create {
        id: InstanceId,
        tint: Vec3,
    },
    Submit {
        id: InstanceId,
        store: SplatStore,
        done: Option<Reply<InstanceStatus>>,
    },
    Refresh {
        id: InstanceId,
        store: SplatStore,
        done: Reply<InstanceStatus>,
    },
    SetTint {
        id: InstanceId,
        tint: Vec3,
    },
    Destroy(InstanceId),
    Bind {
        id: InstanceId,
        reply: oneshot::Sender<ShaderParameters>,
    },
    Status {
        id: InstanceId,
        reply: oneshot::Sender<InstanceStatus>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cheap, cloneable sender side of the presentation thread.
#[derive(Clone)]
pub struct RenderHandle {
    tx: mpsc::UnboundedSender<RenderCommand>,
}

impl RenderHandle {
    fn send(&self, command: RenderCommand) -> Result<(), ProxyError> {
        self.tx
            .send(command)
            .map_err(|_| ProxyError::RenderThreadGone)
    }

    fn wait<T>(rx: oneshot::Receiver<T>) -> Result<T, ProxyError> {
        rx.blocking_recv().map_err(|_| ProxyError::RenderThreadGone)
    }

    pub fn create(&self, id: InstanceId, tint: Vec3) -> Result<(), ProxyError> {
        self.send(RenderCommand::Create { id, tint })
    }

    /// Queues an upload without waiting for it.
    pub fn submit(&self, id: InstanceId, store: SplatStore) -> Result<(), ProxyError> {
        self.send(RenderCommand::Submit {
            id,
            store,
            done: None,
        })
    }

    /// Queues an upload and blocks until the presentation thread has run it.
    pub fn submit_and_wait(&self, id: InstanceId, store: SplatStore) -> Result<InstanceStatus, ProxyError> {
        let (done, rx) = oneshot::channel();
        self.send(RenderCommand::Submit {
            id,
            store,
            done: Some(done),
        })?;
        Self::wait(rx)?
    }

    /// Uploads `store` only if the instance holds an older generation.
    pub fn refresh(&self, id: InstanceId, store: SplatStore) -> Result<InstanceStatus, ProxyError> {
        let (done, rx) = oneshot::channel();
        self.send(RenderCommand::Refresh { id, store, done })?;
        Self::wait(rx)?
    }

    pub fn set_tint(&self, id: InstanceId, tint: Vec3) -> Result<(), ProxyError> {
        self.send(RenderCommand::SetTint { id, tint })
    }

    pub fn destroy(&self, id: InstanceId) -> Result<(), ProxyError> {
        self.send(RenderCommand::Destroy(id))
    }

    pub fn bind(&self, id: InstanceId) -> Result<ShaderParameters, ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::Bind { id, reply })?;
        Self::wait(rx)
    }

    pub fn status(&self, id: InstanceId) -> Result<InstanceStatus, ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::Status { id, reply })?;
        Self::wait(rx)
    }

    /// Returns once every command sent before it has been processed.
    pub fn flush(&self) -> Result<(), ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::Flush(reply))?;
        Self::wait(rx)
    }
}

/// Owns the presentation thread. Dropping it shuts the thread down and
/// releases every buffer it allocated.
pub struct RenderThread {
    handle: RenderHandle,
    join: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Starts the thread and builds the proxy on it. Fails if the fallback
    /// buffers cannot be allocated.
    pub fn spawn<D>(device: D) -> Result<Self, ProxyError>
    where
        D: GpuDevice + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let join = thread::Builder::new()
            .name("gsplat-presentation".to_string())
            .spawn(move || run(device, rx, ready_tx))
            .map_err(|e| {
                log::error!("Failed to start presentation thread: {}", e);
                ProxyError::RenderThreadGone
            })?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => Ok(Self {
                handle: RenderHandle { tx },
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(ProxyError::RenderThreadGone)
            }
        }
    }

    pub fn handle(&self) -> RenderHandle {
        self.handle.clone()
    }

    pub fn shutdown(self) {}
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        let _ = self.handle.send(RenderCommand::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Presentation thread panicked");
            }
        }
    }
}

fn run<D: GpuDevice>(
    device: D,
    mut rx: mpsc::UnboundedReceiver<RenderCommand>,
    ready: oneshot::Sender<Result<(), ProxyError>>,
) {
    let mut proxy = match SplatProxy::new(device) {
        Ok(proxy) => {
            let _ = ready.send(Ok(()));
            proxy
        }
        Err(e) => {
            log::error!("Failed to allocate fallback buffers: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    log::debug!("Presentation thread started");

    while let Some(command) = rx.blocking_recv() {
        // Free sets whose last reader has gone before handling the command.
        proxy.collect_retired();
        match command {
            RenderCommand::Create { id, tint } => proxy.create(id, tint),
            RenderCommand::Submit { id, store, done } => {
                let result = proxy.submit(id, &store);
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            RenderCommand::Refresh { id, store, done } => {
                let _ = done.send(proxy.ensure_current(id, &store));
            }
            RenderCommand::SetTint { id, tint } => {
                if let Err(e) = proxy.set_tint(id, tint) {
                    log::warn!("Ignoring tint update: {}", e);
                }
            }
            RenderCommand::Destroy(id) => proxy.destroy(id),
            RenderCommand::Bind { id, reply } => {
                let _ = reply.send(proxy.shader_parameters(id));
            }
            RenderCommand::Status { id, reply } => {
                let _ = reply.send(proxy.status(id));
            }
            RenderCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            RenderCommand::Shutdown => break,
        }
    }

    log::debug!(
        "Presentation thread exiting with {} live instances",
        proxy.instance_count()
    );
}
