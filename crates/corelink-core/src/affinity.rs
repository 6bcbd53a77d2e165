//! Core affinity: per-core workers and synchronous request forwarding.
//!
//! Every DSP core is modelled by a worker thread (`dsp-core-N`) that drains
//! a mailbox of [`Request`]s and runs each one as that core. A request whose
//! target object lives on another core is never executed locally: it is sent
//! to the owner's mailbox and the forwarder blocks on a one-slot reply
//! channel until the owner has finished. Requests to one core are handled in
//! FIFO order; there is no ordering across cores and no timeout.
//!
//! Only leaf requests are forwarded. A worker never forwards again while
//! servicing a request, except for pipeline teardown which forwards
//! component frees, and those are leaves. That bounds the forwarding depth.
//! Wait cycles are ruled out only while one host command is in flight at a
//! time, which `ControlPlane` enforces by serializing its entry points.
//!
//! Host commands execute on the caller's thread acting as the primary core.
//! The primary core also has a worker, so a request bounced back to it from
//! another core is serviced while the host thread waits.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::buffer::{ParamsFlags, StreamParams};
use crate::command::ComponentSpec;
use crate::component::{ComponentCall, Connection, TriggerCmd};
use crate::error::IpcError;
use crate::id::{CompId, CoreId, PipelineId};
use crate::plane::Inner;

/// An operation to run on a specific core.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request {
    PipelineNew {
        id: PipelineId,
        priority: u32,
        sched_id: Option<u32>,
    },
    PipelineComplete(PipelineId),
    PipelineFree(PipelineId),
    ComponentNew(Box<ComponentSpec>),
    ComponentFree(CompId),
    SetParams {
        comp: CompId,
        flags: ParamsFlags,
        params: StreamParams,
    },
    Trigger {
        comp: CompId,
        cmd: TriggerCmd,
    },
    /// Producer-side splice of a freshly created buffer.
    ConnectProducer(Connection),
    /// Consumer-side splice, including inter-core promotion.
    ConnectConsumer(Connection),
    Call {
        comp: CompId,
        call: ComponentCall,
    },
}

impl Request {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    fn name(&self) -> &'static str {
        match self {
            Request::PipelineNew { .. } => "pipeline_new",
            Request::PipelineComplete(_) => "pipeline_complete",
            Request::PipelineFree(_) => "pipeline_free",
            Request::ComponentNew(_) => "component_new",
            Request::ComponentFree(_) => "component_free",
            Request::SetParams { .. } => "set_params",
            Request::Trigger { .. } => "trigger",
            Request::ConnectProducer(_) => "connect_producer",
            Request::ConnectConsumer(_) => "connect_consumer",
            Request::Call { .. } => "component_call",
        }
    }
}

type Reply = Result<(), IpcError>;

enum Envelope {
    Run { request: Request, reply: Sender<Reply> },
    Shutdown,
}

/// Sending halves of every core's mailbox.
pub(crate) struct Mailboxes {
    senders: Vec<Sender<Envelope>>,
}

/// Receiving half handed to a worker.
pub(crate) struct Mailbox {
    core: CoreId,
    rx: Receiver<Envelope>,
}

impl Mailboxes {
    /// One mailbox per core.
    pub(crate) fn new(cores: u8) -> (Self, Vec<Mailbox>) {
        let mut senders = Vec::with_capacity(cores.into());
        let mut receivers = Vec::with_capacity(cores.into());
        for core in 0..cores {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(Mailbox {
                core: CoreId(core),
                rx,
            });
        }
        (Self { senders }, receivers)
    }

    /// Number of cores.
    pub(crate) fn cores(&self) -> usize {
        self.senders.len()
    }

    /// Sends `request` to `core` and blocks until it has been executed.
    pub(crate) fn send(&self, core: CoreId, request: Request) -> Reply {
        let mailbox = self.senders.get(core.index()).ok_or(IpcError::InvalidRequest)?;
        let (reply, result) = bounded(1);
        mailbox
            .send(Envelope::Run { request, reply })
            .map_err(|_| IpcError::Fatal("core mailbox closed"))?;
        result
            .recv()
            .map_err(|_| IpcError::Fatal("core worker exited"))?
    }

    /// Asks every worker to exit after draining what is already queued.
    pub(crate) fn shutdown(&self) {
        for tx in &self.senders {
            let _ = tx.send(Envelope::Shutdown);
        }
    }
}

/// Starts the worker thread for one core.
pub(crate) fn spawn_worker(inner: Arc<Inner>, mailbox: Mailbox) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("dsp-core-{}", mailbox.core.0))
        .spawn(move || run(&inner, &mailbox))
}

fn run(inner: &Inner, mailbox: &Mailbox) {
    while let Ok(envelope) = mailbox.rx.recv() {
        match envelope {
            Envelope::Run { request, reply } => {
                #[cfg(feature = "tracing")]
                tracing::trace!(core = %mailbox.core, request = request.name(), "serving");
                let result = inner.execute(mailbox.core, request);
                let _ = reply.send(result);
            }
            Envelope::Shutdown => break,
        }
    }
}

impl Inner {
    /// Runs `request` as `on` if it targets `owner`, otherwise forwards it.
    pub(crate) fn forward(&self, on: CoreId, owner: CoreId, request: Request) -> Reply {
        if on == owner {
            return self.execute(on, request);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %on, to = %owner, request = request.name(), "forwarding");
        let result = self.mailboxes.send(owner, request);
        #[cfg(feature = "tracing")]
        if let Err(e) = &result {
            tracing::warn!(to = %owner, error = %e, "forwarded request failed");
        }
        result
    }

    /// Executes a request on the core it was addressed to.
    pub(crate) fn execute(&self, on: CoreId, request: Request) -> Reply {
        match request {
            Request::PipelineNew {
                id,
                priority,
                sched_id,
            } => self.pipeline_new(on, on, id, priority, sched_id),
            Request::PipelineComplete(id) => self.pipeline_complete(on, id),
            Request::PipelineFree(id) => self.pipeline_free(on, id),
            Request::ComponentNew(spec) => self.component_new(on, *spec),
            Request::ComponentFree(id) => self.component_free(on, id),
            Request::SetParams { comp, flags, params } => {
                self.component_set_params(on, comp, flags, params)
            }
            Request::Trigger { comp, cmd } => self.trigger(on, comp, cmd),
            Request::ConnectProducer(conn) => self.connect_producer(&conn),
            Request::ConnectConsumer(conn) => self.connect_consumer(&conn),
            Request::Call { comp, call } => self.call(on, comp, call),
        }
    }
}
