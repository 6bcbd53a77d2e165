//! Built-in pass-through drivers.
//!
//! `copier` fans one input out to several outputs, `mixin` gathers several
//! inputs into one output. Neither touches samples; they track which queues
//! are bound so the control plane has something real to wire up.

use corelink_core::{
    CompId, ComponentConfig, ComponentDriver, ComponentOps, Connection, IpcError, StreamParams,
    TriggerCmd,
};
use uuid::Uuid;

/// UUID of the built-in `copier` driver.
pub const COPIER_UUID: Uuid = Uuid::from_u128(0x9ba0_0c83_ca12_4a83_943c_1fa2_e82f_9dda);

/// UUID of the built-in `mixin` driver.
pub const MIXIN_UUID: Uuid = Uuid::from_u128(0x39656eb2_3b71_4049_8d3f_f92c_d5c4_3c09);

/// Upper bound on queues per side.
const MAX_QUEUES: usize = 8;

/// Flavour of pass-through component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassthroughKind {
    /// One input, many outputs.
    Copier,
    /// Many inputs, one output.
    Mixin,
}

impl PassthroughKind {
    /// Driver name.
    pub const fn name(self) -> &'static str {
        match self {
            PassthroughKind::Copier => "copier",
            PassthroughKind::Mixin => "mixin",
        }
    }

    /// Driver UUID.
    pub const fn uuid(self) -> Uuid {
        match self {
            PassthroughKind::Copier => COPIER_UUID,
            PassthroughKind::Mixin => MIXIN_UUID,
        }
    }

    const fn max_inputs(self) -> usize {
        match self {
            PassthroughKind::Copier => 1,
            PassthroughKind::Mixin => MAX_QUEUES,
        }
    }

    const fn max_outputs(self) -> usize {
        match self {
            PassthroughKind::Copier => MAX_QUEUES,
            PassthroughKind::Mixin => 1,
        }
    }
}

/// Driver producing [`Passthrough`] components.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughDriver {
    kind: PassthroughKind,
}

impl PassthroughDriver {
    /// Driver of the given flavour.
    pub const fn new(kind: PassthroughKind) -> Self {
        Self { kind }
    }

    /// Flavour of the components this driver creates.
    pub const fn kind(&self) -> PassthroughKind {
        self.kind
    }
}

impl ComponentDriver for PassthroughDriver {
    fn uuid(&self) -> Uuid {
        self.kind.uuid()
    }

    fn name(&self) -> &str {
        self.kind.name()
    }

    fn create(&self, config: &ComponentConfig) -> Option<Box<dyn ComponentOps>> {
        tracing::debug!(comp = %config.id, driver = self.kind.name(), "creating component");
        Some(Box::new(Passthrough::new(self.kind, config.id)))
    }
}

/// A component that accepts connections and processes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passthrough {
    kind: PassthroughKind,
    id: CompId,
    inputs: Vec<u16>,
    outputs: Vec<u16>,
    params: Option<StreamParams>,
    blocks: u64,
}

impl Passthrough {
    /// Unbound component.
    pub fn new(kind: PassthroughKind, id: CompId) -> Self {
        Self {
            kind,
            id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: None,
            blocks: 0,
        }
    }

    /// Bound input queues, most recent first.
    pub fn inputs(&self) -> &[u16] {
        &self.inputs
    }

    /// Bound output queues, most recent first.
    pub fn outputs(&self) -> &[u16] {
        &self.outputs
    }

    /// Parameters accepted by the last `set_params`.
    pub fn params(&self) -> Option<StreamParams> {
        self.params
    }

    /// Blocks processed so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Queue list and index on this component's side of `connection`.
    fn side(&mut self, connection: &Connection) -> (&mut Vec<u16>, u16, usize) {
        if connection.src == self.id {
            let max = self.kind.max_outputs();
            (&mut self.outputs, connection.src_queue, max)
        } else {
            let max = self.kind.max_inputs();
            (&mut self.inputs, connection.dst_queue, max)
        }
    }
}

impl ComponentOps for Passthrough {
    fn bind(&mut self, connection: &Connection) -> Result<(), IpcError> {
        let id = self.id;
        let (queues, queue, max) = self.side(connection);
        if queues.contains(&queue) || queues.len() >= max {
            tracing::warn!(comp = %id, queue, "queue unavailable");
            return Err(IpcError::InvalidRequest);
        }
        queues.insert(0, queue);
        Ok(())
    }

    fn unbind(&mut self, connection: &Connection) -> Result<(), IpcError> {
        let (queues, queue, _) = self.side(connection);
        let before = queues.len();
        queues.retain(|q| *q != queue);
        if queues.len() == before {
            return Err(IpcError::InvalidRequest);
        }
        Ok(())
    }

    fn set_params(&mut self, params: &StreamParams) -> Result<(), IpcError> {
        self.params = Some(*params);
        Ok(())
    }

    fn trigger(&mut self, cmd: TriggerCmd) -> Result<(), IpcError> {
        if cmd == TriggerCmd::Reset {
            self.blocks = 0;
        }
        Ok(())
    }

    fn copy(&mut self) -> Result<(), IpcError> {
        self.blocks += 1;
        Ok(())
    }

    fn free(&mut self) {
        tracing::debug!(comp = %self.id, blocks = self.blocks, "component released");
    }
}
