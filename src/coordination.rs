//! Coordination between the bus path and the control loop
//!
//! - [`SharedNode`]: one node's parameters behind a critical-section mutex.
//!   The bus receive path writes through [`SharedNode::apply`]; the control
//!   loop copies a [`NodeParams`] snapshot at the start of each tick.
//! - [`NodeTable`]: routes received frames to the local node slots.
//! - [`TelemetryChannel`]: single-slot latest-value handoff from the control
//!   loop to the bus transmit task. Publishing never blocks and overwrites
//!   any sample the transmitter has not taken yet.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_can::ErrorKind;

use crate::can_protocol::{
    decode, encode, encode_partner_angle, BusMessage, DecodeError, FeedbackRecord, FieldUpdate,
    NodeIndex, PartnerMap,
};
use crate::config::StorageCommand;
use crate::fmt::*;
use crate::node::NodeParams;

#[derive(Clone, Copy)]
struct NodeSlot {
    index: NodeIndex,
    params: NodeParams,
    revision: u32,
}

/// Parameters of one node, shared between bus and control contexts
pub struct SharedNode {
    slot: Mutex<CriticalSectionRawMutex, RefCell<NodeSlot>>,
}

impl SharedNode {
    pub const fn new(index: NodeIndex) -> Self {
        Self {
            slot: Mutex::new(RefCell::new(NodeSlot {
                index,
                params: NodeParams::new(),
                revision: 0,
            })),
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.slot.lock(|s| s.borrow().index)
    }

    /// Rebind to another bus address (after loading the stored config)
    pub fn set_index(&self, index: NodeIndex) {
        self.slot.lock(|s| s.borrow_mut().index = index);
    }

    /// The single write entry point for bus updates
    ///
    /// Returns whether the update changed the parameter set.
    pub fn apply(&self, update: &FieldUpdate) -> bool {
        self.slot.lock(|s| {
            let mut slot = s.borrow_mut();
            let applied = slot.params.apply(update);
            if applied {
                slot.revision = slot.revision.wrapping_add(1);
            }
            applied
        })
    }

    /// Replace the whole parameter set (config reload / reset)
    pub fn replace(&self, params: NodeParams) {
        self.slot.lock(|s| {
            let mut slot = s.borrow_mut();
            slot.params = params;
            slot.revision = slot.revision.wrapping_add(1);
        });
    }

    /// Copy of the current parameters
    pub fn snapshot(&self) -> NodeParams {
        self.slot.lock(|s| s.borrow().params)
    }

    /// Incremented on every accepted write
    pub fn revision(&self) -> u32 {
        self.slot.lock(|s| s.borrow().revision)
    }
}

/// Outcome of routing one received frame
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Parameter update applied to a local node
    Applied(NodeIndex),
    /// Decoded but rejected (non-finite value, zero pole pairs)
    Rejected(NodeIndex),
    /// Persistence request for the storage task
    Storage(NodeIndex, StorageCommand),
    /// Feedback record under a local index
    ///
    /// Feedback frames carry the sender's own index and are read by the host
    /// monitor; a controller never receives its own. Seeing one here means
    /// another controller on the bus is configured with the same index.
    Feedback(NodeIndex, FeedbackRecord),
    /// Addressed to a node this controller does not own
    NotForUs,
    /// Malformed frame, dropped
    Dropped(DecodeError),
}

/// Bus error as reported by the receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    Overrun,
    Bit,
    Stuff,
    Crc,
    Form,
    Acknowledge,
    Other,
}

impl From<ErrorKind> for BusFault {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Overrun => Self::Overrun,
            ErrorKind::Bit => Self::Bit,
            ErrorKind::Stuff => Self::Stuff,
            ErrorKind::Crc => Self::Crc,
            ErrorKind::Form => Self::Form,
            ErrorKind::Acknowledge => Self::Acknowledge,
            _ => Self::Other,
        }
    }
}

/// Local node slots plus receive statistics
pub struct NodeTable<const N: usize> {
    nodes: [SharedNode; N],
    bus_errors: AtomicU32,
    dropped: AtomicU32,
}

impl<const N: usize> NodeTable<N> {
    pub const fn new(nodes: [SharedNode; N]) -> Self {
        Self {
            nodes,
            bus_errors: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn nodes(&self) -> &[SharedNode] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&SharedNode> {
        self.nodes.iter().find(|n| n.index() == index)
    }

    /// Route one received frame
    ///
    /// Malformed frames leave every field untouched and are counted.
    pub fn on_receive(&self, message: &BusMessage) -> Dispatch {
        let Some(node) = self.node(message.id.node) else {
            return Dispatch::NotForUs;
        };
        let index = message.id.node;

        let update = match decode(message) {
            Ok(update) => update,
            Err(DecodeError::UnknownField(field)) => {
                trace!("node {}: unknown field 0x{:02X}", index.get(), field);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Dispatch::Dropped(DecodeError::UnknownField(field));
            }
            Err(e) => {
                error!("node {}: dropped frame: {:?}", index.get(), e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Dispatch::Dropped(e);
            }
        };

        match update {
            FieldUpdate::Storage(command) => Dispatch::Storage(index, command),
            FieldUpdate::Feedback(record) => Dispatch::Feedback(index, record),
            update => {
                if node.apply(&update) {
                    debug!("node {}: {:?}", index.get(), update);
                    Dispatch::Applied(index)
                } else {
                    Dispatch::Rejected(index)
                }
            }
        }
    }

    /// Error branch of the receive path; parameters keep their last values
    pub fn on_bus_error(&self, kind: ErrorKind) -> BusFault {
        let fault = BusFault::from(kind);
        let count = self.bus_errors.fetch_add(1, Ordering::Relaxed) + 1;
        error!("CAN bus error: {:?} (total {})", fault, count);
        fault
    }

    pub fn bus_errors(&self) -> u32 {
        self.bus_errors.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One telemetry sample from the control loop
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    pub node: NodeIndex,
    /// Unbounded shaft angle [rad]
    pub angle: f32,
    /// [rad/s]
    pub velocity: f32,
    /// q-axis current or torque command [A or V]
    pub current: f32,
    /// Status bits, see [`crate::can_protocol::feedback::status`]
    pub status: u8,
}

impl TelemetrySample {
    /// Angle broadcast addressed to the partner node
    pub fn partner_message(&self, partners: &PartnerMap) -> BusMessage {
        encode_partner_angle(self.node, self.angle, partners)
    }

    /// Packed feedback record under the sender's own index
    pub fn feedback_message(&self) -> BusMessage {
        let record = FeedbackRecord {
            position: self.angle,
            current: self.current,
            velocity: self.velocity,
            wrapped: false,
            status: self.status,
        };
        encode(self.node, &FieldUpdate::Feedback(record))
    }
}

/// Latest-value telemetry handoff
pub struct TelemetryChannel {
    slot: Signal<CriticalSectionRawMutex, TelemetrySample>,
    overwritten: AtomicU32,
}

impl TelemetryChannel {
    pub const fn new() -> Self {
        Self {
            slot: Signal::new(),
            overwritten: AtomicU32::new(0),
        }
    }

    /// Non-blocking; replaces a sample the transmitter has not taken yet
    pub fn publish(&self, sample: TelemetrySample) {
        if self.slot.signaled() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.slot.signal(sample);
    }

    /// Wait for the next sample
    pub async fn next(&self) -> TelemetrySample {
        self.slot.wait().await
    }

    pub fn try_take(&self) -> Option<TelemetrySample> {
        self.slot.try_take()
    }

    /// Samples replaced before being sent
    pub fn overwritten(&self) -> u32 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl Default for TelemetryChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes every `divisor`-th tick
#[derive(Debug, Clone, Copy)]
pub struct Downsampler {
    counter: u16,
}

impl Downsampler {
    pub const fn new() -> Self {
        Self { counter: 0 }
    }

    /// Advance one tick; `true` on the ticks that publish
    pub fn tick(&mut self, divisor: u16) -> bool {
        let divisor = divisor.max(1);
        self.counter = self.counter.wrapping_add(1);
        if self.counter >= divisor {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new()
    }
}
