// CAN protocol for per-node parameter, setpoint and telemetry distribution
//
// Standard 11-bit identifier = (node_index << 8) | field_code.
// Payloads are little-endian; most fields carry one f32.

pub mod feedback;

pub use feedback::{FeedbackError, FeedbackRecord};

use embedded_can::{Frame, Id, StandardId};

use crate::config::StorageCommand;
use crate::fmt::*;
use crate::foc::{ControlMode, Direction, TorqueMode};
use crate::node::{NodeParams, NodeRole};

/// Highest node index that fits the 3-bit node field
pub const MAX_NODE_INDEX: u8 = 0x07;

/// Field codes (low 8 bits of the identifier)
pub mod field_codes {
    /// Disable the node (no data)
    pub const STOP: u8 = 0x00;

    /// Phase resistance [Ω] (f32, 4 bytes)
    pub const RESISTANCE: u8 = 0x01;

    /// Phase inductance [H] (f32, 4 bytes)
    pub const INDUCTANCE: u8 = 0x02;

    /// Back-EMF constant [V·s/rad] (f32, 4 bytes)
    pub const BEMF_CONSTANT: u8 = 0x03;

    /// Velocity limit [rad/s] (f32, 4 bytes)
    pub const VELOCITY_LIMIT: u8 = 0x04;

    /// Voltage limit [V] (f32, 4 bytes)
    pub const VOLTAGE_LIMIT: u8 = 0x05;

    /// Current limit [A] (f32, 4 bytes)
    pub const CURRENT_LIMIT: u8 = 0x06;

    /// Zero electrical angle [rad] (f32, 4 bytes)
    pub const ZERO_ELECTRIC_ANGLE: u8 = 0x07;

    /// Packed sensor config (u8: bit0 sense_dir reversed, bits1..3 controller mode)
    pub const SENSOR_CONFIG: u8 = 0x08;

    /// Pole pairs (u8, 1 byte)
    pub const POLE_PAIRS: u8 = 0x09;

    // === PID gains: base + term (P, I, D, ramp, Tf), f32 each ===
    pub const VELOCITY_PID_BASE: u8 = 0x10;
    pub const ANGLE_PID_BASE: u8 = 0x20;
    pub const CURRENT_PID_BASE: u8 = 0x30;

    /// Controller mode (u8, 1 byte)
    pub const CONTROLLER: u8 = 0x40;

    /// Target setpoint (f32, 4 bytes)
    pub const TARGET: u8 = 0x41;

    /// Torque mode (u8: 0 voltage, 1 current)
    pub const TORQUE_MODE: u8 = 0x42;

    /// Node role (u8: 0 independent, 1 follower)
    pub const ROLE: u8 = 0x43;

    /// Telemetry downsample divisor (u16, 2 bytes)
    pub const TELEMETRY_DIVISOR: u8 = 0x44;

    /// Save config to flash (no data)
    pub const SAVE_CONFIG: u8 = 0x50;

    /// Reload config from flash (no data)
    pub const RELOAD_CONFIG: u8 = 0x51;

    /// Reset config to defaults (no data)
    pub const RESET_CONFIG: u8 = 0x52;

    /// Partner angle telemetry [rad] (f32, 4 bytes), addressed to the partner node
    pub const PARTNER_ANGLE: u8 = 0x80;

    /// Packed feedback record (7 bytes), addressed to the sender
    pub const FEEDBACK: u8 = 0x81;
}

/// PID loop selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PidStage {
    Velocity,
    Angle,
    Current,
}

impl PidStage {
    const fn base(self) -> u8 {
        match self {
            Self::Velocity => field_codes::VELOCITY_PID_BASE,
            Self::Angle => field_codes::ANGLE_PID_BASE,
            Self::Current => field_codes::CURRENT_PID_BASE,
        }
    }
}

/// PID gain term selector (offset from the stage base code)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PidTerm {
    P = 0,
    I = 1,
    D = 2,
    Ramp = 3,
    Tf = 4,
}

impl PidTerm {
    const ALL: [Self; 5] = [Self::P, Self::I, Self::D, Self::Ramp, Self::Tf];
}

/// Node index (0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeIndex(u8);

impl NodeIndex {
    pub const fn new(index: u8) -> Option<Self> {
        if index <= MAX_NODE_INDEX {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Masks to the 3-bit node field
    pub const fn wrapping(index: u8) -> Self {
        Self(index & MAX_NODE_INDEX)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Partner rotation for telemetry: `partner = (node + offset) % count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerMap {
    pub offset: u8,
    pub count: u8,
}

impl PartnerMap {
    pub const DEFAULT: Self = Self {
        offset: crate::config::params::can::PARTNER_OFFSET,
        count: crate::config::params::can::NODE_COUNT,
    };

    pub fn partner_of(&self, node: NodeIndex) -> NodeIndex {
        let count = self.count.clamp(1, MAX_NODE_INDEX + 1) as u16;
        NodeIndex::wrapping(((node.get() as u16 + self.offset as u16) % count) as u8)
    }
}

/// Decoded identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId {
    pub node: NodeIndex,
    pub field: u8,
}

impl BusId {
    pub const fn new(node: NodeIndex, field: u8) -> Self {
        Self { node, field }
    }

    pub const fn raw(self) -> u16 {
        ((self.node.get() as u16) << 8) | self.field as u16
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self {
            node: NodeIndex::wrapping((raw >> 8) as u8),
            field: (raw & 0xFF) as u8,
        }
    }
}

/// One bus frame: identifier plus up to 8 payload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusMessage {
    pub id: BusId,
    len: u8,
    data: [u8; 8],
}

impl BusMessage {
    /// `None` if the payload is longer than 8 bytes
    pub fn new(id: BusId, payload: &[u8]) -> Option<Self> {
        if payload.len() > 8 {
            return None;
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Declared data length
    pub fn dlc(&self) -> usize {
        self.len as usize
    }

    /// Convert from any `embedded_can` frame
    pub fn from_frame<F: Frame>(frame: &F) -> Result<Self, DecodeError> {
        if frame.is_remote_frame() {
            return Err(DecodeError::RemoteFrame);
        }
        let raw = match frame.id() {
            Id::Standard(id) => id.as_raw(),
            Id::Extended(_) => return Err(DecodeError::ExtendedId),
        };
        Self::new(BusId::from_raw(raw), frame.data()).ok_or(DecodeError::LengthMismatch {
            field: (raw & 0xFF) as u8,
            expected: 8,
            actual: frame.dlc(),
        })
    }

    /// Convert into any `embedded_can` frame type
    pub fn to_frame<F: Frame>(&self) -> Option<F> {
        let id = StandardId::new(self.id.raw())?;
        F::new(id, self.payload())
    }
}

/// Receive-side decode failures (logged and dropped by the dispatcher)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Field code not in the table (silently ignored)
    UnknownField(u8),
    /// Payload length does not match the field
    LengthMismatch {
        field: u8,
        expected: usize,
        actual: usize,
    },
    /// Enum byte outside its range
    InvalidValue { field: u8, value: u8 },
    /// Packed feedback record failed its CRC
    Feedback(FeedbackError),
    ExtendedId,
    RemoteFrame,
}

/// One typed field update
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldUpdate {
    Stop,
    Resistance(f32),
    Inductance(f32),
    BemfConstant(f32),
    VelocityLimit(f32),
    VoltageLimit(f32),
    CurrentLimit(f32),
    ZeroElectricAngle(f32),
    SensorConfig {
        direction: Direction,
        controller: ControlMode,
    },
    PolePairs(u8),
    Gain {
        stage: PidStage,
        term: PidTerm,
        value: f32,
    },
    Controller(ControlMode),
    Target(f32),
    TorqueMode(TorqueMode),
    Role(NodeRole),
    TelemetryDivisor(u16),
    Storage(StorageCommand),
    PartnerAngle(f32),
    Feedback(FeedbackRecord),
}

impl FieldUpdate {
    /// Field code this update travels under
    pub fn field_code(&self) -> u8 {
        use field_codes::*;
        match self {
            Self::Stop => STOP,
            Self::Resistance(_) => RESISTANCE,
            Self::Inductance(_) => INDUCTANCE,
            Self::BemfConstant(_) => BEMF_CONSTANT,
            Self::VelocityLimit(_) => VELOCITY_LIMIT,
            Self::VoltageLimit(_) => VOLTAGE_LIMIT,
            Self::CurrentLimit(_) => CURRENT_LIMIT,
            Self::ZeroElectricAngle(_) => ZERO_ELECTRIC_ANGLE,
            Self::SensorConfig { .. } => SENSOR_CONFIG,
            Self::PolePairs(_) => POLE_PAIRS,
            Self::Gain { stage, term, .. } => stage.base() + *term as u8,
            Self::Controller(_) => CONTROLLER,
            Self::Target(_) => TARGET,
            Self::TorqueMode(_) => TORQUE_MODE,
            Self::Role(_) => ROLE,
            Self::TelemetryDivisor(_) => TELEMETRY_DIVISOR,
            Self::Storage(StorageCommand::Save) => SAVE_CONFIG,
            Self::Storage(StorageCommand::Reload) => RELOAD_CONFIG,
            Self::Storage(StorageCommand::ResetDefaults) => RESET_CONFIG,
            Self::PartnerAngle(_) => PARTNER_ANGLE,
            Self::Feedback(_) => FEEDBACK,
        }
    }
}

/// Packed sensor config byte: bit0 = sense_dir reversed, bits 1..3 = controller mode
pub fn pack_sensor_config(direction: Direction, controller: ControlMode) -> u8 {
    (direction.is_reversed() as u8) | (controller.code() << 1)
}

pub fn unpack_sensor_config(byte: u8) -> Result<(Direction, ControlMode), DecodeError> {
    let direction = Direction::from_reversed(byte & 0x01 != 0);
    let controller = ControlMode::try_from((byte >> 1) & 0x07).map_err(|value| {
        DecodeError::InvalidValue {
            field: field_codes::SENSOR_CONFIG,
            value,
        }
    })?;
    Ok((direction, controller))
}

fn expect_len(field: u8, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() != expected {
        error!(
            "CAN field 0x{:02x}: invalid data length {} (expected {})",
            field,
            data.len(),
            expected
        );
        return Err(DecodeError::LengthMismatch {
            field,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Parse a little-endian f32 payload (exactly 4 bytes)
pub fn parse_f32(field: u8, data: &[u8]) -> Result<f32, DecodeError> {
    expect_len(field, data, 4)?;
    Ok(f32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

fn parse_u8(field: u8, data: &[u8]) -> Result<u8, DecodeError> {
    expect_len(field, data, 1)?;
    Ok(data[0])
}

fn parse_enum<T: TryFrom<u8, Error = u8>>(field: u8, data: &[u8]) -> Result<T, DecodeError> {
    let byte = parse_u8(field, data)?;
    T::try_from(byte).map_err(|value| DecodeError::InvalidValue { field, value })
}

/// Decode the payload of one message into a typed update
pub fn decode(message: &BusMessage) -> Result<FieldUpdate, DecodeError> {
    use field_codes::*;

    let field = message.id.field;
    let data = message.payload();

    let update = match field {
        STOP => {
            expect_len(field, data, 0)?;
            FieldUpdate::Stop
        }
        RESISTANCE => FieldUpdate::Resistance(parse_f32(field, data)?),
        INDUCTANCE => FieldUpdate::Inductance(parse_f32(field, data)?),
        BEMF_CONSTANT => FieldUpdate::BemfConstant(parse_f32(field, data)?),
        VELOCITY_LIMIT => FieldUpdate::VelocityLimit(parse_f32(field, data)?),
        VOLTAGE_LIMIT => FieldUpdate::VoltageLimit(parse_f32(field, data)?),
        CURRENT_LIMIT => FieldUpdate::CurrentLimit(parse_f32(field, data)?),
        ZERO_ELECTRIC_ANGLE => FieldUpdate::ZeroElectricAngle(parse_f32(field, data)?),
        SENSOR_CONFIG => {
            let (direction, controller) = unpack_sensor_config(parse_u8(field, data)?)?;
            FieldUpdate::SensorConfig {
                direction,
                controller,
            }
        }
        POLE_PAIRS => FieldUpdate::PolePairs(parse_u8(field, data)?),
        0x10..=0x14 | 0x20..=0x24 | 0x30..=0x34 => {
            let stage = match field & 0xF0 {
                VELOCITY_PID_BASE => PidStage::Velocity,
                ANGLE_PID_BASE => PidStage::Angle,
                _ => PidStage::Current,
            };
            FieldUpdate::Gain {
                stage,
                term: PidTerm::ALL[(field & 0x0F) as usize],
                value: parse_f32(field, data)?,
            }
        }
        CONTROLLER => FieldUpdate::Controller(parse_enum(field, data)?),
        TARGET => FieldUpdate::Target(parse_f32(field, data)?),
        TORQUE_MODE => FieldUpdate::TorqueMode(parse_enum(field, data)?),
        ROLE => FieldUpdate::Role(parse_enum(field, data)?),
        TELEMETRY_DIVISOR => {
            expect_len(field, data, 2)?;
            FieldUpdate::TelemetryDivisor(u16::from_le_bytes([data[0], data[1]]))
        }
        SAVE_CONFIG | RELOAD_CONFIG | RESET_CONFIG => {
            expect_len(field, data, 0)?;
            FieldUpdate::Storage(match field {
                SAVE_CONFIG => StorageCommand::Save,
                RELOAD_CONFIG => StorageCommand::Reload,
                _ => StorageCommand::ResetDefaults,
            })
        }
        PARTNER_ANGLE => FieldUpdate::PartnerAngle(parse_f32(field, data)?),
        FEEDBACK => {
            expect_len(field, data, FeedbackRecord::LEN)?;
            let mut bytes = [0u8; FeedbackRecord::LEN];
            bytes.copy_from_slice(data);
            FieldUpdate::Feedback(FeedbackRecord::decode(&bytes).map_err(DecodeError::Feedback)?)
        }
        other => return Err(DecodeError::UnknownField(other)),
    };

    Ok(update)
}

/// Encode a typed update addressed to `node`
pub fn encode(node: NodeIndex, update: &FieldUpdate) -> BusMessage {
    let id = BusId::new(node, update.field_code());
    let mut data = [0u8; 8];
    let len = match *update {
        FieldUpdate::Stop | FieldUpdate::Storage(_) => 0,
        FieldUpdate::Resistance(v)
        | FieldUpdate::Inductance(v)
        | FieldUpdate::BemfConstant(v)
        | FieldUpdate::VelocityLimit(v)
        | FieldUpdate::VoltageLimit(v)
        | FieldUpdate::CurrentLimit(v)
        | FieldUpdate::ZeroElectricAngle(v)
        | FieldUpdate::Target(v)
        | FieldUpdate::PartnerAngle(v)
        | FieldUpdate::Gain { value: v, .. } => {
            data[..4].copy_from_slice(&v.to_le_bytes());
            4
        }
        FieldUpdate::SensorConfig {
            direction,
            controller,
        } => {
            data[0] = pack_sensor_config(direction, controller);
            1
        }
        FieldUpdate::PolePairs(pp) => {
            data[0] = pp;
            1
        }
        FieldUpdate::Controller(mode) => {
            data[0] = mode.code();
            1
        }
        FieldUpdate::TorqueMode(mode) => {
            data[0] = mode as u8;
            1
        }
        FieldUpdate::Role(role) => {
            data[0] = role as u8;
            1
        }
        FieldUpdate::TelemetryDivisor(divisor) => {
            data[..2].copy_from_slice(&divisor.to_le_bytes());
            2
        }
        FieldUpdate::Feedback(record) => {
            data[..FeedbackRecord::LEN].copy_from_slice(&record.encode());
            FeedbackRecord::LEN
        }
    };
    BusMessage {
        id,
        len: len as u8,
        data,
    }
}

/// Scalar parameter fields reachable through [`encode_parameter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterField {
    Resistance,
    Inductance,
    BemfConstant,
    VelocityLimit,
    VoltageLimit,
    CurrentLimit,
    ZeroElectricAngle,
    Target,
    Gain(PidStage, PidTerm),
}

/// One validated float plus its target field, as delivered by a configuration host
pub fn encode_parameter(node: NodeIndex, field: ParameterField, value: f32) -> BusMessage {
    let update = match field {
        ParameterField::Resistance => FieldUpdate::Resistance(value),
        ParameterField::Inductance => FieldUpdate::Inductance(value),
        ParameterField::BemfConstant => FieldUpdate::BemfConstant(value),
        ParameterField::VelocityLimit => FieldUpdate::VelocityLimit(value),
        ParameterField::VoltageLimit => FieldUpdate::VoltageLimit(value),
        ParameterField::CurrentLimit => FieldUpdate::CurrentLimit(value),
        ParameterField::ZeroElectricAngle => FieldUpdate::ZeroElectricAngle(value),
        ParameterField::Target => FieldUpdate::Target(value),
        ParameterField::Gain(stage, term) => FieldUpdate::Gain { stage, term, value },
    };
    encode(node, &update)
}

/// Flat per-motor record from an external configuration host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRecord {
    pub resistance: f32,
    pub inductance: f32,
    pub bemf_constant: f32,
    pub voltage_limit: f32,
    pub current_limit: f32,
    pub velocity_limit: f32,
    pub sense_dir: Direction,
    pub zero_electric_angle: f32,
    /// (P, I, D)
    pub velocity_pid: [f32; 3],
    /// (P, I, D)
    pub angle_pid: [f32; 3],
    pub controller: ControlMode,
}

impl ParameterRecord {
    /// Number of messages [`Self::updates`] produces
    pub const MESSAGE_COUNT: usize = 14;

    pub fn from_params(params: &NodeParams) -> Self {
        Self {
            resistance: params.phase_resistance,
            inductance: params.phase_inductance,
            bemf_constant: params.bemf_constant,
            voltage_limit: params.voltage_limit,
            current_limit: params.current_limit,
            velocity_limit: params.velocity_limit,
            sense_dir: params.sensor_direction,
            zero_electric_angle: params.zero_electrical_angle,
            velocity_pid: [params.velocity_pid.p, params.velocity_pid.i, params.velocity_pid.d],
            angle_pid: [params.angle_pid.p, params.angle_pid.i, params.angle_pid.d],
            controller: params.controller,
        }
    }

    /// Field-by-field updates; limits go out before the mode so a node is
    /// never enabled with stale limits
    pub fn updates(&self) -> [FieldUpdate; Self::MESSAGE_COUNT] {
        let gain = |stage, term, value| FieldUpdate::Gain { stage, term, value };
        [
            FieldUpdate::Resistance(self.resistance),
            FieldUpdate::Inductance(self.inductance),
            FieldUpdate::BemfConstant(self.bemf_constant),
            FieldUpdate::VoltageLimit(self.voltage_limit),
            FieldUpdate::CurrentLimit(self.current_limit),
            FieldUpdate::VelocityLimit(self.velocity_limit),
            FieldUpdate::ZeroElectricAngle(self.zero_electric_angle),
            gain(PidStage::Velocity, PidTerm::P, self.velocity_pid[0]),
            gain(PidStage::Velocity, PidTerm::I, self.velocity_pid[1]),
            gain(PidStage::Velocity, PidTerm::D, self.velocity_pid[2]),
            gain(PidStage::Angle, PidTerm::P, self.angle_pid[0]),
            gain(PidStage::Angle, PidTerm::I, self.angle_pid[1]),
            gain(PidStage::Angle, PidTerm::D, self.angle_pid[2]),
            FieldUpdate::SensorConfig {
                direction: self.sense_dir,
                controller: self.controller,
            },
        ]
    }

    pub fn messages(&self, node: NodeIndex) -> impl Iterator<Item = BusMessage> {
        self.updates().into_iter().map(move |u| encode(node, &u))
    }
}

/// Outbound telemetry: measured angle addressed to the partner node
pub fn encode_partner_angle(sender: NodeIndex, angle: f32, partners: &PartnerMap) -> BusMessage {
    encode(partners.partner_of(sender), &FieldUpdate::PartnerAngle(angle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeIndex {
        NodeIndex::new(n).unwrap()
    }

    fn message(raw_id: u16, payload: &[u8]) -> BusMessage {
        BusMessage::new(BusId::from_raw(raw_id), payload).unwrap()
    }

    #[test]
    fn test_identifier_layout() {
        let id = BusId::new(node(3), field_codes::TARGET);
        assert_eq!(id.raw(), 0x341);
        assert_eq!(BusId::from_raw(0x341), id);
        assert_eq!(BusId::from_raw(0x7FF).node.get(), 7);
    }

    #[test]
    fn test_velocity_limit_bit_exact() {
        let msg = encode_parameter(node(0), ParameterField::VelocityLimit, 12.5);
        assert_eq!(msg.id.raw(), 0x004);
        assert_eq!(msg.dlc(), 4);
        match decode(&msg).unwrap() {
            FieldUpdate::VelocityLimit(v) => assert_eq!(v.to_bits(), 12.5f32.to_bits()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let msg = message(0x001, &[0x42]);
        assert_eq!(
            decode(&msg),
            Err(DecodeError::LengthMismatch {
                field: field_codes::RESISTANCE,
                expected: 4,
                actual: 1
            })
        );
    }

    #[test]
    fn test_unknown_field() {
        let msg = message(0x0EE, &[1, 2, 3, 4]);
        assert_eq!(decode(&msg), Err(DecodeError::UnknownField(0xEE)));
    }

    #[test]
    fn test_sensor_config_packing() {
        let byte = pack_sensor_config(Direction::Reversed, ControlMode::AngleClosedLoop);
        assert_eq!(byte, 0b0000_0111);
        assert_eq!(
            unpack_sensor_config(byte),
            Ok((Direction::Reversed, ControlMode::AngleClosedLoop))
        );
        assert!(unpack_sensor_config(0b0000_1110).is_err());
    }

    #[test]
    fn test_gain_codes() {
        let msg = encode_parameter(node(1), ParameterField::Gain(PidStage::Angle, PidTerm::I), 0.75);
        assert_eq!(msg.id.raw(), 0x121);
        assert_eq!(
            decode(&msg),
            Ok(FieldUpdate::Gain {
                stage: PidStage::Angle,
                term: PidTerm::I,
                value: 0.75
            })
        );
        // 0x15 is past the last term of a stage
        assert_eq!(decode(&message(0x015, &[0; 4])), Err(DecodeError::UnknownField(0x15)));
    }

    #[test]
    fn test_controller_out_of_range() {
        assert_eq!(
            decode(&message(0x040, &[9])),
            Err(DecodeError::InvalidValue {
                field: field_codes::CONTROLLER,
                value: 9
            })
        );
    }

    #[test]
    fn test_partner_rotation() {
        let map = PartnerMap::DEFAULT;
        assert_eq!(map.partner_of(node(0)), node(2));
        assert_eq!(map.partner_of(node(1)), node(3));
        assert_eq!(map.partner_of(node(2)), node(0));
        assert_eq!(map.partner_of(node(3)), node(1));

        let msg = encode_partner_angle(node(1), 3.0, &map);
        assert_eq!(msg.id.raw(), 0x380);
        assert_eq!(decode(&msg), Ok(FieldUpdate::PartnerAngle(3.0)));
    }

    #[test]
    fn test_parameter_record_sends_mode_last() {
        let record = ParameterRecord::from_params(&NodeParams::new());
        let messages: Vec<BusMessage> = record.messages(node(2)).collect();
        assert_eq!(messages.len(), ParameterRecord::MESSAGE_COUNT);
        assert!(messages.iter().all(|m| m.id.node == node(2)));
        assert_eq!(messages.last().unwrap().id.field, field_codes::SENSOR_CONFIG);
    }

    #[test]
    fn test_storage_commands_have_no_payload() {
        assert_eq!(
            decode(&message(0x050, &[])),
            Ok(FieldUpdate::Storage(StorageCommand::Save))
        );
        assert!(decode(&message(0x052, &[1])).is_err());
    }

    struct TestFrame {
        id: Id,
        data: [u8; 8],
        len: usize,
    }

    impl Frame for TestFrame {
        fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
            if data.len() > 8 {
                return None;
            }
            let mut buf = [0u8; 8];
            buf[..data.len()].copy_from_slice(data);
            Some(Self {
                id: id.into(),
                data: buf,
                len: data.len(),
            })
        }

        fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
            None
        }

        fn is_extended(&self) -> bool {
            matches!(self.id, Id::Extended(_))
        }

        fn is_remote_frame(&self) -> bool {
            false
        }

        fn id(&self) -> Id {
            self.id
        }

        fn dlc(&self) -> usize {
            self.len
        }

        fn data(&self) -> &[u8] {
            &self.data[..self.len]
        }
    }

    #[test]
    fn test_frame_conversion() {
        let msg = encode(node(2), &FieldUpdate::Target(-1.5));
        let frame: TestFrame = msg.to_frame().unwrap();
        assert_eq!(frame.id(), Id::Standard(StandardId::new(0x241).unwrap()));
        assert_eq!(BusMessage::from_frame(&frame), Ok(msg));

        let ext = TestFrame::new(embedded_can::ExtendedId::new(0x241).unwrap(), &[]).unwrap();
        assert_eq!(BusMessage::from_frame(&ext), Err(DecodeError::ExtendedId));
    }
}
