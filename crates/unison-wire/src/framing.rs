//! Message framing: input records, tick messages, and snapshot messages.
//!
//! Inputs travel as `{seq, clientId, frame?, data}` records. The `data`
//! payload is either a game input (an arbitrary codec value) or a small
//! typed control record (`join`/`leave`/`disconnect`).
//!
//! Snapshot message layout (all integers little-endian):
//! `frame: u32`, `roomIdLen: u16`, `roomId`, `snapshotLen: u32`,
//! `snapshotBytes` (codec object `{snapshot, hash}`), `inputCount: u16`,
//! then per input `{clientHash: u32, seq: u32, dataLen: u16, data[]}`.
//!
//! Tick message layout: `frame: u32 LE`, `inputCount: u8`, then the same
//! per-input framing.

use byteorder::{ByteOrder, LittleEndian};
use xxhash_rust::xxh32::xxh32;

use unison_ecs::prelude::WorldSnapshot;

use crate::codec::{decode_exact, encode};
use crate::snapshot::{snapshot_from_value, snapshot_to_value};
use crate::value::Value;
use crate::WireError;

/// The routing hash of a client id string (xxhash32, seed 0).
pub fn client_hash(client: &str) -> u32 {
    xxh32(client.as_bytes(), 0)
}

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

/// The kind of a control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// A client joined the room.
    Join,
    /// A client left the room.
    Leave,
    /// A client's connection dropped.
    Disconnect,
}

impl ControlKind {
    fn as_str(self) -> &'static str {
        match self {
            ControlKind::Join => "join",
            ControlKind::Leave => "leave",
            ControlKind::Disconnect => "disconnect",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "join" => Some(ControlKind::Join),
            "leave" => Some(ControlKind::Leave),
            "disconnect" => Some(ControlKind::Disconnect),
            _ => None,
        }
    }
}

/// A join/leave/disconnect control record.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRecord {
    /// What happened.
    pub kind: ControlKind,
    /// The client it happened to.
    pub client: String,
    /// Optional host-provided user payload (join only in practice).
    pub user: Option<Value>,
}

/// The payload of an input record.
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    /// A game input: an arbitrary codec value.
    Game(Value),
    /// A typed control record.
    Control(ControlRecord),
}

/// One input as it travels the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    /// Transport-assigned monotonic sequence number.
    pub seq: u32,
    /// Sender client id.
    pub client: String,
    /// The frame this input is stamped for, if the transport's ordered tick
    /// assigned one. Unstamped inputs apply before the next unprocessed
    /// frame.
    pub frame: Option<u32>,
    /// Payload.
    pub data: InputData,
}

impl InputRecord {
    /// A stamped game input.
    pub fn game(seq: u32, client: &str, frame: Option<u32>, data: Value) -> Self {
        Self {
            seq,
            client: client.to_owned(),
            frame,
            data: InputData::Game(data),
        }
    }

    /// A control record input.
    pub fn control(seq: u32, frame: Option<u32>, record: ControlRecord) -> Self {
        Self {
            seq,
            client: record.client.clone(),
            frame,
            data: InputData::Control(record),
        }
    }

    /// The full record as a codec value.
    pub fn to_value(&self) -> Value {
        let data = match &self.data {
            InputData::Game(v) => v.clone(),
            InputData::Control(c) => {
                let mut pairs = vec![
                    ("type", Value::from(c.kind.as_str())),
                    ("clientId", Value::from(c.client.as_str())),
                ];
                if let Some(user) = &c.user {
                    pairs.push(("user", user.clone()));
                }
                Value::object(pairs)
            }
        };
        let mut pairs = vec![
            ("seq", Value::Int(i64::from(self.seq))),
            ("clientId", Value::from(self.client.as_str())),
        ];
        if let Some(frame) = self.frame {
            pairs.push(("frame", Value::Int(i64::from(frame))));
        }
        pairs.push(("data", data));
        Value::object(pairs)
    }

    /// Parse a record from its codec value.
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        let seq = value
            .get("seq")
            .and_then(Value::as_i64)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| WireError::Malformed {
                details: "input record: missing seq".to_owned(),
            })?;
        let client = value
            .get("clientId")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::Malformed {
                details: "input record: missing clientId".to_owned(),
            })?
            .to_owned();
        let frame = match value.get("frame") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().and_then(|i| u32::try_from(i).ok()).ok_or_else(
                || WireError::Malformed {
                    details: "input record: bad frame".to_owned(),
                },
            )?),
        };
        let data_value = value.get("data").ok_or_else(|| WireError::Malformed {
            details: "input record: missing data".to_owned(),
        })?;

        // A data object whose "type" is a known control kind is a control
        // record; anything else is a game input.
        let data = match data_value.get("type").and_then(Value::as_str).and_then(ControlKind::from_str)
        {
            Some(kind) => {
                let control_client = data_value
                    .get("clientId")
                    .and_then(Value::as_str)
                    .unwrap_or(&client)
                    .to_owned();
                InputData::Control(ControlRecord {
                    kind,
                    client: control_client,
                    user: data_value.get("user").cloned(),
                })
            }
            None => InputData::Game(data_value.clone()),
        };

        Ok(Self {
            seq,
            client,
            frame,
            data,
        })
    }

    /// Encode to codec bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode(&self.to_value())
    }

    /// Decode from codec bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Self::from_value(&decode_exact(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Per-input framing (shared by tick and snapshot messages)
// ---------------------------------------------------------------------------

fn write_input(out: &mut Vec<u8>, input: &InputRecord) -> Result<(), WireError> {
    let data = input.encode()?;
    if data.len() > usize::from(u16::MAX) {
        return Err(WireError::CollectionTooLong { len: data.len() });
    }
    out.extend_from_slice(&client_hash(&input.client).to_le_bytes());
    out.extend_from_slice(&input.seq.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(&data);
    Ok(())
}

fn read_input(bytes: &[u8], offset: &mut usize) -> Result<InputRecord, WireError> {
    let take = |offset: &mut usize, n: usize| -> Result<&[u8], WireError> {
        if *offset + n > bytes.len() {
            return Err(WireError::Truncated { offset: *offset });
        }
        let slice = &bytes[*offset..*offset + n];
        *offset += n;
        Ok(slice)
    };
    let hash = LittleEndian::read_u32(take(offset, 4)?);
    let seq = LittleEndian::read_u32(take(offset, 4)?);
    let len = usize::from(LittleEndian::read_u16(take(offset, 2)?));
    let record = InputRecord::decode(take(offset, len)?)?;
    if record.seq != seq {
        return Err(WireError::Malformed {
            details: format!("input framing seq {seq} disagrees with record seq {}", record.seq),
        });
    }
    if client_hash(&record.client) != hash {
        return Err(WireError::Malformed {
            details: format!("input framing client hash mismatch for '{}'", record.client),
        });
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// TickMessage
// ---------------------------------------------------------------------------

/// One ordered server tick: a frame number and the inputs confirmed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TickMessage {
    /// The frame these inputs are confirmed for.
    pub frame: u32,
    /// Confirmed inputs.
    pub inputs: Vec<InputRecord>,
}

impl TickMessage {
    /// Encode: `frame: u32 LE`, `inputCount: u8`, inputs.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.inputs.len() > usize::from(u8::MAX) {
            return Err(WireError::CollectionTooLong { len: self.inputs.len() });
        }
        let mut out = Vec::new();
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.push(self.inputs.len() as u8);
        for input in &self.inputs {
            write_input(&mut out, input)?;
        }
        Ok(out)
    }

    /// Decode a tick message, rejecting truncated input.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 5 {
            return Err(WireError::Truncated { offset: bytes.len() });
        }
        let frame = LittleEndian::read_u32(&bytes[0..4]);
        let count = bytes[4];
        let mut offset = 5usize;
        let mut inputs = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            inputs.push(read_input(bytes, &mut offset)?);
        }
        if offset != bytes.len() {
            return Err(WireError::TrailingBytes {
                len: bytes.len() - offset,
            });
        }
        Ok(Self { frame, inputs })
    }
}

// ---------------------------------------------------------------------------
// SnapshotMessage
// ---------------------------------------------------------------------------

/// An authoritative snapshot plus the inputs pending after it.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMessage {
    /// Current server frame (may be ahead of `snapshot.frame`).
    pub frame: u32,
    /// Room id.
    pub room_id: String,
    /// The world snapshot.
    pub snapshot: WorldSnapshot,
    /// Canonical state hash of the snapshot.
    pub hash: u32,
    /// Inputs with effects not yet included in the snapshot.
    pub inputs: Vec<InputRecord>,
}

impl SnapshotMessage {
    /// Encode the snapshot message framing.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let room = self.room_id.as_bytes();
        if room.len() > usize::from(u16::MAX) {
            return Err(WireError::StringTooLong { len: room.len() });
        }
        if self.inputs.len() > usize::from(u16::MAX) {
            return Err(WireError::CollectionTooLong { len: self.inputs.len() });
        }

        let payload = encode(&Value::object(vec![
            ("snapshot", snapshot_to_value(&self.snapshot)),
            ("hash", Value::Int(i64::from(self.hash))),
        ]))?;

        let mut out = Vec::new();
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&(room.len() as u16).to_le_bytes());
        out.extend_from_slice(room);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&(self.inputs.len() as u16).to_le_bytes());
        for input in &self.inputs {
            write_input(&mut out, input)?;
        }
        Ok(out)
    }

    /// Decode the snapshot message framing.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut offset = 0usize;
        let take = |offset: &mut usize, n: usize| -> Result<&[u8], WireError> {
            if *offset + n > bytes.len() {
                return Err(WireError::Truncated { offset: *offset });
            }
            let slice = &bytes[*offset..*offset + n];
            *offset += n;
            Ok(slice)
        };

        let frame = LittleEndian::read_u32(take(&mut offset, 4)?);
        let room_len = usize::from(LittleEndian::read_u16(take(&mut offset, 2)?));
        let room_offset = offset;
        let room_id = String::from_utf8(take(&mut offset, room_len)?.to_vec())
            .map_err(|_| WireError::InvalidUtf8 { offset: room_offset })?;

        let payload_len = LittleEndian::read_u32(take(&mut offset, 4)?) as usize;
        let payload = decode_exact(take(&mut offset, payload_len)?)?;
        let snapshot_value = payload.get("snapshot").ok_or_else(|| WireError::Malformed {
            details: "snapshot message: payload missing 'snapshot'".to_owned(),
        })?;
        let snapshot = snapshot_from_value(snapshot_value)?;
        let hash = payload
            .get("hash")
            .and_then(Value::as_i64)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| WireError::Malformed {
                details: "snapshot message: payload missing 'hash'".to_owned(),
            })?;

        let input_count = LittleEndian::read_u16(take(&mut offset, 2)?);
        let mut inputs = Vec::with_capacity(usize::from(input_count));
        for _ in 0..input_count {
            inputs.push(read_input(bytes, &mut offset)?);
        }
        if offset != bytes.len() {
            return Err(WireError::TrailingBytes {
                len: bytes.len() - offset,
            });
        }

        Ok(Self {
            frame,
            room_id,
            snapshot,
            hash,
            inputs,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use unison_ecs::prelude::*;

    fn sample_snapshot() -> WorldSnapshot {
        let mut world = World::new("frame-test");
        world
            .register_component(ComponentSchema::new(
                "position",
                vec![FieldDef::new("x", FieldValue::I32(0))],
            ))
            .unwrap();
        world
            .register_entity_type(EntityTypeDef::new("food").with_component("position"))
            .unwrap();
        world.spawn("food", &[]).unwrap();
        world.set_frame(50);
        capture_snapshot(&world, 7, true)
    }

    #[test]
    fn game_input_roundtrip() {
        let record = InputRecord::game(
            9,
            "alice",
            Some(17),
            Value::object(vec![("button", Value::Bool(true))]),
        );
        let bytes = record.encode().unwrap();
        assert_eq!(InputRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn unstamped_input_has_no_frame() {
        let record = InputRecord::game(3, "bob", None, Value::Null);
        let decoded = InputRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.frame, None);
    }

    #[test]
    fn control_record_roundtrip() {
        let record = InputRecord::control(
            1,
            Some(0),
            ControlRecord {
                kind: ControlKind::Join,
                client: "carol".to_owned(),
                user: Some(Value::object(vec![("name", Value::from("Carol"))])),
            },
        );
        let decoded = InputRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        match decoded.data {
            InputData::Control(c) => {
                assert_eq!(c.kind, ControlKind::Join);
                assert_eq!(c.client, "carol");
            }
            InputData::Game(_) => panic!("expected control record"),
        }
    }

    #[test]
    fn game_input_with_type_key_not_mistaken_for_control() {
        // Only the known control kinds flip a payload into a control record.
        let record = InputRecord::game(
            2,
            "dave",
            None,
            Value::object(vec![("type", Value::from("attack"))]),
        );
        let decoded = InputRecord::decode(&record.encode().unwrap()).unwrap();
        assert!(matches!(decoded.data, InputData::Game(_)));
    }

    #[test]
    fn tick_message_roundtrip() {
        let msg = TickMessage {
            frame: 33,
            inputs: vec![
                InputRecord::game(5, "alice", Some(33), Value::Int(1)),
                InputRecord::game(6, "bob", Some(33), Value::Int(2)),
            ],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(TickMessage::decode(&bytes).unwrap(), msg);
        // Header: frame LE then count byte.
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 33);
        assert_eq!(bytes[4], 2);
    }

    #[test]
    fn snapshot_message_roundtrip() {
        let msg = SnapshotMessage {
            frame: 55,
            room_id: "room-9".to_owned(),
            snapshot: sample_snapshot(),
            hash: 0xDEAD_BEEF,
            inputs: vec![InputRecord::game(8, "alice", Some(51), Value::Bool(true))],
        };
        let bytes = msg.encode().unwrap();
        let decoded = SnapshotMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_messages_are_rejected() {
        let msg = TickMessage {
            frame: 1,
            inputs: vec![InputRecord::game(1, "a", Some(1), Value::Int(7))],
        };
        let bytes = msg.encode().unwrap();
        for cut in 0..bytes.len() {
            assert!(TickMessage::decode(&bytes[..cut]).is_err(), "cut {cut}");
        }
    }

    #[test]
    fn framing_seq_mismatch_is_malformed() {
        let msg = TickMessage {
            frame: 1,
            inputs: vec![InputRecord::game(300, "a", Some(1), Value::Int(7))],
        };
        let mut bytes = msg.encode().unwrap();
        // Corrupt the framing seq (offset 5 is clientHash, 9 is seq).
        bytes[9] ^= 0xFF;
        assert!(matches!(
            TickMessage::decode(&bytes),
            Err(WireError::Malformed { .. })
        ));
    }

    #[test]
    fn client_hash_is_stable() {
        assert_eq!(client_hash("alice"), client_hash("alice"));
        assert_ne!(client_hash("alice"), client_hash("bob"));
    }
}
