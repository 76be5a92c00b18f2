//! Wire message types for the Ember peer protocol.
//!
//! A message is one TCP stream, closed by the sender: a 12-byte command
//! name right-padded with `0x00`, followed by the bincode encoding of that
//! command's payload. Consensus-adjacent bytes are never JSON.

use serde::{Deserialize, Serialize};

use ember_core::constants::{COMMAND_LEN, MAX_MESSAGE_SIZE};
use ember_core::error::NetError;

/// What an inventory or getdata message refers to.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum InvKind {
    Block,
    Tx,
}

/// Handshake: advertise our protocol version and chain height.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct VersionPayload {
    pub from: String,
    pub version: u32,
    pub best_height: u64,
}

/// Gossip known peer addresses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AddrPayload {
    pub addrs: Vec<String>,
}

/// Request the full list of block hashes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetBlocksPayload {
    pub from: String,
}

/// Advertise hashes or transaction ids we hold.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct InvPayload {
    pub from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

/// Request one item by hash or id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GetDataPayload {
    pub from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

/// Deliver a serialized block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockPayload {
    pub from: String,
    pub block: Vec<u8>,
}

/// Deliver a serialized transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxPayload {
    pub from: String,
    pub tx: Vec<u8>,
}

/// A message sent between Ember peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

impl Message {
    /// The wire command name of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Encode as `command || payload`.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let payload = match self {
            Message::Version(p) => encode_payload(p),
            Message::Addr(p) => encode_payload(p),
            Message::GetBlocks(p) => encode_payload(p),
            Message::Inv(p) => encode_payload(p),
            Message::GetData(p) => encode_payload(p),
            Message::Block(p) => encode_payload(p),
            Message::Tx(p) => encode_payload(p),
        }?;

        let mut buf = Vec::with_capacity(COMMAND_LEN + payload.len());
        buf.extend_from_slice(&command_bytes(self.command()));
        buf.extend_from_slice(&payload);
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::Malformed(format!("message too large: {}", buf.len())));
        }
        Ok(buf)
    }

    /// Decode a framed message.
    pub fn decode(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < COMMAND_LEN {
            return Err(NetError::Malformed(format!("short message: {} bytes", data.len())));
        }
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::Malformed(format!("message too large: {}", data.len())));
        }

        let command = command_str(&data[..COMMAND_LEN]);
        let payload = &data[COMMAND_LEN..];
        match command.as_str() {
            "version" => Ok(Message::Version(decode_payload(payload)?)),
            "addr" => Ok(Message::Addr(decode_payload(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(decode_payload(payload)?)),
            "inv" => Ok(Message::Inv(decode_payload(payload)?)),
            "getdata" => Ok(Message::GetData(decode_payload(payload)?)),
            "block" => Ok(Message::Block(decode_payload(payload)?)),
            "tx" => Ok(Message::Tx(decode_payload(payload)?)),
            other => Err(NetError::UnknownCommand(other.to_string())),
        }
    }
}

fn encode_payload<T: bincode::Encode>(payload: &T) -> Result<Vec<u8>, NetError> {
    bincode::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| NetError::Malformed(e.to_string()))
}

fn decode_payload<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, NetError> {
    let (payload, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| NetError::Malformed(e.to_string()))?;
    Ok(payload)
}

/// Pad a command name to the fixed field width.
fn command_bytes(command: &str) -> [u8; COMMAND_LEN] {
    let mut bytes = [0u8; COMMAND_LEN];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

/// Read a command name, dropping the zero padding.
fn command_str(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0x00)
        .map(|&b| b as char)
        .collect()
}
