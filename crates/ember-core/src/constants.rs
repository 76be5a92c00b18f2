//! Protocol constants. Monetary values are in whole coins.

/// Block reward paid by a coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Default proof-of-work difficulty. Larger means a smaller target and a
/// harder puzzle.
pub const TARGET_BITS: u32 = 16;

/// Upper bound of the nonce search space.
pub const MAX_NONCE: i64 = i64::MAX;

/// Version byte prepended to the pubkey hash in an address payload.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Number of checksum bytes appended to an address payload.
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Payload carried by the genesis coinbase input.
pub const GENESIS_COINBASE_DATA: &str = "ember genesis: the first spark";

/// Random payload length for non-genesis coinbase inputs.
pub const COINBASE_RANDOM_LEN: usize = 20;

/// Wire command field width in bytes, right-padded with zeroes.
pub const COMMAND_LEN: usize = 12;

/// Protocol version advertised in the handshake.
pub const NODE_VERSION: u32 = 1;

/// Seed address of the relay (central) node.
pub const DEFAULT_CENTRAL_ADDR: &str = "127.0.0.1:3000";

/// Hard cap on a single wire message, command header included.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1_048_576;
