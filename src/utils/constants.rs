/// Event kind of marketplace orders on the Nostr network.
pub const NOSTR_KIND_INSCRIPTION: u16 = 802;
pub const DEFAULT_EXCHANGE_TAG: &str = "deezy";
/// Size used when estimating a single-input, single-output send.
pub const ASSUMED_TX_BYTES: u64 = 111;
/// Value of the small outputs reserved to pad the artifact position.
pub const DUMMY_UTXO_VALUE: u64 = 600;
/// Outputs below this value are kept out of coin selection.
pub const MIN_OUTPUT_VALUE: u64 = 10_000;
/// Value assigned to the artifact output of a bid.
pub const ARTIFACT_OUTPUT_VALUE: u64 = 10_000;
/// Number of concurrent outpoint lookups.
pub const OUTPOINT_BATCH_SIZE: usize = 15;

/// Base transaction size in vbytes.
pub const BASE_TX_VBYTES: f64 = 10.0;
/// Single key spend P2TR input size in vbytes.
pub const INPUT_VBYTES: f64 = 57.5;
/// P2TR output size in vbytes.
pub const OUTPUT_VBYTES: f64 = 43.0;
