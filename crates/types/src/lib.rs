use alloy::primitives::{I256, U256};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Serde helpers emitting canonical decimal strings for balance-sized
/// integers. JSON numbers would silently truncate past 2^53.
pub mod decimal {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// As [`decimal`], for signed deltas.
pub mod decimal_signed {
    use alloy::primitives::I256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &I256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A simulation request. Exactly one of `transaction` (account-model) or
/// `extrinsic` (runtime-module) must be present; the dispatch layer rejects
/// everything else before it reaches an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub sender: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<EvmTransaction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic: Option<ExtrinsicSpec>,

    /// Fungible contract addresses whose balances the report should track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_tokens: Option<Vec<String>>,

    /// Asset ids whose balances the report should track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_assets: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
    pub to: String,

    /// Hex calldata; absent means an empty payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Decimal wei string; absent means zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Decimal gas string; absent defers to the backend default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
}

/// Either an opaque pre-encoded call or a structured pallet call whose
/// arguments may themselves nest further calls (batch/proxy/multisig).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtrinsicSpec {
    Raw(RawExtrinsic),
    Call(CallSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtrinsic {
    pub raw_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSpec {
    pub pallet: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// On-chain metadata for a fungible token or asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

/// One balance row inside an address state. The native row always comes
/// first; fungibles follow in observation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// `"native"`, a lowercase contract address, or a decimal asset id.
    pub token: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "decimal")]
    pub amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub token: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "decimal")]
    pub before: U256,
    #[serde(with = "decimal")]
    pub after: U256,
    #[serde(with = "decimal_signed")]
    pub delta: I256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressState {
    pub address: String,
    pub before: Vec<TokenBalance>,
    pub after: Vec<TokenBalance>,
    pub changes: Vec<BalanceChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateImpactReport {
    pub sender: AddressState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<AddressState>,
    pub other_affected: Vec<AddressState>,
}

/// Where a decoded event originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventOrigin {
    /// Emitting contract address (account-model).
    Contract(String),
    /// Emitting pallet and event name (runtime-module).
    Pallet { pallet: String, method: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    pub origin: EventOrigin,
    pub name: String,
    /// Log index (account-model) or event-record index (runtime-module).
    /// Strictly ascending and unique within a response.
    pub ordinal: u32,
    pub fields: IndexMap<String, String>,
}

/// Decoded account-model execution error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EvmDecodedError {
    Revert {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    Panic {
        code: u64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    Custom {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    Unknown {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl EvmDecodedError {
    pub fn message(&self) -> &str {
        match self {
            Self::Revert { message, .. }
            | Self::Panic { message, .. }
            | Self::Unknown { message, .. } => message,
            Self::Custom { name, .. } => name,
        }
    }
}

/// Decoded runtime-module dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubstrateDecodedError {
    Module {
        pallet: String,
        error: String,
        docs: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<serde_json::Value>,
    },
    BadOrigin {
        message: String,
    },
    CannotLookup {
        message: String,
    },
    Arithmetic {
        message: String,
    },
    Token {
        message: String,
    },
    Other {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<serde_json::Value>,
    },
    Unknown {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedError {
    Evm(EvmDecodedError),
    Substrate(SubstrateDecodedError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmGasReport {
    #[serde(with = "decimal")]
    pub gas_used: U256,
    #[serde(with = "decimal")]
    pub gas_price: U256,
    #[serde(with = "decimal")]
    pub total_cost_wei: U256,
    /// Human form, floor-divided by 10^decimals with six fractional digits.
    pub total_cost_native: String,
    pub native_symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightInfo {
    pub ref_time: u64,
    pub proof_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateGasReport {
    pub weight: WeightInfo,
    #[serde(with = "decimal")]
    pub partial_fee: U256,
    pub partial_fee_formatted: String,
    pub native_symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GasReport {
    Evm(EvmGasReport),
    Substrate(SubstrateGasReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    pub success: bool,
    pub state_changes: StateImpactReport,
    pub events: Vec<DecodedEvent>,
    pub gas: GasReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DecodedError>,
}

/// Probe result for one backend, aggregated by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub status: String,
    pub chain: String,
}
