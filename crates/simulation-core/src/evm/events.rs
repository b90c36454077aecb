use std::collections::HashMap;

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    hex,
    json_abi::{Event, JsonAbi},
    primitives::B256,
    rpc::types::Log,
};
use indexmap::IndexMap;

/// Event signatures the decoder recognises out of the box: the fungible and
/// non-fungible transfer families, the common DEX pair events, and the
/// proxy/ownership housekeeping events that show up around them.
const CATALOGUE: &[&str] = &[
    "event Transfer(address indexed from, address indexed to, uint256 value)",
    "event Transfer(address indexed from, address indexed to, uint256 indexed tokenId)",
    "event Approval(address indexed owner, address indexed spender, uint256 value)",
    "event Approval(address indexed owner, address indexed approved, uint256 indexed tokenId)",
    "event ApprovalForAll(address indexed owner, address indexed operator, bool approved)",
    "event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value)",
    "event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values)",
    "event URI(string value, uint256 indexed id)",
    "event Swap(address indexed sender, uint256 amount0In, uint256 amount1In, uint256 amount0Out, uint256 amount1Out, address indexed to)",
    "event Mint(address indexed sender, uint256 amount0, uint256 amount1)",
    "event Burn(address indexed sender, uint256 amount0, uint256 amount1, address indexed to)",
    "event Sync(uint112 reserve0, uint112 reserve1)",
    "event Deposit(address indexed dst, uint256 wad)",
    "event Withdrawal(address indexed src, uint256 wad)",
    "event OwnershipTransferred(address indexed previousOwner, address indexed newOwner)",
    "event Upgraded(address indexed implementation)",
];

#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub name: String,
    /// Emitting contract, lowercase.
    pub contract: String,
    pub signature: String,
    pub log_index: u64,
    pub args: IndexMap<String, String>,
}

pub struct LogDecoder {
    events: Vec<Event>,
    by_topic: HashMap<B256, usize>,
    custom: Vec<Event>,
}

impl Default for LogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogDecoder {
    pub fn new() -> Self {
        let abi = JsonAbi::parse(CATALOGUE.iter().copied()).expect("static catalogue");
        let events: Vec<Event> = abi.events().cloned().collect();
        let mut by_topic = HashMap::new();
        for (index, event) in events.iter().enumerate() {
            // First entry wins; colliding signatures are reached through the
            // linear fallback in decode().
            by_topic.entry(event.selector()).or_insert(index);
        }
        Self {
            events,
            by_topic,
            custom: Vec::new(),
        }
    }

    /// Extends the decoder with caller-supplied ABI events, tried before the
    /// built-in catalogue.
    pub fn with_custom_abi(mut self, abi: &JsonAbi) -> Self {
        self.custom = abi.events().cloned().collect();
        self
    }

    pub fn decode(&self, log: &Log) -> Option<DecodedLog> {
        let topic0 = *log.data().topics().first()?;

        for event in &self.custom {
            if event.selector() == topic0 {
                if let Some(decoded) = try_decode(event, log) {
                    return Some(decoded);
                }
            }
        }

        if let Some(&index) = self.by_topic.get(&topic0) {
            if let Some(decoded) = try_decode(&self.events[index], log) {
                return Some(decoded);
            }
        }

        // Same-name signatures with different arity share a topic; probe the
        // rest of the catalogue before giving up.
        for event in &self.events {
            if event.selector() == topic0 {
                if let Some(decoded) = try_decode(event, log) {
                    return Some(decoded);
                }
            }
        }

        None
    }

    /// Decodes every recognisable log, sorted ascending by log index.
    pub fn decode_all(&self, logs: &[Log]) -> Vec<DecodedLog> {
        let mut decoded: Vec<DecodedLog> = logs.iter().filter_map(|log| self.decode(log)).collect();
        decoded.sort_by_key(|log| log.log_index);
        decoded
    }
}

fn try_decode(event: &Event, log: &Log) -> Option<DecodedLog> {
    let decoded = event.decode_log(log.data()).ok()?;

    let mut indexed = decoded.indexed.iter();
    let mut body = decoded.body.iter();
    let args = event
        .inputs
        .iter()
        .map(|param| {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            value.map(|value| (param.name.clone(), format_sol_value(value)))
        })
        .collect::<Option<IndexMap<String, String>>>()?;

    Some(DecodedLog {
        name: event.name.clone(),
        contract: format!("{:#x}", log.address()),
        signature: event.signature(),
        log_index: log.log_index.unwrap_or_default(),
        args,
    })
}

/// Addresses moved by transfer-family events, for the expansion pass.
pub fn transfer_participants(decoded: &[DecodedLog]) -> Vec<String> {
    let mut participants = Vec::new();
    for log in decoded {
        if !matches!(log.name.as_str(), "Transfer" | "TransferSingle" | "TransferBatch") {
            continue;
        }
        for field in ["from", "to"] {
            if let Some(address) = log.args.get(field) {
                if address.starts_with("0x") && !participants.contains(address) {
                    participants.push(address.clone());
                }
            }
        }
    }
    participants
}

pub fn format_sol_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => format!("{address:#x}"),
        DynSolValue::Uint(number, _) => number.to_string(),
        DynSolValue::Int(number, _) => number.to_string(),
        DynSolValue::Bool(flag) => flag.to_string(),
        DynSolValue::String(text) => text.clone(),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::FixedBytes(bytes, _) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let rendered: Vec<String> = items.iter().map(format_sol_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        DynSolValue::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(format_sol_value).collect();
            format!("({})", rendered.join(", "))
        }
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, LogData, U256};

    fn topic_address(address: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_slice());
        B256::from(word)
    }

    fn make_log(topics: Vec<B256>, data: Vec<u8>, index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log::new_unchecked(
                Address::repeat_byte(0xaa),
                topics,
                Bytes::from(data),
            ),
            log_index: Some(index),
            ..Default::default()
        }
    }

    fn erc20_transfer_log(from: Address, to: Address, value: u64, index: u64) -> Log {
        let selector = LogDecoder::new().events[0].selector();
        let amount = U256::from(value).to_be_bytes::<32>().to_vec();
        make_log(
            vec![selector, topic_address(from), topic_address(to)],
            amount,
            index,
        )
    }

    #[test]
    fn decodes_erc20_transfer() {
        let decoder = LogDecoder::new();
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let log = erc20_transfer_log(from, to, 1000, 3);

        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.signature, "Transfer(address,address,uint256)");
        assert_eq!(decoded.args["from"], format!("{from:#x}"));
        assert_eq!(decoded.args["to"], format!("{to:#x}"));
        assert_eq!(decoded.args["value"], "1000");
        assert_eq!(decoded.log_index, 3);
    }

    #[test]
    fn colliding_topic_falls_back_to_erc721_shape() {
        let decoder = LogDecoder::new();
        let selector = decoder.events[0].selector();
        let log = make_log(
            vec![
                selector,
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
                B256::with_last_byte(7),
            ],
            vec![],
            0,
        );

        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.args["tokenId"], "7");
    }

    #[test]
    fn custom_abi_takes_precedence() {
        let custom = JsonAbi::parse(["event Ping(uint256 nonce)"]).unwrap();
        let decoder = LogDecoder::new().with_custom_abi(&custom);
        let selector = custom.events().next().unwrap().selector();
        let log = make_log(
            vec![selector],
            U256::from(9u64).to_be_bytes::<32>().to_vec(),
            0,
        );

        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.name, "Ping");
        assert_eq!(decoded.args["nonce"], "9");
    }

    #[test]
    fn unknown_topic_decodes_to_none() {
        let decoder = LogDecoder::new();
        let log = make_log(vec![B256::repeat_byte(0x99)], vec![], 0);
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn decode_all_sorts_by_log_index() {
        let decoder = LogDecoder::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let logs = vec![
            erc20_transfer_log(a, b, 5, 9),
            erc20_transfer_log(b, a, 6, 2),
        ];
        let decoded = decoder.decode_all(&logs);
        let ordinals: Vec<u64> = decoded.iter().map(|log| log.log_index).collect();
        assert_eq!(ordinals, vec![2, 9]);
    }

    #[test]
    fn transfer_participants_unions_from_and_to() {
        let decoder = LogDecoder::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let logs = vec![
            erc20_transfer_log(a, b, 5, 0),
            erc20_transfer_log(b, a, 6, 1),
        ];
        let decoded = decoder.decode_all(&logs);
        let participants = transfer_participants(&decoded);
        assert_eq!(participants, vec![format!("{a:#x}"), format!("{b:#x}")]);
    }
}
