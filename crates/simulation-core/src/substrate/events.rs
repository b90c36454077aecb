use alloy::primitives::U256;
use indexmap::IndexMap;
use scale_value::{Composite, Primitive, Value, ValueDef};
use subxt::{
    events::{Events, Phase},
    utils::AccountId32,
    SubstrateConfig,
};
use tracing::warn;

/// Which part of block execution emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    ApplyExtrinsic(u32),
    Initialization,
    Finalization,
    Unknown,
}

/// One decoded system-event record.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub phase: EventPhase,
    pub pallet: String,
    pub method: String,
    /// Position in the block's event list.
    pub index: u32,
    pub fields: IndexMap<String, String>,
}

/// Pallets whose events matter to a balance-preview consumer.
const RELEVANT_PALLETS: &[&str] = &["balances", "assets", "tokens", "system", "transactionpayment"];
/// Event names that matter regardless of the emitting pallet.
const RELEVANT_METHODS: &[&str] = &[
    "Transfer",
    "Deposit",
    "Withdraw",
    "Reserved",
    "Unreserved",
    "ExtrinsicSuccess",
    "ExtrinsicFailed",
];

/// Decodes a block's raw event records. Undecodable records are skipped with
/// a warning; their indices remain occupied so ordinals stay faithful to the
/// on-chain record positions.
pub fn decode_events(events: &Events<SubstrateConfig>) -> Vec<EventRecord> {
    let mut records = Vec::new();
    for (index, details) in events.iter().enumerate() {
        let details = match details {
            Ok(details) => details,
            Err(error) => {
                warn!(index, %error, "skipping undecodable event record");
                continue;
            }
        };

        let phase = match details.phase() {
            Phase::ApplyExtrinsic(extrinsic) => EventPhase::ApplyExtrinsic(extrinsic),
            Phase::Initialization => EventPhase::Initialization,
            Phase::Finalization => EventPhase::Finalization,
        };

        let fields = match details.field_values() {
            Ok(Composite::Named(named)) => named
                .iter()
                .map(|(name, value)| (name.clone(), format_value(value)))
                .collect(),
            Ok(Composite::Unnamed(values)) => values
                .iter()
                .enumerate()
                .map(|(position, value)| (format!("arg{position}"), format_value(value)))
                .collect(),
            Err(error) => {
                warn!(index, %error, "event fields undecodable");
                IndexMap::new()
            }
        };

        records.push(EventRecord {
            phase,
            pallet: details.pallet_name().to_string(),
            method: details.variant_name().to_string(),
            index: index as u32,
            fields,
        });
    }
    records
}

/// The injected extrinsic is always the last one applied in the produced
/// block, so its index is the maximum ApplyExtrinsic phase seen.
pub fn max_apply_extrinsic_index(records: &[EventRecord]) -> Option<u32> {
    records
        .iter()
        .filter_map(|record| match record.phase {
            EventPhase::ApplyExtrinsic(index) => Some(index),
            _ => None,
        })
        .max()
}

pub fn filter_by_extrinsic(records: &[EventRecord], extrinsic_index: u32) -> Vec<EventRecord> {
    records
        .iter()
        .filter(|record| record.phase == EventPhase::ApplyExtrinsic(extrinsic_index))
        .cloned()
        .collect()
}

pub fn is_relevant(record: &EventRecord) -> bool {
    RELEVANT_PALLETS.contains(&record.pallet.to_lowercase().as_str())
        || RELEVANT_METHODS.contains(&record.method.as_str())
}

/// Human-formats a decoded scale value: numbers as canonical decimals,
/// 32-byte arrays as SS58 addresses, other byte blobs as hex, composites
/// and variants recursively.
pub fn format_value<T>(value: &Value<T>) -> String {
    match &value.value {
        ValueDef::Primitive(primitive) => match primitive {
            Primitive::Bool(flag) => flag.to_string(),
            Primitive::Char(character) => character.to_string(),
            Primitive::String(text) => text.clone(),
            Primitive::U128(number) => number.to_string(),
            Primitive::I128(number) => number.to_string(),
            Primitive::U256(bytes) => U256::from_le_bytes(*bytes).to_string(),
            other => format!("{other:?}"),
        },
        ValueDef::Composite(composite) => format_composite(composite),
        ValueDef::Variant(variant) => {
            let is_empty = match &variant.values {
                Composite::Named(fields) => fields.is_empty(),
                Composite::Unnamed(values) => values.is_empty(),
            };
            if is_empty {
                variant.name.clone()
            } else {
                format!("{}({})", variant.name, format_composite(&variant.values))
            }
        }
        ValueDef::BitSequence(bits) => format!("{bits:?}"),
    }
}

fn format_composite<T>(composite: &Composite<T>) -> String {
    if let Some(bytes) = composite_bytes(composite) {
        if bytes.len() == 32 {
            let mut account = [0u8; 32];
            account.copy_from_slice(&bytes);
            return AccountId32(account).to_string();
        }
        return format!("0x{}", hex::encode(bytes));
    }
    match composite {
        Composite::Named(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", format_value(value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Composite::Unnamed(values) if values.len() == 1 => format_value(&values[0]),
        Composite::Unnamed(values) => {
            let rendered: Vec<String> = values.iter().map(format_value).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

/// Finds a named field anywhere inside a composite, digging through nested
/// newtype and struct layers.
pub(crate) fn find_in_composite<'a, T>(
    composite: &'a Composite<T>,
    name: &str,
) -> Option<&'a Value<T>> {
    match composite {
        Composite::Named(fields) => {
            for (field_name, value) in fields {
                if field_name == name {
                    return Some(value);
                }
                if let ValueDef::Composite(inner) = &value.value {
                    if let Some(found) = find_in_composite(inner, name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        Composite::Unnamed(items) => {
            for value in items {
                if let ValueDef::Composite(inner) = &value.value {
                    if let Some(found) = find_in_composite(inner, name) {
                        return Some(found);
                    }
                }
            }
            None
        }
    }
}

/// As [`find_in_composite`], starting from a value.
pub(crate) fn find_named<'a, T>(value: &'a Value<T>, name: &str) -> Option<&'a Value<T>> {
    match &value.value {
        ValueDef::Composite(composite) => find_in_composite(composite, name),
        _ => None,
    }
}

pub(crate) fn value_u128<T>(value: &Value<T>) -> Option<u128> {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(number)) => Some(*number),
        _ => None,
    }
}

/// Extracts a byte blob from a composite of u8 primitives, unwrapping
/// single-field newtype layers (AccountId32 and friends).
pub(crate) fn composite_bytes<T>(composite: &Composite<T>) -> Option<Vec<u8>> {
    let values = match composite {
        Composite::Unnamed(values) if !values.is_empty() => values,
        _ => return None,
    };
    if values.len() == 1 {
        if let ValueDef::Composite(inner) = &values[0].value {
            return composite_bytes(inner);
        }
    }
    values
        .iter()
        .map(|value| match &value.value {
            ValueDef::Primitive(Primitive::U128(byte)) if *byte <= 255 => Some(*byte as u8),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: EventPhase, pallet: &str, method: &str, index: u32) -> EventRecord {
        EventRecord {
            phase,
            pallet: pallet.to_string(),
            method: method.to_string(),
            index,
            fields: IndexMap::new(),
        }
    }

    #[test]
    fn max_apply_extrinsic_picks_last_injected() {
        let records = vec![
            record(EventPhase::Initialization, "parachainSystem", "X", 0),
            record(EventPhase::ApplyExtrinsic(0), "timestamp", "Set", 1),
            record(EventPhase::ApplyExtrinsic(2), "balances", "Transfer", 2),
            record(EventPhase::Finalization, "system", "Y", 3),
        ];
        assert_eq!(max_apply_extrinsic_index(&records), Some(2));
        assert_eq!(max_apply_extrinsic_index(&[]), None);
    }

    #[test]
    fn filter_keeps_only_our_extrinsic() {
        let records = vec![
            record(EventPhase::ApplyExtrinsic(0), "system", "ExtrinsicSuccess", 0),
            record(EventPhase::ApplyExtrinsic(1), "balances", "Transfer", 1),
            record(EventPhase::Finalization, "balances", "Deposit", 2),
        ];
        let ours = filter_by_extrinsic(&records, 1);
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].method, "Transfer");
    }

    #[test]
    fn relevance_filter_spans_pallets_and_methods() {
        assert!(is_relevant(&record(
            EventPhase::ApplyExtrinsic(0),
            "Balances",
            "Transfer",
            0
        )));
        assert!(is_relevant(&record(
            EventPhase::ApplyExtrinsic(0),
            "TransactionPayment",
            "TransactionFeePaid",
            0
        )));
        // Unknown pallet, but a transfer-shaped event name.
        assert!(is_relevant(&record(
            EventPhase::ApplyExtrinsic(0),
            "someDex",
            "Withdraw",
            0
        )));
        assert!(!is_relevant(&record(
            EventPhase::ApplyExtrinsic(0),
            "scheduler",
            "Scheduled",
            0
        )));
    }

    #[test]
    fn formats_numbers_as_plain_decimals() {
        assert_eq!(format_value(&Value::u128(1_000_000)), "1000000");
        assert_eq!(format_value(&Value::bool(true)), "true");
        assert_eq!(format_value(&Value::string("hello")), "hello");
    }

    #[test]
    fn formats_account_bytes_as_ss58() {
        let account = AccountId32([0x12; 32]);
        let value = Value::from_bytes(account.0);
        assert_eq!(format_value(&value), account.to_string());
    }

    #[test]
    fn formats_short_byte_blobs_as_hex() {
        let value = Value::from_bytes([0xde, 0xad]);
        assert_eq!(format_value(&value), "0xdead");
    }

    #[test]
    fn formats_variants_with_fields() {
        let value = Value::variant(
            "Id",
            Composite::Unnamed(vec![Value::u128(5)]),
        );
        assert_eq!(format_value(&value), "Id(5)");
        let bare = Value::variant("None", Composite::Unnamed(vec![]));
        assert_eq!(format_value(&bare), "None");
    }
}
