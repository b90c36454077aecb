use scale_value::{Composite, Primitive, Value, ValueDef};
use subxt::Metadata;
use types::SubstrateDecodedError;

use super::events::{find_in_composite, format_value, value_u128};

/// Decodes a dispatch-error value from a `system.ExtrinsicFailed` event into
/// the closed tagged record, resolving module errors through runtime
/// metadata. Total: any shape yields a record, with `unknown` as the
/// terminal fallback.
pub fn decode_dispatch_error(value: &Value<()>, metadata: &Metadata) -> SubstrateDecodedError {
    decode_with_lookup(value, &|pallet_index, error_code| {
        lookup_module_error(metadata, pallet_index, error_code)
    })
}

type ModuleLookup<'a> = &'a dyn Fn(u8, u8) -> Option<(String, String, String)>;

fn decode_with_lookup(value: &Value<()>, lookup: ModuleLookup<'_>) -> SubstrateDecodedError {
    let raw = serde_json::to_value(value).ok();

    let variant = match &value.value {
        ValueDef::Variant(variant) => variant,
        ValueDef::Primitive(Primitive::String(text)) => {
            return SubstrateDecodedError::Unknown {
                message: text.clone(),
                raw,
            }
        }
        _ => {
            return SubstrateDecodedError::Unknown {
                message: "Unknown error occurred".to_string(),
                raw,
            }
        }
    };

    match variant.name.as_str() {
        "Module" => decode_module_error(&variant.values, lookup, raw),
        "BadOrigin" => SubstrateDecodedError::BadOrigin {
            message: "Bad origin - caller not authorized for this action".to_string(),
        },
        "CannotLookup" => SubstrateDecodedError::CannotLookup {
            message: "Cannot lookup - invalid account or reference".to_string(),
        },
        "Token" => SubstrateDecodedError::Token {
            message: format!("Token Error: {}", inner_text(&variant.values)),
        },
        "Arithmetic" => SubstrateDecodedError::Arithmetic {
            message: format!("Arithmetic Error: {}", inner_text(&variant.values)),
        },
        "Other" => {
            let message = if composite_is_empty(&variant.values) {
                "Other error".to_string()
            } else {
                inner_text(&variant.values)
            };
            SubstrateDecodedError::Other { message, raw }
        }
        // The remaining dispatch-error variants carry at most a scalar;
        // surface them as the bare name or name: value.
        name => {
            let message = if composite_is_empty(&variant.values) {
                name.to_string()
            } else {
                format!("{name}: {}", inner_text(&variant.values))
            };
            SubstrateDecodedError::Other { message, raw }
        }
    }
}

fn composite_is_empty(values: &Composite<()>) -> bool {
    match values {
        Composite::Named(fields) => fields.is_empty(),
        Composite::Unnamed(items) => items.is_empty(),
    }
}

fn inner_text(values: &Composite<()>) -> String {
    let rendered: Vec<String> = match values {
        Composite::Named(fields) => fields
            .iter()
            .map(|(_, value)| format_value(value))
            .collect(),
        Composite::Unnamed(items) => items.iter().map(format_value).collect(),
    };
    rendered.join(", ")
}

fn decode_module_error(
    values: &Composite<()>,
    lookup: ModuleLookup<'_>,
    raw: Option<serde_json::Value>,
) -> SubstrateDecodedError {
    let pallet_index = find_in_composite(values, "index").and_then(value_u128);
    let error_code = find_in_composite(values, "error").and_then(first_byte);

    if let (Some(pallet_index), Some(error_code)) = (pallet_index, error_code) {
        if let Ok(pallet_index) = u8::try_from(pallet_index) {
            if let Some((pallet, error, docs)) = lookup(pallet_index, error_code) {
                return SubstrateDecodedError::Module {
                    pallet,
                    error,
                    docs,
                    raw,
                };
            }
        }
    }

    SubstrateDecodedError::Module {
        pallet: pallet_index
            .map(|index| format!("Pallet#{index}"))
            .unwrap_or_else(|| "unknown".to_string()),
        error: "Unknown module error".to_string(),
        docs: String::new(),
        raw,
    }
}

fn lookup_module_error(
    metadata: &Metadata,
    pallet_index: u8,
    error_code: u8,
) -> Option<(String, String, String)> {
    let pallet = metadata
        .pallets()
        .find(|pallet| pallet.index() == pallet_index)?;
    let variant = pallet.error_variant_by_index(error_code)?;
    Some((
        pallet.name().to_string(),
        variant.name.clone(),
        variant.docs.join(" "),
    ))
}

/// A module error code is a lone u8 on older runtimes and a 4-byte array on
/// newer ones; the first byte is the error index either way.
fn first_byte(value: &Value<()>) -> Option<u8> {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(number)) => u8::try_from(*number).ok(),
        ValueDef::Composite(Composite::Unnamed(items)) => items.first().and_then(first_byte),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lookup(_: u8, _: u8) -> Option<(String, String, String)> {
        None
    }

    #[test]
    fn bad_origin_fixed_message() {
        let value = Value::variant("BadOrigin", Composite::Unnamed(vec![]));
        match decode_with_lookup(&value, &no_lookup) {
            SubstrateDecodedError::BadOrigin { message } => {
                assert_eq!(message, "Bad origin - caller not authorized for this action")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn cannot_lookup_fixed_message() {
        let value = Value::variant("CannotLookup", Composite::Unnamed(vec![]));
        match decode_with_lookup(&value, &no_lookup) {
            SubstrateDecodedError::CannotLookup { message } => {
                assert_eq!(message, "Cannot lookup - invalid account or reference")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn token_and_arithmetic_carry_inner_variant() {
        let value = Value::variant(
            "Token",
            Composite::Unnamed(vec![Value::variant(
                "FundsUnavailable",
                Composite::Unnamed(vec![]),
            )]),
        );
        match decode_with_lookup(&value, &no_lookup) {
            SubstrateDecodedError::Token { message } => {
                assert_eq!(message, "Token Error: FundsUnavailable")
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        let value = Value::variant(
            "Arithmetic",
            Composite::Unnamed(vec![Value::variant("Overflow", Composite::Unnamed(vec![]))]),
        );
        match decode_with_lookup(&value, &no_lookup) {
            SubstrateDecodedError::Arithmetic { message } => {
                assert_eq!(message, "Arithmetic Error: Overflow")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn module_error_resolves_through_lookup() {
        let value = Value::variant(
            "Module",
            Composite::Named(vec![
                ("index".to_string(), Value::u128(5)),
                ("error".to_string(), Value::from_bytes([2, 0, 0, 0])),
            ]),
        );
        let lookup = |pallet: u8, code: u8| {
            assert_eq!((pallet, code), (5, 2));
            Some((
                "Balances".to_string(),
                "InsufficientBalance".to_string(),
                "Balance too low to send value.".to_string(),
            ))
        };
        match decode_with_lookup(&value, &lookup) {
            SubstrateDecodedError::Module {
                pallet,
                error,
                docs,
                ..
            } => {
                assert_eq!(pallet, "Balances");
                assert_eq!(error, "InsufficientBalance");
                assert_eq!(docs, "Balance too low to send value.");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_module_falls_back_with_index() {
        let value = Value::variant(
            "Module",
            Composite::Named(vec![
                ("index".to_string(), Value::u128(5)),
                ("error".to_string(), Value::from_bytes([2, 0, 0, 0])),
            ]),
        );
        match decode_with_lookup(&value, &no_lookup) {
            SubstrateDecodedError::Module { pallet, error, .. } => {
                assert_eq!(pallet, "Pallet#5");
                assert_eq!(error, "Unknown module error");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn nested_module_error_struct_is_probed() {
        let value = Value::variant(
            "Module",
            Composite::Unnamed(vec![Value::named_composite(vec![
                ("index".to_string(), Value::u128(9)),
                ("error".to_string(), Value::from_bytes([1, 0, 0, 0])),
            ])]),
        );
        let lookup = |pallet: u8, code: u8| {
            assert_eq!((pallet, code), (9, 1));
            Some(("Assets".to_string(), "NoAccount".to_string(), String::new()))
        };
        match decode_with_lookup(&value, &lookup) {
            SubstrateDecodedError::Module { pallet, .. } => assert_eq!(pallet, "Assets"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn other_variants_render_name_and_scalar() {
        let bare = Value::variant("ConsumerRemaining", Composite::Unnamed(vec![]));
        match decode_with_lookup(&bare, &no_lookup) {
            SubstrateDecodedError::Other { message, .. } => {
                assert_eq!(message, "ConsumerRemaining")
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        let with_value = Value::variant(
            "Transactional",
            Composite::Unnamed(vec![Value::variant(
                "LimitReached",
                Composite::Unnamed(vec![]),
            )]),
        );
        match decode_with_lookup(&with_value, &no_lookup) {
            SubstrateDecodedError::Other { message, .. } => {
                assert_eq!(message, "Transactional: LimitReached")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn totality_on_non_variant_values() {
        match decode_with_lookup(&Value::string("boom"), &no_lookup) {
            SubstrateDecodedError::Unknown { message, raw } => {
                assert_eq!(message, "boom");
                assert!(raw.is_some());
            }
            other => panic!("unexpected decode: {other:?}"),
        }
        match decode_with_lookup(&Value::u128(3), &no_lookup) {
            SubstrateDecodedError::Unknown { message, .. } => {
                assert_eq!(message, "Unknown error occurred")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
