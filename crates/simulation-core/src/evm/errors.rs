use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    hex,
    transports::{RpcError, TransportErrorKind},
};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use types::EvmDecodedError;

use super::events::format_sol_value;

/// Panic(uint256)
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
/// Error(string)
const REVERT_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Known custom-error selectors: name and parameter layout.
fn custom_error_table(selector: [u8; 4]) -> Option<(&'static str, Vec<DynSolType>)> {
    match selector {
        [0xe4, 0x50, 0xd3, 0x8c] => Some((
            "InsufficientBalance",
            vec![
                DynSolType::Address,
                DynSolType::Uint(256),
                DynSolType::Uint(256),
            ],
        )),
        [0xfb, 0x8f, 0x41, 0xb2] => Some((
            "InsufficientAllowance",
            vec![
                DynSolType::Address,
                DynSolType::Uint(256),
                DynSolType::Uint(256),
            ],
        )),
        _ => None,
    }
}

fn panic_code_meaning(code: u64) -> Option<&'static str> {
    match code {
        0x00 => Some("Generic compiler panic"),
        0x01 => Some("Assertion failed"),
        0x11 => Some("Arithmetic overflow or underflow"),
        0x12 => Some("Division or modulo by zero"),
        0x21 => Some("Invalid enum value"),
        0x22 => Some("Incorrectly encoded storage byte array"),
        0x31 => Some("Pop on an empty array"),
        0x32 => Some("Array index out of bounds"),
        0x41 => Some("Out of memory"),
        0x51 => Some("Call to an uninitialized function pointer"),
        _ => None,
    }
}

/// Decodes an error raised by the fork RPC into the tagged record.
pub fn decode_rpc_error(error: &RpcError<TransportErrorKind>) -> EvmDecodedError {
    match error {
        RpcError::ErrorResp(payload) => {
            let data = payload
                .data
                .as_ref()
                .and_then(|raw| serde_json::from_str::<Value>(raw.get()).ok())
                .unwrap_or(Value::Null);
            decode_error_value(&serde_json::json!({
                "message": payload.message,
                "data": data,
            }))
        }
        other => EvmDecodedError::Unknown {
            message: cleanup_message(&other.to_string()),
            raw: None,
        },
    }
}

/// Decodes an arbitrary JSON-shaped error object. Total: every input yields
/// a tagged record, with `unknown` as the fallback.
pub fn decode_error_value(error: &Value) -> EvmDecodedError {
    if let Some(payload) = locate_hex_payload(error) {
        // A selector needs at least "0x" + 8 hex chars.
        if payload.len() >= 10 {
            if let Some(decoded) = decode_revert_payload(&payload) {
                return decoded;
            }
        }
    }

    if let Some(reason) = error.get("reason").and_then(Value::as_str) {
        return EvmDecodedError::Revert {
            message: cleanup_message(reason),
            raw: None,
        };
    }

    let message = error
        .pointer("/info/error/message")
        .and_then(Value::as_str)
        .or_else(|| error.get("message").and_then(Value::as_str))
        .map(cleanup_message)
        .unwrap_or_else(|| "Unknown error occurred".to_string());

    EvmDecodedError::Unknown { message, raw: None }
}

/// Probes the places providers are known to stash the revert payload.
fn locate_hex_payload(error: &Value) -> Option<String> {
    for path in ["/data", "/info/error/data", "/error/data"] {
        if let Some(hex_payload) = error.pointer(path).and_then(Value::as_str) {
            if hex_payload.starts_with("0x") {
                return Some(hex_payload.to_string());
            }
        }
    }

    static DATA_IN_MESSAGE: OnceLock<Regex> = OnceLock::new();
    let pattern = DATA_IN_MESSAGE
        .get_or_init(|| Regex::new(r#"data="(0x[0-9a-fA-F]*)""#).expect("static regex"));
    let message = error.get("message").and_then(Value::as_str)?;
    pattern
        .captures(message)
        .map(|captures| captures[1].to_string())
}

/// Selector-dispatches a raw revert payload. Unknown selectors fall back to
/// the message path (`None`).
pub fn decode_revert_payload(payload: &str) -> Option<EvmDecodedError> {
    let bytes = hex::decode(payload).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let raw = Some(payload.to_string());
    let selector: [u8; 4] = bytes[..4].try_into().ok()?;

    if selector == PANIC_SELECTOR {
        let code = if bytes.len() >= 36 {
            // Panic codes are tiny; the low eight bytes of the word suffice.
            u64::from_be_bytes(bytes[28..36].try_into().ok()?)
        } else {
            0
        };
        let message = panic_code_meaning(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Panic code 0x{code:x}"));
        return Some(EvmDecodedError::Panic { code, message, raw });
    }

    if selector == REVERT_SELECTOR {
        let message = match DynSolType::String.abi_decode(&bytes[4..]) {
            Ok(DynSolValue::String(reason)) if !reason.is_empty() => reason,
            _ => "Transaction reverted".to_string(),
        };
        return Some(EvmDecodedError::Revert { message, raw });
    }

    if let Some((name, params)) = custom_error_table(selector) {
        let args = DynSolType::Tuple(params)
            .abi_decode_sequence(&bytes[4..])
            .ok()
            .and_then(|decoded| match decoded {
                DynSolValue::Tuple(items) => {
                    Some(items.iter().map(format_sol_value).collect::<Vec<_>>())
                }
                _ => None,
            });
        return Some(EvmDecodedError::Custom {
            name: name.to_string(),
            args,
            raw,
        });
    }

    None
}

/// Normalises provider error prose down to the reason the caller cares
/// about.
pub fn cleanup_message(message: &str) -> String {
    static QUOTED_REVERT: OnceLock<Regex> = OnceLock::new();
    static QUOTED_REASON: OnceLock<Regex> = OnceLock::new();

    let revert = QUOTED_REVERT
        .get_or_init(|| Regex::new(r#"execution reverted:?\s*"([^"]*)""#).expect("static regex"));
    if let Some(captures) = revert.captures(message) {
        return captures[1].to_string();
    }

    let reason = QUOTED_REASON
        .get_or_init(|| Regex::new(r#"reason="([^"]*)""#).expect("static regex"));
    if let Some(captures) = reason.captures(message) {
        return captures[1].to_string();
    }

    let trimmed = message.trim().trim_start_matches("Error: ").trim();
    if trimmed == "execution reverted" {
        return "Transaction reverted".to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_revert_string(reason: &str) -> String {
        let mut bytes = REVERT_SELECTOR.to_vec();
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        bytes.extend_from_slice(&offset);
        let mut length = [0u8; 32];
        length[24..].copy_from_slice(&(reason.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&length);
        let mut data = reason.as_bytes().to_vec();
        data.resize(data.len().div_ceil(32) * 32, 0);
        bytes.extend_from_slice(&data);
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn decodes_revert_reason_string() {
        let payload = encode_revert_string("Not enough balance");
        match decode_revert_payload(&payload) {
            Some(EvmDecodedError::Revert { message, raw }) => {
                assert_eq!(message, "Not enough balance");
                assert_eq!(raw, Some(payload));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn empty_revert_reason_becomes_generic() {
        let payload = encode_revert_string("");
        match decode_revert_payload(&payload) {
            Some(EvmDecodedError::Revert { message, .. }) => {
                assert_eq!(message, "Transaction reverted");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_panic_code() {
        let mut bytes = PANIC_SELECTOR.to_vec();
        let mut word = [0u8; 32];
        word[31] = 0x11;
        bytes.extend_from_slice(&word);
        let payload = format!("0x{}", hex::encode(bytes));

        match decode_revert_payload(&payload) {
            Some(EvmDecodedError::Panic { code, message, .. }) => {
                assert_eq!(code, 0x11);
                assert_eq!(message, "Arithmetic overflow or underflow");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_known_custom_error() {
        let mut bytes = vec![0xe4, 0x50, 0xd3, 0x8c];
        let mut account = [0u8; 32];
        account[12..].copy_from_slice(&[0x11; 20]);
        bytes.extend_from_slice(&account);
        let mut have = [0u8; 32];
        have[31] = 5;
        bytes.extend_from_slice(&have);
        let mut want = [0u8; 32];
        want[31] = 9;
        bytes.extend_from_slice(&want);
        let payload = format!("0x{}", hex::encode(bytes));

        match decode_revert_payload(&payload) {
            Some(EvmDecodedError::Custom { name, args, .. }) => {
                assert_eq!(name, "InsufficientBalance");
                let args = args.unwrap();
                assert_eq!(args[1], "5");
                assert_eq!(args[2], "9");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn probes_nested_data_locations() {
        let payload = encode_revert_string("nested");
        let error = json!({"info": {"error": {"data": payload}}});
        match decode_error_value(&error) {
            EvmDecodedError::Revert { message, .. } => assert_eq!(message, "nested"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn extracts_payload_from_message_text() {
        let payload = encode_revert_string("from message");
        let error = json!({"message": format!(r#"call failed, data="{payload}", code=3"#)});
        match decode_error_value(&error) {
            EvmDecodedError::Revert { message, .. } => assert_eq!(message, "from message"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_cleaned_message() {
        let error = json!({"message": "Error: execution reverted"});
        match decode_error_value(&error) {
            EvmDecodedError::Unknown { message, .. } => {
                assert_eq!(message, "Transaction reverted");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn reason_field_wins_over_message() {
        let error = json!({"reason": "Nope", "message": "irrelevant"});
        match decode_error_value(&error) {
            EvmDecodedError::Revert { message, .. } => assert_eq!(message, "Nope"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn totality_on_garbage() {
        match decode_error_value(&json!({})) {
            EvmDecodedError::Unknown { message, .. } => {
                assert_eq!(message, "Unknown error occurred");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
        match decode_error_value(&json!(null)) {
            EvmDecodedError::Unknown { message, .. } => {
                assert_eq!(message, "Unknown error occurred");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn cleanup_extracts_quoted_reason() {
        assert_eq!(
            cleanup_message(r#"execution reverted: "Paused""#),
            "Paused"
        );
        assert_eq!(
            cleanup_message(r#"cannot estimate gas, reason="TransferHelper: fail""#),
            "TransferHelper: fail"
        );
        assert_eq!(cleanup_message("Error: something else"), "something else");
    }
}
