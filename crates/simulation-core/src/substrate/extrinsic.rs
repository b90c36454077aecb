use scale_info::{form::PortableForm, Field, TypeDef, TypeDefPrimitive};
use scale_value::{stringify::custom_parsers, Composite, Value};
use subxt::{
    config::DefaultExtrinsicParamsBuilder,
    dynamic::tx,
    tx::{DynamicPayload, Payload, Signer},
    utils::{AccountId32, MultiSignature},
    Metadata, OnlineClient, SubstrateConfig,
};
use thiserror::Error;
use types::CallSpec;

/// The deterministic signature pattern the fork's mock signature host
/// accepts once `dev_setSignatureVerification false` is active:
/// `0xdeadbeef` followed by sixty `0xcd` bytes.
pub const MOCK_SIGNATURE: [u8; 64] = {
    let mut signature = [0xcd; 64];
    signature[0] = 0xde;
    signature[1] = 0xad;
    signature[2] = 0xbe;
    signature[3] = 0xef;
    signature
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Unknown extrinsic: {pallet}.{method}")]
    UnknownExtrinsic { pallet: String, method: String },

    #[error("invalid call argument: {0}")]
    Arg(String),
}

/// Signs with the mock pattern instead of a real key. The sender never has
/// to hand over key material to preview a transaction.
pub struct FakeSigner {
    account: AccountId32,
}

impl FakeSigner {
    pub fn new(account: AccountId32) -> Self {
        Self { account }
    }
}

impl Signer<SubstrateConfig> for FakeSigner {
    fn account_id(&self) -> AccountId32 {
        self.account.clone()
    }

    fn sign(&self, _signer_payload: &[u8]) -> MultiSignature {
        MultiSignature::Sr25519(MOCK_SIGNATURE)
    }
}

/// Pre-encoded SCALE call data submitted as-is, without dynamic
/// construction.
pub struct RawCallData(Vec<u8>);

impl RawCallData {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl Payload for RawCallData {
    fn encode_call_data_to(
        &self,
        _metadata: &Metadata,
        out: &mut Vec<u8>,
    ) -> Result<(), subxt::ext::subxt_core::Error> {
        out.extend_from_slice(&self.0);
        Ok(())
    }
}

/// Wraps a call into a signed extrinsic carrying the mock signature, the
/// sender's real nonce, and the extension payload the runtime expects. The
/// returned bytes are length-prefixed wire form, ready for author-submit.
pub async fn fake_signed_extrinsic<C: Payload>(
    client: &OnlineClient<SubstrateConfig>,
    call: &C,
    account: AccountId32,
    nonce: u64,
) -> Result<Vec<u8>, subxt::Error> {
    let signer = FakeSigner::new(account);
    let params = DefaultExtrinsicParamsBuilder::<SubstrateConfig>::new()
        .nonce(nonce)
        .build();
    let extrinsic = client.tx().create_signed(call, &signer, params).await?;
    Ok(extrinsic.encoded().to_vec())
}

/// Pallet/method lookup is tolerant of the usual casing differences:
/// `balances.transferAllowDeath`, `Balances.transfer_allow_death` and
/// friends all resolve to the same dispatchable.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_lowercase()
}

fn find_call(
    metadata: &Metadata,
    pallet: &str,
    method: &str,
) -> Option<(String, String, Vec<Field<PortableForm>>)> {
    let pallet_meta = metadata
        .pallets()
        .find(|candidate| normalize(candidate.name()) == normalize(pallet))?;
    let variant = pallet_meta
        .call_variants()?
        .iter()
        .find(|candidate| normalize(&candidate.name) == normalize(method))?;
    Some((
        pallet_meta.name().to_string(),
        variant.name.clone(),
        variant.fields.clone(),
    ))
}

/// Builds a dynamic call from a structured spec. Arguments that are
/// themselves `{pallet, method, args}` objects recurse, which is what makes
/// batch/proxy/multisig nesting work.
pub fn build_call(metadata: &Metadata, spec: &CallSpec) -> Result<DynamicPayload, BuildError> {
    let (pallet_name, call_name, fields) =
        find_call(metadata, &spec.pallet, &spec.method).ok_or_else(|| {
            BuildError::UnknownExtrinsic {
                pallet: spec.pallet.clone(),
                method: spec.method.clone(),
            }
        })?;

    if spec.args.len() != fields.len() {
        return Err(BuildError::Arg(format!(
            "{pallet_name}.{call_name} expects {} arguments, got {}",
            fields.len(),
            spec.args.len()
        )));
    }

    let args = spec
        .args
        .iter()
        .zip(&fields)
        .map(|(arg, field)| coerce_arg(metadata, field.ty.id, arg))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(tx(pallet_name, call_name, args))
}

fn as_call_spec(arg: &serde_json::Value) -> Option<CallSpec> {
    let object = arg.as_object()?;
    if !object.contains_key("pallet") || !object.contains_key("method") {
        return None;
    }
    serde_json::from_value(arg.clone()).ok()
}

/// Shapes one JSON argument into a scale value guided by the parameter's
/// type from metadata, so callers can pass bare addresses and plain numbers
/// the way wallet tooling does.
fn coerce_arg(
    metadata: &Metadata,
    type_id: u32,
    arg: &serde_json::Value,
) -> Result<Value<()>, BuildError> {
    if let Some(nested) = as_call_spec(arg) {
        return Ok(build_call(metadata, &nested)?.into_value());
    }

    let registry = metadata.types();
    let ty = registry
        .resolve(type_id)
        .ok_or_else(|| BuildError::Arg(format!("unresolvable parameter type {type_id}")))?;

    match &ty.type_def {
        TypeDef::Variant(_) => {
            if ty.path.segments.last().map(String::as_str) == Some("MultiAddress") {
                if let Some(account) = arg.as_str().and_then(|s| s.parse::<AccountId32>().ok()) {
                    return Ok(Value::variant(
                        "Id",
                        Composite::Unnamed(vec![Value::from_bytes(account.0)]),
                    ));
                }
            }
            if ty.path.segments.last().map(String::as_str) == Some("Option") {
                if arg.is_null() {
                    return Ok(Value::variant("None", Composite::Unnamed(vec![])));
                }
            }
            fallback_parse(arg)
        }
        TypeDef::Composite(_) => {
            // AccountId-style newtypes accept a bare address string.
            if let Some(account) = arg.as_str().and_then(|s| s.parse::<AccountId32>().ok()) {
                return Ok(Value::from_bytes(account.0));
            }
            fallback_parse(arg)
        }
        TypeDef::Compact(compact) => coerce_arg(metadata, compact.type_param.id, arg),
        TypeDef::Primitive(primitive) => coerce_primitive(primitive, arg),
        TypeDef::Sequence(sequence) => {
            let element = sequence.type_param.id;
            coerce_elements(metadata, element, arg)
        }
        TypeDef::Array(array) => coerce_elements(metadata, array.type_param.id, arg),
        TypeDef::Tuple(tuple) => {
            let items = arg
                .as_array()
                .ok_or_else(|| BuildError::Arg(format!("expected a tuple array, got {arg}")))?;
            if items.len() != tuple.fields.len() {
                return Err(BuildError::Arg(format!(
                    "expected a {}-tuple, got {} values",
                    tuple.fields.len(),
                    items.len()
                )));
            }
            let values = items
                .iter()
                .zip(&tuple.fields)
                .map(|(item, field)| coerce_arg(metadata, field.id, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::unnamed_composite(values))
        }
        _ => fallback_parse(arg),
    }
}

fn coerce_elements(
    metadata: &Metadata,
    element_type: u32,
    arg: &serde_json::Value,
) -> Result<Value<()>, BuildError> {
    let is_byte = matches!(
        metadata
            .types()
            .resolve(element_type)
            .map(|ty| &ty.type_def),
        Some(TypeDef::Primitive(TypeDefPrimitive::U8))
    );
    if is_byte {
        if let Some(hex_text) = arg.as_str() {
            let bytes = hex::decode(hex_text.trim_start_matches("0x"))
                .map_err(|_| BuildError::Arg(format!("invalid hex bytes: {hex_text}")))?;
            return Ok(Value::from_bytes(bytes));
        }
    }
    let items = arg
        .as_array()
        .ok_or_else(|| BuildError::Arg(format!("expected an array, got {arg}")))?;
    let values = items
        .iter()
        .map(|item| coerce_arg(metadata, element_type, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::unnamed_composite(values))
}

fn coerce_primitive(
    primitive: &TypeDefPrimitive,
    arg: &serde_json::Value,
) -> Result<Value<()>, BuildError> {
    match primitive {
        TypeDefPrimitive::Bool => arg
            .as_bool()
            .map(Value::bool)
            .ok_or_else(|| BuildError::Arg(format!("expected a bool, got {arg}"))),
        TypeDefPrimitive::Str => arg
            .as_str()
            .map(Value::string)
            .ok_or_else(|| BuildError::Arg(format!("expected a string, got {arg}"))),
        _ => numeric_value(arg),
    }
}

fn numeric_value(arg: &serde_json::Value) -> Result<Value<()>, BuildError> {
    if let Some(number) = arg.as_u64() {
        return Ok(Value::u128(number as u128));
    }
    if let Some(number) = arg.as_f64() {
        if number >= 0.0 && number.fract() == 0.0 {
            return Ok(Value::u128(number as u128));
        }
    }
    if let Some(text) = arg.as_str() {
        if let Some(amount) = crate::format::parse_amount(text) {
            if let Ok(number) = u128::try_from(amount) {
                return Ok(Value::u128(number));
            }
        }
    }
    Err(BuildError::Arg(format!("expected an integer, got {arg}")))
}

/// Last resort for argument shapes the type-guided path does not cover:
/// scale-value's stringify grammar with hex and SS58 extensions, the same
/// syntax chain tooling accepts on the command line.
fn fallback_parse(arg: &serde_json::Value) -> Result<Value<()>, BuildError> {
    match arg {
        serde_json::Value::String(text) => {
            let (parsed, _) = scale_value::stringify::from_str_custom()
                .add_custom_parser(custom_parsers::parse_hex)
                .add_custom_parser(custom_parsers::parse_ss58)
                .parse(text);
            parsed.map_err(|_| BuildError::Arg(format!("unparseable argument: {text}")))
        }
        serde_json::Value::Bool(flag) => Ok(Value::bool(*flag)),
        serde_json::Value::Number(_) => numeric_value(arg),
        serde_json::Value::Array(items) => {
            let values = items
                .iter()
                .map(fallback_parse)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::unnamed_composite(values))
        }
        serde_json::Value::Object(object) => {
            let values = object
                .iter()
                .map(|(name, value)| fallback_parse(value).map(|parsed| (name.clone(), parsed)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::named_composite(values))
        }
        serde_json::Value::Null => Err(BuildError::Arg("null argument".to_string())),
    }
}

/// A transfer-style method treats its first positional argument as the
/// presumptive recipient.
pub fn presumptive_recipient(spec: &CallSpec) -> Option<String> {
    if !spec.method.to_lowercase().contains("transfer") || spec.args.is_empty() {
        return None;
    }
    Some(match &spec.args[0] {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mock_signature_layout() {
        assert_eq!(MOCK_SIGNATURE.len(), 64);
        assert_eq!(&MOCK_SIGNATURE[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(MOCK_SIGNATURE[4..].iter().all(|byte| *byte == 0xcd));
    }

    #[test]
    fn fake_signer_signs_with_pattern() {
        let signer = FakeSigner::new(AccountId32([7u8; 32]));
        match signer.sign(b"whatever") {
            MultiSignature::Sr25519(signature) => assert_eq!(signature, MOCK_SIGNATURE),
            other => panic!("unexpected signature kind: {other:?}"),
        }
    }

    #[test]
    fn lookup_normalisation() {
        assert_eq!(normalize("transfer_allow_death"), normalize("transferAllowDeath"));
        assert_eq!(normalize("Balances"), normalize("balances"));
        assert_ne!(normalize("transfer"), normalize("transfer_all"));
    }

    #[test]
    fn nested_call_objects_are_recognised() {
        let nested = json!({"pallet": "balances", "method": "transfer", "args": ["addr", 5]});
        assert!(as_call_spec(&nested).is_some());
        assert!(as_call_spec(&json!({"pallet": "x"})).is_none());
        assert!(as_call_spec(&json!("just a string")).is_none());
    }

    #[test]
    fn transfer_methods_nominate_first_arg_as_recipient() {
        let spec = CallSpec {
            pallet: "balances".into(),
            method: "transferKeepAlive".into(),
            args: vec![json!("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"), json!(10)],
        };
        assert_eq!(
            presumptive_recipient(&spec).as_deref(),
            Some("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY")
        );

        let not_transfer = CallSpec {
            pallet: "system".into(),
            method: "remark".into(),
            args: vec![json!("0x00")],
        };
        assert_eq!(presumptive_recipient(&not_transfer), None);

        let no_args = CallSpec {
            pallet: "balances".into(),
            method: "transfer".into(),
            args: vec![],
        };
        assert_eq!(presumptive_recipient(&no_args), None);
    }

    #[test]
    fn numeric_values_accept_large_json_floats() {
        match numeric_value(&json!(1e18)).unwrap().value {
            scale_value::ValueDef::Primitive(scale_value::Primitive::U128(number)) => {
                assert_eq!(number, 1_000_000_000_000_000_000)
            }
            other => panic!("unexpected value: {other:?}"),
        }
        assert!(numeric_value(&json!(-1)).is_err());
        match numeric_value(&json!("2,000")).unwrap().value {
            scale_value::ValueDef::Primitive(scale_value::Primitive::U128(number)) => {
                assert_eq!(number, 2000)
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
