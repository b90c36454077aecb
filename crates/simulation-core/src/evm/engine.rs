use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use alloy::{
    consensus::TxReceipt,
    hex,
    primitives::{Address, TxKind, U256},
    rpc::types::{TransactionInput, TransactionRequest},
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use types::{
    DecodedError, DecodedEvent, EventOrigin, EvmDecodedError, EvmGasReport, GasReport,
    SimulateRequest, SimulationResponse, TokenMetadata,
};

use crate::{
    error::{SimulationError, SimulationResult},
    format::{format_units, parse_amount},
    impact::{self, ImpactContext},
    metadata::MetadataCache,
    snapshot::merge_missing,
};

use super::{
    backend::EvmFork,
    balances, calldata,
    errors::decode_rpc_error,
    events::{transfer_participants, DecodedLog, LogDecoder},
};

/// Account-model simulation engine. Owns the fork critical section: at most
/// one simulation may drive the snapshot/impersonate/execute/restore cycle
/// at a time.
pub struct EvmEngine {
    backend: EvmFork,
    lock: Mutex<()>,
    decoder: LogDecoder,
    metadata: Arc<MetadataCache>,
    native: TokenMetadata,
}

struct ParsedRequest {
    sender: Address,
    to: Address,
    data: Vec<u8>,
    value: U256,
    gas_limit: Option<u64>,
    track_tokens: Vec<Address>,
    /// Recipient extracted from transfer-style calldata; the report's
    /// counterparty when present, else `to`.
    recipient: Option<Address>,
}

impl ParsedRequest {
    fn counterparty(&self) -> Address {
        self.recipient.unwrap_or(self.to)
    }
}

fn canonical(address: Address) -> String {
    format!("{address:#x}")
}

fn parse(request: &SimulateRequest) -> SimulationResult<ParsedRequest> {
    let tx = request
        .transaction
        .as_ref()
        .ok_or_else(|| SimulationError::InvalidRequest("missing transaction".to_string()))?;

    let sender: Address = request.sender.parse().map_err(|_| {
        SimulationError::InvalidRequest(format!("invalid sender address: {}", request.sender))
    })?;
    let to: Address = tx
        .to
        .parse()
        .map_err(|_| SimulationError::InvalidRequest(format!("invalid to address: {}", tx.to)))?;

    let data = match tx.data.as_deref() {
        Some(raw) => hex::decode(raw)
            .map_err(|_| SimulationError::InvalidRequest("invalid calldata hex".to_string()))?,
        None => Vec::new(),
    };
    let value = match tx.value.as_deref() {
        Some(raw) => parse_amount(raw)
            .ok_or_else(|| SimulationError::InvalidRequest(format!("invalid value: {raw}")))?,
        None => U256::ZERO,
    };
    let gas_limit = match tx.gas_limit.as_deref() {
        Some(raw) => Some(
            parse_amount(raw)
                .and_then(|gas| u64::try_from(gas).ok())
                .ok_or_else(|| {
                    SimulationError::InvalidRequest(format!("invalid gas limit: {raw}"))
                })?,
        ),
        None => None,
    };

    let mut track_tokens = Vec::new();
    for token in request.track_tokens.iter().flatten() {
        let address: Address = token.parse().map_err(|_| {
            SimulationError::InvalidRequest(format!("invalid token address: {token}"))
        })?;
        track_tokens.push(address);
    }

    let recipient = calldata::extract_recipient(&data);

    Ok(ParsedRequest {
        sender,
        to,
        data,
        value,
        gas_limit,
        track_tokens,
        recipient,
    })
}

fn build_transaction(req: &ParsedRequest) -> TransactionRequest {
    TransactionRequest {
        from: Some(req.sender),
        to: Some(TxKind::Call(req.to)),
        value: Some(req.value),
        input: TransactionInput::new(req.data.clone().into()),
        gas: req.gas_limit,
        ..Default::default()
    }
}

fn to_events(decoded: &[DecodedLog]) -> Vec<DecodedEvent> {
    decoded
        .iter()
        .map(|log| DecodedEvent {
            origin: EventOrigin::Contract(log.contract.clone()),
            name: log.name.clone(),
            ordinal: log.log_index as u32,
            fields: log.args.clone(),
        })
        .collect()
}

fn zero_gas(native: &TokenMetadata) -> GasReport {
    GasReport::Evm(EvmGasReport {
        gas_used: U256::ZERO,
        gas_price: U256::ZERO,
        total_cost_wei: U256::ZERO,
        total_cost_native: format_units(U256::ZERO, native.decimals),
        native_symbol: native.symbol.clone(),
    })
}

fn decode_engine_error(error: &SimulationError) -> EvmDecodedError {
    match error {
        SimulationError::Provider(rpc_error) => decode_rpc_error(rpc_error),
        other => EvmDecodedError::Unknown {
            message: other.to_string(),
            raw: None,
        },
    }
}

impl EvmEngine {
    pub fn new(backend: EvmFork, native_symbol: Option<String>, metadata: Arc<MetadataCache>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
            decoder: LogDecoder::new(),
            metadata,
            native: TokenMetadata {
                symbol: native_symbol.unwrap_or_else(|| "ETH".to_string()),
                decimals: 18,
            },
        }
    }

    pub fn backend(&self) -> &EvmFork {
        &self.backend
    }

    #[instrument(skip_all, fields(sender = %request.sender))]
    pub async fn simulate(&self, request: &SimulateRequest) -> SimulationResult<SimulationResponse> {
        let parsed = parse(request)?;

        let _guard = self.lock.lock().await;
        let started = Instant::now();
        metrics::counter!("simulations_total", "kind" => "evm").increment(1);

        let mut snapshot_id = match self.backend.snapshot().await {
            Ok(id) => id,
            Err(error) => {
                warn!(%error, "could not snapshot fork");
                return Ok(self.failure(&parsed, decode_engine_error(&error), vec![]));
            }
        };

        let outcome = self.run_locked(&parsed, &mut snapshot_id).await;
        let restore = self.restore(parsed.sender, &snapshot_id).await;
        metrics::histogram!("simulation_duration_seconds", "kind" => "evm")
            .record(started.elapsed().as_secs_f64());

        match restore {
            Err(restore_error) => Err(SimulationError::FatalRestore {
                original: match &outcome {
                    Ok(_) => "simulation completed".to_string(),
                    Err(error) => error.to_string(),
                },
                restore: restore_error,
            }),
            Ok(()) => match outcome {
                Ok(response) => Ok(response),
                Err(error @ SimulationError::RevertFailed(_)) => Err(error),
                Err(error) => {
                    warn!(%error, "simulation aborted mid-pipeline");
                    Ok(self.failure(&parsed, decode_engine_error(&error), vec![]))
                }
            },
        }
    }

    async fn run_locked(
        &self,
        req: &ParsedRequest,
        snapshot_id: &mut String,
    ) -> SimulationResult<SimulationResponse> {
        let mut tracked: Vec<Address> = Vec::new();
        for address in [req.sender, req.to].into_iter().chain(req.recipient) {
            if !tracked.contains(&address) {
                tracked.push(address);
            }
        }

        let mut before = balances::capture(&self.backend, &tracked, &req.track_tokens).await;
        let gas_price = U256::from(self.backend.gas_price().await?);
        let tokens = self.resolve_tokens(&req.track_tokens).await;

        self.backend.impersonate(req.sender).await?;
        let tx = build_transaction(req);
        let hash = self.backend.send_as_sender(&tx).await?;
        let mut receipt = self.backend.wait_for_receipt(hash).await?;
        let mut decoded = self.decoder.decode_all(receipt.inner.logs());

        // A status-0 receipt means the node accepted the transaction but the
        // call reverted without surfacing a reason at submission time.
        if !receipt.status() {
            return Ok(SimulationResponse {
                success: false,
                state_changes: impact::empty_report(
                    &canonical(req.sender),
                    Some(&canonical(req.counterparty())),
                ),
                events: to_events(&decoded),
                gas: zero_gas(&self.native),
                error: Some(DecodedError::Evm(EvmDecodedError::Revert {
                    message: "Transaction reverted".to_string(),
                    raw: None,
                })),
            });
        }

        let tracked_set: HashSet<Address> = tracked.iter().copied().collect();
        let discovered: Vec<Address> = transfer_participants(&decoded)
            .iter()
            .filter_map(|address| address.parse().ok())
            .filter(|address| !tracked_set.contains(address))
            .collect();

        if !discovered.is_empty() {
            debug!(
                count = discovered.len(),
                "transfer events touched untracked addresses, re-executing for history"
            );
            match self.backend.revert(snapshot_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(SimulationError::RevertFailed(
                        "evm_revert returned false".to_string(),
                    ))
                }
                Err(error) => return Err(SimulationError::RevertFailed(error.to_string())),
            }
            // The revert consumed the snapshot id; arm a fresh one for the
            // final restore.
            *snapshot_id = self.backend.snapshot().await?;

            let historical = balances::capture(&self.backend, &discovered, &req.track_tokens).await;
            merge_missing(&mut before, historical);

            self.backend.impersonate(req.sender).await?;
            let hash = self.backend.send_as_sender(&tx).await?;
            receipt = self.backend.wait_for_receipt(hash).await?;
            decoded = self.decoder.decode_all(receipt.inner.logs());
        }

        let mut all_tracked = tracked;
        all_tracked.extend(discovered);
        let after = balances::capture(&self.backend, &all_tracked, &req.track_tokens).await;

        let sender = canonical(req.sender);
        let counterparty = canonical(req.counterparty());
        let ctx = ImpactContext {
            sender: &sender,
            counterparty: Some(&counterparty),
            counterparty_always: true,
            native: &self.native,
            tokens: &tokens,
        };
        let state_changes = impact::build_state_impact(&ctx, &before, &after);

        let gas_used = U256::from(receipt.gas_used);
        let total_cost_wei = gas_used * gas_price;
        let gas = EvmGasReport {
            gas_used,
            gas_price,
            total_cost_wei,
            total_cost_native: format_units(total_cost_wei, self.native.decimals),
            native_symbol: self.native.symbol.clone(),
        };

        Ok(SimulationResponse {
            success: true,
            state_changes,
            events: to_events(&decoded),
            gas: GasReport::Evm(gas),
            error: None,
        })
    }

    /// Puts the fork back where it was, whatever happened. Impersonation
    /// stop failures are swallowed; a dead snapshot falls through to a full
    /// reset. `Err` here means the fork is in an unknown state.
    async fn restore(&self, sender: Address, snapshot_id: &str) -> Result<(), String> {
        if let Err(error) = self.backend.stop_impersonating(sender).await {
            debug!(%error, "stop impersonation failed");
        }

        match self.backend.revert(snapshot_id).await {
            Ok(true) => return Ok(()),
            Ok(false) => warn!("evm_revert returned false, resetting fork"),
            Err(error) => warn!(%error, "evm_revert failed, resetting fork"),
        }

        self.backend.reset().await.map_err(|error| error.to_string())
    }

    async fn resolve_tokens(&self, tokens: &[Address]) -> HashMap<String, TokenMetadata> {
        let mut resolved = HashMap::new();
        for token in tokens {
            let key = canonical(*token);
            let meta = match self.metadata.get(&key) {
                Some(meta) => meta,
                None => {
                    let fetched = balances::token_metadata(&self.backend, *token).await;
                    self.metadata.insert_if_absent(&key, fetched)
                }
            };
            resolved.insert(key, meta);
        }
        resolved
    }

    fn failure(
        &self,
        req: &ParsedRequest,
        error: EvmDecodedError,
        events: Vec<DecodedEvent>,
    ) -> SimulationResponse {
        SimulationResponse {
            success: false,
            state_changes: impact::empty_report(
                &canonical(req.sender),
                Some(&canonical(req.counterparty())),
            ),
            events,
            gas: zero_gas(&self.native),
            error: Some(DecodedError::Evm(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::EvmTransaction;

    fn request(tx: EvmTransaction) -> SimulateRequest {
        SimulateRequest {
            sender: "0x1111111111111111111111111111111111111111".to_string(),
            transaction: Some(tx),
            extrinsic: None,
            track_tokens: None,
            track_assets: None,
        }
    }

    #[test]
    fn parse_applies_defaults() {
        let parsed = parse(&request(EvmTransaction {
            to: "0x2222222222222222222222222222222222222222".to_string(),
            data: None,
            value: None,
            gas_limit: None,
        }))
        .unwrap();

        assert!(parsed.data.is_empty());
        assert_eq!(parsed.value, U256::ZERO);
        assert_eq!(parsed.gas_limit, None);
        assert_eq!(parsed.recipient, None);
        assert_eq!(parsed.counterparty(), parsed.to);
    }

    #[test]
    fn parse_extracts_calldata_recipient_as_counterparty() {
        let recipient = "8888888888888888888888888888888888888888";
        let data = format!(
            "0xa9059cbb000000000000000000000000{recipient}{:064x}",
            1000
        );
        let parsed = parse(&request(EvmTransaction {
            to: "0x2222222222222222222222222222222222222222".to_string(),
            data: Some(data),
            value: None,
            gas_limit: None,
        }))
        .unwrap();

        assert_eq!(
            parsed.counterparty(),
            format!("0x{recipient}").parse::<Address>().unwrap()
        );
    }

    #[test]
    fn parse_rejects_bad_addresses() {
        let result = parse(&request(EvmTransaction {
            to: "not-an-address".to_string(),
            data: None,
            value: None,
            gas_limit: None,
        }));
        assert!(matches!(result, Err(SimulationError::InvalidRequest(_))));
    }

    #[test]
    fn parse_accepts_separator_value() {
        let parsed = parse(&request(EvmTransaction {
            to: "0x2222222222222222222222222222222222222222".to_string(),
            data: None,
            value: Some("1,000,000".to_string()),
            gas_limit: Some("21000".to_string()),
        }))
        .unwrap();
        assert_eq!(parsed.value, U256::from(1_000_000u64));
        assert_eq!(parsed.gas_limit, Some(21_000));
    }

    #[test]
    fn transaction_is_built_as_sender_call() {
        let parsed = parse(&request(EvmTransaction {
            to: "0x2222222222222222222222222222222222222222".to_string(),
            data: Some("0x1234".to_string()),
            value: Some("5".to_string()),
            gas_limit: None,
        }))
        .unwrap();
        let tx = build_transaction(&parsed);
        assert_eq!(tx.from, Some(parsed.sender));
        assert_eq!(tx.to, Some(TxKind::Call(parsed.to)));
        assert_eq!(tx.value, Some(U256::from(5u64)));
        assert_eq!(tx.input.input.as_ref().map(|b| b.to_vec()), Some(vec![0x12, 0x34]));
    }
}
