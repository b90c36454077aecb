use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{I256, U256};
use indexmap::IndexMap;
use subxt::{events::Events, utils::AccountId32, SubstrateConfig};
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use types::{
    DecodedError, DecodedEvent, EventOrigin, ExtrinsicSpec, GasReport, SimulateRequest,
    SimulationResponse, SubstrateDecodedError, SubstrateGasReport, TokenMetadata, WeightInfo,
};

use crate::{
    error::{SimulationError, SimulationResult},
    format::{format_units, parse_amount},
    impact::{self, ImpactContext},
    metadata::MetadataCache,
    snapshot::{merge_missing, BalanceSnapshot, NativeBalance, SnapshotMap},
};

use super::{
    backend::SubstrateFork,
    balances,
    errors::decode_dispatch_error,
    events::{
        decode_events, filter_by_extrinsic, is_relevant, max_apply_extrinsic_index, EventRecord,
    },
    extrinsic::{build_call, fake_signed_extrinsic, presumptive_recipient, BuildError, RawCallData},
};

/// Runtime-module simulation engine. The fork's only mutation primitive is
/// block production, so isolation comes from event-phase filtering and
/// restoration is a head reset to the fork origin.
pub struct SubstrateEngine {
    backend: SubstrateFork,
    lock: Mutex<()>,
    metadata_cache: Arc<MetadataCache>,
    native_override: Option<String>,
}

/// What the locked section hands over for report assembly once the head has
/// been reset.
struct Executed {
    before: SnapshotMap,
    deltas: IndexMap<String, I256>,
    relevant_events: Vec<EventRecord>,
    gas: SubstrateGasReport,
    counterparty: Option<String>,
    assets_meta: HashMap<String, TokenMetadata>,
}

enum Outcome {
    Failure(SimulationResponse),
    Success(Box<Executed>),
}

/// Reduces our extrinsic's balances events into per-address native deltas.
/// Reserved/Unreserved move funds between free and reserved without changing
/// the total, so they do not contribute.
pub fn reduce_native_deltas(records: &[EventRecord]) -> IndexMap<String, I256> {
    let mut deltas: IndexMap<String, I256> = IndexMap::new();
    let mut apply = |address: Option<&String>, amount: I256| {
        if let Some(address) = address {
            let entry = deltas.entry(address.clone()).or_insert(I256::ZERO);
            *entry += amount;
        }
    };

    for record in records {
        if !record.pallet.eq_ignore_ascii_case("balances") {
            continue;
        }
        let Some(amount) = record
            .fields
            .get("amount")
            .and_then(|raw| parse_amount(raw))
            .map(I256::from_raw)
        else {
            continue;
        };

        match record.method.as_str() {
            "Transfer" => {
                apply(record.fields.get("from"), -amount);
                apply(record.fields.get("to"), amount);
            }
            "Withdraw" => apply(record.fields.get("who"), -amount),
            "Deposit" => apply(record.fields.get("who"), amount),
            _ => {}
        }
    }
    deltas
}

fn apply_delta(total: U256, delta: I256) -> U256 {
    if delta.is_negative() {
        total.checked_sub(delta.unsigned_abs()).unwrap_or_else(|| {
            warn!("event deltas exceed observed balance, clamping to zero");
            U256::ZERO
        })
    } else {
        total + delta.unsigned_abs()
    }
}

fn to_events(records: &[EventRecord]) -> Vec<DecodedEvent> {
    records
        .iter()
        .map(|record| DecodedEvent {
            origin: EventOrigin::Pallet {
                pallet: record.pallet.clone(),
                method: record.method.clone(),
            },
            name: record.method.clone(),
            ordinal: record.index,
            fields: record.fields.clone(),
        })
        .collect()
}

fn zero_gas(native: &TokenMetadata) -> SubstrateGasReport {
    SubstrateGasReport {
        weight: WeightInfo {
            ref_time: 0,
            proof_size: 0,
        },
        partial_fee: U256::ZERO,
        partial_fee_formatted: format_units(U256::ZERO, native.decimals),
        native_symbol: native.symbol.clone(),
    }
}

impl SubstrateEngine {
    pub fn new(
        backend: SubstrateFork,
        native_override: Option<String>,
        metadata_cache: Arc<MetadataCache>,
    ) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
            metadata_cache,
            native_override,
        }
    }

    pub fn backend(&self) -> &SubstrateFork {
        &self.backend
    }

    #[instrument(skip_all, fields(sender = %request.sender))]
    pub async fn simulate(&self, request: &SimulateRequest) -> SimulationResult<SimulationResponse> {
        let spec = request
            .extrinsic
            .as_ref()
            .ok_or_else(|| SimulationError::InvalidRequest("missing extrinsic".to_string()))?;
        let sender: AccountId32 = request.sender.parse().map_err(|_| {
            SimulationError::InvalidRequest(format!("invalid sender address: {}", request.sender))
        })?;
        let track_assets = request.track_assets.clone().unwrap_or_default();

        let _guard = self.lock.lock().await;
        let started = Instant::now();
        metrics::counter!("simulations_total", "kind" => "substrate").increment(1);

        // Start from a known state: any block a previous crash may have left
        // behind is discarded before we observe anything.
        if let Err(restore) = self.backend.reset().await {
            return Err(SimulationError::FatalRestore {
                original: "pre-simulation head reset".to_string(),
                restore,
            });
        }

        let properties = self.backend.properties().await;
        let native = TokenMetadata {
            symbol: self
                .native_override
                .clone()
                .unwrap_or(properties.symbol),
            decimals: properties.decimals,
        };

        let outcome = self
            .run_locked(spec, &sender, &track_assets, &native)
            .await;
        let restore = self.backend.reset().await;
        metrics::histogram!("simulation_duration_seconds", "kind" => "substrate")
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
                Ok(Outcome::Failure(response)) => Ok(response),
                Ok(Outcome::Success(executed)) => Ok(self.assemble(*executed, &sender, &native).await),
                Err(error) => {
                    warn!(%error, "simulation aborted mid-pipeline");
                    Ok(self.failure(
                        &sender,
                        SubstrateDecodedError::Unknown {
                            message: error.to_string(),
                            raw: None,
                        },
                        vec![],
                        zero_gas(&native),
                    ))
                }
            },
        }
    }

    async fn run_locked(
        &self,
        spec: &ExtrinsicSpec,
        sender: &AccountId32,
        track_assets: &[u32],
        native: &TokenMetadata,
    ) -> SimulationResult<Outcome> {
        let client = self.backend.client().await;
        let metadata = client.metadata();

        enum BuiltCall {
            Dynamic(subxt::tx::DynamicPayload),
            Raw(RawCallData),
        }

        let (call, counterparty) = match spec {
            ExtrinsicSpec::Raw(raw) => {
                let bytes = hex::decode(raw.raw_hex.trim_start_matches("0x")).map_err(|_| {
                    SimulationError::InvalidRequest("invalid rawHex extrinsic".to_string())
                })?;
                (BuiltCall::Raw(RawCallData::new(bytes)), None)
            }
            ExtrinsicSpec::Call(call_spec) => {
                let payload = match build_call(&metadata, call_spec) {
                    Ok(payload) => payload,
                    Err(error @ BuildError::UnknownExtrinsic { .. }) => {
                        return Ok(Outcome::Failure(self.failure(
                            sender,
                            SubstrateDecodedError::Unknown {
                                message: error.to_string(),
                                raw: None,
                            },
                            vec![],
                            zero_gas(native),
                        )))
                    }
                    Err(error) => {
                        return Ok(Outcome::Failure(self.failure(
                            sender,
                            SubstrateDecodedError::Other {
                                message: error.to_string(),
                                raw: None,
                            },
                            vec![],
                            zero_gas(native),
                        )))
                    }
                };
                let recipient = presumptive_recipient(call_spec)
                    .and_then(|address| address.parse::<AccountId32>().ok());
                (BuiltCall::Dynamic(payload), recipient)
            }
        };

        let assets_meta = self.resolve_assets(&client, track_assets).await;

        let mut observed = vec![sender.clone()];
        if let Some(recipient) = &counterparty {
            if recipient != sender {
                observed.push(recipient.clone());
            }
        }
        let before = balances::capture(&client, &observed, track_assets).await;

        let nonce = self.backend.nonce(sender).await?;
        let extrinsic = match &call {
            BuiltCall::Dynamic(payload) => {
                fake_signed_extrinsic(&client, payload, sender.clone(), nonce).await?
            }
            BuiltCall::Raw(raw) => fake_signed_extrinsic(&client, raw, sender.clone(), nonce).await?,
        };

        let (weight, partial_fee) = self.backend.payment_info(&extrinsic).await?;
        let gas = SubstrateGasReport {
            weight,
            partial_fee: U256::from(partial_fee),
            partial_fee_formatted: format_units(U256::from(partial_fee), native.decimals),
            native_symbol: native.symbol.clone(),
        };

        self.backend.set_signature_verification(false).await?;
        let extrinsic_hex = format!("0x{}", hex::encode(&extrinsic));
        self.backend.submit_extrinsic(&extrinsic_hex).await?;
        self.backend.new_block().await?;

        let raw_events = self.backend.events_at_head().await?;
        let records = decode_events(&raw_events);
        let Some(our_index) = max_apply_extrinsic_index(&records) else {
            return Err(SimulationError::Rpc {
                method: "dev_newBlock",
                message: "produced block applied no extrinsics".to_string(),
            });
        };
        let our_records = filter_by_extrinsic(&records, our_index);
        let relevant_events: Vec<EventRecord> = our_records
            .iter()
            .filter(|record| is_relevant(record))
            .cloned()
            .collect();

        if let Some(failed) = our_records
            .iter()
            .find(|record| record.pallet == "System" && record.method == "ExtrinsicFailed")
        {
            let error = match dispatch_error_value(&raw_events, failed.index) {
                Some(value) => decode_dispatch_error(&value, &metadata),
                None => SubstrateDecodedError::Unknown {
                    message: "Unknown error occurred".to_string(),
                    raw: None,
                },
            };
            return Ok(Outcome::Failure(self.failure(
                sender,
                error,
                to_events(&relevant_events),
                gas,
            )));
        }

        let deltas = reduce_native_deltas(&our_records);

        Ok(Outcome::Success(Box::new(Executed {
            before,
            deltas,
            relevant_events,
            gas,
            counterparty: counterparty.map(|account| account.to_string()),
            assets_meta,
        })))
    }

    /// Runs after the head reset: the fork is back at the origin state, so
    /// reading a balance now yields the value an address had before the
    /// injected extrinsic, which is exactly the `before` the report needs
    /// for addresses only discovered through events.
    async fn assemble(
        &self,
        executed: Executed,
        sender: &AccountId32,
        native: &TokenMetadata,
    ) -> SimulationResponse {
        let Executed {
            mut before,
            deltas,
            relevant_events,
            gas,
            counterparty,
            assets_meta,
        } = executed;

        let discovered: Vec<AccountId32> = deltas
            .keys()
            .filter(|address| !before.contains_key(*address))
            .filter_map(|address| address.parse().ok())
            .collect();
        if !discovered.is_empty() {
            let client = self.backend.client().await;
            let historical = balances::capture(&client, &discovered, &[]).await;
            merge_missing(&mut before, historical);
        }

        let mut after = SnapshotMap::new();
        let mut addresses: Vec<String> = before.keys().cloned().collect();
        for address in deltas.keys() {
            if !addresses.contains(address) {
                addresses.push(address.clone());
            }
        }
        for address in &addresses {
            let observed = before.get(address).cloned().unwrap_or_default();
            let delta = deltas.get(address).copied().unwrap_or(I256::ZERO);
            after.insert(
                address.clone(),
                BalanceSnapshot {
                    native: NativeBalance::single(apply_delta(observed.native.total(), delta)),
                    fungibles: observed.fungibles.clone(),
                },
            );
        }

        let sender_address = sender.to_string();
        let ctx = ImpactContext {
            sender: &sender_address,
            counterparty: counterparty.as_deref(),
            counterparty_always: false,
            native,
            tokens: &assets_meta,
        };
        let state_changes = impact::build_state_impact(&ctx, &before, &after);

        SimulationResponse {
            success: true,
            state_changes,
            events: to_events(&relevant_events),
            gas: GasReport::Substrate(gas),
            error: None,
        }
    }

    async fn resolve_assets(
        &self,
        client: &subxt::OnlineClient<SubstrateConfig>,
        assets: &[u32],
    ) -> HashMap<String, TokenMetadata> {
        let mut resolved = HashMap::new();
        for asset in assets {
            let key = asset.to_string();
            let meta = match self.metadata_cache.get(&key) {
                Some(meta) => meta,
                None => {
                    let fetched = balances::asset_metadata(client, *asset).await;
                    self.metadata_cache.insert_if_absent(&key, fetched)
                }
            };
            resolved.insert(key, meta);
        }
        resolved
    }

    fn failure(
        &self,
        sender: &AccountId32,
        error: SubstrateDecodedError,
        events: Vec<DecodedEvent>,
        gas: SubstrateGasReport,
    ) -> SimulationResponse {
        SimulationResponse {
            success: false,
            state_changes: impact::empty_report(&sender.to_string(), None),
            events,
            gas: GasReport::Substrate(gas),
            error: Some(DecodedError::Substrate(error)),
        }
    }
}

/// Pulls the raw `dispatch_error` value out of the failed event's fields;
/// the formatted string view is not enough to resolve module errors.
fn dispatch_error_value(
    events: &Events<SubstrateConfig>,
    record_index: u32,
) -> Option<scale_value::Value<()>> {
    let details = events
        .iter()
        .enumerate()
        .find(|(index, _)| *index as u32 == record_index)
        .and_then(|(_, details)| details.ok())?;
    let fields = details.field_values().ok()?;
    match fields {
        scale_value::Composite::Named(named) => named
            .into_iter()
            .find(|(name, _)| name == "dispatch_error")
            .map(|(_, value)| value.remove_context()),
        scale_value::Composite::Unnamed(values) => values
            .into_iter()
            .next()
            .map(|value| value.remove_context()),
    }
}
