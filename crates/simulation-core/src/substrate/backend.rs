use parity_scale_codec::{Decode, Encode};
use serde_json::json;
use subxt::{
    backend::{legacy::LegacyRpcMethods, rpc::RpcClient},
    config::substrate::H256,
    ext::subxt_rpcs::rpc_params,
    utils::AccountId32,
    OnlineClient, SubstrateConfig,
};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};
use types::WeightInfo;

use crate::error::{SimulationError, SimulationResult};

/// Where the fork was when we first connected; every simulation ends with a
/// head reset back to this block.
#[derive(Debug, Clone)]
pub struct ForkOrigin {
    pub hash: H256,
    pub number: u64,
    pub chain: String,
}

/// Native-token properties advertised by the chain.
#[derive(Debug, Clone)]
pub struct ChainProperties {
    pub symbol: String,
    pub decimals: u8,
}

/// Uniform result of the tiered dry-run probe.
#[derive(Debug, Clone)]
pub struct DryRunOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub weight: Option<WeightInfo>,
}

#[derive(Decode)]
struct FeeWeight {
    #[codec(compact)]
    ref_time: u64,
    #[codec(compact)]
    proof_size: u64,
}

#[derive(Decode)]
struct RuntimeDispatchInfo {
    weight: FeeWeight,
    _class: u8,
    partial_fee: u128,
}

fn rpc_failure<E: std::fmt::Display>(method: &'static str) -> impl Fn(E) -> SimulationError {
    move |error| SimulationError::Rpc {
        method,
        message: error.to_string(),
    }
}

struct Inner {
    client: OnlineClient<SubstrateConfig>,
    rpc: RpcClient,
    legacy: LegacyRpcMethods<SubstrateConfig>,
}

impl Inner {
    async fn connect(endpoint: &str) -> SimulationResult<Self> {
        let rpc = RpcClient::from_url(endpoint)
            .await
            .map_err(|error| SimulationError::Connection {
                endpoint: endpoint.to_string(),
                message: error.to_string(),
            })?;
        let client = OnlineClient::<SubstrateConfig>::from_rpc_client(rpc.clone()).await?;
        let legacy = LegacyRpcMethods::<SubstrateConfig>::new(rpc.clone());
        Ok(Self {
            client,
            rpc,
            legacy,
        })
    }
}

/// Thin client over a chopsticks-style runtime-module fork. The only
/// mutation primitive the fork offers is producing a block; undo is a head
/// reset to the remembered fork origin.
pub struct SubstrateFork {
    endpoint: String,
    inner: RwLock<Inner>,
    origin: ForkOrigin,
    properties: OnceCell<ChainProperties>,
}

impl SubstrateFork {
    pub async fn connect(endpoint: &str) -> SimulationResult<Self> {
        let inner = Inner::connect(endpoint).await?;

        let chain = inner
            .legacy
            .system_chain()
            .await
            .map_err(rpc_failure("system_chain"))?;
        let hash = inner
            .legacy
            .chain_get_block_hash(None)
            .await
            .map_err(rpc_failure("chain_getBlockHash"))?
            .ok_or_else(|| SimulationError::Connection {
                endpoint: endpoint.to_string(),
                message: "no head block".to_string(),
            })?;
        let header = inner
            .legacy
            .chain_get_header(Some(hash))
            .await
            .map_err(rpc_failure("chain_getHeader"))?
            .ok_or_else(|| SimulationError::Connection {
                endpoint: endpoint.to_string(),
                message: format!("no header for {hash:?}"),
            })?;

        let origin = ForkOrigin {
            hash,
            number: header.number as u64,
            chain,
        };
        info!(chain = %origin.chain, number = origin.number, "connected to runtime-module fork");

        Ok(Self {
            endpoint: endpoint.to_string(),
            inner: RwLock::new(inner),
            origin,
            properties: OnceCell::new(),
        })
    }

    pub fn origin(&self) -> &ForkOrigin {
        &self.origin
    }

    pub async fn client(&self) -> OnlineClient<SubstrateConfig> {
        self.inner.read().await.client.clone()
    }

    /// Native symbol and decimals from chain properties, read once per
    /// process.
    pub async fn properties(&self) -> ChainProperties {
        self.properties
            .get_or_init(|| async {
                let fallback = ChainProperties {
                    symbol: "UNIT".to_string(),
                    decimals: 12,
                };
                let inner = self.inner.read().await;
                match inner.legacy.system_properties().await {
                    Ok(properties) => {
                        let symbol = match properties.get("tokenSymbol") {
                            Some(serde_json::Value::String(symbol)) => symbol.clone(),
                            Some(serde_json::Value::Array(symbols)) => symbols
                                .first()
                                .and_then(|value| value.as_str())
                                .unwrap_or(&fallback.symbol)
                                .to_string(),
                            _ => fallback.symbol.clone(),
                        };
                        let decimals = match properties.get("tokenDecimals") {
                            Some(serde_json::Value::Number(number)) => {
                                number.as_u64().unwrap_or(fallback.decimals as u64) as u8
                            }
                            Some(serde_json::Value::Array(decimals)) => decimals
                                .first()
                                .and_then(|value| value.as_u64())
                                .unwrap_or(fallback.decimals as u64)
                                as u8,
                            _ => fallback.decimals,
                        };
                        ChainProperties { symbol, decimals }
                    }
                    Err(error) => {
                        warn!(%error, "chain properties unavailable, using defaults");
                        fallback
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn set_signature_verification(&self, enabled: bool) -> SimulationResult<()> {
        let inner = self.inner.read().await;
        let _: serde_json::Value = inner
            .rpc
            .request("dev_setSignatureVerification", rpc_params![enabled])
            .await
            .map_err(rpc_failure("dev_setSignatureVerification"))?;
        Ok(())
    }

    /// Fee and weight for an extrinsic with the sender as origin, via the
    /// transaction-payment runtime API.
    pub async fn payment_info(&self, extrinsic: &[u8]) -> SimulationResult<(WeightInfo, u128)> {
        let mut call_parameters = extrinsic.to_vec();
        call_parameters.extend((extrinsic.len() as u32).encode());

        let inner = self.inner.read().await;
        let bytes = inner
            .legacy
            .state_call(
                "TransactionPaymentApi_query_info",
                Some(&call_parameters),
                None,
            )
            .await
            .map_err(rpc_failure("state_call"))?;

        let info = RuntimeDispatchInfo::decode(&mut &bytes[..])?;
        Ok((
            WeightInfo {
                ref_time: info.weight.ref_time,
                proof_size: info.weight.proof_size,
            },
            info.partial_fee,
        ))
    }

    pub async fn nonce(&self, account: &AccountId32) -> SimulationResult<u64> {
        let inner = self.inner.read().await;
        inner
            .legacy
            .system_account_next_index(account)
            .await
            .map_err(rpc_failure("system_accountNextIndex"))
    }

    pub async fn submit_extrinsic(&self, extrinsic_hex: &str) -> SimulationResult<H256> {
        let inner = self.inner.read().await;
        inner
            .rpc
            .request("author_submitExtrinsic", rpc_params![extrinsic_hex])
            .await
            .map_err(rpc_failure("author_submitExtrinsic"))
    }

    /// Asks the fork to produce one block from its transaction pool.
    pub async fn new_block(&self) -> SimulationResult<()> {
        let inner = self.inner.read().await;
        let _: serde_json::Value = inner
            .rpc
            .request("dev_newBlock", rpc_params![json!({})])
            .await
            .map_err(rpc_failure("dev_newBlock"))?;
        Ok(())
    }

    /// Produces a block carrying the given extrinsic as unsigned, bypassing
    /// signature checks entirely.
    pub async fn execute_extrinsic(&self, extrinsic_hex: &str) -> SimulationResult<()> {
        let inner = self.inner.read().await;
        let _: serde_json::Value = inner
            .rpc
            .request(
                "dev_newBlock",
                rpc_params![json!({ "unsignedExtrinsics": [extrinsic_hex] })],
            )
            .await
            .map_err(rpc_failure("dev_newBlock"))?;
        Ok(())
    }

    /// Events of the current head block.
    pub async fn events_at_head(
        &self,
    ) -> SimulationResult<subxt::events::Events<SubstrateConfig>> {
        let client = self.client().await;
        let block = client.blocks().at_latest().await?;
        Ok(block.events().await?)
    }

    /// Sets the head back to the fork origin. A failed reset is retried once
    /// over a fresh connection; `Err` means the fork is in an unknown state.
    pub async fn reset(&self) -> Result<(), String> {
        if self.set_head_to_origin().await.is_ok() {
            return Ok(());
        }
        warn!("head reset failed, reconnecting to fork");
        self.reconnect().await.map_err(|error| error.to_string())?;
        self.set_head_to_origin()
            .await
            .map_err(|error| error.to_string())
    }

    async fn set_head_to_origin(&self) -> SimulationResult<()> {
        let inner = self.inner.read().await;
        let _: serde_json::Value = inner
            .rpc
            .request("dev_setHead", rpc_params![self.origin.hash])
            .await
            .map_err(rpc_failure("dev_setHead"))?;
        Ok(())
    }

    async fn reconnect(&self) -> SimulationResult<()> {
        let fresh = Inner::connect(&self.endpoint).await?;
        *self.inner.write().await = fresh;
        Ok(())
    }

    /// Tiered dry-run: modern runtime API, then the legacy RPC, then an
    /// optimistic zero-weight success when the fork supports neither.
    pub async fn dry_run(&self, extrinsic: &[u8], sender: &AccountId32) -> DryRunOutcome {
        if let Some(outcome) = self.dry_run_runtime_api(extrinsic, sender).await {
            return outcome;
        }
        if let Some(outcome) = self.dry_run_legacy_rpc(extrinsic).await {
            return outcome;
        }
        debug!("no dry-run support on fork, assuming success");
        DryRunOutcome {
            success: true,
            error: None,
            weight: Some(WeightInfo {
                ref_time: 0,
                proof_size: 0,
            }),
        }
    }

    async fn dry_run_runtime_api(
        &self,
        extrinsic: &[u8],
        sender: &AccountId32,
    ) -> Option<DryRunOutcome> {
        // OriginCaller::system(RawOrigin::Signed(sender)), the call, and the
        // XCM result version the API expects.
        let mut call_parameters: Vec<u8> = vec![0x00, 0x01];
        call_parameters.extend_from_slice(&sender.0);
        call_parameters.extend_from_slice(extrinsic);
        call_parameters.extend(5u32.encode());

        let inner = self.inner.read().await;
        let bytes = inner
            .legacy
            .state_call("DryRunApi_dry_run_call", Some(&call_parameters), None)
            .await
            .ok()?;

        let success = bytes.first() == Some(&0x00) && bytes.get(1) == Some(&0x00);
        Some(DryRunOutcome {
            success,
            error: (!success).then(|| "dry-run call reported failure".to_string()),
            weight: None,
        })
    }

    async fn dry_run_legacy_rpc(&self, extrinsic: &[u8]) -> Option<DryRunOutcome> {
        let extrinsic_hex = format!("0x{}", hex::encode(extrinsic));
        let inner = self.inner.read().await;
        let response: String = inner
            .rpc
            .request("system_dryRun", rpc_params![extrinsic_hex])
            .await
            .ok()?;

        let bytes = hex::decode(response.trim_start_matches("0x")).ok()?;
        let success = bytes.first() == Some(&0x00) && bytes.get(1) == Some(&0x00);
        Some(DryRunOutcome {
            success,
            error: (!success).then(|| "dry-run RPC reported failure".to_string()),
            weight: None,
        })
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.read().await;
        inner.legacy.system_health().await.is_ok()
    }

    pub fn chain(&self) -> &str {
        &self.origin.chain
    }
}
