use std::time::Duration;

use alloy::{
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{TransactionReceipt, TransactionRequest},
};
use configs::EvmConfig;
use tracing::{debug, info, warn};

use crate::error::{SimulationError, SimulationResult};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECEIPT_POLL_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
struct ForkSource {
    url: String,
    block: Option<u64>,
}

/// Thin client over an anvil-style EVM fork. Everything stateful lives on
/// the fork; this wrapper only remembers where the fork came from so
/// `anvil_reset` can rebuild it.
pub struct EvmFork {
    provider: DynProvider,
    upstream: Option<DynProvider>,
    fork_block: u64,
    fork_source: Option<ForkSource>,
}

impl EvmFork {
    pub async fn connect(config: &EvmConfig) -> SimulationResult<Self> {
        let connect = |endpoint: &str| -> SimulationResult<DynProvider> {
            let url = endpoint
                .parse()
                .map_err(|error: url::ParseError| SimulationError::Connection {
                    endpoint: endpoint.to_string(),
                    message: error.to_string(),
                })?;
            Ok(ProviderBuilder::new().connect_http(url).erased())
        };

        let provider = connect(&config.fork_url)?;
        let upstream = config
            .upstream_rpc_url
            .as_deref()
            .map(connect)
            .transpose()?;

        let fork_block =
            provider
                .get_block_number()
                .await
                .map_err(|error| SimulationError::Connection {
                    endpoint: config.fork_url.clone(),
                    message: error.to_string(),
                })?;
        info!(fork_block, "connected to EVM fork");

        Ok(Self {
            provider,
            upstream,
            fork_block,
            fork_source: config.fork_source_url.clone().map(|url| ForkSource {
                url,
                block: config.fork_block,
            }),
        })
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn fork_block(&self) -> u64 {
        self.fork_block
    }

    /// Takes a fork snapshot and returns its opaque id.
    pub async fn snapshot(&self) -> SimulationResult<String> {
        let id: String = self.provider.raw_request("evm_snapshot".into(), ()).await?;
        debug!(snapshot = %id, "took fork snapshot");
        Ok(id)
    }

    /// Reverts to a snapshot. `false` means the fork no longer knows the id;
    /// callers fall through to a full reset.
    pub async fn revert(&self, snapshot_id: &str) -> SimulationResult<bool> {
        let reverted: bool = self
            .provider
            .raw_request("evm_revert".into(), (snapshot_id,))
            .await?;
        Ok(reverted)
    }

    pub async fn impersonate(&self, address: Address) -> SimulationResult<()> {
        let _: serde_json::Value = self
            .provider
            .raw_request("anvil_impersonateAccount".into(), (address,))
            .await?;
        Ok(())
    }

    pub async fn stop_impersonating(&self, address: Address) -> SimulationResult<()> {
        let _: serde_json::Value = self
            .provider
            .raw_request("anvil_stopImpersonatingAccount".into(), (address,))
            .await?;
        Ok(())
    }

    /// Rebuilds the fork from its configured source, or in place when no
    /// source is configured.
    pub async fn reset(&self) -> SimulationResult<()> {
        let params = match &self.fork_source {
            Some(source) => {
                let mut forking = serde_json::json!({ "jsonRpcUrl": source.url });
                if let Some(block) = source.block {
                    forking["blockNumber"] = block.into();
                }
                serde_json::json!([{ "forking": forking }])
            }
            None => serde_json::json!([]),
        };
        let _: serde_json::Value = self.provider.raw_request("anvil_reset".into(), params).await?;
        warn!("fork was reset");
        Ok(())
    }

    /// Current gas price, preferring the live upstream chain over the fork's
    /// possibly stale view.
    pub async fn gas_price(&self) -> SimulationResult<u128> {
        if let Some(upstream) = &self.upstream {
            match upstream.get_gas_price().await {
                Ok(price) => return Ok(price),
                Err(error) => {
                    warn!(%error, "live fee data unavailable, using fork fee data")
                }
            }
        }
        Ok(self.provider.get_gas_price().await?)
    }

    /// Submits a transaction signed by the fork on behalf of the (usually
    /// impersonated) `from` address.
    pub async fn send_as_sender(&self, tx: &TransactionRequest) -> SimulationResult<B256> {
        let hash: B256 = self
            .provider
            .raw_request("eth_sendTransaction".into(), (tx,))
            .await?;
        Ok(hash)
    }

    pub async fn wait_for_receipt(&self, hash: B256) -> SimulationResult<TransactionReceipt> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.provider.get_transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(SimulationError::MissingReceipt(format!("{hash:#x}")))
    }

    pub async fn is_connected(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }

    pub async fn chain(&self) -> String {
        match self.provider.get_chain_id().await {
            Ok(id) => format!("evm-{id}"),
            Err(_) => "unreachable".to_string(),
        }
    }
}
