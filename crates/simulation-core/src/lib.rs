mod error;
mod format;
mod impact;
mod metadata;
mod snapshot;

pub mod evm;
pub mod substrate;

use std::sync::Arc;

use types::{BackendHealth, SimulateRequest, SimulationResponse};

pub use error::{SimulationError, SimulationResult};
pub use evm::{EvmEngine, EvmFork};
pub use substrate::{SubstrateEngine, SubstrateFork};

use metadata::MetadataCache;

/// Aggregated probe of both fork backends.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub ok: bool,
    pub evm: BackendHealth,
    pub substrate: BackendHealth,
}

/// Composition root owning one engine per fork backend. Requests are
/// discriminated by which payload they carry and routed to the matching
/// engine; everything else about a simulation is the engine's business.
pub struct SimulationService {
    evm: Arc<EvmEngine>,
    substrate: Arc<SubstrateEngine>,
}

impl SimulationService {
    pub async fn new(
        evm_config: configs::EvmConfig,
        substrate_config: configs::SubstrateConfig,
    ) -> SimulationResult<Self> {
        let metadata = Arc::new(MetadataCache::new());

        let evm_fork = EvmFork::connect(&evm_config).await?;
        let substrate_fork = SubstrateFork::connect(&substrate_config.endpoint).await?;

        Ok(Self {
            evm: Arc::new(EvmEngine::new(
                evm_fork,
                evm_config.native_symbol,
                metadata.clone(),
            )),
            substrate: Arc::new(SubstrateEngine::new(
                substrate_fork,
                substrate_config.native_symbol,
                metadata,
            )),
        })
    }

    /// Runs one simulation. Exactly one of `transaction` / `extrinsic` must
    /// be present in the request.
    pub async fn simulate(
        &self,
        request: &SimulateRequest,
    ) -> SimulationResult<SimulationResponse> {
        match (&request.transaction, &request.extrinsic) {
            (Some(_), Some(_)) => Err(SimulationError::InvalidRequest(
                "provide exactly one of transaction or extrinsic".to_string(),
            )),
            (None, None) => Err(SimulationError::InvalidRequest(
                "one of transaction or extrinsic is required".to_string(),
            )),
            (Some(_), None) => self.evm.simulate(request).await,
            (None, Some(_)) => self.substrate.simulate(request).await,
        }
    }

    pub async fn health(&self) -> ServiceHealth {
        let evm_up = self.evm.backend().is_connected().await;
        let substrate_up = self.substrate.backend().is_connected().await;

        ServiceHealth {
            ok: evm_up && substrate_up,
            evm: BackendHealth {
                status: if evm_up { "ok" } else { "unreachable" }.to_string(),
                chain: self.evm.backend().chain().await,
            },
            substrate: BackendHealth {
                status: if substrate_up { "ok" } else { "unreachable" }.to_string(),
                chain: self.substrate.backend().chain().to_string(),
            },
        }
    }
}
