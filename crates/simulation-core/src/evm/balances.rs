use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    sol,
};
use tracing::warn;
use types::TokenMetadata;

use crate::snapshot::{BalanceSnapshot, NativeBalance, SnapshotMap};

use super::backend::EvmFork;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
    }
}

/// Captures native + tracked-token balances for a set of addresses. A
/// failed read never aborts the capture: the address is reported with a
/// zero balance so the diff downstream stays total.
pub async fn capture(fork: &EvmFork, addresses: &[Address], tokens: &[Address]) -> SnapshotMap {
    let mut map = SnapshotMap::new();
    for address in addresses {
        let mut snapshot = BalanceSnapshot::default();

        match fork.provider().get_balance(*address).await {
            Ok(balance) => snapshot.native = NativeBalance::single(balance),
            Err(error) => {
                warn!(address = %address, %error, "native balance read failed, reporting zero")
            }
        }

        for token in tokens {
            let erc20 = IERC20::new(*token, fork.provider().clone());
            let balance = match erc20.balanceOf(*address).call().await {
                Ok(balance) => balance,
                Err(error) => {
                    warn!(token = %token, address = %address, %error, "token balance read failed, reporting zero");
                    U256::ZERO
                }
            };
            snapshot.fungibles.insert(format!("{token:#x}"), balance);
        }

        map.insert(format!("{address:#x}"), snapshot);
    }
    map
}

/// Reads symbol/decimals from the token contract, falling back to
/// `UNKNOWN` / 18 when the contract does not answer.
pub async fn token_metadata(fork: &EvmFork, token: Address) -> TokenMetadata {
    let erc20 = IERC20::new(token, fork.provider().clone());

    let symbol = match erc20.symbol().call().await {
        Ok(symbol) => symbol,
        Err(error) => {
            warn!(token = %token, %error, "token symbol read failed");
            "UNKNOWN".to_string()
        }
    };
    let decimals = match erc20.decimals().call().await {
        Ok(decimals) => decimals,
        Err(error) => {
            warn!(token = %token, %error, "token decimals read failed");
            18
        }
    };

    TokenMetadata { symbol, decimals }
}
