use alloy::primitives::U256;
use scale_value::Value;
use subxt::{dynamic, utils::AccountId32, OnlineClient, SubstrateConfig};
use tracing::warn;
use types::TokenMetadata;

use crate::snapshot::{BalanceSnapshot, NativeBalance, SnapshotMap};

use super::events::{composite_bytes, find_named, value_u128};

/// Captures native + tracked-asset balances for a set of accounts. Read
/// failures degrade to zero balances with a warning so diffing stays total.
pub async fn capture(
    client: &OnlineClient<SubstrateConfig>,
    accounts: &[AccountId32],
    assets: &[u32],
) -> SnapshotMap {
    let mut map = SnapshotMap::new();
    for account in accounts {
        let mut snapshot = BalanceSnapshot::default();

        match read_native(client, account).await {
            Ok(native) => snapshot.native = native,
            Err(error) => {
                warn!(account = %account, %error, "native balance read failed, reporting zero")
            }
        }

        for asset in assets {
            let amount = match read_asset(client, *asset, account).await {
                Ok(amount) => amount,
                Err(error) => {
                    warn!(asset, account = %account, %error, "asset balance read failed, reporting zero");
                    U256::ZERO
                }
            };
            snapshot.fungibles.insert(asset.to_string(), amount);
        }

        map.insert(account.to_string(), snapshot);
    }
    map
}

async fn read_native(
    client: &OnlineClient<SubstrateConfig>,
    account: &AccountId32,
) -> Result<NativeBalance, subxt::Error> {
    let address = dynamic::storage("System", "Account", vec![Value::from_bytes(account.0)]);
    let storage = client.storage().at_latest().await?;
    let Some(thunk) = storage.fetch(&address).await? else {
        return Ok(NativeBalance::default());
    };
    let value = thunk.to_value()?;

    let field = |name: &str| {
        find_named(&value, name)
            .and_then(value_u128)
            .map(U256::from)
            .unwrap_or_default()
    };
    Ok(NativeBalance {
        free: field("free"),
        reserved: field("reserved"),
        // Older runtimes carry misc_frozen/fee_frozen instead; absent means
        // nothing is locked.
        frozen: field("frozen"),
    })
}

async fn read_asset(
    client: &OnlineClient<SubstrateConfig>,
    asset: u32,
    account: &AccountId32,
) -> Result<U256, subxt::Error> {
    let address = dynamic::storage(
        "Assets",
        "Account",
        vec![Value::u128(asset as u128), Value::from_bytes(account.0)],
    );
    let storage = client.storage().at_latest().await?;
    let Some(thunk) = storage.fetch(&address).await? else {
        return Ok(U256::ZERO);
    };
    let value = thunk.to_value()?;
    Ok(find_named(&value, "balance")
        .and_then(value_u128)
        .map(U256::from)
        .unwrap_or_default())
}

/// Symbol and decimals from the assets pallet, falling back to
/// `Asset#<id>` / 18 when the asset has no metadata.
pub async fn asset_metadata(client: &OnlineClient<SubstrateConfig>, asset: u32) -> TokenMetadata {
    let fallback = TokenMetadata {
        symbol: format!("Asset#{asset}"),
        decimals: 18,
    };

    let address = dynamic::storage("Assets", "Metadata", vec![Value::u128(asset as u128)]);
    let value = async {
        let storage = client.storage().at_latest().await?;
        let thunk = storage.fetch(&address).await?;
        Ok::<_, subxt::Error>(match thunk {
            Some(thunk) => Some(thunk.to_value()?),
            None => None,
        })
    }
    .await;

    let value = match value {
        Ok(Some(value)) => value,
        Ok(None) => return fallback,
        Err(error) => {
            warn!(asset, %error, "asset metadata read failed");
            return fallback;
        }
    };

    let symbol = find_named(&value, "symbol")
        .and_then(|symbol| match &symbol.value {
            scale_value::ValueDef::Composite(composite) => composite_bytes(composite),
            _ => None,
        })
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|symbol| !symbol.is_empty())
        .unwrap_or(fallback.symbol);
    let decimals = find_named(&value, "decimals")
        .and_then(value_u128)
        .and_then(|decimals| u8::try_from(decimals).ok())
        .unwrap_or(fallback.decimals);

    TokenMetadata { symbol, decimals }
}
