use std::collections::{HashMap, HashSet};

use alloy::primitives::{I256, U256};
use types::{AddressState, BalanceChange, StateImpactReport, TokenBalance, TokenMetadata};

use crate::snapshot::{BalanceSnapshot, SnapshotMap};

pub const NATIVE_TOKEN: &str = "native";

/// Everything the diff needs besides the two snapshot maps. Token metadata
/// is resolved by the engine up front so the builder stays pure.
pub struct ImpactContext<'a> {
    pub sender: &'a str,
    pub counterparty: Option<&'a str>,
    /// Account-model reports always carry a counterparty row; runtime-module
    /// reports only when it actually changed.
    pub counterparty_always: bool,
    pub native: &'a TokenMetadata,
    pub tokens: &'a HashMap<String, TokenMetadata>,
}

fn signed_delta(before: U256, after: U256) -> I256 {
    if after >= before {
        I256::from_raw(after - before)
    } else {
        -I256::from_raw(before - after)
    }
}

fn token_metadata<'a>(ctx: &'a ImpactContext<'_>, token: &str) -> TokenMetadata {
    ctx.tokens.get(token).cloned().unwrap_or(TokenMetadata {
        symbol: "UNKNOWN".to_string(),
        decimals: 18,
    })
}

fn address_state(ctx: &ImpactContext<'_>, address: &str, before: &SnapshotMap, after: &SnapshotMap) -> AddressState {
    let empty = BalanceSnapshot::default();
    let b = before.get(address).unwrap_or(&empty);
    let a = after.get(address).unwrap_or(&empty);

    // Union of observed fungibles, keeping the BEFORE observation order.
    let mut tokens: Vec<String> = b.fungibles.keys().cloned().collect();
    for key in a.fungibles.keys() {
        if !tokens.iter().any(|t| t == key) {
            tokens.push(key.clone());
        }
    }

    let row = |token: &str, symbol: &str, decimals: u8, amount: U256| TokenBalance {
        token: token.to_string(),
        symbol: symbol.to_string(),
        decimals,
        amount,
    };

    let mut before_rows = vec![row(
        NATIVE_TOKEN,
        &ctx.native.symbol,
        ctx.native.decimals,
        b.native.total(),
    )];
    let mut after_rows = vec![row(
        NATIVE_TOKEN,
        &ctx.native.symbol,
        ctx.native.decimals,
        a.native.total(),
    )];

    let mut changes = Vec::new();
    let native_delta = signed_delta(b.native.total(), a.native.total());
    if !native_delta.is_zero() {
        changes.push(BalanceChange {
            token: NATIVE_TOKEN.to_string(),
            symbol: ctx.native.symbol.clone(),
            decimals: ctx.native.decimals,
            before: b.native.total(),
            after: a.native.total(),
            delta: native_delta,
        });
    }

    for token in &tokens {
        let meta = token_metadata(ctx, token);
        let before_amount = b.fungibles.get(token).copied().unwrap_or_default();
        let after_amount = a.fungibles.get(token).copied().unwrap_or_default();
        before_rows.push(row(token, &meta.symbol, meta.decimals, before_amount));
        after_rows.push(row(token, &meta.symbol, meta.decimals, after_amount));

        let delta = signed_delta(before_amount, after_amount);
        if !delta.is_zero() {
            changes.push(BalanceChange {
                token: token.clone(),
                symbol: meta.symbol,
                decimals: meta.decimals,
                before: before_amount,
                after: after_amount,
                delta,
            });
        }
    }

    AddressState {
        address: address.to_string(),
        before: before_rows,
        after: after_rows,
        changes,
    }
}

/// Diffs BEFORE and AFTER into the per-address report, partitioned into
/// sender / counterparty / other affected. Every address observed on either
/// side with at least one non-zero change is reported exactly once.
pub fn build_state_impact(
    ctx: &ImpactContext<'_>,
    before: &SnapshotMap,
    after: &SnapshotMap,
) -> StateImpactReport {
    let sender_state = address_state(ctx, ctx.sender, before, after);

    let counterparty = ctx.counterparty.and_then(|address| {
        let state = address_state(ctx, address, before, after);
        if ctx.counterparty_always || !state.changes.is_empty() {
            Some(state)
        } else {
            None
        }
    });

    let mut excluded: HashSet<&str> = HashSet::from([ctx.sender]);
    if let Some(address) = ctx.counterparty {
        excluded.insert(address);
    }

    let mut others: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|address| !excluded.contains(address.as_str()))
        .cloned()
        .collect();
    others.sort();
    others.dedup();

    let other_affected = others
        .iter()
        .map(|address| address_state(ctx, address, before, after))
        .filter(|state| !state.changes.is_empty())
        .collect();

    StateImpactReport {
        sender: sender_state,
        counterparty,
        other_affected,
    }
}

/// The report shape used on failure paths: sender (and, when the engine
/// always reports one, counterparty) with nothing observed.
pub fn empty_report(sender: &str, counterparty: Option<&str>) -> StateImpactReport {
    let blank = |address: &str| AddressState {
        address: address.to_string(),
        before: vec![],
        after: vec![],
        changes: vec![],
    };
    StateImpactReport {
        sender: blank(sender),
        counterparty: counterparty.map(blank),
        other_affected: vec![],
    }
}
