use std::collections::{BTreeMap, HashSet};

use bigdecimal::Zero;
use tracing::{debug, warn};

use crate::model::SharePosition;

/// Which upstream feed surfaced a position change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Position,
    Staking,
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub origin: Origin,
    pub position: SharePosition,
}

impl Observation {
    pub fn new(origin: Origin, position: SharePosition) -> Self {
        Self { origin, position }
    }
}

/// Reconciles the two halves of one liquidity change seen by both feeds.
///
/// Observations collide on `(user, pool, block)`. A lone observation passes
/// through. A position/staking pair becomes one record with the summed
/// balance on top of the position feed's pool state, unless either side is
/// zero, which marks a plain move into or out of staking and drops both.
/// Any other collision is skipped. Output is ordered by block.
pub fn merge_observations(observations: Vec<Observation>) -> Vec<SharePosition> {
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<(i64, String, String), Vec<Observation>> =
        BTreeMap::new();

    for observation in observations {
        let position = &observation.position;
        if !seen.insert((observation.origin == Origin::Staking, position.id.clone())) {
            debug!("duplicate observation {} ignored", position.id);
            continue;
        }
        let key = (
            position.block,
            position.user_address.clone(),
            position.pool_id.clone(),
        );
        groups.entry(key).or_default().push(observation);
    }

    let mut merged = Vec::with_capacity(groups.len());

    for ((block, user, pool), mut group) in groups {
        if group.len() == 1 {
            if let Some(observation) = group.pop() {
                merged.push(observation.position);
            }
            continue;
        }

        let position = group
            .iter()
            .position(|o| o.origin == Origin::Position);
        let staking = group.iter().position(|o| o.origin == Origin::Staking);

        let (Some(p), Some(s), 2) = (position, staking, group.len()) else {
            warn!(
                "skipping {} colliding observations, user: {}, pool: {}, block: {}",
                group.len(),
                user,
                pool,
                block
            );
            continue;
        };

        let stake = group[s].position.clone();
        let mut base = group.swap_remove(p).position;

        if base.liquidity_balance.is_zero() || stake.liquidity_balance.is_zero()
        {
            debug!(
                "dropping zero-balance transfer into staking, user: {}, pool: {}, block: {}",
                user, pool, block
            );
            continue;
        }

        base.liquidity_balance += stake.liquidity_balance;
        if base.staking_service.is_none() {
            base.staking_service = stake.staking_service;
        }
        if base.yield_token_price_usd.is_none() {
            base.yield_token_price_usd = stake.yield_token_price_usd;
        }
        if base.tx_hash.as_deref().map_or(true, str::is_empty) {
            base.tx_hash = stake.tx_hash;
            base.tx_cost_native = stake.tx_cost_native;
        }
        merged.push(base);
    }

    merged
}
