use alloy::primitives::U256;

use crate::types::{AddressEvent, SubscriptionFilters};

/// Filter semantics from the spec: empty `contract_types` accepts everything,
/// zero bounds mean "no bound", `only_success` drops failed transactions.
pub fn matches(filters: &SubscriptionFilters, event: &AddressEvent) -> bool {
    if filters.only_success && !event.success {
        return false;
    }
    if !filters.contract_types.is_empty() && !filters.contract_types.contains(&event.contract_type) {
        return false;
    }

    let amount = parse_u256(&event.amount);
    let min = parse_u256(&filters.min_amount);
    let max = parse_u256(&filters.max_amount);

    if !min.is_zero() && amount < min {
        return false;
    }
    if !max.is_zero() && amount > max {
        return false;
    }
    true
}

fn parse_u256(s: &str) -> U256 {
    U256::from_str_radix(s, 10).unwrap_or(U256::ZERO)
}
