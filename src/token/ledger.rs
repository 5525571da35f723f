//! Known permission state per token, owner and spender

use dashmap::DashMap;
use ethers::types::Address;

/// Permissions observed through accepted `permit` transactions or read
/// back from the token. Shared by every handle of a session.
#[derive(Debug, Default)]
pub struct PermissionLedger {
    /// (token, owner, spender) -> authorized
    entries: DashMap<(Address, Address, Address), bool>,
}

impl PermissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, token: Address, owner: Address, spender: Address, authorized: bool) {
        self.entries.insert((token, owner, spender), authorized);
    }

    /// `None` when nothing is known yet
    pub fn get(&self, token: Address, owner: Address, spender: Address) -> Option<bool> {
        self.entries.get(&(token, owner, spender)).map(|e| *e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_twice_leaves_one_entry() {
        let ledger = PermissionLedger::new();
        let (token, owner, spender) = (
            Address::from_low_u64_be(1),
            Address::from_low_u64_be(2),
            Address::from_low_u64_be(3),
        );
        assert_eq!(ledger.get(token, owner, spender), None);

        ledger.record(token, owner, spender, true);
        ledger.record(token, owner, spender, true);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(token, owner, spender), Some(true));

        ledger.record(token, owner, spender, false);
        assert_eq!(ledger.get(token, owner, spender), Some(false));
        assert_eq!(ledger.get(token, spender, owner), None);
    }
}
