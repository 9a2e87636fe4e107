//! Signer assignment registry.
//!
//! Maps an account to the backend that owns its key. Populated by the key
//! import flow, read by the coordinator on every signature.

use alloy::primitives::Address;
use dashmap::DashMap;

use crate::signing::{SignerKind, SigningError, SigningResult};

#[derive(Debug, Default)]
pub struct SignerRegistry {
    assignments: DashMap<Address, SignerKind>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which backend owns `address`.
    ///
    /// Assigning the same backend twice is a no-op. Assigning a different
    /// backend fails; use [`reimport`](Self::reimport) for that.
    pub fn assign(&self, address: Address, kind: SignerKind) -> SigningResult<()> {
        match self.assignments.entry(address) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let existing = *entry.get();
                if existing == kind {
                    Ok(())
                } else {
                    Err(SigningError::AssignmentConflict { address, existing })
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(kind);
                tracing::info!(%address, backend = %kind, "Signer assigned");
                Ok(())
            }
        }
    }

    /// Replace the assignment for `address`, returning the previous backend.
    pub fn reimport(&self, address: Address, kind: SignerKind) -> Option<SignerKind> {
        let previous = self.assignments.insert(address, kind);
        if let Some(previous) = previous {
            if previous != kind {
                tracing::warn!(
                    %address,
                    from = %previous,
                    to = %kind,
                    "Signer assignment replaced"
                );
            }
        }
        previous
    }

    pub fn get(&self, address: &Address) -> Option<SignerKind> {
        self.assignments.get(address).map(|r| *r.value())
    }

    pub fn remove(&self, address: &Address) -> Option<SignerKind> {
        self.assignments.remove(address).map(|(_, kind)| kind)
    }

    pub fn all(&self) -> Vec<(Address, SignerKind)> {
        let mut all: Vec<_> = self
            .assignments
            .iter()
            .map(|r| (*r.key(), *r.value()))
            .collect();
        all.sort_by_key(|(address, _)| *address);
        all
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_sticky() {
        let registry = SignerRegistry::new();
        let account = Address::repeat_byte(7);
        registry.assign(account, SignerKind::Software).unwrap();
        registry.assign(account, SignerKind::Software).unwrap();

        let err = registry.assign(account, SignerKind::Hardware).unwrap_err();
        assert_eq!(
            err,
            SigningError::AssignmentConflict {
                address: account,
                existing: SignerKind::Software
            }
        );
        assert_eq!(registry.get(&account), Some(SignerKind::Software));
    }

    #[test]
    fn test_reimport_replaces() {
        let registry = SignerRegistry::new();
        let account = Address::repeat_byte(7);
        assert_eq!(registry.reimport(account, SignerKind::Hardware), None);
        assert_eq!(
            registry.reimport(account, SignerKind::Software),
            Some(SignerKind::Hardware)
        );
        assert_eq!(registry.get(&account), Some(SignerKind::Software));
        assert_eq!(registry.len(), 1);
    }
}
