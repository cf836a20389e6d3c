//! Property-based tests for the session registry
//!
//! Random register/unregister traffic is replayed against a plain model; the
//! registry must agree with it on every outcome and every lookup.

use std::collections::BTreeSet;

use chatsec_core::{DisplayName, RegistryError, SessionId};
use chatsec_server::managers::{Connection, CredentialStore, SessionRegistry};
use proptest::prelude::*;
use tokio::sync::mpsc;

const POOL: &[&str] = &["alice", "bob", "carol", "dave", "erin", "frank"];

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..POOL.len()).prop_map(Op::Register),
        (0..POOL.len()).prop_map(Op::Unregister),
    ]
}

fn connection(id: u64) -> Connection {
    let (tx, _rx) = mpsc::channel(1);
    Connection::new(SessionId::new(id), tx)
}

proptest! {
    /// Property: names stay unique, capacity holds, and lookups follow the model
    #[test]
    fn registry_matches_model(max in 1usize..5, ops in prop::collection::vec(arb_op(), 0..100)) {
        let registry = SessionRegistry::new(max, CredentialStore::new());
        let mut model: BTreeSet<&str> = BTreeSet::new();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                Op::Register(index) => {
                    let name = POOL[index];
                    let result = registry.register(DisplayName::new(name).unwrap(), connection(i as u64));
                    if model.len() >= max {
                        let is_capacity_error = matches!(result, Err(RegistryError::CapacityExceeded { .. }));
                        prop_assert!(is_capacity_error);
                    } else if model.contains(name) {
                        let is_name_error = matches!(result, Err(RegistryError::NameInUse { .. }));
                        prop_assert!(is_name_error);
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(name);
                    }
                }
                Op::Unregister(index) => {
                    let name = POOL[index];
                    let departed = registry.unregister(name);
                    prop_assert_eq!(departed.is_some(), model.remove(name));
                }
            }

            prop_assert_eq!(registry.len(), model.len());
            prop_assert!(registry.len() <= max);
            for name in POOL {
                prop_assert_eq!(registry.lookup(name).is_some(), model.contains(name));
            }
        }
    }

    /// Property: a name is free again once its session is gone
    #[test]
    fn name_reusable_after_unregister(index in 0..POOL.len()) {
        let registry = SessionRegistry::new(1, CredentialStore::new());
        let name = DisplayName::new(POOL[index]).unwrap();

        registry.register(name.clone(), connection(1)).unwrap();
        prop_assert!(registry.unregister(POOL[index]).is_some());
        prop_assert!(registry.lookup(POOL[index]).is_none());
        prop_assert!(registry.register(name, connection(2)).is_ok());
    }
}
