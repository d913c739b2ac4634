// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use crate::auth::AdminTokenVerifier;
use crate::credits::CreditProcessor;
use crate::gate::AccessGate;
use crate::keys::KeyRegistry;
use crate::ledger::Ledger;

/// Shared application state, constructed once in `main` and handed to the
/// router. Core components are wired here and nowhere else; no module
/// holds its own globals.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub registry: Arc<KeyRegistry>,
    pub credits: Arc<CreditProcessor>,
    pub ledger: Ledger,
    /// Admin token verifier; `None` disables the admin API.
    pub admin: Option<Arc<AdminTokenVerifier>>,
    /// Credits debited per accepted generation.
    pub generation_cost: i64,
}

impl AppState {
    pub fn new(
        gate: Arc<AccessGate>,
        registry: Arc<KeyRegistry>,
        credits: Arc<CreditProcessor>,
        ledger: Ledger,
        admin: Option<Arc<AdminTokenVerifier>>,
        generation_cost: i64,
    ) -> Self {
        Self {
            gate,
            registry,
            credits,
            ledger,
            admin,
            generation_cost,
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::credits::CreditRate;
    use crate::keys::InMemoryKeyStore;
    use crate::ledger::InMemoryLedgerStore;
    use crate::ratelimit::RateLimiter;

    /// In-memory state with the default policies and an admin token of
    /// `"test-admin-token"`.
    pub fn test_state() -> AppState {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            "test-secret",
        ));
        let limiter = Arc::new(RateLimiter::new());
        let gate = Arc::new(AccessGate::new(Arc::clone(&registry), limiter));
        let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()));
        let credits = Arc::new(CreditProcessor::new(
            ledger.clone(),
            CreditRate::new(100, 100).expect("static rate"),
        ));

        AppState::new(
            gate,
            registry,
            credits,
            ledger,
            Some(Arc::new(AdminTokenVerifier::new("test-admin-token"))),
            1,
        )
    }
}
