use std::sync::Arc;

use quotehub_types::{BrokerError, Capability, Market};

use crate::connector::ProviderConnector;

/// Capability catalogue over the registered provider connectors.
///
/// Selection is deterministic: eligible connectors are filtered on
/// capability support and market coverage, then ordered by priority with
/// registration order as the tie-break.
pub struct ProviderRegistry {
    connectors: Vec<Arc<dyn ProviderConnector>>,
}

impl ProviderRegistry {
    /// Build a registry over the given connectors. Registration order is
    /// the final tie-break during selection.
    #[must_use]
    pub fn new(connectors: Vec<Arc<dyn ProviderConnector>>) -> Self {
        Self { connectors }
    }

    /// All registered connectors, registration order preserved.
    #[must_use]
    pub fn all(&self) -> &[Arc<dyn ProviderConnector>] {
        &self.connectors
    }

    /// Look up a connector by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderConnector>> {
        self.connectors.iter().find(|c| c.name() == name).cloned()
    }

    /// Best provider for `(capability, market)`.
    ///
    /// `Mixed` and `Unknown` markets relax the market filter: any connector
    /// supporting the capability is eligible.
    #[must_use]
    pub fn best_for(
        &self,
        capability: Capability,
        market: Market,
    ) -> Option<Arc<dyn ProviderConnector>> {
        let mut eligible: Vec<(usize, &Arc<dyn ProviderConnector>)> = self
            .connectors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.supports(capability))
            .filter(|(_, c)| !market.has_calendar() || c.supports_market(market))
            .collect();
        eligible.sort_by_key(|(idx, c)| (c.priority(), *idx));
        eligible.first().map(|(_, c)| Arc::clone(c))
    }

    /// Resolve a named provider and verify it supports the capability.
    ///
    /// # Errors
    /// `NotFound` when the provider is unknown or lacks the capability.
    pub fn require(
        &self,
        name: &str,
        capability: Capability,
    ) -> Result<Arc<dyn ProviderConnector>, BrokerError> {
        let connector = self
            .get(name)
            .ok_or_else(|| BrokerError::not_found(format!("provider {name}")))?;
        if !connector.supports(capability) {
            return Err(BrokerError::not_found(format!(
                "provider {name} does not support {capability}"
            )));
        }
        Ok(connector)
    }

    /// Select a provider for a request: the preferred provider when given
    /// (verified), otherwise the best match for `(capability, market)`.
    ///
    /// # Errors
    /// `NotFound` when nothing can serve the capability for the market.
    pub fn select(
        &self,
        capability: Capability,
        market: Market,
        preferred: Option<&str>,
    ) -> Result<Arc<dyn ProviderConnector>, BrokerError> {
        match preferred {
            Some(name) => self.require(name, capability),
            None => self.best_for(capability, market).ok_or_else(|| {
                BrokerError::not_found(format!("no provider for {capability} in {market}"))
            }),
        }
    }
}
