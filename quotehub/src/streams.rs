//! Streaming subscription surface: binds provider streams to the batching
//! pipeline and keeps the subscription index in sync.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use quotehub_core::connector::ProviderConnector;
use quotehub_core::{StreamHandle, infer_market};
use quotehub_types::validation::validate_symbols;
use quotehub_types::{BrokerError, Capability, StreamSubscribeRequest};

use crate::core::Broker;

/// One live provider stream feeding the batching pipeline.
pub(crate) struct StreamBinding {
    handle: StreamHandle,
    forwarder: JoinHandle<()>,
    pub(crate) symbols: std::collections::BTreeSet<String>,
}

impl StreamBinding {
    pub(crate) async fn stop(self) {
        self.handle.stop().await;
        self.forwarder.abort();
    }
}

impl Broker {
    /// Subscribe a client to streaming symbols.
    ///
    /// Registers the client in the subscription manager and (re)binds the
    /// provider stream so it covers every required symbol for the
    /// `(provider, capability)` pair.
    ///
    /// # Errors
    /// `Validation` for bad symbol lists or non-streaming capabilities,
    /// `NotFound` when no provider can serve the subscription, and provider
    /// errors from opening the stream.
    pub async fn subscribe_stream(
        &self,
        client_id: &str,
        req: &StreamSubscribeRequest,
    ) -> Result<(), BrokerError> {
        let warnings = validate_symbols(&req.symbols).into_result()?;
        for warning in warnings {
            debug!(target = "quotehub::streams", warning, "subscribe validation warning");
        }
        let capability = Capability::parse(req.ws_capability_type.trim()).ok_or_else(|| {
            BrokerError::not_found(format!("capability {}", req.ws_capability_type))
        })?;
        if !capability.is_streaming() {
            return Err(BrokerError::validation(format!(
                "{capability} is not a streaming capability"
            )));
        }

        let market = infer_market(&req.symbols);
        let provider =
            self.registry
                .select(capability, market, req.preferred_provider.as_deref())?;

        self.subscriptions
            .add(client_id, &req.symbols, capability, provider.name());
        self.ensure_stream_binding(&provider, capability).await
    }

    /// Remove symbols from a client's subscription and prune provider
    /// streams that no longer have subscribers.
    ///
    /// # Errors
    /// `NotFound` for an unknown capability identifier.
    pub async fn unsubscribe_stream(
        &self,
        client_id: &str,
        symbols: &[String],
        ws_capability_type: &str,
    ) -> Result<(), BrokerError> {
        let _capability = Capability::parse(ws_capability_type.trim()).ok_or_else(|| {
            BrokerError::not_found(format!("capability {ws_capability_type}"))
        })?;
        self.subscriptions.remove(client_id, Some(symbols));
        self.prune_bindings().await;
        Ok(())
    }

    /// Disconnect cleanup: drop the client entirely and prune unused
    /// bindings. Idempotent, and completes even when stream teardown
    /// misbehaves.
    pub async fn cleanup_client(&self, client_id: &str) {
        self.subscriptions.remove(client_id, None);
        self.prune_bindings().await;
    }

    async fn ensure_stream_binding(
        &self,
        provider: &Arc<dyn ProviderConnector>,
        capability: Capability,
    ) -> Result<(), BrokerError> {
        let required = self
            .subscriptions
            .all_required_symbols(Some(provider.name()), Some(capability));
        if required.is_empty() {
            return Ok(());
        }

        let key = (provider.name().to_string(), capability);
        let mut bindings = self.bindings.lock().await;
        if let Some(existing) = bindings.get(&key) {
            if existing.symbols.is_superset(&required) {
                return Ok(());
            }
            if let Some(stale) = bindings.remove(&key) {
                debug!(
                    target = "quotehub::streams",
                    provider = provider.name(),
                    %capability,
                    "rebinding provider stream with a wider symbol set"
                );
                stale.stop().await;
            }
        }

        let standard: Vec<String> = required.iter().cloned().collect();
        let prepared = self
            .symbols
            .transform_for_provider(provider, &standard)
            .await?;
        let streamer = provider.as_quote_streamer().ok_or_else(|| {
            BrokerError::not_found(format!(
                "provider {} cannot serve {capability}",
                provider.name()
            ))
        })?;
        let (handle, mut rx) = streamer.stream_quotes(&prepared.symbols, capability).await?;

        let pipeline = Arc::clone(&self.pipeline);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                pipeline.add_quote(event);
            }
        });

        bindings.insert(
            key,
            StreamBinding {
                handle,
                forwarder,
                symbols: required,
            },
        );
        Ok(())
    }

    /// Drop bindings whose `(provider, capability)` pair has no remaining
    /// subscribers. Teardown failures are logged, never raised.
    async fn prune_bindings(&self) {
        let mut bindings = self.bindings.lock().await;
        let keys: Vec<(String, Capability)> = bindings.keys().cloned().collect();
        for key in keys {
            let required = self
                .subscriptions
                .all_required_symbols(Some(&key.0), Some(key.1));
            if required.is_empty()
                && let Some(binding) = bindings.remove(&key)
            {
                debug!(
                    target = "quotehub::streams",
                    provider = %key.0,
                    capability = %key.1,
                    "last subscriber gone; stopping provider stream"
                );
                binding.stop().await;
            }
        }
    }
}
