use serde_json::Value;

use quotehub_types::BrokerError;

/// Boundary to the WebSocket gateway that owns client connections.
///
/// The subscription manager never retains a gateway; callers pass one per
/// broadcast, which keeps the ownership graph acyclic.
pub trait Gateway: Send + Sync {
    /// Whether the gateway can currently deliver pushes.
    fn is_available(&self) -> bool;

    /// Push `payload` as `event` to every client in `room`.
    ///
    /// Returns `Ok(false)` when the gateway accepted the call but delivered
    /// nothing.
    ///
    /// # Errors
    /// Transport-level failures.
    fn broadcast_to_room(
        &self,
        room: &str,
        event: &str,
        payload: &Value,
    ) -> Result<bool, BrokerError>;
}
