//! # Async Mutations
//!
//! Wraps a pending node request together with the code that interprets
//! its result, and guarantees the caller gets exactly one
//! [`MutationOutcome`] no matter how the request ends.

use futures::future::BoxFuture;
use serenity::model::id::GuildId;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{InternalFault, NodeError};

/// Resultado final de una mutación asíncrona
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// El nodo aceptó el cambio
    Completed(T),
    /// El nodo falló, pero el manejador de error produjo una respuesta
    Handled(T),
    /// Fallo sin respuesta específica; se informa el error genérico
    InternalError,
}

impl<T> MutationOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, MutationOutcome::Completed(_))
    }

    pub fn into_inner(self) -> Option<T> {
        match self {
            MutationOutcome::Completed(value) | MutationOutcome::Handled(value) => Some(value),
            MutationOutcome::InternalError => None,
        }
    }
}

type SuccessHandler<R, T> = Box<dyn FnOnce(R) -> Result<T, InternalFault> + Send>;
type FailureHandler<T> = Box<dyn FnOnce(&NodeError) -> Option<T> + Send>;

/// Petición pendiente a un nodo más sus manejadores de éxito y error
pub struct AsyncMutation<R, T> {
    guild_id: GuildId,
    action: &'static str,
    pending: BoxFuture<'static, Result<R, NodeError>>,
    on_success: SuccessHandler<R, T>,
    on_failure: Option<FailureHandler<T>>,
}

impl<R, T> AsyncMutation<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    pub fn new<F, S>(guild_id: GuildId, action: &'static str, pending: F, on_success: S) -> Self
    where
        F: Future<Output = Result<R, NodeError>> + Send + 'static,
        S: FnOnce(R) -> Result<T, InternalFault> + Send + 'static,
    {
        Self {
            guild_id,
            action,
            pending: Box::pin(pending),
            on_success: Box::new(on_success),
            on_failure: None,
        }
    }

    /// Manejador opcional para los fallos del nodo
    pub fn on_failure<H>(mut self, handler: H) -> Self
    where
        H: FnOnce(&NodeError) -> Option<T> + Send + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    /// Espera la petición y resuelve el resultado
    pub async fn outcome(self) -> MutationOutcome<T> {
        let Self {
            guild_id,
            action,
            pending,
            on_success,
            on_failure,
        } = self;

        match pending.await {
            Ok(response) => match on_success(response) {
                Ok(value) => {
                    debug!("✅ {} completado en {}", action, guild_id);
                    MutationOutcome::Completed(value)
                }
                Err(fault) => {
                    error!("❌ Error interno en {} ({}): {}", action, guild_id, fault);
                    MutationOutcome::InternalError
                }
            },
            Err(e) => {
                warn!("⚠️ {} falló en {}: {}", action, guild_id, e);
                match on_failure.and_then(|handler| handler(&e)) {
                    Some(value) => MutationOutcome::Handled(value),
                    None => MutationOutcome::InternalError,
                }
            }
        }
    }

    /// Resuelve en segundo plano y entrega el resultado por `slot`
    pub fn deliver(self, slot: oneshot::Sender<MutationOutcome<T>>) {
        tokio::spawn(async move {
            let outcome = self.outcome().await;
            let _ = slot.send(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(10)
    }

    #[tokio::test]
    async fn success_is_mapped_through_the_handler() {
        let mutation = AsyncMutation::new(guild(), "volume", async { Ok(40u16) }, |v| Ok(v * 2));

        assert_eq!(mutation.outcome().await, MutationOutcome::Completed(80));
    }

    #[tokio::test]
    async fn fault_in_success_handler_becomes_internal_error() {
        let mutation = AsyncMutation::new(guild(), "pause", async { Ok(()) }, |_| {
            Err::<String, _>(InternalFault::NoCurrentTrack)
        });

        assert_eq!(mutation.outcome().await, MutationOutcome::InternalError);
    }

    #[tokio::test]
    async fn failure_uses_the_handler_response() {
        let mutation = AsyncMutation::new(
            guild(),
            "stop",
            async { Err::<(), _>(NodeError::NoAvailableNodes) },
            |_| Ok("stopped"),
        )
        .on_failure(|e| matches!(e, NodeError::NoAvailableNodes).then_some("no node"));

        assert_eq!(mutation.outcome().await, MutationOutcome::Handled("no node"));
    }

    #[tokio::test]
    async fn failure_without_response_is_internal_error() {
        let declined = AsyncMutation::new(
            guild(),
            "stop",
            async { Err::<(), _>(NodeError::NoAvailableNodes) },
            |_| Ok(1),
        )
        .on_failure(|_| None);
        let unhandled = AsyncMutation::new(
            guild(),
            "stop",
            async { Err::<(), _>(NodeError::NoAvailableNodes) },
            |_| Ok(1),
        );

        assert_eq!(declined.outcome().await, MutationOutcome::InternalError);
        assert_eq!(unhandled.outcome().await, MutationOutcome::InternalError);
    }

    #[tokio::test]
    async fn deliver_sends_exactly_one_outcome() {
        let (slot, receiver) = oneshot::channel();

        AsyncMutation::new(guild(), "filter", async { Ok(5) }, Ok).deliver(slot);

        assert_eq!(receiver.await, Ok(MutationOutcome::Completed(5)));
    }
}
