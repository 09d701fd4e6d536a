//! MCP (Model Context Protocol) server implementation.
//!
//! This module exposes the SemaphoreUI operations to MCP clients.

#[cfg(feature = "mcp")]
pub mod semaphore_server;

#[cfg(feature = "mcp")]
pub use semaphore_server::SemaphoreServer;

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Drive `session` until it ends or `interrupt` resolves, then cancel
/// `shutdown` so in-flight monitoring stops.
///
/// Returns the session's output, or `None` when interrupted first.
pub async fn run_until_interrupted<S, I>(
    session: S,
    interrupt: I,
    shutdown: &CancellationToken,
) -> Option<S::Output>
where
    S: Future,
    I: Future,
{
    let outcome = tokio::select! {
        output = session => Some(output),
        _ = interrupt => {
            tracing::info!("interrupted, shutting down");
            None
        }
    };
    shutdown.cancel();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();
        let session = std::future::pending::<()>();
        let interrupt = tokio::time::sleep(Duration::from_secs(1));

        let outcome = run_until_interrupted(session, interrupt, &shutdown).await;

        assert!(outcome.is_none());
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_finished_session_also_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();

        let outcome =
            run_until_interrupted(async { 7 }, std::future::pending::<()>(), &shutdown).await;

        assert_eq!(outcome, Some(7));
        assert!(shutdown.is_cancelled());
    }
}
