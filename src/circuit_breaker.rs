use failsafe::backoff::Exponential;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::futures::CircuitBreaker as _;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::future::Future;
use std::time::Duration;

use crate::errors::{AppError, ResultExt};

/// Circuit breaker type shared by every Postgres-backed store.
pub type DbCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for database operations to prevent cascading failures.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_db_circuit_breaker() -> DbCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Only infrastructure failures trip the breaker; constraint violations,
/// missing rows and lost races are ordinary answers.
fn is_infrastructure_failure(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Applies the per-call timeout and the circuit breaker to store calls.
#[derive(Clone)]
pub struct StoreGuard {
    breaker: DbCircuitBreaker,
    timeout: Duration,
}

impl StoreGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            breaker: create_db_circuit_breaker(),
            timeout,
        }
    }

    /// Runs `fut`, mapping a timeout or an open breaker to `Unavailable`.
    /// Database errors are labelled with `op`.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let guarded = self.breaker.call_with(is_infrastructure_failure, fut);
        match tokio::time::timeout(self.timeout, guarded).await {
            Err(_) => {
                tracing::warn!("{} timed out after {:?}", op, self.timeout);
                Err(AppError::Unavailable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
            Ok(Err(failsafe::Error::Rejected)) => {
                tracing::warn!("{} rejected: database circuit open", op);
                Err(AppError::Unavailable(format!(
                    "{} rejected: database circuit open",
                    op
                )))
            }
            Ok(Err(failsafe::Error::Inner(e))) => Err(e).context(op),
            Ok(Ok(value)) => Ok(value),
        }
    }
}
