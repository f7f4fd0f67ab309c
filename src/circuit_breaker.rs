use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Breaker type shared by every call to the AI provider.
pub type ProviderBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for AI provider calls.
///
/// - **Failure threshold**: 5 consecutive failures trips the breaker OPEN.
/// - **Backoff**: exponential, 10s up to 60s, before a HALF_OPEN probe is let through.
///
/// While OPEN, calls are rejected without touching the network, so enrichment
/// falls straight through to its defaults.
pub fn create_provider_circuit_breaker() -> ProviderBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
