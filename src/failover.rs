// 🔁 Failover Query Engine - Endpoints in order, bounded retries per endpoint
//
// For each endpoint: up to `max_retries_per_endpoint` oracle calls with a
// linear backoff between them. First success wins. `None` only when every
// endpoint has exhausted every attempt.

use crate::config::RetryPolicy;
use crate::oracle::{TrustlineEntry, TrustlineOracle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// SLEEPER
// ============================================================================

/// Blocking pause. Swapped out in tests so nothing waits on the wall clock.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct FailoverQueryEngine<O, S = ThreadSleeper> {
    endpoints: Vec<String>,
    policy: RetryPolicy,
    oracle: O,
    sleeper: S,
}

impl<O: TrustlineOracle, S: Sleeper> FailoverQueryEngine<O, S> {
    pub fn new(endpoints: Vec<String>, policy: RetryPolicy, oracle: O, sleeper: S) -> Self {
        FailoverQueryEngine {
            endpoints,
            policy,
            oracle,
            sleeper,
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Trustlines of `wallet` from the first endpoint that answers, or `None`
    /// (indeterminate) once every endpoint is exhausted.
    pub fn fetch_trustlines(&self, wallet: &str) -> Option<Vec<TrustlineEntry>> {
        let max_attempts = self.policy.max_retries_per_endpoint;

        for endpoint in &self.endpoints {
            info!(wallet, endpoint = %endpoint, "querying endpoint");

            for attempt in 1..=max_attempts {
                let backoff = self.policy.backoff_before(attempt);
                if !backoff.is_zero() {
                    self.sleeper.sleep(backoff);
                }

                match self.oracle.account_lines(endpoint, wallet) {
                    Ok(lines) => {
                        debug!(
                            wallet,
                            endpoint = %endpoint,
                            attempt,
                            lines = lines.len(),
                            "trustline query succeeded"
                        );
                        return Some(lines);
                    }
                    Err(err) => warn!(
                        wallet,
                        endpoint = %endpoint,
                        attempt,
                        max_attempts,
                        error = %err,
                        "trustline query failed"
                    ),
                }
            }

            warn!(
                wallet,
                endpoint = %endpoint,
                max_attempts,
                "endpoint exhausted all attempts, failing over"
            );
        }

        error!(wallet, endpoints = self.endpoints.len(), "all endpoints failed to return trustlines");
        None
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{self, RecordingSleeper, ScriptedOracle};
    use super::*;

    const E1: &str = "https://one.example/";
    const E2: &str = "https://two.example/";
    const E3: &str = "https://three.example/";

    fn engine(oracle: ScriptedOracle) -> (FailoverQueryEngine<ScriptedOracle, RecordingSleeper>, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let engine = FailoverQueryEngine::new(
            vec![E1.to_string(), E2.to_string(), E3.to_string()],
            RetryPolicy::default(),
            oracle,
            sleeper.clone(),
        );
        (engine, sleeper)
    }

    #[test]
    fn test_first_success_short_circuits() {
        let lines = vec![TrustlineEntry::new("rIssuer", "USD")];
        let (engine, sleeper) = engine(ScriptedOracle::new().always("rW", lines.clone()));

        assert_eq!(engine.fetch_trustlines("rW"), Some(lines));
        assert_eq!(engine.oracle().calls.borrow().len(), 1);
        assert!(sleeper.pauses.borrow().is_empty());
    }

    #[test]
    fn test_fails_over_to_second_endpoint() {
        let from_e2 = vec![TrustlineEntry::new("rIssuer", "USD")];
        let oracle = ScriptedOracle::new()
            .script(E1, "rW", vec![Err(()), Err(())])
            .script(E2, "rW", vec![Ok(from_e2.clone())]);
        let (engine, sleeper) = engine(oracle);

        assert_eq!(engine.fetch_trustlines("rW"), Some(from_e2));
        assert_eq!(engine.oracle().calls_to(E1), 2);
        assert_eq!(engine.oracle().calls_to(E2), 1);
        assert_eq!(engine.oracle().calls_to(E3), 0);

        // One backoff on E1 before its second attempt, none between endpoints.
        assert_eq!(*sleeper.pauses.borrow(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_retry_on_same_endpoint_recovers() {
        let lines = vec![TrustlineEntry::new("rIssuer", "USD")];
        let oracle = ScriptedOracle::new().script(E1, "rW", vec![Err(()), Ok(lines.clone())]);
        let (engine, _) = engine(oracle);

        assert_eq!(engine.fetch_trustlines("rW"), Some(lines));
        assert_eq!(engine.oracle().calls_to(E1), 2);
        assert_eq!(engine.oracle().calls_to(E2), 0);
    }

    #[test]
    fn test_indeterminate_only_after_every_attempt() {
        let (engine, sleeper) = engine(ScriptedOracle::new().unreachable("rW"));

        assert_eq!(engine.fetch_trustlines("rW"), None);
        assert_eq!(engine.oracle().calls_to(E1), 2);
        assert_eq!(engine.oracle().calls_to(E2), 2);
        assert_eq!(engine.oracle().calls_to(E3), 2);
        assert_eq!(sleeper.pauses.borrow().len(), 3);
    }

    #[test]
    fn test_backoff_grows_linearly_with_more_attempts() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_retries_per_endpoint: 4,
            ..RetryPolicy::default()
        };
        let engine = FailoverQueryEngine::new(
            vec![E1.to_string()],
            policy,
            ScriptedOracle::new().unreachable("rW"),
            sleeper.clone(),
        );

        assert_eq!(engine.fetch_trustlines("rW"), None);
        assert_eq!(
            *sleeper.pauses.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)]
        );
    }

    #[test]
    fn test_successful_attempt_is_logged() {
        let oracle = ScriptedOracle::new().script(E1, "rW", vec![Err(()), Ok(vec![])]);
        let (engine, _) = engine(oracle);

        let logs = testing::capture_logs(|| {
            engine.fetch_trustlines("rW");
        });

        assert!(logs.contains("trustline query failed"));
        assert!(logs.contains("trustline query succeeded"));
        assert!(logs.contains("attempt=2"));
        assert!(logs.contains(E1));
    }

    #[test]
    fn test_empty_list_is_a_success() {
        let (engine, _) = engine(ScriptedOracle::new().always("rW", vec![]));

        assert_eq!(engine.fetch_trustlines("rW"), Some(vec![]));
    }
}
