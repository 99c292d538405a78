//! Error-handling policy evaluation: retry/ignore blocks consulted after a
//! failed backend invocation, with cancellation-aware backoff sleeps.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::unit::ErrorPolicy;

#[derive(Debug)]
enum CompiledPolicy {
    Retry {
        name: String,
        pattern: Regex,
        /// Total invocation attempts, the first one included.
        max_attempts: usize,
        backoff: Duration,
    },
    Ignore {
        name: String,
        pattern: Regex,
    },
}

/// What a matching policy asks the worker to do.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PolicyAction<'a> {
    Retry {
        name: &'a str,
        max_attempts: usize,
        backoff: Duration,
    },
    Ignore {
        name: &'a str,
    },
}

/// Compiled error policies for one unit; declaration order decides precedence.
#[derive(Debug)]
pub(crate) struct PolicyMatcher {
    policies: Vec<CompiledPolicy>,
}

impl PolicyMatcher {
    pub(crate) fn compile(policies: &[ErrorPolicy]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(policies.len());

        for policy in policies {
            compiled.push(match policy {
                ErrorPolicy::Retry {
                    name,
                    pattern,
                    max_attempts,
                    backoff,
                } => CompiledPolicy::Retry {
                    name: name.clone(),
                    pattern: Regex::new(pattern).with_context(|| {
                        format!("invalid pattern in retry block {name:?}")
                    })?,
                    max_attempts: *max_attempts,
                    backoff: *backoff,
                },
                ErrorPolicy::Ignore { name, pattern } => CompiledPolicy::Ignore {
                    name: name.clone(),
                    pattern: Regex::new(pattern).with_context(|| {
                        format!("invalid pattern in ignore block {name:?}")
                    })?,
                },
            });
        }

        Ok(Self { policies: compiled })
    }

    /// First policy whose pattern matches the failure text, if any.
    pub(crate) fn matching(&self, error_text: &str) -> Option<PolicyAction<'_>> {
        self.policies.iter().find_map(|policy| match policy {
            CompiledPolicy::Retry {
                name,
                pattern,
                max_attempts,
                backoff,
            } if pattern.is_match(error_text) => Some(PolicyAction::Retry {
                name,
                max_attempts: *max_attempts,
                backoff: *backoff,
            }),
            CompiledPolicy::Ignore { name, pattern } if pattern.is_match(error_text) => {
                Some(PolicyAction::Ignore { name })
            }
            _ => None,
        })
    }
}

/// Sleeps for `delay` unless the token is cancelled first.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(anyhow!("retry cancelled")),
        _ = sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policies() -> Vec<ErrorPolicy> {
        vec![
            ErrorPolicy::Retry {
                name: "transient-network".into(),
                pattern: "connection (reset|refused)".into(),
                max_attempts: 3,
                backoff: Duration::from_millis(5),
            },
            ErrorPolicy::Ignore {
                name: "known-noise".into(),
                pattern: "harmless warning".into(),
            },
        ]
    }

    #[test]
    fn first_matching_policy_wins() {
        let matcher = PolicyMatcher::compile(&policies()).unwrap();

        match matcher.matching("error: connection refused by peer") {
            Some(PolicyAction::Retry { name, max_attempts, .. }) => {
                assert_eq!(name, "transient-network");
                assert_eq!(max_attempts, 3);
            }
            other => panic!("expected retry action, got {other:?}"),
        }

        match matcher.matching("exit 1: harmless warning emitted") {
            Some(PolicyAction::Ignore { name }) => assert_eq!(name, "known-noise"),
            other => panic!("expected ignore action, got {other:?}"),
        }

        assert!(matcher.matching("something else entirely").is_none());
    }

    #[test]
    fn declaration_order_decides_precedence() {
        let matcher = PolicyMatcher::compile(&[
            ErrorPolicy::Ignore {
                name: "first".into(),
                pattern: "boom".into(),
            },
            ErrorPolicy::Retry {
                name: "second".into(),
                pattern: "boom".into(),
                max_attempts: 2,
                backoff: Duration::ZERO,
            },
        ])
        .unwrap();

        assert_eq!(
            matcher.matching("boom"),
            Some(PolicyAction::Ignore { name: "first" })
        );
    }

    #[test]
    fn invalid_pattern_is_a_compile_error() {
        let err = PolicyMatcher::compile(&[ErrorPolicy::Retry {
            name: "broken".into(),
            pattern: "(unclosed".into(),
            max_attempts: 1,
            backoff: Duration::ZERO,
        }])
        .unwrap_err();

        assert!(format!("{err}").contains("broken"));
    }

    #[tokio::test]
    async fn sleep_aborts_on_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let err = sleep_with_cancellation(Duration::from_secs(60), &token)
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("cancelled"));
    }

    #[tokio::test]
    async fn zero_delay_just_yields() {
        let token = CancellationToken::new();
        sleep_with_cancellation(Duration::ZERO, &token)
            .await
            .expect("zero delay should not fail");
    }
}
