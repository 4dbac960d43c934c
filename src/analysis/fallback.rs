//! Payload reduction ladder.
//!
//! When a request fails in a way that looks like it was too big, the same
//! analysis is tried again with fewer images: all of them, then half, then
//! none. Failures that have nothing to do with size end the ladder at once.

use std::future::Future;
use tracing::{info, warn};

use super::classifier::{classify, mentions_capacity};
use super::error::{ErrorKind, Failure, ProviderError};
use super::progress::ProgressSink;

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackStrategy {
    pub label: &'static str,
    pub image_count: usize,
}

/// Strategies for `image_count` images, largest first. Rungs that would send
/// the same number of images as the previous one are dropped.
pub fn strategy_ladder(image_count: usize) -> Vec<FallbackStrategy> {
    let candidates = [
        FallbackStrategy {
            label: "all images",
            image_count,
        },
        FallbackStrategy {
            label: "half of the images",
            image_count: image_count / 2,
        },
        FallbackStrategy {
            label: "no images",
            image_count: 0,
        },
    ];

    let mut ladder: Vec<FallbackStrategy> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if ladder
            .last()
            .map_or(true, |prev| prev.image_count != candidate.image_count)
        {
            ladder.push(candidate);
        }
    }
    ladder
}

/// Whether a failure warrants trying a smaller payload.
pub fn is_capacity_failure(failure: &Failure) -> bool {
    if failure.kind().is_user_actionable() {
        return false;
    }
    matches!(failure.kind(), ErrorKind::ContextOverflow | ErrorKind::ServerError)
        || mentions_capacity(&failure.classification().detail)
}

/// Run `run_once` for each strategy until one succeeds.
///
/// Returns the result together with the strategy that produced it. Terminal
/// and non-capacity failures are returned immediately; when every strategy
/// fails on capacity, the last failure is returned.
pub async fn run_with_fallback<T, F, Fut>(
    strategies: &[FallbackStrategy],
    mut run_once: F,
    sink: &dyn ProgressSink,
) -> Result<(T, FallbackStrategy), Failure>
where
    F: FnMut(FallbackStrategy) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let mut last_failure = None;

    for (index, strategy) in strategies.iter().copied().enumerate() {
        if index > 0 {
            info!(
                "Retrying analysis with {} ({} images)",
                strategy.label, strategy.image_count
            );
            sink.stage(
                "Reducing payload",
                Some(format!("retrying with {}", strategy.label)),
                None,
            );
        }

        match run_once(strategy).await {
            Ok(value) => return Ok((value, strategy)),
            Err(failure) if !is_capacity_failure(&failure) => return Err(failure),
            Err(failure) => {
                warn!(
                    "Analysis with {} failed on capacity ({}): {}",
                    strategy.label,
                    failure.kind(),
                    failure.classification().detail
                );
                last_failure = Some(failure);
            }
        }
    }

    Err(last_failure.unwrap_or_else(|| {
        Failure::from(classify(&ProviderError::new(
            "No analysis strategy was available",
        )))
    }))
}
