//! # Mentorly Runtime
//!
//! Executes the effect descriptions returned by reducers.
//!
//! The booking engine is request/response driven: an orchestrator loads a record,
//! reduces a command, commits the resulting change with a conditional write and only
//! then runs the effects. This crate provides the last step:
//!
//! - [`execute`] drives a batch of effects to completion and collects the feedback
//!   actions they produce.
//! - [`drive`] repeats that loop, feeding every feedback action back through the
//!   reducer until no work remains.
//!
//! Effects are executed exactly once. There is no retry layer here; a failing effect
//! reports its failure as a feedback action and the reducer decides what to log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use mentorly_core::effect::Effect;
use mentorly_core::reducer::Reducer;
use std::time::Instant;

use crate::metrics::EffectMetrics;

/// Upper bound on feedback rounds in [`drive`].
///
/// A reducer that keeps answering feedback with new effects is a bug; the loop stops
/// instead of spinning forever.
pub const MAX_FEEDBACK_ROUNDS: usize = 16;

/// Execute a batch of effects and collect every feedback action.
///
/// `Parallel` children run concurrently, `Sequential` children run in order and their
/// feedback keeps that order, `Delay` sleeps before yielding its action.
pub fn execute<A>(effects: Vec<Effect<A>>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    async move {
        let started = Instant::now();
        let mut feedback = Vec::new();
        for effect in effects {
            feedback.extend(execute_one(effect).await);
        }
        EffectMetrics::record_batch(started.elapsed());
        feedback
    }
    .boxed()
}

fn execute_one<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    async move {
        match effect {
            Effect::None => Vec::new(),
            Effect::Parallel(effects) => {
                EffectMetrics::record_execution("parallel");
                join_all(effects.into_iter().map(execute_one))
                    .await
                    .into_iter()
                    .flatten()
                    .collect()
            },
            Effect::Sequential(effects) => {
                EffectMetrics::record_execution("sequential");
                let mut feedback = Vec::new();
                for effect in effects {
                    feedback.extend(execute_one(effect).await);
                }
                feedback
            },
            Effect::Delay { duration, action } => {
                EffectMetrics::record_execution("delay");
                tokio::time::sleep(duration).await;
                vec![*action]
            },
            Effect::Future(fut) => {
                EffectMetrics::record_execution("future");
                fut.await.into_iter().collect()
            },
        }
    }
    .boxed()
}

/// Run effects and feed their results back through `reducer` until nothing is left.
///
/// Returns the number of feedback actions that were reduced.
pub async fn drive<R>(
    reducer: &R,
    state: &mut R::State,
    env: &R::Environment,
    effects: impl IntoIterator<Item = Effect<R::Action>>,
) -> usize
where
    R: Reducer + Sync,
    R::State: Send,
    R::Environment: Sync,
    R::Action: Send + 'static,
{
    let mut pending: Vec<Effect<R::Action>> =
        effects.into_iter().filter(|effect| !effect.is_noop()).collect();
    let mut reduced = 0;

    for round in 0..MAX_FEEDBACK_ROUNDS {
        if pending.is_empty() {
            return reduced;
        }
        tracing::trace!(round, effects = pending.len(), "Executing effect batch");
        let feedback = execute(std::mem::take(&mut pending)).await;
        for action in feedback {
            reduced += 1;
            pending.extend(
                reducer
                    .reduce(state, action, env)
                    .into_iter()
                    .filter(|effect| !effect.is_noop()),
            );
        }
    }

    if !pending.is_empty() {
        tracing::warn!(
            dropped = pending.len(),
            "Feedback loop exceeded {MAX_FEEDBACK_ROUNDS} rounds, dropping remaining effects"
        );
    }
    reduced
}
