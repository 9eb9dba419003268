//! One reconciliation cycle, end to end.
//!
//! `Pairing → Deciding → Applying → Committing → Done`, with `Failed`
//! reachable from every phase. A cycle holds the entity lock for its whole
//! duration; nested cycles for dependencies (variant parents, order line
//! products) descend a [`DependencyTrail`] before taking their own lock.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use ledgerbridge_api::{EntityKey, SyncError};
use opentelemetry::trace::TraceContextExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use super::conflict::{Action, Decision, Reason};
use super::context::SyncContext;
use super::items::ItemReconciler;
use super::orders::OrderReconciler;
use super::outcome::{CycleOutcome, CyclePhase};
use super::pairing::{ItemTarget, OrderTarget, PairSnapshot};
use crate::Result;
use crate::core::DependencyTrail;
use crate::core::locks::EntityGuard;

/// Entity-specific half of a cycle. The orchestrator owns sequencing,
/// locking, outcome recording and failure diagnostics.
#[async_trait]
pub trait Reconciler: Send + Sync {
    type Target: Send + Sync;
    type Pair: PairSnapshot + Send + Sync;

    fn lock_key(&self, target: &Self::Target) -> EntityKey;

    /// Key the cycle actually locks on. A linked local target resolves to its
    /// remote identity so local- and remote-triggered cycles of one pair
    /// share a mutex.
    async fn canonical_key(&self, target: &Self::Target) -> Result<EntityKey> {
        Ok(self.lock_key(target))
    }

    async fn pair(&self, target: &Self::Target) -> Result<Self::Pair>;

    /// Every key the paired entity is known by, so nested cycles can detect
    /// a dependency loop through either identity.
    fn aliases(&self, pair: &Self::Pair) -> Vec<EntityKey>;

    fn decide(&self, pair: &Self::Pair) -> Result<Decision>;

    async fn apply(
        &self,
        pair: &mut Self::Pair,
        action: Action,
        trail: &DependencyTrail,
    ) -> Result<()>;

    async fn commit(&self, pair: &Self::Pair) -> Result<()>;

    /// Runs after every successful cycle, including no-ops. Never fails the
    /// cycle; a returned note is attached to the outcome.
    async fn follow_up(&self, _pair: &mut Self::Pair) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<SyncContext>,
}

struct CycleState {
    phase: CyclePhase,
    action: Option<Action>,
    note: Option<String>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn sync_item(
        &self,
        target: ItemTarget,
        trail: DependencyTrail,
    ) -> BoxFuture<'_, Result<CycleOutcome>> {
        Box::pin(self.item_cycle(target, trail))
    }

    pub fn sync_order(
        &self,
        target: OrderTarget,
        trail: DependencyTrail,
    ) -> BoxFuture<'_, Result<CycleOutcome>> {
        Box::pin(self.order_cycle(target, trail))
    }

    #[tracing::instrument(name = "sync.cycle.item", skip_all, fields(entity = %target))]
    async fn item_cycle(&self, target: ItemTarget, trail: DependencyTrail) -> Result<CycleOutcome> {
        self.run_cycle(&ItemReconciler::new(self), &target, &trail)
            .await
    }

    #[tracing::instrument(name = "sync.cycle.order", skip_all, fields(entity = %target))]
    async fn order_cycle(
        &self,
        target: OrderTarget,
        trail: DependencyTrail,
    ) -> Result<CycleOutcome> {
        self.run_cycle(&OrderReconciler::new(self), &target, &trail)
            .await
    }

    async fn run_cycle<R: Reconciler>(
        &self,
        reconciler: &R,
        target: &R::Target,
        trail: &DependencyTrail,
    ) -> Result<CycleOutcome> {
        let entity = reconciler.lock_key(target);
        let started_at = Utc::now();
        let mut state = CycleState {
            phase: CyclePhase::Pairing,
            action: None,
            note: None,
        };
        let mut pair: Option<R::Pair> = None;

        let result = match trail.descend(&entity) {
            Ok(trail) => match self.lock(reconciler, target, &entity, trail).await {
                Ok((_guard, trail)) => {
                    self.drive(reconciler, target, trail, &mut state, &mut pair)
                        .await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let outcome = CycleOutcome {
            cycle_id: Uuid::new_v4(),
            entity: entity.clone(),
            action: state.action,
            phase: if result.is_ok() {
                CyclePhase::Done
            } else {
                CyclePhase::Failed
            },
            failed_in: result.is_err().then_some(state.phase),
            error: result.as_ref().err().cloned(),
            payment_note: state.note,
            started_at,
            finished_at: Utc::now(),
            trace_id: current_trace_id(),
        };
        self.ctx.outcomes.record(outcome.clone());

        match result {
            Ok(()) => {
                info!(
                    "[Orchestrator] {} done: {}",
                    entity,
                    state
                        .action
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                Ok(outcome)
            }
            Err(e) => {
                let limit = self.ctx.snapshot_limit();
                let (local, remote) = match &pair {
                    Some(pair) => (
                        truncate_snapshot(&pair.local_snapshot(), limit),
                        truncate_snapshot(&pair.remote_snapshot(), limit),
                    ),
                    None => ("<unpaired>".to_string(), "<unpaired>".to_string()),
                };
                error!(
                    "[Orchestrator] {} failed while {:?}: {}\n  local: {}\n  remote: {}",
                    entity, state.phase, e, local, remote
                );
                Err(e)
            }
        }
    }

    /// Takes the pair's lock. The key is resolved again once held, since a
    /// concurrent create may have linked the local record while we waited.
    async fn lock<R: Reconciler>(
        &self,
        reconciler: &R,
        target: &R::Target,
        entity: &EntityKey,
        trail: DependencyTrail,
    ) -> Result<(EntityGuard, DependencyTrail)> {
        let mut key = reconciler.canonical_key(target).await?;
        loop {
            // A nested cycle must not wait on a lock an outer cycle holds.
            let held = if &key == entity {
                trail.clone()
            } else {
                trail.descend(&key)?
            };
            let guard = self.ctx.locks.acquire(&key).await;
            let current = reconciler.canonical_key(target).await?;
            if current == key {
                return Ok((guard, held));
            }
            debug!("[Orchestrator] {} relinked to {} while waiting", entity, current);
            drop(guard);
            key = current;
        }
    }

    async fn drive<R: Reconciler>(
        &self,
        reconciler: &R,
        target: &R::Target,
        mut trail: DependencyTrail,
        state: &mut CycleState,
        slot: &mut Option<R::Pair>,
    ) -> Result<()> {
        state.phase = CyclePhase::Pairing;
        let pair = slot.insert(reconciler.pair(target).await?);
        for key in reconciler.aliases(pair) {
            trail.alias(key);
        }

        state.phase = CyclePhase::Deciding;
        let decision = reconciler.decide(pair)?;
        state.action = Some(decision.action);
        if decision.reason == Reason::Tie {
            warn!("[Orchestrator] local and remote modified at the same instant; leaving both untouched");
        }
        debug!(
            "[Orchestrator] decided {} ({:?})",
            decision.action, decision.reason
        );

        state.phase = CyclePhase::Applying;
        reconciler.apply(pair, decision.action, &trail).await?;

        if decision.action != Action::NoOp {
            state.phase = CyclePhase::Committing;
            reconciler.commit(pair).await?;
        }

        state.note = reconciler.follow_up(pair).await;
        state.phase = CyclePhase::Done;
        Ok(())
    }
}

/// Bounds a diagnostic snapshot to `limit` characters.
pub fn truncate_snapshot(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

fn current_trace_id() -> Option<String> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Error for a remote write that came back without the fields a commit needs.
pub(crate) fn missing_marker(entity: &str) -> SyncError {
    SyncError::reconciliation(format!(
        "Remote response for {} carries no date_modified",
        entity
    ))
}
