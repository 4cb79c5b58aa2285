//! The event loop: the single writer of all shard state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::shard::Shard;
use crate::store::StoreInner;
use crate::task::{Dispatch, OpType, Task, Waiter};
use crate::{ShardResult, ShardState, StoreError, Trace};

impl StoreInner {
    /// Serialize all state transitions over the three inbound queues.
    ///
    /// Strict priority: completions of async work first, then loop-staged
    /// follow-ups, then external submissions. Draining completions before
    /// accepting new external work keeps the pending set bounded.
    pub(crate) async fn event_loop(
        self: Arc<Self>,
        mut completion_rx: mpsc::Receiver<Task>,
        mut internal_rx: mpsc::Receiver<Task>,
        mut external_rx: mpsc::Receiver<Task>,
    ) {
        debug!("event loop running");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("event loop stopping");
                    return;
                }
                Some(task) = completion_rx.recv() => self.handle_task(task).await,
                Some(task) = internal_rx.recv() => self.handle_task(task).await,
                Some(task) = external_rx.recv() => self.handle_task(task).await,
            }
        }
    }

    async fn handle_task(self: &Arc<Self>, task: Task) {
        let Task {
            op,
            shard,
            waiter,
            error,
        } = task;
        debug!(key = %shard.key, op = %op, state = %shard.state(), "handling task");

        match op {
            OpType::Register => self.handle_register(&shard, waiter).await,
            OpType::MakeAvailable => self.handle_make_available(&shard).await,
            OpType::Acquire => self.process_acquire(&shard, waiter).await,
            OpType::Release => self.handle_release(&shard).await,
            OpType::Fail => self.handle_fail(&shard, error).await,
            OpType::Recover => self.handle_recover(&shard, waiter).await,
            OpType::Destroy => self.handle_destroy(&shard, waiter).await,
            OpType::Gc => self.handle_gc(&shard, waiter).await,
        }
    }

    async fn handle_register(self: &Arc<Self>, shard: &Arc<Shard>, waiter: Waiter) {
        let state = shard.state();
        if state != ShardState::New {
            self.dispatch(
                waiter,
                ShardResult::err(
                    shard.key.clone(),
                    StoreError::IllegalTransition {
                        key: shard.key.clone(),
                        op: OpType::Register.as_str(),
                        state,
                    },
                ),
            )
            .await;
            return;
        }

        if shard.lazy {
            // Lazy registration acknowledges immediately; fetch and index
            // happen on the first acquire.
            let parked = {
                let mut inner = shard.lock();
                inner.state = ShardState::Available;
                std::mem::take(&mut inner.waiting_acquires)
            };
            self.persist(shard).await;
            self.send_trace(OpType::Register, shard).await;
            self.dispatch(waiter, ShardResult::ok(shard.key.clone())).await;
            for w in parked {
                self.process_acquire(shard, w).await;
            }
            return;
        }

        {
            let mut inner = shard.lock();
            inner.state = ShardState::Initializing;
            inner.pending_register = Some(waiter);
        }
        self.persist(shard).await;
        self.send_trace(OpType::Register, shard).await;
        self.spawn_initialize(Arc::clone(shard));
    }

    async fn handle_make_available(self: &Arc<Self>, shard: &Arc<Shard>) {
        let state = shard.state();
        if !matches!(state, ShardState::Initializing | ShardState::Recovering) {
            warn!(key = %shard.key, state = %state, "ignoring make-available in this state");
            return;
        }

        let (register, recover, parked) = {
            let mut inner = shard.lock();
            inner.state = ShardState::Available;
            inner.error = None;
            (
                inner.pending_register.take(),
                inner.pending_recover.take(),
                std::mem::take(&mut inner.waiting_acquires),
            )
        };
        self.persist(shard).await;
        self.send_trace(OpType::MakeAvailable, shard).await;

        if let Some(w) = register {
            self.dispatch(w, ShardResult::ok(shard.key.clone())).await;
        }
        if let Some(w) = recover {
            self.dispatch(w, ShardResult::ok(shard.key.clone())).await;
        }
        // Parked acquirers re-enter acquire handling now that the index is
        // in place.
        for w in parked {
            self.process_acquire(shard, w).await;
        }
    }

    /// Full acquire handling; also the re-entry point for parked acquirers.
    async fn process_acquire(self: &Arc<Self>, shard: &Arc<Shard>, waiter: Waiter) {
        let state = shard.state();
        match state {
            ShardState::Errored => {
                let message = shard
                    .info()
                    .error
                    .unwrap_or_else(|| "unknown error".to_string());
                self.dispatch(
                    waiter,
                    ShardResult::err(shard.key.clone(), StoreError::ShardErrored(message)),
                )
                .await;
            }

            // Not active yet; park until the shard becomes available.
            ShardState::New | ShardState::Initializing | ShardState::Recovering => {
                shard.lock().waiting_acquires.push(waiter);
            }

            ShardState::Destroying => {
                self.dispatch(
                    waiter,
                    ShardResult::err(
                        shard.key.clone(),
                        StoreError::ShardUnknown(shard.key.clone()),
                    ),
                )
                .await;
            }

            ShardState::Available | ShardState::Serving => {
                if shard.lazy && state == ShardState::Available {
                    // Deferred initialization: materialize the index on the
                    // first acquire.
                    match self.indices.stat_full_index(&shard.key).await {
                        Err(e) => {
                            let err = StoreError::from(e);
                            self.stage_internal(Task::fail(Arc::clone(shard), err.clone()));
                            self.dispatch(waiter, ShardResult::err(shard.key.clone(), err))
                                .await;
                            return;
                        }
                        Ok(stat) if !stat.exists => {
                            {
                                let mut inner = shard.lock();
                                inner.state = ShardState::Initializing;
                                inner.waiting_acquires.push(waiter);
                            }
                            self.persist(shard).await;
                            self.send_trace(OpType::Acquire, shard).await;
                            self.spawn_initialize(Arc::clone(shard));
                            return;
                        }
                        Ok(_) => {}
                    }
                }

                {
                    let mut inner = shard.lock();
                    inner.state = ShardState::Serving;
                    inner.refs += 1;
                }
                self.persist(shard).await;
                self.send_trace(OpType::Acquire, shard).await;
                self.spawn_acquire(Arc::clone(shard), waiter);
            }
        }
    }

    async fn handle_release(self: &Arc<Self>, shard: &Arc<Shard>) {
        {
            let mut inner = shard.lock();
            // Accessors can outlive a failure, so errored shards release too.
            if !matches!(inner.state, ShardState::Serving | ShardState::Errored)
                || inner.refs == 0
            {
                warn!(key = %shard.key, state = %inner.state, refs = inner.refs,
                    "ignoring illegal release");
                return;
            }
            inner.refs -= 1;
            if inner.refs == 0 && inner.state == ShardState::Serving {
                inner.state = ShardState::Available;
            }
        }
        self.persist(shard).await;
        self.send_trace(OpType::Release, shard).await;
    }

    async fn handle_fail(self: &Arc<Self>, shard: &Arc<Shard>, error: Option<StoreError>) {
        let err = error
            .unwrap_or_else(|| StoreError::InitializationFailed("unspecified failure".into()));
        if shard.state() == ShardState::Destroying {
            return;
        }

        let (register, recover, parked) = {
            let mut inner = shard.lock();
            inner.state = ShardState::Errored;
            inner.error = Some(err.to_string());
            (
                inner.pending_register.take(),
                inner.pending_recover.take(),
                std::mem::take(&mut inner.waiting_acquires),
            )
        };
        self.persist(shard).await;
        self.send_trace(OpType::Fail, shard).await;

        if let Some(w) = register {
            let reg_err = match &err {
                StoreError::InitializationFailed(_) => err.clone(),
                other => StoreError::InitializationFailed(other.to_string()),
            };
            self.dispatch(w, ShardResult::err(shard.key.clone(), reg_err))
                .await;
        }
        if let Some(w) = recover {
            self.dispatch(w, ShardResult::err(shard.key.clone(), err.clone()))
                .await;
        }
        for w in parked {
            self.dispatch(w, ShardResult::err(shard.key.clone(), err.clone()))
                .await;
        }

        self.notify_failure(shard, err).await;
    }

    async fn handle_recover(self: &Arc<Self>, shard: &Arc<Shard>, waiter: Waiter) {
        if shard.state() != ShardState::Errored {
            self.dispatch(
                waiter,
                ShardResult::err(
                    shard.key.clone(),
                    StoreError::NotInErroredState(shard.key.clone()),
                ),
            )
            .await;
            return;
        }

        {
            let mut inner = shard.lock();
            inner.state = ShardState::Recovering;
            inner.error = None;
            inner.pending_recover = Some(waiter);
        }
        self.persist(shard).await;
        self.send_trace(OpType::Recover, shard).await;
        self.spawn_recover(Arc::clone(shard));
    }

    async fn handle_destroy(self: &Arc<Self>, shard: &Arc<Shard>, waiter: Waiter) {
        let info = shard.info();
        if info.refs > 0 {
            self.dispatch(
                waiter,
                ShardResult::err(shard.key.clone(), StoreError::ShardInUse(shard.key.clone())),
            )
            .await;
            return;
        }

        shard.lock().state = ShardState::Destroying;
        // Persist the destroying marker so an interrupted destroy resumes on
        // restart.
        self.persist(shard).await;
        self.send_trace(OpType::Destroy, shard).await;

        self.shards.write().remove(&shard.key);

        let mut failure: Option<StoreError> = None;
        if let Err(e) = self.indices.drop_full_index(&shard.key).await {
            warn!(key = %shard.key, error = %e, "failed to drop index during destroy");
            failure = Some(StoreError::from(e));
        }
        if let Err(e) = shard.mount.delete_transient().await {
            warn!(key = %shard.key, error = %e, "failed to delete transient during destroy");
            failure.get_or_insert(StoreError::from(e));
        }
        if let Err(e) = self.store.delete(shard.key.as_str()).await {
            error!(key = %shard.key, error = %e, "failed to delete shard record during destroy");
            failure.get_or_insert(StoreError::from(e));
        }

        self.dispatch(
            waiter,
            ShardResult {
                key: shard.key.clone(),
                error: failure,
                accessor: None,
            },
        )
        .await;
    }

    async fn handle_gc(self: &Arc<Self>, shard: &Arc<Shard>, waiter: Waiter) {
        // Re-check immediately before deletion; shards that became busy
        // since the sweep was planned are skipped without touching disk.
        let info = shard.info();
        let reclaimable =
            matches!(info.state, ShardState::Available | ShardState::Errored) && info.refs == 0;
        if !reclaimable {
            self.dispatch(waiter, ShardResult::ok(shard.key.clone())).await;
            return;
        }

        let result = match shard.mount.delete_transient().await {
            Ok(()) => ShardResult::ok(shard.key.clone()),
            Err(e) => ShardResult::err(shard.key.clone(), StoreError::from(e)),
        };
        self.send_trace(OpType::Gc, shard).await;
        self.dispatch(waiter, result).await;
    }

    // ── loop-side plumbing ──────────────────────────────────────────────

    /// Stage a loop-generated follow-up without ever blocking the loop.
    fn stage_internal(self: &Arc<Self>, task: Task) {
        match self.internal_tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                let inner = Arc::clone(self);
                self.tracker.spawn(async move {
                    let _ = inner.queue_task(task, &inner.internal_tx).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Hand a result to the dispatcher feeding the waiter's sink.
    pub(crate) async fn dispatch(&self, waiter: Waiter, result: ShardResult) {
        if waiter.out.is_none() {
            return;
        }
        if self
            .dispatch_tx
            .send(Dispatch { waiter, result })
            .await
            .is_err()
        {
            debug!("dispatcher gone; dropping result");
        }
    }

    /// Notify the failure sink, if one is configured.
    async fn notify_failure(&self, shard: &Arc<Shard>, error: StoreError) {
        let (Some(tx), Some(sink)) = (&self.failure_tx, &self.failure_sink) else {
            return;
        };
        let dispatch = Dispatch {
            waiter: Waiter::new(sink.clone()),
            result: ShardResult::err(shard.key.clone(), error),
        };
        if tx.send(dispatch).await.is_err() {
            debug!("failure dispatcher gone; dropping notification");
        }
    }

    /// Write the shard's serialized record; every state mutation ends here.
    pub(crate) async fn persist(&self, shard: &Arc<Shard>) {
        let record = shard.persisted();
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(shard.key.as_str(), &bytes).await {
                    error!(key = %shard.key, error = %e, "failed to persist shard record");
                }
            }
            Err(e) => {
                error!(key = %shard.key, error = %e, "failed to serialize shard record");
            }
        }
    }

    /// Emit a trace for an accepted operation. Blocks the loop by design;
    /// the trace receiver must keep up.
    pub(crate) async fn send_trace(&self, op: OpType, shard: &Arc<Shard>) {
        if let Some(tx) = &self.trace_tx {
            let trace = Trace {
                key: shard.key.clone(),
                op,
                after: shard.info(),
            };
            if tx.send(trace).await.is_err() {
                debug!("trace receiver gone; dropping trace");
            }
        }
    }
}
