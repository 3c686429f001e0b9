//! Sync engine state machine.

use crate::apply::{self, Outgoing};
use crate::config::{SyncConfig, SyncOptions};
use crate::error::{EngineResult, SyncError};
use crate::hooks::{HookRegistry, IncomingChanges, INCOMING_CHANGES};
use crate::remote::{RemoteApi, RequestOptions};
use crate::result::{RecordError, SyncResult};
use crate::server_info::ServerInfoCache;
use crate::transform::TransformPipeline;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tidemark_core::RecordStore;
use tidemark_storage::StorageAdapter;
use tidemark_sync_protocol::{
    status, BatchOperation, ChangesRequest, RemoteRecord, ServerInfo, Strategy,
};
use tracing::{debug, info, warn, Instrument};

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run has started yet, or a run is reading its watermark.
    Start,
    /// Checking remote capabilities and backoff.
    CheckMetadata,
    /// Fetching a page of remote changes.
    Pull,
    /// Applying a page of remote changes.
    Apply,
    /// Sending local changes.
    Push,
    /// Applying batch responses to local records.
    ReconcilePush,
    /// Confirming the remote collection timestamp.
    Settle,
    /// The last run completed.
    Done,
    /// The last run was aborted.
    Failed,
}

impl SyncState {
    /// Returns true while a run is moving data.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Start | SyncState::Done | SyncState::Failed)
    }

    /// Returns true if a new run would not have to wait for another one.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs finished, aborted ones included.
    pub runs: u64,
    /// Remote changes received.
    pub pulled: u64,
    /// Local changes accepted by the remote.
    pub pushed: u64,
    /// Conflicts reported.
    pub conflicts: u64,
    /// Error of the last run, if it was aborted.
    pub last_error: Option<String>,
    /// When the last run finished.
    pub last_run: Option<Instant>,
}

/// Mutable state of one run.
struct Run {
    options: SyncOptions,
    request: RequestOptions,
    phase: SyncState,
    result: SyncResult,
    watermark: Option<i64>,
    /// Oldest timestamp of an incoming record that failed.
    blocked: Option<i64>,
    /// No conflict or error so far during the pull.
    clean: bool,
    pulled: u64,
    /// Collection timestamp the next batch should find.
    push_expected: Option<i64>,
    /// Someone else wrote between our batches.
    foreign_writes: bool,
    latest_published: Option<i64>,
}

impl Run {
    fn new(options: SyncOptions) -> Self {
        let request = RequestOptions {
            headers: options.headers.clone(),
            remote: options.remote.clone(),
        };
        Self {
            options,
            request,
            phase: SyncState::Start,
            result: SyncResult::new(),
            watermark: None,
            blocked: None,
            clean: true,
            pulled: 0,
            push_expected: None,
            foreign_writes: false,
            latest_published: None,
        }
    }
}

/// Synchronizes one [`RecordStore`] collection with a remote.
///
/// A run goes through check metadata, pull, apply (per page), push,
/// reconcile and settle. Every phase that writes does so in its own storage
/// transaction, so an aborted run keeps what it committed and can be
/// started again.
pub struct SyncEngine<S, R> {
    store: RecordStore<S>,
    remote: Arc<R>,
    config: SyncConfig,
    pipeline: TransformPipeline,
    hooks: HookRegistry,
    server_info: Arc<ServerInfoCache>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    run_lock: tokio::sync::Mutex<()>,
}

impl<S: StorageAdapter, R: RemoteApi> SyncEngine<S, R> {
    /// Creates an engine with no transformers, no hooks and a private
    /// server info cache.
    pub fn new(store: RecordStore<S>, remote: Arc<R>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            pipeline: TransformPipeline::new(),
            hooks: HookRegistry::new(),
            server_info: Arc::new(ServerInfoCache::new()),
            state: RwLock::new(SyncState::Start),
            stats: RwLock::new(SyncStats::default()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the transform pipeline.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Shares a server info cache with other engines.
    #[must_use]
    pub fn with_server_info_cache(mut self, cache: Arc<ServerInfoCache>) -> Self {
        self.server_info = cache;
        self
    }

    /// The synchronized store.
    pub fn store(&self) -> &RecordStore<S> {
        &self.store
    }

    /// The remote.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The server info cache.
    pub fn server_info_cache(&self) -> &Arc<ServerInfoCache> {
        &self.server_info
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs one sync.
    ///
    /// Never returns an error: an aborted run is reported through
    /// [`SyncResult::failure`] with `ok = false`, alongside everything that
    /// was committed before the abort.
    pub async fn sync(&self, options: SyncOptions) -> SyncResult {
        let span = tracing::info_span!("sync", collection = %self.store.name());
        self.run(options).instrument(span).await
    }

    async fn run(&self, options: SyncOptions) -> SyncResult {
        let _serialized = if self.config.serialize_runs {
            Some(self.run_lock.lock().await)
        } else {
            None
        };

        let mut run = Run::new(options);
        match self.phases(&mut run).await {
            Ok(()) => self.enter(&mut run, SyncState::Done),
            Err(error) => {
                warn!(phase = ?run.phase, error = %error, "sync aborted");
                let phase = run.phase;
                run.result.fail(phase, error);
                self.enter(&mut run, SyncState::Failed);
            }
        }

        let last_modified = match self.store.last_modified() {
            Ok(last_modified) => last_modified,
            Err(e) => {
                warn!(error = %e, "failed to read watermark");
                run.watermark
            }
        };
        let mut result = run.result;
        result.finish(last_modified);

        {
            let mut stats = self.stats.write();
            stats.runs += 1;
            stats.pulled += run.pulled;
            stats.pushed += result.published.len() as u64;
            stats.conflicts += result.conflicts.len() as u64;
            stats.last_error = result.failure.as_ref().map(|f| f.error.to_string());
            stats.last_run = Some(Instant::now());
        }

        info!(
            ok = result.ok,
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            published = result.published.len(),
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            last_modified = ?result.last_modified,
            "sync finished"
        );
        result
    }

    async fn phases(&self, run: &mut Run) -> EngineResult<()> {
        self.enter(run, SyncState::Start);
        run.watermark = self.store.last_modified()?;

        self.enter(run, SyncState::CheckMetadata);
        let info = self.check_metadata(run).await?;

        self.pull(run).await?;
        self.push(run, &info).await?;

        self.enter(run, SyncState::Settle);
        self.settle(run).await
    }

    fn enter(&self, run: &mut Run, state: SyncState) {
        run.phase = state;
        *self.state.write() = state;
        debug!(phase = ?state, "entering phase");
    }

    /// Awaits a remote call under the configured timeout.
    async fn call<T>(&self, request: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| SyncError::Timeout)?,
            None => request.await,
        }
    }

    async fn check_metadata(&self, run: &Run) -> EngineResult<ServerInfo> {
        if !run.options.ignore_backoff {
            if let Some(delay) = self.remote.backoff() {
                return Err(SyncError::Backoff {
                    seconds: delay.as_secs(),
                });
            }
        }

        let endpoint = run
            .options
            .remote
            .clone()
            .unwrap_or_else(|| self.remote.endpoint());
        let info = self
            .server_info
            .get_or_fetch(&endpoint, || {
                self.call(self.remote.fetch_server_info(&run.request))
            })
            .await?;

        if !info.supports(self.config.protocol_version) {
            self.server_info.invalidate(&endpoint);
            return Err(SyncError::ProtocolMismatch {
                local: self.config.protocol_version,
                remote: info.protocol_version,
            });
        }
        debug!(
            endpoint = %endpoint,
            batch_max_requests = info.batch_max_requests,
            "remote capabilities"
        );
        Ok(info)
    }

    async fn pull(&self, run: &mut Run) -> EngineResult<()> {
        let first = ChangesRequest::since(run.watermark)
            .with_limit(self.config.page_size)
            .with_expected(run.options.expected_timestamp);
        let mut request = first.clone();
        let mut anchor: Option<i64> = None;

        loop {
            self.enter(run, SyncState::Pull);
            let fetched = self
                .call(self.remote.fetch_changes(&request, &run.request))
                .await;
            let page = match (fetched, anchor) {
                (
                    Err(SyncError::Remote {
                        status: status::PRECONDITION_FAILED,
                        ..
                    }),
                    Some(anchor),
                ) => return Err(SyncError::PaginationAborted { anchor }),
                (fetched, _) => fetched?,
            };

            let anchor_ts = match anchor {
                Some(anchor) => anchor,
                None => {
                    if let Some(since) = run.watermark {
                        if page.timestamp < since {
                            return Err(SyncError::ServerFlushed {
                                local: since,
                                remote: page.timestamp,
                            });
                        }
                    }
                    anchor = Some(page.timestamp);
                    page.timestamp
                }
            };
            debug!(
                records = page.data.len(),
                timestamp = page.timestamp,
                more = page.next.is_some(),
                "received page"
            );
            run.pulled += page.data.len() as u64;

            self.enter(run, SyncState::Apply);
            self.apply_page(run, page.timestamp, page.data)?;

            match page.next {
                Some(cursor) => request = first.next_page(cursor, anchor_ts),
                None => break,
            }
        }

        // a clean pull has seen everything up to the anchor
        if let (true, Some(anchor)) = (run.clean, anchor) {
            run.watermark = Some(self.store.transaction(|txn| txn.advance_last_modified(anchor))?);
        }
        Ok(())
    }

    fn apply_page(&self, run: &mut Run, timestamp: i64, data: Vec<RemoteRecord>) -> EngineResult<()> {
        let mut decoded = Vec::with_capacity(data.len());
        for raw in data {
            let (id, ts) = (raw.id.clone(), raw.last_modified);
            match self.pipeline.decode(raw) {
                Ok(record) => decoded.push(record),
                Err(e) if e.is_record_level() => {
                    warn!(id = %id, error = %e, "failed to decode incoming record");
                    run.result.errors.push(RecordError::incoming(id, &e));
                    run.blocked = match (run.blocked, ts) {
                        (Some(b), Some(t)) => Some(b.min(t)),
                        (b, t) => b.or(t),
                    };
                    run.clean = false;
                }
                Err(e) => return Err(e),
            }
        }

        let changes = self
            .hooks
            .invoke(
                INCOMING_CHANGES,
                IncomingChanges {
                    last_modified: timestamp,
                    changes: decoded,
                },
            )?
            .changes;

        let strategy = run.options.strategy;
        let blocked = run.blocked;
        let outcome = self
            .store
            .transaction(|txn| apply::apply_changes(txn, changes, strategy, blocked))?;

        if !outcome.result.errors.is_empty() || !outcome.result.conflicts.is_empty() {
            run.clean = false;
        }
        run.blocked = outcome.blocked;
        if outcome.watermark.is_some() {
            run.watermark = run.watermark.max(outcome.watermark);
        }
        run.result.merge(outcome.result);
        Ok(())
    }

    async fn push(&self, run: &mut Run, info: &ServerInfo) -> EngineResult<()> {
        self.enter(run, SyncState::Push);
        let local_fields = &self.store.config().local_fields;
        // records in conflict wait for the caller to resolve them
        let conflicted: HashSet<String> = run
            .result
            .conflicts
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        let mut outgoing = Vec::new();
        for local in self.store.pending()? {
            if conflicted.contains(&local.id) {
                continue;
            }
            let remote = RemoteRecord::from_local(&local, local_fields);
            match self.pipeline.encode(remote) {
                Ok(encoded) => outgoing.push(Outgoing {
                    operation: BatchOperation::for_record(encoded),
                    local,
                }),
                Err(e) if e.is_record_level() => {
                    warn!(id = %local.id, error = %e, "failed to encode outgoing record");
                    run.result
                        .errors
                        .push(RecordError::outgoing(local.id, e.to_string(), None));
                }
                Err(e) => return Err(e),
            }
        }
        if outgoing.is_empty() {
            debug!("nothing to push");
            return Ok(());
        }

        let chunk_size = info.batch_max_requests.max(1);
        run.push_expected = run.watermark;
        let strategy = run.options.strategy;
        while !outgoing.is_empty() {
            let rest = outgoing.split_off(chunk_size.min(outgoing.len()));
            let chunk = std::mem::replace(&mut outgoing, rest);
            let resend = self.send_batch(run, chunk, strategy).await?;
            if !resend.is_empty() {
                debug!(count = resend.len(), "re-sending with refreshed preconditions");
                self.send_batch(run, resend, Strategy::Manual).await?;
            }
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        run: &mut Run,
        chunk: Vec<Outgoing>,
        strategy: Strategy,
    ) -> EngineResult<Vec<Outgoing>> {
        self.enter(run, SyncState::Push);
        let operations = chunk.iter().map(|o| o.operation.clone()).collect();
        let batch = self
            .call(self.remote.batch(operations, &run.request))
            .await?;
        if batch.responses.len() != chunk.len() {
            return Err(SyncError::InvalidResponse(format!(
                "{} responses for {} operations",
                batch.responses.len(),
                chunk.len()
            )));
        }
        if batch.previous_timestamp != run.push_expected {
            debug!(
                expected = ?run.push_expected,
                found = ?batch.previous_timestamp,
                "remote changed between pull and push"
            );
            run.foreign_writes = true;
        }

        self.enter(run, SyncState::ReconcilePush);
        let pairs: Vec<_> = chunk.into_iter().zip(batch.responses).collect();
        let outcome = self
            .store
            .transaction(|txn| apply::reconcile(txn, &self.pipeline, pairs, strategy))?;

        if let Some(latest) = outcome.latest {
            run.push_expected = Some(latest);
            run.latest_published = run.latest_published.max(Some(latest));
        }
        run.result.merge(outcome.result);
        Ok(outcome.resend)
    }

    async fn settle(&self, run: &mut Run) -> EngineResult<()> {
        let Some(latest) = run.latest_published else {
            debug!("nothing published, skipping settle");
            return Ok(());
        };
        let info = self
            .call(self.remote.fetch_collection_info(&run.request))
            .await?;
        if !run.foreign_writes && info.last_modified == latest {
            run.watermark = Some(self.store.transaction(|txn| txn.advance_last_modified(latest))?);
        } else {
            debug!(
                remote = info.last_modified,
                latest,
                "remote moved on, leaving watermark for the next pull"
            );
        }
        Ok(())
    }
}

impl<S: StorageAdapter, R> std::fmt::Debug for SyncEngine<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("collection", &self.store.name())
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("hooks", &self.hooks)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}
