//! Mutation coordinator.
//!
//! Wraps a remote write so that it runs at most once per logical request and
//! is safe to retry:
//!
//! 1. derive the idempotency key and request hash from the canonical request
//! 2. `reserve` in the store: replay, collide, wait for another owner, or run
//! 3. on success, persist the outcome (failure to persist is logged, not fatal)
//! 4. on an ambiguous failure, ask `recover` for the real remote state; with
//!    no confirmed outcome, release and fail with [`FolioError::Unconfirmed`]
//! 5. on any other failure, release and propagate
//!
//! Every branch emits one audit event. The store lock is held only inside
//! individual store calls, never across the remote write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use folio_store::{FileBackend, IdempotencyStore, Lookup, Reservation, StoreResult};
use folio_telemetry::{AuditEvent, AuditSink, JsonlAuditSink, NullAuditSink, key_hash};
use folio_types::{Clock, IdempotencyKey, request_hash};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::FolioConfig;
use crate::error::{FolioError, FolioResult};

/// Coordinator timing.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Width of the idempotency key time bucket.
    pub bucket: Duration,
    /// Interval between lookups while another caller owns the request.
    pub poll_interval: Duration,
    /// Give up waiting on another owner after this long.
    pub pending_deadline: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bucket: Duration::from_secs(120),
            poll_interval: Duration::from_millis(50),
            pending_deadline: Duration::from_secs(15),
        }
    }
}

/// A write to coordinate.
///
/// `run` and `recover` are futures; nothing happens until the coordinator
/// decides to await them.
pub struct Mutation<'a> {
    command: String,
    request: Value,
    targets: Vec<String>,
    run: BoxFuture<'a, FolioResult<Value>>,
    recover: Option<BoxFuture<'a, FolioResult<Option<Value>>>>,
}

impl<'a> Mutation<'a> {
    /// `request` is the canonical request shape the key is derived from.
    pub fn new(
        command: impl Into<String>,
        request: Value,
        run: impl Future<Output = FolioResult<Value>> + Send + 'a,
    ) -> Self {
        Self {
            command: command.into(),
            request,
            targets: Vec::new(),
            run: Box::pin(run),
            recover: None,
        }
    }

    /// Record a target id in the audit event.
    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.targets.push(id.into());
        self
    }

    /// Determine the real remote state after an ambiguous failure.
    /// `Ok(Some(outcome))` confirms the write.
    pub fn recover(
        mut self,
        recover: impl Future<Output = FolioResult<Option<Value>>> + Send + 'a,
    ) -> Self {
        self.recover = Some(Box::pin(recover));
        self
    }
}

/// What the caller gets back.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub value: Value,
    /// Served from the store without running the write.
    pub replayed: bool,
    /// Confirmed by recovery after an ambiguous failure.
    pub recovered: bool,
    /// The write succeeded but its outcome could not be stored for replay.
    pub persistence_degraded: bool,
    pub idempotency_key: String,
}

impl MutationOutcome {
    fn fresh(value: Value, key: &str) -> Self {
        Self {
            value,
            replayed: false,
            recovered: false,
            persistence_degraded: false,
            idempotency_key: key.to_string(),
        }
    }
}

/// Per-invocation identity.
struct Call<'c> {
    command: &'c str,
    key: &'c str,
    hash: &'c str,
}

/// Runs mutations through the idempotency store.
pub struct MutationCoordinator {
    store: Arc<IdempotencyStore>,
    audit: Arc<dyn AuditSink>,
    config: CoordinatorConfig,
    clock: Clock,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<IdempotencyStore>,
        audit: Arc<dyn AuditSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
            clock: Clock::system(),
        }
    }

    /// File-backed store and JSONL audit log at the configured paths.
    pub fn from_config(config: &FolioConfig) -> FolioResult<Self> {
        let backend = FileBackend::open(config.store_path()?, config.lock_config())?;
        let store = Arc::new(IdempotencyStore::open(backend, config.store_config()));
        let audit: Arc<dyn AuditSink> = if config.audit.enabled {
            let sink = JsonlAuditSink::new(config.audit_path()?)
                .map_err(|e| FolioError::Internal(format!("audit log unavailable: {e}")))?;
            Arc::new(sink)
        } else {
            Arc::new(NullAuditSink)
        };
        Ok(Self::new(store, audit, config.coordinator_config()))
    }

    /// Replace the clock used for key time buckets.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<IdempotencyStore> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Key the coordinator would derive for `request` right now.
    pub fn derive_key(&self, command: &str, request: &Value) -> IdempotencyKey {
        IdempotencyKey::derive(command, request, self.clock.now_millis(), self.config.bucket)
    }

    /// Run `mutation` at most once per logical request.
    pub async fn execute(&self, mutation: Mutation<'_>) -> FolioResult<MutationOutcome> {
        let started = Instant::now();
        let Mutation {
            command,
            request,
            targets,
            run,
            recover,
        } = mutation;

        let hash = request_hash(&request);
        let key = self.derive_key(&command, &request).to_string();
        let call = Call {
            command: &command,
            key: &key,
            hash: &hash,
        };

        let span = info_span!("mutation", command = %command, key = %key);
        let result = self.coordinate(&call, run, recover).instrument(span).await;
        self.emit_audit(&call, targets, &result, started.elapsed()).await;
        result
    }

    async fn coordinate(
        &self,
        call: &Call<'_>,
        run: BoxFuture<'_, FolioResult<Value>>,
        recover: Option<BoxFuture<'_, FolioResult<Option<Value>>>>,
    ) -> FolioResult<MutationOutcome> {
        let (key, command, hash) = owned(call);
        let reservation = self
            .with_store(move |store| store.reserve(&key, &command, &hash))
            .await?;

        match reservation {
            Reservation::Execute => self.run_owned(call, run, recover).await,
            Reservation::Replay(value) => {
                info!("replaying stored outcome");
                Ok(MutationOutcome {
                    replayed: true,
                    ..MutationOutcome::fresh(value, call.key)
                })
            }
            Reservation::Pending => self.await_owner(call).await,
            Reservation::Conflict { stored_hash } => Err(collision(call, stored_hash)),
        }
    }

    /// Another caller owns the request. Poll until it finishes or the
    /// deadline passes; never execute here.
    async fn await_owner(&self, call: &Call<'_>) -> FolioResult<MutationOutcome> {
        let started = Instant::now();
        debug!("request in flight elsewhere; waiting");
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let (key, command, hash) = owned(call);
            let lookup = self
                .with_store(move |store| store.lookup(&key, &command, &hash))
                .await?;
            match lookup {
                Lookup::Replay(value) => {
                    info!(waited_ms = started.elapsed().as_millis() as u64, "concurrent owner finished; replaying");
                    return Ok(MutationOutcome {
                        replayed: true,
                        ..MutationOutcome::fresh(value, call.key)
                    });
                }
                Lookup::Pending => {}
                Lookup::Miss => {
                    return Err(FolioError::DuplicateUnresolved {
                        command: call.command.to_string(),
                    });
                }
                Lookup::Conflict { stored_hash } => return Err(collision(call, stored_hash)),
            }

            let waited = started.elapsed();
            if waited >= self.config.pending_deadline {
                return Err(FolioError::InProgress {
                    command: call.command.to_string(),
                    waited,
                });
            }
        }
    }

    async fn run_owned(
        &self,
        call: &Call<'_>,
        run: BoxFuture<'_, FolioResult<Value>>,
        recover: Option<BoxFuture<'_, FolioResult<Option<Value>>>>,
    ) -> FolioResult<MutationOutcome> {
        match run.await {
            Ok(value) => {
                let degraded = !self.persist(call, &value).await;
                Ok(MutationOutcome {
                    persistence_degraded: degraded,
                    ..MutationOutcome::fresh(value, call.key)
                })
            }
            Err(FolioError::Remote(remote)) if remote.is_ambiguous() => {
                warn!(error = %remote, "ambiguous remote failure; attempting recovery");
                let confirmed = match recover {
                    Some(recover) => match recover.await {
                        Ok(found) => found,
                        Err(e) => {
                            warn!(error = %e, "recovery failed");
                            None
                        }
                    },
                    None => None,
                };

                match confirmed {
                    Some(value) => {
                        info!("recovery confirmed the write");
                        let degraded = !self.persist(call, &value).await;
                        Ok(MutationOutcome {
                            recovered: true,
                            persistence_degraded: degraded,
                            ..MutationOutcome::fresh(value, call.key)
                        })
                    }
                    None => {
                        self.release(call).await;
                        Err(FolioError::Unconfirmed {
                            command: call.command.to_string(),
                            source: remote,
                        })
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "write failed; releasing reservation");
                self.release(call).await;
                Err(err)
            }
        }
    }

    /// Store the outcome for replay. Returns whether it was stored.
    async fn persist(&self, call: &Call<'_>, value: &Value) -> bool {
        let (key, command, hash) = owned(call);
        let value = value.clone();
        match self
            .with_store(move |store| store.complete(&key, &command, &hash, &value))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "write succeeded but outcome was not persisted; replay unavailable");
                false
            }
        }
    }

    async fn release(&self, call: &Call<'_>) {
        let (key, command, hash) = owned(call);
        if let Err(e) = self
            .with_store(move |store| store.release(&key, &command, &hash))
            .await
        {
            warn!(error = %e, "failed to release reservation; it will expire with the TTL");
        }
    }

    /// Run a blocking store operation off the async executor.
    async fn with_store<T, F>(&self, f: F) -> FolioResult<T>
    where
        F: FnOnce(&IdempotencyStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| FolioError::Internal(format!("store task failed: {e}")))?
            .map_err(FolioError::from)
    }

    /// Hand the event to the sink on the blocking pool. Sink failures are
    /// logged and dropped.
    async fn emit_audit(
        &self,
        call: &Call<'_>,
        targets: Vec<String>,
        result: &FolioResult<MutationOutcome>,
        elapsed: Duration,
    ) {
        let (ok, replayed, recovered, degraded, error_kind) = match result {
            Ok(o) => (true, o.replayed, o.recovered, o.persistence_degraded, None),
            Err(e) => (false, false, false, false, Some(e.kind())),
        };
        let event = AuditEvent {
            ts: self.clock.now_millis(),
            command: call.command.to_string(),
            key_hash: key_hash(call.key),
            targets,
            ok,
            replayed,
            recovered,
            persistence_degraded: degraded,
            error_kind,
            duration_ms: elapsed.as_millis() as u64,
        };
        let audit = Arc::clone(&self.audit);
        match tokio::task::spawn_blocking(move || audit.record(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(command = call.command, error = %e, "audit record dropped"),
            Err(e) => warn!(command = call.command, error = %e, "audit task failed"),
        }
    }
}

fn owned(call: &Call<'_>) -> (String, String, String) {
    (call.key.to_string(), call.command.to_string(), call.hash.to_string())
}

fn collision(call: &Call<'_>, stored_hash: String) -> FolioError {
    FolioError::KeyCollision {
        command: call.command.to_string(),
        key: call.key.to_string(),
        stored_hash,
    }
}
