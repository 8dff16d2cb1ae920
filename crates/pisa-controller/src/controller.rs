//! Controller runtime: watch loop, work queue and worker pool

use crate::config::ReconcilerConfig;
use crate::error::{ControllerError, ControllerResult, StoreError};
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::{Outcome, Reconciler, Requeue};
use crate::store::{Store, WatchEvent};
use pisa_types::{Kind, ObjectKey, Resource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Queue = Arc<WorkQueue<ObjectKey>>;

/// Drives the reconciler from store change notifications
pub struct Controller {
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler>,
    config: ReconcilerConfig,
    ready: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(store: Arc<dyn Store>, reconciler: Arc<Reconciler>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            reconciler,
            config,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once the initial sync has queued every VirtualDatabase
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Run until `cancel` fires. Every VirtualDatabase is queued once at
    /// start, then on its own changes and on changes to what it depends on.
    pub async fn run(&self, cancel: CancellationToken) -> ControllerResult<()> {
        let queue: Queue = WorkQueue::new(Backoff::new(
            self.config.backoff_base(),
            self.config.backoff_max(),
        ));

        // Subscribe before listing so nothing between the two is missed
        let mut events = self.store.subscribe();
        let synced = self.resync(&queue).await?;
        self.ready.store(true, Ordering::SeqCst);
        info!(objects = synced, workers = self.config.workers, "Controller started");

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    self.reconciler.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&queue, event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch lagged, resyncing");
                        if let Err(e) = self.resync(&queue).await {
                            error!(error = %e, "Resync failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        break Err(ControllerError::Server("store watch closed".to_string()));
                    }
                },
            }
        };

        queue.shutdown().await;
        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                error!(error = %e, "Worker panicked");
            }
        }
        self.ready.store(false, Ordering::SeqCst);
        info!("Controller stopped");

        result
    }

    /// Run the controller only while `leader` is true
    pub async fn run_with_leadership(
        self: Arc<Self>,
        mut leader: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> ControllerResult<()> {
        loop {
            while !*leader.borrow_and_update() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    changed = leader.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }

            let term = cancel.child_token();
            let mut run = {
                let controller = self.clone();
                let term = term.clone();
                tokio::spawn(async move { controller.run(term).await })
            };

            let finished = loop {
                tokio::select! {
                    result = &mut run => break Some(result),
                    _ = cancel.cancelled() => break None,
                    changed = leader.changed() => {
                        if changed.is_err() || !*leader.borrow() {
                            break None;
                        }
                    }
                }
            };

            term.cancel();
            let result = match finished {
                Some(result) => result,
                None => run.await,
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ControllerError::Server(format!("controller task failed: {}", e))),
            }

            if cancel.is_cancelled() {
                return Ok(());
            }
            info!("Workers stopped after losing leadership");
        }
    }

    async fn resync(&self, queue: &Queue) -> Result<usize, StoreError> {
        let vdbs = self.store.list_virtual_databases().await?;
        let count = vdbs.len();
        for vdb in vdbs {
            queue.add(vdb.key()).await;
        }
        Ok(count)
    }

    async fn handle_event(&self, queue: &Queue, event: WatchEvent) {
        match event.kind {
            Kind::VirtualDatabase => queue.add(event.key).await,
            Kind::DatabaseEndpoint => match event.owner {
                Some((Kind::VirtualDatabase, owner)) => {
                    debug!(endpoint = %event.key, owner = %owner, "Dependent changed");
                    queue.add(owner).await;
                }
                _ => debug!(endpoint = %event.key, "Endpoint without owner"),
            },
            Kind::DatabaseClass => match self.store.list_virtual_databases().await {
                Ok(vdbs) => {
                    for vdb in vdbs {
                        let references = vdb.metadata.namespace == event.key.namespace
                            && vdb.spec.database_class_name.as_deref() == Some(event.key.name.as_str());
                        if references {
                            queue.add(vdb.key()).await;
                        }
                    }
                }
                Err(e) => error!(class = %event.key, error = %e, "Failed to list VirtualDatabases"),
            },
        }
    }
}

async fn run_worker(
    id: usize,
    queue: Queue,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        let outcome = reconciler.reconcile(&key, &cancel).await;
        apply_outcome(&queue, &key, outcome).await;
        queue.done(&key).await;
    }
    debug!(worker = id, "Worker stopped");
}

async fn apply_outcome(queue: &Queue, key: &ObjectKey, outcome: Outcome) {
    match (outcome.requeue, outcome.error) {
        (_, Some(error)) if !error.is_retryable() => {
            debug!(%key, error = %error, "Dropping key");
            queue.forget(key).await;
        }
        (Requeue::Immediate, Some(error)) => {
            warn!(%key, error = %error, "Reconcile failed, requeueing immediately");
            queue.add(key.clone()).await;
        }
        (_, Some(error)) => {
            let delay = queue.add_rate_limited(key.clone()).await;
            error!(%key, error = %error, retry_in_ms = delay.as_millis() as u64, "Reconcile failed");
        }
        (Requeue::After(delay), None) => {
            queue.forget(key).await;
            queue.add_after(key.clone(), delay).await;
        }
        (Requeue::Immediate, None) => {
            queue.forget(key).await;
            queue.add(key.clone()).await;
        }
        (Requeue::None, None) => queue.forget(key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::RandomPasswordGenerator;
    use crate::provider::{InMemoryProvider, ProviderCall};
    use crate::store::{
        DatabaseClassStore, DatabaseEndpointStore, InMemoryStore, VirtualDatabaseStore,
    };
    use pisa_types::{
        CodecTable, DatabaseClass, DatabaseClassSpec, DatabaseEngine, DatabaseProvisioner, ObjectMeta,
        VirtualDatabase, VirtualDatabaseSpec,
    };
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryStore>,
        provider: Arc<InMemoryProvider>,
        controller: Arc<Controller>,
    }

    fn fixture(recheck: Duration) -> Fixture {
        fixture_with_workers(2, recheck)
    }

    fn fixture_with_workers(workers: usize, recheck: Duration) -> Fixture {
        let store = Arc::new(InMemoryStore::new(Arc::new(CodecTable::standard())));
        let provider = Arc::new(InMemoryProvider::default());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            provider.clone(),
            Arc::new(RandomPasswordGenerator::default()),
            recheck,
        ));
        let config = ReconcilerConfig {
            workers,
            ..Default::default()
        };
        let controller = Arc::new(Controller::new(store.clone(), reconciler, config));
        Fixture {
            store,
            provider,
            controller,
        }
    }

    fn class(provisioner: DatabaseProvisioner) -> DatabaseClass {
        DatabaseClass::new(
            ObjectMeta::new("ns", "rds-mysql"),
            DatabaseClassSpec {
                provisioner,
                engine: DatabaseEngine {
                    name: "mysql".to_string(),
                    version: "8.0".to_string(),
                },
                instance: Default::default(),
                storage: Default::default(),
                default_master_username: "admin".to_string(),
            },
        )
    }

    fn vdb(name: &str) -> VirtualDatabase {
        VirtualDatabase::new(
            ObjectMeta::new("ns", name),
            VirtualDatabaseSpec::default()
                .with_class("rds-mysql")
                .with_mysql_service("svc", "shop"),
        )
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_initial_sync_reconciles_existing_objects() {
        let f = fixture(Duration::from_secs(30));
        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        f.store.apply_virtual_database(vdb("app2")).await.unwrap();

        let cancel = CancellationToken::new();
        let ready = f.controller.readiness();
        let handle = tokio::spawn({
            let controller = f.controller.clone();
            let cancel = cancel.clone();
            async move { controller.run(cancel).await }
        });

        let store = f.store.clone();
        eventually(|| {
            let store = store.clone();
            async move {
                store.get_database_endpoint(&ObjectKey::new("ns", "app1")).await.is_ok()
                    && store.get_database_endpoint(&ObjectKey::new("ns", "app2")).await.is_ok()
            }
        })
        .await;
        assert!(ready.load(Ordering::SeqCst));
        assert_eq!(f.provider.create_requests().await.len(), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(!ready.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_class_change_requeues_referencing_vdbs() {
        let f = fixture(Duration::from_secs(3600));
        f.store
            .apply_database_class(class(DatabaseProvisioner::Other("manual".to_string())))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let controller = f.controller.clone();
            let cancel = cancel.clone();
            async move { controller.run(cancel).await }
        });

        let ready = f.controller.readiness();
        eventually(|| {
            let ready = ready.clone();
            async move { ready.load(Ordering::SeqCst) }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.provider.calls().await.is_empty());

        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();

        let provider = f.provider.clone();
        eventually(|| {
            let provider = provider.clone();
            async move { provider.create_requests().await.len() == 1 }
        })
        .await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_workers_follow_leadership() {
        let f = fixture(Duration::from_secs(3600));
        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();

        let (leader_tx, leader_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let ready = f.controller.readiness();
        let handle = tokio::spawn(
            f.controller
                .clone()
                .run_with_leadership(leader_rx, cancel.clone()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.provider.calls().await.is_empty());
        assert!(!ready.load(Ordering::SeqCst));

        leader_tx.send_replace(true);
        let provider = f.provider.clone();
        eventually(|| {
            let provider = provider.clone();
            async move { provider.create_requests().await.len() == 1 }
        })
        .await;

        leader_tx.send_replace(false);
        let flag = ready.clone();
        eventually(|| {
            let flag = flag.clone();
            async move { !flag.load(Ordering::SeqCst) }
        })
        .await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    fn spawn_run(f: &Fixture) -> (CancellationToken, tokio::task::JoinHandle<Result<(), ControllerError>>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let controller = f.controller.clone();
            let cancel = cancel.clone();
            async move { controller.run(cancel).await }
        });
        (cancel, handle)
    }

    async fn describe_count(provider: &InMemoryProvider) -> usize {
        provider
            .calls()
            .await
            .iter()
            .filter(|call| matches!(call, ProviderCall::Describe(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_does_not_multiply_with_events() {
        let f = fixture_with_workers(1, Duration::from_secs(30));
        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        let (cancel, handle) = spawn_run(&f);

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(300)).await;

        // Two initial passes, one per re-apply, then one recheck every 30s
        let describes = describe_count(&f.provider).await;
        assert!(
            (12..=20).contains(&describes),
            "expected a single recheck cadence, saw {} describes",
            describes
        );
        assert_eq!(f.provider.create_requests().await.len(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_events_during_create_issue_one_create() {
        let f = fixture_with_workers(4, Duration::from_secs(3600));
        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        f.provider.hold_creates().await;
        let (cancel, handle) = spawn_run(&f);

        let provider = f.provider.clone();
        eventually(|| {
            let provider = provider.clone();
            async move { provider.create_requests().await.len() == 1 }
        })
        .await;

        // The first pass is stuck inside create while the key keeps changing
        for _ in 0..10 {
            f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.provider.create_requests().await.len(), 1);
        assert_eq!(describe_count(&f.provider).await, 1);

        f.provider.release_creates().await;
        eventually(|| {
            let provider = provider.clone();
            async move { describe_count(&provider).await >= 2 }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.provider.create_requests().await.len(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_change_requeues_owner() {
        let f = fixture(Duration::from_secs(3600));
        f.store
            .apply_database_class(class(DatabaseProvisioner::AwsRdsInstance))
            .await
            .unwrap();
        f.store.apply_virtual_database(vdb("app1")).await.unwrap();
        f.provider.insert_available("app1", "db.example", 3306).await;
        let (cancel, handle) = spawn_run(&f);

        let key = ObjectKey::new("ns", "app1");
        let host_is = |host: &'static str| {
            let store = f.store.clone();
            let key = key.clone();
            move || {
                let store = store.clone();
                let key = key.clone();
                async move {
                    store
                        .get_database_endpoint(&key)
                        .await
                        .map(|ep| ep.mysql().map(|m| m.host.as_str()) == Some(host))
                        .unwrap_or(false)
                }
            }
        };
        eventually(host_is("db.example")).await;

        let mut endpoint = f.store.get_database_endpoint(&key).await.unwrap();
        endpoint.set_address("tampered.example", 3307);
        f.store.update_database_endpoint(endpoint).await.unwrap();

        // Only the endpoint's own change event can trigger this pass
        eventually(host_is("db.example")).await;
        let endpoint = f.store.get_database_endpoint(&key).await.unwrap();
        assert_eq!(endpoint.mysql().unwrap().port, 3306);
        assert!(f.provider.create_requests().await.is_empty());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_is_retried_with_backoff() {
        let queue: Queue = WorkQueue::new(Backoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ));
        let key = ObjectKey::new("ns", "app1");

        queue.add(key.clone()).await;
        let taken = queue.get().await.unwrap();
        apply_outcome(
            &queue,
            &taken,
            Outcome::failed(crate::error::ReconcileError::ClassNotFound {
                class: key.sibling("missing"),
            }),
        )
        .await;
        queue.done(&taken).await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.num_requeues(&key).await, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_outcome_is_dropped() {
        let queue: Queue = WorkQueue::new(Backoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ));
        let key = ObjectKey::new("ns", "app1");

        apply_outcome(
            &queue,
            &key,
            Outcome::failed(crate::error::ReconcileError::Cancelled),
        )
        .await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.num_requeues(&key).await, 0);
    }

    #[tokio::test]
    async fn test_immediate_outcome_requeues_now() {
        let queue: Queue = WorkQueue::new(Backoff::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ));
        let key = ObjectKey::new("ns", "app1");

        queue.add(key.clone()).await;
        let taken = queue.get().await.unwrap();
        apply_outcome(
            &queue,
            &taken,
            Outcome::requeue_immediately(crate::error::ReconcileError::Store(
                StoreError::Unavailable("down".to_string()),
            )),
        )
        .await;
        queue.done(&taken).await;

        assert_eq!(queue.len().await, 1);
    }
}
