//! Per-backend dispatch with bounded waits and liveness tracking.
//!
//! Every call to a backend runs under `tokio::time::timeout`; a backend
//! that misses the deadline is marked unreachable and excluded from all
//! future calls until the process is restarted. Unicast callers treat an
//! unreachable backend as fatal; broadcast callers drop it from the
//! recipient set for that call.
//!
//! The counterparty collection is append-only at startup. The liveness
//! flag is the only field mutated at runtime, so the collection itself
//! needs no lock.

use {
    crate::error::{EngineError, Result},
    chainmock_abci::{AppResult, Application},
    log::{info, warn},
    solana_pubkey::Pubkey,
    std::{
        fmt::Debug,
        future::Future,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
};

/// One validator's backend: where it lives, who it represents, and
/// whether we still believe it answers.
pub struct Counterparty {
    /// Display address used in logs and errors.
    pub network_address: String,
    /// The validator this backend represents.
    pub validator_address: Pubkey,
    app: Arc<dyn Application>,
    connected: AtomicBool,
}

impl Counterparty {
    pub fn new(
        network_address: impl Into<String>,
        validator_address: Pubkey,
        app: Arc<dyn Application>,
    ) -> Self {
        Self {
            network_address: network_address.into(),
            validator_address,
            app,
            connected: AtomicBool::new(true),
        }
    }

    pub fn app(&self) -> Arc<dyn Application> {
        self.app.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Debug for Counterparty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counterparty")
            .field("network_address", &self.network_address)
            .field("validator_address", &self.validator_address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Issues protocol calls against the backend collection.
#[derive(Debug)]
pub struct PeerDispatch {
    clients: Vec<Counterparty>,
    call_timeout: Duration,
}

impl PeerDispatch {
    pub fn new(clients: Vec<Counterparty>, call_timeout: Duration) -> Self {
        Self {
            clients,
            call_timeout,
        }
    }

    pub fn clients(&self) -> &[Counterparty] {
        &self.clients
    }

    /// The backend representing the given validator.
    pub fn get(&self, validator_address: &Pubkey) -> Option<&Counterparty> {
        self.clients
            .iter()
            .find(|c| c.validator_address == *validator_address)
    }

    /// The first backend still believed reachable.
    pub fn first_connected(&self) -> Option<&Counterparty> {
        self.clients.iter().find(|c| c.is_connected())
    }

    /// Call one backend with a bounded wait.
    ///
    /// A timeout marks the backend unreachable and surfaces
    /// [`EngineError::Unreachable`]; backend-side failures come back as
    /// [`EngineError::App`].
    pub async fn call_one<T, F, Fut>(&self, client: &Counterparty, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Application>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, f(client.app())).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(EngineError::App(err)),
            Err(_) => {
                info!(
                    "backend at {} did not respond within {:?}",
                    client.network_address, self.call_timeout
                );
                client.mark_disconnected();
                Err(EngineError::Unreachable(client.network_address.clone()))
            }
        }
    }

    /// Call every reachable backend concurrently.
    ///
    /// Backends already marked unreachable are skipped; backends that time
    /// out during this call are marked unreachable and dropped from the
    /// result. Backend-side failures abort the whole call. When
    /// `cross_check` is set, all responses must compare equal or the call
    /// fails with [`EngineError::NonDeterminism`].
    ///
    /// Returns `(network_address, response)` pairs in client order.
    pub async fn call_all<T, F, Fut>(
        &self,
        call: &'static str,
        cross_check: bool,
        f: F,
    ) -> Result<Vec<(String, T)>>
    where
        T: PartialEq + Debug + Send + 'static,
        F: Fn(Arc<dyn Application>) -> Fut,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let mut handles = Vec::new();
        for (index, client) in self.clients.iter().enumerate() {
            if !client.is_connected() {
                continue;
            }
            let timeout = self.call_timeout;
            let fut = f(client.app());
            handles.push((
                index,
                tokio::spawn(async move { tokio::time::timeout(timeout, fut).await }),
            ));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            let client = &self.clients[index];
            match handle.await {
                Ok(Ok(Ok(response))) => {
                    responses.push((client.network_address.clone(), response));
                }
                Ok(Ok(Err(err))) => return Err(EngineError::App(err)),
                Ok(Err(_elapsed)) => {
                    warn!(
                        "backend at {} did not respond to {call} within {:?}, \
                         dropping it from this and all future calls",
                        client.network_address, self.call_timeout
                    );
                    client.mark_disconnected();
                }
                Err(join_err) => {
                    return Err(EngineError::App(chainmock_abci::AppError::Internal(
                        join_err.to_string(),
                    )))
                }
            }
        }

        if responses.is_empty() {
            return Err(EngineError::NoConnectedBackends);
        }

        if cross_check {
            let (_, first) = &responses[0];
            for (address, response) in &responses[1..] {
                if response != first {
                    return Err(EngineError::NonDeterminism {
                        call,
                        details: format!(
                            "{address} answered {response:?}, expected {first:?}"
                        ),
                    });
                }
            }
        }

        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chainmock_abci::{
            types::{RequestFinalizeBlock, RequestInfo, ResponseInfo},
            KvStore,
        },
    };

    fn make_clients(n: usize) -> (Vec<Arc<KvStore>>, Vec<Counterparty>) {
        let apps: Vec<Arc<KvStore>> = (0..n).map(|_| Arc::new(KvStore::new())).collect();
        let clients = apps
            .iter()
            .enumerate()
            .map(|(i, app)| {
                Counterparty::new(
                    format!("127.0.0.1:{}", 26650 + i),
                    Pubkey::new_unique(),
                    app.clone() as Arc<dyn Application>,
                )
            })
            .collect();
        (apps, clients)
    }

    #[tokio::test]
    async fn test_call_all_reaches_every_backend() {
        let (_apps, clients) = make_clients(3);
        let dispatch = PeerDispatch::new(clients, Duration::from_secs(5));
        let responses = dispatch
            .call_all("Info", false, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_marks_backend_unreachable() {
        let (apps, clients) = make_clients(3);
        apps[1].set_response_delay(Some(Duration::from_secs(60)));
        let dispatch = PeerDispatch::new(clients, Duration::from_millis(50));

        let responses = dispatch
            .call_all("Info", false, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap();
        assert_eq!(responses.len(), 2, "the stalled backend is dropped");
        assert!(!dispatch.clients()[1].is_connected());

        // Excluded from subsequent calls without waiting on it again.
        let responses = dispatch
            .call_all("Info", false, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn test_call_one_timeout_is_fatal() {
        let (apps, clients) = make_clients(1);
        apps[0].set_response_delay(Some(Duration::from_secs(60)));
        let dispatch = PeerDispatch::new(clients, Duration::from_millis(50));
        let client = &dispatch.clients()[0];

        let err = dispatch
            .call_one(client, |app| async move { app.info(RequestInfo {}).await })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unreachable(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_all_backends_dead_is_an_error() {
        let (apps, clients) = make_clients(2);
        for app in &apps {
            app.set_response_delay(Some(Duration::from_secs(60)));
        }
        let dispatch = PeerDispatch::new(clients, Duration::from_millis(50));

        let err = dispatch
            .call_all("Info", false, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoConnectedBackends));
    }

    #[tokio::test]
    async fn test_cross_check_detects_divergence() {
        let (apps, clients) = make_clients(2);
        // Desynchronize one backend by committing a block only to it.
        apps[1]
            .finalize_block(RequestFinalizeBlock {
                txs: vec![b"k=v".to_vec()],
                height: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        let dispatch = PeerDispatch::new(clients, Duration::from_secs(5));
        let err = dispatch
            .call_all("Info", true, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NonDeterminism { call: "Info", .. }));
    }

    #[tokio::test]
    async fn test_cross_check_passes_on_identical_backends() {
        let (_apps, clients) = make_clients(3);
        let dispatch = PeerDispatch::new(clients, Duration::from_secs(5));
        let responses: Vec<(String, ResponseInfo)> = dispatch
            .call_all("Info", true, |app| async move {
                app.info(RequestInfo {}).await
            })
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
    }

    #[tokio::test]
    async fn test_first_connected_skips_dead_backends() {
        let (apps, clients) = make_clients(2);
        apps[0].set_response_delay(Some(Duration::from_secs(60)));
        let dispatch = PeerDispatch::new(clients, Duration::from_millis(50));
        let dead = &dispatch.clients()[0];
        let _ = dispatch
            .call_one(dead, |app| async move { app.info(RequestInfo {}).await })
            .await;

        let first = dispatch.first_connected().unwrap();
        assert_eq!(first.network_address, dispatch.clients()[1].network_address);
    }
}
