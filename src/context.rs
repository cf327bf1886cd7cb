//! Per-test run context.
//!
//! Owns the namespace and two cancellation tokens:
//!
//! - the *lifetime* token spans the whole cluster lifetime and is cancelled
//!   by [`TestContext::finish`];
//! - the *run* token is a child of it, cancelled additionally when the test
//!   timeout elapses. Every cluster operation and collector hangs off it.
//!
//! Cleanup deletes the namespace, which removes every workload and fault
//! object inside it. With `install_signal_handler` set, SIGINT and SIGTERM
//! run cleanup and exit the process.

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::peer::PeerConnector;
use crate::platform::{Platform, PlatformError};
use crate::settings::HarnessConfig;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("create namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: PlatformError,
    },
    #[error("delete namespace {namespace}: {source}")]
    Cleanup {
        namespace: String,
        #[source]
        source: PlatformError,
    },
    #[error("connect to platform: {0}")]
    Connect(#[source] PlatformError),
}

struct ContextInner {
    config: HarnessConfig,
    namespace: String,
    platform: Arc<dyn Platform>,
    connector: Arc<dyn PeerConnector>,
    lifetime: CancellationToken,
    run: CancellationToken,
    cleaned: AtomicBool,
}

/// Shared handle to one test run. Cloning is cheap.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

/// `test-` followed by four random lowercase letters.
pub fn random_namespace() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect();
    format!("test-{suffix}")
}

impl TestContext {
    /// Create the namespace and start the deadline (and, if configured, the
    /// signal) watchers.
    pub async fn new(
        config: HarnessConfig,
        platform: Arc<dyn Platform>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, ContextError> {
        let namespace = if config.namespace.is_empty() {
            random_namespace()
        } else {
            config.namespace.clone()
        };
        platform
            .apply_namespace(&namespace)
            .await
            .map_err(|source| ContextError::Namespace {
                namespace: namespace.clone(),
                source,
            })?;
        info!(namespace = %namespace, "using namespace");

        let lifetime = CancellationToken::new();
        let run = lifetime.child_token();
        let ctx = Self {
            inner: Arc::new(ContextInner {
                config,
                namespace,
                platform,
                connector,
                lifetime,
                run,
                cleaned: AtomicBool::new(false),
            }),
        };
        ctx.spawn_deadline();
        if ctx.inner.config.install_signal_handler {
            ctx.spawn_signal_handler();
        }
        Ok(ctx)
    }

    /// Connect to the cluster from the ambient kubeconfig and dial peers over
    /// gRPC.
    #[cfg(feature = "k8s")]
    pub async fn connect(config: HarnessConfig) -> Result<Self, ContextError> {
        let backend = crate::platform::KubeBackend::try_default()
            .await
            .map_err(ContextError::Connect)?;
        Self::new(
            config,
            Arc::new(backend),
            Arc::new(crate::peer::GrpcConnector),
        )
        .await
    }

    fn spawn_deadline(&self) {
        let timeout = self.inner.config.test_timeout();
        let run = self.inner.run.clone();
        let lifetime = self.inner.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifetime.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!(?timeout, "test deadline reached, cancelling run");
                    run.cancel();
                }
            }
        });
    }

    fn spawn_signal_handler(&self) {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ctx.inner.lifetime.cancelled() => {}
                _ = shutdown_signal() => {
                    warn!(namespace = %ctx.namespace(), "interrupted, cleaning up");
                    ctx.inner.run.cancel();
                    if let Err(err) = ctx.cleanup().await {
                        warn!(error = %err, "cleanup after interrupt failed");
                    }
                    std::process::exit(1);
                }
            }
        });
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }

    pub fn connector(&self) -> &Arc<dyn PeerConnector> {
        &self.inner.connector
    }

    /// Run-scoped token: cancelled by the deadline, an interrupt or
    /// [`Self::finish`].
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.run
    }

    pub fn lifetime_token(&self) -> &CancellationToken {
        &self.inner.lifetime
    }

    pub fn test_timeout(&self) -> Duration {
        self.inner.config.test_timeout()
    }

    /// Delete the namespace. Runs at most once successfully; a namespace that
    /// is already gone counts as cleaned.
    pub async fn cleanup(&self) -> Result<(), ContextError> {
        if self.inner.cleaned.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.inner.platform.delete_namespace(&self.inner.namespace).await {
            Ok(()) => info!(namespace = %self.inner.namespace, "namespace deleted"),
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(ContextError::Cleanup {
                    namespace: self.inner.namespace.clone(),
                    source,
                });
            }
        }
        self.inner.cleaned.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Cancel the run, clean up and release the lifetime token.
    pub async fn finish(&self) -> Result<(), ContextError> {
        self.inner.run.cancel();
        let result = self.cleanup().await;
        self.inner.lifetime.cancel();
        result
    }

    /// Run `body` and then [`Self::finish`], whatever `body` returned.
    pub async fn run<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let out = body(self.clone()).await;
        if let Err(err) = self.finish().await {
            warn!(error = %err, "cleanup failed");
        }
        out
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
