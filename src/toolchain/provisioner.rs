use crate::cache::ToolchainIndex;
use crate::result::{MatrixError, Result};
use crate::target::TargetId;
use crate::toolchain::{Channel, ToolchainBundle, ToolchainSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

type Key = (Channel, TargetId);
type Shared = std::result::Result<ToolchainBundle, SharedFailure>;

/// A provisioning failure in a form every waiter can receive a copy of.
#[derive(Debug, Clone)]
enum SharedFailure {
    Configuration(String),
    Mismatch { expected: String, actual: String },
    Cancelled(String),
    TimedOut(Duration),
    Unavailable(String),
}

impl From<&MatrixError> for SharedFailure {
    fn from(error: &MatrixError) -> Self {
        match error {
            MatrixError::Configuration(msg) => Self::Configuration(msg.to_string()),
            MatrixError::ToolchainMismatch { expected, actual } => Self::Mismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            MatrixError::Cancelled(msg) => Self::Cancelled(msg.to_string()),
            MatrixError::TimedOut(elapsed) => Self::TimedOut(*elapsed),
            MatrixError::ToolchainUnavailable(msg) => Self::Unavailable(msg.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl SharedFailure {
    fn to_error(&self) -> MatrixError {
        match self {
            Self::Configuration(msg) => MatrixError::configuration(msg.clone()),
            Self::Mismatch { expected, actual } => MatrixError::ToolchainMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::Cancelled(msg) => MatrixError::cancelled(msg.clone()),
            Self::TimedOut(elapsed) => MatrixError::TimedOut(*elapsed),
            Self::Unavailable(msg) => MatrixError::toolchain_unavailable(msg.clone()),
        }
    }
}

#[derive(Default)]
struct ProvisionState {
    ready: HashMap<Key, ToolchainBundle>,
    in_flight: HashMap<Key, watch::Receiver<Option<Shared>>>,
}

enum Role {
    Ready(ToolchainBundle),
    Follow(watch::Receiver<Option<Shared>>),
    Lead(watch::Sender<Option<Shared>>),
}

/** Provisions toolchain bundles, at most one fetch per (channel, target) at a time
 *
 * # Lookup order
 * 1. Bundles provisioned earlier in this process
 * 2. The persistent `ToolchainIndex`, if one is configured
 * 3. The `ToolchainSource`
 *
 * # Coalescing
 * The first request for a key becomes the leader and fetches; requests that
 * arrive while it runs wait on the leader's channel and receive the same
 * bundle or the same failure. Failures are never remembered, so the next
 * request after a failure fetches again.
 *
 * # Example
 * ```no_run
 * use crossmatrix::toolchain::{Channel, RustupSource, ToolchainProvisioner};
 * use crossmatrix::target::TargetId;
 * use crossmatrix::utils::ProcessManager;
 * use std::sync::Arc;
 *
 * #[tokio::main]
 * async fn main() -> crossmatrix::result::Result<()> {
 *     let source = Arc::new(RustupSource::new(ProcessManager::default()));
 *     let provisioner = ToolchainProvisioner::new(source);
 *     let target = TargetId::parse("aarch64-unknown-linux-musl")?;
 *     let bundle = provisioner.provision(&Channel::stable(), &target).await?;
 *     println!("{}", bundle.compiler.display());
 *     Ok(())
 * }
 * ```
 */
pub struct ToolchainProvisioner {
    source: Arc<dyn ToolchainSource>,
    index: Option<ToolchainIndex>,
    timeout: Option<Duration>,
    state: Mutex<ProvisionState>,
}

/// Clears the in-flight entry if the leader is dropped before it finishes.
struct InFlightGuard<'a> {
    provisioner: &'a ToolchainProvisioner,
    key: Option<Key>,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.key = None;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            log::warn!("provisioning {} for {} was abandoned", key.0, key.1);
            self.provisioner.lock().in_flight.remove(&key);
        }
    }
}

impl ToolchainProvisioner {
    pub fn new(source: Arc<dyn ToolchainSource>) -> Self {
        Self {
            source,
            index: None,
            timeout: None,
            state: Mutex::new(ProvisionState::default()),
        }
    }

    pub fn with_index(mut self, index: ToolchainIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Bounds each fetch; an expired fetch fails with `MatrixError::TimedOut`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /** Returns a bundle for `channel` able to compile for `target`
     *
     * # Errors
     * - `MatrixError::ToolchainUnavailable` when the source cannot produce a
     *   complete bundle; retrying later is safe
     * - `MatrixError::ToolchainMismatch` when the source returned a bundle
     *   for another channel or target
     * - `MatrixError::TimedOut` / `MatrixError::Cancelled` when the fetch
     *   was interrupted
     */
    pub async fn provision(&self, channel: &Channel, target: &TargetId) -> Result<ToolchainBundle> {
        let key = (channel.clone(), target.clone());

        match self.join(&key) {
            Role::Ready(bundle) => Ok(bundle),
            Role::Follow(mut receiver) => {
                log::debug!("waiting for in-flight provisioning of {} for {}", channel, target);
                let shared = match receiver.wait_for(Option::is_some).await {
                    Ok(value) => value.clone(),
                    Err(_) => None,
                };
                match shared {
                    Some(Ok(bundle)) => Ok(bundle),
                    Some(Err(failure)) => Err(failure.to_error()),
                    None => Err(MatrixError::cancelled(format!(
                        "provisioning {} for {} was abandoned",
                        channel, target
                    ))),
                }
            }
            Role::Lead(sender) => self.lead(key, sender).await,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProvisionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, key: &Key) -> Role {
        let mut state = self.lock();

        if let Some(bundle) = state.ready.get(key) {
            if self.source.is_valid(bundle) {
                return Role::Ready(bundle.clone());
            }
            log::info!("toolchain {} for {} is no longer valid", key.0, key.1);
            state.ready.remove(key);
        }

        if let Some(receiver) = state.in_flight.get(key) {
            return Role::Follow(receiver.clone());
        }

        let (sender, receiver) = watch::channel(None);
        state.in_flight.insert(key.clone(), receiver);
        Role::Lead(sender)
    }

    async fn lead(&self, key: Key, sender: watch::Sender<Option<Shared>>) -> Result<ToolchainBundle> {
        let guard = InFlightGuard {
            provisioner: self,
            key: Some(key.clone()),
        };

        let shared: Shared = match self.fetch_or_load(&key.0, &key.1).await {
            Ok(bundle) => Ok(bundle),
            Err(e) => {
                log::error!("provisioning {} for {} failed: {}", key.0, key.1, e);
                Err(SharedFailure::from(&e))
            }
        };

        {
            let mut state = self.lock();
            state.in_flight.remove(&key);
            if let Ok(bundle) = &shared {
                state.ready.insert(key.clone(), bundle.clone());
            }
        }
        guard.disarm();
        sender.send_replace(Some(shared.clone()));

        shared.map_err(|failure| failure.to_error())
    }

    async fn fetch_or_load(&self, channel: &Channel, target: &TargetId) -> Result<ToolchainBundle> {
        if let Some(index) = &self.index {
            match index.get(channel, target).await {
                Ok(Some(bundle)) if self.source.is_valid(&bundle) => {
                    log::info!("using indexed toolchain {} for {}", channel, target);
                    return Ok(bundle);
                }
                Ok(Some(_)) => {
                    log::info!("indexed toolchain {} for {} is stale", channel, target);
                    if let Err(e) = index.remove(channel, target).await {
                        log::warn!("failed to drop stale index entry: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("toolchain index lookup failed: {}", e),
            }
        }

        log::info!("provisioning toolchain {} for {}", channel, target);
        let fetch = self.source.fetch(channel, target);
        let bundle = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| MatrixError::TimedOut(limit))??,
            None => fetch.await?,
        };

        if bundle.target != *target || bundle.channel != *channel {
            return Err(MatrixError::ToolchainMismatch {
                expected: format!("{}@{}", channel, target),
                actual: format!("{}@{}", bundle.channel, bundle.target),
            });
        }

        if let Some(index) = &self.index {
            if let Err(e) = index.store(&bundle).await {
                log::warn!("failed to record toolchain in index: {}", e);
            }
        }

        Ok(bundle)
    }
}
