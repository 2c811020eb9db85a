use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::{AuthClient, NoopClient};
use crate::context::ConfigProvider;
use crate::metrics::MetricsScope;

/// Handles passed to an auth backend when it is constructed.
#[derive(Clone)]
pub struct CreationInfo {
    pub service_name: String,
    pub config: Arc<dyn ConfigProvider>,
    pub metrics: Arc<dyn MetricsScope>,
}

type FactoryFn = dyn Fn(&CreationInfo) -> Arc<dyn AuthClient> + Send + Sync;

/// Constructor of an [`AuthClient`].
///
/// Two factories are "the same" when they are clones of one another.
#[derive(Clone)]
pub struct AuthClientFactory(Arc<FactoryFn>);

impl AuthClientFactory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CreationInfo) -> Arc<dyn AuthClient> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Factory of the built-in pass-through client.
    ///
    /// Every call returns a clone of the same shared factory, so it compares
    /// equal to itself across registrations.
    pub fn noop() -> Self {
        static NOOP: OnceLock<AuthClientFactory> = OnceLock::new();
        NOOP.get_or_init(|| Self::new(|_| Arc::new(NoopClient)))
            .clone()
    }

    fn build(&self, info: &CreationInfo) -> Arc<dyn AuthClient> {
        (self.0)(info)
    }
}

impl PartialEq for AuthClientFactory {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for AuthClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthClientFactory")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    factory: Option<AuthClientFactory>,
    client: Option<Arc<dyn AuthClient>>,
}

/// Holds at most one active auth backend and its lazily built client.
///
/// Create one per process and share it (`Arc<AuthRegistry>`); tests create
/// their own to stay isolated.
#[derive(Default)]
pub struct AuthRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AuthRegistry")
            .field("registered", &state.factory.is_some())
            .field("client", &state.client.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `factory` as the active backend. `None` installs the no-op backend.
    ///
    /// Registering the factory that is already active is a no-op.
    ///
    /// # Panics
    /// Panics when a different factory is already registered. Two competing
    /// backends is a wiring bug; call [`unregister`](Self::unregister) first.
    pub fn register(&self, factory: Option<AuthClientFactory>) {
        let mut state = self.state.lock();
        if let Some(active) = &state.factory {
            if factory.as_ref() == Some(active) {
                return;
            }
            panic!("auth client factory is already registered; unregister it before registering another one");
        }

        let factory = factory.unwrap_or_else(AuthClientFactory::noop);
        tracing::debug!(?factory, "auth client factory registered");
        state.factory = Some(factory);
        state.client = None;
    }

    /// Clear the active backend and its cached client. Always succeeds.
    pub fn unregister(&self) {
        let mut state = self.state.lock();
        state.factory = None;
        state.client = None;
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().factory.is_some()
    }

    /// Return the cached client, building it on first call.
    ///
    /// When nothing is registered the no-op client is built. The factory runs
    /// at most once per registration even under concurrent first calls.
    pub fn load(&self, info: &CreationInfo) -> Arc<dyn AuthClient> {
        let mut state = self.state.lock();
        if let Some(client) = &state.client {
            return Arc::clone(client);
        }

        let client = match &state.factory {
            Some(factory) => factory.build(info),
            None => Arc::new(NoopClient) as Arc<dyn AuthClient>,
        };
        tracing::info!(client = client.name(), service = %info.service_name, "auth client loaded");
        state.client = Some(Arc::clone(&client));
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FailureClient, FAILURE_CLIENT_NAME, NOOP_CLIENT_NAME};
    use crate::context::EmptyConfigProvider;
    use crate::metrics::NoopScope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info() -> CreationInfo {
        CreationInfo {
            service_name: "test".to_string(),
            config: Arc::new(EmptyConfigProvider),
            metrics: Arc::new(NoopScope),
        }
    }

    fn failure_factory() -> AuthClientFactory {
        AuthClientFactory::new(|_| Arc::new(FailureClient))
    }

    #[test]
    fn load_without_registration_yields_noop() {
        let registry = AuthRegistry::new();
        assert_eq!(registry.load(&info()).name(), NOOP_CLIENT_NAME);
    }

    #[test]
    fn register_none_installs_noop() {
        let registry = AuthRegistry::new();
        registry.register(None);
        assert!(registry.is_registered());
        assert_eq!(registry.load(&info()).name(), NOOP_CLIENT_NAME);
    }

    #[test]
    fn registering_the_same_factory_twice_succeeds() {
        let registry = AuthRegistry::new();
        let factory = failure_factory();
        registry.register(Some(factory.clone()));
        registry.register(Some(factory));
        assert_eq!(registry.load(&info()).name(), FAILURE_CLIENT_NAME);
    }

    #[test]
    fn registering_the_noop_default_repeatedly_succeeds() {
        let registry = AuthRegistry::new();
        registry.register(None);
        registry.register(None);
        registry.register(Some(AuthClientFactory::noop()));
        assert_eq!(AuthClientFactory::noop(), AuthClientFactory::noop());
        assert_eq!(registry.load(&info()).name(), NOOP_CLIENT_NAME);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registering_a_different_factory_panics() {
        let registry = AuthRegistry::new();
        registry.register(Some(failure_factory()));
        registry.register(Some(failure_factory()));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registering_none_over_a_real_factory_panics() {
        let registry = AuthRegistry::new();
        registry.register(Some(failure_factory()));
        registry.register(None);
    }

    #[test]
    fn unregister_then_register_any_factory_succeeds() {
        let registry = AuthRegistry::new();
        registry.unregister();

        registry.register(Some(failure_factory()));
        assert_eq!(registry.load(&info()).name(), FAILURE_CLIENT_NAME);

        registry.unregister();
        assert!(!registry.is_registered());
        registry.register(None);
        assert_eq!(registry.load(&info()).name(), NOOP_CLIENT_NAME);
    }

    #[test]
    fn client_is_cached_until_unregister() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            AuthClientFactory::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Arc::new(FailureClient)
            })
        };

        let registry = AuthRegistry::new();
        registry.register(Some(counted.clone()));
        let a = registry.load(&info());
        let b = registry.load(&info());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.unregister();
        registry.register(Some(counted));
        registry.load(&info());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_load_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = {
            let calls = Arc::clone(&calls);
            AuthClientFactory::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Arc::new(NoopClient)
            })
        };
        let registry = Arc::new(AuthRegistry::new());
        registry.register(Some(factory));

        let clients: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.load(&info()))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("loader thread panicked"))
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for c in &clients[1..] {
            assert!(Arc::ptr_eq(&clients[0], c));
        }
    }
}
