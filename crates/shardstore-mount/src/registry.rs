//! Scheme-indexed mount factories.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use crate::{BytesMount, FileMount, HttpMount, Mount, MountError, MountResult};

type FactoryFn = dyn Fn(&Url) -> MountResult<Arc<dyn Mount>> + Send + Sync;

/// Maps URL schemes to mount factories.
///
/// The persistence layer serializes mounts to URLs; on restart the registry
/// turns those URLs back into live mounts.
pub struct MountRegistry {
    factories: RwLock<HashMap<String, Arc<FactoryFn>>>,
}

impl MountRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in mount types registered
    /// (`file`, `mem`, `http`, `https`).
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("file", |url| {
            Ok(Arc::new(FileMount::deserialize(url)?) as Arc<dyn Mount>)
        });
        registry.register("mem", |url| {
            Ok(Arc::new(BytesMount::deserialize(url)?) as Arc<dyn Mount>)
        });
        let http = |url: &Url| Ok(Arc::new(HttpMount::new(url.clone())) as Arc<dyn Mount>);
        registry.register("http", http);
        registry.register("https", http);
        registry
    }

    /// Register a factory for a URL scheme, replacing any previous one.
    pub fn register<F>(&self, scheme: &str, factory: F)
    where
        F: Fn(&Url) -> MountResult<Arc<dyn Mount>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(scheme.to_string(), Arc::new(factory));
    }

    /// Instantiate a mount from its serialized URL form.
    ///
    /// # Errors
    /// Returns `UnrecognizedScheme` if no factory is registered for the URL's
    /// scheme, or the factory's error if reconstruction fails.
    pub fn instantiate(&self, url: &Url) -> MountResult<Arc<dyn Mount>> {
        let factory = self
            .factories
            .read()
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| MountError::UnrecognizedScheme(url.scheme().to_string()))?;
        factory(url)
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let registry = MountRegistry::new();
        let url = Url::parse("gopher://x").unwrap();
        assert!(matches!(
            registry.instantiate(&url),
            Err(MountError::UnrecognizedScheme(s)) if s == "gopher"
        ));
    }

    #[test]
    fn defaults_cover_builtin_schemes() {
        let registry = MountRegistry::with_defaults();
        for url in ["mem:00ff", "http://example.com/shard.data"] {
            let url = Url::parse(url).unwrap();
            assert!(registry.instantiate(&url).is_ok(), "scheme {}", url.scheme());
        }
    }

    #[test]
    fn roundtrip_through_serialized_form() {
        let registry = MountRegistry::with_defaults();
        let mount = BytesMount::new(bytes::Bytes::from_static(b"abc"));
        let url = mount.serialize();
        let restored = registry.instantiate(&url).unwrap();
        assert_eq!(restored.serialize(), url);
    }
}
