//! Extension registry with load/unload lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info};

use crate::config::ExtensionsConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::extension::{Capabilities, Extension, ExtensionContext, ModuleLoader, SubRequester};

/// Lifecycle state of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Loaded,
    Unloaded,
}

/// One registered extension.
pub struct LoadedExtension {
    name: String,
    capabilities: Capabilities,
    extension: Arc<dyn Extension>,
    loaded: AtomicBool,
}

impl LoadedExtension {
    fn new(extension: Arc<dyn Extension>) -> Self {
        Self {
            name: extension.name().to_string(),
            capabilities: extension.capabilities(),
            extension,
            loaded: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn extension(&self) -> &Arc<dyn Extension> {
        &self.extension
    }

    pub fn state(&self) -> ExtensionState {
        if self.loaded.load(Ordering::Acquire) {
            ExtensionState::Loaded
        } else {
            ExtensionState::Unloaded
        }
    }
}

/// Ordered set of extensions. Read-only once loading has finished.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<LoadedExtension>,
}

impl ExtensionRegistry {
    /// A registry with no extensions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register already initialised extensions, in order.
    pub fn from_extensions(extensions: Vec<Arc<dyn Extension>>) -> Self {
        Self {
            extensions: extensions.into_iter().map(LoadedExtension::new).collect(),
        }
    }

    /// Resolve and initialise every enabled extension, in order.
    ///
    /// All-or-nothing: if any extension fails, the ones already initialised
    /// by this call are unloaded before the error is returned.
    pub async fn load(
        loader: &dyn ModuleLoader,
        config: &ExtensionsConfig,
        sub_requests: &SubRequester,
    ) -> ProxyResult<Self> {
        let mut registry = Self::empty();

        for name in &config.enabled {
            match Self::load_one(loader, config, name, sub_requests).await {
                Ok(extension) => {
                    info!(
                        extension = %extension.name(),
                        enabled_as = %name,
                        "Extension loaded"
                    );
                    registry.extensions.push(LoadedExtension::new(extension));
                }
                Err(e) => {
                    error!(extension = %name, error = %e, "Extension load failed, rolling back");
                    registry.unload().await;
                    return Err(e);
                }
            }
        }

        Ok(registry)
    }

    async fn load_one(
        loader: &dyn ModuleLoader,
        config: &ExtensionsConfig,
        name: &str,
        sub_requests: &SubRequester,
    ) -> ProxyResult<Arc<dyn Extension>> {
        let module = loader.resolve(&config.path, name)?;
        let ctx = ExtensionContext {
            name: name.to_string(),
            config: Bytes::from(config.raw_config(name)),
            sub_requests: sub_requests.clone(),
        };
        module
            .init(ctx)
            .await
            .map_err(|e| ProxyError::extension_load(name, e))
    }

    /// Call every extension's `on_unload`, in registration order.
    ///
    /// Failures are logged and do not stop the remaining extensions.
    /// Extensions already unloaded are skipped.
    pub async fn unload(&self) {
        for ext in &self.extensions {
            if !ext.loaded.swap(false, Ordering::AcqRel) {
                continue;
            }
            match ext.extension.on_unload().await {
                Ok(()) => info!(extension = %ext.name, "Extension unloaded"),
                Err(e) => error!(extension = %ext.name, error = %e, "Extension unload failed"),
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedExtension> {
        self.extensions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
