//! In-process module table and loader composition.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ExtensionFailure, ProxyError, ProxyResult};
use crate::extension::esi::EsiModule;
use crate::extension::{Extension, ExtensionContext, ExtensionModule, ModuleLoader};

/// Modules compiled into the binary, looked up by name.
#[derive(Default, Clone)]
pub struct BuiltinLoader {
    modules: HashMap<String, Arc<dyn ExtensionModule>>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader preloaded with the modules shipped in this crate.
    pub fn with_defaults() -> Self {
        let mut loader = Self::new();
        loader.register(EsiModule::NAME, Arc::new(EsiModule));
        loader
    }

    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn ExtensionModule>) {
        self.modules.insert(name.into(), module);
    }

    /// Register a module from an init closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, init: F)
    where
        F: Fn(ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnModule(init)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

impl ModuleLoader for BuiltinLoader {
    fn resolve(&self, _dir: &Path, name: &str) -> ProxyResult<Arc<dyn ExtensionModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::extension_load(name, "no built-in module with this name"))
    }
}

struct FnModule<F>(F);

#[async_trait]
impl<F> ExtensionModule for FnModule<F>
where
    F: Fn(ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure> + Send + Sync + 'static,
{
    async fn init(&self, ctx: ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure> {
        (self.0)(ctx)
    }
}

/// Tries each loader in turn; the first that resolves the name wins.
pub struct LoaderChain {
    loaders: Vec<Box<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new(loaders: Vec<Box<dyn ModuleLoader>>) -> Self {
        Self { loaders }
    }
}

impl ModuleLoader for LoaderChain {
    fn resolve(&self, dir: &Path, name: &str) -> ProxyResult<Arc<dyn ExtensionModule>> {
        let mut reasons = Vec::new();
        for loader in &self.loaders {
            match loader.resolve(dir, name) {
                Ok(module) => return Ok(module),
                Err(ProxyError::ExtensionLoad { reason, .. }) => reasons.push(reason),
                Err(other) => return Err(other),
            }
        }
        Err(ProxyError::extension_load(
            name,
            if reasons.is_empty() {
                "no module loaders configured".to_string()
            } else {
                reasons.join("; ")
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::DylibLoader;

    #[test]
    fn defaults_include_esi() {
        assert!(BuiltinLoader::with_defaults().contains("esi"));
    }

    #[test]
    fn chain_reports_every_reason() {
        let chain = LoaderChain::new(vec![
            Box::new(BuiltinLoader::new()),
            Box::new(DylibLoader::new()),
        ]);
        let dir = tempfile::tempdir().unwrap();

        let err = chain.resolve(dir.path(), "nothing").err().unwrap();
        let text = err.to_string();
        assert!(text.contains("no built-in module"));
        assert!(text.contains("not found"));
    }

    #[test]
    fn chain_prefers_first_match() {
        let chain = LoaderChain::new(vec![
            Box::new(BuiltinLoader::with_defaults()),
            Box::new(DylibLoader::new()),
        ]);
        assert!(chain.resolve(Path::new("/nonexistent"), "esi").is_ok());
    }
}
