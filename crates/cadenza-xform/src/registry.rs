use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::plugin::XformPlugin;

/// Xform plugins in registration order. Registration order breaks priority
/// ties during chain negotiation.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn XformPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a plugin with the same shortname is already present.
    pub fn register(&self, plugin: Arc<dyn XformPlugin>) -> bool {
        let mut plugins = self.plugins.write();
        if plugins
            .iter()
            .any(|existing| existing.shortname() == plugin.shortname())
        {
            warn!(plugin = plugin.shortname(), "xform plugin already registered");
            return false;
        }
        plugins.push(plugin);
        true
    }

    pub fn unregister(&self, shortname: &str) -> Option<Arc<dyn XformPlugin>> {
        let mut plugins = self.plugins.write();
        let idx = plugins
            .iter()
            .position(|plugin| plugin.shortname() == shortname)?;
        Some(plugins.remove(idx))
    }

    pub fn find(&self, shortname: &str) -> Option<Arc<dyn XformPlugin>> {
        self.plugins
            .read()
            .iter()
            .find(|plugin| plugin.shortname() == shortname)
            .cloned()
    }

    pub fn for_each(&self, mut visit: impl FnMut(&Arc<dyn XformPlugin>)) {
        for plugin in self.plugins.read().iter() {
            visit(plugin);
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}
