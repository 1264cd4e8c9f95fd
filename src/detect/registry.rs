use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Registry of detector backends available to this process.
///
/// The pipeline owns exactly one backend for the lifetime of a run, so the
/// selected backend is moved out with [`BackendRegistry::take`].
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Move a backend out of the registry.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let backend = self.backends.remove(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        if self.default_name.as_deref() == Some(name) {
            self.default_name = self.backends.keys().next().cloned();
        }
        Ok(backend)
    }

    /// Move the default backend out of the registry.
    pub fn take_default(&mut self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.take(&name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{CpuBackend, ScriptedBackend};

    #[test]
    fn first_registered_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::default());
        registry.register(ScriptedBackend::default());
        assert_eq!(registry.default_name(), Some("cpu"));
        assert_eq!(registry.list(), vec!["cpu".to_string(), "scripted".to_string()]);

        registry.set_default("scripted")?;
        let backend = registry.take_default()?;
        assert_eq!(backend.name(), "scripted");
        assert_eq!(registry.default_name(), Some("cpu"));
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut registry = BackendRegistry::new();
        assert!(registry.set_default("tract").is_err());
        assert!(registry.take_default().is_err());
        registry.register(CpuBackend::default());
        let err = registry.take("tract").err().unwrap();
        assert!(err.to_string().contains("available: cpu"));
    }
}
