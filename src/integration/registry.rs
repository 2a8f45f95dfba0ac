use super::{Connector, ConnectorKind};
use crate::config::gateway::GatewayConfig;
use crate::error::{Context as _, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Statically known set of connectors the scheduler fans requests out to.
///
/// The built-in variants are installed by [`ConnectorRegistry::builtin`]; `register` is the single
/// hook for installing a replacement implementation during start-up.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin(connectors: impl IntoIterator<Item = Arc<dyn Connector>>) -> Self {
        let mut registry = Self::new();
        for connector in connectors {
            registry.register(connector);
        }
        registry
    }

    /// Installs a connector, replacing any previous connector of the same kind.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Option<Arc<dyn Connector>> {
        let kind = connector.kind();
        match self.connectors.iter().position(|existing| existing.kind() == kind) {
            Some(index) => Some(std::mem::replace(&mut self.connectors[index], connector)),
            None => {
                self.connectors.push(connector);
                None
            }
        }
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    pub fn kinds(&self) -> BTreeSet<ConnectorKind> {
        self.connectors.iter().map(|connector| connector.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Checks that every service kind referenced by the gateway has a connector.
    pub fn ensure_covers(&self, config: &GatewayConfig) -> Result<(), ConnectorRegistryError> {
        let available = self.kinds();
        for (path, methods) in &config.http.routes {
            for (method, route) in methods {
                for (name, service) in &route.services {
                    let kind = ConnectorKind::of(service);
                    if !available.contains(&kind) {
                        return Err(ConnectorRegistryError::Missing {
                            route: format!("{method} {path}"),
                            service: name.clone(),
                            kind,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn init_all(&self, config: &GatewayConfig) -> Result<()> {
        self.ensure_covers(config)
            .map_err(|err| crate::err!("{err}"))?;
        for connector in &self.connectors {
            connector
                .init(config)
                .await
                .with_context(|| format!("failed to initialise `{}` connector", connector.kind()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConnectorRegistryError {
    #[error("route `{route}` service `{service}` needs a `{kind}` connector but none is registered")]
    Missing {
        route: String,
        service: String,
        kind: ConnectorKind,
    },
}
