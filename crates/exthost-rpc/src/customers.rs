//! Main-side objects bound to one extension host channel.
//! - Customer: disposable capability surface
//! - NamedCustomer: customer that also answers requests for an identifier
//! - CustomerContext: what a customer receives at construction
//! - CustomerRegistry: explicit table of factories, built by the embedder

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::error::RpcError;
use crate::protocol::ProxyIdentifier;
use crate::responsive::ResponsiveState;
use crate::rpc::{RpcHandler, RpcProtocol, RpcProxy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{customer}: {message}")]
pub struct CustomerError {
    pub customer: String,
    pub message: String,
}

impl CustomerError {
    pub fn new(customer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            message: message.into(),
        }
    }
}

pub trait Customer: Send + Sync {
    fn name(&self) -> &str;

    fn dispose(&self) -> Result<(), CustomerError> {
        Ok(())
    }
}

pub trait NamedCustomer: Customer + RpcHandler {}

impl<T: Customer + RpcHandler> NamedCustomer for T {}

/// Channel access handed to each customer factory.
#[derive(Clone)]
pub struct CustomerContext {
    rpc: RpcProtocol,
    remote_authority: Option<String>,
    extension_host_kind: String,
}

impl CustomerContext {
    #[must_use]
    pub fn new(
        rpc: RpcProtocol,
        remote_authority: Option<String>,
        extension_host_kind: impl Into<String>,
    ) -> Self {
        Self {
            rpc,
            remote_authority,
            extension_host_kind: extension_host_kind.into(),
        }
    }

    #[must_use]
    pub fn remote_authority(&self) -> Option<&str> {
        self.remote_authority.as_deref()
    }

    #[must_use]
    pub fn extension_host_kind(&self) -> &str {
        &self.extension_host_kind
    }

    #[must_use]
    pub fn get_proxy(&self, id: ProxyIdentifier) -> RpcProxy {
        self.rpc.get_proxy(id)
    }

    pub fn set(&self, id: ProxyIdentifier, handler: Arc<dyn RpcHandler>) {
        self.rpc.set(id, handler);
    }

    pub fn assert_registered(&self, ids: &[ProxyIdentifier]) -> Result<(), RpcError> {
        self.rpc.assert_registered(ids)
    }

    pub async fn drain(&self) {
        self.rpc.drain().await;
    }

    pub fn subscribe_responsive_state(&self) -> watch::Receiver<ResponsiveState> {
        self.rpc.subscribe_responsive_state()
    }

    #[must_use]
    pub fn rpc(&self) -> &RpcProtocol {
        &self.rpc
    }
}

type CustomerFactory =
    Arc<dyn Fn(&CustomerContext) -> Result<Arc<dyn Customer>, CustomerError> + Send + Sync>;

/// Factories run once per extension host, in registration order.
#[derive(Clone, Default)]
pub struct CustomerRegistry {
    named: Vec<(ProxyIdentifier, CustomerFactory)>,
    plain: Vec<CustomerFactory>,
}

impl CustomerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a customer that also answers requests addressed to `id`.
    #[must_use]
    pub fn with_named<C, F>(mut self, id: ProxyIdentifier, factory: F) -> Self
    where
        C: NamedCustomer + 'static,
        F: Fn(&CustomerContext) -> Result<Arc<C>, CustomerError> + Send + Sync + 'static,
    {
        let factory: CustomerFactory = Arc::new(move |context: &CustomerContext| {
            let instance = factory(context)?;
            context.set(id, instance.clone());
            Ok(instance as Arc<dyn Customer>)
        });
        self.named.push((id, factory));
        self
    }

    #[must_use]
    pub fn with_customer<C, F>(mut self, factory: F) -> Self
    where
        C: Customer + 'static,
        F: Fn(&CustomerContext) -> Result<Arc<C>, CustomerError> + Send + Sync + 'static,
    {
        self.plain.push(Arc::new(move |context: &CustomerContext| {
            Ok(factory(context)? as Arc<dyn Customer>)
        }));
        self
    }

    /// Identifiers that named customers register.
    #[must_use]
    pub fn named_ids(&self) -> Vec<ProxyIdentifier> {
        self.named.iter().map(|(id, _)| *id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.named.len() + self.plain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every factory against `context`, named customers first.
    ///
    /// A failing factory is logged and skipped; a named customer that is
    /// missing as a result shows up in the caller's registration check.
    pub fn instantiate(&self, context: &CustomerContext) -> Vec<Arc<dyn Customer>> {
        let mut customers = Vec::with_capacity(self.len());
        for (id, factory) in &self.named {
            match factory(context) {
                Ok(customer) => customers.push(customer),
                Err(err) => error!("Cannot instantiate named customer: '{}': {err}", id.sid),
            }
        }
        for factory in &self.plain {
            match factory(context) {
                Ok(customer) => customers.push(customer),
                Err(err) => error!("Cannot instantiate customer: {err}"),
            }
        }
        customers
    }
}

/// Disposes every customer, logging failures instead of stopping at the first one.
pub fn dispose_all(customers: &[Arc<dyn Customer>]) {
    for customer in customers {
        if let Err(err) = customer.dispose() {
            warn!("failed to dispose customer {}: {err}", customer.name());
        }
    }
}
