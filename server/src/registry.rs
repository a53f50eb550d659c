//! Service registry: the installed request handlers, indexed by tag and port.
//!
//! Registration happens before the host starts; afterwards the registry is
//! treated as read-only and lookups take the shared side of the lock.

use futures_util::future::BoxFuture;
use shared::{Request, ServiceTag};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Error text produced by a handler; becomes the `error` field of the reply.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(text: impl Into<String>) -> HandlerError {
        HandlerError(text.into())
    }
}

pub type HandlerResult = Result<Vec<u8>, HandlerError>;

/// The per-service callback contract invoked by the host.
///
/// Implementations must be safe for concurrent invocation and must not touch
/// the registry. The host applies the per-request deadline around `handle`,
/// so a handler that awaits is cancelled when the deadline expires.
pub trait Service: Send + Sync {
    fn tag(&self) -> ServiceTag;
    fn port(&self) -> u16;
    fn handle<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, HandlerResult>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service {0} is already registered")]
    DuplicateTag(ServiceTag),
    #[error("port {0} is already bound to service {1}")]
    DuplicatePort(u16, ServiceTag),
}

#[derive(Default)]
struct RegistryInner {
    by_tag: HashMap<ServiceTag, Arc<dyn Service>>,
    by_port: HashMap<u16, ServiceTag>,
}

#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new() -> ServiceRegistry {
        ServiceRegistry::default()
    }

    /// Installs a handler. Tag and port uniqueness are checked under a single
    /// write-lock acquisition, so concurrent registrations cannot race past
    /// each other.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let tag = service.tag();
        let port = service.port();

        if inner.by_tag.contains_key(&tag) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        if let Some(owner) = inner.by_port.get(&port) {
            return Err(RegistryError::DuplicatePort(port, *owner));
        }

        inner.by_port.insert(port, tag);
        inner.by_tag.insert(tag, service);
        Ok(())
    }

    pub fn lookup_by_tag(&self, tag: ServiceTag) -> Option<Arc<dyn Service>> {
        self.read().by_tag.get(&tag).cloned()
    }

    pub fn lookup_by_port(&self, port: u16) -> Option<Arc<dyn Service>> {
        let inner = self.read();
        let tag = inner.by_port.get(&port)?;
        inner.by_tag.get(tag).cloned()
    }

    /// Installed tags in a stable order.
    pub fn list_tags(&self) -> Vec<ServiceTag> {
        let mut tags: Vec<ServiceTag> = self.read().by_tag.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub fn port_of(&self, tag: ServiceTag) -> Option<u16> {
        self.read().by_tag.get(&tag).map(|service| service.port())
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
