//! Per-request context passed down the middleware pipeline.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::http::Request;

/// Values attached to a request by earlier middleware, one per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|value| *value)
    }
}

/// A request together with its peer address and extensions.
#[derive(Debug)]
pub struct Context {
    request: Request,
    peer_addr: Option<SocketAddr>,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            peer_addr: None,
            extensions: Extensions::new(),
        }
    }

    /// Records the address of the connected client.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UserId(u32);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::new();
        assert_eq!(ext.insert(UserId(1)), None);
        assert_eq!(ext.insert(UserId(2)), Some(UserId(1)));
        ext.insert("label");

        assert_eq!(ext.get::<UserId>(), Some(&UserId(2)));
        assert_eq!(ext.get::<&str>(), Some(&"label"));

        if let Some(id) = ext.get_mut::<UserId>() {
            id.0 = 3;
        }
        assert_eq!(ext.remove::<UserId>(), Some(UserId(3)));
        assert_eq!(ext.get::<UserId>(), None);
    }

    #[test]
    fn context_carries_peer_address() {
        let (request, _) = Request::parse(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        let addr: SocketAddr = "10.0.0.7:5100".parse().unwrap();

        let ctx = Context::new(request).with_peer_addr(addr);
        assert_eq!(ctx.peer_addr(), Some(addr));
        assert_eq!(ctx.request().host(), Some("a"));
    }
}
