//! Seam between clients and the RPC method surface built on top of them.
//!
//! A [`StubFactory`] receives the client's identity callbacks ([`StubAuth`])
//! and transport hooks ([`StubHooks`]) and returns the method surface callers
//! use. Generated stubs implement [`RpcStub`]; [`GenericStub`] calls methods
//! by name.

use std::any::Any;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::client::{DestinationClient, PendingResponse};
use crate::error::{PeerError, Result};
use crate::message::RpcRequest;

/// RPC name of the dedicated health probe, also its fixed request id.
pub const HEALTH_RPC: &str = "UserHealth";

/// Identity callbacks handed to a stub.
///
/// Every auth flavor resolves to the client's local public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubAuth {
    destination: String,
    local_pubkey: String,
}

impl StubAuth {
    pub(crate) fn new(destination: &str, local_pubkey: &str) -> Self {
        Self {
            destination: destination.to_string(),
            local_pubkey: local_pubkey.to_string(),
        }
    }

    /// Destination the stub talks to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn user_auth(&self) -> Result<String> {
        Ok(self.local_pubkey.clone())
    }

    pub async fn admin_auth(&self) -> Result<String> {
        Ok(self.local_pubkey.clone())
    }

    pub async fn metrics_auth(&self) -> Result<String> {
        Ok(self.local_pubkey.clone())
    }

    pub async fn guest_with_pub_auth(&self) -> Result<String> {
        Ok(self.local_pubkey.clone())
    }
}

/// Transport hooks a stub calls: the owning client's `send` and `subscribe`.
///
/// Holds the client weakly so stub and client do not keep each other alive.
#[derive(Clone)]
pub struct StubHooks {
    client: Weak<DestinationClient>,
}

impl StubHooks {
    pub(crate) fn new(client: Weak<DestinationClient>) -> Self {
        Self { client }
    }

    /// Issue a single request; see [`DestinationClient::send`].
    pub fn send(&self, to: &str, message: RpcRequest) -> Result<PendingResponse> {
        self.client()?.send(to, message)
    }

    /// Open or replace a stream; see [`DestinationClient::subscribe`].
    pub fn subscribe<F>(&self, to: &str, message: RpcRequest, on_event: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.client()?.subscribe(to, message, on_event)
    }

    fn client(&self) -> Result<Arc<DestinationClient>> {
        self.client
            .upgrade()
            .ok_or_else(|| PeerError::Disconnected("client dropped".to_string()))
    }
}

impl std::fmt::Debug for StubHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubHooks")
            .field("client_alive", &(self.client.strong_count() > 0))
            .finish()
    }
}

/// Method surface wrapped by a client.
pub trait RpcStub: Send + Sync {
    /// Fire the health probe. The reply, if any, only refreshes client health.
    fn request_health(&self) -> Result<()>;

    /// Downcast support for concrete stub types.
    fn as_any(&self) -> &dyn Any;
}

/// Builds the stub for each new client.
pub trait StubFactory: Send + Sync {
    fn build(&self, auth: StubAuth, hooks: StubHooks) -> Arc<dyn RpcStub>;
}

/// Stub that calls any method by name.
#[derive(Debug, Clone)]
pub struct GenericStub {
    auth: StubAuth,
    hooks: StubHooks,
}

impl GenericStub {
    pub fn new(auth: StubAuth, hooks: StubHooks) -> Self {
        Self { auth, hooks }
    }

    /// Call `rpc_name` and wait for its reply.
    pub async fn call(&self, rpc_name: &str, body: Option<Value>) -> Result<Value> {
        let request = self.request(rpc_name, body, self.auth.user_auth().await?);
        self.hooks.send(self.auth.destination(), request)?.await
    }

    /// Subscribe to pushes of `rpc_name`.
    pub async fn subscribe<F>(&self, rpc_name: &str, body: Option<Value>, on_event: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let request = self.request(rpc_name, body, self.auth.user_auth().await?);
        self.hooks.subscribe(self.auth.destination(), request, on_event)
    }

    /// Auth callbacks this stub was built with.
    pub fn auth(&self) -> &StubAuth {
        &self.auth
    }

    fn request(&self, rpc_name: &str, body: Option<Value>, auth: String) -> RpcRequest {
        RpcRequest {
            body,
            auth_identifier: Some(auth),
            ..RpcRequest::new(rpc_name)
        }
    }
}

impl RpcStub for GenericStub {
    fn request_health(&self) -> Result<()> {
        let request = self
            .request(HEALTH_RPC, None, self.auth.local_pubkey.clone())
            .with_request_id(HEALTH_RPC);
        // The probe's answer lands through on_event; nobody awaits it here.
        self.hooks.send(self.auth.destination(), request).map(drop)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory producing [`GenericStub`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericStubFactory;

impl StubFactory for GenericStubFactory {
    fn build(&self, auth: StubAuth, hooks: StubHooks) -> Arc<dyn RpcStub> {
        Arc::new(GenericStub::new(auth, hooks))
    }
}
