//! Proxy-wide configuration and the collaborator traits sessions call into.

use crate::{
    handler::{HandlerContext, HandlerRegistry, PacketTarget, Verdict},
    protocol::{
        descriptor::VersionRegistry,
        packet::{EncryptionRequest, EncryptionResponse, Packet},
    },
    session::Session,
};
use std::{fmt, sync::Arc};

/// Result of letting a [`Decryptor`] see an Encryption Response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedResponse {
    /// The shared secret in the clear; seeds the session cipher.
    pub plain_secret: Vec<u8>,
    /// What is actually forwarded to the server.
    pub response: EncryptionResponse,
}

/// Lets the proxy take part in the login key exchange, typically by
/// substituting its own key pair for the server's.
///
/// Without one, encrypted connections are relayed without being decoded.
pub trait Decryptor: Send {
    fn on_encryption_request(&mut self, request: &EncryptionRequest) -> EncryptionRequest {
        request.clone()
    }

    fn on_encryption_response(
        &mut self,
        response: &EncryptionResponse,
    ) -> anyhow::Result<DecryptedResponse>;
}

/// How dispatch changed a packet.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Rewrite<'a> {
    /// Forwarded unchanged.
    None,
    Packet(&'a Packet),
    Dropped,
}

/// Per-session callbacks. All methods default to doing nothing.
pub trait SessionObserver: Send {
    fn on_session_start(&mut self) {}

    fn on_clientbound(&mut self, _packet: &Packet) {}

    fn on_serverbound(&mut self, _packet: &Packet) {}

    fn on_rewrite(&mut self, _original: &Packet, _rewritten: Rewrite<'_>) {}
}

type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// Shared, read-only state from which every connection's [`Session`] is made.
#[derive(Clone)]
pub struct Proxy {
    handlers: HandlerRegistry,
    versions: Arc<VersionRegistry>,
    decryptor: Option<Factory<dyn Decryptor>>,
    observer: Option<Factory<dyn SessionObserver>>,
}

impl Proxy {
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder::default()
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    /// Creates the session for a new connection, with its own copy of the
    /// handler template.
    pub fn session(&self) -> Session {
        let mut session = Session::new(self.handlers.clone(), self.versions.clone());
        if let Some(decryptor) = &self.decryptor {
            session = session.with_decryptor(decryptor());
        }
        if let Some(observer) = &self.observer {
            session = session.with_observer(observer());
        }
        session
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("handlers", &self.handlers)
            .field("versions", &self.versions)
            .field("decryptor", &self.decryptor.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

pub struct ProxyBuilder {
    handlers: HandlerRegistry,
    versions: VersionRegistry,
    decryptor: Option<Factory<dyn Decryptor>>,
    observer: Option<Factory<dyn SessionObserver>>,
}

impl Default for ProxyBuilder {
    fn default() -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            versions: VersionRegistry::builtin(),
            decryptor: None,
            observer: None,
        }
    }
}

impl ProxyBuilder {
    /// Registers a handler against a packet kind or a `[direction, phase, name]` path.
    pub fn handler<F>(mut self, target: impl Into<PacketTarget>, handler: F) -> Self
    where
        F: Fn(&Packet, &mut HandlerContext<'_>) -> anyhow::Result<Verdict> + Send + Sync + 'static,
    {
        self.handlers.register(target, handler);
        self
    }

    /// Replaces the built-in version registry.
    pub fn versions(mut self, versions: VersionRegistry) -> Self {
        self.versions = versions;
        self
    }

    pub fn decryptor<F, D>(mut self, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Decryptor + 'static,
    {
        self.decryptor = Some(Arc::new(move || Box::new(factory()) as Box<dyn Decryptor>));
        self
    }

    pub fn observer<F, O>(mut self, factory: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: SessionObserver + 'static,
    {
        self.observer = Some(Arc::new(move || {
            Box::new(factory()) as Box<dyn SessionObserver>
        }));
        self
    }

    pub fn build(self) -> Proxy {
        Proxy {
            handlers: self.handlers,
            versions: Arc::new(self.versions),
            decryptor: self.decryptor,
            observer: self.observer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Decryptor for Echo {
        fn on_encryption_response(
            &mut self,
            response: &EncryptionResponse,
        ) -> anyhow::Result<DecryptedResponse> {
            Ok(DecryptedResponse {
                plain_secret: response.shared_secret.clone(),
                response: response.clone(),
            })
        }
    }

    #[test]
    fn decryptor_defaults_and_results() {
        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: vec![1, 2],
            verify_token: vec![3],
        };
        assert_eq!(Echo.on_encryption_request(&request), request);

        let response = EncryptionResponse {
            shared_secret: vec![7; 16],
            verify_token: vec![3],
        };
        let decrypted = Echo.on_encryption_response(&response).unwrap();
        assert_eq!(
            decrypted,
            DecryptedResponse {
                plain_secret: vec![7; 16],
                response,
            }
        );
    }

    #[test]
    fn sessions_get_their_own_handler_copy() {
        let proxy = Proxy::builder()
            .handler(["ClientBound", "Play", "ChatMessage"], |_, _| Ok(Verdict::Pass))
            .decryptor(|| Echo)
            .build();
        let first = proxy.session();
        let second = proxy.session();
        assert_eq!(first.handlers().pending_relative(), 1);
        assert_eq!(second.handlers().pending_relative(), 1);
        assert_eq!(proxy.versions().versions().collect::<Vec<_>>(), [47]);
    }
}
