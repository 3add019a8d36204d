//! User packet handlers and their dispatch.
//!
//! Handlers are registered either against a concrete [`PacketKind`] or
//! against a version-independent [`PacketPath`]. Path registrations are
//! resolved once per session, as soon as the Handshake has selected a
//! protocol version.

use crate::{
    entity::{Entity, EntityRef, EntityTracker},
    protocol::{descriptor::ProtocolDescriptor, packet::Packet, Direction, PacketKind, PacketPath},
};
use ahash::AHashMap;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// What a handler wants done with the packet it was shown.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// No opinion; forward whatever the chain has produced so far.
    Pass,
    /// Replace the packet.
    Rewrite(Packet),
    /// Forward nothing.
    Drop,
}

pub type Handler =
    Arc<dyn Fn(&Packet, &mut HandlerContext<'_>) -> anyhow::Result<Verdict> + Send + Sync>;

/// Session state visible to a handler while it runs.
pub struct HandlerContext<'a> {
    direction: Direction,
    version: i32,
    entities: &'a EntityTracker,
    injected: &'a mut Vec<Packet>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        direction: Direction,
        version: i32,
        entities: &'a EntityTracker,
        injected: &'a mut Vec<Packet>,
    ) -> Self {
        Self {
            direction,
            version,
            entities,
            injected,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Protocol version of the session.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn entities(&self) -> &EntityTracker {
        self.entities
    }

    /// Looks up the tracked entity an entity id field refers to.
    pub fn entity(&self, entity: EntityRef) -> Option<&Entity> {
        match entity {
            EntityRef::Tracked(handle) => self.entities.resolve(handle),
            EntityRef::Raw(_) => None,
        }
    }

    /// Schedules an extra packet. Packets travelling in the direction being
    /// processed go out right after the current one; the others are queued
    /// on the session.
    pub fn inject(&mut self, packet: Packet) {
        self.injected.push(packet);
    }
}

/// Where a handler is registered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketTarget {
    Kind(PacketKind),
    Path(PacketPath),
}

impl From<PacketKind> for PacketTarget {
    fn from(kind: PacketKind) -> Self {
        PacketTarget::Kind(kind)
    }
}

impl From<PacketPath> for PacketTarget {
    fn from(path: PacketPath) -> Self {
        PacketTarget::Path(path)
    }
}

impl<const N: usize> From<[&str; N]> for PacketTarget {
    fn from(segments: [&str; N]) -> Self {
        PacketTarget::Path(segments.into())
    }
}

/// Handlers keyed by registration sequence number, so that merging entries
/// preserves overall registration order.
type Chain = Vec<(u64, Handler)>;

#[derive(Clone, Default)]
pub struct HandlerEntry {
    resolved_from_relative: bool,
    handlers: Chain,
}

impl HandlerEntry {
    pub fn is_resolved_from_relative(&self) -> bool {
        self.resolved_from_relative
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Clone)]
struct RelativeHandlerEntry {
    path: PacketPath,
    handlers: Chain,
}

/// Outcome of running a packet through its handler chain.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// Every handler passed (or there were none).
    NoRewrite,
    Rewritten(Packet),
    Dropped,
}

/// Handler registrations. The proxy keeps one as a template; every session
/// works on its own copy.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    concrete: AHashMap<PacketKind, HandlerEntry>,
    relative: Vec<RelativeHandlerEntry>,
    next_sequence: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, target: impl Into<PacketTarget>, handler: F)
    where
        F: Fn(&Packet, &mut HandlerContext<'_>) -> anyhow::Result<Verdict> + Send + Sync + 'static,
    {
        self.register_handler(target, Arc::new(handler));
    }

    pub fn register_handler(&mut self, target: impl Into<PacketTarget>, handler: Handler) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        match target.into() {
            PacketTarget::Kind(kind) => self
                .concrete
                .entry(kind)
                .or_default()
                .handlers
                .push((sequence, handler)),
            PacketTarget::Path(path) => {
                match self.relative.iter_mut().find(|entry| entry.path == path) {
                    Some(entry) => entry.handlers.push((sequence, handler)),
                    None => self.relative.push(RelativeHandlerEntry {
                        path,
                        handlers: vec![(sequence, handler)],
                    }),
                }
            }
        }
    }

    pub fn entry(&self, kind: PacketKind) -> Option<&HandlerEntry> {
        self.concrete.get(&kind)
    }

    /// Number of path registrations still waiting for a protocol version.
    pub fn pending_relative(&self) -> usize {
        self.relative.len()
    }

    /// Resolves every path registration against `descriptor` and merges it
    /// into the concrete table. Paths that do not resolve are logged and
    /// dropped. Returns how many paths resolved.
    pub fn resolve_relative(&mut self, descriptor: &dyn ProtocolDescriptor) -> usize {
        let mut resolved = 0;
        for RelativeHandlerEntry { path, handlers } in std::mem::take(&mut self.relative) {
            match descriptor.resolve_path(&path) {
                Ok(kind) => {
                    let entry = self.concrete.entry(kind).or_default();
                    entry.resolved_from_relative = true;
                    entry.handlers.extend(handlers);
                    entry.handlers.sort_by_key(|(sequence, _)| *sequence);
                    resolved += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} handler(s) for {path} on protocol {}: {e}",
                        handlers.len(),
                        descriptor.version()
                    );
                }
            }
        }
        resolved
    }

    /// Runs the handlers registered for the packet's kind in registration
    /// order. Each sees the packet as rewritten by the handlers before it;
    /// the last handler to rewrite or drop decides the outcome.
    ///
    /// A handler that errors or panics is logged and treated as passing.
    pub fn dispatch(&self, packet: &Packet, context: &mut HandlerContext<'_>) -> Dispatch {
        let Some(entry) = self.concrete.get(&packet.kind) else {
            return Dispatch::NoRewrite;
        };

        // latest rewrite, still handed on after a drop
        let mut rewritten: Option<Packet> = None;
        let mut dropped = false;
        for (sequence, handler) in &entry.handlers {
            let current = rewritten.as_ref().unwrap_or(packet);
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(current, context)));
            match result {
                Ok(Ok(Verdict::Pass)) => {}
                Ok(Ok(Verdict::Rewrite(packet))) => {
                    rewritten = Some(packet);
                    dropped = false;
                }
                Ok(Ok(Verdict::Drop)) => dropped = true,
                Ok(Err(e)) => {
                    tracing::warn!("Handler #{sequence} failed on {}: {e:?}", packet.kind);
                }
                Err(_) => {
                    tracing::warn!("Handler #{sequence} panicked on {}", packet.kind);
                }
            }
        }
        match rewritten {
            _ if dropped => Dispatch::Dropped,
            Some(packet) => Dispatch::Rewritten(packet),
            None => Dispatch::NoRewrite,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("concrete", &self.concrete.len())
            .field(
                "relative",
                &self.relative.iter().map(|e| &e.path).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        packet::{Opaque, PacketData, ServerboundChat},
        v47, ProtocolPhase,
    };
    use std::sync::Mutex;

    const CHAT: PacketKind = PacketKind::new(Direction::Serverbound, ProtocolPhase::Play, 0x01);

    fn chat(message: &str) -> Packet {
        Packet::new(
            CHAT,
            ServerboundChat {
                message: message.into(),
            },
        )
    }

    fn message(packet: &Packet) -> &str {
        match &packet.data {
            PacketData::ServerboundChat(chat) => &chat.message,
            _ => "",
        }
    }

    fn run(registry: &HandlerRegistry, packet: &Packet) -> (Dispatch, Vec<Packet>) {
        let tracker = EntityTracker::new();
        let mut injected = Vec::new();
        let mut context = HandlerContext::new(Direction::Serverbound, 47, &tracker, &mut injected);
        let dispatch = registry.dispatch(packet, &mut context);
        (dispatch, injected)
    }

    #[test]
    fn chain_sees_earlier_rewrites_and_last_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |packet, _| {
            Ok(Verdict::Rewrite(chat(&format!("{}!", message(packet)))))
        });
        registry.register(CHAT, |_, _| Ok(Verdict::Pass));
        registry.register(CHAT, |packet, _| {
            Ok(Verdict::Rewrite(chat(&format!("{}?", message(packet)))))
        });

        let (dispatch, _) = run(&registry, &chat("hi"));
        assert_eq!(dispatch, Dispatch::Rewritten(chat("hi!?")));
    }

    #[test]
    fn drop_then_rewrite() {
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |_, _| Ok(Verdict::Drop));
        assert_eq!(run(&registry, &chat("x")).0, Dispatch::Dropped);

        registry.register(CHAT, |_, _| Ok(Verdict::Rewrite(chat("y"))));
        assert_eq!(run(&registry, &chat("x")).0, Dispatch::Rewritten(chat("y")));
    }

    #[test]
    fn drop_keeps_the_latest_rewrite_for_later_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |_, _| Ok(Verdict::Rewrite(chat("a"))));
        registry.register(CHAT, |_, _| Ok(Verdict::Drop));
        registry.register(CHAT, {
            let seen = seen.clone();
            move |packet, _| {
                seen.lock().unwrap().push(message(packet).to_owned());
                Ok(Verdict::Pass)
            }
        });
        assert_eq!(run(&registry, &chat("x")).0, Dispatch::Dropped);

        registry.register(CHAT, |packet, _| {
            Ok(Verdict::Rewrite(chat(&format!("{}!", message(packet)))))
        });
        assert_eq!(run(&registry, &chat("x")).0, Dispatch::Rewritten(chat("a!")));
        assert_eq!(*seen.lock().unwrap(), ["a", "a"]);
    }

    #[test]
    fn faults_fail_open() {
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |_, _| Ok(Verdict::Rewrite(chat("kept"))));
        registry.register(CHAT, |_, _| anyhow::bail!("boom"));
        registry.register(CHAT, |_, _| panic!("handler panic"));

        assert_eq!(run(&registry, &chat("x")).0, Dispatch::Rewritten(chat("kept")));
    }

    #[test]
    fn unrelated_kinds_are_untouched() {
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |_, _| Ok(Verdict::Drop));
        let other = Packet::new(
            PacketKind::new(Direction::Serverbound, ProtocolPhase::Play, 0x00),
            Opaque { data: vec![1] },
        );
        assert_eq!(run(&registry, &other).0, Dispatch::NoRewrite);
    }

    #[test]
    fn handlers_can_inject() {
        let mut registry = HandlerRegistry::new();
        registry.register(CHAT, |_, context| {
            context.inject(chat("echo"));
            Ok(Verdict::Pass)
        });
        let (dispatch, injected) = run(&registry, &chat("x"));
        assert_eq!(dispatch, Dispatch::NoRewrite);
        assert_eq!(injected, [chat("echo")]);
    }

    #[test]
    fn relative_resolution_keeps_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for (label, target) in [
            ("relative", PacketTarget::from(["ServerBound", "Play", "ChatMessage"])),
            ("bogus", PacketTarget::from(["ServerBound", "Play", "NoSuchPacket"])),
            ("concrete", PacketTarget::from(CHAT)),
            ("relative again", PacketTarget::from(["ServerBound", "Play", "ChatMessage"])),
        ] {
            let order = order.clone();
            registry.register(target, move |_, _| {
                order.lock().unwrap().push(label);
                Ok(Verdict::Pass)
            });
        }
        assert_eq!(registry.pending_relative(), 2);

        let resolved = registry.resolve_relative(&v47::descriptor());
        assert_eq!(resolved, 1);
        assert_eq!(registry.pending_relative(), 0);
        let entry = registry.entry(CHAT).unwrap();
        assert!(entry.is_resolved_from_relative());
        assert_eq!(entry.len(), 3);

        run(&registry, &chat("x"));
        assert_eq!(
            *order.lock().unwrap(),
            ["relative", "concrete", "relative again"]
        );
    }

    #[test]
    fn template_copies_are_independent() {
        let mut template = HandlerRegistry::new();
        template.register(["ServerBound", "Play", "ChatMessage"], |_, _| Ok(Verdict::Drop));

        let mut session = template.clone();
        session.resolve_relative(&v47::descriptor());
        assert!(session.entry(CHAT).is_some());
        assert_eq!(template.pending_relative(), 1);
        assert!(template.entry(CHAT).is_none());
    }
}
