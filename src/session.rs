//! The per-connection protocol engine.
//!
//! A [`Session`] performs no I/O. The substrate hands it the bytes read from
//! either socket and forwards whatever [`Session::on_inbound`] returns.

use crate::{
    entity::EntityTracker,
    handler::{Dispatch, HandlerContext, HandlerRegistry},
    journal::Journal,
    protocol::{
        cipher::CipherComplex,
        descriptor::{ProtocolDescriptor, VersionRegistry},
        frame::{self, CompressionThreshold, FrameBuffer, StreamViolation},
        packet::{Handshake, NextState, Packet, PacketData},
        Decode, DecodeError, Decoder, Direction, ProtocolPhase,
    },
    proxy::{Decryptor, Rewrite, SessionObserver},
};
use std::{fmt, sync::Arc};

/// First byte of the pre-Netty server list ping, sent instead of a Handshake.
const LEGACY_PROBE: u8 = 0xfe;

pub struct Session {
    phase: ProtocolPhase,
    compression: Option<CompressionThreshold>,
    cipher: Option<CipherComplex>,
    pass_through: bool,
    terminated: bool,
    descriptor: Option<Arc<dyn ProtocolDescriptor>>,
    versions: Arc<VersionRegistry>,
    handlers: HandlerRegistry,
    tracker: EntityTracker,
    /// Inbound accumulators, indexed by [`Direction::index`].
    buffers: [FrameBuffer; 2],
    /// Injected packets waiting for [`Session::take_injected`].
    pending: [Vec<Packet>; 2],
    decryptor: Option<Box<dyn Decryptor>>,
    observer: Option<Box<dyn SessionObserver>>,
    journal: Option<Box<dyn Journal>>,
}

impl Session {
    /// `handlers` is this session's own copy; its path registrations are
    /// resolved once the Handshake names a protocol version.
    pub fn new(handlers: HandlerRegistry, versions: Arc<VersionRegistry>) -> Self {
        Self {
            phase: ProtocolPhase::Handshaking,
            compression: None,
            cipher: None,
            pass_through: false,
            terminated: false,
            descriptor: None,
            versions,
            handlers,
            tracker: EntityTracker::new(),
            buffers: Default::default(),
            pending: Default::default(),
            decryptor: None,
            observer: None,
            journal: None,
        }
    }

    pub fn with_decryptor(mut self, decryptor: Box<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Attaches the observer and fires its `on_session_start`.
    pub fn with_observer(mut self, mut observer: Box<dyn SessionObserver>) -> Self {
        observer.on_session_start();
        self.observer = Some(observer);
        self
    }

    pub fn with_journal(mut self, journal: Box<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    /// Current compression threshold in wire form; `-1` when disabled.
    pub fn compression_threshold(&self) -> i32 {
        self.compression
            .map_or(-1, |threshold| threshold.get().try_into().unwrap_or(i32::MAX))
    }

    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn descriptor(&self) -> Option<&dyn ProtocolDescriptor> {
        self.descriptor.as_deref()
    }

    pub fn entities(&self) -> &EntityTracker {
        &self.tracker
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Processes bytes read from the socket that sends in `direction` and
    /// returns the bytes to write to the socket that receives in it. An
    /// empty result means nothing is to be forwarded yet.
    ///
    /// An error means the connection must be closed; every later call fails
    /// with [`StreamViolation::Terminated`].
    pub fn on_inbound(
        &mut self,
        direction: Direction,
        data: &[u8],
    ) -> Result<Vec<u8>, StreamViolation> {
        if self.terminated {
            return Err(StreamViolation::Terminated);
        }
        if let Some(journal) = &mut self.journal {
            match direction {
                Direction::Clientbound => journal.append_clientbound(data),
                Direction::Serverbound => journal.append_serverbound(data),
            }
        }

        let buffer = &mut self.buffers[direction.index()];
        if self.pass_through {
            let mut forward = buffer.take_buffered();
            forward.extend_from_slice(data);
            return Ok(forward);
        }

        match &mut self.cipher {
            Some(cipher) => {
                let mut data = data.to_vec();
                cipher.decrypt_inbound(direction, &mut data);
                buffer.give_data(&data);
            }
            None => buffer.give_data(data),
        }

        self.drain(direction).map_err(|violation| {
            tracing::warn!(
                "Terminating session on {} stream violation: {violation:#}",
                direction.as_ref()
            );
            self.terminated = true;
            violation
        })
    }

    /// Encodes the packets handlers injected for `direction` while processing
    /// the other direction, ready to be written to that direction's socket.
    pub fn take_injected(&mut self, direction: Direction) -> Vec<u8> {
        let packets = std::mem::take(&mut self.pending[direction.index()]);
        let mut out = Vec::new();
        if let Some(descriptor) = self.descriptor.clone() {
            for packet in &packets {
                self.emit(direction, self.compression, &descriptor.encode(packet), &mut out);
            }
        }
        out
    }

    fn drain(&mut self, direction: Direction) -> Result<Vec<u8>, StreamViolation> {
        let mut out = Vec::new();
        loop {
            let buffer = &mut self.buffers[direction.index()];
            if self.pass_through {
                out.extend(buffer.take_buffered());
                return Ok(out);
            }
            if self.phase == ProtocolPhase::Handshaking
                && direction == Direction::Serverbound
                && buffer.buffered().first() == Some(&LEGACY_PROBE)
            {
                tracing::info!("Legacy server list ping, relaying connection verbatim");
                self.pass_through = true;
                continue;
            }

            // One frame at a time: the frame just processed may change the
            // compression threshold, enable the cipher or switch to pass-through,
            // all of which change how the bytes behind it must be read.
            let threshold = self.compression;
            let Some(body) = buffer.decode_frames(threshold, Some(1))?.pop() else {
                return Ok(out);
            };
            self.process_frame(direction, threshold, &body, &mut out)?;
        }
    }

    fn process_frame(
        &mut self,
        direction: Direction,
        threshold: Option<CompressionThreshold>,
        body: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), StreamViolation> {
        if self.phase == ProtocolPhase::Handshaking && direction == Direction::Serverbound {
            let handshake = decode_handshake(body).map_err(|source| StreamViolation::Packet {
                context: "Handshake".to_owned(),
                source,
            })?;
            self.emit(direction, threshold, body, out);
            self.on_handshake(&handshake);
            return Ok(());
        }

        let descriptor = match self.phase {
            ProtocolPhase::Login | ProtocolPhase::Play => self.descriptor.clone(),
            ProtocolPhase::Handshaking | ProtocolPhase::Status => None,
        };
        // Status traffic and anything before the Handshake is relayed as-is.
        let Some(descriptor) = descriptor else {
            self.emit(direction, threshold, body, out);
            return Ok(());
        };

        let packet = descriptor
            .decode(direction, self.phase, body)
            .map_err(|source| StreamViolation::Packet {
                context: format!("{}/{}", direction.as_ref(), self.phase.as_ref()),
                source,
            })?;
        tracing::trace!(
            "{} {}",
            packet.kind,
            descriptor.packet_name(packet.kind).unwrap_or(packet.data.as_ref())
        );
        self.process_packet(&*descriptor, direction, threshold, packet, out);
        Ok(())
    }

    fn on_handshake(&mut self, handshake: &Handshake) {
        match handshake.next_state {
            NextState::Status => {
                tracing::debug!("Handshake requests status");
                self.phase = ProtocolPhase::Status;
            }
            NextState::Login | NextState::Other(_) => {
                self.phase = ProtocolPhase::Login;
                match self.versions.get(handshake.protocol_version) {
                    Ok(descriptor) => {
                        tracing::debug!(
                            "Handshake for protocol {} ({})",
                            descriptor.version(),
                            descriptor.name()
                        );
                        self.handlers.resolve_relative(&*descriptor);
                        self.descriptor = Some(descriptor);
                    }
                    Err(e) => {
                        tracing::warn!("{e}, relaying connection verbatim");
                        self.pass_through = true;
                    }
                }
            }
        }
    }

    fn process_packet(
        &mut self,
        descriptor: &dyn ProtocolDescriptor,
        direction: Direction,
        threshold: Option<CompressionThreshold>,
        packet: Packet,
        out: &mut Vec<u8>,
    ) {
        match (direction, self.phase, &packet.data) {
            (Direction::Clientbound, _, PacketData::SetCompression(set)) => {
                let next = CompressionThreshold::from_wire(set.threshold);
                self.notify(direction, &packet);
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
                tracing::debug!("Compression threshold set to {}", set.threshold);
                self.compression = next;
            }
            (Direction::Clientbound, ProtocolPhase::Login, PacketData::LoginSuccess(success)) => {
                tracing::debug!("Login succeeded for {}", success.username);
                self.notify(direction, &packet);
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
                self.phase = ProtocolPhase::Play;
            }
            (
                Direction::Clientbound,
                ProtocolPhase::Login,
                PacketData::EncryptionRequest(request),
            ) => {
                let replacement = self
                    .decryptor
                    .as_mut()
                    .map(|decryptor| decryptor.on_encryption_request(request));
                let packet = match replacement {
                    Some(request) => packet.with_data(request),
                    None => packet,
                };
                self.notify(direction, &packet);
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
            }
            (
                Direction::Serverbound,
                ProtocolPhase::Login,
                PacketData::EncryptionResponse(_),
            ) if self.cipher.is_none() => {
                self.on_encryption_response(descriptor, threshold, packet, out);
            }
            _ => self.dispatch(descriptor, direction, threshold, packet, out),
        }
    }

    fn on_encryption_response(
        &mut self,
        descriptor: &dyn ProtocolDescriptor,
        threshold: Option<CompressionThreshold>,
        packet: Packet,
        out: &mut Vec<u8>,
    ) {
        let direction = Direction::Serverbound;
        let PacketData::EncryptionResponse(response) = &packet.data else {
            return;
        };
        let established = match &mut self.decryptor {
            Some(decryptor) => decryptor.on_encryption_response(response).and_then(|decrypted| {
                let cipher = CipherComplex::establish(&decrypted.plain_secret)?;
                Ok((decrypted, cipher))
            }),
            None => Err(anyhow::anyhow!("no decryptor configured")),
        };

        match established {
            Ok((decrypted, mut cipher)) => {
                let packet = packet.with_data(decrypted.response);
                self.notify(direction, &packet);
                // the response itself still travels in the clear
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
                if let Some(journal) = &mut self.journal {
                    journal.set_enckey(&decrypted.plain_secret);
                }
                cipher.decrypt_inbound(direction, self.buffers[direction.index()].buffered_mut());
                self.cipher = Some(cipher);
                tracing::debug!("Encryption established");
            }
            Err(e) => {
                tracing::warn!("Cannot decrypt connection ({e:#}), relaying it verbatim");
                self.notify(direction, &packet);
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
                self.pass_through = true;
            }
        }
    }

    /// Entity tracking, then the handler chain.
    fn dispatch(
        &mut self,
        descriptor: &dyn ProtocolDescriptor,
        direction: Direction,
        threshold: Option<CompressionThreshold>,
        packet: Packet,
        out: &mut Vec<u8>,
    ) {
        let packet = self.tracker.observe(descriptor, packet);
        self.notify(direction, &packet);

        let mut injected = Vec::new();
        let mut context =
            HandlerContext::new(direction, descriptor.version(), &self.tracker, &mut injected);
        let dispatch = self.handlers.dispatch(&packet, &mut context);

        match dispatch {
            Dispatch::NoRewrite => {
                if let Some(observer) = &mut self.observer {
                    observer.on_rewrite(&packet, Rewrite::None);
                }
                self.emit(direction, threshold, &descriptor.encode(&packet), out);
            }
            Dispatch::Rewritten(rewritten) => {
                if rewritten != packet {
                    if let Some(observer) = &mut self.observer {
                        observer.on_rewrite(&packet, Rewrite::Packet(&rewritten));
                    }
                }
                self.emit(direction, threshold, &descriptor.encode(&rewritten), out);
            }
            Dispatch::Dropped => {
                if let Some(observer) = &mut self.observer {
                    observer.on_rewrite(&packet, Rewrite::Dropped);
                }
            }
        }

        for extra in injected {
            let target = extra.kind.direction;
            if target == direction {
                self.emit(direction, threshold, &descriptor.encode(&extra), out);
            } else {
                self.pending[target.index()].push(extra);
            }
        }
    }

    fn notify(&mut self, direction: Direction, packet: &Packet) {
        if let Some(observer) = &mut self.observer {
            match direction {
                Direction::Clientbound => observer.on_clientbound(packet),
                Direction::Serverbound => observer.on_serverbound(packet),
            }
        }
    }

    /// Frames `body` and appends it to `out`, encrypting it if the cipher
    /// is active at this point.
    fn emit(
        &mut self,
        direction: Direction,
        threshold: Option<CompressionThreshold>,
        body: &[u8],
        out: &mut Vec<u8>,
    ) {
        let mut frame = frame::encode(body, threshold);
        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt_outbound(direction, &mut frame);
        }
        out.extend_from_slice(&frame);
    }
}

fn decode_handshake(body: &[u8]) -> Result<Handshake, DecodeError> {
    let mut decoder = Decoder::new(body);
    let id = decoder.read_var_int()?;
    if id != 0x00 {
        return Err(DecodeError::InvalidDiscriminant(id.into()));
    }
    let handshake = Handshake::decode(&mut decoder)?;
    decoder.finish()?;
    Ok(handshake)
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("compression", &self.compression)
            .field("encrypted", &self.cipher.is_some())
            .field("pass_through", &self.pass_through)
            .field("terminated", &self.terminated)
            .field("version", &self.descriptor.as_ref().map(|d| d.version()))
            .field("entities", &self.tracker.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{packet::SetCompression, Encode, Encoder, PacketKind};

    fn frame(body: &[u8]) -> Vec<u8> {
        frame::encode(body, None)
    }

    fn handshake(version: i32, next_state: NextState) -> Vec<u8> {
        let mut body = vec![0x00];
        Handshake {
            protocol_version: version,
            server_address: "localhost".into(),
            server_port: 25565,
            next_state,
        }
        .encode(&mut Encoder::new(&mut body));
        frame(&body)
    }

    fn session() -> Session {
        Session::new(HandlerRegistry::new(), Arc::new(VersionRegistry::builtin()))
    }

    #[test]
    fn handshake_and_status() {
        let mut session = session();
        let input = handshake(47, NextState::Status);
        assert_eq!(session.on_inbound(Direction::Serverbound, &input).unwrap(), input);
        assert_eq!(session.phase(), ProtocolPhase::Status);
        assert!(session.descriptor().is_none());

        // status request, split across two reads
        let request = frame(&[0x00]);
        assert!(session
            .on_inbound(Direction::Serverbound, &request[..1])
            .unwrap()
            .is_empty());
        assert_eq!(
            session.on_inbound(Direction::Serverbound, &request[1..]).unwrap(),
            request
        );
    }

    #[test]
    fn bytes_behind_the_handshake_wait_for_the_phase_change() {
        let mut session = session();
        let mut input = handshake(47, NextState::Login);
        let mut login_start = vec![0x00, 0x03];
        login_start.extend(b"bob");
        input.extend(frame(&login_start));

        assert_eq!(session.on_inbound(Direction::Serverbound, &input).unwrap(), input);
        assert_eq!(session.phase(), ProtocolPhase::Login);
        assert_eq!(session.descriptor().map(|d| d.version()), Some(47));
    }

    #[test]
    fn set_compression_goes_out_uncompressed() {
        let mut session = session();
        session
            .on_inbound(Direction::Serverbound, &handshake(47, NextState::Login))
            .unwrap();

        let set = Packet::new(
            PacketKind::new(Direction::Clientbound, ProtocolPhase::Login, 0x03),
            SetCompression { threshold: 256 },
        );
        let input = frame(&set.encode_body());
        assert_eq!(session.on_inbound(Direction::Clientbound, &input).unwrap(), input);
        assert_eq!(session.compression_threshold(), 256);

        // a later small frame now carries the data_length header
        let success = [0x02, 0x01, b'u', 0x01, b'n'];
        let compressed = frame::encode(&success, CompressionThreshold::from_wire(256));
        assert_eq!(
            session.on_inbound(Direction::Clientbound, &compressed).unwrap(),
            compressed
        );
        assert_eq!(session.phase(), ProtocolPhase::Play);
    }

    #[test]
    fn garbage_terminates_the_session() {
        let mut session = session();
        // handshake with packet id 5
        let input = frame(&[0x05, 0x00]);
        assert!(matches!(
            session.on_inbound(Direction::Serverbound, &input),
            Err(StreamViolation::Packet { .. })
        ));
        assert!(session.is_terminated());
        assert!(matches!(
            session.on_inbound(Direction::Serverbound, &[]),
            Err(StreamViolation::Terminated)
        ));
    }
}
