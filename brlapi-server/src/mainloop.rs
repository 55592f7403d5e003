//! C10: server main loop (spec.md §4.10).
//!
//! One task accepts new connections and hands each off to its own
//! per-connection task; a `brlapi_shared::shutdown::Shutdown` signals
//! every task to wind down together. Grounded on the teacher's
//! `Server::run`, which spawns a single coordinating task that
//! `tokio::select!`s between the protocol/transport closing and an
//! explicit close request.

use crate::arbitrator::Arbitrator;
use crate::auth::{self, UnauthLimiter};
use crate::registry::Registry;
use crate::rawsuspend::{Mode as RawSuspendMode, RawSuspendState};
use brlapi_core::connection::{AttachHow, ConnectionId};
use brlapi_core::driver::{AuthBackend, CoreTaskRunner, Driver, TextTable};
use brlapi_core::error::{Error, ErrorCode, Result};
use brlapi_core::keyrange::KeyCode;
use brlapi_core::packet::{Packet, PacketType};
use brlapi_core::param::{ParamHeader, ParamTable};
use brlapi_core::tty::TtyId;
use brlapi_core::window::{CursorUpdate, WriteRegion};
use brlapi_device::conn_stream::ConnStream;
use brlapi_device::listener::Socket;
use bytes::{Buf, Bytes};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Lowest client protocol version the server accepts (spec.md §4.3
/// scenario 1 exercises the handshake with VERSION(8)).
const MIN_PROTOCOL_VERSION: u32 = 8;

/// Version the server announces in its own VERSION packet sent
/// immediately on accept (spec.md §4.4: "and sent the VERSION packet").
const SERVER_PROTOCOL_VERSION: u32 = 8;

pub struct ServerState {
    pub registry: Mutex<Registry>,
    pub arbitrator: Mutex<Arbitrator>,
    pub params: Mutex<ParamTable>,
    pub raw_suspend: Mutex<RawSuspendState>,
    pub unauth: UnauthLimiter,
    pub driver: Arc<dyn Driver>,
    pub text_table: Arc<dyn TextTable>,
    pub auth_backend: Arc<dyn AuthBackend>,
    pub core_task: Arc<dyn CoreTaskRunner>,
}

impl ServerState {
    pub fn new(
        driver: Arc<dyn Driver>,
        text_table: Arc<dyn TextTable>,
        auth_backend: Arc<dyn AuthBackend>,
        core_task: Arc<dyn CoreTaskRunner>,
    ) -> Arc<Self> {
        let display_size = driver.display_size();
        Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            arbitrator: Mutex::new(Arbitrator::new(display_size)),
            params: Mutex::new(ParamTable::new()),
            raw_suspend: Mutex::new(RawSuspendState::new()),
            unauth: UnauthLimiter::new(),
            driver,
            text_table,
            auth_backend,
            core_task,
        })
    }
}

/// Accepts connections from `new_conn_rx` until `shutdown` fires,
/// spawning one task per connection onto `tasks`.
pub async fn run(
    state: Arc<ServerState>,
    mut new_conn_rx: mpsc::Receiver<Box<dyn Socket>>,
    shutdown: brlapi_shared::shutdown::Shutdown,
    tasks: &mut JoinSet<()>,
) {
    tasks.spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { poll_driver_commands(state, &shutdown).await }
    });
    loop {
        tokio::select! {
            socket = new_conn_rx.recv() => {
                let Some(socket) = socket else { break };
                let state = state.clone();
                tasks.spawn(async move { handle_connection(state, socket).await });
            }
            _ = shutdown.recv_shutdown() => {
                info!("shutting down main loop");
                break;
            }
        }
    }
}

/// Polls the driver for key events and runs them through the active
/// connection's accepted-key filter (spec.md §4.5, §4.11).
async fn poll_driver_commands(state: Arc<ServerState>, shutdown: &brlapi_shared::shutdown::Shutdown) {
    loop {
        tokio::select! {
            result = state.driver.read_command() => {
                match result {
                    Ok(Some(raw)) => {
                        let code = KeyCode::from(raw);
                        let tty = state.arbitrator.lock().await.default_tty();
                        deliver_key_event(&state, tty, code).await;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "driver command read failed"),
                }
            }
            _ = shutdown.recv_shutdown() => break,
        }
    }
}

async fn handle_connection(state: Arc<ServerState>, socket: Box<dyn Socket>) {
    let Some(permit) = state.unauth.try_claim() else {
        warn!("refusing connection: too many unauthenticated connections");
        return;
    };
    let (_pause_tx, pause_rx) = watch::channel(false);
    let mut stream = ConnStream::new(socket, pause_rx);
    let (id, mut outbox) = state.registry.lock().await.insert();
    info!(%id, "connection accepted");

    // spec.md §4.4: the server sends its own VERSION packet as soon as
    // the transport is open, before the client sends anything.
    let greeting = Packet::new(PacketType::Version, SERVER_PROTOCOL_VERSION.to_be_bytes().to_vec());
    if let Err(err) = stream.write_packet(&greeting).await {
        warn!(%id, %err, "failed sending initial version");
        cleanup_connection(&state, id).await;
        return;
    }

    let mut permit = Some(permit);
    let mut authenticated = false;
    loop {
        let packet = if authenticated {
            tokio::select! {
                result = stream.read_packet() => {
                    match result {
                        Ok(packet) => packet,
                        Err(_) => break,
                    }
                }
                outgoing = outbox.recv() => {
                    let Some(outgoing) = outgoing else { continue };
                    if stream.write_packet(&outgoing).await.is_err() { break; }
                    continue;
                }
            }
        } else {
            tokio::select! {
                result = tokio::time::timeout(auth::UNAUTH_TIMEOUT, stream.read_packet()) => {
                    match result {
                        Ok(Ok(packet)) => packet,
                        Ok(Err(_)) => break,
                        Err(_elapsed) => {
                            info!(%id, "unauthenticated connection idle too long, closing");
                            break;
                        }
                    }
                }
                outgoing = outbox.recv() => {
                    let Some(outgoing) = outgoing else { continue };
                    if stream.write_packet(&outgoing).await.is_err() { break; }
                    continue;
                }
            }
        };

        if !authenticated {
            match packet.ptype {
                PacketType::Version => {
                    let result = handle_version(state.auth_backend.as_ref(), &packet.payload).await;
                    if send_reply(&mut stream, result).await.is_err() {
                        break;
                    }
                    continue;
                }
                PacketType::Auth => {
                    let result = auth::authenticate(state.auth_backend.as_ref(), &packet.payload).await;
                    let ok = result.is_ok();
                    if send_reply(&mut stream, result.map(|()| None)).await.is_err() {
                        break;
                    }
                    if ok {
                        authenticated = true;
                        if let Some(conn) = state.registry.lock().await.get_mut(id) {
                            conn.authenticated = true;
                        }
                        // Freed once authenticated: the ceiling only
                        // bounds connections still mid-handshake.
                        permit.take();
                    }
                    continue;
                }
                _ => {
                    let _ = send_reply(&mut stream, Err(Error::from(ErrorCode::Authentication))).await;
                    continue;
                }
            }
        }

        let result = dispatch(&state, id, packet.ptype, packet.payload).await;
        if send_reply(&mut stream, result).await.is_err() {
            break;
        }
    }

    drop(permit);
    cleanup_connection(&state, id).await;
}

async fn cleanup_connection(state: &ServerState, id: ConnectionId) {
    let mut registry = state.registry.lock().await;
    if let Some(conn) = registry.remove(id) {
        if let Some(tty) = conn.tty() {
            state.arbitrator.lock().await.detach(tty, id);
        }
    }
    drop(registry);
    state.params.lock().await.drop_connection(id);
    let mut raw_suspend = state.raw_suspend.lock().await;
    let _ = raw_suspend
        .recover_from_disconnect(id, state.driver.as_ref(), state.core_task.as_ref())
        .await;
    info!(%id, "connection closed");
}

/// Writes `result` back to the client: `Some(packet)` as-is, `Ok(None)`
/// as a bare ACK, and an error as an ERROR packet carrying its wire code.
async fn send_reply(stream: &mut ConnStream, result: Result<Option<Packet>>) -> Result<()> {
    let reply = match result {
        Ok(Some(packet)) => packet,
        Ok(None) => Packet::empty(PacketType::Ack),
        Err(err) => {
            let mut payload = Vec::with_capacity(4);
            payload.extend_from_slice(&err.as_wire_code().code().to_be_bytes());
            Packet::new(PacketType::Error, payload)
        }
    };
    stream.write_packet(&reply).await
}

/// Encodes a NUL-terminated string reply (spec.md §6 GETDRIVERNAME /
/// GETMODELID).
fn nul_terminated(ptype: PacketType, s: &str) -> Packet {
    let mut payload = Vec::with_capacity(s.len() + 1);
    payload.extend_from_slice(s.as_bytes());
    payload.push(0);
    Packet::new(ptype, payload)
}

/// VERSION handshake (spec.md §4.3 step 2): accepts client versions
/// `>= MIN_PROTOCOL_VERSION` and replies with the AUTH methods offer
/// instead of a bare ACK.
async fn handle_version(auth_backend: &dyn AuthBackend, payload: &[u8]) -> Result<Option<Packet>> {
    if payload.len() < 4 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let mut buf = payload;
    let client_version = buf.get_u32();
    if client_version < MIN_PROTOCOL_VERSION {
        return Err(Error::from(ErrorCode::ProtocolVersion));
    }
    let mut auth_payload = Vec::new();
    for method in auth_backend.offered_methods() {
        auth_payload.extend_from_slice(&method.to_be_bytes());
    }
    Ok(Some(Packet::new(PacketType::Auth, auth_payload)))
}

async fn dispatch(state: &ServerState, id: ConnectionId, ptype: PacketType, payload: Bytes) -> Result<Option<Packet>> {
    match ptype {
        PacketType::GetDriverName => Ok(Some(nul_terminated(PacketType::GetDriverName, state.driver.name()))),
        PacketType::GetModelId => Ok(Some(nul_terminated(PacketType::GetModelId, state.driver.model_id()))),
        PacketType::GetDisplaySize => {
            let mut reply = Vec::with_capacity(8);
            reply.extend_from_slice(&(state.driver.display_size() as u32).to_be_bytes());
            reply.extend_from_slice(&1u32.to_be_bytes());
            Ok(Some(Packet::new(PacketType::GetDisplaySize, reply)))
        }
        PacketType::EnterTtyMode => handle_enter_tty_mode(state, id, payload).await.map(|()| None),
        PacketType::LeaveTtyMode => handle_leave_tty_mode(state, id).await.map(|()| None),
        PacketType::SetFocus => handle_set_focus(state, id, payload).await.map(|()| None),
        PacketType::IgnoreKeyRanges => handle_key_ranges(state, id, payload, false).await.map(|()| None),
        PacketType::AcceptKeyRanges => handle_key_ranges(state, id, payload, true).await.map(|()| None),
        PacketType::Write => handle_write(state, id, payload).await.map(|()| None),
        PacketType::EnterRawMode => handle_enter_raw_or_suspend(state, id, RawSuspendMode::Raw)
            .await
            .map(|()| None),
        PacketType::SuspendDriver => handle_enter_raw_or_suspend(state, id, RawSuspendMode::Suspend)
            .await
            .map(|()| None),
        PacketType::LeaveRawMode | PacketType::ResumeDriver => {
            handle_leave_raw_or_suspend(state, id).await.map(|()| None)
        }
        PacketType::ParamRequest => handle_param_request(state, id, payload).await.map(|()| None),
        PacketType::ParamValue => handle_param_set(state, id, payload).await.map(|()| None),
        PacketType::Synchronize => Ok(None),
        _ => Err(Error::from(ErrorCode::UnknownInstruction)),
    }
}

async fn handle_enter_tty_mode(state: &ServerState, id: ConnectionId, mut payload: Bytes) -> Result<()> {
    if payload.len() < 4 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let n_path = payload.get_u32() as usize;
    if payload.len() < n_path * 4 + 1 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let mut path = Vec::with_capacity(n_path);
    for _ in 0..n_path {
        path.push(payload.get_u32());
    }
    let how = match payload.get_u8() {
        0 => AttachHow::Commands,
        _ => AttachHow::DriverKeyCodes,
    };
    let display_size = state.driver.display_size();
    let priority = state
        .registry
        .lock()
        .await
        .get(id)
        .map(|c| c.priority)
        .unwrap_or(brlapi_core::connection::DEFAULT_PRIORITY);

    let tty = {
        let mut arbitrator = state.arbitrator.lock().await;
        let tty = arbitrator.tree_mut().ensure_path(&path);
        arbitrator.attach(tty, id, priority);
        tty
    };

    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    if let Err(err) = conn.enter_tty_mode(tty, how, false, display_size) {
        drop(registry);
        state.arbitrator.lock().await.detach(tty, id);
        return Err(err);
    }
    Ok(())
}

async fn handle_leave_tty_mode(state: &ServerState, id: ConnectionId) -> Result<()> {
    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    let tty = conn.tty();
    conn.leave_tty_mode()?;
    drop(registry);
    if let Some(tty) = tty {
        state.arbitrator.lock().await.detach(tty, id);
    }
    Ok(())
}

async fn handle_set_focus(state: &ServerState, id: ConnectionId, mut payload: Bytes) -> Result<()> {
    if payload.len() < 4 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let focus = payload.get_u32();
    let mut registry = state.registry.lock().await;
    let conn = registry.get(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    let tty = conn.tty().ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    drop(registry);
    let mut arbitrator = state.arbitrator.lock().await;
    let focus_tty = arbitrator.tree_mut().ensure_path(&[focus]);
    arbitrator.tree_mut().set_focus(tty, Some(focus_tty));
    Ok(())
}

async fn handle_key_ranges(state: &ServerState, id: ConnectionId, mut payload: Bytes, accept: bool) -> Result<()> {
    if payload.len() % 16 != 0 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    let accepted = conn
        .accepted_keys_mut()
        .ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    while payload.remaining() >= 16 {
        let first = payload.get_u64();
        let last = payload.get_u64();
        if accept {
            accepted.add(first, last);
        } else {
            accepted.remove(first, last);
        }
    }
    Ok(())
}

async fn handle_write(state: &ServerState, id: ConnectionId, mut payload: Bytes) -> Result<()> {
    if payload.len() < 4 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let flags = payload.get_u32();
    let has_begin_size = flags & 0x1 != 0;
    let has_text = flags & 0x2 != 0;
    let has_and_mask = flags & 0x4 != 0;
    let has_or_mask = flags & 0x8 != 0;
    let has_cursor = flags & 0x10 != 0;

    let mut region = WriteRegion::default();
    if has_begin_size {
        if payload.remaining() < 8 {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        region.begin = payload.get_u32() as usize;
        let size = payload.get_u32();
        region.size = if size == 0 { None } else { Some(size as usize) };
    }
    if has_text {
        if payload.remaining() < 4 {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        let len = payload.get_u32() as usize;
        if payload.remaining() < len {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        region.text = Some(payload.copy_to_bytes(len).to_vec());
    }
    if has_and_mask {
        if payload.remaining() < 4 {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        let len = payload.get_u32() as usize;
        if payload.remaining() < len {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        region.and_mask = Some(payload.copy_to_bytes(len).to_vec());
    }
    if has_or_mask {
        if payload.remaining() < 4 {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        let len = payload.get_u32() as usize;
        if payload.remaining() < len {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        region.or_mask = Some(payload.copy_to_bytes(len).to_vec());
    }
    if has_cursor {
        if payload.remaining() < 4 {
            return Err(Error::from(ErrorCode::InvalidPacket));
        }
        let cursor = payload.get_i32();
        region.cursor = Some(if cursor < 0 {
            CursorUpdate::Clear
        } else {
            CursorUpdate::Set(cursor as usize)
        });
    }

    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    let window = conn
        .window_mut()
        .ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    window.apply_write(region)?;
    let rendered = window.render(|c| state.text_table.convert_character_to_dots(c));
    drop(registry);

    let tty = state
        .registry
        .lock()
        .await
        .get(id)
        .and_then(|c| c.tty())
        .unwrap_or(brlapi_core::tty::ROOT);
    let arbitrator = state.arbitrator.lock().await;
    if arbitrator.active_connection(tty) == Some(id) {
        drop(arbitrator);
        state.driver.write_window(&rendered).await?;
    }
    Ok(())
}

async fn handle_enter_raw_or_suspend(state: &ServerState, id: ConnectionId, mode: RawSuspendMode) -> Result<()> {
    state.raw_suspend.lock().await.try_enter(id, mode)?;
    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    match mode {
        RawSuspendMode::Raw => conn.enter_raw_mode(),
        RawSuspendMode::Suspend => conn.enter_suspend(),
    }
}

async fn handle_leave_raw_or_suspend(state: &ServerState, id: ConnectionId) -> Result<()> {
    state.raw_suspend.lock().await.leave(id)?;
    let mut registry = state.registry.lock().await;
    let conn = registry.get_mut(id).ok_or_else(|| Error::from(ErrorCode::IllegalInstruction))?;
    conn.leave_raw_or_suspend()
}

async fn handle_param_request(state: &ServerState, id: ConnectionId, mut payload: Bytes) -> Result<()> {
    if payload.len() < 16 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let raw_param = payload.get_u64();
    let raw_subparam = payload.get_u64();
    let header = ParamHeader::decode(raw_param, raw_subparam);
    state.params.lock().await.request(id, header);
    Ok(())
}

async fn handle_param_set(state: &ServerState, id: ConnectionId, mut payload: Bytes) -> Result<()> {
    if payload.len() < 16 {
        return Err(Error::from(ErrorCode::InvalidPacket));
    }
    let raw_param = payload.get_u64();
    let raw_subparam = payload.get_u64();
    let header = ParamHeader::decode(raw_param, raw_subparam);
    let value = payload.to_vec();
    let subscribers = state
        .params
        .lock()
        .await
        .set(id, header.param, header.subparam, value.clone())?;

    let mut update_payload = Vec::with_capacity(16 + value.len());
    update_payload.extend_from_slice(&header.param.to_be_bytes());
    update_payload.extend_from_slice(&header.subparam.to_be_bytes());
    update_payload.extend_from_slice(&value);

    let registry = state.registry.lock().await;
    for subscriber in subscribers {
        registry.send(subscriber, Packet::new(PacketType::ParamUpdate, update_payload.clone()));
    }
    Ok(())
}

/// Key events the driver reports are filtered through the active
/// connection's accepted-key list before being forwarded (spec.md §4.5).
pub async fn deliver_key_event(state: &ServerState, tty: TtyId, code: KeyCode) {
    let active = state.arbitrator.lock().await.active_connection(tty);
    let Some(id) = active else { return };

    let accepted = {
        let mut registry = state.registry.lock().await;
        let Some(conn) = registry.get_mut(id) else { return };
        let Some(accepted) = conn.accepted_keys_mut() else { return };
        accepted.contains(code)
    };
    if !accepted {
        return;
    }

    let registry = state.registry.lock().await;
    registry.send(id, Packet::new(PacketType::Key, code.0.to_be_bytes().to_vec()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoneAuthBackend;
    use async_trait::async_trait;
    use brlapi_core::driver::{fake::FakeDriver, IdentityTextTable};
    use brlapi_core::packet::HEADER_LEN;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    struct InlineCoreTask;

    #[async_trait]
    impl CoreTaskRunner for InlineCoreTask {
        async fn run_on_core_task(&self, _wait: bool, task: Box<dyn FnOnce() + Send>) -> Result<()> {
            task();
            Ok(())
        }
    }

    fn fresh_state() -> Arc<ServerState> {
        ServerState::new(
            Arc::new(FakeDriver::new(40)),
            Arc::new(IdentityTextTable),
            Arc::new(NoneAuthBackend),
            Arc::new(InlineCoreTask),
        )
    }

    #[tokio::test]
    async fn version_below_minimum_is_rejected() {
        let err = handle_version(&NoneAuthBackend, &(MIN_PROTOCOL_VERSION - 1).to_be_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::ProtocolVersion);
    }

    #[tokio::test]
    async fn version_at_or_above_minimum_offers_auth_methods() {
        let reply = handle_version(&NoneAuthBackend, &MIN_PROTOCOL_VERSION.to_be_bytes())
            .await
            .unwrap()
            .expect("auth offer packet");
        assert_eq!(reply.ptype, PacketType::Auth);
        assert_eq!(&reply.payload[..], &0u32.to_be_bytes());
    }

    #[tokio::test]
    async fn get_driver_name_returns_nul_terminated_name() {
        let state = fresh_state();
        let reply = dispatch(&state, ConnectionId::from_raw(0), PacketType::GetDriverName, Bytes::new())
            .await
            .unwrap()
            .expect("driver name packet");
        assert_eq!(reply.ptype, PacketType::GetDriverName);
        assert_eq!(&reply.payload[..], b"fake\0");
    }

    #[tokio::test]
    async fn get_display_size_reports_columns_and_one_row() {
        let state = fresh_state();
        let reply = dispatch(&state, ConnectionId::from_raw(0), PacketType::GetDisplaySize, Bytes::new())
            .await
            .unwrap()
            .expect("display size packet");
        let mut payload = reply.payload;
        assert_eq!(payload.get_u32(), 40);
        assert_eq!(payload.get_u32(), 1);
    }

    #[tokio::test]
    async fn param_update_is_delivered_to_a_subscribed_connection() {
        let state = fresh_state();
        let (subscriber, mut subscriber_rx) = state.registry.lock().await.insert();
        let (setter, _setter_rx) = state.registry.lock().await.insert();

        state.params.lock().await.request(
            subscriber,
            ParamHeader {
                param: 1,
                subparam: 0,
                unsubscribe: false,
                global: true,
            },
        );

        let mut payload = Vec::new();
        payload.extend_from_slice(&1u64.to_be_bytes());
        payload.extend_from_slice(&0u64.to_be_bytes());
        payload.extend_from_slice(b"value");
        handle_param_set(&state, setter, Bytes::from(payload)).await.unwrap();

        let update = subscriber_rx.try_recv().expect("param update queued");
        assert_eq!(update.ptype, PacketType::ParamUpdate);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_connection_is_dropped_after_idle_timeout() {
        let state = fresh_state();
        let (client, server_socket) = duplex(4096);
        let handle = tokio::spawn(handle_connection(state.clone(), Box::new(server_socket)));

        let mut client = client;
        let mut greeting = [0u8; HEADER_LEN + 4];
        client.read_exact(&mut greeting).await.unwrap();

        tokio::time::advance(auth::UNAUTH_TIMEOUT + Duration::from_secs(1)).await;
        handle.await.unwrap();
        assert_eq!(state.registry.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn connection_sends_its_version_greeting_on_accept() {
        let state = fresh_state();
        let (mut client, server_socket) = duplex(4096);
        let _handle = tokio::spawn(handle_connection(state, Box::new(server_socket)));

        let mut buf = [0u8; HEADER_LEN + 4];
        client.read_exact(&mut buf).await.unwrap();
        let ptype = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(ptype, PacketType::Version.code());
        let version = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        assert_eq!(version, SERVER_PROTOCOL_VERSION);
    }
}
