//! The event loop: the single cooperative loop that arbitrates wire
//! socket I/O, virtual-interface I/O, deferred-write readiness, and
//! per-instance timers, and the [`MultiContext`] it drives. Everything
//! here runs on one task; the shared structures are `Rc<RefCell<_>>`
//! rather than `Arc<Mutex<_>>` because there is never contention, only
//! aliasing.

use std::time::{Duration, Instant};

use tokio::time::{sleep_until, Instant as TokioInstant};

use crate::addr::{extract_from_packet, AddrClass, InnerAddr, OuterAddr, TunnelKind};
use crate::broadcast::flood;
use crate::config::CoreConfig;
use crate::deferred::DeferredBufferSet;
use crate::error::CoreResult;
use crate::instance::{InstanceHandle, InstanceState, IoInterest};
use crate::pipeline::{CipherContext, PipelineAction};
use crate::pool::VirtualAddressPool;
use crate::reaper::Reaper;
use crate::registry::ClientInstanceRegistry;
use crate::route::{RouteFlags, RoutingTable};
use crate::scheduler::Scheduler;
use crate::signal::{SignalLatch, SignalRequest};
use crate::status::{build_snapshot, StatusSink};
use crate::transport::{StreamReassembler, WireTransport};
use crate::tun::TunDevice;

const LINK_READ_BUF_SIZE: usize = 2048;
const TUN_READ_BUF_SIZE: usize = 2048;

/// Everything one server task owns: the three instance views, the
/// routing table, the address pool, the scheduler, the deferred-write
/// queues, the reaper, and the configuration. Exactly one per event loop.
pub struct MultiContext {
    pub registry: ClientInstanceRegistry,
    pub routes: RoutingTable,
    pub pool: VirtualAddressPool,
    pub scheduler: Scheduler,
    pub deferred: DeferredBufferSet,
    pub reaper: Reaper,
    pub config: CoreConfig,
}

impl MultiContext {
    pub fn new(pool: VirtualAddressPool, config: CoreConfig) -> Self {
        let reaper = Reaper::with_params(
            config.ageable_ttl(),
            config.reap_divisor,
            config.reap_min,
            config.reap_max,
        );
        Self {
            registry: ClientInstanceRegistry::new(),
            routes: RoutingTable::new(),
            pool,
            scheduler: Scheduler::new(),
            deferred: DeferredBufferSet::new(config.tcp_queue_limit),
            reaper,
            config,
        }
    }
}

/// What happened during one [`EventLoop::tick`], for callers (and tests)
/// that want to observe loop progress without re-deriving it from state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Continue,
    /// Every instance has drained following [`SignalRequest::Terminate`];
    /// the process should exit.
    Terminate,
    /// Every instance has drained following [`SignalRequest::Reload`] (a
    /// hard restart); the process should exit expecting an
    /// external supervisor to re-exec it.
    Restart,
}

/// Orchestrates a [`MultiContext`] against a concrete [`WireTransport`] and
/// [`TunDevice`]. Generic rather than `dyn` so the hot path never heap-
/// allocates a vtable call per packet; the daemon binary names the concrete
/// transport/device types at construction.
pub struct EventLoop<T: WireTransport, D: TunDevice> {
    ctx: MultiContext,
    transport: T,
    tun: D,
    tunnel_kind: TunnelKind,
    signals: SignalLatch,
    context_factory: Box<dyn FnMut(&OuterAddr) -> Box<dyn CipherContext>>,
    status: Option<(Box<dyn StatusSink>, u8)>,
    io_order_toggle: bool,
    draining: bool,
    /// Set when the in-progress drain was requested by [`SignalRequest::Reload`]
    /// rather than [`SignalRequest::Terminate`], so `tick` reports the right
    /// [`LoopOutcome`] once the drain completes.
    restart_requested: bool,
    last_housekeeping: Instant,
}

impl<T: WireTransport, D: TunDevice> EventLoop<T, D> {
    pub fn new(
        ctx: MultiContext,
        transport: T,
        tun: D,
        signals: SignalLatch,
        context_factory: impl FnMut(&OuterAddr) -> Box<dyn CipherContext> + 'static,
    ) -> Self {
        let tunnel_kind = tun.kind();
        Self {
            ctx,
            transport,
            tun,
            tunnel_kind,
            signals,
            context_factory: Box::new(context_factory),
            status: None,
            io_order_toggle: false,
            draining: false,
            restart_requested: false,
            last_housekeeping: Instant::now(),
        }
    }

    pub fn with_status_sink(mut self, sink: Box<dyn StatusSink>, version: u8) -> Self {
        self.status = Some((sink, version));
        self
    }

    pub fn context(&self) -> &MultiContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut MultiContext {
        &mut self.ctx
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Runs ticks until a drain completes. Returns once every instance has
    /// closed following a [`SignalRequest::Terminate`] or
    /// [`SignalRequest::Reload`], reporting
    /// which so the caller can exit plainly or expect a re-exec.
    pub async fn run(&mut self) -> CoreResult<LoopOutcome> {
        loop {
            let outcome = self.tick().await?;
            if matches!(outcome, LoopOutcome::Terminate | LoopOutcome::Restart) {
                return Ok(outcome);
            }
        }
    }

    /// One iteration of the loop: wait for readiness or the earliest scheduled
    /// wake-up, drain whatever is ready, run at-most-once-per-second
    /// housekeeping, and honor any latched signal.
    pub async fn tick(&mut self) -> CoreResult<LoopOutcome> {
        self.handle_signals();

        if self.draining && self.ctx.registry.is_empty() {
            return Ok(if self.restart_requested {
                LoopOutcome::Restart
            } else {
                LoopOutcome::Terminate
            });
        }

        let now = Instant::now();
        let deadline = self.next_deadline(now);
        let has_pending_writes = self.any_deferred_pending();

        tokio::select! {
            _ = self.transport.readable() => {}
            _ = self.tun.readable(), if !self.draining => {}
            _ = self.transport.writable(), if has_pending_writes => {}
            _ = sleep_until(TokioInstant::from_std(deadline)) => {}
        }

        // Whichever branch woke the select, drain both non-blocking sources
        // in a fixed order that alternates tick-to-tick, so neither
        // direction can starve the other.
        let now = Instant::now();
        if self.io_order_toggle {
            self.drain_link_reads(now).await?;
            if !self.draining {
                self.drain_tun_reads(now).await?;
            }
        } else {
            if !self.draining {
                self.drain_tun_reads(now).await?;
            }
            self.drain_link_reads(now).await?;
        }
        self.io_order_toggle = !self.io_order_toggle;

        self.flush_all_deferred_writes().await?;

        let now = Instant::now();
        self.wake_expired_instances(now);
        self.run_housekeeping(now);

        Ok(LoopOutcome::Continue)
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        let cap = now + self.ctx.config.reap_max_wakeup();
        match self.ctx.scheduler.peek_earliest() {
            Some((_, at)) if at < cap => at.max(now),
            _ => cap,
        }
    }

    fn any_deferred_pending(&self) -> bool {
        self.ctx
            .registry
            .iter()
            .any(|h| self.ctx.deferred.has_pending(h.borrow().id()))
    }

    fn handle_signals(&mut self) {
        for req in self.signals.take_all() {
            match req {
                SignalRequest::Terminate => {
                    tracing::info!("terminate signal latched, draining instances");
                    self.draining = true;
                    let live: Vec<_> = self.ctx.registry.iter().cloned().collect();
                    for instance in live {
                        self.close_instance(&instance);
                    }
                }
                SignalRequest::SoftRestart => {
                    tracing::info!("soft-restart signal latched, closing idle instances");
                    let idle: Vec<_> = self
                        .ctx
                        .registry
                        .iter()
                        .filter(|h| !h.borrow().connection_established)
                        .cloned()
                        .collect();
                    for instance in idle {
                        self.close_instance(&instance);
                    }
                }
                SignalRequest::Reload => {
                    tracing::info!("reload (hard restart) signal latched, draining instances");
                    self.draining = true;
                    self.restart_requested = true;
                    let live: Vec<_> = self.ctx.registry.iter().cloned().collect();
                    for instance in live {
                        self.close_instance(&instance);
                    }
                }
            }
        }
    }

    /// Closes `instance` fully: halts it, drops its scheduler entry and
    /// routes, clears any deferred
    /// writes, then releases the registry's three views of it.
    fn close_instance(&mut self, instance: &InstanceHandle) {
        instance.borrow_mut().mark_halt();
        let id = instance.borrow().id();
        self.ctx.scheduler.remove(instance);
        self.ctx.routes.delete_all_for(instance);
        self.ctx.deferred.clear(id);
        if let Some(vaddr) = instance.borrow().vaddr {
            if let Some(octets) = ipv4_octets(&vaddr) {
                self.ctx.pool.release(octets);
            }
        }
        self.ctx.registry.close_instance(instance);
    }

    async fn drain_link_reads(&mut self, now: Instant) -> CoreResult<()> {
        loop {
            let mut buf = [0u8; LINK_READ_BUF_SIZE];
            match self.transport.read_from(&mut buf).await {
                Ok(Some((n, from))) => self.dispatch_link_datagram(&buf[..n], from, now).await?,
                Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(%err, "link read error");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn drain_tun_reads(&mut self, now: Instant) -> CoreResult<()> {
        loop {
            let mut buf = [0u8; TUN_READ_BUF_SIZE];
            match self.tun.read_frame(&mut buf).await {
                Ok(Some(n)) => self.route_from_tun(&buf[..n], now).await?,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(%err, "tun read error");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Accepts (or looks up) the instance for `from`, feeds `buf` through
    /// its stream reassembler if needed, and processes each complete
    /// ciphertext record.
    async fn dispatch_link_datagram(&mut self, buf: &[u8], from: OuterAddr, now: Instant) -> CoreResult<()> {
        let instance = match self.ctx.registry.lookup_real(&from) {
            Some(h) => h,
            None => match self.accept_instance(from, now) {
                Some(h) => h,
                None => return Ok(()),
            },
        };

        let records = if self.transport.is_stream() {
            let mut inst = instance.borrow_mut();
            let reasm = inst
                .reassembler
                .get_or_insert_with(StreamReassembler::new);
            let records = reasm.feed(buf);
            let desynced = reasm.has_error();
            drop(inst);
            if desynced {
                tracing::warn!(real = %from, "stream framing desync, closing instance");
                self.close_instance(&instance);
                return Ok(());
            }
            records
        } else {
            vec![buf.to_vec()]
        };

        for record in records {
            self.process_link_record(&instance, &record, now).await?;
        }
        Ok(())
    }

    fn accept_instance(&mut self, from: OuterAddr, now: Instant) -> Option<InstanceHandle> {
        if self.draining {
            return None;
        }
        if self.ctx.registry.len() >= self.ctx.config.max_clients {
            tracing::warn!(real = %from, "max_clients reached, refusing new instance");
            return None;
        }
        let context = (self.context_factory)(&from);
        let handle = self.ctx.registry.create_instance(from, context, now)?;
        if self.transport.is_stream() {
            handle.borrow_mut().reassembler = Some(StreamReassembler::new());
        }
        self.ctx.scheduler.insert(handle.clone(), now);
        Some(handle)
    }

    async fn process_link_record(&mut self, instance: &InstanceHandle, record: &[u8], now: Instant) -> CoreResult<()> {
        instance.borrow_mut().bytes_in += record.len() as u64;
        if instance.borrow().state == InstanceState::Unassigned {
            instance.borrow_mut().state = InstanceState::Authenticating;
        }

        let (inner, action) = instance.borrow_mut().context.process_incoming_link(record);
        self.apply_action(instance, action, now);
        if instance.borrow().halt {
            return Ok(());
        }

        if instance.borrow().context.connection_established() && !instance.borrow().connection_established {
            self.establish(instance, now);
        }

        if let Some(inner) = inner {
            self.route_from_link(instance, &inner, now).await?;
        }
        self.drain_pending_tun_output(instance, now).await?;
        Ok(())
    }

    /// Drains any additional plaintext inner frames the context has queued
    /// internally (e.g. from reassembling a fragmented record across more
    /// than one link read) via `process_outgoing_tun`, routing each
    /// exactly as the frame returned directly from `process_incoming_link`.
    async fn drain_pending_tun_output(&mut self, instance: &InstanceHandle, now: Instant) -> CoreResult<()> {
        loop {
            let frame = instance.borrow_mut().context.process_outgoing_tun();
            let Some(frame) = frame else { break };
            self.route_from_link(instance, &frame, now).await?;
        }
        Ok(())
    }

    fn establish(&mut self, instance: &InstanceHandle, now: Instant) {
        instance.borrow_mut().connection_established = true;
        instance.borrow_mut().state = InstanceState::Established;
        instance.borrow_mut().did_open_context = true;
        if instance.borrow().vaddr.is_none() {
            match self.ctx.pool.acquire() {
                Ok(vaddr) => {
                    self.ctx.registry.attach_vaddr(instance, vaddr);
                    // A client's negotiated address is a configured route,
                    // not something that has to be learned from its own
                    // traffic first.
                    self.ctx
                        .routes
                        .insert_host(vaddr, instance.clone(), RouteFlags::Static, now);
                }
                Err(err) => {
                    tracing::warn!(%err, "virtual address pool exhausted, closing instance");
                    self.close_instance(instance);
                    return;
                }
            }
        }
        self.ctx.scheduler.update(instance, now);
    }

    fn apply_action(&mut self, instance: &InstanceHandle, action: PipelineAction, _now: Instant) {
        match action {
            PipelineAction::Ok | PipelineAction::RekeyRequested => {}
            PipelineAction::SoftReset => {
                if let Some(reasm) = instance.borrow_mut().reassembler.as_mut() {
                    reasm.reset();
                }
            }
            PipelineAction::HardFail => {
                tracing::info!(real = %instance.borrow().real, "cipher context reported hard-fail");
                self.close_instance(instance);
            }
        }
    }

    /// Routing decision for a decrypted frame received from the link.
    async fn route_from_link(&mut self, instance: &InstanceHandle, inner: &[u8], now: Instant) -> CoreResult<()> {
        let (src, dst, class) = match extract_from_packet(self.tunnel_kind, inner) {
            Ok(triple) => triple,
            Err(_) => {
                instance.borrow_mut().format_errors += 1;
                return Ok(());
            }
        };

        self.learn(&src, instance, now);

        match class {
            AddrClass::Broadcast | AddrClass::Multicast => {
                flood(&self.ctx.registry, inner, Some(instance));
                self.flush_all_link_output(now).await?;
                let _ = self.tun.write_frame(inner).await;
            }
            AddrClass::Unicast => {
                if self.ctx.config.enable_c2c {
                    if let Some(peer) = self.ctx.routes.lookup(&dst, now) {
                        if !std::rc::Rc::ptr_eq(&peer, instance) && peer.borrow().connection_established {
                            if self.ctx.deferred.queue_len(peer.borrow().id()) >= self.ctx.config.tcp_queue_limit {
                                peer.borrow_mut().backpressure_drops += 1;
                                return Ok(());
                            }
                            let (buf, action) = peer.borrow_mut().context.process_incoming_tun(inner);
                            if let Some(buf) = buf {
                                self.send_or_defer(&peer, buf).await?;
                            }
                            self.apply_action(&peer, action, now);
                            if !peer.borrow().halt {
                                self.flush_link_output(&peer).await?;
                            }
                            return Ok(());
                        }
                    }
                }
                let _ = self.tun.write_frame(inner).await;
            }
        }
        Ok(())
    }

    /// Routing decision for a frame received from the TUN/TAP device.
    async fn route_from_tun(&mut self, frame: &[u8], now: Instant) -> CoreResult<()> {
        let (_src, dst, class) = match extract_from_packet(self.tunnel_kind, frame) {
            Ok(triple) => triple,
            Err(_) => return Ok(()),
        };

        match class {
            AddrClass::Broadcast | AddrClass::Multicast => {
                flood(&self.ctx.registry, frame, None);
                self.flush_all_link_output(now).await?;
            }
            AddrClass::Unicast => {
                if !self.ctx.config.enable_c2c {
                    return Ok(());
                }
                let Some(peer) = self.ctx.routes.lookup(&dst, now) else {
                    return Ok(());
                };
                if !peer.borrow().connection_established {
                    return Ok(());
                }
                if self.ctx.deferred.queue_len(peer.borrow().id()) >= self.ctx.config.tcp_queue_limit {
                    peer.borrow_mut().backpressure_drops += 1;
                    return Ok(());
                }
                let (buf, action) = peer.borrow_mut().context.process_incoming_tun(frame);
                if let Some(buf) = buf {
                    self.send_or_defer(&peer, buf).await?;
                }
                self.apply_action(&peer, action, now);
                if !peer.borrow().halt {
                    self.flush_link_output(&peer).await?;
                }
            }
        }
        Ok(())
    }

    /// Learns `src` as a host route to `instance`, unless it is already
    /// mapped there (idempotent) or is not eligible for learning.
    fn learn(&mut self, src: &InnerAddr, instance: &InstanceHandle, now: Instant) {
        if !src.is_learnable() {
            return;
        }
        if let Some(local) = self.ctx.config.local_inner_addr {
            if *src == local {
                return;
            }
        }
        if let Some(existing) = self.ctx.routes.lookup(src, now) {
            if std::rc::Rc::ptr_eq(&existing, instance) {
                return;
            }
        }
        self.ctx
            .routes
            .insert_host(*src, instance.clone(), RouteFlags::Cache, now);
    }

    async fn flush_all_link_output(&mut self, _now: Instant) -> CoreResult<()> {
        let live: Vec<_> = self.ctx.registry.iter().cloned().collect();
        for instance in live {
            self.flush_link_output(&instance).await?;
        }
        Ok(())
    }

    /// Serializes and sends every ciphertext record currently pending in
    /// `instance`'s context, deferring (or dropping, on overflow) whatever
    /// a non-blocking write can't absorb.
    async fn flush_link_output(&mut self, instance: &InstanceHandle) -> CoreResult<()> {
        loop {
            let bytes = instance.borrow_mut().context.process_outgoing_link();
            let Some(bytes) = bytes else { break };
            self.send_or_defer(instance, bytes).await?;
        }
        Ok(())
    }

    async fn send_or_defer(&mut self, instance: &InstanceHandle, bytes: Vec<u8>) -> CoreResult<()> {
        let framed = if self.transport.is_stream() {
            StreamReassembler::frame(&bytes)?
        } else {
            bytes
        };

        let id = instance.borrow().id();
        if self.transport.is_stream() && self.ctx.deferred.has_pending(id) {
            self.enqueue_deferred(instance, framed);
            return Ok(());
        }

        let real = instance.borrow().real.clone();
        match self.transport.write_to(&framed, &real).await {
            Ok(n) if n == framed.len() => {
                instance.borrow_mut().bytes_out += n as u64;
            }
            Ok(n) if self.transport.is_stream() => {
                instance.borrow_mut().bytes_out += n as u64;
                self.enqueue_deferred(instance, framed[n..].to_vec());
            }
            Ok(_) => {
                // Datagram transports never short-write; a partial write is
                // silently treated as a drop (best-effort, UDP semantics).
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock && self.transport.is_stream() => {
                self.enqueue_deferred(instance, framed);
            }
            Err(err) => {
                tracing::debug!(%err, real = %real, "link write error");
            }
        }
        Ok(())
    }

    fn enqueue_deferred(&mut self, instance: &InstanceHandle, bytes: Vec<u8>) {
        let id = instance.borrow().id();
        if self.ctx.deferred.push(id, bytes).is_err() {
            tracing::warn!(real = %instance.borrow().real, "deferred write queue overflow, closing instance");
            instance.borrow_mut().backpressure_drops += 1;
            self.close_instance(instance);
        }
    }

    /// Flushes whatever deferred records can be written now, FIFO within
    /// each instance, across every instance that has any pending.
    async fn flush_all_deferred_writes(&mut self) -> CoreResult<()> {
        let live: Vec<_> = self.ctx.registry.iter().cloned().collect();
        for instance in live {
            let id = instance.borrow().id();
            while let Some(record) = self.ctx.deferred.pop_front(id) {
                let real = instance.borrow().real.clone();
                match self.transport.write_to(&record, &real).await {
                    Ok(n) if n == record.len() => {
                        instance.borrow_mut().bytes_out += n as u64;
                    }
                    Ok(n) => {
                        instance.borrow_mut().bytes_out += n as u64;
                        self.enqueue_deferred(&instance, record[n..].to_vec());
                        break;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        self.enqueue_deferred(&instance, record);
                        break;
                    }
                    Err(err) => {
                        tracing::debug!(%err, real = %real, "deferred link write error");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Wakes every instance whose scheduled time has passed, calls its
    /// `pre_select`, and either reschedules it further into the future or,
    /// if the context made no further progress, transitions it to Halting.
    fn wake_expired_instances(&mut self, now: Instant) {
        loop {
            let Some((instance, at)) = self.ctx.scheduler.peek_earliest() else {
                break;
            };
            if at > now {
                break;
            }
            self.ctx.scheduler.remove(&instance);

            let select = instance.borrow_mut().context.pre_select(now);
            instance.borrow_mut().tcp_rwflags = IoInterest {
                read: select.wants_read,
                write: select.wants_write,
            };

            match select.next_wake {
                Some(next) if next > now => {
                    self.ctx.scheduler.insert(instance.clone(), next);
                }
                _ => {
                    tracing::debug!(real = %instance.borrow().real, "keepalive window elapsed");
                    self.close_instance(&instance);
                }
            }
        }
    }

    /// Runs the reaper sweep and publishes a status snapshot, each at most
    /// once per wall second.
    fn run_housekeeping(&mut self, now: Instant) {
        if now.duration_since(self.last_housekeeping) < Duration::from_secs(1) {
            return;
        }
        self.last_housekeeping = now;
        self.ctx.reaper.sweep(&mut self.ctx.routes, &mut self.ctx.registry, now);

        if let Some((sink, version)) = &self.status {
            let snapshot = build_snapshot(*version, &self.ctx.registry, std::time::SystemTime::now());
            sink.publish(&snapshot);
        }
    }
}

fn ipv4_octets(addr: &InnerAddr) -> Option<std::net::Ipv4Addr> {
    let bytes = addr.as_bytes();
    if bytes.len() != 4 {
        return None;
    }
    Some(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}
