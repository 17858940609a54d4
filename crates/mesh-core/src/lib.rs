//! The portable core of the tunneling daemon: every type and operation that
//! does not depend on a concrete transport, TUN/TAP device, or cryptographic
//! implementation. The daemon binary supplies those three things and drives
//! [`eventloop::EventLoop`]; everything else — routing, instance lifecycle,
//! scheduling, backpressure, reaping, broadcasting — lives here so it can be
//! exercised with in-memory test doubles.

pub mod addr;
pub mod broadcast;
pub mod config;
pub mod constants;
pub mod deferred;
pub mod error;
pub mod eventloop;
pub mod instance;
pub mod pipeline;
pub mod pool;
pub mod reaper;
pub mod registry;
pub mod route;
pub mod scheduler;
pub mod signal;
pub mod status;
pub mod transport;
pub mod tun;

pub use addr::{AddrClass, InnerAddr, OuterAddr, PacketInfo, TunnelKind};
pub use broadcast::{delivery_plan_for, DeliveryPlan};
pub use config::CoreConfig;
pub use deferred::DeferredBufferSet;
pub use error::{CoreError, CoreResult};
pub use eventloop::{EventLoop, LoopOutcome, MultiContext};
pub use instance::{ClientInstance, InstanceHandle, InstanceId, InstanceState};
pub use pipeline::{CipherContext, PipelineAction, PreSelect};
pub use pool::{PoolError, VirtualAddressPool};
pub use reaper::Reaper;
pub use registry::ClientInstanceRegistry;
pub use route::{RouteFlags, RoutingTable};
pub use scheduler::Scheduler;
pub use signal::{SignalLatch, SignalRequest};
pub use status::{build_snapshot, FileStatusSink, StatusRow, StatusSink, StatusSnapshot};
pub use transport::{StreamReassembler, WireTransport};
pub use tun::TunDevice;
