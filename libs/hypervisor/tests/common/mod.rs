//! Shared fixtures for hypervisor integration tests
//!
//! [`Script`] is a container whose behavior is carried by its payloads: every
//! creation and message payload is a bincode-encoded list of [`Op`]s executed
//! in order. Actors append to a log kept under the `log` storage key so tests
//! can read delivery order back out of the state tree.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hypervisor::{
    ActorContext, ActorId, CapabilityError, Container, ContainerRegistry, ExecutionError,
    Hypervisor, Message,
};
use hypervisor_config::HypervisorConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Type tag of the scripted container
pub const SCRIPT: u32 = 1;

const LOG_KEY: &[u8] = b"log";
const STARTUP_KEY: &[u8] = b"log_startup";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Target {
    Id(ActorId),
    Name(String),
    Me,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Op {
    Tick(u64),
    Log(String),
    /// Log `t=<current ticks>`
    LogTicks,
    /// Log the current call stack, see [`stack_entry`]
    LogStack,
    Set(Vec<u8>, Vec<u8>),
    Send(Target, Vec<Op>),
    /// Send with this actor's own address attached as capability 0
    SendSelf(Target, Vec<Op>),
    /// Unbind `name` and hand that address over as capability 0
    SendCap {
        to: Target,
        name: String,
        ops: Vec<Op>,
    },
    /// Log `hop`, then send itself another `Bounce`; logs `stop` once the
    /// send is refused
    Bounce,
    /// Synchronous call; a failure aborts the script
    Call(Target, Vec<Op>),
    /// Synchronous call; logs `reply:<text>` or `error:<category>`
    TryCall(Target, Vec<Op>),
    /// Create a child whose creation payload is `init`
    Spawn {
        name: Option<String>,
        init: Vec<Op>,
        give_self: bool,
    },
    /// Bind capability `index` of the current message under `name`
    BindCap { name: String, index: usize },
    /// Log `startup` every time the actor is loaded from the tree
    LogStartups,
    Reply(String),
    Fail(String),
}

/// Log entry written by [`Op::LogStack`]
pub fn stack_entry(chain: &[ActorId]) -> String {
    let ids: Vec<String> = chain.iter().map(ActorId::to_string).collect();
    format!("stack={}", ids.join(","))
}

pub fn script(ops: Vec<Op>) -> Bytes {
    Bytes::from(bincode::serialize(&ops).expect("script encodes"))
}

fn decode(payload: &Bytes) -> Result<Vec<Op>, ExecutionError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    bincode::deserialize(payload).map_err(|e| ExecutionError::trap(e.to_string()))
}

fn read_log(ctx: &ActorContext) -> Vec<String> {
    ctx.get(LOG_KEY)
        .and_then(|bytes| bincode::deserialize(&bytes).ok())
        .unwrap_or_default()
}

fn append_log(ctx: &mut ActorContext, entry: String) {
    let mut log = read_log(ctx);
    log.push(entry);
    ctx.set(LOG_KEY, bincode::serialize(&log).expect("log encodes"));
}

fn resolve(ctx: &ActorContext, target: &Target) -> Result<ActorId, ExecutionError> {
    match target {
        Target::Id(id) => Ok(*id),
        Target::Me => Ok(ctx.id()),
        Target::Name(name) => ctx
            .lookup(name)
            .ok_or_else(|| CapabilityError::UnknownName { name: name.clone() }.into()),
    }
}

pub struct Script;

impl Script {
    async fn run(
        &self,
        ctx: &mut ActorContext,
        message: &mut Message,
        ops: Vec<Op>,
    ) -> Result<Bytes, ExecutionError> {
        let mut reply = Bytes::new();
        for op in ops {
            match op {
                Op::Tick(amount) => ctx.use_ticks(amount)?,
                Op::Log(entry) => append_log(ctx, entry),
                Op::LogTicks => {
                    let ticks = ctx.ticks();
                    append_log(ctx, format!("t={}", ticks));
                }
                Op::LogStack => {
                    let entry = stack_entry(ctx.call_stack());
                    append_log(ctx, entry);
                }
                Op::Set(key, value) => ctx.set(key, value),
                Op::Send(target, ops) => {
                    let to = resolve(ctx, &target)?;
                    ctx.send(to, script(ops), &[])?;
                }
                Op::SendSelf(target, ops) => {
                    let to = resolve(ctx, &target)?;
                    let me = ctx.self_address();
                    ctx.send(to, script(ops), &[me])?;
                }
                Op::SendCap { to, name, ops } => {
                    let to = resolve(ctx, &to)?;
                    let address = ctx.load(&name)?;
                    ctx.send(to, script(ops), &[address])?;
                }
                Op::Bounce => {
                    append_log(ctx, "hop".to_string());
                    let me = ctx.id();
                    if ctx.send(me, script(vec![Op::Bounce]), &[]).is_err() {
                        append_log(ctx, "stop".to_string());
                    }
                }
                Op::Call(target, ops) => {
                    let to = resolve(ctx, &target)?;
                    let response = ctx.call(to, script(ops), &[]).await?;
                    append_log(ctx, format!("reply:{}", String::from_utf8_lossy(&response)));
                }
                Op::TryCall(target, ops) => {
                    let to = resolve(ctx, &target)?;
                    match ctx.call(to, script(ops), &[]).await {
                        Ok(response) => {
                            append_log(ctx, format!("reply:{}", String::from_utf8_lossy(&response)))
                        }
                        Err(error) => append_log(ctx, format!("error:{}", error.category())),
                    }
                }
                Op::Spawn {
                    name,
                    init,
                    give_self,
                } => {
                    let caps = if give_self {
                        vec![ctx.self_address()]
                    } else {
                        Vec::new()
                    };
                    let child = ctx.spawn(SCRIPT, Bytes::new(), script(init), &caps).await?;
                    if let Some(name) = name {
                        ctx.store(name, child)?;
                    }
                }
                Op::BindCap { name, index } => {
                    let address = ctx.get_address_from_message(message, index)?;
                    ctx.store(name, address)?;
                }
                Op::LogStartups => ctx.set(STARTUP_KEY, vec![1]),
                Op::Reply(text) => reply = Bytes::from(text),
                Op::Fail(reason) => return Err(ExecutionError::trap(reason)),
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl Container for Script {
    async fn on_creation(
        &self,
        ctx: &mut ActorContext,
        message: &mut Message,
    ) -> Result<(), ExecutionError> {
        let ops = decode(message.payload())?;
        self.run(ctx, message, ops).await.map(|_| ())
    }

    async fn on_message(
        &self,
        ctx: &mut ActorContext,
        message: &mut Message,
    ) -> Result<Bytes, ExecutionError> {
        let ops = decode(message.payload())?;
        self.run(ctx, message, ops).await
    }

    async fn on_startup(&self, ctx: &mut ActorContext) -> Result<(), ExecutionError> {
        if ctx.get(STARTUP_KEY).is_some() {
            append_log(ctx, "startup".to_string());
        }
        Ok(())
    }
}

pub fn registry() -> ContainerRegistry {
    let mut registry = ContainerRegistry::new();
    registry.register_shared(SCRIPT, Arc::new(Script));
    registry
}

pub fn config(workers: usize) -> HypervisorConfig {
    HypervisorConfig::default().with_workers(workers)
}

pub fn hypervisor(workers: usize) -> Hypervisor {
    Hypervisor::in_memory(registry(), config(workers)).expect("valid config")
}

/// Driver-created scripted actor
pub async fn create(hypervisor: &Hypervisor, init: Vec<Op>, caps: Vec<ActorId>) -> ActorId {
    hypervisor
        .create_actor(SCRIPT, Bytes::new(), script(init), caps)
        .await
        .expect("actor created")
}

/// Driver-created actor that binds each capability `i` as `names[i]`
pub async fn create_with_names(
    hypervisor: &Hypervisor,
    names: &[&str],
    caps: Vec<ActorId>,
) -> ActorId {
    let init = names
        .iter()
        .enumerate()
        .map(|(index, name)| Op::BindCap {
            name: name.to_string(),
            index,
        })
        .collect();
    create(hypervisor, init, caps).await
}

pub fn message(to: ActorId, ops: Vec<Op>) -> Message {
    Message::new(to, script(ops))
}

/// Persisted log of `id`
pub async fn log_of(hypervisor: &Hypervisor, id: &ActorId) -> Vec<String> {
    let record = hypervisor
        .actor_record(id)
        .await
        .expect("tree readable")
        .expect("actor persisted");
    record
        .storage
        .get(LOG_KEY)
        .map(|bytes| bincode::deserialize(bytes).expect("log decodes"))
        .unwrap_or_default()
}

/// Wait for idle, failing the test instead of hanging
pub async fn settle(hypervisor: &Hypervisor) {
    tokio::time::timeout(Duration::from_secs(10), hypervisor.idle())
        .await
        .expect("hypervisor went idle");
}
