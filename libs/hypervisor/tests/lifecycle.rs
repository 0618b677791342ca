//! Creation, idle detection, shutdown, and reloading from the tree

mod common;

use bytes::Bytes;
use common::*;
use hypervisor::{ActorId, Hypervisor, HypervisorError};
use state_core::{MemoryStateTree, StateTree};
use std::sync::Arc;

fn name(value: &str) -> Target {
    Target::Name(value.into())
}

fn child_init() -> Vec<Op> {
    vec![Op::BindCap {
        name: "parent".into(),
        index: 0,
    }]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_children_derive_ids_from_parent_nonce() {
    let hypervisor = hypervisor(2);
    let parent = create(&hypervisor, vec![], vec![]).await;

    hypervisor
        .send(message(
            parent,
            vec![
                Op::Spawn {
                    name: Some("first".into()),
                    init: child_init(),
                    give_self: true,
                },
                Op::Spawn {
                    name: Some("second".into()),
                    init: child_init(),
                    give_self: true,
                },
            ],
        ))
        .unwrap();
    settle(&hypervisor).await;

    let record = hypervisor.actor_record(&parent).await.unwrap().unwrap();
    let first = ActorId::derive(&parent, 0);
    let second = ActorId::derive(&parent, 1);
    assert_eq!(record.bindings.get("first"), Some(&first));
    assert_eq!(record.bindings.get("second"), Some(&second));
    assert_eq!(record.meta.nonce, 2);

    for child in [first, second] {
        let child_record = hypervisor.actor_record(&child).await.unwrap().unwrap();
        assert_eq!(child_record.bindings.get("parent"), Some(&parent));
        assert_eq!(child_record.meta.type_tag, SCRIPT);
    }
    assert_eq!(hypervisor.metrics().actors_spawned, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_spawn_is_never_persisted() {
    let hypervisor = hypervisor(2);
    let parent = create(&hypervisor, vec![], vec![]).await;
    let child = ActorId::derive(&parent, 0);

    let receipt = hypervisor
        .send(message(
            parent,
            vec![
                Op::Spawn {
                    name: None,
                    init: vec![Op::Log("ephemeral".into())],
                    give_self: false,
                },
                // The registry slot is already gone, so the call cannot reach it
                Op::TryCall(Target::Id(child), vec![Op::Log("alive".into())]),
            ],
        ))
        .unwrap();
    assert!(receipt.await.is_completed());
    assert!(hypervisor.scheduler().actor(&child).is_none());
    settle(&hypervisor).await;

    assert_eq!(log_of(&hypervisor, &parent).await, vec!["error:unknown_actor"]);
    assert!(hypervisor.actor_record(&child).await.unwrap().is_none());
    // The nonce still moved, so the id is never minted again
    let record = hypervisor.actor_record(&parent).await.unwrap().unwrap();
    assert_eq!(record.meta.nonce, 1);

    let metrics = hypervisor.metrics();
    assert_eq!(metrics.garbage_spawns, 1);
    assert_eq!(metrics.actors_spawned, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_child_can_message_creator_during_creation() {
    let hypervisor = hypervisor(2);
    let parent = create(&hypervisor, vec![], vec![]).await;

    hypervisor
        .send(message(
            parent,
            vec![Op::Spawn {
                name: Some("child".into()),
                init: vec![
                    Op::BindCap {
                        name: "parent".into(),
                        index: 0,
                    },
                    Op::Send(name("parent"), vec![Op::Log("hello from child".into())]),
                ],
                give_self: true,
            }],
        ))
        .unwrap();
    settle(&hypervisor).await;

    assert_eq!(log_of(&hypervisor, &parent).await, vec!["hello from child"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_fires_once_and_shuts_down_every_actor() {
    const N: usize = 8;
    let hypervisor = hypervisor(4);

    let mut actors = Vec::new();
    for _ in 0..N {
        actors.push(create(&hypervisor, vec![], vec![]).await);
    }
    // Driver creation alone never starts a run
    assert_eq!(hypervisor.metrics().idle_events, 0);
    assert_eq!(hypervisor.scheduler().registered(), 0);

    hypervisor
        .send_all(actors.iter().map(|id| message(*id, vec![Op::Log("seen".into())])))
        .unwrap();
    settle(&hypervisor).await;

    let metrics = hypervisor.metrics();
    assert_eq!(metrics.idle_events, 1);
    assert_eq!(metrics.actors_shutdown, N as u64);
    assert_eq!(metrics.actors_loaded, N as u64);
    assert_eq!(metrics.messages_processed, N as u64);
    assert_eq!(hypervisor.scheduler().registered(), 0);

    for id in &actors {
        assert_eq!(log_of(&hypervisor, id).await, vec!["seen"]);
    }
}

#[tokio::test]
async fn test_idle_returns_immediately_without_work() {
    let hypervisor = hypervisor(1);
    settle(&hypervisor).await;
    assert_eq!(hypervisor.metrics().idle_events, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_startup_hook_runs_on_every_load() {
    let hypervisor = hypervisor(2);
    let a = create(&hypervisor, vec![Op::LogStartups], vec![]).await;

    hypervisor.send(message(a, vec![Op::Log("one".into())])).unwrap();
    settle(&hypervisor).await;
    hypervisor.send(message(a, vec![Op::Log("two".into())])).unwrap();
    settle(&hypervisor).await;

    assert_eq!(
        log_of(&hypervisor, &a).await,
        vec!["startup", "one", "startup", "two"]
    );
    assert_eq!(hypervisor.metrics().idle_events, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_survives_new_hypervisor_over_same_tree() {
    let tree: Arc<dyn StateTree> = Arc::new(MemoryStateTree::new());

    let first = Hypervisor::new(tree.clone(), registry(), config(2)).unwrap();
    let a = create(&first, vec![], vec![]).await;
    first
        .send(message(a, vec![Op::Tick(9), Op::Log("before".into())]))
        .unwrap();
    let root_before = first.create_state_root().await.unwrap();
    drop(first);

    let second = Hypervisor::new(tree.clone(), registry(), config(2)).unwrap();
    // The driver nonce is persisted, so new ids never collide
    let b = create(&second, vec![], vec![]).await;
    assert_ne!(a, b);
    assert_eq!(b, ActorId::derive(&ActorId::EXTERNAL, 1));

    second
        .send(message(a, vec![Op::LogTicks, Op::Log("after".into())]))
        .unwrap();
    let root_after = second.create_state_root().await.unwrap();

    assert_ne!(root_before, root_after);
    assert_eq!(log_of(&second, &a).await, vec!["before", "t=9", "after"]);
}

#[tokio::test]
async fn test_root_actor_created_once() {
    let hypervisor = hypervisor(1);
    let root = hypervisor
        .create_root_actor(SCRIPT, Bytes::new(), script(vec![Op::Log("root".into())]), vec![])
        .await
        .unwrap();
    assert_eq!(root, ActorId::ROOT);
    assert_eq!(log_of(&hypervisor, &root).await, vec!["root"]);

    let again = hypervisor
        .create_root_actor(SCRIPT, Bytes::new(), Bytes::new(), vec![])
        .await;
    assert!(matches!(again, Err(HypervisorError::ActorExists { id }) if id == ActorId::ROOT));
}

#[tokio::test]
async fn test_large_code_is_chunked_and_restored() {
    let mut config = config(1);
    config.actors.max_inline_code = 16;
    let hypervisor = Hypervisor::in_memory(registry(), config).unwrap();

    let code = Bytes::from((0..100u8).collect::<Vec<_>>());
    let id = hypervisor
        .create_actor(SCRIPT, code.clone(), Bytes::new(), vec![])
        .await
        .unwrap();

    let record = hypervisor.actor_record(&id).await.unwrap().unwrap();
    assert_eq!(record.meta.code_chunks, 7);
    assert_eq!(record.code, code);
}
