//! Integration tests for the dispatcher against the in-memory graph
//!
//! These cover the single-mutator guarantee under concurrent callers and the
//! split between synchronous and fire-and-forget mutations.

use crossbeam::channel;
use patchbay_core::{Context, Dispatcher, Func, Graph, GraphError, NodeHandle, Queue, QueueError};
use patchbay_infra::{Connection, MemoryGraph, Mutation, NodeKind};
use patchbay_tests::{init_tracing, started_dispatcher};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// SINGLE MUTATOR
// ============================================================================

#[test]
fn test_concurrent_callers_never_overlap_graph_mutations() {
    init_tracing();
    let (graph, dispatcher) = started_dispatcher(4, Duration::from_micros(200));
    let mixer = graph.create_node(NodeKind::Mixer);
    dispatcher.attach(mixer).unwrap();

    let callers: Vec<_> = (0..NodeKind::MIXER_INPUTS)
        .map(|bus| {
            let graph = Arc::clone(&graph);
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let player = graph.create_node(NodeKind::Player);
                    dispatcher.attach(player).unwrap();
                    dispatcher.connect(player, mixer, 0, bus).unwrap();
                    dispatcher.disconnect_node_input(mixer, bus).unwrap();
                    dispatcher.detach(player).unwrap();
                    graph.release(player).unwrap();
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    dispatcher.run_sync(|_| Ok(())).unwrap();
    dispatcher.close();

    assert_eq!(graph.overlapping_mutations(), 0);
    assert_eq!(graph.mutator_thread_count(), 1);
    assert_eq!(graph.attached_count(), 1);
    assert!(graph.connections().is_empty());
}

#[test]
fn test_mutations_from_one_caller_apply_in_call_order() {
    init_tracing();
    let (graph, dispatcher) = started_dispatcher(8, Duration::ZERO);
    let player = graph.create_node(NodeKind::Player);
    let effect = graph.create_node(NodeKind::Effect);
    let output = graph.create_node(NodeKind::Output);

    dispatcher.attach(player).unwrap();
    dispatcher.attach(effect).unwrap();
    dispatcher.attach(output).unwrap();
    dispatcher.connect(player, effect, 0, 0).unwrap();
    dispatcher.connect(effect, output, 0, 0).unwrap();
    dispatcher.disconnect_node_output(player, 0).unwrap();
    dispatcher.run_sync(|_| Ok(())).unwrap();

    let expected_chain = Connection {
        src: effect,
        from_bus: 0,
        dst: output,
        to_bus: 0,
    };
    assert_eq!(graph.connections(), vec![expected_chain]);

    let log = graph.mutation_log();
    assert_eq!(
        log[..3],
        [
            Mutation::Attach(player),
            Mutation::Attach(effect),
            Mutation::Attach(output),
        ]
    );
    assert_eq!(log.len(), 6);

    dispatcher.close();
}

// ============================================================================
// SYNCHRONOUS VS FIRE-AND-FORGET
// ============================================================================

#[test]
fn test_attach_is_visible_when_it_returns() {
    let (graph, dispatcher) = started_dispatcher(4, Duration::from_millis(5));
    let player = graph.create_node(NodeKind::Player);

    dispatcher.attach(player).unwrap();
    assert!(graph.is_attached(player));

    dispatcher.detach(player).unwrap();
    assert!(!graph.is_attached(player));
    assert!(graph.release(player).is_ok());

    dispatcher.close();
}

#[test]
fn test_attach_reports_graph_errors() {
    let (graph, dispatcher) = started_dispatcher(4, Duration::ZERO);
    let player = graph.create_node(NodeKind::Player);

    dispatcher.attach(player).unwrap();
    assert!(matches!(
        dispatcher.attach(player),
        Err(QueueError::Graph(GraphError::AlreadyAttached(node))) if node == player
    ));
    assert!(matches!(
        dispatcher.attach(NodeHandle::NULL),
        Err(QueueError::Graph(GraphError::NullHandle))
    ));

    dispatcher.close();
}

#[test]
fn test_connect_errors_are_swallowed_but_counted() {
    init_tracing();
    let (graph, dispatcher) = started_dispatcher(4, Duration::ZERO);
    let player = graph.create_node(NodeKind::Player);
    let mixer = graph.create_node(NodeKind::Mixer);
    dispatcher.attach(player).unwrap();
    dispatcher.attach(mixer).unwrap();

    assert!(dispatcher.connect(player, mixer, 0, NodeKind::MIXER_INPUTS).is_ok());
    assert!(dispatcher.connect(player, player, 0, 0).is_ok());
    dispatcher.run_sync(|_| Ok(())).unwrap();

    assert!(graph.connections().is_empty());
    let stats = dispatcher.queue().map(|queue| queue.stats()).unwrap();
    assert_eq!(stats.failed, 2);

    dispatcher.close();
}

#[test]
fn test_null_attach_without_graph_succeeds() {
    let queued = Dispatcher::new(None, None);
    queued.start().unwrap();
    assert!(queued.attach(NodeHandle::NULL).is_ok());
    assert_eq!(queued.queue().map(|queue| queue.capacity()), Some(32));
    queued.close();

    let inline = Dispatcher::unqueued(None);
    assert!(inline.attach(NodeHandle::NULL).is_ok());
}

#[test]
fn test_unqueued_dispatcher_mutates_inline() {
    let graph = Arc::new(MemoryGraph::new());
    let dispatcher = Dispatcher::unqueued(Some(Arc::clone(&graph) as Arc<dyn Graph>));
    let player = graph.create_node(NodeKind::Player);
    let output = graph.create_node(NodeKind::Output);

    dispatcher.attach(player).unwrap();
    dispatcher.attach(output).unwrap();
    assert!(graph.is_attached(player));

    assert!(matches!(
        dispatcher.connect(player, output, 0, 0),
        Err(QueueError::NotInitialized)
    ));
    assert!(graph.connections().is_empty());
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_run_sync_waiter_sees_canceled_when_queue_closes_first() {
    init_tracing();
    let (_graph, dispatcher) = started_dispatcher(4, Duration::ZERO);

    // Park the worker so the next op cannot be dequeued before close.
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let (entered_tx, entered_rx) = channel::bounded::<()>(1);
    dispatcher
        .enqueue(Func::new(move |_: &Context| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        }))
        .unwrap();
    entered_rx.recv().unwrap();

    let waiter = {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || dispatcher.run_sync(|_| Ok(())))
    };
    let queue = Arc::clone(dispatcher.queue().unwrap());
    while queue.is_empty() {
        thread::sleep(Duration::from_millis(1));
    }

    let closer = {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || dispatcher.close())
    };

    assert!(matches!(waiter.join().unwrap(), Err(QueueError::Canceled)));

    drop(release_tx);
    closer.join().unwrap();
}

#[test]
fn test_operations_after_close_are_rejected() {
    let (graph, dispatcher) = started_dispatcher(4, Duration::ZERO);
    let player = graph.create_node(NodeKind::Player);
    dispatcher.close();

    assert!(matches!(dispatcher.attach(player), Err(QueueError::Closed)));
    assert!(matches!(
        dispatcher.disconnect_node_input(player, 0),
        Err(QueueError::Closed)
    ));
    assert!(!graph.is_attached(player));
}

#[test]
fn test_dispatchers_sharing_a_queue_share_the_worker() {
    let queue = Arc::new(Queue::new(4));
    let first_graph = Arc::new(MemoryGraph::new());
    let second_graph = Arc::new(MemoryGraph::new());
    let first = Dispatcher::new(
        Some(Arc::clone(&first_graph) as Arc<dyn Graph>),
        Some(Arc::clone(&queue)),
    );
    let second = Dispatcher::new(
        Some(Arc::clone(&second_graph) as Arc<dyn Graph>),
        Some(Arc::clone(&queue)),
    );
    first.start().unwrap();
    second.start().unwrap();

    let a = first_graph.create_node(NodeKind::Player);
    let b = second_graph.create_node(NodeKind::Player);
    first.attach(a).unwrap();
    second.attach(b).unwrap();

    assert!(first_graph.is_attached(a));
    assert!(second_graph.is_attached(b));
    assert_eq!(queue.stats().applied, 2);

    second.close();
    assert!(matches!(first.attach(a), Err(QueueError::Closed)));
}
