use otter::{
    Bounds, CancelToken, ChannelSink, ConfigError, Edge, EdgeKind, Error, Graph,
    GraphValidationError, LayoutSession, Node, Point, SimulationConfig, SimulationState,
    Termination, TickProgress,
};
use std::sync::{Arc, Mutex};

fn ring(n: usize) -> Graph {
    Graph {
        nodes: (0..n)
            .map(|i| Node::new(format!("n{i}"), 40.0, 30.0))
            .collect(),
        edges: (0..n)
            .map(|i| {
                Edge::new(
                    format!("e{i}"),
                    format!("n{i}"),
                    format!("n{}", (i + 1) % n),
                    EdgeKind::Connection,
                )
            })
            .collect(),
    }
}

fn busy_config() -> SimulationConfig {
    // Never cools down, so only the timeout or the iteration budget can stop it.
    SimulationConfig {
        iterations: SimulationConfig::MAX_ITERATIONS,
        alpha_decay: 0.0,
        convergence_threshold: 0.0,
        stabilization_timeout_ms: 1,
        ..SimulationConfig::default()
    }
}

#[test]
fn session_rejects_an_empty_graph_before_ticking() {
    let calls = Arc::new(Mutex::new(0usize));
    let seen = calls.clone();
    let mut session = LayoutSession::new(SimulationConfig::default())
        .unwrap()
        .with_progress(move |_: &TickProgress| *seen.lock().unwrap() += 1);

    let err = session.run(&Graph::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::GraphValidation(GraphValidationError::EmptyGraph)
    ));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn session_rejects_edges_with_unknown_endpoints() {
    let mut graph = ring(3);
    graph
        .edges
        .push(Edge::new("dangling", "n0", "ghost", EdgeKind::Dependency));
    let err = otter::layout(&graph, SimulationConfig::default()).unwrap_err();
    match err {
        Error::GraphValidation(GraphValidationError::MissingEndpoint { edge_id, node_id }) => {
            assert_eq!(edge_id, "dangling");
            assert_eq!(node_id, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn session_rejects_duplicate_node_ids() {
    let mut graph = ring(3);
    graph.nodes.push(Node::new("n1", 10.0, 10.0));
    let err = otter::layout(&graph, SimulationConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::GraphValidation(GraphValidationError::DuplicateNode { .. })
    ));
}

#[test]
fn session_rejects_non_positive_bounds() {
    for (width, height) in [(0.0, 600.0), (800.0, -1.0), (f64::NAN, 600.0)] {
        let config = SimulationConfig {
            bounds: Bounds { width, height },
            ..SimulationConfig::default()
        };
        let err = LayoutSession::new(config).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidBounds { .. })
        ));
    }
    assert!(SimulationConfig::new(Bounds {
        width: 0.0,
        height: 1.0
    })
    .is_err());
}

#[test]
fn session_returns_best_effort_result_on_timeout() {
    let mut session = LayoutSession::new(busy_config()).unwrap();
    let result = session.run(&ring(300)).unwrap();
    assert_eq!(result.termination, Termination::TimedOut);
    assert!(!result.converged);
    assert!(result.iterations >= 1);
    assert!(result.iterations < SimulationConfig::MAX_ITERATIONS);
    assert_eq!(result.positions.len(), 300);
}

#[test]
fn strict_session_fails_on_timeout() {
    let config = SimulationConfig {
        strict_convergence: true,
        ..busy_config()
    };
    let err = otter::layout(&ring(300), config).unwrap_err();
    match err {
        Error::SimulationTimeout { iterations, .. } => assert!(iterations >= 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cancelling_mid_run_keeps_the_positions_reached_so_far() {
    let token = CancelToken::new();
    let trigger = token.clone();
    let mut session = LayoutSession::new(SimulationConfig::default())
        .unwrap()
        .with_cancel_token(token)
        .with_progress(move |p: &TickProgress| {
            if p.iteration == 10 {
                trigger.cancel();
            }
        });

    let result = session.run(&ring(8)).unwrap();
    assert_eq!(result.termination, Termination::Cancelled);
    assert_eq!(result.iterations, 10);
    assert!(!result.converged);
    assert_eq!(result.positions.len(), 8);
}

#[test]
fn cancelling_before_the_first_tick_is_an_error() {
    let token = CancelToken::new();
    token.cancel();
    let mut session = LayoutSession::new(SimulationConfig::default())
        .unwrap()
        .with_cancel_token(token);
    assert!(matches!(session.run(&ring(4)), Err(Error::Cancelled)));
}

#[test]
fn progress_reports_every_tick_in_order() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut session = LayoutSession::new(SimulationConfig::default())
        .unwrap()
        .with_progress(ChannelSink(tx));
    let result = session.run(&ring(5)).unwrap();
    drop(session);

    let ticks: Vec<TickProgress> = rx.iter().collect();
    assert_eq!(ticks.len(), result.iterations);
    for (i, t) in ticks.iter().enumerate() {
        assert_eq!(t.iteration, i + 1);
        assert!(t.progress > 0.0 && t.progress <= 1.0);
    }
    for pair in ticks.windows(2) {
        assert!(pair[1].alpha <= pair[0].alpha);
    }
    let last = ticks.last().unwrap();
    assert_eq!(last.converged, result.converged);
    assert_eq!(last.alpha, result.final_alpha);
}

#[test]
fn panicking_progress_callback_does_not_abort_the_layout() {
    let mut calls = 0usize;
    let result = {
        let mut session = LayoutSession::new(SimulationConfig::default())
            .unwrap()
            .with_progress(|p: &TickProgress| {
                calls += 1;
                if p.iteration % 3 == 0 {
                    panic!("observer failure at {}", p.iteration);
                }
            });
        session.run(&ring(5)).unwrap()
    };
    assert!(result.iterations > 3);
    assert_eq!(calls, result.iterations);
}

#[test]
fn simulation_can_be_driven_as_an_iterator() {
    let graph = ring(6);
    let session = LayoutSession::new(SimulationConfig::default()).unwrap();
    let mut sim = session.start(&graph).unwrap();
    assert_eq!(sim.state(), SimulationState::Idle);

    let mut prev = sim.alpha();
    let mut ticks = 0usize;
    for p in sim.by_ref() {
        assert!(p.alpha <= prev);
        prev = p.alpha;
        ticks += 1;
    }
    assert!(ticks > 0 && ticks <= 300);
    assert!(matches!(sim.state(), SimulationState::Finished(_)));

    let result = LayoutSession::assemble(&graph, &sim);
    let direct = otter::layout(&graph, SimulationConfig::default()).unwrap();
    assert_eq!(result, direct);
}

#[test]
fn independent_sessions_run_concurrently() {
    let graph = ring(20);
    let expected = otter::layout(&graph, SimulationConfig::default()).unwrap();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| otter::layout(&graph, SimulationConfig::default()).unwrap()))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    });
}

#[test]
fn prior_positions_seed_an_incremental_relayout() {
    let graph = ring(6);
    let first = otter::layout(&graph, SimulationConfig::default()).unwrap();

    let mut next = graph.clone().with_positions_from(&first);
    next.nodes.push(Node::new("new", 40.0, 30.0));
    next.edges
        .push(Edge::new("e-new", "n0", "new", EdgeKind::Hierarchy));

    let session = LayoutSession::new(SimulationConfig::default()).unwrap();
    let sim = session.start(&next).unwrap();
    for (seeded, (id, p)) in sim.nodes().iter().zip(&first.positions) {
        assert_eq!(&seeded.id, id);
        assert_eq!(Point { x: seeded.x, y: seeded.y }, *p);
    }
    assert_eq!(sim.nodes().len(), 7);
}

#[test]
fn session_clamps_out_of_range_parameters() {
    let config = SimulationConfig {
        force_strength: 7.0,
        iterations: 0,
        velocity_decay: f64::NAN,
        ..SimulationConfig::default()
    };
    let session = LayoutSession::new(config).unwrap();
    assert_eq!(session.config().force_strength, 1.0);
    assert_eq!(session.config().iterations, 1);
    assert_eq!(session.config().velocity_decay, 0.4);
}

#[test]
fn graph_json_uses_the_preparation_field_names() {
    let json = r#"{
        "nodes": [
            {"id": "api", "type": "service", "size": {"width": 120, "height": 60}},
            {"id": "db", "type": "store", "fixedPosition": {"x": 400, "y": 300}}
        ],
        "edges": [
            {"id": "e1", "sourceId": "api", "targetId": "db", "type": "dependency", "weight": 2}
        ]
    }"#;
    let graph: Graph = serde_json::from_str(json).unwrap();
    assert_eq!(graph.edges[0].kind, EdgeKind::Dependency);
    assert_eq!(graph.nodes[1].size.width, 100.0);

    let result = otter::layout(&graph, SimulationConfig::default()).unwrap();
    assert_eq!(result.positions["db"], Point { x: 400.0, y: 300.0 });
    assert_eq!(result.edges[0].target, Point { x: 400.0, y: 300.0 });
}
