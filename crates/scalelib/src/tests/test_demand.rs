use crate::constraints::Constraint;
use crate::demand::{DemandCalculator, DemandConfig, MatchOutcome};
use crate::resources::ResourceValue;
use crate::shared::{SharedPools, SharedResource};
use crate::tests::utils::{
    TestBucketBuilder, TestNodeBuilder, consume, ncpus, scatter_job, size, test_job,
};

fn calculator(
    nodes: Vec<crate::node::Node>,
    buckets: Vec<crate::bucket::Bucket>,
) -> DemandCalculator {
    DemandCalculator::new(nodes, buckets, SharedPools::default(), DemandConfig::default())
}

fn requested(calc: DemandCalculator) -> Vec<(String, u32)> {
    calc.finish()
        .requests
        .into_iter()
        .map(|r| (r.nodearray, r.count))
        .collect()
}

#[test]
fn test_scatter_uses_one_node_per_slot() {
    let bucket = TestBucketBuilder::default().resource("ncpus", 2).build();
    let mut calc = calculator(vec![], vec![bucket]);
    let outcome = calc.add_job(&scatter_job("1", 2, vec![ncpus(2)]));
    assert_eq!(outcome, MatchOutcome::Matched { slots: 2 });
    assert_eq!(requested(calc), vec![("htc".to_string(), 2)]);
}

#[test]
fn test_pack_fills_bigger_machine() {
    let bucket = TestBucketBuilder::default().resource("ncpus", 4).build();
    let mut calc = calculator(vec![], vec![bucket]);
    calc.add_job(&test_job("1", 2, vec![ncpus(2)]));
    assert_eq!(requested(calc), vec![("htc".to_string(), 1)]);
}

#[test]
fn test_scatter_on_bigger_machine_still_spreads() {
    let bucket = TestBucketBuilder::default().resource("ncpus", 4).build();
    let mut calc = calculator(vec![], vec![bucket]);
    calc.add_job(&scatter_job("1", 2, vec![ncpus(2)]));
    assert_eq!(requested(calc), vec![("htc".to_string(), 2)]);
}

#[test]
fn test_exclusive_job_blocks_node_for_others() {
    let bucket = TestBucketBuilder::default()
        .resource("ncpus", 4)
        .resource("mem", size("50gb"))
        .build();
    let mut calc = calculator(vec![], vec![bucket]);

    let mut excl = test_job("11", 1, vec![consume(&[("mem", size("25gb"))])]);
    excl.constraints.push(Constraint::Exclusive { task: true });
    calc.add_job(&excl);
    assert_eq!(calc.nodes().len(), 1);

    calc.add_job(&test_job("12", 1, vec![consume(&[("mem", size("1gb"))])]));
    let result = calc.finish();
    assert_eq!(result.requests.len(), 1);
    assert_eq!(result.requests[0].count, 2);
    assert_eq!(
        result.compute_nodes[0].exclusive_owner,
        Some("11".to_string())
    );
    assert!(result.compute_nodes[1].assignments.contains("12"));
}

#[test]
fn test_existing_nodes_are_used_first() {
    let node = TestNodeBuilder::default()
        .name("htc-1")
        .resource("ncpus", 4)
        .build();
    let bucket = TestBucketBuilder::default().resource("ncpus", 4).build();
    let mut calc = calculator(vec![node], vec![bucket]);
    calc.add_job(&test_job("1", 1, vec![ncpus(2)]));
    calc.add_job(&test_job("2", 1, vec![ncpus(2)]));
    calc.add_job(&test_job("3", 1, vec![ncpus(2)]));

    let result = calc.finish();
    let first = &result.compute_nodes[0];
    assert_eq!(first.assignments.len(), 2);
    assert_eq!(first.available["ncpus"], ResourceValue::Int(0));
    assert_eq!(result.new_nodes().count(), 1);
    assert_eq!(result.requests[0].count, 1);
}

#[test]
fn test_closed_node_is_skipped() {
    let node = TestNodeBuilder::default()
        .name("htc-1")
        .resource("ncpus", 4)
        .closed(true)
        .build();
    let mut calc = calculator(vec![node], vec![]);
    let outcome = calc.add_job(&test_job("1", 1, vec![ncpus(1)]));
    assert!(matches!(outcome, MatchOutcome::Unmatched { .. }));
    let result = calc.finish();
    assert_eq!(result.unmatched_jobs, vec!["1".to_string()]);
    assert!(result.requests.is_empty());
}

#[test]
fn test_bucket_available_count_is_respected() {
    let bucket = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .available_count(1)
        .build();
    let mut calc = calculator(vec![], vec![bucket]);
    assert!(matches!(
        calc.add_job(&scatter_job("1", 2, vec![ncpus(2)])),
        MatchOutcome::Unmatched { .. }
    ));
    assert!(calc.nodes().is_empty());
    assert!(matches!(
        calc.add_job(&test_job("2", 1, vec![ncpus(2)])),
        MatchOutcome::Matched { slots: 1 }
    ));
    assert!(matches!(
        calc.add_job(&test_job("3", 1, vec![ncpus(2)])),
        MatchOutcome::Unmatched { .. }
    ));
}

#[test]
fn test_colocated_job_uses_single_placement_group() {
    let small = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .placement_group("pg0")
        .available_count(1)
        .build();
    let big = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .placement_group("pg1")
        .available_count(4)
        .build();
    let ungrouped = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .available_count(10)
        .build();
    let mut calc = calculator(vec![], vec![ungrouped, small, big]);
    let mut job = scatter_job("1", 3, vec![Constraint::InAPlacementGroup, ncpus(2)]);
    job.colocated = true;
    assert_eq!(calc.add_job(&job), MatchOutcome::Matched { slots: 3 });

    let result = calc.finish();
    assert_eq!(result.requests.len(), 1);
    assert_eq!(result.requests[0].placement_group, Some("pg1".to_string()));
    assert_eq!(result.requests[0].count, 3);
}

#[test]
fn test_colocated_job_prefers_existing_group() {
    let node = TestNodeBuilder::default()
        .name("htc-1")
        .resource("ncpus", 2)
        .placement_group("pg1")
        .build();
    let pg0 = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .placement_group("pg0")
        .build();
    let pg1 = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .placement_group("pg1")
        .build();
    let mut calc = calculator(vec![node], vec![pg0, pg1]);
    let mut job = scatter_job("1", 2, vec![ncpus(2)]);
    job.colocated = true;
    calc.add_job(&job);

    let result = calc.finish();
    assert!(result.compute_nodes[0].assignments.contains("1"));
    assert_eq!(result.requests[0].placement_group, Some("pg1".to_string()));
    assert_eq!(result.requests[0].count, 1);
}

#[test]
fn test_shared_consumable_pool_limits_jobs() {
    let mut pools = SharedPools::default();
    let id = pools.add(SharedResource::Consumable {
        name: "licenses".to_string(),
        source: "server[pbs]".to_string(),
        initial: 3.into(),
        current: 3.into(),
    });
    let bucket = TestBucketBuilder::default().resource("ncpus", 4).build();
    let mut calc = DemandCalculator::new(vec![], vec![bucket], pools, DemandConfig::default());
    let license = Constraint::SharedConsumable {
        pools: vec![id],
        amount: 1.into(),
    };
    let outcomes = calc.add_jobs(
        &(0..5)
            .map(|i| test_job(&i.to_string(), 1, vec![ncpus(1), license.clone()]))
            .collect::<Vec<_>>(),
    );
    let matched = outcomes
        .iter()
        .filter(|o| matches!(o, MatchOutcome::Matched { .. }))
        .count();
    assert_eq!(matched, 3);
    match calc.pools().get(id) {
        SharedResource::Consumable { current, .. } => assert_eq!(*current, ResourceValue::Int(0)),
        other => panic!("unexpected {other:?}"),
    }
    let result = calc.finish();
    assert_eq!(result.unmatched_jobs, vec!["3".to_string(), "4".to_string()]);
}

#[test]
fn test_unmatched_ceiling_stops_matching() {
    let bucket = TestBucketBuilder::default().resource("ncpus", 2).build();
    let mut calc = DemandCalculator::new(
        vec![],
        vec![bucket],
        SharedPools::default(),
        DemandConfig {
            max_unmatched_jobs: Some(1),
        },
    );
    let outcomes = calc.add_jobs(&[
        test_job("1", 1, vec![ncpus(8)]),
        test_job("2", 1, vec![ncpus(1)]),
    ]);
    assert!(matches!(outcomes[0], MatchOutcome::Unmatched { .. }));
    assert_eq!(outcomes[1], MatchOutcome::Skipped);
    assert!(calc.finish().requests.is_empty());
}

#[test]
fn test_running_job_is_force_bound() {
    let node = TestNodeBuilder::default()
        .name("htc-1")
        .resource("ncpus", 1)
        .build();
    let mut calc = calculator(vec![node], vec![]);
    let mut job = test_job("7", 1, vec![ncpus(4)]);
    job.executing_hostname = Some("HTC-1".to_string());
    assert_eq!(
        calc.add_job(&job),
        MatchOutcome::Running {
            hostname: "HTC-1".to_string()
        }
    );
    let node = &calc.nodes()[0];
    assert!(node.running_assignments.contains("7"));
    assert_eq!(node.available["ncpus"], ResourceValue::Int(-3));
}

#[test]
fn test_exclusive_array_iterations_get_own_nodes() {
    let bucket = TestBucketBuilder::default()
        .resource("ncpus", 8)
        .available_count(2)
        .build();
    let mut calc = calculator(vec![], vec![bucket]);
    let mut job = test_job("5[]", 1, vec![ncpus(1), Constraint::Exclusive { task: false }]);
    job.iterations = 3;
    assert_eq!(
        calc.add_job(&job),
        MatchOutcome::Partial {
            iterations: 2,
            slots: 2
        }
    );
    let result = calc.finish();
    assert_eq!(result.requests[0].count, 2);
    assert_eq!(result.unmatched_jobs, vec!["5[]".to_string()]);
}

#[test]
fn test_missing_host_resource_fails() {
    let bucket = TestBucketBuilder::default().resource("ncpus", 8).build();
    let mut calc = calculator(vec![], vec![bucket]);
    let outcome = calc.add_job(&test_job("1", 1, vec![consume(&[("ngpus", 1.into())])]));
    insta::assert_debug_snapshot!(outcome, @r#"
    Unmatched {
        reason: "no node satisfies [{ngpus=1}]",
    }
    "#);
}

#[test]
fn test_failed_iteration_releases_its_nodes() {
    let bucket = TestBucketBuilder::default()
        .resource("ncpus", 2)
        .available_count(3)
        .build();
    let mut calc = calculator(vec![], vec![bucket]);
    let mut job = scatter_job("8[]", 2, vec![ncpus(2)]);
    job.iterations = 2;
    assert_eq!(
        calc.add_job(&job),
        MatchOutcome::Partial {
            iterations: 1,
            slots: 2
        }
    );
    assert_eq!(calc.nodes().len(), 2);

    assert_eq!(
        calc.add_job(&test_job("9", 1, vec![ncpus(2)])),
        MatchOutcome::Matched { slots: 1 }
    );
    assert_eq!(requested(calc), vec![("htc".to_string(), 3)]);
}

#[test]
fn test_large_array_job_is_packed() {
    let bucket = TestBucketBuilder::default()
        .resource("ncpus", 4)
        .available_count(10_000)
        .build();
    let mut calc = calculator(vec![], vec![bucket]);
    let mut job = test_job("10[]", 1, vec![ncpus(1)]);
    job.iterations = 20_000;
    assert_eq!(calc.add_job(&job), MatchOutcome::Matched { slots: 20_000 });
    let result = calc.finish();
    assert_eq!(result.new_nodes().count(), 5_000);
    assert_eq!(result.requests[0].count, 5_000);
}
