//! Proportional share and run-queue consistency on the core loop

use exo_sched::scheduler::weight::{weight_of, BASE_WEIGHT};
use exo_sched::{Decision, SchedConfig, Scheduler, TaskState};
use proptest::prelude::*;

const MS: u64 = 1_000_000;

#[test]
fn test_weight_table_anchor() {
    assert_eq!(weight_of(0), BASE_WEIGHT);
    for nice in -20..19 {
        assert!(weight_of(nice) > weight_of(nice + 1));
    }
}

#[test]
fn test_proportional_share_converges() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let root = Some(sched.root_group());
    let heavy = sched.create_task(0, root).unwrap();
    let light = sched.create_task(5, root).unwrap();
    assert_eq!(sched.task_stats(light).unwrap().weight, 335);

    const QUANTA: u64 = 10_000;
    let mut heavy_quanta = 0u64;
    for i in 0..QUANTA {
        if sched.tick(0, i * MS).unwrap().running() == Some(heavy) {
            heavy_quanta += 1;
        }
    }

    let share = heavy_quanta as f64 / QUANTA as f64;
    assert!((0.74..=0.76).contains(&share), "heavy share {}", share);

    // Accounted runtime agrees with the dispatch counts
    let heavy_exec = sched.task_stats(heavy).unwrap().sum_exec_runtime;
    let light_exec = sched.task_stats(light).unwrap().sum_exec_runtime;
    assert_eq!(heavy_exec + light_exec, (QUANTA - 1) * MS);
    let exec_share = heavy_exec as f64 / (heavy_exec + light_exec) as f64;
    assert!((0.74..=0.76).contains(&exec_share), "heavy exec share {}", exec_share);
}

#[test]
fn test_new_task_starts_at_core_floor() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let root = Some(sched.root_group());
    let first = sched.create_task(0, root).unwrap();
    assert_eq!(sched.task_stats(first).unwrap().vruntime, 0);

    sched.tick(0, 0).unwrap();
    assert_eq!(sched.tick(0, 20 * MS).unwrap(), Decision::Continued(first));
    let floor = sched.core_stats(0).unwrap().min_vruntime;
    assert_eq!(floor, 20 * MS);

    let late = sched.create_task(0, root).unwrap();
    assert_eq!(sched.task_stats(late).unwrap().vruntime, floor);
}

#[test]
fn test_dispatch_order_follows_vruntime() {
    let sched = Scheduler::new(SchedConfig::new(1).with_fair_latency(0)).unwrap();
    let root = Some(sched.root_group());
    let ids: Vec<_> = (0..4).map(|_| sched.create_task(0, root).unwrap()).collect();

    // Equal weights and no latency slack: strict round robin
    let mut order = Vec::new();
    for i in 0..8 {
        order.push(sched.tick(0, i * MS).unwrap().running().unwrap());
    }
    assert_eq!(&order[..4], &ids[..]);
    assert_eq!(&order[4..], &ids[..]);
}

#[test]
fn test_running_task_never_indexed() {
    let sched = Scheduler::new(SchedConfig::new(2)).unwrap();
    let root = Some(sched.root_group());
    for nice in [-5, 0, 3, 7, 0] {
        sched.create_task(nice, root).unwrap();
    }

    for i in 0..200u64 {
        let core = (i % 2) as usize;
        sched.tick(core, i * MS).unwrap();
        let stats = sched.core_stats(core).unwrap();
        if let Some(running) = stats.running {
            assert!(!stats.ready_tasks.contains(&running));
            assert_eq!(sched.task_stats(running).unwrap().state, TaskState::Running);
        }
        for id in &stats.ready_tasks {
            assert_eq!(sched.task_stats(*id).unwrap().state, TaskState::Ready);
        }
    }
    sched.check_invariants();
}

#[derive(Debug, Clone)]
enum Op {
    Create(i32),
    Tick(usize, u64),
    Block(usize),
    Unblock(usize),
    Yield(usize),
    Remove(usize),
    Rebalance,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-20i32..=19).prop_map(Op::Create),
        (0usize..3, 1u64..5).prop_map(|(core, ms)| Op::Tick(core, ms)),
        (0usize..16).prop_map(Op::Block),
        (0usize..16).prop_map(Op::Unblock),
        (0usize..16).prop_map(Op::Yield),
        (0usize..16).prop_map(Op::Remove),
        Just(Op::Rebalance),
    ]
}

proptest! {
    #[test]
    fn random_operations_keep_queues_consistent(ops in prop::collection::vec(op(), 1..120)) {
        let sched = Scheduler::new(SchedConfig::new(3)).unwrap();
        let root = Some(sched.root_group());
        let mut tasks = Vec::new();
        let mut now = 0u64;

        for op in ops {
            match op {
                Op::Create(nice) => {
                    if let Ok(id) = sched.create_task(nice, root) {
                        tasks.push(id);
                    }
                }
                Op::Tick(core, ms) => {
                    now += ms * MS;
                    sched.tick(core, now).unwrap();
                }
                Op::Block(i) if !tasks.is_empty() => {
                    let _ = sched.block(tasks[i % tasks.len()]);
                }
                Op::Unblock(i) if !tasks.is_empty() => {
                    let _ = sched.unblock(tasks[i % tasks.len()]);
                }
                Op::Yield(i) if !tasks.is_empty() => {
                    let _ = sched.yield_task(tasks[i % tasks.len()]);
                }
                Op::Remove(i) if !tasks.is_empty() => {
                    let id = tasks.swap_remove(i % tasks.len());
                    prop_assert!(sched.remove_task(id).is_some());
                    prop_assert!(sched.remove_task(id).is_none());
                }
                Op::Rebalance => {
                    sched.rebalance();
                }
                _ => {}
            }
            sched.check_invariants();

            let mut accounted = 0;
            for core in 0..sched.num_cores() {
                let stats = sched.core_stats(core).unwrap();
                if let Some(running) = stats.running {
                    prop_assert!(!stats.ready_tasks.contains(&running));
                    accounted += 1;
                }
                accounted += stats.ready + stats.blocked;
            }
            prop_assert_eq!(accounted, tasks.len());
            prop_assert_eq!(sched.nr_tasks(), tasks.len());
        }
    }
}
