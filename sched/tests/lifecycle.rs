//! Task and group lifecycle, switch hook and multi-threaded use

use std::sync::Arc;
use std::thread;

use exo_sched::config::MAX_GROUP_DEPTH;
use exo_sched::{
    Decision, GroupId, SchedConfig, Scheduler, SchedulerError, SwitchHook, TaskId, TaskState,
};
use spin::Mutex;

const MS: u64 = 1_000_000;

#[test]
fn test_remove_running_task() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let group = sched.create_group(None).unwrap();
    let task = sched.create_task(0, Some(group)).unwrap();

    sched.tick(0, 0).unwrap();
    sched.tick(0, 3 * MS).unwrap();
    assert_eq!(sched.core_stats(0).unwrap().running, Some(task));

    let last = sched.remove_task(task).unwrap();
    assert_eq!(last.state, TaskState::Terminated);
    assert_eq!(last.sum_exec_runtime, 3 * MS);
    assert_eq!(sched.core_stats(0).unwrap().running, None);

    let group_stats = sched.group_stats(group).unwrap();
    assert_eq!(group_stats.nr_tasks, 0);
    assert_eq!(group_stats.weight, 0);

    assert_eq!(sched.remove_task(task), None);
    assert_eq!(sched.task_stats(task), Err(SchedulerError::TaskNotFound { task_id: task.0 }));
    assert_eq!(sched.block(task), Err(SchedulerError::TaskNotFound { task_id: task.0 }));
    assert_eq!(sched.nr_tasks(), 0);
    assert_eq!(sched.stats().live_tasks(), 0);
    assert_eq!(sched.tick(0, 4 * MS).unwrap(), Decision::Idle);
}

#[test]
fn test_remove_blocked_and_ready_tasks() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let root = Some(sched.root_group());
    let ready = sched.create_task(0, root).unwrap();
    let blocked = sched.create_task(0, root).unwrap();
    sched.block(blocked).unwrap();

    assert_eq!(sched.remove_task(blocked).unwrap().state, TaskState::Terminated);
    assert_eq!(sched.remove_task(ready).unwrap().state, TaskState::Terminated);
    let core = sched.core_stats(0).unwrap();
    assert_eq!((core.ready, core.blocked, core.running), (0, 0, None));
}

#[test]
fn test_move_task_between_groups() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let from = sched.create_group(None).unwrap();
    let to = sched.create_group(None).unwrap();
    let task = sched.create_task(0, Some(from)).unwrap();

    sched.tick(0, 0).unwrap();
    sched.tick(0, 5 * MS).unwrap();
    sched.move_task(task, to).unwrap();
    sched.tick(0, 8 * MS).unwrap();

    let from_stats = sched.group_stats(from).unwrap();
    let to_stats = sched.group_stats(to).unwrap();
    assert_eq!((from_stats.nr_tasks, from_stats.weight), (0, 0));
    assert_eq!((to_stats.nr_tasks, to_stats.weight), (1, 1024));
    assert_eq!(from_stats.total_runtime, 5 * MS);
    assert_eq!(to_stats.total_runtime, 3 * MS);
    assert_eq!(sched.task_stats(task).unwrap().group, to);

    assert_eq!(
        sched.move_task(task, GroupId(4242)),
        Err(SchedulerError::GroupNotFound { group_id: 4242 })
    );
    assert_eq!(sched.task_stats(task).unwrap().group, to);
}

#[test]
fn test_set_niceness_reweights_group() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let group = sched.create_group(None).unwrap();
    let a = sched.create_task(0, Some(group)).unwrap();
    sched.create_task(0, Some(group)).unwrap();

    sched.set_niceness(a, 5).unwrap();
    let stats = sched.task_stats(a).unwrap();
    assert_eq!((stats.niceness, stats.weight), (5, 335));
    assert_eq!(sched.group_stats(group).unwrap().weight, 1024 + 335);

    assert!(matches!(
        sched.set_niceness(a, -21),
        Err(SchedulerError::InvalidNiceness { value: -21, .. })
    ));
    assert_eq!(sched.task_stats(a).unwrap().niceness, 5);
}

#[test]
fn test_destroy_group_rules() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let parent = sched.create_group(None).unwrap();
    let child = sched.create_group(Some(parent)).unwrap();
    let task = sched.create_task(0, Some(child)).unwrap();

    assert!(matches!(
        sched.destroy_group(parent),
        Err(SchedulerError::GroupBusy { tasks: 0, children: 1, .. })
    ));
    assert!(matches!(
        sched.destroy_group(child),
        Err(SchedulerError::GroupBusy { tasks: 1, children: 0, .. })
    ));
    assert_eq!(sched.destroy_group(sched.root_group()), Err(SchedulerError::RootGroup));

    sched.remove_task(task).unwrap();
    sched.destroy_group(child).unwrap();
    sched.destroy_group(parent).unwrap();
    assert_eq!(sched.nr_groups(), 1);
    assert_eq!(
        sched.create_task(0, Some(child)),
        Err(SchedulerError::GroupNotFound { group_id: child.0 })
    );
    assert_eq!(
        sched.destroy_group(child),
        Err(SchedulerError::GroupNotFound { group_id: child.0 })
    );
}

#[test]
fn test_group_nesting_limit() {
    let sched = Scheduler::new(SchedConfig::new(1)).unwrap();
    let mut parent = sched.root_group();
    for _ in 1..MAX_GROUP_DEPTH {
        parent = sched.create_group(Some(parent)).unwrap();
    }
    assert_eq!(
        sched.create_group(Some(parent)),
        Err(SchedulerError::GroupDepthExceeded { depth: MAX_GROUP_DEPTH, max: MAX_GROUP_DEPTH })
    );
    assert_eq!(
        sched.create_group(Some(GroupId(999))),
        Err(SchedulerError::GroupNotFound { group_id: 999 })
    );
}

#[test]
fn test_group_pool_limit() {
    let sched = Scheduler::new(SchedConfig::new(1).with_max_groups(3)).unwrap();
    sched.create_group(None).unwrap();
    sched.create_group(None).unwrap();
    assert_eq!(
        sched.create_group(None),
        Err(SchedulerError::GroupLimitReached { current: 3, max: 3 })
    );
}

#[derive(Default)]
struct RecordingHook {
    switches: Mutex<Vec<(usize, Option<TaskId>, TaskId)>>,
    idles: Mutex<Vec<usize>>,
}

impl SwitchHook for RecordingHook {
    fn switch(&self, core: usize, prev: Option<TaskId>, next: TaskId) {
        self.switches.lock().push((core, prev, next));
    }

    fn idle(&self, core: usize) {
        self.idles.lock().push(core);
    }
}

#[test]
fn test_hook_sees_every_switch() {
    let sched = Scheduler::with_hook(SchedConfig::new(1), RecordingHook::default()).unwrap();
    let root = Some(sched.root_group());
    let a = sched.create_task(0, root).unwrap();
    let b = sched.create_task(0, root).unwrap();

    sched.tick(0, 0).unwrap();
    sched.tick(0, MS).unwrap();
    sched.tick(0, 7 * MS).unwrap();
    sched.block(a).unwrap();
    sched.block(b).unwrap();
    sched.tick(0, 8 * MS).unwrap();

    let switches = sched.hook().switches.lock().clone();
    assert_eq!(switches, vec![(0, None, a), (0, Some(a), b)]);
    assert_eq!(*sched.hook().idles.lock(), vec![0]);

    let core = sched.core_stats(0).unwrap();
    assert_eq!(core.switches.total_switches, 2);
    assert_eq!(core.switches.continuations, 1);
    assert_eq!(core.switches.idle_decisions, 1);
    assert_eq!(core.switches.max_slice_ns, 7 * MS);
}

#[test]
fn test_independent_instances() {
    let one = Scheduler::new(SchedConfig::new(1)).unwrap();
    let two = Scheduler::new(SchedConfig::new(2)).unwrap();
    let task = one.create_task(0, Some(one.root_group())).unwrap();

    assert_eq!(two.nr_tasks(), 0);
    assert!(two.task_stats(task).is_err());
    assert!(Scheduler::new(SchedConfig::new(0)).is_err());
}

#[test]
fn test_concurrent_cores() {
    const CORES: usize = 4;
    const TASKS: usize = 32;
    const TICKS: u64 = 2_000;

    let sched = Arc::new(Scheduler::new(SchedConfig::new(CORES)).unwrap());
    let group = sched.create_group_with_bandwidth(None, 10 * MS, 8 * MS).unwrap();
    let ids: Vec<TaskId> = (0..TASKS)
        .map(|i| {
            let group = if i % 2 == 0 { Some(group) } else { Some(sched.root_group()) };
            sched.create_task((i % 40) as i32 - 20, group).unwrap()
        })
        .collect();

    let mut handles = Vec::new();
    for core in 0..CORES {
        let sched = Arc::clone(&sched);
        handles.push(thread::spawn(move || {
            for i in 0..TICKS {
                sched.tick(core, i * MS).unwrap();
            }
        }));
    }
    {
        let sched = Arc::clone(&sched);
        let ids = ids.clone();
        handles.push(thread::spawn(move || {
            for round in 0..1_000 {
                let id = ids[round % ids.len()];
                if sched.block(id).is_ok() {
                    sched.unblock(id).unwrap();
                }
                if round % 10 == 0 {
                    sched.rebalance();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    sched.check_invariants();
    let mut running = 0;
    for id in &ids {
        let stats = sched.task_stats(*id).unwrap();
        assert_ne!(stats.state, TaskState::Blocked);
        if stats.state == TaskState::Running {
            running += 1;
        }
    }
    assert!(running <= CORES);

    let total: usize = (0..CORES)
        .map(|core| {
            let stats = sched.core_stats(core).unwrap();
            stats.ready + stats.running.is_some() as usize
        })
        .sum();
    assert_eq!(total, TASKS);
}
