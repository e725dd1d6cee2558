use std::cell::RefCell;
use std::rc::Rc;

use archsim::{
    Admission, Expression, Factory, InMemoryStorage, NoopObserver, Program, ReplyKind, ReplySink, RequestId,
    Simulation, SimulationConfig, ThrottlingSpec,
};

type Replies = Rc<RefCell<Vec<(RequestId, ReplyKind)>>>;

fn sinks(replies: &Replies) -> (ReplySink, ReplySink) {
    let ok = Rc::clone(replies);
    let err = Rc::clone(replies);
    (
        Box::new(move |id| ok.borrow_mut().push((id, ReplyKind::Success))),
        Box::new(move |id| err.borrow_mut().push((id, ReplyKind::Error))),
    )
}

fn single_service(workers: usize, throttling: ThrottlingSpec, think: u64) -> (Simulation, InMemoryStorage) {
    let program = Program::new(vec![Expression::define_service(
        "DB",
        vec![
            Expression::settings(Some(workers), Some(throttling)),
            Expression::define_operation("NOOP", vec![Expression::think(think)]),
        ],
    )]);
    let storage = InMemoryStorage::new();
    let sim = Factory::default()
        .build(&program, Box::new(storage.clone()))
        .unwrap();
    (sim, storage)
}

fn submit(sim: &mut Simulation, replies: &Replies) -> Admission {
    let (ok, err) = sinks(replies);
    let request = sim.create_request("NOOP", ok, err);
    sim.submit("DB", request).unwrap()
}

#[test]
fn throttling_triggers_on_full_queue() {
    let (mut sim, storage) = single_service(1, ThrottlingSpec::tail_drop(10), 100);
    let replies: Replies = Rc::default();

    // One request occupies the worker, ten fill the queue.
    for _ in 0..11 {
        assert_eq!(submit(&mut sim, &replies), Admission::Queued);
    }
    let db = sim.service("DB").unwrap();
    assert_eq!(db.pool().busy(), 1);
    assert_eq!(db.queue_length(), 10);
    let before = db.rejection_count();

    assert_eq!(submit(&mut sim, &replies), Admission::Rejected);

    let db = sim.service("DB").unwrap();
    assert_eq!(db.rejection_count(), before + 1);
    assert_eq!(db.queue_length(), 10);
    assert_eq!(*replies.borrow(), vec![(RequestId(11), ReplyKind::Error)]);
    assert_eq!(storage.statistics("DB").unwrap().rejections, 1);
}

#[test]
fn pass_through_processing() {
    let (mut sim, _) = single_service(1, ThrottlingSpec::None, 5);
    let replies: Replies = Rc::default();

    submit(&mut sim, &replies);
    let db = sim.service("DB").unwrap();
    assert_eq!(db.queue_length(), 0);
    assert_eq!(db.pool().busy(), 1);
    assert_eq!(sim.next_event_time(), Some(5));

    sim.run_until(6, &mut NoopObserver).unwrap();
    assert_eq!(*replies.borrow(), vec![(RequestId(0), ReplyKind::Success)]);
    assert_eq!(sim.service("DB").unwrap().pool().busy(), 0);
    assert_eq!(sim.now(), 6);
}

#[test]
fn shorter_think_finishes_first() {
    let program = Program::new(vec![Expression::define_service(
        "S",
        vec![
            Expression::settings(Some(2), None),
            Expression::define_operation("Slow", vec![Expression::think(5)]),
            Expression::define_operation("Fast", vec![Expression::think(3)]),
        ],
    )]);
    let mut sim = Factory::default()
        .build(&program, Box::new(InMemoryStorage::new()))
        .unwrap();
    let replies: Replies = Rc::default();
    for operation in ["Slow", "Fast"] {
        let (ok, err) = sinks(&replies);
        let request = sim.create_request(operation, ok, err);
        sim.submit("S", request).unwrap();
    }

    let mut ticks = Vec::new();
    sim.run_until(u64::MAX, &mut |now: u64, _end: u64| ticks.push(now))
        .unwrap();
    assert_eq!(ticks, vec![3, 5]);
    assert_eq!(
        *replies.borrow(),
        vec![(RequestId(1), ReplyKind::Success), (RequestId(0), ReplyKind::Success)]
    );
}

#[test]
fn every_request_gets_exactly_one_reply() {
    let (mut sim, storage) = single_service(2, ThrottlingSpec::tail_drop(3), 4);
    let replies: Replies = Rc::default();
    for delay in 0..40 {
        let (ok, err) = sinks(&replies);
        sim.schedule_request(delay / 2, "DB", "NOOP", ok, err).unwrap();
    }
    sim.run_until(1_000, &mut NoopObserver).unwrap();

    let mut ids: Vec<u64> = replies.borrow().iter().map(|(id, _)| id.0).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..40).collect::<Vec<_>>());

    let stats = storage.statistics("DB").unwrap();
    assert_eq!(stats.arrivals, 40);
    assert_eq!(stats.successes + stats.rejections, 40);
    assert!(stats.rejections > 0);
    assert_eq!(stats.rejections, sim.service("DB").unwrap().rejection_count());
}

#[test]
fn busy_workers_never_exceed_capacity() {
    let (mut sim, _) = single_service(3, ThrottlingSpec::None, 7);
    let replies: Replies = Rc::default();
    for delay in 0..30 {
        let (ok, err) = sinks(&replies);
        sim.schedule_request(delay, "DB", "NOOP", ok, err).unwrap();
    }

    for limit in 0..=250 {
        sim.run_until(limit, &mut NoopObserver).unwrap();
        let pool = sim.service("DB").unwrap().pool();
        assert!(pool.busy() <= pool.capacity(), "busy {} at {limit}", pool.busy());
    }
    assert_eq!(replies.borrow().len(), 30);
}

#[test]
fn queued_requests_are_served_in_arrival_order() {
    let (mut sim, _) = single_service(1, ThrottlingSpec::None, 2);
    let replies: Replies = Rc::default();
    for _ in 0..6 {
        submit(&mut sim, &replies);
    }
    sim.run_until(100, &mut NoopObserver).unwrap();

    let order: Vec<u64> = replies.borrow().iter().map(|(id, _)| id.0).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn tail_drop_readmits_after_draining() {
    let (mut sim, _) = single_service(1, ThrottlingSpec::tail_drop(2), 10);
    let replies: Replies = Rc::default();
    for _ in 0..3 {
        assert_eq!(submit(&mut sim, &replies), Admission::Queued);
    }
    assert_eq!(submit(&mut sim, &replies), Admission::Rejected);

    // First completion at 10 frees a slot in the queue.
    sim.run_until(10, &mut NoopObserver).unwrap();
    assert_eq!(sim.service("DB").unwrap().queue_length(), 1);
    assert_eq!(submit(&mut sim, &replies), Admission::Queued);
}

#[test]
fn unbounded_policy_never_rejects() {
    let (mut sim, _) = single_service(1, ThrottlingSpec::None, 1);
    let replies: Replies = Rc::default();
    for _ in 0..500 {
        assert_eq!(submit(&mut sim, &replies), Admission::Queued);
    }
    assert_eq!(sim.service("DB").unwrap().rejection_count(), 0);
}

#[test]
fn zero_time_trigger_cycle_stops_at_budget_and_stays_stopped() {
    let program = Program::new(vec![
        Expression::define_service(
            "Ping",
            vec![Expression::define_operation("Hit", vec![Expression::trigger("Pong", "Hit")])],
        ),
        Expression::define_service(
            "Pong",
            vec![Expression::define_operation("Hit", vec![Expression::trigger("Ping", "Hit")])],
        ),
    ]);
    let config = SimulationConfig {
        max_events: Some(1_000),
        ..SimulationConfig::default()
    };
    let mut sim = Factory::new(config)
        .unwrap()
        .build(&program, Box::new(InMemoryStorage::new()))
        .unwrap();
    let replies: Replies = Rc::default();
    let (ok, err) = sinks(&replies);
    sim.schedule_request(0, "Ping", "Hit", ok, err).unwrap();

    let first = sim.run_until(10, &mut NoopObserver).unwrap();
    assert!(first.stopped_early);
    assert_eq!(first.end, 0);
    assert!(sim.budget_spent());
    assert_eq!(*replies.borrow(), vec![(RequestId(0), ReplyKind::Success)]);

    for _ in 0..2 {
        let again = sim.run_until(10, &mut NoopObserver).unwrap();
        assert!(again.stopped_early);
        assert_eq!(again.events_dispatched, 0);
        assert_eq!(again.end, 0);
    }
    assert_eq!(sim.steps(), 1_000);
}
