use groupcomm::chronometer::Chronometer;
use groupcomm::traits::*;

#[test]
fn attached_chronometer_counts_operations() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        chrono.activate();

        let peer = world.process_at_rank(1 - world.rank());
        peer.send(&world.rank());
        let (_, _) = peer.receive::<i32>();
        world.barrier();
        let mut seed = 0u32;
        world.process_at_rank(0).broadcast_into(&mut seed);

        chrono.with_timers(|timers| {
            assert_eq!(timers.get("send").unwrap().nb_calls(), 1);
            assert_eq!(timers.get("recv").unwrap().nb_calls(), 1);
            assert_eq!(timers.get("barrier").unwrap().nb_calls(), 1);
            assert_eq!(timers.get("bcast").unwrap().nb_calls(), 1);
            assert!(timers.get("reduce").is_none());
        });
    })
    .unwrap();
}

#[test]
fn deactivated_chronometer_records_nothing() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        assert!(!chrono.is_activated());

        world.barrier();
        chrono.activate();
        world.barrier();
        chrono.deactivate();
        world.barrier();

        chrono.with_timers(|timers| {
            assert_eq!(timers.get("barrier").unwrap().nb_calls(), 1);
        });
    })
    .unwrap();
}

#[test]
fn detaching_stops_the_count() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        chrono.activate();
        world.barrier();
        Chronometer::detach(&world);
        world.barrier();
        chrono.with_timers(|timers| {
            assert_eq!(timers.get("barrier").unwrap().nb_calls(), 1);
        });
    })
    .unwrap();
}

#[test]
fn dropping_the_chronometer_detaches_it() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        chrono.activate();
        drop(chrono);
        // The handle's weak reference is dead; operations run unprofiled.
        world.barrier();
    })
    .unwrap();
}

#[test]
fn one_chronometer_can_watch_several_communicators() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let dup = world.duplicate();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        chrono.attach(&dup);
        chrono.activate();

        world.barrier();
        dup.barrier();

        chrono.with_timers(|timers| {
            assert_eq!(timers.get("barrier").unwrap().nb_calls(), 2);
        });
    })
    .unwrap();
}

#[test]
fn report_mentions_every_measured_label() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        let chrono = Chronometer::new();
        chrono.attach(&world);
        chrono.activate();

        let mut sum = 0i32;
        world.all_reduce_into(&1i32, &mut sum, groupcomm::collective::SystemOperation::sum());
        world.barrier();

        let report = format!("{}", chrono);
        assert!(report.contains("[ allreduce ]"));
        assert!(report.contains("[ barrier ]"));
        assert!(report.contains("Communication Details"));
        assert!(report.contains("number of calls : 1"));
    })
    .unwrap();
}
