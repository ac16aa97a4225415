use groupcomm::collective::{SystemOperation, UserOperation};
use groupcomm::traits::*;

#[test]
fn broadcast_reaches_every_rank() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let root = world.process_at_rank(1);
        let mut data = if world.rank() == 1 {
            vec![2u64, 4, 8]
        } else {
            Vec::new()
        };
        root.broadcast_into(&mut data);
        assert_eq!(data, [2, 4, 8]);
    })
    .unwrap();
}

#[test]
fn broadcast_from_into_covers_the_root() {
    groupcomm::run(3, |ctx| {
        let world = ctx.world();
        let root = world.process_at_rank(0);
        let send = if world.rank() == 0 { vec![5i32; 2] } else { Vec::new() };
        let mut recv = vec![0i32; 2];
        root.broadcast_from_into(&send, &mut recv);
        assert_eq!(recv, [5, 5]);
    })
    .unwrap();
}

#[test]
fn allreduce_sums_the_ranks() {
    groupcomm::run(5, |ctx| {
        let world = ctx.world();
        let n = world.size();
        let mut total = 0i32;
        world.all_reduce_into(&(world.rank() + 1), &mut total, SystemOperation::sum());
        assert_eq!(total, n * (n + 1) / 2);
    })
    .unwrap();
}

#[test]
fn allreduce_in_place_accumulates_vectors() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let mut buf = vec![world.rank() as f64, 1.0];
        world.all_reduce_in_place(&mut buf, SystemOperation::sum());
        assert_eq!(buf, [6.0, 4.0]);
    })
    .unwrap();
}

#[test]
fn reduce_delivers_only_at_the_root() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let contribution = [world.rank(), -world.rank()];
        if world.rank() == 2 {
            let mut extrema = [0i32; 2];
            world
                .process_at_rank(2)
                .reduce_into_root(&contribution, &mut extrema, SystemOperation::max());
            assert_eq!(extrema, [3, 0]);
        } else {
            world
                .process_at_rank(2)
                .reduce_into(&contribution, SystemOperation::max());
        }
    })
    .unwrap();
}

#[test]
fn reduce_in_place_at_the_root() {
    groupcomm::run(3, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            let mut buf = [world.rank() + 1];
            world
                .process_at_rank(0)
                .reduce_in_place_root(&mut buf, SystemOperation::product());
            assert_eq!(buf, [6]);
        } else {
            world
                .process_at_rank(0)
                .reduce_into(&[world.rank() + 1], SystemOperation::product());
        }
    })
    .unwrap();
}

#[test]
fn noncommutative_reductions_fold_in_rank_order() {
    // Decimal-digit concatenation is associative but not commutative, so
    // the result is only 1234 when partials combine in ascending rank
    // order.
    let concat = |acc: &mut [i64], rhs: &[i64]| {
        for (a, &b) in acc.iter_mut().zip(rhs) {
            *a = *a * 10 + b;
        }
    };
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let op = UserOperation::associative(concat);
        let mut folded = 0i64;
        world.all_reduce_into(&(world.rank() as i64 + 1), &mut folded, &op);
        assert_eq!(folded, 1234);
    })
    .unwrap();
}

#[test]
fn logical_reductions_over_bools() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let mut all = false;
        world.all_reduce_into(&true, &mut all, SystemOperation::logical_and());
        assert!(all);
        let mut any = false;
        world.all_reduce_into(&(world.rank() == 0), &mut any, SystemOperation::logical_or());
        assert!(any);
    })
    .unwrap();
}

#[test]
fn collectives_work_on_derived_communicators() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let dup = world.duplicate();
        let mut total = 0i32;
        dup.all_reduce_into(&1i32, &mut total, SystemOperation::sum());
        assert_eq!(total, 4);
        dup.barrier();
    })
    .unwrap();
}
