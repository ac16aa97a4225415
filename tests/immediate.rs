use groupcomm::error::{CANCELLED, SUCCESS};
use groupcomm::traits::*;

#[test]
fn isend_irecv_ring_round_trip() {
    groupcomm::run(4, |ctx| {
        let world = ctx.world();
        let rank = world.rank();
        let size = world.size();
        let next = world.process_at_rank((rank + 1) % size);
        let prev = world.process_at_rank((rank - 1 + size) % size);

        let outgoing = vec![rank; 3];
        let mut incoming = vec![-1; 3];
        let send = next.immediate_send(&outgoing);
        let recv = prev.immediate_receive_into(&mut incoming);
        let status = recv.wait();
        send.wait();
        assert_eq!(status.source_rank(), (rank - 1 + size) % size);
        assert_eq!(status.error(), SUCCESS);
        assert_eq!(incoming, vec![(rank - 1 + size) % size; 3]);
    })
    .unwrap();
}

#[test]
fn test_resolves_requests_without_blocking() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            let (_, _) = world.process_at_rank(1).receive::<u8>();
            world.process_at_rank(1).send(&7i32);
        } else {
            let mut value = 0i32;
            let mut request = world.process_at_rank(0).immediate_receive_into(&mut value);
            // Not sent yet, so testing must hand the request back.
            request = match request.test() {
                Ok(_) => panic!("receive completed before the message was sent"),
                Err(request) => request,
            };
            world.process_at_rank(0).send(&1u8);
            let status = loop {
                match request.test() {
                    Ok(status) => break status,
                    Err(pending) => request = pending,
                }
            };
            assert_eq!(status.count_of::<i32>(), 1);
            assert_eq!(value, 7);
        }
    })
    .unwrap();
}

#[test]
fn receive_future_yields_the_value() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            world.process_at_rank(1).send_with_tag(&2.5f64, 1);
        } else {
            let future = world.process_at_rank(0).immediate_receive_with_tag::<f64>(1);
            let (value, status) = future.get();
            assert_eq!(value, 2.5);
            assert_eq!(status.tag(), 1);
        }
    })
    .unwrap();
}

#[test]
fn receive_future_try_get_returns_the_future_while_pending() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            let (_, _) = world.process_at_rank(1).receive::<u8>();
            world.process_at_rank(1).send(&11i64);
        } else {
            let future = world.process_at_rank(0).immediate_receive::<i64>();
            let mut future = match future.try_get() {
                Ok(_) => panic!("receive completed before the message was sent"),
                Err(future) => future,
            };
            world.process_at_rank(0).send(&1u8);
            let value = loop {
                match future.try_get() {
                    Ok((value, _)) => break value,
                    Err(pending) => future = pending,
                }
            };
            assert_eq!(value, 11);
        }
    })
    .unwrap();
}

#[test]
fn cancelled_receives_leave_the_buffer_untouched() {
    groupcomm::run(1, |ctx| {
        let world = ctx.world();
        let mut buf = [3i32; 2];
        let request = world.any_process().immediate_receive_into(&mut buf);
        let status = request.cancel();
        assert_eq!(status.error(), CANCELLED);
        assert_eq!(buf, [3, 3]);
    })
    .unwrap();
}

#[test]
fn immediate_sends_complete_eagerly() {
    groupcomm::run(2, |ctx| {
        let world = ctx.world();
        if world.rank() == 0 {
            let staged: std::collections::VecDeque<i32> = [1, 2, 3].into_iter().collect();
            let request = world.process_at_rank(1).immediate_send(&staged);
            // The payload was staged into the envelope at initiation.
            drop(staged);
            assert!(request.test().is_ok());
        } else {
            let (msg, _) = world.process_at_rank(0).receive_vec::<i32>();
            assert_eq!(msg, [1, 2, 3]);
        }
    })
    .unwrap();
}

#[test]
#[should_panic(expected = "dropped without being completed")]
fn dropping_an_unresolved_request_panics() {
    groupcomm::run(1, |ctx| {
        let world = ctx.world();
        let mut buf = 0u8;
        let _request = world.any_process().immediate_receive_into(&mut buf);
        // Dropped here without wait/test/cancel.
    })
    .unwrap();
}
