// Property tests for ordering guarantees
//
// Outbound: bytes reach the radio in write order, in chunks no larger than
// the payload size, with at most one chunk in flight.
// Inbound: no read is lost, duplicated or reordered across any sequence of
// attach, detach and loop runs.

mod common;

use common::*;
use proptest::prelude::*;
use std::sync::Arc;

use gattserial_core::{GattTransport, ManualLoop, SerialService};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_writes_preserve_order_and_flow_control(
        mtu in 23u16..=517,
        writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 1..8),
    ) {
        let (radio, transport, _listener) = connected_transport(Some(mtu));
        let payload = transport.payload_size();
        prop_assert_eq!(payload, usize::from(mtu - 3));

        let mut confirmed = 0usize;
        for data in &writes {
            transport.write(data).expect("write");
            // at most one outstanding chunk
            prop_assert!(radio.written().len() <= confirmed + 1);
        }
        while transport.write_in_flight() {
            confirm_write(&transport);
            confirmed += 1;
            prop_assert!(radio.written().len() <= confirmed + 1);
        }

        let written = radio.written();
        prop_assert_eq!(written.len(), confirmed);
        prop_assert!(written.iter().all(|chunk| !chunk.is_empty() && chunk.len() <= payload));
        prop_assert_eq!(written.concat(), writes.concat());
    }
}

#[derive(Debug, Clone)]
enum Step {
    Read(Vec<u8>),
    Detach,
    Attach,
    RunOne,
    RunAll,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 1..8).prop_map(Step::Read),
        1 => Just(Step::Detach),
        1 => Just(Step::Attach),
        1 => Just(Step::RunOne),
        1 => Just(Step::RunAll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_reads_survive_attach_detach(steps in prop::collection::vec(step(), 0..40)) {
        let looper = Arc::new(ManualLoop::new());
        let transport = Arc::new(GattTransport::new(FakeRadio::new()));
        let service = SerialService::new(looper.clone());
        service.connect(transport.clone(), &device()).expect("connect");
        establish(&transport, Some(23));

        let consumer = Consumer::new();
        let mut expected = Vec::new();
        for step in steps {
            match step {
                Step::Read(data) => {
                    expected.extend_from_slice(&data);
                    notify(&transport, &data);
                }
                Step::Detach => service.detach(),
                Step::Attach => service.attach(consumer.clone()).expect("attach"),
                Step::RunOne => {
                    looper.run_one();
                }
                Step::RunAll => {
                    looper.run_pending();
                }
            }
        }
        service.attach(consumer.clone()).expect("final attach");
        looper.run_pending();

        prop_assert_eq!(consumer.bytes(), expected);
        let connects = consumer
            .events()
            .iter()
            .filter(|e| **e == gattserial_core::SerialEvent::Connected)
            .count();
        prop_assert_eq!(connects, 1);
        prop_assert_eq!(service.queued_events(), 0);
    }
}
