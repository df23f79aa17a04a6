use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rtpsvc::worker::Worker;
use rtpsvc::RtxMode;

mod common;
use common::{config, flush, init_log, send_media, sender};

#[test]
pub fn sender_on_worker() {
    init_log();

    let mut s = sender(config().set_initial_sequence_number(100));
    assert!(s.set_rtx_status(RtxMode::RETRANSMITTED));
    let history = s.history().clone();

    let worker = Arc::new(Worker::spawn("rtp-sender", s).unwrap());
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let worker = worker.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    worker
                        .post(move |s| {
                            send_media(s, &[i; 50], true, start);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let sent = worker.invoke(move |s| flush(s, start)).unwrap();
    assert_eq!(sent.len(), 40);

    // Numbered in the order the worker ran them.
    let seqs: Vec<u16> = sent.iter().map(|p| p.sequence_number()).collect();
    assert_eq!(seqs, (100..140).collect::<Vec<_>>());

    // The history is shared with the caller.
    assert_eq!(history.len(), 40);

    let later = start + Duration::from_millis(10);
    let resent = worker
        .invoke(move |s| {
            s.on_received_nack(&[105, 110], Duration::from_millis(5), later);
            s.pacer_mut().drain()
        })
        .unwrap();
    assert_eq!(resent.len(), 2);
    assert_eq!(resent[0].retransmitted_sequence_number(), Some(105));
}

#[test]
pub fn async_call_to_sender() {
    init_log();

    let worker = Worker::spawn("rtp-sender-async", sender(config())).unwrap();

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let state = rt.block_on(async {
        worker
            .call(|s| {
                s.on_received_ack_on_ssrc();
                s.rtp_state()
            })
            .await
    });

    assert!(state.unwrap().ssrc_has_acked);
}
