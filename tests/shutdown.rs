use std::{io::Cursor, thread, time::Duration};

use gnssai_relay::{CancelToken, FrameReader, OutputRelay, Pipeline, Runner, SnapshotPublisher};

#[test]
fn sigterm_stops_the_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let token = CancelToken::new();
    let handler = token.clone();
    ctrlc::set_handler(move || handler.cancel()).expect("signal handler");

    let mut runner = Runner::new(
        FrameReader::new(Box::new(Cursor::new(Vec::new()))),
        Pipeline::default(),
        OutputRelay::new(dir.path().join("fifo")),
        SnapshotPublisher::new(dir.path().join("snapshot.json")),
        20,
    );
    let hdl = thread::spawn(|| {
        thread::sleep(Duration::from_millis(20));
        // SAFETY: raising a signal the handler above is installed for
        unsafe { libc::raise(libc::SIGTERM) };
    });
    runner.run(&token).expect("run");
    hdl.join().expect("join");
    assert!(token.is_cancelled());
    assert!(!runner.relay().is_connected());
}
