//! Kept in its own test binary so no other test opens descriptors meanwhile.

#![cfg(target_os = "linux")]

use pt_session::pty::{PtyError, PtyProcess};
use std::path::Path;
use std::time::{Duration, Instant};

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("read /proc/self/fd")
        .count()
}

/// The pty reader thread closes its descriptor shortly after the child dies.
fn settle_to(baseline: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut now = open_fds();
    while now > baseline && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
        now = open_fds();
    }
    now
}

#[test]
fn start_stop_cycles_do_not_leak_descriptors() {
    let baseline = open_fds();

    for _ in 0..50 {
        let mut p = PtyProcess::new();
        let err = p.start(Path::new("/nonexistent/shell"), 24, 80).unwrap_err();
        assert!(matches!(err, PtyError::ShellNotFound(_)));
        p.stop();
    }
    assert_eq!(open_fds(), baseline, "failed starts must not allocate");

    for _ in 0..10 {
        let mut p = PtyProcess::new();
        p.start(Path::new("/bin/sh"), 24, 80).expect("start sh");
        p.stop();
        p.stop();
    }
    let after = settle_to(baseline);
    assert!(after <= baseline, "leaked descriptors: {baseline} before, {after} after");
}
