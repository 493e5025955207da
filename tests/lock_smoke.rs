// Multi-process lock smoke test for append serialization.
use std::process::{Command, Stdio};

use fifofile::api::{FifoFile, FifoOptions, InspectStatus, Utf8Codec};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_fifofile");
    Command::new(exe)
}

#[tokio::test]
async fn concurrent_push_is_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("lock.fifo");

    let workers = 8;
    let per_worker = 50;
    let mut children = Vec::new();
    for worker in 0..workers {
        let messages: Vec<String> = (0..per_worker).map(|i| format!("w{worker}-{i:03}")).collect();
        let child = cmd()
            .arg("push")
            .arg(&path)
            .args(&messages)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let queue = FifoFile::open_with(&path, FifoOptions::new().with_exit_cleanup(false), Utf8Codec)
        .expect("open");
    let report = queue.inspect().await.expect("inspect");
    assert_eq!(report.status, InspectStatus::Ok);
    assert_eq!(report.frames, (workers * per_worker) as u64);

    let mut received = Vec::new();
    while let Some(message) = queue.try_recv().await.expect("recv") {
        received.push(message);
    }
    assert_eq!(received.len(), workers * per_worker);

    // Each push is one locked batch, so a worker's messages stay contiguous and ordered.
    for chunk in received.chunks(per_worker) {
        let worker = chunk[0].split('-').next().expect("prefix").to_string();
        let expected: Vec<String> = (0..per_worker).map(|i| format!("{worker}-{i:03}")).collect();
        assert_eq!(chunk, expected.as_slice());
    }
}
