//! End-to-end method runs: every test forks a real child

use heapxfer_core::{
    settled_total, ChildExit, Method, Result, TransferConfig, TransferError, TransferOutcome, MIB,
};
use heapxfer_engine::{
    map_heap_file, ChildContext, HeapBuffer, Orchestrator, ParentContext, PlatformUtils,
    ReceivedHeap, TransferStrategy,
};
use serial_test::serial;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::Instant;

fn config(scratch: &Path, heap_mb: u64, asyncios: usize, method: Method) -> TransferConfig {
    TransferConfig::default()
        .with_heap_mb(heap_mb)
        .unwrap()
        .with_asyncios(asyncios)
        .with_method(Some(method))
        .with_scratch_path(scratch.join("heapfile"))
}

fn cross_process_allowed() -> bool {
    if PlatformUtils::cross_process_memory_supported() {
        return true;
    }
    println!("process_vm_readv denied here, skipping cross-process method");
    false
}

/// Positional write that flips one byte in the middle of the file
struct CorruptingWrite;

impl TransferStrategy for CorruptingWrite {
    fn method(&self) -> Method {
        Method::SyncWrite
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let bytes = heap.as_slice()?;
        let file = ctx.create_backing(0)?.file()?;
        file.write_all_at(bytes, 0)?;
        file.write_all_at(b"x", (bytes.len() / 2) as u64)?;
        Ok(TransferOutcome::with_bytes(bytes.len() as u64))
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        let view = map_heap_file(&ctx.config.scratch_path, ctx.config.heap_size)?;
        Ok(ReceivedHeap::Mapped(view))
    }
}

#[test]
#[serial]
fn test_overlapped_write_four_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 64, 4, Method::OverlappedWrite);
    let orchestrator = Orchestrator::new(config).unwrap();

    let summary = orchestrator.run().unwrap();
    assert_eq!(summary.reports.len(), 1);
    let report = &summary.reports[0];

    let operations = &report.transfer.operations;
    assert_eq!(operations.len(), 4);
    for (i, op) in operations.iter().enumerate() {
        assert_eq!(op.offset, (i * 16 * MIB) as u64);
        assert_eq!(op.len, (16 * MIB) as u64);
        assert_eq!(op.error, 0);
        assert!(op.succeeded());
    }
    assert_eq!(settled_total(operations), Some(67_108_864));
    assert_eq!(report.transfer.bytes_transferred, 67_108_864);

    let child = report.child.as_ref().unwrap();
    assert_eq!(child.checksum, Some(report.parent_checksum));
    assert_eq!(report.child_exit, ChildExit::Exited(0));
    assert!(report.succeeded());
}

#[test]
#[serial]
fn test_remote_read_lands_at_parent_address() {
    if !cross_process_allowed() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(dir.path(), 16, 1, Method::RemoteRead)).unwrap();

    let report = orchestrator.run_method(Method::RemoteRead).unwrap();
    let child = report.child.as_ref().unwrap();

    assert_eq!(child.address, report.heap_address);
    assert_eq!(child.received_bytes, 16_777_216);
    assert_eq!(child.checksum, Some(report.parent_checksum));
    assert_eq!(report.transfer.bytes_transferred, 0);
}

#[test]
#[serial]
fn test_remote_write_handshake() {
    if !cross_process_allowed() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(dir.path(), 8, 4, Method::RemoteWrite)).unwrap();

    let started = Instant::now();
    let report = orchestrator.run_method(Method::RemoteWrite).unwrap();
    let wall = started.elapsed().as_micros() as u64;
    let child = report.child.as_ref().unwrap();

    assert!(report.succeeded());
    assert_eq!(report.transfer.bytes_transferred, (8 * MIB) as u64);
    assert_eq!(child.address, report.heap_address);
    assert_eq!(child.checksum, Some(report.parent_checksum));

    // both sides block on the other once, and report it apart from work
    assert!(report.transfer.handshake_wait_micros > 0);
    assert!(child.handshake_wait_micros > 0);
    assert!(child.work_micros + child.handshake_wait_micros <= wall);
    assert!(report.parent_work_micros + report.transfer.handshake_wait_micros <= wall);
}

#[test]
#[serial]
fn test_aio_write_reports_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(dir.path(), 8, 8, Method::AioWrite)).unwrap();

    let report = orchestrator.run_method(Method::AioWrite).unwrap();

    assert!(report.succeeded());
    assert!(report.transfer.signals_received.is_some());
    assert_eq!(report.transfer.finished, Some(8));
    assert_eq!(report.transfer.operations.len(), 8);
    assert!(report.transfer.operations.iter().all(|op| op.succeeded()));
    assert_eq!(settled_total(&report.transfer.operations), Some((8 * MIB) as u64));
}

#[test]
#[serial]
fn test_mapped_copy_reports_copy_time() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(dir.path(), 4, 2, Method::MappedCopy)).unwrap();

    let report = orchestrator.run_method(Method::MappedCopy).unwrap();
    assert!(report.succeeded());
    assert!(report.transfer.copy_micros.is_some());
}

#[test]
#[serial]
fn test_every_method_small_heap() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("heapfile");
    let cross_process = PlatformUtils::cross_process_memory_supported();

    for method in Method::ALL {
        if !cross_process && matches!(method, Method::RemoteRead | Method::RemoteWrite) {
            continue;
        }
        let orchestrator = Orchestrator::new(config(dir.path(), 2, 4, method)).unwrap();
        let report = orchestrator.run_method(method).unwrap();

        println!("{} took {:?}", method, report.total_work());
        assert!(report.succeeded(), "{} failed: {:?}", method, report);
        match method {
            Method::Reserved => {
                let child = report.child.as_ref().unwrap();
                assert_eq!(child.checksum, None);
                assert_eq!(child.received_bytes, 0);
            }
            _ => assert_eq!(report.child.as_ref().unwrap().received_bytes, (2 * MIB) as u64),
        }
        // at most one scratch file, and none once the method is done
        assert!(!scratch.exists(), "{} left its backing file behind", method);
    }
}

#[test]
#[serial]
fn test_scratch_file_removed_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("heapfile");
    let orchestrator = Orchestrator::new(config(dir.path(), 1, 1, Method::SyncWrite)).unwrap();

    orchestrator.run().unwrap();
    assert!(!scratch.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_corrupt_heap_fails_strict_run() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(config(dir.path(), 1, 1, Method::SyncWrite)).unwrap();

    match orchestrator.run_strategy(&CorruptingWrite) {
        Err(TransferError::ChildFailed { reason, .. }) => {
            assert_eq!(reason, "exited with status 1")
        }
        other => panic!("expected a failed child, got {:?}", other),
    }
    assert!(!dir.path().join("heapfile").exists());
}

#[test]
#[serial]
fn test_corrupt_heap_reported_when_lenient() {
    let dir = tempfile::tempdir().unwrap();
    let config = TransferConfig {
        strict_child_status: false,
        ..config(dir.path(), 1, 1, Method::SyncWrite)
    };
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run_strategy(&CorruptingWrite).unwrap();
    assert_eq!(report.child_exit, ChildExit::Exited(1));
    assert!(report.child.is_none());
    assert!(!report.succeeded());
    assert_eq!(report.transfer.bytes_transferred, MIB as u64);
    assert!(!dir.path().join("heapfile").exists());
}

#[test]
fn test_indivisible_config_rejected_before_fork() {
    let dir = tempfile::tempdir().unwrap();
    let config = TransferConfig {
        heap_size: 100,
        asyncios: 3,
        scratch_path: dir.path().join("heapfile"),
        ..Default::default()
    };

    let err = Orchestrator::new(config).err().unwrap();
    assert!(matches!(err, TransferError::Configuration(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
