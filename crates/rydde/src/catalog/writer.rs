//! The catalog's single writer.
//!
//! Producers enqueue [`WriteOp`]s onto a bounded channel and block when it
//! fills (backpressure). One thread owns the write connection, drains the
//! queue, and commits one transaction per batch. `flush()` is a synchronous
//! barrier: it returns once every previously enqueued op is committed, which
//! is what the classifier's depth barrier and the stage boundaries rely on.

use crate::catalog::{files, folders, groups, plan};
use crate::catalog::{DecisionSource, DuplicateGroup, FileRecord, FolderAction, FolderRecord, PlanEntry};
use crate::error::{Result, RyddeError};
use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread::JoinHandle;

#[derive(Debug)]
pub enum WriteOp {
    UpsertFile(FileRecord),
    UpsertFolder(FolderRecord),
    SetFileHash {
        path: String,
        hash: String,
    },
    SetFileError {
        path: String,
        error: String,
    },
    SetFileClassification {
        path: String,
        category: String,
        source: DecisionSource,
        confidence: Option<f64>,
    },
    SetFileMetadata {
        path: String,
        metadata: BTreeMap<String, String>,
    },
    SetFileDuplicateGroup {
        path: String,
        group_id: i64,
    },
    SetFolderCounts {
        path: String,
        file_count: i64,
        dir_count: i64,
    },
    SetFolderHash {
        path: String,
        hash: String,
    },
    SetFolderDecision {
        path: String,
        action: FolderAction,
        source: DecisionSource,
        category: Option<String>,
    },
    SetFolderMetadata {
        path: String,
        metadata: BTreeMap<String, String>,
    },
    SetFolderDuplicateGroup {
        path: String,
        group_id: i64,
    },
    InsertDuplicateGroup(DuplicateGroup),
    ClearDuplicateGroups,
    UpsertPlanEntry(PlanEntry),
    ClearPlan,
}

enum WriterMsg {
    Op(WriteOp),
    Flush(Sender<()>),
}

pub struct CatalogWriter {
    tx: Sender<WriterMsg>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl CatalogWriter {
    pub(crate) fn spawn(path: PathBuf, batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let (tx, rx) = bounded::<WriterMsg>(batch_size * 2);

        let handle = std::thread::Builder::new()
            .name("catalog-writer".to_string())
            .spawn(move || writer_loop(path, batch_size, rx))?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Enqueue one op. Blocks while the queue is full.
    pub fn submit(&self, op: WriteOp) -> Result<()> {
        self.tx
            .send(WriterMsg::Op(op))
            .map_err(|_| RyddeError::InvariantViolation("catalog writer thread is gone".to_string()))
    }

    /// Commit everything enqueued so far and wait for it.
    pub fn flush(&self) -> Result<()> {
        eprintln!("DBG flush: sending flush msg");
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(WriterMsg::Flush(ack_tx))
            .map_err(|_| RyddeError::InvariantViolation("catalog writer thread is gone".to_string()))?;
        eprintln!("DBG flush: sent, waiting ack");
        let r = ack_rx
            .recv()
            .map_err(|_| RyddeError::InvariantViolation("catalog writer died mid-flush".to_string()));
        eprintln!("DBG flush: got ack {:?}", r.is_ok());
        r
    }

    /// Flush, stop the thread, and surface any write error it hit.
    pub fn close(mut self) -> Result<()> {
        let handle = self.handle.take();
        drop(self); // drops the sender; the thread drains and exits
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| RyddeError::InvariantViolation("catalog writer panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for CatalogWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Channel sender drops with self; the thread drains and exits.
            let _ = handle.join();
        }
    }
}

fn writer_loop(path: PathBuf, batch_size: usize, rx: Receiver<WriterMsg>) -> Result<()> {
    let mut conn = Connection::open(&path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let mut pending: Vec<WriteOp> = Vec::with_capacity(batch_size);

    loop {
        eprintln!("DBG writer_loop: waiting recv");
        match rx.recv() {
            Ok(WriterMsg::Op(op)) => {
                eprintln!("DBG writer_loop: got op");
                pending.push(op);
                if pending.len() >= batch_size {
                    commit_batch(&mut conn, &mut pending)?;
                }
            }
            Ok(WriterMsg::Flush(ack)) => {
                eprintln!("DBG writer_loop: got flush, committing {} pending", pending.len());
                commit_batch(&mut conn, &mut pending)?;
                eprintln!("DBG writer_loop: committed, acking");
                let _ = ack.send(());
                eprintln!("DBG writer_loop: acked");
            }
            Err(_) => {
                eprintln!("DBG writer_loop: channel closed, final commit");
                commit_batch(&mut conn, &mut pending)?;
                return Ok(());
            }
        }
    }
}

fn commit_batch(conn: &mut Connection, pending: &mut Vec<WriteOp>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    eprintln!("DBG commit_batch: starting txn for {} ops", pending.len());
    let tx = conn.transaction()?;
    eprintln!("DBG commit_batch: txn started, applying ops");
    for op in pending.drain(..) {
        apply_op(&tx, op)?;
    }
    eprintln!("DBG commit_batch: applied, committing");
    tx.commit()?;
    eprintln!("DBG commit_batch: committed");
    Ok(())
}

fn apply_op(conn: &Connection, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::UpsertFile(file) => files::upsert_file(conn, &file),
        WriteOp::UpsertFolder(folder) => folders::upsert_folder(conn, &folder),
        WriteOp::SetFileHash { path, hash } => files::update_file_hash(conn, &path, &hash),
        WriteOp::SetFileError { path, error } => files::update_file_error(conn, &path, &error),
        WriteOp::SetFileClassification {
            path,
            category,
            source,
            confidence,
        } => files::update_file_classification(conn, &path, &category, source, confidence),
        WriteOp::SetFileMetadata { path, metadata } => {
            files::update_file_metadata(conn, &path, &metadata)
        }
        WriteOp::SetFileDuplicateGroup { path, group_id } => {
            files::assign_file_duplicate_group(conn, &path, group_id)
        }
        WriteOp::SetFolderCounts {
            path,
            file_count,
            dir_count,
        } => folders::update_folder_counts(conn, &path, file_count, dir_count),
        WriteOp::SetFolderHash { path, hash } => folders::update_folder_hash(conn, &path, &hash),
        WriteOp::SetFolderDecision {
            path,
            action,
            source,
            category,
        } => folders::update_folder_decision(conn, &path, action, source, category.as_deref()),
        WriteOp::SetFolderMetadata { path, metadata } => {
            folders::update_folder_metadata(conn, &path, &metadata)
        }
        WriteOp::SetFolderDuplicateGroup { path, group_id } => {
            folders::assign_folder_duplicate_group(conn, &path, group_id)
        }
        WriteOp::InsertDuplicateGroup(group) => groups::insert_group(conn, &group),
        WriteOp::ClearDuplicateGroups => groups::clear_groups(conn),
        WriteOp::UpsertPlanEntry(entry) => plan::upsert_entry(conn, &entry),
        WriteOp::ClearPlan => plan::clear_entries(conn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use chrono::Utc;

    fn test_file(path: &str) -> FileRecord {
        let (parent, name) = path.rsplit_once('/').unwrap();
        FileRecord {
            path: path.to_string(),
            parent: parent.to_string(),
            name: name.to_string(),
            size_bytes: 1,
            modified_at: None,
            mime: None,
            content_hash: None,
            metadata: BTreeMap::new(),
            category: None,
            class_source: None,
            confidence: None,
            duplicate_group: None,
            error: None,
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn test_flush_is_a_read_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("c.db")).unwrap();
        let writer = catalog.spawn_writer(100).unwrap();

        for i in 0..10 {
            writer
                .submit(WriteOp::UpsertFile(test_file(&format!("/a/f{}", i))))
                .unwrap();
        }
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        assert_eq!(files::list_all_files(&reader).unwrap().len(), 10);

        writer.close().unwrap();
    }

    #[test]
    fn test_batch_commit_on_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("c.db")).unwrap();
        let writer = catalog.spawn_writer(2).unwrap();

        writer.submit(WriteOp::UpsertFile(test_file("/a/x"))).unwrap();
        writer.submit(WriteOp::UpsertFile(test_file("/a/y"))).unwrap();
        writer.submit(WriteOp::UpsertFile(test_file("/a/z"))).unwrap();
        writer.flush().unwrap();

        let reader = catalog.reader().unwrap();
        assert_eq!(files::list_all_files(&reader).unwrap().len(), 3);
        writer.close().unwrap();
    }

    #[test]
    fn test_close_drains_pending() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("c.db")).unwrap();
        let writer = catalog.spawn_writer(1000).unwrap();

        writer.submit(WriteOp::UpsertFile(test_file("/a/x"))).unwrap();
        writer.close().unwrap();

        let reader = catalog.reader().unwrap();
        assert_eq!(files::list_all_files(&reader).unwrap().len(), 1);
    }
}
