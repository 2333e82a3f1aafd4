//! Run accounting: per-kind success/error counters, the net byte change, and
//! a bounded list of error summaries.

use crate::errors::OpError;
use crate::plan::OpKind;

/// Error summaries kept verbatim; anything past this is counted only.
pub const MAX_ERROR_SUMMARIES: usize = 100;

/// Outcome of one run. Counters split per operation kind so the final report
/// can show what was done and what failed, kind by kind.
#[derive(Debug, Clone, Default)]
pub struct Results {
    pub trash_root: Option<std::path::PathBuf>,
    pub log_file: Option<std::path::PathBuf>,
    pub dry_run: bool,
    pub cancelled: bool,

    pub created: u64,
    pub created_errors: u64,
    pub updated: u64,
    pub updated_errors: u64,
    pub deleted: u64,
    pub deleted_errors: u64,
    pub renamed: u64,
    pub renamed_errors: u64,
    pub dirs_created: u64,
    pub dirs_created_errors: u64,
    pub dirs_deleted: u64,
    pub dirs_deleted_errors: u64,

    /// Net change in stored bytes across successful operations only.
    pub byte_diff: i64,

    /// `ErrorKind: path` lines, capped at [`MAX_ERROR_SUMMARIES`].
    pub errors: Vec<String>,
}

impl Results {
    pub fn err_count(&self) -> u64 {
        self.created_errors
            + self.updated_errors
            + self.deleted_errors
            + self.renamed_errors
            + self.dirs_created_errors
            + self.dirs_deleted_errors
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.err_count() == 0
    }

    /// Fold one operation outcome into the counters. Byte accounting only
    /// moves on success; a failed operation changed nothing durable.
    pub(crate) fn record(&mut self, kind: OpKind, outcome: &Result<(), OpError>, byte_delta: i64) {
        match outcome {
            Ok(()) => {
                *self.success_counter(kind) += 1;
                self.byte_diff += byte_delta;
            }
            Err(e) => {
                *self.error_counter(kind) += 1;
                if self.errors.len() < MAX_ERROR_SUMMARIES {
                    self.errors.push(e.to_string());
                }
            }
        }
    }

    fn success_counter(&mut self, kind: OpKind) -> &mut u64 {
        match kind {
            OpKind::Create => &mut self.created,
            OpKind::Update => &mut self.updated,
            OpKind::Delete => &mut self.deleted,
            OpKind::Rename => &mut self.renamed,
            OpKind::CreateDir => &mut self.dirs_created,
            OpKind::DeleteDir => &mut self.dirs_deleted,
        }
    }

    fn error_counter(&mut self, kind: OpKind) -> &mut u64 {
        match kind {
            OpKind::Create => &mut self.created_errors,
            OpKind::Update => &mut self.updated_errors,
            OpKind::Delete => &mut self.deleted_errors,
            OpKind::Rename => &mut self.renamed_errors,
            OpKind::CreateDir => &mut self.dirs_created_errors,
            OpKind::DeleteDir => &mut self.dirs_deleted_errors,
        }
    }
}
