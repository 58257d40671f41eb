//! Chunked upload sessions for large reports.
//!
//! Sessions are in-memory: start allocates a GUID, append adds ordered
//! base64 chunks, commit hands the assembled bytes back to the caller for
//! the same ingest path an inline completion takes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use obscura_protocol::Guid;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Refuse uploads that claim to be larger than this (64 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("unknown upload session")]
    UnknownSession,
    #[error("chunk {got} out of order, expected {expected}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("chunk is not valid base64")]
    BadEncoding,
    #[error("upload exceeds declared size")]
    TooLarge,
}

struct UploadSession {
    agent_guid: String,
    job_guid: Option<Guid>,
    total_size: u64,
    next_index: u64,
    buf: Vec<u8>,
}

/// A fully assembled upload.
#[derive(Debug)]
pub struct AssembledUpload {
    pub agent_guid: String,
    pub job_guid: Option<Guid>,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct UploadSessions {
    sessions: Mutex<HashMap<Guid, UploadSession>>,
}

impl UploadSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &self,
        agent_guid: &str,
        job_guid: Option<Guid>,
        total_size: u64,
    ) -> Result<Guid, UploadError> {
        if total_size > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge);
        }
        let upload_guid = Guid::new();
        let session = UploadSession {
            agent_guid: agent_guid.to_string(),
            job_guid,
            total_size,
            next_index: 0,
            buf: Vec::new(),
        };
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(upload_guid, session);
        }
        Ok(upload_guid)
    }

    pub fn append(
        &self,
        upload_guid: Guid,
        agent_guid: &str,
        index: u64,
        data_b64: &str,
    ) -> Result<(), UploadError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| UploadError::UnknownSession)?;
        let session = sessions
            .get_mut(&upload_guid)
            .filter(|s| s.agent_guid == agent_guid)
            .ok_or(UploadError::UnknownSession)?;

        if index != session.next_index {
            return Err(UploadError::OutOfOrder {
                expected: session.next_index,
                got: index,
            });
        }

        let chunk = BASE64
            .decode(data_b64)
            .map_err(|_| UploadError::BadEncoding)?;
        if session.buf.len() as u64 + chunk.len() as u64 > session.total_size {
            sessions.remove(&upload_guid);
            return Err(UploadError::TooLarge);
        }

        session.buf.extend_from_slice(&chunk);
        session.next_index += 1;
        Ok(())
    }

    pub fn commit(
        &self,
        upload_guid: Guid,
        agent_guid: &str,
    ) -> Result<AssembledUpload, UploadError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| UploadError::UnknownSession)?;
        let owns = sessions
            .get(&upload_guid)
            .is_some_and(|s| s.agent_guid == agent_guid);
        if !owns {
            return Err(UploadError::UnknownSession);
        }
        let session = sessions
            .remove(&upload_guid)
            .ok_or(UploadError::UnknownSession)?;

        Ok(AssembledUpload {
            agent_guid: session.agent_guid,
            job_guid: session.job_guid,
            bytes: session.buf,
        })
    }
}
