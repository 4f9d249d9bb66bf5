//! Per-channel shell state: working directory and line buffer.

use crate::error::ShellError;
use crate::policy::ServerPolicy;
use std::path::{Path, PathBuf};

/// Longest input line accepted, in bytes. Further input is dropped until the line ends.
pub const MAX_LINE_BYTES: usize = 4096;

/// One interactive session. Owned exclusively by the task driving its channel.
#[derive(Debug)]
pub struct Session {
    user: String,
    peer: String,
    cwd: PathBuf,
    buffer: Vec<u8>,
    last_was_cr: bool,
}

impl Session {
    /// Start in the policy's sandbox root.
    pub fn new(policy: &ServerPolicy, user: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            peer: peer.into(),
            cwd: policy.sandbox_root.clone(),
            buffer: Vec::new(),
            last_was_cr: false,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Replace the working directory. The new path must be under an approved root.
    pub fn set_cwd(&mut self, policy: &ServerPolicy, path: PathBuf) -> Result<(), ShellError> {
        if !policy.is_path_allowed(&path) {
            return Err(ShellError::PathViolation(path.display().to_string()));
        }
        self.cwd = path;
        Ok(())
    }

    /// Append a byte; false (and nothing stored) once the line is full.
    pub(crate) fn push_byte(&mut self, byte: u8) -> bool {
        if self.buffer.len() >= MAX_LINE_BYTES {
            return false;
        }
        self.buffer.push(byte);
        true
    }

    /// Drop the last character (a whole UTF-8 sequence). False if the buffer was empty.
    pub(crate) fn pop_char(&mut self) -> bool {
        let Some(last) = self.buffer.pop() else {
            return false;
        };
        if last >= 0x80 {
            // Continuation bytes are 0b10xx_xxxx; stop after the lead byte.
            let mut byte = last;
            while byte & 0xC0 == 0x80 {
                match self.buffer.pop() {
                    Some(prev) => byte = prev,
                    None => break,
                }
            }
        }
        true
    }

    pub(crate) fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub(crate) fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Record whether the previous byte was CR; returns the old value.
    pub(crate) fn swap_last_was_cr(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.last_was_cr, value)
    }
}
