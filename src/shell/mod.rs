//! Sandboxed interactive shell.
//!
//! The engine is a byte-driven state machine. It never executes programs: every
//! verb maps to a handler in [`commands::COMMANDS`] that works on the filesystem
//! directly, and every path argument is checked against the approved roots first.

pub mod command;
pub mod commands;
pub mod session;

pub use command::Command;
pub use commands::{CommandContext, CommandSpec, Outcome, COMMANDS};
pub use session::{Session, MAX_LINE_BYTES};

use crate::audit::AuditLogger;
use crate::policy::ServerPolicy;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BELL: u8 = 0x07;

const BANNER: &str = "Sandboxed shell. Type 'help' for available commands.\n";

/// Where the engine is in its read/dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Prompting,
    Reading,
    Dispatching,
    Closed,
}

/// Bytes to send back to the client after feeding input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reaction {
    pub output: Vec<u8>,
    pub closed: bool,
}

pub struct ShellEngine {
    session: Session,
    policy: Arc<ServerPolicy>,
    audit: Arc<AuditLogger>,
    state: ShellState,
}

impl ShellEngine {
    pub fn new(
        policy: Arc<ServerPolicy>,
        audit: Arc<AuditLogger>,
        user: impl Into<String>,
        peer: impl Into<String>,
    ) -> Self {
        let session = Session::new(&policy, user, peer);
        Self {
            session,
            policy,
            audit,
            state: ShellState::Prompting,
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Banner plus first prompt.
    pub fn start(&mut self) -> Vec<u8> {
        let mut out = to_crlf(BANNER).into_bytes();
        out.extend(self.prompt());
        out
    }

    /// Render the prompt and move to `Reading`.
    pub fn prompt(&mut self) -> Vec<u8> {
        self.state = ShellState::Reading;
        format!("sandbox:{}$ ", self.session.cwd().display()).into_bytes()
    }

    /// Consume client bytes. Stops early once the session closes.
    pub fn feed(&mut self, input: &[u8]) -> Reaction {
        let mut reaction = Reaction::default();
        let mut line_full = false;
        for &byte in input {
            if self.state == ShellState::Closed {
                break;
            }
            let after_cr = self.session.swap_last_was_cr(byte == b'\r');
            match byte {
                b'\n' if after_cr => {}
                b'\r' | b'\n' => {
                    reaction.output.extend_from_slice(b"\r\n");
                    let line = self.session.take_line();
                    if line.trim().is_empty() {
                        reaction.output.extend(self.prompt());
                    } else {
                        reaction.output.extend(self.dispatch(&line));
                    }
                }
                0x08 | 0x7f => {
                    if self.session.pop_char() {
                        reaction.output.extend_from_slice(b"\x08 \x08");
                    }
                }
                0x03 => {
                    self.session.clear_buffer();
                    reaction.output.extend_from_slice(b"^C\r\n");
                    reaction.output.extend(self.prompt());
                }
                0x04 => {
                    if self.session.buffer_is_empty() {
                        reaction.output.extend_from_slice(b"\r\n");
                        reaction.output.extend(self.dispatch("exit"));
                    }
                }
                b if b >= 0x20 => {
                    if self.session.push_byte(b) {
                        reaction.output.push(b);
                    } else if !line_full {
                        reaction.output.push(BELL);
                        line_full = true;
                    }
                }
                _ => {}
            }
        }
        reaction.closed = self.state == ShellState::Closed;
        reaction
    }

    /// Run one command line. Returns its CRLF output followed by the next prompt,
    /// or just the output if the command closed the session.
    pub fn dispatch(&mut self, line: &str) -> Vec<u8> {
        self.state = ShellState::Dispatching;
        let Some(command) = Command::parse(line) else {
            return self.prompt();
        };

        tracing::debug!(
            user = %self.session.user(),
            peer = %self.session.peer(),
            verb = %command.verb,
            args = ?command.args,
            "Shell command"
        );

        let outcome = match commands::lookup(&command.verb) {
            Some(spec) => {
                let mut ctx = CommandContext {
                    session: &mut self.session,
                    policy: &self.policy,
                    audit: &self.audit,
                };
                (spec.handler)(&mut ctx, &command.args).unwrap_or_else(|e| Outcome {
                    output: format!("{}: {e}\n", command.verb),
                    close: false,
                })
            }
            None => Outcome {
                output: format!("{}: command not found\n", command.verb),
                close: false,
            },
        };

        let mut out = to_crlf(&outcome.output).into_bytes();
        if outcome.close {
            self.state = ShellState::Closed;
        } else {
            out.extend(self.prompt());
        }
        out
    }

    /// Drive the engine over a byte stream until the client leaves or runs `exit`.
    ///
    /// Input is fed on the blocking pool: command handlers call `std::fs` directly.
    pub async fn run<S>(self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut engine = self;
        let greeting = engine.start();
        stream.write_all(&greeting).await?;
        stream.flush().await?;

        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = buf[..n].to_vec();
            let (returned, reaction) = tokio::task::spawn_blocking(move || {
                let reaction = engine.feed(&chunk);
                (engine, reaction)
            })
            .await
            .map_err(std::io::Error::other)?;
            engine = returned;

            if !reaction.output.is_empty() {
                stream.write_all(&reaction.output).await?;
                stream.flush().await?;
            }
            if reaction.closed {
                break;
            }
        }
        Ok(())
    }
}

/// Convert bare `\n` to `\r\n`.
fn to_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::forwarding::ForwardingRules;
    use tempfile::TempDir;

    fn engine(root: &std::path::Path) -> ShellEngine {
        let policy = ServerPolicy::new(
            Credentials {
                username: "u".into(),
                password: "p".into(),
            },
            ForwardingRules::default(),
            root,
            &[root.to_path_buf()],
        )
        .unwrap();
        ShellEngine::new(
            Arc::new(policy),
            Arc::new(AuditLogger::disabled()),
            "u",
            "127.0.0.1:40000",
        )
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn crlf_conversion_is_idempotent() {
        assert_eq!(to_crlf("a\nb\r\n"), "a\r\nb\r\n");
        assert_eq!(to_crlf(""), "");
    }

    #[test]
    fn start_prompts_with_cwd() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        let out = text(&e.start());
        let root = tmp.path().canonicalize().unwrap();
        assert!(out.ends_with(&format!("sandbox:{}$ ", root.display())));
        assert_eq!(e.state(), ShellState::Reading);
    }

    #[test]
    fn printable_bytes_echo_and_enter_dispatches() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let r = e.feed(b"pwd");
        assert_eq!(r.output, b"pwd");
        let r = e.feed(b"\r");
        let out = text(&r.output);
        let root = tmp.path().canonicalize().unwrap();
        assert!(out.starts_with(&format!("\r\n{}\r\n", root.display())));
        assert!(out.ends_with("$ "));
    }

    #[test]
    fn lf_after_cr_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let out = text(&e.feed(b"\r\n").output);
        assert_eq!(out.matches("sandbox:").count(), 1);
        let out = text(&e.feed(b"\n\n").output);
        assert_eq!(out.matches("sandbox:").count(), 2);
    }

    #[test]
    fn backspace_edits_buffer() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let r = e.feed(b"pwx\x7f");
        assert!(r.output.ends_with(b"\x08 \x08"));
        let r = e.feed(b"d\r");
        assert!(!text(&r.output).contains("command not found"));

        // Nothing to erase: no echo.
        assert!(e.feed(b"\x08").output.is_empty());
    }

    #[test]
    fn interrupt_clears_line() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        e.feed(b"rm important");
        let out = text(&e.feed(b"\x03").output);
        assert!(out.starts_with("^C\r\n"));
        assert_eq!(e.state(), ShellState::Reading);
        let out = text(&e.feed(b"\r").output);
        assert!(!out.contains("rm:"));
    }

    #[test]
    fn unknown_verb_is_reported() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let out = text(&e.feed(b"Sudo ls\r").output);
        assert!(out.contains("sudo: command not found\r\n"));
        assert_eq!(e.state(), ShellState::Reading);
    }

    #[test]
    fn verbs_match_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let out = text(&e.feed(b"PWD\r").output);
        assert!(!out.contains("command not found"));
    }

    #[test]
    fn other_control_bytes_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        assert!(e.feed(b"\x1b\x07\x00").output.is_empty());
    }

    #[test]
    fn exit_closes_and_stops_consuming() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let r = e.feed(b"exit\rpwd\r");
        assert!(r.closed);
        let out = text(&r.output);
        assert!(out.contains("Goodbye!\r\n"));
        assert!(!out.ends_with("$ "));
        assert_eq!(e.state(), ShellState::Closed);
    }

    #[test]
    fn ctrl_d_exits_only_on_empty_line() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        assert!(!e.feed(b"ls\x04").closed);
        e.feed(b"\x03");
        assert!(e.feed(b"\x04").closed);
    }

    #[test]
    fn denied_path_keeps_session_open() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let before = e.session().cwd().to_path_buf();
        let out = text(&e.feed(b"cd ../etc\r").output);
        assert!(out.contains("cd: permission denied"));
        assert_eq!(e.session().cwd(), before);
        assert_eq!(e.state(), ShellState::Reading);
    }

    #[test]
    fn overlong_line_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let mut e = engine(tmp.path());
        e.start();
        let flood = vec![b'a'; MAX_LINE_BYTES * 4];
        let r = e.feed(&flood);
        assert_eq!(r.output.len(), MAX_LINE_BYTES + 1);
        assert_eq!(*r.output.last().unwrap(), BELL);

        let out = text(&e.feed(b"\r").output);
        assert!(out.len() < MAX_LINE_BYTES + 256);
        assert!(out.contains("command not found"));

        // The next line starts empty again.
        let out = text(&e.feed(b"pwd\r").output);
        assert!(!out.contains("command not found"));
    }

    #[tokio::test]
    async fn concurrent_sessions_share_one_runtime_thread() {
        let tmp = TempDir::new().unwrap();
        let mut tasks = Vec::new();
        let mut clients = Vec::new();
        for _ in 0..2 {
            let e = engine(tmp.path());
            let (client, mut server) = tokio::io::duplex(4096);
            tasks.push(tokio::spawn(async move { e.run(&mut server).await }));
            clients.push(client);
        }
        for client in &mut clients {
            client.write_all(b"ls\rexit\r").await.unwrap();
        }
        for mut client in clients {
            let mut out = Vec::new();
            client.read_to_end(&mut out).await.unwrap();
            assert!(text(&out).contains("Goodbye!"));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn run_drives_a_duplex_stream() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("note.txt"), "line one\nline two").unwrap();
        let e = engine(tmp.path());

        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { e.run(&mut server).await });

        client.write_all(b"cat note.txt\rexit\r").await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        task.await.unwrap().unwrap();

        let out = text(&received);
        assert!(out.contains("line one\r\nline two\r\n"));
        assert!(out.contains("Goodbye!"));
    }
}
