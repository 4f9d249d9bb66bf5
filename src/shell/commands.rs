//! Command table and filesystem handlers.
//!
//! Every handler that touches storage resolves its argument and checks containment
//! first; a denied check returns before any filesystem call.

use super::session::Session;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::containment::PathDecision;
use crate::error::ShellError;
use crate::policy::ServerPolicy;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::PathBuf;

/// Largest file `cat` will print.
pub const MAX_CAT_BYTES: u64 = 8 * 1024 * 1024;

/// What a handler produced. Text uses `\n`; the engine converts to CRLF.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub output: String,
    pub close: bool,
}

impl Outcome {
    fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            close: false,
        }
    }

    fn line(output: impl std::fmt::Display) -> Self {
        Self::text(format!("{output}\n"))
    }
}

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub session: &'a mut Session,
    pub policy: &'a ServerPolicy,
    pub audit: &'a AuditLogger,
}

pub type Handler = fn(&mut CommandContext<'_>, &[String]) -> Result<Outcome, ShellError>;

/// One entry of the command table.
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub handler: Handler,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "ls",
        usage: "ls [dir]",
        summary: "list directory contents",
        handler: ls,
    },
    CommandSpec {
        name: "cd",
        usage: "cd [dir]",
        summary: "change directory (no argument: sandbox root)",
        handler: cd,
    },
    CommandSpec {
        name: "pwd",
        usage: "pwd",
        summary: "print working directory",
        handler: pwd,
    },
    CommandSpec {
        name: "cat",
        usage: "cat <file>",
        summary: "print file contents",
        handler: cat,
    },
    CommandSpec {
        name: "mkdir",
        usage: "mkdir <dir>",
        summary: "create a directory",
        handler: mkdir,
    },
    CommandSpec {
        name: "rmdir",
        usage: "rmdir <dir>",
        summary: "remove an empty directory",
        handler: rmdir,
    },
    CommandSpec {
        name: "touch",
        usage: "touch <file>",
        summary: "create an empty file if absent",
        handler: touch,
    },
    CommandSpec {
        name: "rm",
        usage: "rm <file>",
        summary: "remove a file",
        handler: rm,
    },
    CommandSpec {
        name: "help",
        usage: "help",
        summary: "show this help",
        handler: help,
    },
    CommandSpec {
        name: "exit",
        usage: "exit",
        summary: "close the session",
        handler: exit,
    },
    CommandSpec {
        name: "quit",
        usage: "quit",
        summary: "close the session",
        handler: exit,
    },
];

/// Find the handler for an already lower-cased verb.
pub fn lookup(verb: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == verb)
}

/// Resolve `arg` and require containment, auditing violations.
fn guarded(ctx: &CommandContext<'_>, verb: &str, arg: &str) -> Result<PathBuf, ShellError> {
    let decision = ctx.policy.check_path(ctx.session.cwd(), arg);
    admit(ctx, verb, arg, decision)
}

/// As [`guarded`], for commands that act on the entry itself rather than a link target.
fn guarded_entry(ctx: &CommandContext<'_>, verb: &str, arg: &str) -> Result<PathBuf, ShellError> {
    let decision = ctx.policy.check_entry(ctx.session.cwd(), arg);
    admit(ctx, verb, arg, decision)
}

fn admit(
    ctx: &CommandContext<'_>,
    verb: &str,
    arg: &str,
    decision: PathDecision,
) -> Result<PathBuf, ShellError> {
    if decision.contained {
        return Ok(decision.path);
    }
    tracing::warn!(
        user = %ctx.session.user(),
        peer = %ctx.session.peer(),
        command = verb,
        input = %arg,
        resolved = %decision.path.display(),
        "Path outside approved directories"
    );
    ctx.audit.record(
        AuditEvent::new(AuditEventType::PathViolation)
            .with_actor(
                Some(ctx.session.user().to_string()),
                Some(ctx.session.peer().to_string()),
            )
            .with_path(verb, &decision.path.display().to_string()),
    );
    let shown = if arg.is_empty() { "." } else { arg };
    Err(ShellError::PathViolation(shown.to_string()))
}

fn single_arg<'a>(args: &'a [String], usage: &'static str) -> Result<&'a str, ShellError> {
    match args {
        [one] => Ok(one.as_str()),
        _ => Err(ShellError::Usage(usage)),
    }
}

fn optional_arg<'a>(args: &'a [String], usage: &'static str) -> Result<Option<&'a str>, ShellError> {
    match args {
        [] => Ok(None),
        [one] => Ok(Some(one.as_str())),
        _ => Err(ShellError::Usage(usage)),
    }
}

fn ls(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = optional_arg(args, "ls [dir]")?.unwrap_or("");
    let path = guarded(ctx, "ls", arg)?;
    if !path.is_dir() {
        return Err(ShellError::NotFound(arg.to_string()));
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Follows symlinks; a dangling link is listed bare.
        let label = match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_dir() => format!("{name}/"),
            Ok(meta) if meta.is_file() => format!("{name}  ({} bytes)", meta.len()),
            _ => name.clone(),
        };
        entries.push((name, label));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (_, label) in entries {
        out.push_str(&label);
        out.push('\n');
    }
    Ok(Outcome::text(out))
}

fn cd(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let target = match optional_arg(args, "cd [dir]")? {
        Some(arg) => {
            let path = guarded(ctx, "cd", arg)?;
            if !path.exists() {
                return Err(ShellError::NotFound(arg.to_string()));
            }
            if !path.is_dir() {
                return Err(ShellError::NotADirectory(arg.to_string()));
            }
            path
        }
        None => ctx.policy.sandbox_root.clone(),
    };
    ctx.session.set_cwd(ctx.policy, target)?;
    Ok(Outcome::line(ctx.session.cwd().display()))
}

fn pwd(ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, ShellError> {
    Ok(Outcome::line(ctx.session.cwd().display()))
}

fn cat(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = single_arg(args, "cat <file>")?;
    let path = guarded(ctx, "cat", arg)?;
    if !path.is_file() {
        return Err(ShellError::NotFound(arg.to_string()));
    }
    let file = fs::File::open(&path)?;
    let size = file.metadata()?.len();
    if size > MAX_CAT_BYTES {
        return Err(too_large(arg, size));
    }
    // The file may grow after the size check.
    let mut bytes = Vec::with_capacity(size as usize);
    file.take(MAX_CAT_BYTES + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_CAT_BYTES {
        return Err(too_large(arg, bytes.len() as u64));
    }
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(Outcome::text(text))
}

fn too_large(arg: &str, size: u64) -> ShellError {
    ShellError::Refused(format!(
        "{arg}: file too large ({size} bytes, limit {MAX_CAT_BYTES})"
    ))
}

fn mkdir(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = single_arg(args, "mkdir <dir>")?;
    let path = guarded(ctx, "mkdir", arg)?;
    fs::create_dir_all(&path)?;
    Ok(Outcome::line(format_args!("created directory {}", path.display())))
}

fn rmdir(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = single_arg(args, "rmdir <dir>")?;
    let path = guarded_entry(ctx, "rmdir", arg)?;
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ShellError::NotFound(arg.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(ShellError::NotADirectory(arg.to_string()));
    }
    if ctx.policy.is_approved_root(&path) {
        return Err(ShellError::Refused(format!(
            "refusing to remove approved directory {}",
            path.display()
        )));
    }
    if ctx.session.cwd().starts_with(&path) {
        return Err(ShellError::Refused(format!(
            "refusing to remove current directory {}",
            path.display()
        )));
    }
    fs::remove_dir(&path)?;
    Ok(Outcome::line(format_args!("removed directory {}", path.display())))
}

fn touch(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = single_arg(args, "touch <file>")?;
    let path = guarded(ctx, "touch", arg)?;
    if !path.exists() {
        OpenOptions::new().create(true).append(true).open(&path)?;
    }
    Ok(Outcome::line(path.display()))
}

fn rm(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<Outcome, ShellError> {
    let arg = single_arg(args, "rm <file>")?;
    let path = guarded_entry(ctx, "rm", arg)?;
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ShellError::NotFound(arg.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    // A symlink is unlinked itself, never its target.
    let kind = meta.file_type();
    if !kind.is_file() && !kind.is_symlink() {
        return Err(ShellError::NotAFile(arg.to_string()));
    }
    fs::remove_file(&path)?;
    Ok(Outcome::line(format_args!("removed {}", path.display())))
}

fn help(ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, ShellError> {
    let mut out = String::from("Available commands:\n");
    for c in COMMANDS {
        let _ = writeln!(out, "  {:<14} {}", c.usage, c.summary);
    }
    let _ = writeln!(out, "\nCurrent directory: {}", ctx.session.cwd().display());
    out.push_str("Allowed directories:\n");
    for root in &ctx.policy.approved_roots {
        let _ = writeln!(out, "  {}", root.display());
    }
    Ok(Outcome::text(out))
}

fn exit(_ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<Outcome, ShellError> {
    Ok(Outcome {
        output: "Goodbye!\n".into(),
        close: true,
    })
}
