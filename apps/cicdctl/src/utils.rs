use reqwest::blocking::Response;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::error::{AutomationError, AutomationResult};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandResult {
    /// stderr when present, stdout otherwise.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

pub fn which<S: AsRef<OsStr>>(cmd: S) -> Option<PathBuf> {
    let cmd_ref = cmd.as_ref();
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(cmd_ref);
            if candidate.exists() {
                Some(candidate)
            } else {
                None
            }
        })
    })
}

pub fn run_cmd_capture(mut command: Command) -> std::io::Result<CommandResult> {
    let mut command_display = command.get_program().to_string_lossy().to_string();
    for arg in command.get_args() {
        command_display.push(' ');
        command_display.push_str(&arg.to_string_lossy());
    }
    let output = command.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Ok(CommandResult {
        command: command_display,
        ok: output.status.success(),
        stdout,
        stderr,
        returncode: output.status.code().unwrap_or(-1),
    })
}

/// Recursively copies `src` into `dst`, replacing an existing `dst` directory.
/// Callers decide what to do when `dst` exists as a plain file.
pub fn copy_dir(src: &Path, dst: &Path) -> AutomationResult<()> {
    let io = |action: &str, path: &Path| {
        let context = format!("failed to {action} {}", path.display());
        move |err: std::io::Error| AutomationError::io(context, err)
    };

    if dst.is_dir() {
        fs::remove_dir_all(dst).map_err(io("remove", dst))?;
    }
    fs::create_dir_all(dst).map_err(io("create directory", dst))?;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|err| {
            AutomationError::automation(format!("failed while walking {}: {err}", src.display()))
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io("create directory", &target))?;
        } else if entry.file_type().is_symlink() {
            let link_target =
                fs::read_link(entry.path()).map_err(io("read symlink", entry.path()))?;
            symlink(link_target, &target).map_err(io("create symlink", &target))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(io("copy file to", &target))?;
            let mode = entry
                .metadata()
                .map_err(|err| {
                    AutomationError::automation(format!(
                        "failed to stat {}: {err}",
                        entry.path().display()
                    ))
                })?
                .permissions()
                .mode();
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .map_err(io("chmod", &target))?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub sha1: String,
    pub sha256: String,
}

/// Hex SHA-1 and SHA-256 of a file, in one read.
pub fn file_digests(path: &Path) -> std::io::Result<FileDigests> {
    let mut file = fs::File::open(path)?;
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        sha1.update(&buffer[..read]);
        sha256.update(&buffer[..read]);
    }
    Ok(FileDigests {
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}

/// Turns any non-2xx response into a provisioning error carrying the URL and status.
pub fn expect_success(response: Response, url: &str) -> AutomationResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().unwrap_or_default();
    Err(AutomationError::Provisioning {
        url: url.to_string(),
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}
