//! Client-side hooks: `pre-commit` and `pre-push` scripts under `.wit/hooks/`, run before the
//! corresponding operation proceeds. A missing or non-executable hook is silently skipped; a hook
//! that exits non-zero aborts the operation unless the caller passed `--no-verify`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::GitError;

/// Ceiling on hook execution time, per the external interface contract.
const HOOK_TIMEOUT: Duration = Duration::from_secs(120);
/// Ceiling on captured stdout+stderr, to bound memory use against a runaway hook.
const OUTPUT_CAP: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreCommit,
    PrePush,
}

impl HookKind {
    fn file_name(self) -> &'static str {
        match self {
            HookKind::PreCommit => "pre-commit",
            HookKind::PrePush => "pre-push",
        }
    }
}

/// Run a hook if present. `args` become argv; `stdin_lines` are written to the child's stdin and
/// the pipe is then closed (both hooks' contracts pass their real input this way, never via argv).
/// Returns `Ok(())` immediately, without spawning anything, when `no_verify` is set or no
/// executable hook file exists.
pub async fn run_hook(
    wit_dir: &std::path::Path,
    kind: HookKind,
    args: &[String],
    stdin_lines: &[String],
    no_verify: bool,
) -> Result<(), GitError> {
    if no_verify {
        return Ok(());
    }

    let hook_path = wit_dir.join("hooks").join(kind.file_name());
    if !is_executable(&hook_path) {
        return Ok(());
    }

    let mut child = Command::new(&hook_path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GitError::HookFailed(format!("failed to spawn {}: {e}", kind.file_name())))?;

    if let Some(mut stdin) = child.stdin.take() {
        let body = stdin_lines.join("\n");
        let body = if stdin_lines.is_empty() { body } else { format!("{body}\n") };
        // A hook that never reads stdin is not our problem; ignore a broken pipe here.
        let _ = stdin.write_all(body.as_bytes()).await;
    }

    let output = tokio::time::timeout(HOOK_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| GitError::Timeout(format!("{} exceeded its time budget", kind.file_name())))?
        .map_err(|e| GitError::HookFailed(format!("{}: {e}", kind.file_name())))?;

    if !output.status.success() {
        let mut stderr = output.stderr;
        stderr.truncate(OUTPUT_CAP);
        return Err(GitError::HookFailed(format!(
            "{} exited with {}: {}",
            kind.file_name(),
            output.status,
            String::from_utf8_lossy(&stderr)
        )));
    }

    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_hook_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        run_hook(dir.path(), HookKind::PreCommit, &[], &[], false).await.unwrap();
    }

    #[tokio::test]
    async fn no_verify_skips_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let hooks_dir = dir.path().join("hooks");
        std::fs::create_dir_all(&hooks_dir).unwrap();
        let hook_path = hooks_dir.join("pre-commit");
        std::fs::write(&hook_path, "#!/bin/sh\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        run_hook(dir.path(), HookKind::PreCommit, &[], &[], true).await.unwrap();
    }

    #[tokio::test]
    async fn failing_hook_reports_hook_failed() {
        let dir = tempfile::tempdir().unwrap();
        let hooks_dir = dir.path().join("hooks");
        std::fs::create_dir_all(&hooks_dir).unwrap();
        let hook_path = hooks_dir.join("pre-push");
        std::fs::write(&hook_path, "#!/bin/sh\nexit 7\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = run_hook(dir.path(), HookKind::PrePush, &["origin".to_string()], &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::HookFailed(_)));
    }

    #[tokio::test]
    async fn hook_receives_stdin_lines() {
        let dir = tempfile::tempdir().unwrap();
        let hooks_dir = dir.path().join("hooks");
        std::fs::create_dir_all(&hooks_dir).unwrap();
        let hook_path = hooks_dir.join("pre-push");
        let marker = dir.path().join("stdin_seen");
        std::fs::write(
            &hook_path,
            format!("#!/bin/sh\ncat > {}\n", marker.display()),
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        run_hook(
            dir.path(),
            HookKind::PrePush,
            &["origin".to_string()],
            &["refs/heads/main aaaa refs/heads/main bbbb".to_string()],
            false,
        )
        .await
        .unwrap();

        let seen = std::fs::read_to_string(&marker).unwrap();
        assert!(seen.contains("refs/heads/main aaaa refs/heads/main bbbb"));
    }
}
