//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use directories::BaseDirs;
use std::env;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use crate::Cli;

/// Marker written above the lines appended to `.zshrc`.
const ZSHRC_MARKER: &str = "# m5link completions";
const ZSH_FPATH_LINE: &str = "fpath=(~/.zfunc $fpath)";

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    io::stdout()
        .write_all(&completion_script(shell))
        .ok();
}

fn completion_script(shell: Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let mut buf = Vec::new();
    generate(shell, &mut cmd, name, &mut buf);
    buf
}

/// Detect the user's current shell from environment.
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    // PowerShell sets PSModulePath even when SHELL is absent
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

/// Parse a shell binary path into its `Shell` enum.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// File name of the completion script for `shell`.
fn script_file_name(shell: Shell) -> Option<&'static str> {
    match shell {
        Shell::Bash => Some("m5link"),
        Shell::Zsh => Some("_m5link"),
        Shell::Fish => Some("m5link.fish"),
        Shell::PowerShell => Some("m5link.ps1"),
        Shell::Elvish => Some("m5link.elv"),
        _ => None,
    }
}

/// Directory the shell loads completion scripts from.
fn completion_dir(shell: Shell, dirs: &BaseDirs) -> Option<PathBuf> {
    match shell {
        Shell::Bash => Some(dirs.data_local_dir().join("bash-completion").join("completions")),
        Shell::Zsh => Some(dirs.home_dir().join(".zfunc")),
        Shell::Fish => Some(dirs.config_dir().join("fish").join("completions")),
        Shell::Elvish => Some(dirs.config_dir().join("elvish").join("lib")),
        Shell::PowerShell => Some(
            env::var("PROFILE")
                .ok()
                .and_then(|profile| Path::new(&profile).parent().map(Path::to_path_buf))
                .unwrap_or_else(|| dirs.config_dir().join("powershell").join("completions")),
        ),
        _ => None,
    }
}

/// Get the completion script installation path for a given shell.
fn get_completion_install_path(shell: Shell) -> Result<PathBuf> {
    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    match (completion_dir(shell, &dirs), script_file_name(shell)) {
        (Some(dir), Some(file)) => Ok(dir.join(file)),
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    }
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             m5link completions --install bash",
        )?,
    };

    let path = get_completion_install_path(shell)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, completion_script(shell))
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );

    eprintln!();
    match shell {
        Shell::Bash => {
            eprintln!("Completions will be loaded automatically on new terminals.");
            eprintln!(
                "To activate now: {}",
                style(format!("source {}", path.display())).cyan()
            );
        },
        Shell::Zsh => {
            let zshrc = BaseDirs::new()
                .context("Could not determine home directory")?
                .home_dir()
                .join(".zshrc");
            if ensure_zsh_fpath(&zshrc)? {
                eprintln!(
                    "{} Added fpath to {}",
                    style("✓").green().bold(),
                    style(zshrc.display()).yellow()
                );
            }
            eprintln!("Restart your shell or run: {}", style("exec zsh").cyan());
        },
        Shell::PowerShell => {
            eprintln!("Add this to your PowerShell profile to load on startup:");
            eprintln!(
                "  {}",
                style(format!("Import-Module {}", path.display())).cyan()
            );
        },
        _ => {
            eprintln!("Completions will be loaded automatically on new {shell} sessions.");
        },
    }

    Ok(())
}

/// Append the `.zfunc` fpath setup to `zshrc` unless present.
///
/// Returns whether the file was changed.
fn ensure_zsh_fpath(zshrc: &Path) -> Result<bool> {
    let present = fs::read_to_string(zshrc).is_ok_and(|content| content.contains(ZSH_FPATH_LINE));
    if present {
        return Ok(false);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n{ZSHRC_MARKER}")?;
    writeln!(file, "{ZSH_FPATH_LINE}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_SHELLS: [Shell; 5] = [
        Shell::Bash,
        Shell::Zsh,
        Shell::Fish,
        Shell::PowerShell,
        Shell::Elvish,
    ];

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("/usr/bin/elvish"), Some(Shell::Elvish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("powershell"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("bash"), Some(Shell::Bash));
    }

    #[test]
    fn test_shell_from_path_unknown() {
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path("/usr/bin/ksh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_paths() {
        if BaseDirs::new().is_none() {
            return;
        }
        let bash = get_completion_install_path(Shell::Bash).unwrap();
        assert!(bash.ends_with("bash-completion/completions/m5link"));

        let zsh = get_completion_install_path(Shell::Zsh).unwrap();
        assert!(zsh.ends_with(".zfunc/_m5link"));

        let fish = get_completion_install_path(Shell::Fish).unwrap();
        assert!(fish.ends_with("fish/completions/m5link.fish"));

        let elvish = get_completion_install_path(Shell::Elvish).unwrap();
        assert!(elvish.ends_with("elvish/lib/m5link.elv"));

        let pwsh = get_completion_install_path(Shell::PowerShell).unwrap();
        assert_eq!(pwsh.file_name().and_then(|n| n.to_str()), Some("m5link.ps1"));
    }

    #[test]
    fn test_every_shell_generates_a_script() {
        for shell in ALL_SHELLS {
            let script = completion_script(shell);
            assert!(!script.is_empty(), "{shell} script is empty");
        }
        let bash = String::from_utf8(completion_script(Shell::Bash)).unwrap();
        assert!(bash.contains("m5link"));
        assert!(bash.contains("list-ports"));
    }

    #[test]
    fn test_ensure_zsh_fpath_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let zshrc = dir.path().join(".zshrc");
        fs::write(&zshrc, "export EDITOR=vim\n").unwrap();

        assert!(ensure_zsh_fpath(&zshrc).unwrap());
        assert!(!ensure_zsh_fpath(&zshrc).unwrap());

        let content = fs::read_to_string(&zshrc).unwrap();
        assert!(content.starts_with("export EDITOR=vim\n"));
        assert_eq!(content.matches(ZSH_FPATH_LINE).count(), 1);
        assert!(content.contains(ZSHRC_MARKER));
    }

    #[test]
    fn test_detect_shell_type_does_not_panic() {
        let _ = detect_shell_type();
    }
}
