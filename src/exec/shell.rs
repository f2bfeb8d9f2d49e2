// src/exec/shell.rs

//! Shell launcher table.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

/// Shell used to run a bootstrap script on the local machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    #[serde(rename = "powershell")]
    PowerShell,
    #[serde(rename = "pwsh")]
    PowerShellCore,
}

impl Shell {
    /// Platform default: Windows PowerShell on Windows, Bash elsewhere.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Shell::PowerShell
        } else {
            Shell::Bash
        }
    }

    pub fn default_executable(&self) -> PathBuf {
        match self {
            Shell::Bash => PathBuf::from("bash"),
            Shell::PowerShell => PathBuf::from("powershell.exe"),
            Shell::PowerShellCore => PathBuf::from("pwsh"),
        }
    }

    pub fn bootstrap_file_name(&self) -> &'static str {
        match self {
            Shell::Bash => "Bootstrap.sh",
            Shell::PowerShell | Shell::PowerShellCore => "Bootstrap.ps1",
        }
    }

    /// Arguments that make the shell run `bootstrap` with `script_args`.
    pub fn format_arguments(&self, bootstrap: &Path, script_args: &[String]) -> Vec<String> {
        let mut args = match self {
            Shell::Bash => Vec::new(),
            Shell::PowerShell | Shell::PowerShellCore => vec![
                "-NoLogo".to_string(),
                "-NonInteractive".to_string(),
                "-ExecutionPolicy".to_string(),
                "Unrestricted".to_string(),
                "-File".to_string(),
            ],
        };
        args.push(bootstrap.display().to_string());
        args.extend(script_args.iter().cloned());
        args
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shell::Bash => "bash",
            Shell::PowerShell => "powershell",
            Shell::PowerShellCore => "pwsh",
        })
    }
}

impl FromStr for Shell {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bash" => Ok(Shell::Bash),
            "powershell" => Ok(Shell::PowerShell),
            "pwsh" | "powershellcore" => Ok(Shell::PowerShellCore),
            other => Err(format!(
                "invalid shell kind: {other} (expected \"bash\", \"powershell\" or \"pwsh\")"
            )),
        }
    }
}
