use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];
const FORK_BOMB: &str = ":(){:|:&};:";
/// sudo short options that consume a value, inline or as the next argument.
const SUDO_SHORT_WITH_VALUE: &str = "CDghpRrTtUu";
const SUDO_LONG_WITH_VALUE: &[&str] = &[
    "--chdir",
    "--chroot",
    "--close-from",
    "--command-timeout",
    "--group",
    "--host",
    "--other-user",
    "--prompt",
    "--role",
    "--type",
    "--user",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskRule {
    RecursiveForceRootDelete,
    PrivilegedDelete,
    NoPreserveRoot,
    FilesystemFormat,
    ForkBomb,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRule::RecursiveForceRootDelete => "recursive_force_root_delete",
            RiskRule::PrivilegedDelete => "privileged_delete",
            RiskRule::NoPreserveRoot => "no_preserve_root",
            RiskRule::FilesystemFormat => "filesystem_format",
            RiskRule::ForkBomb => "fork_bomb",
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskMatch {
    pub rule: RiskRule,
    pub reason: String,
}

impl RiskMatch {
    fn new(rule: RiskRule, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

/// Returns the first risk rule `argv` trips, if any. Scripts passed to a
/// shell via `-c` are split into simple commands and classified as well.
pub fn classify_command(argv: &[String]) -> Option<RiskMatch> {
    if argv.is_empty() {
        return None;
    }

    let compact: String = argv.join(" ").chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(FORK_BOMB) {
        return Some(RiskMatch::new(RiskRule::ForkBomb, "fork bomb signature"));
    }

    let program = program_name(&argv[0]);
    if SHELLS.contains(&program.as_str()) {
        if let Some(pos) = argv.iter().position(|arg| arg == "-c") {
            if let Some(script) = argv.get(pos + 1) {
                for command in split_script(script) {
                    if let Some(found) = classify_simple(&command) {
                        return Some(found);
                    }
                }
            }
        }
    }

    classify_simple(argv)
}

fn classify_simple(argv: &[String]) -> Option<RiskMatch> {
    let first = argv.first()?;
    let program = program_name(first);

    if program == "sudo" {
        let command = sudo_command(&argv[1..]);
        if command.first().map_or(false, |target| program_name(target) == "rm") {
            return Some(RiskMatch::new(
                RiskRule::PrivilegedDelete,
                format!("privileged deletion: {}", argv.join(" ")),
            ));
        }
        return classify_simple(command);
    }

    if program == "rm" {
        let args = &argv[1..];
        if args.iter().any(|arg| arg == "--no-preserve-root") {
            return Some(RiskMatch::new(
                RiskRule::NoPreserveRoot,
                "deletion with --no-preserve-root",
            ));
        }
        let mut recursive = false;
        let mut force = false;
        for arg in args {
            match arg.as_str() {
                "--recursive" => recursive = true,
                "--force" => force = true,
                flag if flag.starts_with('-') && !flag.starts_with("--") => {
                    recursive |= flag.contains('r') || flag.contains('R');
                    force |= flag.contains('f');
                }
                _ => {}
            }
        }
        let targets_root = args
            .iter()
            .any(|arg| !arg.starts_with('-') && arg.starts_with('/'));
        if recursive && force && targets_root {
            return Some(RiskMatch::new(
                RiskRule::RecursiveForceRootDelete,
                format!("recursive force deletion of a root path: {}", argv.join(" ")),
            ));
        }
        return None;
    }

    if program == "mkfs" || program.starts_with("mkfs.") {
        return Some(RiskMatch::new(
            RiskRule::FilesystemFormat,
            format!("filesystem format: {program}"),
        ));
    }

    if program == "format" || program == "format.com" {
        let drive = argv[1..].iter().any(|arg| is_drive_letter(arg));
        if drive {
            return Some(RiskMatch::new(
                RiskRule::FilesystemFormat,
                format!("drive format: {}", argv.join(" ")),
            ));
        }
    }

    None
}

/// The command sudo would run: everything after its own options and their
/// values.
fn sudo_command(args: &[String]) -> &[String] {
    let mut idx = 0;
    while let Some(arg) = args.get(idx) {
        if arg == "--" {
            return &args[idx + 1..];
        }
        if let Some(long) = arg.strip_prefix("--") {
            let takes_value = !long.contains('=') && SUDO_LONG_WITH_VALUE.contains(&arg.as_str());
            idx += if takes_value { 2 } else { 1 };
            continue;
        }
        let Some(flags) = arg.strip_prefix('-').filter(|flags| !flags.is_empty()) else {
            break;
        };
        idx += 1;
        if let Some(pos) = flags.find(|flag| SUDO_SHORT_WITH_VALUE.contains(flag)) {
            // `-uroot` carries its value inline, `-u root` in the next argument.
            if pos + 1 == flags.len() {
                idx += 1;
            }
        }
    }
    &args[idx.min(args.len())..]
}

fn program_name(raw: &str) -> String {
    Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| raw.to_lowercase())
}

fn is_drive_letter(arg: &str) -> bool {
    let bytes = arg.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn split_script(script: &str) -> Vec<Vec<String>> {
    let normalized = script
        .replace("&&", ";")
        .replace("||", ";")
        .replace(['|', '\n'], ";");
    normalized
        .split(';')
        .map(|command| command.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|command| !command.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    fn rule(parts: &[&str]) -> Option<RiskRule> {
        classify_command(&argv(parts)).map(|found| found.rule)
    }

    #[test]
    fn recursive_force_root_delete() {
        assert_eq!(rule(&["rm", "-rf", "/"]), Some(RiskRule::RecursiveForceRootDelete));
        assert_eq!(
            rule(&["/bin/rm", "-r", "-f", "/var/lib"]),
            Some(RiskRule::RecursiveForceRootDelete)
        );
        assert_eq!(
            rule(&["rm", "--recursive", "--force", "/tmp/x"]),
            Some(RiskRule::RecursiveForceRootDelete)
        );
        assert_eq!(rule(&["rm", "-rf", "build"]), None);
        assert_eq!(rule(&["rm", "-r", "/tmp/x"]), None);
    }

    #[test]
    fn privileged_and_no_preserve_root() {
        assert_eq!(rule(&["sudo", "rm", "notes.txt"]), Some(RiskRule::PrivilegedDelete));
        assert_eq!(rule(&["sudo", "-n", "ls", "/"]), None);
        assert_eq!(
            rule(&["rm", "-r", "--no-preserve-root", "x"]),
            Some(RiskRule::NoPreserveRoot)
        );
    }

    #[test]
    fn sudo_options_and_their_values_are_skipped() {
        assert_eq!(
            rule(&["sudo", "-u", "root", "rm", "-rf", "/"]),
            Some(RiskRule::PrivilegedDelete)
        );
        assert_eq!(
            rule(&["sudo", "-E", "-uroot", "rm", "notes.txt"]),
            Some(RiskRule::PrivilegedDelete)
        );
        assert_eq!(
            rule(&["sudo", "--user", "ops", "-g", "wheel", "/bin/rm", "x"]),
            Some(RiskRule::PrivilegedDelete)
        );
        assert_eq!(
            rule(&["sudo", "--user=ops", "--", "mkfs.ext4", "/dev/sdb1"]),
            Some(RiskRule::FilesystemFormat)
        );
        assert_eq!(rule(&["sudo", "-u", "rm", "ls"]), None);
        assert_eq!(rule(&["sudo", "-u"]), None);
    }

    #[test]
    fn format_commands() {
        assert_eq!(rule(&["mkfs", "/dev/sda1"]), Some(RiskRule::FilesystemFormat));
        assert_eq!(rule(&["mkfs.ext4", "/dev/sda1"]), Some(RiskRule::FilesystemFormat));
        assert_eq!(rule(&["format", "C:"]), Some(RiskRule::FilesystemFormat));
        assert_eq!(rule(&["format", "notes.md"]), None);
    }

    #[test]
    fn fork_bomb_and_shell_scripts() {
        assert_eq!(rule(&["bash", "-c", ":(){ :|:& };:"]), Some(RiskRule::ForkBomb));
        assert_eq!(
            rule(&["sh", "-c", "cd /tmp && rm -rf /"]),
            Some(RiskRule::RecursiveForceRootDelete)
        );
        assert_eq!(rule(&["sh", "-c", "ls -la | wc -l"]), None);
        assert_eq!(rule(&["cargo", "test"]), None);
        assert_eq!(rule(&[]), None);
    }
}
