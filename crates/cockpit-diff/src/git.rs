use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Numstat {
    pub added: u64,
    pub removed: u64,
    pub files: Vec<String>,
}

pub fn run_git(cwd: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|err| err.to_string())?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(stderr);
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn is_work_tree(root: &Path) -> bool {
    matches!(
        run_git(root, &["rev-parse", "--is-inside-work-tree"]),
        Ok(out) if out.trim() == "true"
    )
}

/// Working tree vs HEAD, optionally restricted to `files`.
pub fn numstat_head(root: &Path, files: &[String]) -> Result<Numstat, String> {
    let mut args = vec!["diff", "--numstat", "HEAD"];
    if !files.is_empty() {
        args.push("--");
        args.extend(files.iter().map(String::as_str));
    }
    let raw = run_git(root, &args)?;
    Ok(parse_numstat(&raw))
}

/// Binary rows report `-` for both counts and contribute zero lines.
pub fn parse_numstat(output: &str) -> Numstat {
    let mut stat = Numstat::default();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let additions = parts.next().unwrap_or("0");
        let deletions = parts.next().unwrap_or("0");
        let path = parts.next().unwrap_or("").trim();
        if path.is_empty() {
            continue;
        }
        stat.added += additions.parse::<u64>().unwrap_or(0);
        stat.removed += deletions.parse::<u64>().unwrap_or(0);
        stat.files.push(path.to_string());
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_binary_rows() {
        let raw = "3\t1\tsrc/lib.rs\n-\t-\tassets/logo.png\n0\t4\tREADME.md\n\n";
        let stat = parse_numstat(raw);
        assert_eq!(stat.added, 3);
        assert_eq!(stat.removed, 5);
        assert_eq!(stat.files, vec!["src/lib.rs", "assets/logo.png", "README.md"]);
    }

    #[test]
    fn empty_output_is_no_change() {
        assert_eq!(parse_numstat(""), Numstat::default());
    }
}
