use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::Result;

pub const SHEBANG: &str = "#!/bin/sh";

pub const DAEMON_BLOCK: &str = "daemon";
pub const CONNECT_BLOCK: &str = "connect";
pub const WATCHER_BLOCK: &str = "watcher";
pub const ALL_BLOCKS: [&str; 3] = [DAEMON_BLOCK, CONNECT_BLOCK, WATCHER_BLOCK];

fn begin_marker(name: &str) -> String {
    format!("# >>> tailelec {name} >>>")
}

fn end_marker(name: &str) -> String {
    format!("# <<< tailelec {name} <<<")
}

pub fn render(name: &str, body: &str) -> String {
    format!(
        "{}\n{}\n{}\n",
        begin_marker(name),
        body.trim_end(),
        end_marker(name)
    )
}

/// The begin marker is the guard: its presence anywhere means the block
/// is installed.
pub fn has_block(content: &str, name: &str) -> bool {
    content.contains(&begin_marker(name))
}

fn read(path: &Path) -> Result<String> {
    if path.exists() {
        Ok(fs::read_to_string(path)?)
    } else {
        Ok(String::new())
    }
}

/// Makes sure the script exists, starts with a shebang and is executable.
pub fn ensure_script(path: &Path) -> Result<()> {
    let content = read(path)?;

    if !content.starts_with("#!") {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = content.trim_start_matches('\n');
        let mut fixed = format!("{SHEBANG}\n");
        if !body.is_empty() {
            fixed.push('\n');
            fixed.push_str(body);
        }
        fs::write(path, fixed)?;
    }

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Appends the block unless its guard is already present. Returns whether
/// the file changed.
pub fn append_block(path: &Path, name: &str, body: &str) -> Result<bool> {
    let mut content = read(path)?;

    if has_block(&content, name) {
        return Ok(false);
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push('\n');
    content.push_str(&render(name, body));
    fs::write(path, content)?;

    Ok(true)
}

/// Drops the block with its markers. Content is returned unchanged when the
/// block is absent or has no end marker.
pub fn strip_block(content: &str, name: &str) -> String {
    let begin = begin_marker(name);
    let end = end_marker(name);

    let lines: Vec<&str> = content.lines().collect();
    let Some(start) = lines.iter().position(|l| l.trim_end() == begin) else {
        return content.to_string();
    };
    let Some(len) = lines[start..].iter().position(|l| l.trim_end() == end) else {
        return content.to_string();
    };

    let mut kept: Vec<&str> = lines[..start].to_vec();
    if kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.extend_from_slice(&lines[start + len + 1..]);

    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Removes every tailelec block from the script. Returns the names removed.
pub fn remove_blocks(path: &Path) -> Result<Vec<&'static str>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let original = fs::read_to_string(path)?;
    let mut content = original.clone();
    let mut removed = Vec::new();

    for name in ALL_BLOCKS {
        let stripped = strip_block(&content, name);
        if stripped != content {
            removed.push(name);
            content = stripped;
        }
    }

    if content != original {
        fs::write(path, content)?;
    }
    Ok(removed)
}

pub fn installed_blocks(path: &Path) -> Result<Vec<&'static str>> {
    let content = read(path)?;
    Ok(ALL_BLOCKS
        .into_iter()
        .filter(|name| has_block(&content, name))
        .collect())
}
