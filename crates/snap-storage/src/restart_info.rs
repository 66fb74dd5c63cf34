//! # restart_info
//!
//! why: remember which snapshot uid a later restore step should bring back
//! relations: written by the snap-cluster workload after a successful snapshot
//! what: save/load of `[RESTORE] RestoreSnapUID=<uid>` in a plain INI file

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use snap_core::OpUid;

use crate::error::StoreError;

pub const RESTORE_SECTION: &str = "RESTORE";
pub const RESTORE_UID_KEY: &str = "RestoreSnapUID";

fn read_existing(path: &Path) -> Result<String, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

fn section_header(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with(';') || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn is_uid_line(line: &str) -> bool {
    matches!(key_value(line), Some((key, _)) if key == RESTORE_UID_KEY)
}

/// Record `uid` as the snapshot to restore, keeping every other line of the file
pub fn save_restore_uid(path: &Path, uid: OpUid) -> Result<(), StoreError> {
    let existing = read_existing(path)?;
    let entry = format!("{RESTORE_UID_KEY}={uid}");

    let mut lines: Vec<String> = Vec::new();
    let mut in_restore = false;
    let mut written = false;
    for line in existing.lines() {
        if let Some(name) = section_header(line) {
            if in_restore && !written {
                lines.push(entry.clone());
                written = true;
            }
            in_restore = name == RESTORE_SECTION;
        } else if in_restore && is_uid_line(line) {
            if !written {
                lines.push(entry.clone());
                written = true;
            }
            continue;
        }
        lines.push(line.to_string());
    }
    if !written {
        if !in_restore {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(format!("[{RESTORE_SECTION}]"));
        }
        lines.push(entry);
    }
    let mut text = lines.join("\n");
    text.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, text)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read back the uid saved by `save_restore_uid`, if any
pub fn load_restore_uid(path: &Path) -> Result<Option<OpUid>, StoreError> {
    let existing = read_existing(path)?;
    let mut in_restore = false;
    for line in existing.lines() {
        if let Some(name) = section_header(line) {
            in_restore = name == RESTORE_SECTION;
            continue;
        }
        let Some((key, value)) = key_value(line).filter(|_| in_restore) else {
            continue;
        };
        if key == RESTORE_UID_KEY {
            return value
                .trim_matches('"')
                .parse()
                .map(Some)
                .map_err(|e: snap_core::ExecError| StoreError::Corrupt(e.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_has_no_uid() {
        let dir = tempdir().unwrap();
        assert_eq!(load_restore_uid(&dir.path().join("restartInfo.ini")).unwrap(), None);
    }

    #[test]
    fn save_creates_parent_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("simfdb/restartInfo.ini");
        let uid = OpUid::random();
        save_restore_uid(&path, uid).unwrap();
        assert_eq!(load_restore_uid(&path).unwrap(), Some(uid));
    }

    #[test]
    fn value_is_written_unquoted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restartInfo.ini");
        let uid: OpUid = "ba61e9612a561d60bd83ad83e1b63568".parse().unwrap();
        save_restore_uid(&path, uid).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[RESTORE]\nRestoreSnapUID=ba61e9612a561d60bd83ad83e1b63568\n");
    }

    #[test]
    fn existing_ini_is_kept_and_uid_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restartInfo.ini");
        fs::write(
            &path,
            "[META]\nprocessCount=3\ntesterCount=1\n\n[RESTORE]\n; previous run\nRestoreSnapUID=d78b08d47f341158e9a54d4baaf4a4dd\nrestoreMode=full\n",
        )
        .unwrap();
        assert_eq!(
            load_restore_uid(&path).unwrap(),
            Some("d78b08d47f341158e9a54d4baaf4a4dd".parse().unwrap())
        );

        let uid = OpUid::random();
        save_restore_uid(&path, uid).unwrap();
        assert_eq!(load_restore_uid(&path).unwrap(), Some(uid));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[META]\nprocessCount=3\ntesterCount=1\n"));
        assert!(text.contains("; previous run\n"));
        assert!(text.contains("restoreMode=full\n"));
        assert_eq!(text.matches(RESTORE_UID_KEY).count(), 1);
    }

    #[test]
    fn section_is_appended_after_other_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restartInfo.ini");
        fs::write(&path, "[META]\nprocessCount=3\n").unwrap();
        let uid = OpUid::random();
        save_restore_uid(&path, uid).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("[META]\nprocessCount=3\n\n[RESTORE]\nRestoreSnapUID={uid}\n"));
    }

    #[test]
    fn key_outside_restore_section_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restartInfo.ini");
        fs::write(&path, "[META]\nRestoreSnapUID=d78b08d47f341158e9a54d4baaf4a4dd\n").unwrap();
        assert_eq!(load_restore_uid(&path).unwrap(), None);
    }

    #[test]
    fn malformed_uid_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restartInfo.ini");
        fs::write(&path, "[RESTORE]\nRestoreSnapUID=not-a-uid\n").unwrap();
        assert!(matches!(load_restore_uid(&path), Err(StoreError::Corrupt(_))));
    }
}
