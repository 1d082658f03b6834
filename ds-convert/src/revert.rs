//! Revert driver: consumes the action journal in reverse to put a repo
//! back the way it was, or, in cleanup mode, to drop the backup data a
//! kept conversion left behind.
//!
//! Steps execute newest-first, and the journal is rewritten after every
//! one, so an interrupted revert picks up exactly where it stopped.

use log::info;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{self, Result};
use crate::journal::{Action, Step, Steps};
use crate::repo;

pub fn revert(repo_path: &Path, force: bool, fix_config: bool, cleanup_mode: bool) -> Result<()> {
    let _lock = repo::Lock::acquire(repo_path)?;

    let mut steps = Steps::load(repo_path)?;

    if cleanup_mode {
        // Cleanup only makes sense over the journal of a conversion that
        // ran to completion; anything else still needs revert.
        let top = steps.top().context(error::CleanupNotDoneSnafu)?;
        ensure!(top.action == Action::Done, error::CleanupNotDoneSnafu);

        info!("Start cleanup");
    } else {
        info!("Start revert");
    }

    while let Some(step) = steps.top() {
        let step = step.clone();
        execute_step(&step, force, cleanup_mode)?;
        steps.pop(repo_path)?;
    }

    if fix_config {
        fix_config_spec(repo_path)?;
    }

    info!("All tasks finished");
    Ok(())
}

fn execute_step(step: &Step, force: bool, cleanup_mode: bool) -> Result<()> {
    if cleanup_mode {
        // Only the cleanup markers act; every other entry is bookkeeping
        // for revert, which by now will never run.
        if step.action == Action::Cleanup {
            let path = single_arg(step)?;
            info!("cleanup '{}'", path);
            remove_all(Path::new(path))?;
            info!("\\-> ok");
        }
        return Ok(());
    }

    match step.action {
        Action::Done => {
            ensure!(force, error::DoneNeedsForceSnafu);
        }

        Action::Manual => {
            let msg = step.arg.join(" ");
            ensure!(force, error::ManualNeedsForceSnafu { msg });
        }

        Action::Remove => {
            let path = single_arg(step)?;
            info!("remove '{}'", path);

            remove_all(Path::new(path))?;
            info!("\\-> ok");
        }

        Action::Move => {
            ensure!(
                step.arg.len() == 2,
                error::RevertArgCountSnafu {
                    action: step.action.name(),
                    expected: 2usize,
                    actual: step.arg.len(),
                }
            );
            let (src, dst) = (Path::new(&step.arg[0]), Path::new(&step.arg[1]));
            info!("move '{}' -> '{}'", src.display(), dst.display());

            if !src.exists() {
                // The journal entry precedes its rename, so a crash in
                // between leaves nothing to undo as long as the data is
                // still at the destination.
                ensure!(dst.exists(), error::RevertMoveSourceSnafu { path: src });
                info!("\\-> nothing to do, '{}' already in place", dst.display());
                return Ok(());
            }
            if dst.exists() {
                // A completed conversion rewrote this path (datastore_spec);
                // the journaled contents win.
                info!("destination '{}' exists, replacing", dst.display());
                remove_all(dst)?;
            }

            fs::rename(src, dst).context(error::RevertIoSnafu { path: src })?;
            info!("\\-> ok");
        }

        Action::Mkdir => {
            let path = Path::new(single_arg(step)?);
            info!("mkdir '{}'", path.display());

            // Idempotent: the directory is still there if the crash came
            // before its removal.
            fs::create_dir_all(path).context(error::RevertIoSnafu { path })?;
            info!("\\-> ok");
        }

        // Backup markers don't participate in revert.
        Action::Cleanup => {}
    }

    Ok(())
}

fn single_arg(step: &Step) -> Result<&str> {
    ensure!(
        step.arg.len() == 1,
        error::RevertArgCountSnafu {
            action: step.action.name(),
            expected: 1usize,
            actual: step.arg.len(),
        }
    );
    Ok(&step.arg[0])
}

/// Removes a file or directory tree; a missing path is fine (the work was
/// already done, possibly by an earlier interrupted run).
fn remove_all(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).context(error::RevertIoSnafu { path }),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path).context(error::RevertIoSnafu { path })
    } else {
        fs::remove_file(path).context(error::RevertIoSnafu { path })
    }
}

/// Rewrites Datastore.Spec in the repo config from the current
/// datastore_spec contents, keeping a config-old copy until the new config
/// is safely written.
fn fix_config_spec(repo_path: &Path) -> Result<()> {
    let config_path = repo_path.join(repo::CONFIG_FILE);
    let config_old_path = repo_path.join(repo::CONFIG_OLD_FILE);

    let spec_value = repo::load_json(&repo_path.join(repo::SPECS_FILE))?;
    let mut config = repo::load_json(&config_path)?;

    let datastore = config
        .get_mut("Datastore")
        .and_then(Value::as_object_mut)
        .context(error::NoDatastoreFieldSnafu { path: &config_path })?;
    datastore.insert("Spec".to_string(), spec_value);

    info!("Rewriting Datastore.Spec in config from datastore_spec");

    fs::copy(&config_path, &config_old_path).context(error::WriteRepoFileSnafu {
        path: &config_old_path,
    })?;

    let mut pretty = serde_json::to_string_pretty(&config)
        .context(error::ParseJsonSnafu { path: &config_path })?;
    pretty.push('\n');
    fs::write(&config_path, pretty).context(error::WriteRepoFileSnafu { path: &config_path })?;

    fs::remove_file(&config_old_path).context(error::WriteRepoFileSnafu {
        path: config_old_path,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::journal::{Action, ActionJournal};
    use tempfile::TempDir;

    fn path_string(path: &Path) -> String {
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn revert_undoes_journaled_actions() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        // State left by a pretend conversion: 'moved' holds the old data,
        // 'temp' is conversion debris.
        let temp = path.join("ds-convert-x");
        let moved = path.join("ds-convert-old-x");
        let original = path.join("blocks");
        fs::create_dir(&temp).unwrap();
        fs::create_dir_all(moved.join("blocks")).unwrap();
        fs::write(moved.join("blocks").join("f"), b"data").unwrap();

        let mut journal = ActionJournal::create(path).unwrap();
        journal.log(Action::Remove, &[&path_string(&temp)]).unwrap();
        journal
            .log(
                Action::Move,
                &[
                    &path_string(&moved.join("blocks")),
                    &path_string(&original),
                ],
            )
            .unwrap();

        revert(path, false, false, false).unwrap();

        assert!(!temp.exists());
        assert!(original.join("f").exists());
        assert!(!moved.join("blocks").exists());
        // The journal is consumed.
        assert!(!path.join(crate::journal::CONVERT_LOG).exists());
    }

    #[test]
    fn revert_stops_at_done_without_force() {
        let repo = TempDir::new().unwrap();
        let mut journal = ActionJournal::create(repo.path()).unwrap();
        journal.log(Action::Done, &[]).unwrap();

        let err = revert(repo.path(), false, false, false).unwrap_err();
        assert!(err.to_string().contains("--force"));

        // Forced revert walks past it.
        revert(repo.path(), true, false, false).unwrap();
    }

    #[test]
    fn revert_stops_at_manual_without_force() {
        let repo = TempDir::new().unwrap();
        let mut journal = ActionJournal::create(repo.path()).unwrap();
        journal
            .log(Action::Manual, &["no backup data present for revert"])
            .unwrap();

        revert(repo.path(), false, false, false).unwrap_err();
        revert(repo.path(), true, false, false).unwrap();
    }

    #[test]
    fn revert_move_asserts_existence() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        let mut journal = ActionJournal::create(path).unwrap();
        journal
            .log(
                Action::Move,
                &[
                    &path_string(&path.join("missing")),
                    &path_string(&path.join("dst")),
                ],
            )
            .unwrap();

        let err = revert(path, false, false, false).unwrap_err();
        assert!(err.to_string().contains("didn't exist"));
    }

    #[test]
    fn cleanup_requires_done_marker() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        let keep_dir = path.join("ds-convert-old-y");
        fs::create_dir(&keep_dir).unwrap();

        let mut journal = ActionJournal::create(path).unwrap();
        journal
            .log(Action::Cleanup, &[&path_string(&keep_dir)])
            .unwrap();

        // No done marker on top: refused.
        revert(path, false, false, true).unwrap_err();
        assert!(keep_dir.exists());

        journal.log(Action::Done, &[]).unwrap();
        revert(path, false, false, true).unwrap();
        assert!(!keep_dir.exists());
    }

    #[test]
    fn cleanup_ignores_revert_actions() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        let keep = path.join("keepme");
        fs::create_dir(&keep).unwrap();

        let mut journal = ActionJournal::create(path).unwrap();
        // A revert would remove 'keepme'; cleanup must not.
        journal.log(Action::Remove, &[&path_string(&keep)]).unwrap();
        journal.log(Action::Done, &[]).unwrap();

        revert(path, false, false, true).unwrap();
        assert!(keep.exists());
    }

    #[test]
    fn fix_config_rewrites_spec() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        fs::write(
            path.join(repo::SPECS_FILE),
            r#"{"path":"db","type":"levelds"}"#,
        )
        .unwrap();
        fs::write(
            path.join(repo::CONFIG_FILE),
            serde_json::json!({
                "Datastore": {"Spec": {"type": "badgerds", "path": "old"}},
                "Other": "untouched",
            })
            .to_string(),
        )
        .unwrap();

        // Empty journal file so revert has something to consume.
        let _journal = ActionJournal::create(path).unwrap();
        revert(path, false, true, false).unwrap();

        let config = repo::load_json(&path.join(repo::CONFIG_FILE)).unwrap();
        assert_eq!(
            config["Datastore"]["Spec"],
            serde_json::json!({"path": "db", "type": "levelds"})
        );
        assert_eq!(config["Other"], "untouched");
        assert!(!path.join(repo::CONFIG_OLD_FILE).exists());

        // Pretty-printed with two-space indent.
        let raw = fs::read_to_string(path.join(repo::CONFIG_FILE)).unwrap();
        assert!(raw.contains("  \"Datastore\""));
    }
}
