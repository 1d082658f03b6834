//! Copy engine: executes a 'copy' plan by streaming every key from the
//! source composition into a destination built in a temp directory, then
//! swapping the repo's datastore directories and verifying the result.
//!
//! Every filesystem effect that has to be undone on failure is journaled
//! (and fsynced) before it happens, so a crash at any point leaves a repo
//! that `revert` can walk back to its original state.

use datastore::{Batch, Datastore, Key};
use log::info;
use nix::{dir::Dir, fcntl::OFlag, sys::stat::Mode, unistd::fsync};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{self, Error, Result};
use crate::journal::{Action, ActionJournal};
use crate::open::open_datastore;
use crate::repo;
use crate::spec::Spec;
use crate::util::{dir_is_empty, path_str, rando};
use crate::validate::validate;

/// Flush the running batch once it holds this many entries...
const MAX_BATCH_ENTRIES: usize = 1024;
/// ...or this many accumulated value bytes, whichever comes first.
const MAX_BATCH_SIZE: usize = 16 << 20;

/// One copy conversion in progress.  Owns the temp directory bookkeeping;
/// the datastores themselves only live inside the phase that uses them.
pub struct Copy {
    path: PathBuf,

    from_spec: Spec,
    to_spec: Spec,

    new_ds_dir: Option<PathBuf>,
    old_ds_dir: Option<PathBuf>,

    old_paths: Vec<String>,
    new_paths: Vec<String>,

    steps: Vec<String>,
}

impl Copy {
    pub fn new(path: &Path, from_spec: Spec, to_spec: Spec) -> Self {
        Self {
            path: path.to_owned(),
            from_spec,
            to_spec,
            new_ds_dir: None,
            old_ds_dir: None,
            old_paths: Vec::new(),
            new_paths: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// The steps completed so far, for error reports.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    fn add_step(&mut self, step: String) {
        log::debug!("{}", step);
        self.steps.push(step);
    }

    /// Runs the conversion up to and including the directory swap.
    pub fn run(&mut self, journal: &mut ActionJournal) -> Result<()> {
        self.validate_specs()?;

        info!("Checks OK");

        let (mut from_ds, mut to_ds) = self.open_datastores(journal)?;

        info!("Copying keys, this can take a long time");

        copy_keys(from_ds.as_ref(), to_ds.as_ref())?;

        self.close_datastores(&mut from_ds, &mut to_ds)?;
        drop(from_ds);
        drop(to_ds);

        info!("All data copied, swapping repo");

        self.swap_datastores(journal)
    }

    /// Reopens the swapped datastores and checks that every source key made
    /// it into the new composition.
    pub fn verify(&mut self) -> Result<()> {
        let (mut from_ds, mut to_ds) = self.open_swapped_datastores()?;

        info!("Verifying key integrity");
        self.add_step("verify keys".to_string());

        let verified = verify_keys(from_ds.as_ref(), to_ds.as_ref());

        self.close_datastores(&mut from_ds, &mut to_ds)?;

        info!("{} keys OK", verified?);
        Ok(())
    }

    /// No-backup epilogue: the old data is about to disappear, so a revert
    /// past this point can't be automatic.
    pub fn clean(&mut self, journal: &mut ActionJournal) -> Result<()> {
        journal.log(Action::Manual, &["no backup data present for revert"])?;

        if let Some(old_ds_dir) = self.old_ds_dir.take() {
            fs::remove_dir_all(&old_ds_dir)
                .context(error::RemoveTempDirSnafu { path: old_ds_dir })?;
        }

        Ok(())
    }

    fn validate_specs(&mut self) -> Result<()> {
        self.old_paths =
            validate(&mut self.from_spec, false).map_err(|source| Error::ValidateSpec {
                path: self.path.join(repo::SPECS_FILE),
                source: Box::new(source),
            })?;

        self.new_paths =
            validate(&mut self.to_spec, false).map_err(|source| Error::ValidateSpec {
                path: self.path.join(repo::CONFIG_FILE),
                source: Box::new(source),
            })?;

        Ok(())
    }

    fn open_datastores(
        &mut self,
        journal: &mut ActionJournal,
    ) -> Result<(Box<dyn Datastore>, Box<dyn Datastore>)> {
        let from_ds = open_datastore(&self.path, &self.from_spec)?;
        self.add_step(format!("open datastore at {}", self.path.display()));

        let new_ds_dir = self.path.join(format!("ds-convert-{}", rando()));
        journal.log(Action::Remove, &[path_str(&new_ds_dir)?])?;
        fs::create_dir(&new_ds_dir).context(error::CreateTempDirSnafu { path: &new_ds_dir })?;
        self.add_step(format!(
            "create temp datastore directory at {}",
            new_ds_dir.display()
        ));

        let to_ds = open_datastore(&new_ds_dir, &self.to_spec)?;
        self.add_step(format!("open new datastore at {}", new_ds_dir.display()));

        self.new_ds_dir = Some(new_ds_dir);
        Ok((from_ds, to_ds))
    }

    fn open_swapped_datastores(&mut self) -> Result<(Box<dyn Datastore>, Box<dyn Datastore>)> {
        let old_ds_dir = self.old_ds_dir.clone().unwrap_or_else(|| self.path.clone());

        let from_ds = open_datastore(&old_ds_dir, &self.from_spec)?;
        self.add_step(format!("open datastore at {}", old_ds_dir.display()));

        let to_ds = open_datastore(&self.path, &self.to_spec)?;
        self.add_step(format!("open new datastore at {}", self.path.display()));

        Ok((from_ds, to_ds))
    }

    fn close_datastores(
        &mut self,
        from_ds: &mut Box<dyn Datastore>,
        to_ds: &mut Box<dyn Datastore>,
    ) -> Result<()> {
        from_ds
            .close()
            .context(error::CloseDatastoreSnafu { which: "old" })?;
        self.add_step("close old datastore".to_string());

        to_ds
            .close()
            .context(error::CloseDatastoreSnafu { which: "new" })?;
        self.add_step("close new datastore".to_string());
        Ok(())
    }

    /// Moves the old datastore directories out of the repo and the new ones
    /// in, journaling the inverse of every rename first.
    fn swap_datastores(&mut self, journal: &mut ActionJournal) -> Result<()> {
        let old_ds_dir = self.path.join(format!("ds-convert-old-{}", rando()));
        journal.log(Action::Remove, &[path_str(&old_ds_dir)?])?;
        journal.log(Action::Cleanup, &[path_str(&old_ds_dir)?])?;
        fs::create_dir(&old_ds_dir).context(error::CreateTempDirSnafu { path: &old_ds_dir })?;
        self.add_step(format!(
            "create temp datastore directory at {}",
            old_ds_dir.display()
        ));

        for dir in &self.old_paths {
            let from = self.path.join(dir);
            let to = old_ds_dir.join(dir);

            // Journal the inverse first; an unperformed rename reverts as a
            // no-op, an unjournaled one would strand the data.
            journal.log(Action::Move, &[path_str(&to)?, path_str(&from)?])?;
            fs::rename(&from, &to).context(error::SwapRenameSnafu {
                from: &from,
                to: &to,
            })?;
            self.steps
                .push(format!("> move {} to {}", from.display(), to.display()));

            // Not strictly needed, but having the checks won't hurt.
            ensure!(
                !from.exists(),
                error::MoveNotClearedSnafu {
                    dir,
                    path: &self.path,
                }
            );
            ensure!(
                to.is_dir(),
                error::MoveMissingSnafu {
                    dir,
                    path: &old_ds_dir,
                }
            );
        }
        self.add_step(format!("move old DS to {}", old_ds_dir.display()));

        let new_ds_dir = self
            .new_ds_dir
            .clone()
            .context(error::StrategyInternalSnafu {
                msg: "swap without open datastores",
            })?;
        for dir in &self.new_paths {
            let from = new_ds_dir.join(dir);
            let to = self.path.join(dir);

            journal.log(Action::Move, &[path_str(&to)?, path_str(&from)?])?;
            fs::rename(&from, &to).context(error::SwapRenameSnafu {
                from: &from,
                to: &to,
            })?;
            self.steps
                .push(format!("> move {} to {}", from.display(), to.display()));
        }
        self.add_step(format!("move new DS from {}", new_ds_dir.display()));

        // The temp destination must now be hollow; anything left means a
        // path mismatch between the spec and what the engines created.
        ensure!(
            dir_is_empty(&new_ds_dir)?,
            error::TempDirNotEmptySnafu { path: &new_ds_dir }
        );
        journal.log(Action::Mkdir, &[path_str(&new_ds_dir)?])?;
        fs::remove_dir(&new_ds_dir).context(error::RemoveTempDirSnafu { path: &new_ds_dir })?;
        self.add_step(format!("remove temp toDs directory {}", new_ds_dir.display()));

        sync_dir(&self.path);

        self.old_ds_dir = Some(old_ds_dir);
        Ok(())
    }
}

/// fsync the repo directory so the renames stick even if we crash right
/// after.  If fsync fails, warn but continue, because we likely can't swap
/// the directories back without hitting the same failure.
fn sync_dir(path: &Path) {
    let result = Dir::open(path, OFlag::O_DIRECTORY, Mode::empty())
        .map_err(|e| e.to_string())
        .and_then(|dir| fsync(dir.as_raw_fd()).map_err(|e| e.to_string()));

    if let Err(e) = result {
        log::warn!(
            "fsync of repo directory '{}' failed, swap may disappear if we crash now: {}",
            path.display(),
            e
        );
    }
}

/// Streams every key of the source datastore into the destination through
/// size-bounded batches, reporting progress on stderr.
pub fn copy_keys(from_ds: &dyn Datastore, to_ds: &dyn Datastore) -> Result<()> {
    // flatfs only supports keys-only queries; values are fetched per key.
    let entries = from_ds
        .query(&Key::root(), true)
        .context(error::QuerySnafu)?;

    let mut done_entries = 0;
    let mut cur_entries = 0;
    let mut cur_size = 0;

    let mut cur_batch: Option<Box<dyn Batch>> = None;

    for entry in entries {
        let entry = entry.context(error::NextEntrySnafu)?;

        if cur_batch.is_none() {
            cur_batch = Some(to_ds.batch().context(error::CreateBatchSnafu)?);
        }
        let batch = match cur_batch.as_mut() {
            Some(batch) => batch,
            None => unreachable!("batch created above"),
        };

        let value = from_ds
            .get(&entry.key)
            .context(error::GetKeySnafu {
                key: entry.key.name(),
            })?
            .context(error::ListedKeyNotPresentSnafu {
                key: entry.key.name(),
            })?;

        batch.put(&entry.key, &value).context(error::BatchPutSnafu {
            key: entry.key.name(),
        })?;
        cur_entries += 1;
        cur_size += value.len();

        if cur_entries == MAX_BATCH_ENTRIES || cur_size >= MAX_BATCH_SIZE {
            let mut batch = cur_batch.take().unwrap_or_else(|| unreachable!());
            batch.commit().context(error::BatchCommitSnafu)?;

            done_entries += cur_entries;
            progress(done_entries);

            cur_entries = 0;
            cur_size = 0;
        }
    }

    progress(done_entries + cur_entries);
    eprintln!();

    if let Some(mut batch) = cur_batch.take() {
        batch.commit().context(error::BatchCommitSnafu)?;
    }
    Ok(())
}

/// Single carriage-returned progress line on stderr; deliberately not the
/// logger, which would emit one line per update.
fn progress(done: usize) {
    eprint!("\rcopied {} keys", done);
    let _ = std::io::stderr().flush();
}

/// Checks that every key in the source is present in the destination,
/// returning how many were seen.
pub fn verify_keys(from_ds: &dyn Datastore, to_ds: &dyn Datastore) -> Result<usize> {
    let entries = from_ds
        .query(&Key::root(), true)
        .context(error::QuerySnafu)?;

    let mut verified = 0;
    for entry in entries {
        let entry = entry.context(error::NextEntrySnafu)?;

        let has = to_ds.has(&entry.key).context(error::VerifyHasSnafu)?;
        ensure!(
            has,
            error::KeyMissingSnafu {
                key: entry.key.name(),
            }
        );

        verified += 1;
    }

    Ok(verified)
}

#[cfg(test)]
mod test {
    use super::*;
    use datastore::MemDatastore;

    fn seeded(count: usize) -> MemDatastore {
        let mut store = MemDatastore::new();
        for i in 0..count {
            let key = Key::new(&format!("/blocks/KEY{}", i));
            store.put(&key, format!("value {}", i).as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn copies_all_keys() {
        // More than one batch worth of keys.
        let from = seeded(MAX_BATCH_ENTRIES * 2 + 10);
        let to = MemDatastore::new();

        copy_keys(&from, &to).unwrap();
        assert_eq!(
            verify_keys(&from, &to).unwrap(),
            MAX_BATCH_ENTRIES * 2 + 10
        );

        // Values survive byte-for-byte.
        assert_eq!(
            to.get(&Key::new("/blocks/KEY7")).unwrap(),
            Some(b"value 7".to_vec())
        );
    }

    #[test]
    fn verify_catches_missing_key() {
        let from = seeded(10);
        let to = MemDatastore::new();
        copy_keys(&from, &to).unwrap();

        let mut broken = to.clone();
        broken.delete(&Key::new("/blocks/KEY3")).unwrap();

        let err = verify_keys(&from, &broken).unwrap_err();
        assert!(err
            .to_string()
            .contains("key /blocks/KEY3 was not present in new datastore"));
    }

    #[test]
    fn copy_empty_source() {
        let from = MemDatastore::new();
        let to = MemDatastore::new();
        copy_keys(&from, &to).unwrap();
        assert_eq!(verify_keys(&from, &to).unwrap(), 0);
    }
}
