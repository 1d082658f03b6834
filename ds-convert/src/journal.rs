//! Durable journal of reversible filesystem actions.
//!
//! The convert driver appends one action per line to `convertlog` in the
//! repo root, fsyncing after every append, always *before* performing the
//! filesystem effect the entry undoes.  Revert consumes the entries in LIFO
//! order, rewriting the file after each executed step so an interrupted
//! revert resumes where it stopped.

use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{self, Result};

pub const CONVERT_LOG: &str = "convertlog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Remove a path on revert.
    Remove,
    /// Rename arg[0] to arg[1] on revert.
    Move,
    /// Recreate a directory on revert.
    Mkdir,
    /// Not automatically reversible; revert stops here unless forced.
    Manual,
    /// Remove a path in cleanup mode; ignored by revert.
    Cleanup,
    /// Terminal marker of a successful conversion.
    Done,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Remove => "rm",
            Action::Move => "mv",
            Action::Mkdir => "mkdir",
            Action::Manual => "manual",
            Action::Cleanup => "cleanup",
            Action::Done => "done",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "rm" => Some(Action::Remove),
            "mv" => Some(Action::Move),
            "mkdir" => Some(Action::Mkdir),
            "manual" => Some(Action::Manual),
            "cleanup" => Some(Action::Cleanup),
            "done" => Some(Action::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub action: Action,
    pub arg: Vec<String>,
}

impl Step {
    fn to_line(&self) -> String {
        let mut line = serde_json::json!({
            "action": self.action.name(),
            "arg": self.arg,
        })
        .to_string();
        line.push('\n');
        line
    }
}

/// Shape of one journal line on disk.
#[derive(Deserialize)]
struct RawStep {
    action: String,
    #[serde(default)]
    arg: Vec<String>,
}

/// Append side of the journal, held by the convert driver.
#[derive(Debug)]
pub struct ActionJournal {
    path: PathBuf,
    file: File,
}

impl ActionJournal {
    /// Creates the journal file.  An existing file means a previous
    /// conversion never finished and must be reverted or cleaned up first.
    pub fn create(repo: &Path) -> Result<Self> {
        let path = repo.join(CONVERT_LOG);

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return error::JournalExistsSnafu { path }.fail()
            }
            Err(e) => return Err(e).context(error::JournalWriteSnafu { path }),
        };

        Ok(Self { path, file })
    }

    /// Appends one action and makes it durable before returning.
    pub fn log(&mut self, action: Action, arg: &[&str]) -> Result<()> {
        let step = Step {
            action,
            arg: arg.iter().map(|s| s.to_string()).collect(),
        };

        self.file
            .write_all(step.to_line().as_bytes())
            .context(error::JournalWriteSnafu { path: &self.path })?;
        self.file
            .sync_all()
            .context(error::JournalWriteSnafu { path: &self.path })
    }

    /// Removes the journal after a fully successful no-backup conversion.
    pub fn remove(self) -> Result<()> {
        drop(self.file);
        fs::remove_file(&self.path).context(error::JournalWriteSnafu { path: &self.path })
    }
}

/// Replay side of the journal, held by the revert driver.
#[derive(Debug, PartialEq)]
pub struct Steps {
    steps: Vec<Step>,
}

impl Steps {
    pub fn load(repo: &Path) -> Result<Self> {
        let path = repo.join(CONVERT_LOG);
        let contents = fs::read_to_string(&path).context(error::JournalReadSnafu { path })?;

        let mut steps = Vec::new();
        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }

            let raw: RawStep =
                serde_json::from_str(line).context(error::JournalParseSnafu { line })?;
            let action = Action::from_name(&raw.action).context(error::JournalActionSnafu {
                action: &raw.action,
                line,
            })?;

            steps.push(Step {
                action,
                arg: raw.arg,
            });
        }

        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The most recent remaining step, which revert executes next.
    pub fn top(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Drops the top step and rewrites the on-disk journal to the remaining
    /// prefix, so a crash mid-revert resumes at the right step.
    pub fn pop(&mut self, repo: &Path) -> Result<()> {
        if self.steps.pop().is_none() {
            return Ok(());
        }
        self.write(repo)
    }

    /// Rewrites the journal to match the in-memory steps; an empty journal
    /// is deleted.
    pub fn write(&self, repo: &Path) -> Result<()> {
        let path = repo.join(CONVERT_LOG);

        if self.steps.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).context(error::JournalWriteSnafu { path }),
            };
        }

        let mut file = File::create(&path).context(error::JournalWriteSnafu { path: &path })?;
        for step in &self.steps {
            file.write_all(step.to_line().as_bytes())
                .context(error::JournalWriteSnafu { path: &path })?;
        }
        file.sync_all().context(error::JournalWriteSnafu { path })
    }
}
