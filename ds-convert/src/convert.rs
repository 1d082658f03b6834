//! Convert driver: ties the pieces together.
//!
//! Locks the repo, loads the active spec from `datastore_spec` and the
//! desired one from the config, asks the planner for a strategy, drives the
//! copy engine, and finally rewrites the spec file.  Every reversible side
//! effect is journaled before it happens; with `keep` the journal and
//! backup data stay behind for a later `revert` or `cleanup`.

use log::info;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::copy::Copy;
use crate::error::{self, Error, Result};
use crate::journal::{Action, ActionJournal};
use crate::repo;
use crate::spec::Spec;
use crate::strategy::{plan, Strategy};
use crate::util::rando;
use crate::validate::validate;

pub fn convert(repo_path: &Path, keep: bool) -> Result<()> {
    repo::check_repo_version(repo_path)?;

    let _lock = repo::Lock::acquire(repo_path)?;

    let (from_spec, to_spec) = load_specs(repo_path)?;

    let strategy = plan(&from_spec, &to_spec)?;
    log::debug!("Conversion strategy: {}", strategy.id());

    let mut journal = ActionJournal::create(repo_path)?;

    let mut copy = None;
    if let Strategy::Copy { from, to } = strategy {
        let mut cp = Copy::new(repo_path, from, to);

        if let Err(e) = cp.run(&mut journal) {
            return Err(wrap_steps(e, cp.steps()));
        }
        if let Err(e) = cp.verify() {
            return Err(wrap_steps(e, cp.steps()));
        }

        copy = Some(cp);
    }

    info!("Saving new spec");
    save_new_spec(repo_path, &to_spec, keep, &mut journal)?;

    if keep {
        journal.log(Action::Done, &[])?;
        info!("Conversion finished, kept backup files");
        info!("To remove backup files run: ds-convert cleanup");
        info!("To revert the conversion run: ds-convert revert");
    } else {
        if let Some(mut cp) = copy {
            if let Err(e) = cp.clean(&mut journal) {
                return Err(wrap_steps(e, cp.steps()));
            }
        }
        journal.remove()?;
    }

    info!("All tasks finished");
    Ok(())
}

/// Attaches the completed-step trace to an error from the copy phases, so
/// the operator sees both the root cause and how far the conversion got.
fn wrap_steps(source: Error, steps: &[String]) -> Error {
    Error::Conversion {
        steps: steps.join("\n"),
        source: Box::new(source),
    }
}

/// Loads the active spec from `datastore_spec` and the desired spec from
/// the repo config, validating both and populating defaults.  The spec
/// file has to be writable since a successful conversion rewrites it.
fn load_specs(repo_path: &Path) -> Result<(Spec, Spec)> {
    let specs_path = repo_path.join(repo::SPECS_FILE);

    let meta = match fs::metadata(&specs_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error::MissingRepoFileSnafu { path: specs_path }.fail()
        }
        Err(e) => return Err(e).context(error::ReadRepoFileSnafu { path: specs_path }),
    };
    ensure!(
        meta.permissions().mode() & 0o200 != 0,
        error::SpecsNotWritableSnafu
    );

    let from_value = repo::load_json(&specs_path)?;
    let mut from_spec = Spec::from_value(&from_value)?;
    validate(&mut from_spec, true).map_err(|source| Error::ValidateSpec {
        path: specs_path,
        source: Box::new(source),
    })?;

    let config_path = repo_path.join(repo::CONFIG_FILE);
    let config = repo::load_json(&config_path)?;
    let spec_value = config
        .get("Datastore")
        .and_then(Value::as_object)
        .context(error::NoDatastoreFieldSnafu { path: &config_path })?
        .get("Spec")
        .filter(|v| v.is_object())
        .context(error::NoDatastoreSpecFieldSnafu { path: &config_path })?;

    let mut to_spec = Spec::from_value(spec_value)?;
    validate(&mut to_spec, true).map_err(|source| Error::ValidateSpec {
        path: config_path,
        source: Box::new(source),
    })?;

    Ok((from_spec, to_spec))
}

/// Rewrites `datastore_spec` to the new spec's on-disk form.  In backup
/// mode the old contents are first copied aside and the restore journaled;
/// otherwise the journal only gets a manual marker, since the old contents
/// are gone.
fn save_new_spec(
    repo_path: &Path,
    to_spec: &Spec,
    backup: bool,
    journal: &mut ActionJournal,
) -> Result<()> {
    let specs_path = repo_path.join(repo::SPECS_FILE);

    if backup {
        let backup_path = repo_path.join(format!("datastore_spec_backup{}", rando()));
        fs::copy(&specs_path, &backup_path).context(error::WriteRepoFileSnafu {
            path: &backup_path,
        })?;

        journal.log(
            Action::Move,
            &[
                crate::util::path_str(&backup_path)?,
                crate::util::path_str(&specs_path)?,
            ],
        )?;
        journal.log(Action::Cleanup, &[crate::util::path_str(&backup_path)?])?;
    } else {
        journal.log(Action::Manual, &["restore datastore_spec to previous state"])?;
    }

    fs::write(&specs_path, to_spec.disk_id())
        .context(error::WriteRepoFileSnafu { path: specs_path })
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn write_repo_files(repo: &Path, spec: &Value, config_spec: &Value) {
        fs::write(repo.join(repo::VERSION_FILE), "6\n").unwrap();
        fs::write(repo.join(repo::SPECS_FILE), spec.to_string()).unwrap();
        let config = serde_json::json!({"Datastore": {"Spec": config_spec}});
        fs::write(repo.join(repo::CONFIG_FILE), config.to_string()).unwrap();
    }

    fn leaf_spec(path: &str) -> Value {
        serde_json::json!({"type": "badgerds", "path": path})
    }

    use serde_json::Value;

    #[test]
    fn load_specs_happy_path() {
        let repo = TempDir::new().unwrap();
        write_repo_files(repo.path(), &leaf_spec("a"), &leaf_spec("b"));

        let (from, to) = load_specs(repo.path()).unwrap();
        assert_eq!(from.type_name(), "badgerds");
        assert_eq!(to.type_name(), "badgerds");
    }

    #[test]
    fn load_specs_requires_files() {
        let repo = TempDir::new().unwrap();
        // No datastore_spec at all
        load_specs(repo.path()).unwrap_err();

        // Spec present, config missing
        fs::write(repo.path().join(repo::SPECS_FILE), leaf_spec("a").to_string()).unwrap();
        load_specs(repo.path()).unwrap_err();
    }

    #[test]
    fn load_specs_checks_config_shape() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join(repo::SPECS_FILE), leaf_spec("a").to_string()).unwrap();

        fs::write(repo.path().join(repo::CONFIG_FILE), "{}").unwrap();
        let err = load_specs(repo.path()).unwrap_err();
        assert!(err.to_string().contains("'Datastore'"));

        fs::write(
            repo.path().join(repo::CONFIG_FILE),
            serde_json::json!({"Datastore": {}}).to_string(),
        )
        .unwrap();
        let err = load_specs(repo.path()).unwrap_err();
        assert!(err.to_string().contains("'Datastore.Spec'"));
    }

    #[test]
    fn load_specs_requires_writable_spec_file() {
        let repo = TempDir::new().unwrap();
        write_repo_files(repo.path(), &leaf_spec("a"), &leaf_spec("b"));

        let specs_path = repo.path().join(repo::SPECS_FILE);
        let mut perms = fs::metadata(&specs_path).unwrap().permissions();
        perms.set_mode(0o444);
        fs::set_permissions(&specs_path, perms).unwrap();

        let err = load_specs(repo.path()).unwrap_err();
        assert!(err.to_string().contains("not writable"));
    }

    #[test]
    fn save_new_spec_writes_disk_form() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join(repo::SPECS_FILE), "{}").unwrap();
        let mut journal = ActionJournal::create(repo.path()).unwrap();

        let spec = Spec::from_value(&serde_json::json!({
            "type": "levelds",
            "path": "db",
            "compression": "none",
        }))
        .unwrap();

        save_new_spec(repo.path(), &spec, false, &mut journal).unwrap();
        let written = fs::read_to_string(repo.path().join(repo::SPECS_FILE)).unwrap();
        // Runtime fields are not part of the on-disk identity.
        assert_eq!(written, r#"{"path":"db","type":"levelds"}"#);
    }

    #[test]
    fn save_new_spec_backup_keeps_old_contents() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join(repo::SPECS_FILE), "old contents").unwrap();
        let mut journal = ActionJournal::create(repo.path()).unwrap();

        let spec = Spec::from_value(&leaf_spec("db")).unwrap();
        save_new_spec(repo.path(), &spec, true, &mut journal).unwrap();

        let backup: Vec<_> = fs::read_dir(repo.path())
            .unwrap()
            .filter_map(|e| {
                let name = e.unwrap().file_name().to_string_lossy().into_owned();
                name.starts_with("datastore_spec_backup").then_some(name)
            })
            .collect();
        assert_eq!(backup.len(), 1);
        assert_eq!(
            fs::read_to_string(repo.path().join(&backup[0])).unwrap(),
            "old contents"
        );
    }
}
