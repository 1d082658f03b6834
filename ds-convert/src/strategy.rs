//! Conversion planner: reduces the source and destination datastore specs
//! to canonical form and computes the minimum work needed to move between
//! them.
//!
//! Transparent wrappers are stripped first, then the mount trees are
//! diffed: a mount present on both sides with the same prefix and the same
//! on-disk identity needs no copying.  Whatever remains is wrapped back
//! into a pair of mount specs describing exactly the stores the copy engine
//! has to touch.  Renames (same disk identity under a different prefix) are
//! not detected; such entries are copied.

use datastore::Key;
use snafu::ensure;

use crate::error::{self, Error, Result};
use crate::spec::{MountEntry, Spec};
use crate::validate::validate;

/// The computed plan: either nothing to do, or a copy between two pruned
/// spec trees.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Noop,
    Copy { from: Spec, to: Spec },
}

impl Strategy {
    /// Canonical JSON encoding of the plan.  Deterministic for a given
    /// input pair, so it doubles as a stable fingerprint.
    pub fn id(&self) -> String {
        match self {
            Strategy::Noop => serde_json::json!({"type": "noop"}).to_string(),
            Strategy::Copy { from, to } => serde_json::json!({
                "type": "copy",
                "from": from,
                "to": to,
            })
            .to_string(),
        }
    }
}

/// A mount entry reduced to what the planner needs: its prefix, its on-disk
/// identity, and the (leaf) spec to rebuild a copy spec from.
#[derive(Debug, Clone)]
struct SimpleMount {
    prefix: Key,
    disk_id: String,
    entry: MountEntry,
}

pub fn plan(from_spec: &Spec, to_spec: &Spec) -> Result<Strategy> {
    let from = canonicalize(from_spec)?;
    let to = canonicalize(to_spec)?;

    if from.is_leaf() {
        // Same leaf type could in principle skip or move directories; we
        // conservatively copy.
        return copy_strategy(from, to);
    }

    match (from, to) {
        (Spec::Mount { mounts: f }, Spec::Mount { mounts: t }) => mount_strategy(&f, &t),
        // Mount to non-mount still has to move every key.
        (from @ Spec::Mount { .. }, to) => copy_strategy(from, to),
        _ => error::StrategyInternalSnafu {
            msg: "unable to create conversion strategy",
        }
        .fail(),
    }
}

/// Strips the transparent measure/log wrappers from a spec, recursing into
/// mount entries (which keep their mountpoint).  The result is a leaf or a
/// mount of leaves/mounts; 'mem' has nothing on disk to convert.
fn canonicalize(spec: &Spec) -> Result<Spec> {
    match spec {
        Spec::Measure { child, .. } => canonicalize(child),
        Spec::Log { child, .. } => canonicalize(child),

        Spec::Mount { mounts } => {
            let mounts = mounts
                .iter()
                .map(|entry| {
                    Ok(MountEntry {
                        mountpoint: entry.mountpoint.clone(),
                        spec: canonicalize(&entry.spec)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(Spec::Mount { mounts })
        }

        Spec::Mem => error::MemNotConvertableSnafu.fail(),

        leaf => Ok(leaf.clone()),
    }
}

fn copy_strategy(mut from: Spec, mut to: Spec) -> Result<Strategy> {
    validate_copy_spec(&mut from, "old")?;
    validate_copy_spec(&mut to, "new")?;

    Ok(Strategy::Copy { from, to })
}

fn validate_copy_spec(spec: &mut Spec, side: &'static str) -> Result<()> {
    let wrap = |source: Error| Error::ValidateCopySpec {
        side,
        source: Box::new(source),
    };

    if let Spec::Mount { mounts } = spec {
        if mounts.is_empty() {
            return Err(wrap(Error::EmptyMounts));
        }
    }

    validate(spec, true).map(|_| ()).map_err(wrap)
}

fn mount_strategy(from_entries: &[MountEntry], to_entries: &[MountEntry]) -> Result<Strategy> {
    let from_mounts = simple_mount_info(from_entries).map_err(|source| Error::ParseMounts {
        side: "old",
        source: Box::new(source),
    })?;
    let to_mounts = simple_mount_info(to_entries).map_err(|source| Error::ParseMounts {
        side: "new",
        source: Box::new(source),
    })?;

    // A source mount is skippable iff the destination has an entry with the
    // same prefix and the same on-disk identity.  Same identity under a
    // different prefix is not a rename we detect.
    let skipable: Vec<SimpleMount> = from_mounts
        .iter()
        .filter(|from| has_matching(&to_mounts, from))
        .cloned()
        .collect();

    let mut from_opt = filter_mounts(&from_mounts, &skipable);
    let mut to_opt = filter_mounts(&to_mounts, &skipable);

    sort_mounts(&mut from_opt);
    sort_mounts(&mut to_opt);

    add_missing_parents(&from_mounts, &to_mounts, &mut from_opt, &mut to_opt)
        .map_err(|source| Error::AddMissing {
            side: "src",
            source: Box::new(source),
        })?;
    add_missing_parents(&to_mounts, &from_mounts, &mut to_opt, &mut from_opt)
        .map_err(|source| Error::AddMissing {
            side: "dest",
            source: Box::new(source),
        })?;

    // Deterministic plan ids: descending prefix order, parents after their
    // children.
    sort_mounts(&mut from_opt);
    sort_mounts(&mut to_opt);

    if from_opt.is_empty() {
        ensure!(
            to_opt.is_empty(),
            error::StrategyInternalSnafu {
                msg: "len(toMounts) != 0",
            }
        );

        return Ok(Strategy::Noop);
    }
    ensure!(
        !to_opt.is_empty(),
        error::StrategyInternalSnafu {
            msg: "len(toMounts) == 0",
        }
    );

    copy_strategy(mounts_spec(from_opt), mounts_spec(to_opt))
}

fn simple_mount_info(entries: &[MountEntry]) -> Result<Vec<SimpleMount>> {
    let mut mounts = Vec::with_capacity(entries.len());

    for entry in entries {
        ensure!(entry.spec.is_leaf(), error::MountNotSimpleSnafu);

        mounts.push(SimpleMount {
            prefix: Key::new(&entry.mountpoint),
            disk_id: entry.spec.disk_id(),
            entry: entry.clone(),
        });
    }

    Ok(mounts)
}

fn find_prefixed(mounts: &[SimpleMount], prefix: &Key) -> Option<usize> {
    mounts.iter().position(|m| m.prefix == *prefix)
}

fn has_matching(mounts: &[SimpleMount], searched: &SimpleMount) -> bool {
    match find_prefixed(mounts, &searched.prefix) {
        Some(i) => mounts[i].disk_id == searched.disk_id,
        None => false,
    }
}

/// Removes from `mounts` every entry with a (prefix, disk id) match in
/// `filter`.
fn filter_mounts(mounts: &[SimpleMount], filter: &[SimpleMount]) -> Vec<SimpleMount> {
    mounts
        .iter()
        .filter(|m| !has_matching(filter, m))
        .cloned()
        .collect()
}

fn sort_mounts(mounts: &mut [SimpleMount]) {
    mounts.sort_by(|a, b| b.prefix.name().cmp(a.prefix.name()));
}

/// Adds missing roots to the filtered lists.
///
/// spec A (source):  /a, /a/b
/// spec B (dest):    /a
///
/// Assuming the /a pair matches, both are filtered out, and data under /a/b
/// would be lost: nothing on the destination side covers it.  For each A
/// mount with no same-prefix entry in B, this finds the B entry whose
/// prefix is the longest proper prefix of it (the mount its data will land
/// under) and makes sure both filtered lists carry their own side's entry
/// for that prefix.
fn add_missing_parents(
    spec_a: &[SimpleMount],
    spec_b: &[SimpleMount],
    a_opt: &mut Vec<SimpleMount>,
    b_opt: &mut Vec<SimpleMount>,
) -> Result<()> {
    for mount_a in spec_a {
        if find_prefixed(spec_b, &mount_a.prefix).is_some() {
            continue;
        }

        let mut best_match: Option<&SimpleMount> = None;
        let mut best_len = 0;
        for mount_b in spec_b {
            if !mount_a.prefix.starts_with(&mount_b.prefix)
                || mount_b.prefix.segments().len() >= mount_a.prefix.segments().len()
            {
                continue;
            }

            // Strict > keeps the first of equally-deep candidates.
            let matched = mount_b.prefix.segments().len();
            if best_match.is_none() || matched > best_len {
                best_len = matched;
                best_match = Some(mount_b);
            }
        }

        let best_match = match best_match {
            Some(best_match) => best_match,
            None => {
                return error::NoBestMatchSnafu {
                    prefix: mount_a.prefix.name(),
                }
                .fail()
            }
        };

        if find_prefixed(b_opt, &best_match.prefix).is_none() {
            b_opt.push(best_match.clone());
        }
        if find_prefixed(a_opt, &best_match.prefix).is_none() {
            match find_prefixed(spec_a, &best_match.prefix) {
                Some(i) => a_opt.push(spec_a[i].clone()),
                None => {
                    return error::NoParentEntrySnafu {
                        prefix: best_match.prefix.name(),
                        child: mount_a.prefix.name(),
                    }
                    .fail()
                }
            }
        }
    }

    Ok(())
}

fn mounts_spec(mounts: Vec<SimpleMount>) -> Spec {
    Spec::Mount {
        mounts: mounts.into_iter().map(|m| m.entry).collect(),
    }
}
