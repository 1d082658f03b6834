/*!
# Background

ds-convert is an offline migration tool for the key/value storage layer of
an IPFS repository.  A repo describes its datastore composition with a
recursive spec (leaf engines, prefix-routed mounts, transparent wrappers);
when the configured spec diverges from the one on disk, this tool moves
every key into the new composition and atomically swaps the repo's
datastore directories.

# Library

The pieces, bottom up:

* [`spec`] models the recursive spec and its canonical on-disk identity.
* [`validate`] type-checks a spec and collects the repo paths it claims.
* [`open`] turns a validated spec into an opened datastore handle.
* [`journal`] is the durable log of reversible filesystem actions.
* [`strategy`] diffs two specs into a minimal conversion plan.
* [`copy`] executes a copy plan: batch-copy, directory swap, verify.
* [`convert`] and [`revert`] are the drivers behind the CLI commands.

Any intermediate failure leaves the journal in a state from which `revert`
restores the original repo; a successful kept conversion leaves it for a
later `revert` or `cleanup`.
*/

pub mod convert;
pub mod copy;
pub mod error;
pub mod journal;
pub mod open;
pub mod repo;
pub mod revert;
pub mod spec;
pub mod strategy;
mod util;
pub mod validate;

pub use error::{Error, Result};
