//! This module owns the error type used by the conversion tool.

use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Error contains the errors that can happen during conversion and revert.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Repository files and locking

    #[snafu(display("Repo file '{}' is missing", path.display()))]
    MissingRepoFile { path: PathBuf },

    #[snafu(display("Unable to read repo file '{}': {}", path.display(), source))]
    ReadRepoFile { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to write repo file '{}': {}", path.display(), source))]
    WriteRepoFile { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to parse JSON in '{}': {}", path.display(), source))]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Unsupported fsrepo version: {}", version))]
    UnsupportedRepoVersion { version: String },

    #[snafu(display("lock is already held at '{}': {}", path.display(), source))]
    RepoLocked { path: PathBuf, source: io::Error },

    #[snafu(display("datastore_spec is not writable"))]
    SpecsNotWritable,

    #[snafu(display("No 'Datastore' or invalid type in {}", path.display()))]
    NoDatastoreField { path: PathBuf },

    #[snafu(display("No 'Datastore.Spec' or invalid type in {}", path.display()))]
    NoDatastoreSpecField { path: PathBuf },

    // Spec parsing and validation

    #[snafu(display("Invalid datastore spec: {}", source))]
    ParseSpec { source: serde_json::Error },

    #[snafu(display("Error validating datastore spec in {}: {}", path.display(), source))]
    ValidateSpec {
        path: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Only paths inside ipfs repo are supported: '{}'", path))]
    PathOutsideRepo { path: String },

    #[snafu(display("Path '{}' is already in use", path))]
    PathInUse { path: String },

    #[snafu(display("Multiple mounts under one path are not allowed: '{}'", mountpoint))]
    DuplicateMountpoint { mountpoint: String },

    #[snafu(display("'mounts' field is empty"))]
    EmptyMounts,

    #[snafu(display("'sync' field is missing in flatfs datastore"))]
    MissingSync,

    #[snafu(display("'compression' field is missing in levelds datastore"))]
    MissingCompression,

    // Planner

    #[snafu(display("'mem' datastore has no disk representation and cannot be converted"))]
    MemNotConvertable,

    #[snafu(display("mount entry is not simple, mount datastores can't be nested"))]
    MountNotSimple,

    #[snafu(display("parsing {} spec: {}", side, source))]
    ParseMounts {
        side: &'static str,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("validating {} copy spec: {}", side, source))]
    ValidateCopySpec {
        side: &'static str,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("adding missing to {} spec: {}", side, source))]
    AddMissing {
        side: &'static str,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("couldn't find best match for specA {}", prefix))]
    NoBestMatch { prefix: String },

    #[snafu(display("couldn't find {} in specA, parent of {}", prefix, child))]
    NoParentEntry { prefix: String, child: String },

    #[snafu(display("strategy error: {}, please report", msg))]
    StrategyInternal { msg: String },

    // Action journal

    #[snafu(display(
        "Log file {} already exists, you may want to run revert",
        path.display()
    ))]
    JournalExists { path: PathBuf },

    #[snafu(display("Error writing conversion log at {}: {}", path.display(), source))]
    JournalWrite { path: PathBuf, source: io::Error },

    #[snafu(display("Error reading conversion log at {}: {}", path.display(), source))]
    JournalRead { path: PathBuf, source: io::Error },

    #[snafu(display("Invalid step in conversion log: {}: {}", line, source))]
    JournalParse {
        line: String,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid action '{}' in conversion log: {}", action, line))]
    JournalAction { action: String, line: String },

    // Copy engine

    #[snafu(display("Error opening datastore at {}: {}", path.display(), source))]
    OpenDatastore {
        path: PathBuf,
        source: datastore::Error,
    },

    #[snafu(display("Error creating datastore directory '{}': {}", path.display(), source))]
    CreateDsDir { path: PathBuf, source: io::Error },

    #[snafu(display("Can't handle non-Unicode path '{}'", path.display()))]
    NonUnicodePath { path: PathBuf },

    #[snafu(display("Error closing {} datastore: {}", which, source))]
    CloseDatastore {
        which: &'static str,
        source: datastore::Error,
    },

    #[snafu(display("Error creating temp datastore directory at {}: {}", path.display(), source))]
    CreateTempDir { path: PathBuf, source: io::Error },

    #[snafu(display("Error opening query: {}", source))]
    Query { source: datastore::Error },

    #[snafu(display("Error listing keys: {}", source))]
    NextEntry { source: datastore::Error },

    #[snafu(display("Get from old datastore failed (dskey {}): {}", key, source))]
    GetKey {
        key: String,
        source: datastore::Error,
    },

    #[snafu(display("Listed key {} not present in old datastore", key))]
    ListedKeyNotPresent { key: String },

    #[snafu(display("Error creating batch: {}", source))]
    CreateBatch { source: datastore::Error },

    #[snafu(display("Batch put failed (dskey {}): {}", key, source))]
    BatchPut {
        key: String,
        source: datastore::Error,
    },

    #[snafu(display("Batch commit failed: {}", source))]
    BatchCommit { source: datastore::Error },

    #[snafu(display("Error moving datastore dir {} to {}: {}", from.display(), to.display(), source))]
    SwapRename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[snafu(display("Failed to move old datastore dir {} from {}", dir, path.display()))]
    MoveNotCleared { dir: String, path: PathBuf },

    #[snafu(display("Failed to move old datastore dir {} to {}", dir, path.display()))]
    MoveMissing { dir: String, path: PathBuf },

    #[snafu(display("{} is not empty", path.display()))]
    TempDirNotEmpty { path: PathBuf },

    #[snafu(display("Failed to remove temp directory {}: {}", path.display(), source))]
    RemoveTempDir { path: PathBuf, source: io::Error },

    #[snafu(display("Checking key in new datastore failed: {}", source))]
    VerifyHas { source: datastore::Error },

    #[snafu(display("key {} was not present in new datastore", key))]
    KeyMissing { key: String },

    #[snafu(display("{}\nconversion steps done so far:\n{}", source, steps))]
    Conversion {
        steps: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    // Revert and cleanup

    #[snafu(display("Revert {} arg count {} != {}", action, actual, expected))]
    RevertArgCount {
        action: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("Revert move source file '{}' didn't exist", path.display()))]
    RevertMoveSource { path: PathBuf },

    #[snafu(display("Revert action on '{}' failed: {}", path.display(), source))]
    RevertIo { path: PathBuf, source: io::Error },

    #[snafu(display("Last conversion was successful, run with --force to revert"))]
    DoneNeedsForce,

    #[snafu(display("Manual intervention needed ('{}'), run with --force to skip", msg))]
    ManualNeedsForce { msg: String },

    #[snafu(display("Cannot run cleanup: the conversion log does not end with a successful conversion"))]
    CleanupNotDone,
}

/// Result alias containing our Error type.
pub type Result<T> = std::result::Result<T, Error>;
