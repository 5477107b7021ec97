// src/core/errors.rs

//! Defines the primary error type for the entire controller.

use std::num::{ParseFloatError, ParseIntError};
use std::sync::Arc;
use thiserror::Error;

/// Base of the application error-code range. Codes below this are reserved
/// for raw system errno values surfaced through [`LatticeError::Io`].
pub const ERRNO_APP_BASE: u32 = 2000;

/// The main error enum, representing all possible failures within the controller.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
///
/// Every application-range variant maps to a stable numeric code via
/// [`LatticeError::code`], grouped in blocks of 100 per category:
/// communication 2000+, submission 2100+, scheduling 2200+, lifecycle 2300+,
/// credential 2400+, database 2500+, data parsing 2600+.
#[derive(Error, Debug)]
pub enum LatticeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Internal error: {0}")]
    Internal(String),

    // --- Communication (2000+) ---
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Failure sending message: {0}")]
    SendFailure(String),

    #[error("Failure receiving message: {0}")]
    ReceiveFailure(String),

    #[error("Failure shutting down connection: {0}")]
    ShutdownFailure(String),

    #[error("Protocol version mismatch (ours {ours:#x}, theirs {theirs:#x})")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("Insane message length {0}")]
    InsaneMessageLength(usize),

    #[error("Protocol authentication error")]
    MissingAuth,

    #[error("Communication rate limited, retry later")]
    CommunicationsBackoff,

    #[error("Unknown message type {0:#06x}")]
    UnknownMessageType(u16),

    // --- Submission-time (2100+) ---
    #[error("Invalid partition name specified: {0}")]
    InvalidPartition(String),

    #[error("System default partition not set")]
    DefaultPartitionNotSet,

    #[error("Access/permission denied")]
    AccessDenied,

    #[error("User's group not permitted to use this partition")]
    MissingPartitionGroup,

    #[error("Requested nodes not in this partition: {0}")]
    NodesNotInPartition(String),

    #[error("More processors requested than permitted")]
    TooManyCpus,

    #[error("Node count specification invalid")]
    InvalidNodeCount,

    #[error("Invalid time limit specification")]
    InvalidTimeLimit,

    #[error("Invalid feature specification: {0}")]
    InvalidFeature(String),

    #[error("Invalid generic resource specification: {0}")]
    InvalidGres(String),

    #[error("Invalid qos specification: {0}")]
    InvalidQos(String),

    #[error("Invalid reservation specification: {0}")]
    InvalidReservation(String),

    #[error("Access denied to requested reservation: {0}")]
    ReservationAccess(String),

    #[error("Job violates accounting policy")]
    AccountingPolicy,

    #[error("Duplicate job id {0}")]
    DuplicateJobId(u32),

    #[error("Invalid job id specified: {0}")]
    InvalidJobId(u32),

    #[error("User id missing or invalid")]
    UserIdMissing,

    #[error("Invalid node name specified: {0}")]
    InvalidNodeName(String),

    // --- Scheduling-time (2200+) ---
    #[error("Requested nodes are busy")]
    NodesBusy,

    #[error("Immediate execution impossible, resources too fragmented")]
    Fragmentation,

    #[error("Requested licenses are unavailable")]
    LicensesUnavailable,

    #[error("Requested node configuration is not available")]
    RequestedConfigUnavailable,

    #[error("Required node not available: {0}")]
    RequiredNodeNotAvailable(String),

    #[error("Job is held")]
    JobHeld,

    #[error("Job dependency problem")]
    Dependency,

    #[error("QOS preemption loop detected")]
    QosPreemptionLoop,

    #[error("Step limit reached for this job")]
    StepLimit,

    #[error("Job is current held by a suspended allocation")]
    JobSuspended,

    #[error("Could not distribute the requested task count")]
    BadTaskCount,

    #[error("Invalid task distribution specified")]
    BadDistribution,

    #[error("Interconnect context failure: {0}")]
    InterconnectFailure(String),

    // --- Lifecycle (2300+) ---
    #[error("Job is no longer pending execution")]
    JobNotPending,

    #[error("Job is not running")]
    JobNotRunning,

    #[error("Job/step already completing or completed")]
    AlreadyDone,

    #[error("Job has not finished yet")]
    JobNotFinished,

    #[error("Only state transitions no update performed")]
    TransitionStateNoUpdate,

    #[error("Job priority changes do not persist across restarts")]
    PrioResetFail,

    #[error("Invalid node state transition: {from} -> {to}")]
    InvalidNodeState { from: String, to: String },

    // --- Credential (2400+) ---
    #[error("Invalid job credential")]
    CredInvalid,

    #[error("Job credential replayed")]
    CredReplayed,

    #[error("Job credential expired")]
    CredExpired,

    #[error("Job credential unpack failure")]
    CredUnpackFailure,

    #[error("Credential does not apply to this request")]
    CredSkip,

    // --- Database (2500+) ---
    #[error("Unable to connect to database: {0}")]
    DbConnection(String),

    #[error("Only one change at a time allowed")]
    DbOneChangeAtATime,

    #[error("Database result too large")]
    DbResultTooLarge,

    #[error("Too many fields in database query")]
    DbQueryTooWide,

    #[error("Database connection invalid")]
    DbConnectionInvalid,

    // --- Data parsing (2600+) ---
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Nothing found with query")]
    EmptyResult,

    #[error("Request to modify is ambiguous")]
    AmbiguousModify,

    #[error("Missing uid/gid on request")]
    MissingUidGid,
}

impl LatticeError {
    /// Returns the stable numeric code for this error kind.
    ///
    /// System-range errors report the underlying errno; everything else
    /// reports a value at or above [`ERRNO_APP_BASE`].
    pub fn code(&self) -> u32 {
        use LatticeError::*;
        match self {
            Io(e) => e.raw_os_error().unwrap_or(1) as u32,
            Internal(_) => 1999,

            ConnectionFailure(_) => 2000,
            SendFailure(_) => 2001,
            ReceiveFailure(_) => 2002,
            ShutdownFailure(_) => 2003,
            VersionMismatch { .. } => 2004,
            InsaneMessageLength(_) => 2005,
            MissingAuth => 2006,
            CommunicationsBackoff => 2007,
            UnknownMessageType(_) => 2008,

            InvalidPartition(_) => 2100,
            DefaultPartitionNotSet => 2101,
            AccessDenied => 2102,
            MissingPartitionGroup => 2103,
            NodesNotInPartition(_) => 2104,
            TooManyCpus => 2105,
            InvalidNodeCount => 2106,
            InvalidTimeLimit => 2107,
            InvalidFeature(_) => 2108,
            InvalidGres(_) => 2109,
            InvalidQos(_) => 2110,
            InvalidReservation(_) => 2111,
            ReservationAccess(_) => 2112,
            AccountingPolicy => 2113,
            DuplicateJobId(_) => 2114,
            InvalidJobId(_) => 2115,
            UserIdMissing => 2116,
            InvalidNodeName(_) => 2117,

            NodesBusy => 2200,
            Fragmentation => 2201,
            LicensesUnavailable => 2202,
            RequestedConfigUnavailable => 2203,
            RequiredNodeNotAvailable(_) => 2204,
            JobHeld => 2205,
            Dependency => 2206,
            QosPreemptionLoop => 2207,
            StepLimit => 2208,
            JobSuspended => 2209,
            BadTaskCount => 2210,
            BadDistribution => 2211,
            InterconnectFailure(_) => 2212,

            JobNotPending => 2300,
            JobNotRunning => 2301,
            AlreadyDone => 2302,
            JobNotFinished => 2303,
            TransitionStateNoUpdate => 2304,
            PrioResetFail => 2305,
            InvalidNodeState { .. } => 2306,

            CredInvalid => 2400,
            CredReplayed => 2401,
            CredExpired => 2402,
            CredUnpackFailure => 2403,
            CredSkip => 2404,

            DbConnection(_) => 2500,
            DbOneChangeAtATime => 2501,
            DbResultTooLarge => 2502,
            DbQueryTooWide => 2503,
            DbConnectionInvalid => 2504,

            InvalidQuery(_) => 2600,
            ParseFailure(_) => 2601,
            EmptyResult => 2602,
            AmbiguousModify => 2603,
            MissingUidGid => 2604,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for LatticeError {
    fn clone(&self) -> Self {
        use LatticeError::*;
        match self {
            Io(e) => Io(Arc::clone(e)),
            Internal(s) => Internal(s.clone()),
            ConnectionFailure(s) => ConnectionFailure(s.clone()),
            SendFailure(s) => SendFailure(s.clone()),
            ReceiveFailure(s) => ReceiveFailure(s.clone()),
            ShutdownFailure(s) => ShutdownFailure(s.clone()),
            VersionMismatch { ours, theirs } => VersionMismatch {
                ours: *ours,
                theirs: *theirs,
            },
            InsaneMessageLength(n) => InsaneMessageLength(*n),
            MissingAuth => MissingAuth,
            CommunicationsBackoff => CommunicationsBackoff,
            UnknownMessageType(t) => UnknownMessageType(*t),
            InvalidPartition(s) => InvalidPartition(s.clone()),
            DefaultPartitionNotSet => DefaultPartitionNotSet,
            AccessDenied => AccessDenied,
            MissingPartitionGroup => MissingPartitionGroup,
            NodesNotInPartition(s) => NodesNotInPartition(s.clone()),
            TooManyCpus => TooManyCpus,
            InvalidNodeCount => InvalidNodeCount,
            InvalidTimeLimit => InvalidTimeLimit,
            InvalidFeature(s) => InvalidFeature(s.clone()),
            InvalidGres(s) => InvalidGres(s.clone()),
            InvalidQos(s) => InvalidQos(s.clone()),
            InvalidReservation(s) => InvalidReservation(s.clone()),
            ReservationAccess(s) => ReservationAccess(s.clone()),
            AccountingPolicy => AccountingPolicy,
            DuplicateJobId(id) => DuplicateJobId(*id),
            InvalidJobId(id) => InvalidJobId(*id),
            UserIdMissing => UserIdMissing,
            InvalidNodeName(s) => InvalidNodeName(s.clone()),
            NodesBusy => NodesBusy,
            Fragmentation => Fragmentation,
            LicensesUnavailable => LicensesUnavailable,
            RequestedConfigUnavailable => RequestedConfigUnavailable,
            RequiredNodeNotAvailable(s) => RequiredNodeNotAvailable(s.clone()),
            JobHeld => JobHeld,
            Dependency => Dependency,
            QosPreemptionLoop => QosPreemptionLoop,
            StepLimit => StepLimit,
            JobSuspended => JobSuspended,
            BadTaskCount => BadTaskCount,
            BadDistribution => BadDistribution,
            InterconnectFailure(s) => InterconnectFailure(s.clone()),
            JobNotPending => JobNotPending,
            JobNotRunning => JobNotRunning,
            AlreadyDone => AlreadyDone,
            JobNotFinished => JobNotFinished,
            TransitionStateNoUpdate => TransitionStateNoUpdate,
            PrioResetFail => PrioResetFail,
            InvalidNodeState { from, to } => InvalidNodeState {
                from: from.clone(),
                to: to.clone(),
            },
            CredInvalid => CredInvalid,
            CredReplayed => CredReplayed,
            CredExpired => CredExpired,
            CredUnpackFailure => CredUnpackFailure,
            CredSkip => CredSkip,
            DbConnection(s) => DbConnection(s.clone()),
            DbOneChangeAtATime => DbOneChangeAtATime,
            DbResultTooLarge => DbResultTooLarge,
            DbQueryTooWide => DbQueryTooWide,
            DbConnectionInvalid => DbConnectionInvalid,
            InvalidQuery(s) => InvalidQuery(s.clone()),
            ParseFailure(s) => ParseFailure(s.clone()),
            EmptyResult => EmptyResult,
            AmbiguousModify => AmbiguousModify,
            MissingUidGid => MissingUidGid,
        }
    }
}

impl PartialEq for LatticeError {
    fn eq(&self, other: &Self) -> bool {
        use LatticeError::*;
        match (self, other) {
            (Io(e1), Io(e2)) => e1.to_string() == e2.to_string(),
            (Internal(s1), Internal(s2)) => s1 == s2,
            (ConnectionFailure(s1), ConnectionFailure(s2)) => s1 == s2,
            (InvalidPartition(s1), InvalidPartition(s2)) => s1 == s2,
            (NodesNotInPartition(s1), NodesNotInPartition(s2)) => s1 == s2,
            (InvalidFeature(s1), InvalidFeature(s2)) => s1 == s2,
            (InvalidQos(s1), InvalidQos(s2)) => s1 == s2,
            (InvalidReservation(s1), InvalidReservation(s2)) => s1 == s2,
            (DuplicateJobId(a), DuplicateJobId(b)) => a == b,
            (InvalidJobId(a), InvalidJobId(b)) => a == b,
            (RequiredNodeNotAvailable(s1), RequiredNodeNotAvailable(s2)) => s1 == s2,
            (InterconnectFailure(s1), InterconnectFailure(s2)) => s1 == s2,
            (ParseFailure(s1), ParseFailure(s2)) => s1 == s2,
            (InvalidQuery(s1), InvalidQuery(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for LatticeError {
    fn from(e: std::io::Error) -> Self {
        LatticeError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for LatticeError {
    fn from(e: std::str::Utf8Error) -> Self {
        LatticeError::ParseFailure(format!("invalid utf-8: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for LatticeError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        LatticeError::ParseFailure(format!("invalid utf-8: {e}"))
    }
}

impl From<ParseIntError> for LatticeError {
    fn from(e: ParseIntError) -> Self {
        LatticeError::ParseFailure(format!("invalid integer: {e}"))
    }
}

impl From<ParseFloatError> for LatticeError {
    fn from(e: ParseFloatError) -> Self {
        LatticeError::ParseFailure(format!("invalid float: {e}"))
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(e: serde_json::Error) -> Self {
        LatticeError::ParseFailure(format!("JSON serialization/deserialization error: {e}"))
    }
}
