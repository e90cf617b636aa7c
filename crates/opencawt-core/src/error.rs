use thiserror::Error;

/// The canonical OpenCawt error type. Every stable code in spec §6 is a
/// variant (or carries one for the small number of caller-supplied-string
/// cases). `code()` returns the stable wire code; `kind()` groups variants
/// into the taxonomy from spec §7 so the HTTP layer can derive a status
/// without re-deriving the grouping per call site.
#[derive(Debug, Error)]
pub enum OpenCawtError {
    // ── Auth errors ───────────────────────────────────────────────────────────
    #[error("missing one or more signed-mutation auth headers")]
    MissingAuthHeaders,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("request timestamp is outside the allowed window")]
    TimestampExpired,

    #[error("nonce has already been used for this agent")]
    NonceReused,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent is banned")]
    AgentBanned,

    // ── Not-found errors ──────────────────────────────────────────────────────
    #[error("case not found: {0}")]
    CaseNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    // ── State-conflict errors ─────────────────────────────────────────────────
    #[error("case is not in draft status")]
    CaseNotDraft,

    #[error("case is not in voting stage")]
    CaseNotVoting,

    #[error("agent is not the prosecution on this case")]
    NotProsecution,

    #[error("agent is not the defence on this case")]
    NotDefence,

    #[error("agent is not a juror on this case")]
    NotJuror,

    #[error("agent is not a pending-ready juror on this case")]
    NotPendingJuror,

    #[error("juror is not in an active voting state")]
    JurorNotActive,

    #[error("defence has already been taken")]
    DefenceAlreadyTaken,

    #[error("defence assignment window has closed")]
    DefenceWindowClosed,

    #[error("defence is reserved for the named defendant")]
    DefenceReservedForNamedDefendant,

    #[error("treasury transaction signature has already been used")]
    TreasuryTxReplay,

    #[error("treasury transaction has not finalised")]
    TreasuryTxNotFinalised,

    #[error("soft daily case cap exceeded")]
    SoftCapExceeded { cap: u32 },

    #[error("a ballot has already been submitted for this juror on this case")]
    BallotAlreadySubmitted,

    #[error("the voting deadline has passed")]
    BallotDeadlinePassed,

    #[error("evidence can only be submitted during the evidence stage")]
    EvidenceStageRequired,

    #[error("evidence quota for this case has been reached")]
    EvidenceLimitReached,

    #[error("readiness confirmation deadline has passed")]
    ReadinessDeadlinePassed,

    #[error("idempotency key claim is already in progress")]
    IdempotencyInProgress,

    #[error("idempotency key was reused with a different payload")]
    IdempotencyKeyReusedWithDifferentPayload,

    #[error("duplicate agreement")]
    DuplicateAgreement,

    #[error("insufficient signatures")]
    InsufficientSignatures,

    #[error("seal job is already finalised")]
    SealJobAlreadyFinalised,

    // ── Client validation errors ───────────────────────────────────────────────
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unknown enum value for {field}: {value}")]
    UnknownEnumValue { field: String, value: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("size exceeded for {field}: max {max}, got {got}")]
    SizeExceeded {
        field: String,
        max: usize,
        got: usize,
    },

    // ── Rate-limit errors ──────────────────────────────────────────────────────
    #[error("rate limit exceeded for {action}")]
    RateLimited { action: String, retry_after_s: u64 },

    // ── External-service errors ─────────────────────────────────────────────────
    #[error("randomness beacon unavailable")]
    BeaconUnavailable,

    #[error("mint worker call failed: {0}")]
    MintWorkerFailed(String),

    // ── Internal / storage errors ───────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Broad error-kind grouping from spec §7, used by the HTTP layer to pick
/// a status code without re-deriving the grouping per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Role,
    NotFound,
    Conflict,
    RateLimit,
    BodyTooLarge,
    Internal,
}

impl OpenCawtError {
    /// The stable wire code clients rely on (spec §6).
    pub fn code(&self) -> &'static str {
        use OpenCawtError::*;
        match self {
            MissingAuthHeaders => "MISSING_AUTH_HEADERS",
            SignatureInvalid => "SIGNATURE_INVALID",
            TimestampExpired => "TIMESTAMP_EXPIRED",
            NonceReused => "NONCE_REUSED",
            AgentNotFound(_) => "AGENT_NOT_FOUND",
            AgentBanned => "AGENT_BANNED",
            CaseNotFound(_) => "CASE_NOT_FOUND",
            ProposalNotFound(_) => "PROPOSAL_NOT_FOUND",
            CaseNotDraft => "CASE_NOT_DRAFT",
            CaseNotVoting => "CASE_NOT_VOTING",
            NotProsecution => "NOT_PROSECUTION",
            NotDefence => "NOT_DEFENCE",
            NotJuror => "NOT_JUROR",
            NotPendingJuror => "NOT_PENDING_JUROR",
            JurorNotActive => "JUROR_NOT_ACTIVE",
            DefenceAlreadyTaken => "DEFENCE_ALREADY_TAKEN",
            DefenceWindowClosed => "DEFENCE_WINDOW_CLOSED",
            DefenceReservedForNamedDefendant => "DEFENCE_RESERVED_FOR_NAMED_DEFENDANT",
            TreasuryTxReplay => "TREASURY_TX_REPLAY",
            TreasuryTxNotFinalised => "TREASURY_TX_NOT_FINALISED",
            SoftCapExceeded { .. } => "SOFT_CAP_EXCEEDED",
            BallotAlreadySubmitted => "BALLOT_ALREADY_SUBMITTED",
            BallotDeadlinePassed => "BALLOT_DEADLINE_PASSED",
            EvidenceStageRequired => "EVIDENCE_STAGE_REQUIRED",
            EvidenceLimitReached => "EVIDENCE_LIMIT_REACHED",
            ReadinessDeadlinePassed => "READINESS_DEADLINE_PASSED",
            IdempotencyInProgress => "IDEMPOTENCY_IN_PROGRESS",
            IdempotencyKeyReusedWithDifferentPayload => {
                "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD"
            }
            DuplicateAgreement => "DUPLICATE_AGREEMENT",
            InsufficientSignatures => "INSUFFICIENT_SIGNATURES",
            SealJobAlreadyFinalised => "SEAL_JOB_ALREADY_FINALISED",
            Malformed(_) => "MALFORMED_REQUEST",
            UnknownEnumValue { .. } => "UNKNOWN_ENUM_VALUE",
            MissingField(_) => "MISSING_FIELD",
            SizeExceeded { .. } => "SIZE_EXCEEDED",
            RateLimited { .. } => "RATE_LIMITED",
            BeaconUnavailable => "BEACON_UNAVAILABLE",
            MintWorkerFailed(_) => "MINT_WORKER_FAILED",
            Storage(_) | Serialization(_) | Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// `retry_after_s` for the error envelope (spec §6): only rate-limit
    /// variants carry a meaningful value.
    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            OpenCawtError::RateLimited { retry_after_s, .. } => Some(*retry_after_s),
            _ => None,
        }
    }

    /// `details` for the error envelope (spec §6): structured context for
    /// the variants where the message string alone loses information a
    /// programmatic client would want (the cap number, the field that was
    /// too large, the unrecognised enum value).
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            OpenCawtError::SoftCapExceeded { cap } => Some(serde_json::json!({ "cap": cap })),
            OpenCawtError::SizeExceeded { field, max, got } => {
                Some(serde_json::json!({ "field": field, "max": max, "got": got }))
            }
            OpenCawtError::UnknownEnumValue { field, value } => {
                Some(serde_json::json!({ "field": field, "value": value }))
            }
            OpenCawtError::RateLimited { action, .. } => Some(serde_json::json!({ "action": action })),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use OpenCawtError::*;
        match self {
            Malformed(_) | UnknownEnumValue { .. } | MissingField(_) => ErrorKind::Validation,
            SizeExceeded { .. } => ErrorKind::BodyTooLarge,
            MissingAuthHeaders | SignatureInvalid | TimestampExpired | NonceReused
            | AgentBanned => ErrorKind::Auth,
            NotProsecution | NotDefence | NotJuror | NotPendingJuror | JurorNotActive => {
                ErrorKind::Role
            }
            AgentNotFound(_) | CaseNotFound(_) | ProposalNotFound(_) => ErrorKind::NotFound,
            CaseNotDraft
            | CaseNotVoting
            | DefenceAlreadyTaken
            | DefenceWindowClosed
            | DefenceReservedForNamedDefendant
            | TreasuryTxReplay
            | TreasuryTxNotFinalised
            | BallotAlreadySubmitted
            | BallotDeadlinePassed
            | EvidenceStageRequired
            | EvidenceLimitReached
            | ReadinessDeadlinePassed
            | IdempotencyInProgress
            | IdempotencyKeyReusedWithDifferentPayload
            | DuplicateAgreement
            | InsufficientSignatures
            | SealJobAlreadyFinalised => ErrorKind::Conflict,
            SoftCapExceeded { .. } | RateLimited { .. } => ErrorKind::RateLimit,
            BeaconUnavailable | MintWorkerFailed(_) => ErrorKind::Internal,
            Storage(_) | Serialization(_) | Internal(_) => ErrorKind::Internal,
        }
    }
}
