use std::borrow::Cow;

/// Tags attached to an `anyhow::Error` chain via `.context(...)` so the
/// top-level driver can recover the failure class without re-parsing
/// messages. Mirrors `errors::ErrorMetadata` in spirit: a short,
/// grep-able code plus a human message, with a process exit code added
/// since this runtime is a one-shot CLI rather than a long-lived server.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct FaasrError {
    pub kind: FaasrErrorKind,
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaasrErrorKind {
    PayloadFetchError,
    SchemaViolation,
    CycleDetected,
    UnreachableState,
    InvocationAlreadyExists,
    DataStoreUnreachable,
    LockTimeout,
    UserFunctionFailure,
    ProviderDispatchError,
    JwtInvalid,
    JwtExpired,
    ConditionalWithoutReturn,
}

impl FaasrErrorKind {
    /// Process exit code for this error kind, per SPEC_FULL.md section 7.
    pub fn exit_code(self) -> i32 {
        match self {
            FaasrErrorKind::PayloadFetchError => 10,
            FaasrErrorKind::SchemaViolation => 11,
            FaasrErrorKind::CycleDetected | FaasrErrorKind::UnreachableState => 12,
            FaasrErrorKind::InvocationAlreadyExists => 13,
            FaasrErrorKind::DataStoreUnreachable => 14,
            FaasrErrorKind::LockTimeout => 15,
            FaasrErrorKind::UserFunctionFailure => 16,
            FaasrErrorKind::ProviderDispatchError => 17,
            FaasrErrorKind::JwtInvalid | FaasrErrorKind::JwtExpired => 18,
            FaasrErrorKind::ConditionalWithoutReturn => 19,
        }
    }

    pub fn short_code(self) -> &'static str {
        match self {
            FaasrErrorKind::PayloadFetchError => "PayloadFetchError",
            FaasrErrorKind::SchemaViolation => "SchemaViolation",
            FaasrErrorKind::CycleDetected => "CycleDetected",
            FaasrErrorKind::UnreachableState => "UnreachableState",
            FaasrErrorKind::InvocationAlreadyExists => "InvocationAlreadyExists",
            FaasrErrorKind::DataStoreUnreachable => "DataStoreUnreachable",
            FaasrErrorKind::LockTimeout => "LockTimeout",
            FaasrErrorKind::UserFunctionFailure => "UserFunctionFailure",
            FaasrErrorKind::ProviderDispatchError => "ProviderDispatchError",
            FaasrErrorKind::JwtInvalid => "JWTInvalid",
            FaasrErrorKind::JwtExpired => "JWTExpired",
            FaasrErrorKind::ConditionalWithoutReturn => "ConditionalWithoutReturn",
        }
    }
}

impl FaasrError {
    pub fn new(kind: FaasrErrorKind, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn payload_fetch(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::PayloadFetchError, msg)
    }

    pub fn schema_violation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::SchemaViolation, msg)
    }

    pub fn cycle_detected(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::CycleDetected, msg)
    }

    pub fn unreachable_state(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::UnreachableState, msg)
    }

    pub fn invocation_already_exists(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::InvocationAlreadyExists, msg)
    }

    pub fn data_store_unreachable(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::DataStoreUnreachable, msg)
    }

    pub fn lock_timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::LockTimeout, msg)
    }

    pub fn user_function_failure(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::UserFunctionFailure, msg)
    }

    pub fn provider_dispatch(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::ProviderDispatchError, msg)
    }

    pub fn jwt_invalid(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::JwtInvalid, msg)
    }

    pub fn jwt_expired(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::JwtExpired, msg)
    }

    pub fn conditional_without_return(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FaasrErrorKind::ConditionalWithoutReturn, msg)
    }
}

/// Find a `FaasrError` anywhere in an anyhow error's context chain.
pub fn downcast_kind(err: &anyhow::Error) -> Option<FaasrErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FaasrError>())
        .map(|e| e.kind)
}
