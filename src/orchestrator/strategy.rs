//! Which path a request takes, and where it goes after a native failure.

use std::fmt;

/// Why a request ended up on the fallback path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Forced,
    NativeUnavailable,
    DetectionFailed(String),
    EngineFailed {
        detected_language: String,
        message: String,
    },
}

impl FallbackReason {
    /// Source language to hand to the fallback executor, when one was detected
    pub fn source_language(&self) -> Option<&str> {
        match self {
            Self::EngineFailed { detected_language, .. } => Some(detected_language),
            _ => None,
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "fallback forced"),
            Self::NativeUnavailable => write!(f, "native translation unavailable"),
            Self::DetectionFailed(message) => write!(f, "language detection failed: {}", message),
            Self::EngineFailed { detected_language, message } => {
                write!(f, "native engine failed ({}): {}", detected_language, message)
            }
        }
    }
}

/// A recoverable failure on the native path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeFailure {
    Detection(String),
    Engine {
        detected_language: String,
        message: String,
    },
}

impl fmt::Display for NativeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detection(message) => write!(f, "detection: {}", message),
            Self::Engine { message, .. } => write!(f, "engine: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    TryNative,
    Fallback(FallbackReason),
}

impl Strategy {
    /// First stage: native unless forced off or missing
    pub fn select(force_fallback: bool, native_available: bool) -> Self {
        if force_fallback {
            Self::Fallback(FallbackReason::Forced)
        } else if !native_available {
            Self::Fallback(FallbackReason::NativeUnavailable)
        } else {
            Self::TryNative
        }
    }

    /// Second stage: every native failure is redirected to the fallback
    pub fn recover(failure: NativeFailure) -> Self {
        match failure {
            NativeFailure::Detection(message) => Self::Fallback(FallbackReason::DetectionFailed(message)),
            NativeFailure::Engine { detected_language, message } => {
                Self::Fallback(FallbackReason::EngineFailed { detected_language, message })
            }
        }
    }
}
