use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }
}

/// Configuration problems are the caller's fault; everything else is a runtime error.
impl From<rampr_core::Error> for RunError {
    fn from(err: rampr_core::Error) -> Self {
        use rampr_core::Error as E;
        match err {
            E::InvalidStages
            | E::InvalidTick
            | E::InvalidBaseUrl(_)
            | E::InvalidThreshold { .. }
            | E::InvalidTemplate { .. }
            | E::InvalidStep { .. }
            | E::Metrics(_) => Self::InvalidInput(err.into()),
            E::InvalidRequest { .. } | E::Setup(_) | E::Teardown(_) => {
                Self::RuntimeError(err.into())
            }
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
