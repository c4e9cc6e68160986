use std::{
    env::{self, VarError},
    fmt, process,
    sync::OnceLock,
};

/// Hardware execution path used for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// GPU execution via [`wonnx`].
    Accelerated,
    /// CPU execution via [`tract_onnx`].
    Scalar,
}

impl Backend {
    /// The backend tried when a load with `self` fails, if any.
    pub fn fallback(self) -> Option<Backend> {
        match self {
            Backend::Accelerated => Some(Backend::Scalar),
            Backend::Scalar => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Accelerated => "accelerated",
            Backend::Scalar => "scalar",
        })
    }
}

const BACKEND_VAR: &str = "STRIDE_BACKEND";

static FORCED: OnceLock<Option<Backend>> = OnceLock::new();

/// Returns the backend forced via `STRIDE_BACKEND`, if any.
///
/// The variable is read once per process. An invalid value terminates the process.
pub fn forced() -> Option<Backend> {
    *FORCED.get_or_init(|| {
        let backend = match parse(env::var(BACKEND_VAR)) {
            Ok(backend) => backend,
            Err(invalid) => {
                eprintln!("invalid value set for `{BACKEND_VAR}` variable: '{invalid}'; exiting");
                process::exit(1);
            }
        };
        if let Some(backend) = backend {
            log::debug!("{BACKEND_VAR} forces {backend} backend");
        }
        backend
    })
}

fn parse(var: Result<String, VarError>) -> Result<Option<Backend>, String> {
    match var.as_deref() {
        Err(VarError::NotPresent) => Ok(None),
        Ok("accelerated" | "gpu") => Ok(Some(Backend::Accelerated)),
        Ok("scalar" | "cpu") => Ok(Some(Backend::Scalar)),
        Ok(invalid) => Err(invalid.to_string()),
        Err(VarError::NotUnicode(s)) => Err(s.to_string_lossy().into_owned()),
    }
}
