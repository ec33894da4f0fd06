use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid covariate: {0}")]
    InvalidCovariate(String),

    #[error("Invalid compartment model: {0}")]
    InvalidCompartmentModel(String),

    #[error("No ke0 solution in bracket [{lo}, {hi}]")]
    NoKe0SolutionInBracket { lo: f64, hi: f64 },

    #[error("Integration step size {h:.3e} below minimum at t = {t:.6} min")]
    StepSizeTooSmall { t: f64, h: f64 },

    #[error("Too many step failures at t = {t:.6} min ({failures} in one step attempt)")]
    TooManyFailures { t: f64, failures: usize },

    #[error("Invalid dosing configuration: {0}")]
    InvalidDosing(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type SimResult<T> = Result<T, SimError>;
