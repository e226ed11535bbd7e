use thiserror::Error;

/// `SimulationError` enumerates all possible errors returned by devsim.
///
/// Structure errors are fatal at build time and abort the current tick at
/// runtime.  Protocol errors indicate a dynamics violated its contract and
/// are fatal to the run.  Value errors report a payload kind mismatch.
/// I/O errors surface from the stream writers and may leave a view
/// degraded without aborting the other views.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Represents a model registered twice under the same name
    #[error("The model '{name}' is already registered with a simulator")]
    DuplicateModel { name: String },

    /// Represents an operation requested on a model that does not exist
    #[error("The model '{name}' cannot be found in the simulation")]
    ModelNotFound { name: String },

    /// Represents an event or observation on an unknown model port
    #[error("The port '{port}' cannot be found on model '{model}'")]
    PortNotFound { model: String, port: String },

    /// Represents a reference to a view unknown to the coordinator
    #[error("The view '{name}' is unknown to the coordinator")]
    ViewNotFound { name: String },

    /// Represents a view wired to an output that does not exist
    #[error("The output '{output}' does not exist for view '{view}'")]
    OutputNotFound { view: String, output: String },

    /// Represents a timed view configured without a positive timestep
    #[error("The timed view '{view}' requires a positive timestep")]
    InvalidTimestep { view: String },

    /// Represents a dynamics name with no descriptor or constructor
    #[error("The dynamics '{name}' has no registered constructor")]
    DynamicsNotFound { name: String },

    /// Represents a reference to a condition missing from the project
    #[error("The condition '{name}' cannot be found in the project")]
    ConditionNotFound { name: String },

    /// Represents a reference to an observable missing from the project
    #[error("The observable '{name}' cannot be found in the project")]
    ObservableNotFound { name: String },

    /// Represents a negative duration returned by `time_advance`
    #[error("The model '{model}' returned a negative time advance")]
    NegativeTimeAdvance { model: String },

    /// Represents any other breach of the dynamics contract
    #[error("The model '{model}' violated its contract: {message}")]
    ProtocolViolation { model: String, message: String },

    /// Represents a payload value of the wrong kind
    #[error("Expected a {expected} value, found {found}")]
    ValueKindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Represents a missing attribute on an event payload or init list
    #[error("The attribute '{name}' is missing from the payload")]
    AttributeNotFound { name: String },

    /// Transparent I/O errors from the stream writers
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transparent serde_json errors
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Transparent serde_yaml errors
    #[error(transparent)]
    YamlError(#[from] serde_yaml::Error),
}
