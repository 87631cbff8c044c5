use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("script code {code_hash} ({hash_type}) not found among cell deps")]
    ScriptCodeNotFound { code_hash: String, hash_type: u8 },

    #[error("no program installed for code hash {0}")]
    ProgramNotInstalled(String),

    #[error("machine has already run a root instance")]
    AlreadyRun,

    #[error("cannot start instance thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("invalid transaction fixture: {0}")]
    Fixture(#[from] serde_json::Error),
}
