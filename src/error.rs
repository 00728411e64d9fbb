use std::fmt::Display;

use crate::engine::EngineError;

#[derive(Debug)]
pub enum CamberError {
    Parse(String),
    Io(String),
    Config(String),
    Engine(EngineError),
}

impl Display for CamberError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            CamberError::Parse(v) => ("Parse", v.to_owned()),
            CamberError::Io(v) => ("Io", v.to_owned()),
            CamberError::Config(v) => ("Config", v.to_owned()),
            CamberError::Engine(v) => ("Engine", v.to_string()),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl From<EngineError> for CamberError {
    fn from(err: EngineError) -> Self {
        CamberError::Engine(err)
    }
}
