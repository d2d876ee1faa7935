//! Control-channel requests sent by the console to the capture worker.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::security::path_validation::validate_experiment_path;
use crate::security::validation::{validate_base_name, ValidationError};

/// Request from the console to the capture worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Save the most recently completed frame pair under
    /// `<experiment_path>/RGB/<base_name>.<ext>` and
    /// `<experiment_path>/Depth/<base_name>.txt`.
    SaveFrame {
        request_id: u64,
        experiment_path: String,
        base_name: String,
    },
    /// Ping for health check
    Ping,
}

impl Request {
    /// Validate all parameters in this request.
    ///
    /// Returns Ok(()) if all parameters are valid, or an error describing
    /// the first invalid parameter found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Request::SaveFrame {
                experiment_path,
                base_name,
                ..
            } => {
                validate_experiment_path(Path::new(experiment_path))?;
                validate_base_name(base_name)?;
            }
            Request::Ping => {}
        }
        Ok(())
    }

    /// Request id carried by this request, if it expects a matching reply.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Request::SaveFrame { request_id, .. } => Some(*request_id),
            Request::Ping => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(path: &str, name: &str) -> Request {
        Request::SaveFrame {
            request_id: 7,
            experiment_path: path.to_string(),
            base_name: name.to_string(),
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&save("/data/exp", "001")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"save_frame","request_id":7,"experiment_path":"/data/exp","base_name":"001"}"#
        );
        let ping: Request = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, Request::Ping);
    }

    #[test]
    fn test_validate_save_frame() {
        assert!(save("/data/exp", "001").validate().is_ok());
        assert!(save("/data/exp", "..").validate().is_err());
        assert!(save("/data/exp", "a/b").validate().is_err());
        assert!(save("data/exp", "001").validate().is_err());
        assert!(save("/data/../exp", "001").validate().is_err());
        assert!(Request::Ping.validate().is_ok());
    }
}
