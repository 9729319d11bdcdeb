use crate::{ErrorCode, ErrorContext, SluiceError};

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

impl From<config::ConfigError> for SluiceError {
    fn from(err: config::ConfigError) -> Self {
        let (file_path, field) = match &err {
            config::ConfigError::NotFound(key) => (None, Some(key.clone())),
            config::ConfigError::FileParse { uri, .. } => (uri.clone(), None),
            config::ConfigError::Type { key, .. } => (None, key.clone()),
            _ => (None, None),
        };

        SluiceError::new(ErrorCode::InvalidConfig, err.to_string())
            .with_context(ErrorContext::Config { file_path, field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_mapping() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let sluice_err: SluiceError = err.into();
        assert_eq!(sluice_err.code, ErrorCode::SerializationFailed);
    }

    #[test]
    fn test_config_not_found_mapping() {
        let err = config::ConfigError::NotFound("pool.max_connections".to_string());
        let sluice_err: SluiceError = err.into();
        assert_eq!(sluice_err.code, ErrorCode::InvalidConfig);
        match sluice_err.context {
            Some(ErrorContext::Config { field, .. }) => {
                assert_eq!(field.as_deref(), Some("pool.max_connections"));
            }
            _ => panic!("Expected Config context"),
        }
    }
}
