use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfiguration(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_lists_every_problem() {
        let err = Error::InvalidConfiguration(vec![
            "pool.capacity must be at least 1".to_string(),
            "broker.destination must not be empty".to_string(),
        ]);

        let message = err.to_string();
        assert!(message.contains("pool.capacity"));
        assert!(message.contains("broker.destination"));
    }
}
