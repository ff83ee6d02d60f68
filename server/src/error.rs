//! Recoverable failures raised by game rule handlers.

use std::fmt;

/// A client event that could not be applied to the world.
///
/// Neither variant is fatal: the network loop logs the error, optionally
/// tells the sender, and carries on with the next event.
#[derive(Debug, Clone, PartialEq)]
pub enum GameError {
    /// The event names a connection that has no player record, e.g. it
    /// arrived before the connect was processed or after a disconnect.
    UnknownConnection(u32),
    /// A numeric payload field was not a finite number.
    InvalidPayload { field: &'static str, value: f32 },
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::UnknownConnection(id) => write!(f, "no player for connection {}", id),
            GameError::InvalidPayload { field, value } => {
                write!(f, "invalid value for '{}': {}", field, value)
            }
        }
    }
}

impl std::error::Error for GameError {}

/// Rejects NaN and infinities before they reach the world state.
pub fn ensure_finite(field: &'static str, value: f32) -> Result<f32, GameError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GameError::InvalidPayload { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GameError::UnknownConnection(7).to_string(),
            "no player for connection 7"
        );

        let err = GameError::InvalidPayload {
            field: "dx",
            value: f32::INFINITY,
        };
        assert_eq!(err.to_string(), "invalid value for 'dx': inf");
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("x", 12.5), Ok(12.5));
        assert!(ensure_finite("x", f32::NAN).is_err());
        assert_eq!(
            ensure_finite("y", f32::NEG_INFINITY),
            Err(GameError::InvalidPayload {
                field: "y",
                value: f32::NEG_INFINITY
            })
        );
    }
}
