/// Failure talking to the event bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// A hiccup; the caller should log it and keep going.
    #[error("Transient event bus error: {0}")]
    Transient(String),

    /// The subscription or broker is gone; the consumer must stop.
    #[error("Event bus unavailable: {0}")]
    Permanent(String),
}

impl BusError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Permanent(_))
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            BusError::Transient(err.to_string())
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error()
        {
            BusError::Permanent(err.to_string())
        } else {
            BusError::Transient(err.to_string())
        }
    }
}
