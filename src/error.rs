// src/error.rs
//
// Error type for the handful of call sites where a failure must actually
// propagate out of a function boundary (manifest loading, startup serial
// port open). Per the error-handling policy, almost everything else is
// caught at its own call site and turned into a log line plus a degraded
// result (empty register read, dropped record, skipped device) rather than
// an `Err` that travels anywhere.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("modbus transport error: {0}")]
    Modbus(#[from] tokio_modbus::Error),

    #[error("database error: {0}")]
    Database(#[from] tiberius::error::Error),

    #[error("unknown device model {0:?}")]
    UnknownModel(String),
}

pub type AppResult<T> = Result<T, AppError>;
