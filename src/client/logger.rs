//! Client that composes GELF messages and hands them to a transport

use crate::config::{ClientConfig, TransportConfig};
use crate::error::ErrorEvents;
use crate::transport::Transport;
use crate::types::{GelfMessage, LogFields, LogLevel};
use crate::{ErrorReporter, Result};
use std::collections::HashMap;
use tracing::debug;

/// Ships log messages to a GELF collector
pub struct GelfClient {
    config: ClientConfig,
    transport: Transport,
    host: String,
    errors: Option<ErrorEvents>,
}

impl GelfClient {
    /// Connect to a collector over UDP with default options
    pub async fn connect_udp(host: &str, port: u16) -> Result<Self> {
        Self::connect_kind("udp", host, port).await
    }

    /// Connect to a collector over TCP with default options
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        Self::connect_kind("tcp", host, port).await
    }

    async fn connect_kind(kind: &str, host: &str, port: u16) -> Result<Self> {
        let config = ClientConfig {
            transport: TransportConfig::from_kind(kind, host, port)?,
            ..Default::default()
        };

        Self::with_config(config).await
    }

    /// Create a client with custom configuration and connect its transport
    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let host = match &config.host {
            Some(host) => host.clone(),
            None => gethostname::gethostname().to_string_lossy().to_string(),
        };

        let (reporter, errors) = ErrorReporter::channel();
        let transport = Transport::from_config(&config.transport, reporter)?;
        transport.connect().await?;
        debug!(kind = transport.kind(), %host, "GELF client connected");

        Ok(Self {
            config,
            transport,
            host,
            errors: Some(errors),
        })
    }

    /// Host name stamped on composed messages
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Underlying transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Take the receiving end of the error channel. Only the first call
    /// returns it.
    pub fn take_errors(&mut self) -> Option<ErrorEvents> {
        self.errors.take()
    }

    /// Build a validated message carrying the client defaults
    pub fn compose(&self, level: LogLevel, message: &str, fields: LogFields) -> Result<GelfMessage> {
        let mut msg = GelfMessage::new(self.host.clone(), message).with_level(level);
        msg.facility = self.config.facility.clone();
        for (name, value) in &self.config.additional_fields {
            msg.insert_field(name, value.clone());
        }
        for (name, value) in fields {
            msg.insert_field(&name, value);
        }
        msg.validate()?;
        Ok(msg)
    }

    /// Send a pre-composed message. Only validation errors are returned;
    /// delivery failures arrive on the error channel.
    pub fn send(&self, message: &GelfMessage) -> Result<()> {
        message.validate()?;
        self.transport.send(message);
        Ok(())
    }

    /// Log a message with specified level and fields
    pub fn log(&self, level: LogLevel, message: &str, fields: LogFields) -> Result<()> {
        if level > self.config.min_level {
            return Ok(());
        }
        let msg = self.compose(level, message, fields)?;
        self.transport.send(&msg);
        Ok(())
    }

    /// Log an emergency message
    pub fn emergency<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Emergency, message.as_ref(), HashMap::new())
    }

    /// Log an emergency message with fields
    pub fn emergency_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Emergency, message.as_ref(), fields)
    }

    /// Log an alert message
    pub fn alert<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Alert, message.as_ref(), HashMap::new())
    }

    /// Log an alert message with fields
    pub fn alert_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Alert, message.as_ref(), fields)
    }

    /// Log a critical message
    pub fn critical<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Critical, message.as_ref(), HashMap::new())
    }

    /// Log a critical message with fields
    pub fn critical_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Critical, message.as_ref(), fields)
    }

    /// Log an error message
    pub fn error<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Error, message.as_ref(), HashMap::new())
    }

    /// Log an error message with fields
    pub fn error_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Error, message.as_ref(), fields)
    }

    /// Log a warning message
    pub fn warning<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Warning, message.as_ref(), HashMap::new())
    }

    /// Log a warning message with fields
    pub fn warning_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Warning, message.as_ref(), fields)
    }

    /// Log a notice message
    pub fn notice<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Notice, message.as_ref(), HashMap::new())
    }

    /// Log a notice message with fields
    pub fn notice_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Notice, message.as_ref(), fields)
    }

    /// Log an info message
    pub fn info<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Info, message.as_ref(), HashMap::new())
    }

    /// Log an info message with fields
    pub fn info_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Info, message.as_ref(), fields)
    }

    /// Log a debug message
    pub fn debug<S: AsRef<str>>(&self, message: S) -> Result<()> {
        self.log(LogLevel::Debug, message.as_ref(), HashMap::new())
    }

    /// Log a debug message with fields
    pub fn debug_with_fields<S: AsRef<str>>(&self, message: S, fields: LogFields) -> Result<()> {
        self.log(LogLevel::Debug, message.as_ref(), fields)
    }

    /// Close the transport. Messages still in a TCP backlog are lost.
    pub async fn close(&self) -> Result<()> {
        self.transport.close();
        Ok(())
    }

    /// Flush any TCP backlog, then close
    pub async fn drain_and_close(&self) -> Result<()> {
        self.transport.drain_and_close().await;
        Ok(())
    }
}
