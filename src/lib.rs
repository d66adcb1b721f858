pub mod access;
pub mod ber;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod ldap;
pub mod server;
pub mod storage;

pub use config::Config;
pub use server::Server;

use ldap::protocol::ResultCode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operations error: {0}")]
    Operations(String),

    #[error("invalid DN syntax: {0}")]
    InvalidDnSyntax(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication method not supported")]
    AuthMethodNotSupported,

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),

    #[error("insufficient access rights")]
    InsufficientAccess,

    #[error("unavailable critical extension: {0}")]
    UnavailableCriticalExtension(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The LDAP result code carried by the result PDU built for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::Protocol(_) => ResultCode::ProtocolError,
            Error::Operations(_) => ResultCode::OperationsError,
            Error::InvalidDnSyntax(_) => ResultCode::InvalidDnSyntax,
            Error::InvalidCredentials => ResultCode::InvalidCredentials,
            Error::AuthMethodNotSupported => ResultCode::AuthMethodNotSupported,
            Error::NoSuchObject(_) => ResultCode::NoSuchObject,
            Error::NoSuchAttribute(_) => ResultCode::NoSuchAttribute,
            Error::InsufficientAccess => ResultCode::InsufficientAccessRights,
            Error::UnavailableCriticalExtension(_) => ResultCode::UnavailableCriticalExtension,
            Error::AlreadyExists(_) => ResultCode::EntryAlreadyExists,
            Error::Config(_) | Error::Io(_) | Error::Other(_) => ResultCode::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
