//! The card transport abstraction and the umbrella communication error.
//!
//! The NFC or PC/SC plumbing that actually moves bytes is supplied by the
//! caller: anything implementing [`SmartCard`] can drive the protocol
//! stack, including the scripted fake cards the test suite uses.


use std::fmt;

use crate::iso7816::apdu;


/// Errors the transport layer itself can raise, mapped from whatever the
/// host NFC stack reports.
#[derive(Debug)]
pub enum TransportError {
    /// No chip in the field.
    NoTag,
    /// More than one chip responded to discovery.
    MultipleTags,
    /// The chip left the field or the session was invalidated.
    ConnectionLost,
    /// The user dismissed the host's NFC prompt.
    UserCancelled,
    /// Any other transport condition, described by the host.
    Other(String),
}
impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTag => write!(f, "no tag in the field"),
            Self::MultipleTags => write!(f, "multiple tags in the field"),
            Self::ConnectionLost => write!(f, "connection to the tag lost"),
            Self::UserCancelled => write!(f, "session cancelled by the user"),
            Self::Other(message) => write!(f, "transport error: {}", message),
        }
    }
}
impl std::error::Error for TransportError {}


#[derive(Debug)]
pub enum CommunicationError {
    Write(apdu::WriteError),
    Transport(TransportError),
    ShortResponse,
    SecureMessaging(crate::secure_messaging::Error),
    Bac(crate::bac::Error),
    Pace(crate::pace::Error),
    ChipAuthentication(crate::chip_auth::Error),
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "APDU write error: {}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::ShortResponse => write!(f, "response too short"),
            Self::SecureMessaging(e) => write!(f, "Secure Messaging error: {}", e),
            Self::Bac(e) => write!(f, "BAC error: {}", e),
            Self::Pace(e) => write!(f, "PACE error: {}", e),
            Self::ChipAuthentication(e) => write!(f, "Chip Authentication error: {}", e),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::ShortResponse => None,
            Self::SecureMessaging(e) => Some(e),
            Self::Bac(e) => Some(e),
            Self::Pace(e) => Some(e),
            Self::ChipAuthentication(e) => Some(e),
        }
    }
}
impl From<apdu::WriteError> for CommunicationError {
    fn from(value: apdu::WriteError) -> Self { Self::Write(value) }
}
impl From<TransportError> for CommunicationError {
    fn from(value: TransportError) -> Self { Self::Transport(value) }
}
impl From<crate::secure_messaging::Error> for CommunicationError {
    fn from(value: crate::secure_messaging::Error) -> Self { Self::SecureMessaging(value) }
}
impl From<crate::bac::Error> for CommunicationError {
    fn from(value: crate::bac::Error) -> Self { Self::Bac(value) }
}
impl From<crate::pace::Error> for CommunicationError {
    fn from(value: crate::pace::Error) -> Self { Self::Pace(value) }
}
impl From<crate::chip_auth::Error> for CommunicationError {
    fn from(value: crate::chip_auth::Error) -> Self { Self::ChipAuthentication(value) }
}


/// A smart card compatible with ISO/IEC 7816.
pub trait SmartCard {
    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError>;
}
