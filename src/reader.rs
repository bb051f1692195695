//! The read orchestrator: drives access control, chip authentication,
//! the data-group reads and passive authentication as one sequential
//! state machine over a caller-supplied transport.
//!
//! Re-keying never mutates a channel: PACE and chip authentication each
//! produce a fresh Secure Messaging object and the previous one is
//! dropped (zeroizing its keys) before the first command under the new
//! keys.


use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::chip_auth;
use crate::iso7816::apdu::{Apdu, Response};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::StatusKind;
use crate::lds::{self, ComInfo, DataGroup};
use crate::pace;
use crate::passive_auth;
use crate::secure_messaging::SecureMessaging;
use crate::sod::SecurityObject;


/// Outcome of one authentication protocol during a read.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AuthenticationStatus {
    #[default]
    NotAttempted,
    Succeeded,
    Failed,
    NotSupported,
}

/// The password material the caller obtained from the document holder.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AccessKey {
    /// The 24-character MRZ key string (see [`crate::mrz::access_key`]).
    MrzKey(String),
    /// A card access number; PACE only, no BAC fallback.
    Can(String),
}
impl AccessKey {
    fn pace_password(&self) -> pace::Password<'_> {
        match self {
            Self::MrzKey(key) => pace::Password::Mrz(key.as_bytes()),
            Self::Can(can) => pace::Password::Can(can.as_bytes()),
        }
    }

    fn mrz_key(&self) -> Option<&str> {
        match self {
            Self::MrzKey(key) => Some(key),
            Self::Can(_) => None,
        }
    }
}

/// A coarse progress stage for host UI.
#[derive(Debug)]
pub enum Stage<'a> {
    Authenticating,
    Reading { data_group: DataGroup, percent: u8 },
    Finished,
    Failed { error: &'a Error },
}

/// Host callbacks; all methods default to doing nothing.
pub trait ProgressObserver {
    fn on_stage(&mut self, _stage: Stage<'_>) {}
    fn on_data_group_progress(&mut self, _data_group: DataGroup, _percent: u8) {}
}

/// The observer for hosts that do not care.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;
impl ProgressObserver for NullObserver {}


#[derive(Debug)]
pub enum Error {
    /// Neither PACE nor BAC produced a secure channel.
    AccessControl {
        pace: Option<CommunicationError>,
        basic_access: Option<CommunicationError>,
    },
    /// BAC (or a BAC fallback) was needed but only a CAN was supplied.
    MrzKeyRequired,
    /// A command outside the data-group reads failed.
    Communication(CommunicationError),
    /// A file operation that the protocol cannot continue without.
    File { name: &'static str, error: lds::ReadError },
    /// A data group failed to read after remediation.
    DataGroup { data_group: DataGroup, error: lds::ReadError },
    /// `EF.COM` was read but cannot be decoded.
    ComDecoding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::AccessControl { pace, basic_access } => {
                write!(f, "access control failed")?;
                if let Some(e) = pace {
                    write!(f, "; PACE: {}", e)?;
                }
                if let Some(e) = basic_access {
                    write!(f, "; BAC: {}", e)?;
                }
                Ok(())
            },
            Self::MrzKeyRequired
                => write!(f, "the MRZ key is required but only a CAN was supplied"),
            Self::Communication(e)
                => write!(f, "communication failed: {}", e),
            Self::File { name, error }
                => write!(f, "failed to read {}: {}", name, error),
            Self::DataGroup { data_group, error }
                => write!(f, "failed to read {}: {}", data_group, error),
            Self::ComDecoding
                => write!(f, "failed to decode EF.COM"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Communication(e) => Some(e),
            Self::File { error, .. } => Some(error),
            Self::DataGroup { error, .. } => Some(error),
            _ => None,
        }
    }
}
impl From<CommunicationError> for Error {
    fn from(value: CommunicationError) -> Self { Self::Communication(value) }
}


/// Everything a completed (or partially completed) read produced.
#[derive(Debug)]
pub struct TravelDocument {
    /// The decoded `EF.COM`.
    pub com: Option<ComInfo>,
    /// Raw BER contents of every successfully read file, including COM
    /// and the security object.
    pub data_groups: BTreeMap<DataGroup, Vec<u8>>,
    /// The decoded security object, when `EF.SOD` was read and parsed.
    pub security_object: Option<SecurityObject>,
    /// The SecurityInfos of `DG14`, when present.
    pub chip_security: Option<chip_auth::SecurityInfos>,
    /// Data groups the chip announced but refused to hand out (typically
    /// DG3/DG4 without terminal authentication).
    pub skipped_data_groups: Vec<DataGroup>,

    pub pace: AuthenticationStatus,
    pub basic_access: AuthenticationStatus,
    pub chip_authentication: AuthenticationStatus,
    pub passive_authentication: AuthenticationStatus,
    /// Not implemented by this stack; always `NotSupported`.
    pub active_authentication: AuthenticationStatus,
    /// Not implemented by this stack; always `NotSupported`.
    pub terminal_authentication: AuthenticationStatus,

    /// Why passive authentication failed, when it did.
    pub passive_authentication_error: Option<String>,
}
impl TravelDocument {
    fn new() -> Self {
        Self {
            com: None,
            data_groups: BTreeMap::new(),
            security_object: None,
            chip_security: None,
            skipped_data_groups: Vec::new(),
            pace: AuthenticationStatus::NotAttempted,
            basic_access: AuthenticationStatus::NotAttempted,
            chip_authentication: AuthenticationStatus::NotAttempted,
            passive_authentication: AuthenticationStatus::NotAttempted,
            active_authentication: AuthenticationStatus::NotSupported,
            terminal_authentication: AuthenticationStatus::NotSupported,
            passive_authentication_error: None,
        }
    }
}


/// The channel the orchestrator talks through: the bare transport before
/// access control, a Secure Messaging wrapper afterwards.
enum Channel {
    Basic(Box<dyn SmartCard>),
    Secure(Box<dyn SecureMessaging>),
}
impl Channel {
    fn into_card(self) -> Box<dyn SmartCard> {
        match self {
            Self::Basic(card) => card,
            // dropping the wrapper zeroizes the retired session keys
            Self::Secure(secured) => secured.into_smart_card(),
        }
    }

    /// Re-wraps the underlying card under fresh session keys with a zero
    /// send sequence counter.
    fn rekey(self, cipher: crate::crypt::cipher_mac::CipherSuite, k_enc: &[u8], k_mac: &[u8]) -> Self {
        let card = self.into_card();
        let cam = cipher.cipher_and_mac();
        let ssc = vec![0u8; cam.cipher_block_size()];
        Self::Secure(cam.create_secure_messaging(card, k_enc, k_mac, &ssc))
    }
}
impl SmartCard for Channel {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        match self {
            Self::Basic(card) => card.communicate(request),
            Self::Secure(secured) => SecureMessaging::communicate(secured.as_mut(), request),
        }
    }
}


pub struct PassportReader<O: ProgressObserver = NullObserver> {
    observer: O,
    read_chunk_size: usize,
}
impl PassportReader<NullObserver> {
    pub fn new() -> Self {
        Self::with_observer(NullObserver)
    }
}
impl Default for PassportReader<NullObserver> {
    fn default() -> Self {
        Self::new()
    }
}
impl<O: ProgressObserver> PassportReader<O> {
    pub fn with_observer(observer: O) -> Self {
        Self {
            observer,
            read_chunk_size: lds::DEFAULT_READ_CHUNK,
        }
    }

    /// The READ BINARY chunk size; shrinks back to the default when the
    /// chip rejects larger reads.
    pub fn with_read_chunk_size(mut self, chunk_size: usize) -> Self {
        self.read_chunk_size = chunk_size.max(1);
        self
    }

    /// Reads and verifies a travel document end to end: access control
    /// (PACE, falling back to BAC), chip authentication when `DG14` is
    /// present, all announced data groups, the security object and
    /// passive authentication.
    #[instrument(skip_all)]
    pub fn read_document(
        &mut self,
        card: Box<dyn SmartCard>,
        access_key: &AccessKey,
    ) -> Result<TravelDocument, Error> {
        match self.read_document_inner(card, access_key) {
            Ok(document) => {
                self.observer.on_stage(Stage::Finished);
                Ok(document)
            },
            Err(error) => {
                self.observer.on_stage(Stage::Failed { error: &error });
                Err(error)
            },
        }
    }

    fn read_document_inner(
        &mut self,
        card: Box<dyn SmartCard>,
        access_key: &AccessKey,
    ) -> Result<TravelDocument, Error> {
        let mut document = TravelDocument::new();
        self.observer.on_stage(Stage::Authenticating);

        let mut channel = Some(Channel::Basic(card));

        // EF.CardAccess lives in the master file; a chip without it does
        // not offer PACE
        let card_access = {
            let active = channel.as_mut().unwrap();
            match lds::select_master_file(&mut *active)
                .and_then(|()| lds::read_elementary_file(active, lds::CARD_ACCESS_FILE_ID, self.read_chunk_size, |_, _| {}))
            {
                Ok(bytes) => Some(bytes),
                Err(error) => {
                    debug!(%error, "EF.CardAccess not readable, assuming no PACE");
                    None
                },
            }
        };

        // access control: PACE first, BAC as fallback
        let mut pace_error = None;
        if let Some(card_access) = &card_access {
            let active = channel.as_mut().unwrap();
            match pace::negotiate(active, card_access, &access_key.pace_password()) {
                Ok(keys) => {
                    channel = Some(channel.take().unwrap().rekey(keys.cipher, &keys.k_session_enc, &keys.k_session_mac));
                    document.pace = AuthenticationStatus::Succeeded;
                    info!("PACE succeeded");
                },
                Err(error) => {
                    document.pace = match &error {
                        CommunicationError::Pace(pace::Error::MappingNotSupported { .. })
                        | CommunicationError::Pace(pace::Error::NoSupportedProtocol)
                        | CommunicationError::Pace(pace::Error::UnknownParameters { .. })
                            => AuthenticationStatus::NotSupported,
                        _ => AuthenticationStatus::Failed,
                    };
                    warn!(%error, "PACE failed, falling back to BAC");
                    pace_error = Some(error);
                },
            }
        } else {
            document.pace = AuthenticationStatus::NotSupported;
        }

        // the application must be selected on both paths: under the PACE
        // channel, or in the clear as the BAC precondition
        lds::select_lds1_application(channel.as_mut().unwrap())
            .map_err(|error| Error::File { name: "eMRTD application", error })?;

        if document.pace != AuthenticationStatus::Succeeded {
            let Some(mrz_key) = access_key.mrz_key() else {
                return Err(match pace_error {
                    Some(pace) => Error::AccessControl { pace: Some(pace), basic_access: None },
                    None => Error::MrzKeyRequired,
                });
            };
            match crate::bac::establish(channel.take().unwrap().into_card(), mrz_key.as_bytes()) {
                Ok(secured) => {
                    channel = Some(Channel::Secure(secured));
                    document.basic_access = AuthenticationStatus::Succeeded;
                    info!("BAC succeeded");
                },
                Err(error) => {
                    document.basic_access = AuthenticationStatus::Failed;
                    return Err(Error::AccessControl {
                        pace: pace_error,
                        basic_access: Some(error),
                    });
                },
            }
        }

        // learn what the chip carries
        let com_bytes = self.read_data_group(&mut channel, access_key, DataGroup::Com, false)?
            .ok_or(Error::File {
                name: "EF.COM",
                error: lds::ReadError::EmptyRead,
            })?;
        let com = lds::decode_com(&com_bytes).map_err(|_| Error::ComDecoding)?;
        debug!(data_groups = ?com.data_groups, "EF.COM decoded");
        document.data_groups.insert(DataGroup::Com, com_bytes);
        document.com = Some(com.clone());

        // chip authentication, when DG14 is announced
        let mut chip_auth_done = false;
        if com.data_groups.contains(&DataGroup::Dg14) {
            chip_auth_done = self.run_chip_authentication(&mut channel, access_key, &mut document)?;
        }

        // the remaining data groups
        for data_group in com.data_groups.iter().copied() {
            if document.data_groups.contains_key(&data_group)
                    || document.skipped_data_groups.contains(&data_group) {
                continue;
            }
            match self.read_data_group(&mut channel, access_key, data_group, chip_auth_done)? {
                Some(bytes) => {
                    document.data_groups.insert(data_group, bytes);
                },
                None => {
                    info!(%data_group, "skipped");
                    document.skipped_data_groups.push(data_group);
                },
            }
        }

        // the security object, then passive authentication
        match self.read_data_group(&mut channel, access_key, DataGroup::Sod, chip_auth_done)? {
            Some(sod_bytes) => {
                match SecurityObject::decode(&sod_bytes) {
                    Ok(security_object) => {
                        match passive_auth::verify(&security_object, &document.data_groups) {
                            Ok(()) => {
                                document.passive_authentication = AuthenticationStatus::Succeeded;
                                info!("passive authentication succeeded");
                            },
                            Err(error) => {
                                warn!(%error, "passive authentication failed");
                                document.passive_authentication = AuthenticationStatus::Failed;
                                document.passive_authentication_error = Some(error.to_string());
                            },
                        }
                        document.security_object = Some(security_object);
                    },
                    Err(error) => {
                        warn!(%error, "security object not decodable");
                        document.passive_authentication = AuthenticationStatus::Failed;
                        document.passive_authentication_error = Some(error.to_string());
                    },
                }
                document.data_groups.insert(DataGroup::Sod, sod_bytes);
            },
            None => {
                warn!("EF.SOD not readable, passive authentication not possible");
                document.skipped_data_groups.push(DataGroup::Sod);
            },
        }

        Ok(document)
    }

    /// Reads `DG14`, runs chip authentication against its first key and
    /// re-keys the channel. Failure is not terminal: the channel falls
    /// back to a fresh BAC session and the read continues.
    fn run_chip_authentication(
        &mut self,
        channel: &mut Option<Channel>,
        access_key: &AccessKey,
        document: &mut TravelDocument,
    ) -> Result<bool, Error> {
        let Some(dg14_bytes) = self.read_data_group(channel, access_key, DataGroup::Dg14, false)? else {
            document.skipped_data_groups.push(DataGroup::Dg14);
            return Ok(false);
        };

        let infos = match chip_auth::decode_dg14(&dg14_bytes) {
            Ok(infos) => infos,
            Err(error) => {
                warn!(%error, "DG14 not decodable, skipping chip authentication");
                document.data_groups.insert(DataGroup::Dg14, dg14_bytes);
                document.chip_authentication = AuthenticationStatus::Failed;
                return Ok(false);
            },
        };
        document.data_groups.insert(DataGroup::Dg14, dg14_bytes);

        let Some(chip_key) = infos.chip_authentication_keys.first() else {
            debug!("DG14 carries no chip authentication key");
            document.chip_security = Some(infos);
            document.chip_authentication = AuthenticationStatus::NotSupported;
            return Ok(false);
        };

        let result = chip_auth::authenticate(
            channel.as_mut().unwrap(),
            chip_key,
            infos.info_for_key(chip_key),
        );
        match result {
            Ok(keys) => {
                let rekeyed = channel.take().unwrap()
                    .rekey(keys.cipher, &keys.k_session_enc, &keys.k_session_mac);
                *channel = Some(rekeyed);
                document.chip_security = Some(infos);
                document.chip_authentication = AuthenticationStatus::Succeeded;
                info!("chip authentication succeeded");
                Ok(true)
            },
            Err(error) => {
                warn!(%error, "chip authentication failed, re-establishing BAC");
                document.chip_security = Some(infos);
                document.chip_authentication = AuthenticationStatus::Failed;
                self.reestablish_basic_access(channel, access_key)?;
                document.basic_access = AuthenticationStatus::Succeeded;
                Ok(false)
            },
        }
    }

    /// Reads one elementary file with the per-file remediation rules:
    /// denied or absent files are skipped (`Ok(None)`), secure-messaging
    /// trouble and oversized reads earn one retry over a fresh BAC
    /// channel, everything else surfaces.
    fn read_data_group(
        &mut self,
        channel: &mut Option<Channel>,
        access_key: &AccessKey,
        data_group: DataGroup,
        chip_auth_done: bool,
    ) -> Result<Option<Vec<u8>>, Error> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = {
                let active = channel.as_mut().unwrap();
                let observer = &mut self.observer;
                lds::read_elementary_file(active, data_group.file_id(), self.read_chunk_size, |read, total| {
                    let percent = ((read * 100) / total.max(1)).min(100) as u8;
                    observer.on_data_group_progress(data_group, percent);
                    observer.on_stage(Stage::Reading { data_group, percent });
                })
            };
            let error = match result {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(error) => error,
            };

            match error.status_kind() {
                Some(StatusKind::SecurityStatusNotSatisfied) | Some(StatusKind::FileNotFound) => {
                    return Ok(None);
                },
                _ if attempts >= 2 => {
                    return Err(Error::DataGroup { data_group, error });
                },
                Some(StatusKind::ClassNotSupported) if chip_auth_done => {
                    warn!(%data_group, "class not supported after re-keying, re-establishing BAC");
                    self.reestablish_basic_access_via_error(channel, access_key, data_group, error)?;
                },
                Some(StatusKind::SmDataObjectsIncorrect) | Some(StatusKind::SmDataObjectsMissing) => {
                    warn!(%data_group, "secure messaging rejected, re-establishing BAC");
                    self.reestablish_basic_access_via_error(channel, access_key, data_group, error)?;
                },
                Some(StatusKind::WrongLength { .. }) | Some(StatusKind::EndOfFile) => {
                    warn!(%data_group, "read length rejected, shrinking chunk and re-establishing BAC");
                    self.read_chunk_size = lds::DEFAULT_READ_CHUNK;
                    self.reestablish_basic_access_via_error(channel, access_key, data_group, error)?;
                },
                _ => {
                    return Err(Error::DataGroup { data_group, error });
                },
            }
        }
    }

    fn reestablish_basic_access_via_error(
        &mut self,
        channel: &mut Option<Channel>,
        access_key: &AccessKey,
        data_group: DataGroup,
        error: lds::ReadError,
    ) -> Result<(), Error> {
        self.reestablish_basic_access(channel, access_key)
            .map_err(|_| Error::DataGroup { data_group, error })
    }

    fn reestablish_basic_access(
        &mut self,
        channel: &mut Option<Channel>,
        access_key: &AccessKey,
    ) -> Result<(), Error> {
        let Some(mrz_key) = access_key.mrz_key() else {
            return Err(Error::MrzKeyRequired);
        };
        let card = channel.take().unwrap().into_card();
        match crate::bac::establish(card, mrz_key.as_bytes()) {
            Ok(secured) => {
                *channel = Some(Channel::Secure(secured));
                Ok(())
            },
            Err(error) => Err(Error::AccessControl {
                pace: None,
                basic_access: Some(error),
            }),
        }
    }
}
