//! Sync protocol messages.
//!
//! A message stream is a concatenation of `ident`, `download`, and
//! `upload` messages. Each starts with a space-terminated type token,
//! followed by a space-separated header line ending in `\n`, followed by
//! the body (when the header declares one). Parsers return the message
//! together with the remainder of the input, so a driver can consume a
//! stream message by message.

use crate::body::MessageBody;
use crate::changeset::{decode_instructions, encode_instructions, Changeset, RemoteChangeset};
use crate::error::{WireError, WireResult};
use crate::input::{HeaderScanner, InputCursor};
use crate::types::{DownloadCursor, SaltedFileIdent, SaltedVersion, SyncProgress, UploadCursor};
use tracing::{error, trace};

/// Unsigned integer identifying a logical sync session.
pub type SessionIdent = u64;

/// A parsed sync message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Server-assigned client file identity.
    Ident(ServerIdentMessage),
    /// Server changesets to integrate.
    Download(DownloadMessage),
    /// Locally-produced changesets to apply.
    Upload(UploadMessage),
}

impl Message {
    /// Encodes the message to its on-wire bytes (uncompressed body form).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ident(m) => m.encode(),
            Self::Download(m) => m.encode(),
            Self::Upload(m) => m.encode(),
        }
    }
}

/// Parses one message off the front of the input.
///
/// Returns the message and the unconsumed remainder.
///
/// # Errors
///
/// Returns a [`WireError`] on a malformed header, an unknown message
/// type, or a body/changeset framing failure.
pub fn parse_message(cursor: InputCursor<'_>) -> WireResult<(Message, InputCursor<'_>)> {
    let mut scanner = HeaderScanner::new(cursor);
    let message_type = scanner.symbol()?;
    let cursor = scanner.into_cursor();
    match message_type {
        "ident" => {
            ServerIdentMessage::parse(cursor).map(|(m, rest)| (Message::Ident(m), rest))
        }
        "download" => {
            DownloadMessage::parse(cursor).map(|(m, rest)| (Message::Download(m), rest))
        }
        "upload" => UploadMessage::parse(cursor).map(|(m, rest)| (Message::Upload(m), rest)),
        other => Err(WireError::UnknownMessageType(other.to_string())),
    }
}

/// The server-assigned file identity for this client.
///
/// Header line: `session_ident file_ident salt \n`. No body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerIdentMessage {
    /// Session the identity belongs to.
    pub session_ident: SessionIdent,
    /// Assigned identity and salt.
    pub file_ident: SaltedFileIdent,
}

impl ServerIdentMessage {
    /// Parses the header after the type token.
    pub fn parse(cursor: InputCursor<'_>) -> WireResult<(Self, InputCursor<'_>)> {
        let mut scanner = HeaderScanner::new(cursor);
        let session_ident = scanner.u64()?;
        let ident = scanner.u64()?;
        let salt = scanner.u64_last(b'\n')?;
        Ok((
            Self {
                session_ident,
                file_ident: SaltedFileIdent { ident, salt },
            },
            scanner.into_cursor(),
        ))
    }

    /// Encodes the message to its on-wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "ident {} {} {}\n",
            self.session_ident, self.file_ident.ident, self.file_ident.salt
        )
        .into_bytes()
    }
}

/// A batch of server changesets plus the server's view of sync progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMessage {
    /// Session the batch belongs to.
    pub session_ident: SessionIdent,
    /// Server-reported sync progress after this batch.
    pub progress: SyncProgress,
    /// Latest version on the server, with salt.
    pub latest_server_version: SaltedVersion,
    /// Server's estimate of bytes still downloadable.
    pub downloadable_bytes: u64,
    /// Changesets in server-version order.
    pub changesets: Vec<RemoteChangeset>,
}

impl DownloadMessage {
    /// Parses the header, frames the body, and splits it into changesets.
    pub fn parse(cursor: InputCursor<'_>) -> WireResult<(Self, InputCursor<'_>)> {
        let mut scanner = HeaderScanner::new(cursor);
        let header = Self::parse_header(&mut scanner).map_err(|e| {
            error!("error parsing header line for download message");
            e
        })?;
        let (message, is_compressed, uncompressed_size, compressed_size) = header;
        let mut cursor = scanner.into_cursor();
        let body =
            MessageBody::parse(&mut cursor, compressed_size, uncompressed_size, is_compressed)?;

        trace!(
            "decoding download message. {{download: {{server: {}, client: {}}} upload: {{server: {}, client: {}}}, latest: {}}}",
            message.progress.download.server_version,
            message.progress.download.last_integrated_client_version,
            message.progress.upload.last_integrated_server_version,
            message.progress.upload.client_version,
            message.latest_server_version.version
        );

        let mut message = message;
        let mut body_cursor = InputCursor::new(body.as_slice());
        while !body_cursor.is_empty() {
            let mut sub = HeaderScanner::new(body_cursor);
            let remote_version = sub.u64()?;
            let last_integrated_local_version = sub.u64()?;
            let origin_timestamp = sub.u64()?;
            let origin_file_ident = sub.u64()?;
            let original_size = sub.u64()?;
            let changeset_size = sub.size()?;
            body_cursor = sub.into_cursor();

            if changeset_size > body_cursor.len() {
                error!(
                    "changeset length is {} but buffer size is {}",
                    changeset_size,
                    body_cursor.len()
                );
                return Err(WireError::ChangesetOverrun {
                    declared: changeset_size,
                    available: body_cursor.len(),
                });
            }
            let payload = body_cursor.take(changeset_size)?.to_vec();
            match decode_instructions(&payload) {
                Ok(instructions) => trace!(
                    "found download changeset: serverVersion: {}, clientVersion: {}, origin: {}, instructions: {}",
                    remote_version,
                    last_integrated_local_version,
                    origin_file_ident,
                    instructions.len()
                ),
                Err(e) => trace!("download changeset does not decode: {e}"),
            }
            message.changesets.push(RemoteChangeset {
                remote_version,
                last_integrated_local_version,
                origin_timestamp,
                origin_file_ident,
                original_size,
                payload,
            });
        }

        Ok((message, cursor))
    }

    /// Reads the 11-field header line, returning the message shell and
    /// the body framing parameters.
    #[allow(clippy::type_complexity)]
    fn parse_header(scanner: &mut HeaderScanner<'_>) -> WireResult<(Self, bool, usize, usize)> {
        let session_ident = scanner.u64()?;
        let server_version = scanner.u64()?;
        let last_integrated_client_version = scanner.u64()?;
        let latest_version = scanner.u64()?;
        let latest_salt = scanner.u64()?;
        let client_version = scanner.u64()?;
        let last_integrated_server_version = scanner.u64()?;
        let downloadable_bytes = scanner.u64()?;
        let is_compressed = scanner.u64()? != 0;
        let uncompressed_size = scanner.size()?;
        let compressed_size = scanner.size_last(b'\n')?;

        let progress = SyncProgress {
            download: DownloadCursor {
                server_version,
                last_integrated_client_version,
            },
            upload: UploadCursor {
                client_version,
                last_integrated_server_version,
            },
        };

        Ok((
            Self {
                session_ident,
                progress,
                latest_server_version: SaltedVersion {
                    version: latest_version,
                    salt: latest_salt,
                },
                downloadable_bytes,
                changesets: Vec::new(),
            },
            is_compressed,
            uncompressed_size,
            compressed_size,
        ))
    }

    /// Encodes the message to its on-wire bytes (uncompressed body).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for changeset in &self.changesets {
            body.extend_from_slice(
                format!(
                    "{} {} {} {} {} {} ",
                    changeset.remote_version,
                    changeset.last_integrated_local_version,
                    changeset.origin_timestamp,
                    changeset.origin_file_ident,
                    changeset.original_size,
                    changeset.payload.len()
                )
                .as_bytes(),
            );
            body.extend_from_slice(&changeset.payload);
        }

        let mut out = format!(
            "download {} {} {} {} {} {} {} {} 0 {} 0\n",
            self.session_ident,
            self.progress.download.server_version,
            self.progress.download.last_integrated_client_version,
            self.latest_server_version.version,
            self.latest_server_version.salt,
            self.progress.upload.client_version,
            self.progress.upload.last_integrated_server_version,
            self.downloadable_bytes,
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(&body);
        out
    }
}

/// A batch of locally-produced changesets to apply as write transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMessage {
    /// Session the batch belongs to.
    pub session_ident: SessionIdent,
    /// Upload-direction progress after this batch.
    pub upload_progress: UploadCursor,
    /// Server version the uploader holds locked.
    pub locked_server_version: u64,
    /// Changesets in client-version order.
    pub changesets: Vec<Changeset>,
}

impl UploadMessage {
    /// Parses the header, frames the body, and decodes each changeset.
    ///
    /// Unlike the download path, changeset payloads must decode here;
    /// a schema violation fails the parse.
    pub fn parse(cursor: InputCursor<'_>) -> WireResult<(Self, InputCursor<'_>)> {
        let mut scanner = HeaderScanner::new(cursor);
        let session_ident = scanner.u64()?;
        let is_compressed = scanner.u64()? != 0;
        let uncompressed_size = scanner.size()?;
        let compressed_size = scanner.size()?;
        let client_version = scanner.u64()?;
        let last_integrated_server_version = scanner.u64()?;
        let locked_server_version = scanner.u64_last(b'\n')?;

        let mut cursor = scanner.into_cursor();
        let body =
            MessageBody::parse(&mut cursor, compressed_size, uncompressed_size, is_compressed)?;

        let mut changesets = Vec::new();
        let mut body_cursor = InputCursor::new(body.as_slice());
        while !body_cursor.is_empty() {
            let mut sub = HeaderScanner::new(body_cursor);
            let version = sub.u64()?;
            let last_integrated_remote_version = sub.u64()?;
            let origin_timestamp = sub.u64()?;
            let origin_file_ident = sub.u64()?;
            let changeset_size = sub.size()?;
            body_cursor = sub.into_cursor();

            if changeset_size > body_cursor.len() {
                return Err(WireError::ChangesetOverrun {
                    declared: changeset_size,
                    available: body_cursor.len(),
                });
            }
            trace!(
                "found upload changeset: {} {} {} {} {}",
                last_integrated_remote_version,
                version,
                origin_timestamp,
                origin_file_ident,
                changeset_size
            );
            let payload = body_cursor.take(changeset_size)?;
            let instructions = decode_instructions(payload).map_err(|e| {
                error!("error decoding changeset for client version {version}: {e}");
                e
            })?;
            trace!("decoded changeset with {} instructions", instructions.len());
            changesets.push(Changeset {
                version,
                last_integrated_remote_version,
                origin_timestamp,
                origin_file_ident,
                instructions,
            });
        }

        Ok((
            Self {
                session_ident,
                upload_progress: UploadCursor {
                    client_version,
                    last_integrated_server_version,
                },
                locked_server_version,
                changesets,
            },
            cursor,
        ))
    }

    /// Encodes the message to its on-wire bytes (uncompressed body).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for changeset in &self.changesets {
            let payload = encode_instructions(&changeset.instructions);
            body.extend_from_slice(
                format!(
                    "{} {} {} {} {} ",
                    changeset.version,
                    changeset.last_integrated_remote_version,
                    changeset.origin_timestamp,
                    changeset.origin_file_ident,
                    payload.len()
                )
                .as_bytes(),
            );
            body.extend_from_slice(&payload);
        }

        let mut out = format!(
            "upload {} 0 {} 0 {} {} {}\n",
            self.session_ident,
            body.len(),
            self.upload_progress.client_version,
            self.upload_progress.last_integrated_server_version,
            self.locked_server_version
        )
        .into_bytes();
        out.extend_from_slice(&body);
        out
    }
}
