//! Protocol value types.

/// A client file identity issued by the server, paired with an
/// anti-collision salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaltedFileIdent {
    /// Server-issued numeric identity for the client database file.
    pub ident: u64,
    /// Salt bound to the identity.
    pub salt: u64,
}

/// A server-side version with its salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaltedVersion {
    /// Server version.
    pub version: u64,
    /// Salt bound to the version.
    pub salt: u64,
}

/// Download-direction progress cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadCursor {
    /// Latest server version integrated locally.
    pub server_version: u64,
    /// Latest client version the server had integrated when producing
    /// this download.
    pub last_integrated_client_version: u64,
}

/// Upload-direction progress cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadCursor {
    /// Latest client version uploaded.
    pub client_version: u64,
    /// Latest server version integrated into that client version.
    pub last_integrated_server_version: u64,
}

/// Paired cursors tracking how far each side has integrated the other's
/// history. Monotonically non-decreasing across messages for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncProgress {
    /// Download-direction cursor.
    pub download: DownloadCursor,
    /// Upload-direction cursor.
    pub upload: UploadCursor,
}
