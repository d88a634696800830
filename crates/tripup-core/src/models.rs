//! Domain models shared by every TripUp crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// ASSET TYPES
// =============================================================================

/// Media kind of a logical asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Photo,
    Video,
    Audio,
    Unknown,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Photo => "photo",
            AssetType::Video => "video",
            AssetType::Audio => "audio",
            AssetType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "photo" => Ok(AssetType::Photo),
            "video" => Ok(AssetType::Video),
            "audio" => Ok(AssetType::Audio),
            "unknown" => Ok(AssetType::Unknown),
            other => Err(Error::InvalidInput(format!("unknown asset type: {other}"))),
        }
    }
}

/// Quality tier of a physical asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Compressed rendition, always retained locally.
    Low,
    /// Full quality, removed locally once safely uploaded.
    Original,
}

impl Quality {
    pub const ALL: [Quality; 2] = [Quality::Low, Quality::Original];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Original => "original",
        }
    }

    /// The opposite tier.
    pub fn other(&self) -> Quality {
        match self {
            Quality::Low => Quality::Original,
            Quality::Original => Quality::Low,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Quality::Low),
            "original" => Ok(Quality::Original),
            other => Err(Error::InvalidInput(format!("unknown quality: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl fmt::Display for Geolocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.altitude {
            Some(alt) => write!(f, "{},{},{}", self.latitude, self.longitude, alt),
            None => write!(f, "{},{}", self.latitude, self.longitude),
        }
    }
}

impl FromStr for Geolocation {
    type Err = Error;

    /// Parses the `lat,lon[,alt]` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| Error::InvalidInput(format!("invalid coordinate: {part}")))
        };
        let parts: Vec<&str> = s.split(',').collect();
        match parts.as_slice() {
            [lat, lon] => Ok(Geolocation {
                latitude: parse(lat)?,
                longitude: parse(lon)?,
                altitude: None,
            }),
            [lat, lon, alt] => Ok(Geolocation {
                latitude: parse(lat)?,
                longitude: parse(lon)?,
                altitude: Some(parse(alt)?),
            }),
            _ => Err(Error::InvalidInput(format!("invalid location: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// PIPELINE STATE
// =============================================================================

/// Import pipeline stage, strictly ordered.
///
/// Each stage records what has already succeeded, so an interrupted import
/// resumes from the stage after the one stored here. `Success` and `Fatal`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Pending,
    KeyGenerated,
    FetchedFromIos,
    UploadedToCloud,
    Success,
    Fatal,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::Pending => "pending",
            ImportStage::KeyGenerated => "key_generated",
            ImportStage::FetchedFromIos => "fetched_from_ios",
            ImportStage::UploadedToCloud => "uploaded_to_cloud",
            ImportStage::Success => "success",
            ImportStage::Fatal => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStage::Success | ImportStage::Fatal)
    }

    /// The stage that follows a successful run of the next pipeline step.
    ///
    /// Terminal stages have no successor.
    pub fn next(&self) -> Option<ImportStage> {
        match self {
            ImportStage::Pending => Some(ImportStage::KeyGenerated),
            ImportStage::KeyGenerated => Some(ImportStage::FetchedFromIos),
            ImportStage::FetchedFromIos => Some(ImportStage::UploadedToCloud),
            ImportStage::UploadedToCloud => Some(ImportStage::Success),
            ImportStage::Success | ImportStage::Fatal => None,
        }
    }

    /// Whether `next` is a legal transition from this stage.
    ///
    /// Forward moves to the immediate successor are legal, and `Fatal` is
    /// reachable from every non-terminal stage. `FetchedFromIos` may also
    /// fall back to `KeyGenerated` when the exported original is gone and
    /// must be fetched again.
    pub fn is_valid_next_state(&self, next: ImportStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ImportStage::Fatal
            || self.next() == Some(next)
            || (*self == ImportStage::FetchedFromIos && next == ImportStage::KeyGenerated)
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ImportStage::Pending),
            "key_generated" => Ok(ImportStage::KeyGenerated),
            "fetched_from_ios" => Ok(ImportStage::FetchedFromIos),
            "uploaded_to_cloud" => Ok(ImportStage::UploadedToCloud),
            "success" => Ok(ImportStage::Success),
            "fatal" => Ok(ImportStage::Fatal),
            other => Err(Error::InvalidInput(format!("unknown import stage: {other}"))),
        }
    }
}

/// Progress of an asset deletion. `None` (no state) means nothing done yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteState {
    DeletedFromServer,
    DeletedFromDisk,
}

impl DeleteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteState::DeletedFromServer => "deleted_from_server",
            DeleteState::DeletedFromDisk => "deleted_from_disk",
        }
    }
}

impl FromStr for DeleteState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deleted_from_server" => Ok(DeleteState::DeletedFromServer),
            "deleted_from_disk" => Ok(DeleteState::DeletedFromDisk),
            other => Err(Error::InvalidInput(format!("unknown delete state: {other}"))),
        }
    }
}

// =============================================================================
// ASSET RECORDS
// =============================================================================

/// Immutable projection of one logical media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub uuid: Uuid,
    pub owner_id: Uuid,
    pub asset_type: AssetType,
    pub creation_date: Option<DateTime<Utc>>,
    pub location: Option<Geolocation>,
    pub pixel_size: PixelSize,
    /// Duration in seconds (videos and audio).
    pub duration: Option<f64>,
    pub imported: bool,
    pub favourite: bool,
    pub deleted: bool,
    pub md5: Option<String>,
}

/// Full database row for an asset, including pipeline bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub uuid: Uuid,
    pub owner_id: Uuid,
    pub asset_type: AssetType,
    pub creation_date: Option<DateTime<Utc>>,
    pub location: Option<Geolocation>,
    pub pixel_size: PixelSize,
    pub duration: Option<f64>,
    pub imported: bool,
    pub favourite: bool,
    pub deleted: bool,
    pub md5: Option<String>,
    /// Identifies the per-asset encryption key in the keychain.
    pub fingerprint: Option<String>,
    /// Device photo library reference.
    pub local_identifier: Option<String>,
    pub original_uti: Option<String>,
    pub import_status: ImportStage,
    pub delete_status: Option<DeleteState>,
    pub cloud_filesize: u64,
    pub remote_path_low: Option<String>,
    pub remote_path_original: Option<String>,
}

impl AssetRecord {
    /// A fresh record for a device library item that has not been imported.
    pub fn new_local(owner_id: Uuid, device: &DeviceAsset) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            owner_id,
            asset_type: device.asset_type,
            creation_date: device.creation_date,
            location: device.location,
            pixel_size: device.pixel_size,
            duration: device.duration,
            imported: false,
            favourite: device.favourite,
            deleted: false,
            md5: None,
            fingerprint: None,
            local_identifier: Some(device.local_identifier.clone()),
            original_uti: None,
            import_status: ImportStage::Pending,
            delete_status: None,
            cloud_filesize: 0,
            remote_path_low: None,
            remote_path_original: None,
        }
    }

    pub fn remote_path(&self, quality: Quality) -> Option<&str> {
        match quality {
            Quality::Low => self.remote_path_low.as_deref(),
            Quality::Original => self.remote_path_original.as_deref(),
        }
    }

    pub fn asset(&self) -> Asset {
        Asset {
            uuid: self.uuid,
            owner_id: self.owner_id,
            asset_type: self.asset_type,
            creation_date: self.creation_date,
            location: self.location,
            pixel_size: self.pixel_size,
            duration: self.duration,
            imported: self.imported,
            favourite: self.favourite,
            deleted: self.deleted,
            md5: self.md5.clone(),
        }
    }
}

// =============================================================================
// COLLABORATOR PAYLOADS
// =============================================================================

/// Metadata for one item in the device photo library.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAsset {
    pub local_identifier: String,
    pub asset_type: AssetType,
    pub creation_date: Option<DateTime<Utc>>,
    pub location: Option<Geolocation>,
    pub pixel_size: PixelSize,
    pub duration: Option<f64>,
    pub favourite: bool,
}

/// Result of exporting an original resource from the photo library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedResource {
    /// Uniform type identifier of the exported file.
    pub uti: String,
    /// Whether the library transcoded the source (video to MP4).
    pub transcoded: bool,
}

/// Priority hint for cloud transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPriority {
    Low,
    High,
}

/// Metadata submitted to the API when an asset is created on the server.
///
/// Sensitive fields are encrypted with the asset key; the asset key itself is
/// sealed to the user's public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAssetRequest {
    pub uuid: Uuid,
    pub asset_type: AssetType,
    pub remote_path_low: String,
    pub remote_path_original: String,
    pub original_uti: Option<String>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Bytes of the original rendition before encryption.
    pub total_size: u64,
    pub encrypted_md5: String,
    pub encrypted_creation_date: Option<String>,
    pub encrypted_location: Option<String>,
    pub encrypted_duration: Option<String>,
    pub sealed_key: String,
    pub favourite: bool,
}

/// Reports an original uploaded after the asset was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalUpdate {
    pub uuid: Uuid,
    pub remote_path_original: String,
}

/// One entry of the server change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAsset {
    pub uuid: Uuid,
    pub owner_id: Uuid,
    pub asset_type: AssetType,
    pub remote_path_low: Option<String>,
    pub remote_path_original: Option<String>,
    pub original_uti: Option<String>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub cloud_filesize: u64,
    pub sealed_key: String,
    pub encrypted_md5: Option<String>,
    pub encrypted_creation_date: Option<String>,
    pub encrypted_location: Option<String>,
    pub encrypted_duration: Option<String>,
    pub favourite: bool,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Application lifecycle notifications driving queue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycleEvent {
    ResignActive,
    EnterBackground,
    BecomeActive,
    AutoBackupChanged(bool),
}

/// Snapshot of the conditions that gate the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub disk_space_low: bool,
    pub cloud_space_low: bool,
    pub network_available: bool,
}

impl SystemStatus {
    /// Everything available.
    pub fn healthy() -> Self {
        Self {
            disk_space_low: false,
            cloud_space_low: false,
            network_available: true,
        }
    }

    /// Whether the import queue must be suspended.
    pub fn suspends_imports(&self) -> bool {
        self.disk_space_low || self.cloud_space_low || !self.network_available
    }

    /// Whether the delete queue must be suspended.
    pub fn suspends_deletes(&self) -> bool {
        !self.network_available
    }

    /// Whether in-flight downloads must be cancelled outright.
    ///
    /// Partially downloaded scratch files are not resumable.
    pub fn cancels_downloads(&self) -> bool {
        self.disk_space_low || !self.network_available
    }
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self::healthy()
    }
}
