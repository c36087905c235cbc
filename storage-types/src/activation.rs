//! Storage transport devices brought online before probing: s390 DASDs,
//! iSCSI nodes and zFCP controllers/disks

use serde::{Deserialize, Serialize};

/// s390 direct access storage device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DasdDevice {
    /// Channel bus id, e.g. "0.0.0150"
    pub id: String,

    pub enabled: bool,

    /// Whether the device carries a low-level format
    pub formatted: bool,

    /// DIAG access mode
    pub diag: bool,

    /// Kernel name once enabled, e.g. "dasda"
    #[serde(default)]
    pub device_name: Option<String>,

    /// "ECKD" or "FBA"
    #[serde(default)]
    pub device_type: Option<String>,

    #[serde(default)]
    pub access_type: Option<String>,
}

impl DasdDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: false,
            formatted: false,
            diag: false,
            device_name: None,
            device_type: None,
            access_type: None,
        }
    }

    pub fn device_path(&self) -> Option<String> {
        self.device_name.as_ref().map(|name| format!("/dev/{name}"))
    }

    /// Only ECKD devices can be formatted with dasdfmt
    pub fn is_formattable(&self) -> bool {
        self.enabled && self.device_type.as_deref() != Some("FBA")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    Onboot,
    Manual,
    Automatic,
}

impl StartupMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Onboot => "onboot",
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "onboot" => Some(Self::Onboot),
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            _ => None,
        }
    }
}

/// iSCSI node (a target reachable through a portal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiNode {
    pub address: String,
    pub port: u16,

    /// Target IQN
    pub target: String,

    pub interface: String,

    /// Whether a session is open
    pub connected: bool,

    #[serde(default)]
    pub startup: Option<StartupMode>,
}

impl IscsiNode {
    pub fn portal(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn is_same(&self, other: &IscsiNode) -> bool {
        self.address == other.address
            && self.port == other.port
            && self.target == other.target
            && self.interface == other.interface
    }
}

/// CHAP credentials for discovery or login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiAuth {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub reverse_username: Option<String>,

    #[serde(default, skip_serializing)]
    pub reverse_password: Option<String>,
}

impl IscsiAuth {
    pub fn by_target(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn by_initiator(&self) -> bool {
        self.reverse_username.is_some() && self.reverse_password.is_some()
    }
}

/// zFCP controller (FCP channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZfcpController {
    /// Channel bus id, e.g. "0.0.fa00"
    pub channel: String,

    pub active: bool,

    /// Whether LUNs are scanned automatically once activated
    pub lun_scan: bool,
}

/// zFCP disk, a LUN reachable through a controller and a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZfcpDisk {
    /// Kernel name, e.g. "/dev/sda"
    pub name: String,

    pub channel: String,
    pub wwpn: String,
    pub lun: String,
}
