use derive_more::Display;
use tracing::debug;

/// Card application type, mirroring the application name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum AppType {
    #[default]
    #[display("unknown")]
    Unknown,
    #[display("openpgp")]
    OpenPgp,
    #[display("piv")]
    Piv,
    #[display("nks")]
    NetKey,
    #[display("p15")]
    P15,
    #[display("dinsig")]
    DinSig,
    #[display("geldkarte")]
    Geldkarte,
}

impl AppType {
    const ALL: [Self; 6] = [
        Self::OpenPgp,
        Self::Piv,
        Self::NetKey,
        Self::P15,
        Self::DinSig,
        Self::Geldkarte,
    ];

    /// Case-insensitive lookup of an application name
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|app| app.app_name().eq_ignore_ascii_case(name))
            .unwrap_or_else(|| {
                debug!("App type {:?} not found", name);
                Self::Unknown
            })
    }

    /// Application name as used by scdaemon
    pub const fn app_name(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::OpenPgp => "openpgp",
            Self::Piv => "piv",
            Self::NetKey => "nks",
            Self::P15 => "p15",
            Self::DinSig => "dinsig",
            Self::Geldkarte => "geldkarte",
        }
    }

    /// Proper name of the application for display
    pub fn display_name(app_name: &str) -> String {
        match Self::parse(app_name) {
            Self::OpenPgp => "OpenPGP".to_string(),
            Self::Piv => "PIV".to_string(),
            Self::NetKey => "NetKey".to_string(),
            Self::P15 => "PKCS#15".to_string(),
            _ => app_name.to_string(),
        }
    }
}
