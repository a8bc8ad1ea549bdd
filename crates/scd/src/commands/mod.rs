//! Commands sent to the agent and scdaemon

mod write_cert;

use std::fmt;

use crate::assuan::escape::percent_plus_escape;

pub use write_cert::WriteCertTransaction;

/// How `SCD PASSWD` should treat the PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswdMode {
    /// Change the PIN
    #[default]
    Change,
    /// Reset (unblock) the PIN with the PUK or reset code
    Reset,
    /// Replace a transport PIN
    NullPin,
}

/// A command line understood by gpg-agent
///
/// Most of them are forwarded to scdaemon and carry the `SCD` prefix; the
/// key management commands are handled by the agent itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScdCommand {
    /// `SCD SERIALNO [--all]`
    SerialNo { all: bool },
    /// `SCD GETINFO all_active_apps`
    AllActiveApps,
    /// `SCD LEARN --force`
    Learn,
    GetAttr(String),
    /// `SCD SETATTR`, the value is percent-plus escaped
    SetAttr { name: String, value: Vec<u8> },
    SwitchCard(String),
    SwitchApp(String),
    ReadCert(String),
    /// `SCD READKEY --info-only -- <keyref>`
    ReadKeyInfo(String),
    /// `SCD WRITECERT`, the certificate is inquired as `CERTDATA`
    WriteCert(String),
    GenKey {
        key_ref: String,
        algorithm: Option<String>,
        force: bool,
    },
    Passwd { key_ref: String, mode: PasswdMode },
    /// `SCD DEVINFO --watch`
    DevInfoWatch,
    /// Agent command creating a key stub for a card key
    ReadKeyStub(String),
    /// Agent command deleting a private key
    DeleteKey { grip: String },
    /// Agent command copying a private key onto a card slot
    KeyToCard {
        grip: String,
        serial_number: String,
        key_ref: String,
        timestamp: String,
    },
}

impl fmt::Display for ScdCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialNo { all: true } => write!(f, "SCD SERIALNO --all"),
            Self::SerialNo { all: false } => write!(f, "SCD SERIALNO"),
            Self::AllActiveApps => write!(f, "SCD GETINFO all_active_apps"),
            Self::Learn => write!(f, "SCD LEARN --force"),
            Self::GetAttr(name) => write!(f, "SCD GETATTR {name}"),
            Self::SetAttr { name, value } => {
                write!(f, "SCD SETATTR {name} {}", percent_plus_escape(value))
            }
            Self::SwitchCard(serial_number) => write!(f, "SCD SWITCHCARD {serial_number}"),
            Self::SwitchApp(app_name) => write!(f, "SCD SWITCHAPP {app_name}"),
            Self::ReadCert(key_ref) => write!(f, "SCD READCERT {key_ref}"),
            Self::ReadKeyInfo(key_ref) => write!(f, "SCD READKEY --info-only -- {key_ref}"),
            Self::WriteCert(key_ref) => write!(f, "SCD WRITECERT {key_ref}"),
            Self::GenKey {
                key_ref,
                algorithm,
                force,
            } => {
                write!(f, "SCD GENKEY")?;
                if *force {
                    write!(f, " --force")?;
                }
                if let Some(algorithm) = algorithm {
                    write!(f, " --algo={algorithm}")?;
                }
                write!(f, " -- {key_ref}")
            }
            Self::Passwd { key_ref, mode } => match mode {
                PasswdMode::Change => write!(f, "SCD PASSWD {key_ref}"),
                PasswdMode::Reset => write!(f, "SCD PASSWD --reset {key_ref}"),
                PasswdMode::NullPin => write!(f, "SCD PASSWD --nullpin {key_ref}"),
            },
            Self::DevInfoWatch => write!(f, "SCD DEVINFO --watch"),
            Self::ReadKeyStub(key_ref) => write!(f, "READKEY --card --no-data -- {key_ref}"),
            Self::DeleteKey { grip } => write!(f, "DELETE_KEY --force {grip}"),
            Self::KeyToCard {
                grip,
                serial_number,
                key_ref,
                timestamp,
            } => write!(
                f,
                "KEYTOCARD --force {grip} {serial_number} {key_ref} {timestamp}"
            ),
        }
    }
}

impl From<ScdCommand> for String {
    fn from(command: ScdCommand) -> Self {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(
            ScdCommand::SerialNo { all: true }.to_string(),
            "SCD SERIALNO --all"
        );
        assert_eq!(
            ScdCommand::GetAttr("$DISPSERIALNO".into()).to_string(),
            "SCD GETATTR $DISPSERIALNO"
        );
        assert_eq!(
            ScdCommand::ReadKeyInfo("PIV.9A".into()).to_string(),
            "SCD READKEY --info-only -- PIV.9A"
        );
        assert_eq!(
            ScdCommand::ReadKeyStub("OPENPGP.1".into()).to_string(),
            "READKEY --card --no-data -- OPENPGP.1"
        );
    }

    #[test]
    fn test_genkey() {
        let cmd = ScdCommand::GenKey {
            key_ref: "PIV.9C".into(),
            algorithm: Some("nistp256".into()),
            force: true,
        };
        assert_eq!(cmd.to_string(), "SCD GENKEY --force --algo=nistp256 -- PIV.9C");

        let cmd = ScdCommand::GenKey {
            key_ref: "OPENPGP.2".into(),
            algorithm: None,
            force: false,
        };
        assert_eq!(cmd.to_string(), "SCD GENKEY -- OPENPGP.2");
    }

    #[test]
    fn test_passwd_and_setattr() {
        let cmd = ScdCommand::Passwd {
            key_ref: "PW1.CH".into(),
            mode: PasswdMode::NullPin,
        };
        assert_eq!(cmd.to_string(), "SCD PASSWD --nullpin PW1.CH");

        let cmd = ScdCommand::SetAttr {
            name: "DISP-NAME".into(),
            value: b"Doe<<Jane Ann".to_vec(),
        };
        assert_eq!(cmd.to_string(), "SCD SETATTR DISP-NAME Doe<<Jane+Ann");

        let cmd = ScdCommand::SetAttr {
            name: "LOGIN-DATA".into(),
            value: vec![b'j', 0xE9, 0xFF],
        };
        assert_eq!(cmd.to_string(), "SCD SETATTR LOGIN-DATA j%E9%FF");
    }

    #[test]
    fn test_agent_key_commands() {
        let cmd = ScdCommand::KeyToCard {
            grip: "ABCDEF".into(),
            serial_number: "D2760001240103040006123456780000".into(),
            key_ref: "OPENPGP.2".into(),
            timestamp: "20240101T000000".into(),
        };
        assert_eq!(
            cmd.to_string(),
            "KEYTOCARD --force ABCDEF D2760001240103040006123456780000 OPENPGP.2 20240101T000000"
        );
        assert_eq!(
            ScdCommand::DeleteKey {
                grip: "ABCDEF".into()
            }
            .to_string(),
            "DELETE_KEY --force ABCDEF"
        );
    }
}
