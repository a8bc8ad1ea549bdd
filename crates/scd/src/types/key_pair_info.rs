use std::fmt;

/// One key slot of a card application, as reported by `KEYPAIRINFO`
///
/// The status line has the form `<grip> <keyref> [<usage>] [<keytime>] [<algo>]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPairInfo {
    pub key_ref: String,
    pub grip: String,
    /// Usage flags, e.g. `sc` for sign and certify
    pub usage: String,
    pub key_time: String,
    pub algorithm: String,
}

impl KeyPairInfo {
    /// Slot template with a key reference and usage but no key
    pub fn slot(key_ref: &str, usage: &str) -> Self {
        Self {
            key_ref: key_ref.to_string(),
            usage: usage.to_string(),
            ..Default::default()
        }
    }

    /// Parse the value of a `KEYPAIRINFO` status line
    ///
    /// Returns an empty info (no grip) if grip or key reference are missing.
    pub fn from_status_line(value: &str) -> Self {
        Self::try_from(value).unwrap_or_default()
    }

    /// Merge a newer report for the same slot into this one
    ///
    /// A different grip means a different key, so all key specific fields are
    /// reset first. Empty fields and the `-` placeholder never overwrite.
    pub fn update(&mut self, other: &Self) {
        if self.key_ref != other.key_ref {
            return;
        }
        if self.grip != other.grip {
            self.grip = other.grip.clone();
            self.usage.clear();
            self.key_time.clear();
            self.algorithm.clear();
        }

        let merge = |field: &mut String, value: &str| {
            if !value.is_empty() && value != "-" {
                *field = value.to_string();
            }
        };
        merge(&mut self.usage, &other.usage);
        merge(&mut self.key_time, &other.key_time);
        merge(&mut self.algorithm, &other.algorithm);
    }

    pub fn can_sign(&self) -> bool {
        self.usage.contains('s')
    }

    pub fn can_certify(&self) -> bool {
        self.usage.contains('c')
    }

    pub fn can_encrypt(&self) -> bool {
        self.usage.contains('e')
    }

    pub fn can_authenticate(&self) -> bool {
        self.usage.contains('a')
    }
}

impl TryFrom<&str> for KeyPairInfo {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut fields = value.split_whitespace();
        let (Some(grip), Some(key_ref)) = (fields.next(), fields.next()) else {
            return Err(anyhow::anyhow!("Invalid KEYPAIRINFO {value:?}"));
        };
        let mut next = || fields.next().unwrap_or_default().to_string();

        Ok(Self {
            grip: grip.to_string(),
            key_ref: key_ref.to_string(),
            usage: next(),
            key_time: next(),
            algorithm: next(),
        })
    }
}

impl fmt::Display for KeyPairInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
        write!(
            f,
            "{} {} {} {} {}",
            or_dash(&self.key_ref),
            or_dash(&self.grip),
            or_dash(&self.usage),
            or_dash(&self.key_time),
            or_dash(&self.algorithm)
        )
    }
}
