use bytes::Bytes;
use tracing::debug;

use crate::assuan::AssuanTransaction;
use crate::error::AgentError;

/// Supplies the certificate for `SCD WRITECERT` when the agent inquires it
#[derive(Debug, Clone)]
pub struct WriteCertTransaction {
    certificate: Bytes,
}

impl WriteCertTransaction {
    const KEYWORD: &'static str = "CERTDATA";

    pub fn new(certificate: impl Into<Bytes>) -> Self {
        Self {
            certificate: certificate.into(),
        }
    }
}

impl AssuanTransaction for WriteCertTransaction {
    fn inquire(&mut self, keyword: &str, _args: &str) -> Result<Option<Bytes>, AgentError> {
        if keyword != Self::KEYWORD {
            debug!("Unexpected inquiry {}", keyword);
            return Ok(None);
        }
        Ok(Some(self.certificate.clone()))
    }
}
